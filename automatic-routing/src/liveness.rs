//! Optional explicit-liveness tracking: heartbeat flags plus a sweep timer.
//!
//! The canonical liveness policy is backend-enforced: a TTL or freshness
//! window simply stops returning a dead instance's entry, and the removal
//! event drains it from the routing view. This tracker is the alternate,
//! adapter-independent policy for deployments whose backend cannot expire
//! entries: declarations carry an `active` flag, and a local sweep timer
//! deactivates instances whose heartbeat goes stale without a clean removal.
//! Deactivation is logging only; it never mutates the routing maps.

use crate::declaration::{EndpointInstance, HandledMessageDeclaration};
use data_backplane::{QuerySchedule, RecurringAction, ScheduleHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const LIVENESS_TRACKER_TAG: &str = "InstanceLivenessTracker:";
const LIVENESS_TRACKER_FN_STOP_TAG: &str = "stop():";

#[derive(Clone, Copy)]
struct InstanceActivity {
    active: bool,
    last_active: Instant,
}

type ActivityMap = HashMap<EndpointInstance, InstanceActivity>;

pub struct InstanceLivenessTracker {
    heartbeat_timeout: Duration,
    schedule: Arc<dyn QuerySchedule>,
    instances: Arc<StdMutex<ActivityMap>>,
    sweep_handle: Mutex<Option<ScheduleHandle>>,
}

impl InstanceLivenessTracker {
    pub fn new(schedule: Arc<dyn QuerySchedule>, heartbeat_timeout: Duration) -> Self {
        Self {
            heartbeat_timeout,
            schedule,
            instances: Arc::new(StdMutex::new(HashMap::new())),
            sweep_handle: Mutex::new(None),
        }
    }

    /// Begins the periodic sweep over tracked instances.
    pub async fn start(&self) {
        let mut handle_slot = self.sweep_handle.lock().await;
        if handle_slot.is_some() {
            return;
        }
        let instances = self.instances.clone();
        let heartbeat_timeout = self.heartbeat_timeout;
        let action: RecurringAction = Box::new(move || {
            let instances = instances.clone();
            Box::pin(async move {
                sweep(&instances, heartbeat_timeout);
            })
        });
        *handle_slot = Some(self.schedule.schedule(action));
    }

    pub async fn stop(&self) {
        let handle = self.sweep_handle.lock().await.take();
        match handle {
            Some(handle) => handle.cancel().await,
            None => warn!(
                "{}:{} not started",
                LIVENESS_TRACKER_TAG, LIVENESS_TRACKER_FN_STOP_TAG
            ),
        }
    }

    /// Records a declaration event for `instance`. Staleness is measured from
    /// arrival time on the local clock; declared timestamps from other
    /// machines are not trusted across clock domains.
    pub fn observe_change(
        &self,
        instance: &EndpointInstance,
        declaration: &HandledMessageDeclaration,
    ) {
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if declaration.active {
            instances.insert(
                instance.clone(),
                InstanceActivity {
                    active: true,
                    last_active: Instant::now(),
                },
            );
            debug!("instance {instance} active (heartbeat)");
        } else {
            instances.insert(
                instance.clone(),
                InstanceActivity {
                    active: false,
                    last_active: Instant::now(),
                },
            );
            info!("instance {instance} deactivated");
        }
    }

    /// Drops tracking for a cleanly removed instance.
    pub fn observe_removal(&self, instance: &EndpointInstance) {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(instance);
        info!("instance {instance} removed from liveness tracking");
    }

    pub fn is_active(&self, instance: &EndpointInstance) -> bool {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance)
            .map(|activity| activity.active)
            .unwrap_or(false)
    }
}

fn sweep(instances: &StdMutex<ActivityMap>, heartbeat_timeout: Duration) {
    let now = Instant::now();
    let mut instances = instances.lock().unwrap_or_else(PoisonError::into_inner);
    for (instance, activity) in instances.iter_mut() {
        if activity.active && now.duration_since(activity.last_active) > heartbeat_timeout {
            activity.active = false;
            info!("instance {instance} deactivated (heartbeat timeout)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InstanceLivenessTracker;
    use crate::declaration::{EndpointInstance, HandledMessageDeclaration};
    use crate::settings::EndpointSettings;
    use data_backplane::FixedQuerySchedule;
    use std::sync::Arc;
    use std::time::Duration;

    fn instance_and_declaration() -> (EndpointInstance, HandledMessageDeclaration) {
        let declaration = EndpointSettings::new("Orders").local_declaration();
        (EndpointInstance::from_declaration(&declaration), declaration)
    }

    fn tracker(sweep_period: Duration, heartbeat_timeout: Duration) -> InstanceLivenessTracker {
        InstanceLivenessTracker::new(
            Arc::new(FixedQuerySchedule::new(sweep_period)),
            heartbeat_timeout,
        )
    }

    #[tokio::test]
    async fn heartbeat_marks_an_instance_active() {
        let tracker = tracker(Duration::from_secs(3600), Duration::from_secs(3600));
        let (instance, declaration) = instance_and_declaration();

        assert!(!tracker.is_active(&instance));
        tracker.observe_change(&instance, &declaration);
        assert!(tracker.is_active(&instance));
    }

    #[tokio::test]
    async fn inactive_declaration_deactivates_without_removal() {
        let tracker = tracker(Duration::from_secs(3600), Duration::from_secs(3600));
        let (instance, mut declaration) = instance_and_declaration();

        tracker.observe_change(&instance, &declaration);
        declaration.active = false;
        tracker.observe_change(&instance, &declaration);

        assert!(!tracker.is_active(&instance));
    }

    #[tokio::test]
    async fn stale_heartbeat_is_swept_inactive() {
        let tracker = tracker(Duration::from_millis(10), Duration::from_millis(30));
        let (instance, declaration) = instance_and_declaration();

        tracker.observe_change(&instance, &declaration);
        tracker.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        tracker.stop().await;

        assert!(!tracker.is_active(&instance));
    }

    #[tokio::test]
    async fn fresh_heartbeats_survive_the_sweep() {
        let tracker = tracker(Duration::from_millis(10), Duration::from_secs(3600));
        let (instance, declaration) = instance_and_declaration();

        tracker.observe_change(&instance, &declaration);
        tracker.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        tracker.stop().await;

        assert!(tracker.is_active(&instance));
    }

    #[tokio::test]
    async fn removal_drops_tracking() {
        let tracker = tracker(Duration::from_secs(3600), Duration::from_secs(3600));
        let (instance, declaration) = instance_and_declaration();

        tracker.observe_change(&instance, &declaration);
        tracker.observe_removal(&instance);

        assert!(!tracker.is_active(&instance));
    }
}

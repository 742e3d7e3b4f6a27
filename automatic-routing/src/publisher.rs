//! Advertises the local endpoint's declaration and keeps it fresh.

use crate::declaration::HANDLED_MESSAGES_TYPE;
use crate::settings::EndpointSettings;
use data_backplane::{DataBackplaneClient, QuerySchedule, RecurringAction, ScheduleHandle};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PUBLISHER_TAG: &str = "DeclarationPublisher:";
const PUBLISHER_FN_STOP_TAG: &str = "stop():";

/// Publishes the local [`HandledMessageDeclaration`] on a heartbeat schedule
/// so backend freshness windows and TTLs keep the entry alive, and revokes it
/// on clean shutdown.
///
/// The payload is serialized once at construction: every heartbeat republishes
/// the identical string, so remote diff engines see a refresh rather than a
/// change.
///
/// [`HandledMessageDeclaration`]: crate::declaration::HandledMessageDeclaration
pub struct DeclarationPublisher {
    client: Arc<DataBackplaneClient>,
    schedule: Arc<dyn QuerySchedule>,
    payload: String,
    heartbeat_handle: Mutex<Option<ScheduleHandle>>,
}

impl DeclarationPublisher {
    pub fn new(
        client: Arc<DataBackplaneClient>,
        schedule: Arc<dyn QuerySchedule>,
        settings: &EndpointSettings,
    ) -> Self {
        Self {
            client,
            schedule,
            payload: settings.local_declaration().encode(),
            heartbeat_handle: Mutex::new(None),
        }
    }

    /// Begins the heartbeat. The first publish happens immediately; a failed
    /// publish is logged and retried on the next beat.
    pub async fn start(&self) {
        let mut handle_slot = self.heartbeat_handle.lock().await;
        if handle_slot.is_some() {
            return;
        }

        let client = self.client.clone();
        let payload = self.payload.clone();
        let action: RecurringAction = Box::new(move || {
            let client = client.clone();
            let payload = payload.clone();
            Box::pin(async move {
                match client.publish(HANDLED_MESSAGES_TYPE, &payload).await {
                    Ok(()) => debug!("declaration heartbeat published"),
                    Err(err) => warn!("declaration heartbeat failed, will retry: {err}"),
                }
            })
        });
        *handle_slot = Some(self.schedule.schedule(action));
        info!("declaration publisher started");
    }

    /// Stops the heartbeat, then revokes the declaration. The heartbeat is
    /// cancelled first so a beat in flight cannot resurrect the entry after
    /// the revoke.
    pub async fn stop(&self) {
        let handle = self.heartbeat_handle.lock().await.take();
        match handle {
            Some(handle) => handle.cancel().await,
            None => {
                warn!(
                    "{}:{} not started",
                    PUBLISHER_TAG, PUBLISHER_FN_STOP_TAG
                );
                return;
            }
        }
        if let Err(err) = self.client.revoke(HANDLED_MESSAGES_TYPE).await {
            warn!("declaration revoke failed: {err}");
        }
        info!("declaration publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::DeclarationPublisher;
    use crate::declaration::{HandledMessageDeclaration, HANDLED_MESSAGES_TYPE};
    use crate::settings::EndpointSettings;
    use async_trait::async_trait;
    use data_backplane::{
        BackplaneError, DataBackplane, DataBackplaneClient, Entry, FixedQuerySchedule,
    };
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryBackplane {
        published: StdMutex<Vec<(String, String)>>,
        revoked: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl DataBackplane for MemoryBackplane {
        async fn publish(&self, entry_type: &str, data: &str) -> Result<(), BackplaneError> {
            self.published
                .lock()
                .expect("lock published")
                .push((entry_type.to_string(), data.to_string()));
            Ok(())
        }

        async fn revoke(&self, entry_type: &str) -> Result<(), BackplaneError> {
            self.revoked
                .lock()
                .expect("lock revoked")
                .push(entry_type.to_string());
            Ok(())
        }

        async fn query(&self) -> Result<Vec<Entry>, BackplaneError> {
            Ok(Vec::new())
        }
    }

    fn publisher_over(
        backplane: Arc<MemoryBackplane>,
        heartbeat_period: Duration,
    ) -> DeclarationPublisher {
        let client = Arc::new(DataBackplaneClient::new(
            backplane,
            Arc::new(FixedQuerySchedule::default()),
        ));
        let settings = EndpointSettings::new("Orders").with_instance_property("machine", "host-1");
        DeclarationPublisher::new(
            client,
            Arc::new(FixedQuerySchedule::new(heartbeat_period)),
            &settings,
        )
    }

    #[tokio::test]
    async fn first_publish_happens_immediately_with_the_full_declaration() {
        let backplane = Arc::new(MemoryBackplane::default());
        let publisher = publisher_over(backplane.clone(), Duration::from_secs(3600));

        publisher.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        publisher.stop().await;

        let published = backplane.published.lock().expect("lock published").clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, HANDLED_MESSAGES_TYPE);

        let declaration =
            HandledMessageDeclaration::decode(&published[0].1).expect("valid payload");
        assert_eq!(declaration.endpoint_name, "Orders");
        assert_eq!(
            declaration.instance_properties.get("queue"),
            Some(&"Orders".to_string())
        );
        assert_eq!(
            declaration.instance_properties.get("machine"),
            Some(&"host-1".to_string())
        );
    }

    #[tokio::test]
    async fn heartbeats_republish_the_identical_payload() {
        let backplane = Arc::new(MemoryBackplane::default());
        let publisher = publisher_over(backplane.clone(), Duration::from_millis(10));

        publisher.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        publisher.stop().await;

        let published = backplane.published.lock().expect("lock published").clone();
        assert!(published.len() >= 2, "expected repeated heartbeats");
        assert!(published.iter().all(|(_, data)| *data == published[0].1));
    }

    #[tokio::test]
    async fn stop_revokes_after_the_heartbeat_is_quiesced() {
        let backplane = Arc::new(MemoryBackplane::default());
        let publisher = publisher_over(backplane.clone(), Duration::from_millis(10));

        publisher.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        publisher.stop().await;

        assert_eq!(
            backplane.revoked.lock().expect("lock revoked").clone(),
            vec![HANDLED_MESSAGES_TYPE.to_string()]
        );
        // No publish may land after the revoke.
        let published_at_stop = backplane.published.lock().expect("lock published").len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            backplane.published.lock().expect("lock published").len(),
            published_at_stop
        );
    }

    #[tokio::test]
    async fn stop_without_start_is_a_logged_no_op() {
        let backplane = Arc::new(MemoryBackplane::default());
        let publisher = publisher_over(backplane.clone(), Duration::from_secs(3600));

        publisher.stop().await;

        assert!(backplane.revoked.lock().expect("lock revoked").is_empty());
    }
}

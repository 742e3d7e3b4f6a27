//! Recurring query scheduling primitives.

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

const SCHEDULE_HANDLE_TAG: &str = "ScheduleHandle:";
const SCHEDULE_HANDLE_FN_CANCEL_TAG: &str = "cancel():";

/// Type-erased recurring action run by a [`QuerySchedule`].
pub type RecurringAction = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Drives one recurring asynchronous action at a schedule-defined cadence.
///
/// Executions are strictly sequential: execution *n+1* never starts before
/// execution *n* has completed.
pub trait QuerySchedule: Send + Sync {
    /// Starts running `action` and returns the handle controlling it. Must be
    /// called from within a tokio runtime.
    fn schedule(&self, action: RecurringAction) -> ScheduleHandle;
}

/// Cancellation handle for a scheduled recurring action.
pub struct ScheduleHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Stops the recurring action. No further execution starts after this is
    /// called, and any in-flight execution has completed by the time it
    /// returns.
    pub async fn cancel(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(
                "{}:{} scheduler task ended abnormally: {err}",
                SCHEDULE_HANDLE_TAG, SCHEDULE_HANDLE_FN_CANCEL_TAG
            );
        }
    }
}

/// Default schedule: fixed period, first execution immediate.
pub struct FixedQuerySchedule {
    period: Duration,
}

impl FixedQuerySchedule {
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(5);

    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Default for FixedQuerySchedule {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PERIOD)
    }
}

impl QuerySchedule for FixedQuerySchedule {
    fn schedule(&self, action: RecurringAction) -> ScheduleHandle {
        let (shutdown, mut shutdown_observed) = watch::channel(false);
        let period = self.period;
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticks.tick() => {}
                    _ = shutdown_observed.changed() => break,
                }
                action().await;
                // Re-check after the execution so a cancel issued while the
                // action was running stops the loop before the next tick.
                if *shutdown_observed.borrow() {
                    break;
                }
            }
        });
        ScheduleHandle { shutdown, task }
    }
}

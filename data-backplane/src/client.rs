//! Snapshot cache, diff engine, and type-filtered subscriber fan-out.

use crate::backplane::{BackplaneError, DataBackplane};
use crate::entry::{CacheKey, Entry};
use crate::schedule::{QuerySchedule, RecurringAction, ScheduleHandle};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

const CLIENT_TAG: &str = "DataBackplaneClient:";
const CLIENT_FN_START_TAG: &str = "start():";
const CLIENT_FN_STOP_TAG: &str = "stop():";
const CLIENT_FN_POLL_TAG: &str = "poll_once():";

/// Type-erased async callback invoked with the entry that changed or went
/// away.
pub type EntryCallback = Arc<dyn Fn(Entry) -> BoxFuture<'static, ()> + Send + Sync>;

struct Subscriber {
    entry_type: String,
    on_changed: EntryCallback,
    on_removed: EntryCallback,
}

impl Subscriber {
    async fn notify_changed(&self, entry: &Entry) {
        if self.entry_type == entry.entry_type {
            (self.on_changed)(entry.clone()).await;
        }
    }

    async fn notify_removed(&self, entry: &Entry) {
        if self.entry_type == entry.entry_type {
            (self.on_removed)(entry.clone()).await;
        }
    }
}

type SubscriberRegistry = Arc<StdMutex<HashMap<Uuid, Arc<Subscriber>>>>;
type SnapshotCache = Arc<StdMutex<HashMap<CacheKey, Entry>>>;

/// Handle returned from
/// [`DataBackplaneClient::get_all_and_subscribe_to_changes`]. Dropping the
/// handle does not unsubscribe; call [`BackplaneSubscription::unsubscribe`].
pub struct BackplaneSubscription {
    id: Uuid,
    registry: SubscriberRegistry,
    unsubscribed: AtomicBool,
}

impl BackplaneSubscription {
    /// Removes the subscriber from the fan-out set. Idempotent, and safe to
    /// call from inside the subscriber's own callback: a notification already
    /// in flight may still complete, but no further tick delivers to this
    /// subscriber.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Synchronization engine above a [`DataBackplane`] adapter.
///
/// Owns the last-observed snapshot of the remote registry, polls the adapter
/// on the supplied [`QuerySchedule`], diffs every query result against the
/// snapshot, and fans added-or-updated and removed events out to type-filtered
/// subscribers. Within one tick, added-or-updated notifications precede
/// removal notifications.
pub struct DataBackplaneClient {
    backplane: Arc<dyn DataBackplane>,
    schedule: Arc<dyn QuerySchedule>,
    cache: SnapshotCache,
    subscribers: SubscriberRegistry,
    poll_handle: Mutex<Option<ScheduleHandle>>,
}

impl DataBackplaneClient {
    pub fn new(backplane: Arc<dyn DataBackplane>, schedule: Arc<dyn QuerySchedule>) -> Self {
        Self {
            backplane,
            schedule,
            cache: Arc::new(StdMutex::new(HashMap::new())),
            subscribers: Arc::new(StdMutex::new(HashMap::new())),
            poll_handle: Mutex::new(None),
        }
    }

    /// Begins the poll loop. Calling `start` on an already-started client is
    /// a no-op.
    pub async fn start(&self) {
        let mut handle_slot = self.poll_handle.lock().await;
        if handle_slot.is_some() {
            warn!("{}:{} already started", CLIENT_TAG, CLIENT_FN_START_TAG);
            return;
        }

        let backplane = self.backplane.clone();
        let cache = self.cache.clone();
        let subscribers = self.subscribers.clone();
        let action: RecurringAction = Box::new(move || {
            let backplane = backplane.clone();
            let cache = cache.clone();
            let subscribers = subscribers.clone();
            Box::pin(async move {
                run_poll(backplane, cache, subscribers).await;
            })
        });
        *handle_slot = Some(self.schedule.schedule(action));
    }

    /// Cancels the poll loop, waiting for any in-flight tick (including its
    /// notifications) to complete before returning.
    pub async fn stop(&self) {
        let handle = self.poll_handle.lock().await.take();
        match handle {
            Some(handle) => handle.cancel().await,
            None => warn!("{}:{} not started", CLIENT_TAG, CLIENT_FN_STOP_TAG),
        }
    }

    /// Runs a single poll tick. `start` drives this on the configured
    /// schedule; it is exposed so callers with their own cadence (and tests)
    /// can drive the diff engine deterministically.
    pub async fn poll_once(&self) {
        run_poll(
            self.backplane.clone(),
            self.cache.clone(),
            self.subscribers.clone(),
        )
        .await;
    }

    /// Pass-through to the adapter. The local cache is deliberately not
    /// updated here: it only ever reflects what `query` reports on a tick.
    pub async fn publish(&self, entry_type: &str, data: &str) -> Result<(), BackplaneError> {
        self.backplane.publish(entry_type, data).await
    }

    /// Pass-through to the adapter.
    pub async fn revoke(&self, entry_type: &str) -> Result<(), BackplaneError> {
        self.backplane.revoke(entry_type).await
    }

    /// Registers a subscriber filtered to `entry_type`, then replays every
    /// currently cached entry of that type through `on_changed` before
    /// returning, so a late subscriber observes the full current state
    /// without waiting for the next tick.
    pub async fn get_all_and_subscribe_to_changes(
        &self,
        entry_type: &str,
        on_changed: EntryCallback,
        on_removed: EntryCallback,
    ) -> BackplaneSubscription {
        let id = Uuid::new_v4();
        let subscriber = Arc::new(Subscriber {
            entry_type: entry_type.to_string(),
            on_changed,
            on_removed,
        });
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, subscriber.clone());

        let snapshot: Vec<Entry> = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for entry in &snapshot {
            subscriber.notify_changed(entry).await;
        }

        BackplaneSubscription {
            id,
            registry: self.subscribers.clone(),
            unsubscribed: AtomicBool::new(false),
        }
    }
}

async fn run_poll(
    backplane: Arc<dyn DataBackplane>,
    cache: SnapshotCache,
    subscribers: SubscriberRegistry,
) {
    let results = match backplane.query().await {
        Ok(results) => results,
        Err(err) => {
            warn!(
                "{}:{} query failed, keeping previous snapshot: {err}",
                CLIENT_TAG, CLIENT_FN_POLL_TAG
            );
            return;
        }
    };

    // Diff and upsert under the lock, then notify without it so a subscriber
    // may unsubscribe itself (or a new subscriber register) mid fan-out.
    let (added_or_updated, removed) = {
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);

        let removed: Vec<Entry> = cache
            .values()
            .filter(|cached| {
                !results
                    .iter()
                    .any(|r| r.owner == cached.owner && r.entry_type == cached.entry_type)
            })
            .cloned()
            .collect();

        let mut added_or_updated = Vec::new();
        for entry in results {
            let key = entry.cache_key();
            let is_new_version = match cache.get(&key) {
                None => true,
                Some(old_entry) => old_entry.data != entry.data,
            };
            if is_new_version {
                cache.insert(key, entry.clone());
                added_or_updated.push(entry);
            }
        }

        for entry in &removed {
            cache.remove(&entry.cache_key());
        }

        (added_or_updated, removed)
    };

    if !added_or_updated.is_empty() || !removed.is_empty() {
        debug!(
            "{}:{} {} added-or-updated, {} removed",
            CLIENT_TAG,
            CLIENT_FN_POLL_TAG,
            added_or_updated.len(),
            removed.len()
        );
    }

    let active: Vec<Arc<Subscriber>> = subscribers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .cloned()
        .collect();

    for entry in &added_or_updated {
        for subscriber in &active {
            subscriber.notify_changed(entry).await;
        }
    }
    for entry in &removed {
        for subscriber in &active {
            subscriber.notify_removed(entry).await;
        }
    }
}

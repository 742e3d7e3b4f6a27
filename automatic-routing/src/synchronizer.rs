//! Routing synchronizer: folds declaration events into the derived maps.

use crate::declaration::{
    EndpointInstance, HandledMessageDeclaration, MessageType, HANDLED_MESSAGES_TYPE,
};
use crate::liveness::InstanceLivenessTracker;
use crate::settings::EndpointSettings;
use crate::tables::{
    InstanceTableSink, PublisherTableSink, RouteTableSink, SubscriptionControl, ROUTING_SOURCE,
};
use arc_swap::ArcSwap;
use data_backplane::{BackplaneSubscription, DataBackplaneClient, Entry, EntryCallback};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const COMPONENT: &str = "route_synchronizer";

/// One immutable snapshot of the three derived maps. Every processed event
/// builds a complete replacement snapshot; readers holding the previous
/// snapshot never observe a partially updated structure.
#[derive(Default)]
pub struct RoutingView {
    /// Message type to handling endpoint; last writer wins.
    pub routes: HashMap<MessageType, String>,
    /// Instances grouped by logical endpoint. A drained endpoint keeps an
    /// empty bucket until its last route disappears with it.
    pub instances: HashMap<String, HashSet<EndpointInstance>>,
    /// Message type to publishing endpoint; first writer wins among current
    /// publishers.
    pub publishers: HashMap<MessageType, String>,
}

/// Host-side sinks the synchronizer pushes its derived state into.
#[derive(Clone)]
pub struct RoutingSinks {
    pub route_table: Arc<dyn RouteTableSink>,
    pub publisher_table: Arc<dyn PublisherTableSink>,
    pub instance_table: Arc<dyn InstanceTableSink>,
    pub subscription_control: Arc<dyn SubscriptionControl>,
}

/// Consumes decoded declarations from the backplane client and maintains the
/// derived routing maps, with diff-based logging and auto-subscription.
pub struct RouteSynchronizer {
    settings: EndpointSettings,
    sinks: RoutingSinks,
    liveness: Option<Arc<InstanceLivenessTracker>>,
    view: ArcSwap<RoutingView>,
    // Serializes event processing; the swap itself is atomic but the
    // read-rebuild-diff sequence must not interleave.
    apply_guard: Mutex<()>,
    subscription: Mutex<Option<BackplaneSubscription>>,
}

impl RouteSynchronizer {
    pub fn new(settings: EndpointSettings, sinks: RoutingSinks) -> Self {
        Self {
            settings,
            sinks,
            liveness: None,
            view: ArcSwap::from_pointee(RoutingView::default()),
            apply_guard: Mutex::new(()),
            subscription: Mutex::new(None),
        }
    }

    /// Attaches the optional explicit-liveness tracker; declaration events
    /// are then mirrored into it.
    pub fn with_liveness_tracker(mut self, tracker: Arc<InstanceLivenessTracker>) -> Self {
        self.liveness = Some(tracker);
        self
    }

    /// Subscribes to the well-known declaration entry type. The client
    /// replays all cached declarations through this synchronizer before
    /// `start` returns.
    pub async fn start(self: &Arc<Self>, client: &DataBackplaneClient) {
        let synchronizer = self.clone();
        let on_changed: EntryCallback = Arc::new(move |entry| {
            let synchronizer = synchronizer.clone();
            Box::pin(async move {
                synchronizer.process_change(entry).await;
            })
        });
        let synchronizer = self.clone();
        let on_removed: EntryCallback = Arc::new(move |entry| {
            let synchronizer = synchronizer.clone();
            Box::pin(async move {
                synchronizer.process_removal(entry).await;
            })
        });

        let subscription = client
            .get_all_and_subscribe_to_changes(HANDLED_MESSAGES_TYPE, on_changed, on_removed)
            .await;
        *self.subscription.lock().await = Some(subscription);
    }

    pub async fn stop(&self) {
        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.unsubscribe();
        }
    }

    /// Current derived-map snapshot.
    pub fn view(&self) -> Arc<RoutingView> {
        self.view.load_full()
    }

    async fn process_change(&self, entry: Entry) {
        let declaration = match HandledMessageDeclaration::decode(&entry.data) {
            Ok(declaration) => declaration,
            Err(err) => {
                warn!(
                    component = COMPONENT,
                    owner = %entry.owner,
                    err = %err,
                    "dropping undecodable declaration"
                );
                return;
            }
        };
        let instance = EndpointInstance::from_declaration(&declaration);
        if let Some(tracker) = &self.liveness {
            tracker.observe_change(&instance, &declaration);
        }
        self.apply(
            instance,
            declaration.handled_message_types,
            declaration.published_message_types,
            false,
        )
        .await;
    }

    async fn process_removal(&self, entry: Entry) {
        let declaration = match HandledMessageDeclaration::decode(&entry.data) {
            Ok(declaration) => declaration,
            Err(err) => {
                warn!(
                    component = COMPONENT,
                    owner = %entry.owner,
                    err = %err,
                    "dropping undecodable removal declaration"
                );
                return;
            }
        };
        let instance = EndpointInstance::from_declaration(&declaration);
        if let Some(tracker) = &self.liveness {
            tracker.observe_removal(&instance);
        }
        self.apply(instance, Vec::new(), Vec::new(), true).await;
    }

    async fn apply(
        &self,
        instance: EndpointInstance,
        handled: Vec<MessageType>,
        published: Vec<MessageType>,
        removing: bool,
    ) {
        let _guard = self.apply_guard.lock().await;
        let previous = self.view.load_full();

        let instances = rebuild_instances(&previous.instances, &instance, removing);
        let endpoint_drained = removing
            && instances
                .get(&instance.endpoint)
                .map_or(true, HashSet::is_empty);
        let next = Arc::new(RoutingView {
            routes: rebuild_routes(
                &previous.routes,
                &instance.endpoint,
                &handled,
                endpoint_drained,
            ),
            publishers: rebuild_publishers(&previous.publishers, &instance.endpoint, &published),
            instances,
        });

        log_route_changes(&previous.routes, &next.routes);
        log_instance_changes(&previous.instances, &next.instances);
        log_publisher_changes(&previous.publishers, &next.publishers);

        self.subscribe_to_new_publishers(&previous.publishers, &next.publishers)
            .await;
        self.push_to_sinks(&next).await;

        self.view.store(next);
    }

    /// A message type that just gained a publisher and is handled locally
    /// needs an explicit subscription so future publications reach this
    /// endpoint.
    async fn subscribe_to_new_publishers(
        &self,
        previous: &HashMap<MessageType, String>,
        next: &HashMap<MessageType, String>,
    ) {
        for (message_type, endpoint) in next {
            if previous.contains_key(message_type) || !self.settings.handles(message_type) {
                continue;
            }
            info!(
                component = COMPONENT,
                message_type = %message_type,
                publisher = %endpoint,
                "subscribing to newly discovered publisher"
            );
            if let Err(err) = self.sinks.subscription_control.subscribe(message_type).await {
                warn!(
                    component = COMPONENT,
                    message_type = %message_type,
                    err = %err,
                    "subscribe action failed"
                );
            }
        }
    }

    async fn push_to_sinks(&self, view: &RoutingView) {
        let routes: Vec<(MessageType, String)> = view
            .routes
            .iter()
            .map(|(message_type, endpoint)| (message_type.clone(), endpoint.clone()))
            .collect();
        if let Err(err) = self
            .sinks
            .route_table
            .replace_routes(ROUTING_SOURCE, routes)
            .await
        {
            warn!(component = COMPONENT, err = %err, "route table sink failed");
        }

        let publishers: Vec<(MessageType, String)> = view
            .publishers
            .iter()
            .map(|(message_type, endpoint)| (message_type.clone(), endpoint.clone()))
            .collect();
        if let Err(err) = self
            .sinks
            .publisher_table
            .replace_publishers(ROUTING_SOURCE, publishers)
            .await
        {
            warn!(component = COMPONENT, err = %err, "publisher table sink failed");
        }

        let instances: Vec<EndpointInstance> =
            view.instances.values().flatten().cloned().collect();
        if let Err(err) = self
            .sinks
            .instance_table
            .replace_instances(ROUTING_SOURCE, instances)
            .await
        {
            warn!(component = COMPONENT, err = %err, "instance table sink failed");
        }
    }
}

/// Strips `instance` from every bucket, then, unless this is a removal, adds
/// it back under its own endpoint's bucket.
fn rebuild_instances(
    instance_map: &HashMap<String, HashSet<EndpointInstance>>,
    instance: &EndpointInstance,
    removing: bool,
) -> HashMap<String, HashSet<EndpointInstance>> {
    let mut new_instance_map: HashMap<String, HashSet<EndpointInstance>> = instance_map
        .iter()
        .map(|(endpoint, instances)| {
            (
                endpoint.clone(),
                instances
                    .iter()
                    .filter(|existing| *existing != instance)
                    .cloned()
                    .collect(),
            )
        })
        .collect();
    if !removing {
        new_instance_map
            .entry(instance.endpoint.clone())
            .or_default()
            .insert(instance.clone());
    }
    new_instance_map
}

/// Last write wins: every handled type routes to this event's endpoint. When
/// a removal drains the endpoint's last instance, the routes it owned go
/// with it.
fn rebuild_routes(
    route_map: &HashMap<MessageType, String>,
    endpoint_name: &str,
    handled: &[MessageType],
    endpoint_drained: bool,
) -> HashMap<MessageType, String> {
    let mut new_route_map: HashMap<MessageType, String> = route_map
        .iter()
        .filter(|(_, endpoint)| !(endpoint_drained && endpoint.as_str() == endpoint_name))
        .map(|(message_type, endpoint)| (message_type.clone(), endpoint.clone()))
        .collect();
    for message_type in handled {
        new_route_map.insert(message_type.clone(), endpoint_name.to_string());
    }
    new_route_map
}

/// Drops every publisher slot currently attributed to this endpoint, then
/// re-adds, for each published type not already claimed by a still-present
/// endpoint, this endpoint as publisher. First writer wins; changing
/// publisher requires the old owner's entry to disappear first.
fn rebuild_publishers(
    publisher_map: &HashMap<MessageType, String>,
    endpoint_name: &str,
    published: &[MessageType],
) -> HashMap<MessageType, String> {
    let mut new_publisher_map: HashMap<MessageType, String> = publisher_map
        .iter()
        .filter(|(_, endpoint)| endpoint.as_str() != endpoint_name)
        .map(|(message_type, endpoint)| (message_type.clone(), endpoint.clone()))
        .collect();
    for message_type in published {
        new_publisher_map
            .entry(message_type.clone())
            .or_insert_with(|| endpoint_name.to_string());
    }
    new_publisher_map
}

fn log_route_changes(
    route_map: &HashMap<MessageType, String>,
    new_route_map: &HashMap<MessageType, String>,
) {
    for (message_type, endpoint) in new_route_map {
        match route_map.get(message_type) {
            None => info!(
                component = COMPONENT,
                message_type = %message_type,
                endpoint = %endpoint,
                "added route"
            ),
            Some(previous_endpoint) if previous_endpoint != endpoint => info!(
                component = COMPONENT,
                message_type = %message_type,
                previous_endpoint = %previous_endpoint,
                endpoint = %endpoint,
                "changed route"
            ),
            Some(_) => {}
        }
    }
    for (message_type, endpoint) in route_map {
        if !new_route_map.contains_key(message_type) {
            info!(
                component = COMPONENT,
                message_type = %message_type,
                endpoint = %endpoint,
                "removed route"
            );
        }
    }
}

fn log_instance_changes(
    instance_map: &HashMap<String, HashSet<EndpointInstance>>,
    new_instance_map: &HashMap<String, HashSet<EndpointInstance>>,
) {
    for (endpoint, instances) in new_instance_map {
        match instance_map.get(endpoint) {
            None => info!(
                component = COMPONENT,
                endpoint = %endpoint,
                instances = %format_instances(instances),
                "added endpoint"
            ),
            Some(previous_instances) => {
                for added in instances.difference(previous_instances) {
                    info!(
                        component = COMPONENT,
                        endpoint = %endpoint,
                        instance = %added,
                        "added instance"
                    );
                }
                for removed in previous_instances.difference(instances) {
                    info!(
                        component = COMPONENT,
                        endpoint = %endpoint,
                        instance = %removed,
                        "removed instance"
                    );
                }
            }
        }
    }
    for (endpoint, instances) in instance_map {
        if !new_instance_map.contains_key(endpoint) {
            info!(
                component = COMPONENT,
                endpoint = %endpoint,
                instances = %format_instances(instances),
                "removed endpoint"
            );
        }
    }
}

fn log_publisher_changes(
    publisher_map: &HashMap<MessageType, String>,
    new_publisher_map: &HashMap<MessageType, String>,
) {
    for (message_type, endpoint) in new_publisher_map {
        if !publisher_map.contains_key(message_type) {
            info!(
                component = COMPONENT,
                message_type = %message_type,
                endpoint = %endpoint,
                "added publisher"
            );
        }
    }
    for (message_type, endpoint) in publisher_map {
        if !new_publisher_map.contains_key(message_type) {
            info!(
                component = COMPONENT,
                message_type = %message_type,
                endpoint = %endpoint,
                "removed publisher"
            );
        }
    }
}

fn format_instances(instances: &HashSet<EndpointInstance>) -> String {
    instances
        .iter()
        .map(|instance| format!("[{instance}]"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::{RouteSynchronizer, RoutingSinks};
    use crate::declaration::{
        EndpointInstance, HandledMessageDeclaration, MessageType, HANDLED_MESSAGES_TYPE,
    };
    use crate::error::RoutingError;
    use crate::settings::EndpointSettings;
    use crate::tables::{
        InstanceTableSink, PublisherTableSink, RouteTableSink, SubscriptionControl,
        ROUTING_SOURCE,
    };
    use async_trait::async_trait;
    use data_backplane::Entry;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::{Arc, Mutex as StdMutex};

    /// Records every replace-by-source push and subscribe action.
    #[derive(Default)]
    struct RecordingHost {
        route_pushes: StdMutex<Vec<(String, Vec<(MessageType, String)>)>>,
        publisher_pushes: StdMutex<Vec<(String, Vec<(MessageType, String)>)>>,
        instance_pushes: StdMutex<Vec<(String, Vec<EndpointInstance>)>>,
        subscribed: StdMutex<Vec<MessageType>>,
    }

    #[async_trait]
    impl RouteTableSink for RecordingHost {
        async fn replace_routes(
            &self,
            source: &str,
            routes: Vec<(MessageType, String)>,
        ) -> Result<(), RoutingError> {
            self.route_pushes
                .lock()
                .expect("lock route_pushes")
                .push((source.to_string(), routes));
            Ok(())
        }
    }

    #[async_trait]
    impl PublisherTableSink for RecordingHost {
        async fn replace_publishers(
            &self,
            source: &str,
            publishers: Vec<(MessageType, String)>,
        ) -> Result<(), RoutingError> {
            self.publisher_pushes
                .lock()
                .expect("lock publisher_pushes")
                .push((source.to_string(), publishers));
            Ok(())
        }
    }

    #[async_trait]
    impl InstanceTableSink for RecordingHost {
        async fn replace_instances(
            &self,
            source: &str,
            instances: Vec<EndpointInstance>,
        ) -> Result<(), RoutingError> {
            self.instance_pushes
                .lock()
                .expect("lock instance_pushes")
                .push((source.to_string(), instances));
            Ok(())
        }
    }

    #[async_trait]
    impl SubscriptionControl for RecordingHost {
        async fn subscribe(&self, message_type: &MessageType) -> Result<(), RoutingError> {
            self.subscribed
                .lock()
                .expect("lock subscribed")
                .push(message_type.clone());
            Ok(())
        }
    }

    fn synchronizer_for(
        settings: EndpointSettings,
    ) -> (Arc<RouteSynchronizer>, Arc<RecordingHost>) {
        let host = Arc::new(RecordingHost::default());
        let sinks = RoutingSinks {
            route_table: host.clone(),
            publisher_table: host.clone(),
            instance_table: host.clone(),
            subscription_control: host.clone(),
        };
        (Arc::new(RouteSynchronizer::new(settings, sinks)), host)
    }

    fn declaration(
        endpoint: &str,
        handled: &[&str],
        published: &[&str],
    ) -> HandledMessageDeclaration {
        let mut instance_properties = BTreeMap::new();
        instance_properties.insert("queue".to_string(), endpoint.to_string());
        HandledMessageDeclaration {
            endpoint_name: endpoint.to_string(),
            discriminator: Some(String::new()),
            instance_properties,
            handled_message_types: handled.iter().map(|t| MessageType::new(*t)).collect(),
            published_message_types: published.iter().map(|t| MessageType::new(*t)).collect(),
            active: true,
        }
    }

    fn entry_for(owner: &str, declaration: &HandledMessageDeclaration) -> Entry {
        Entry::new(owner, HANDLED_MESSAGES_TYPE, declaration.encode())
    }

    #[tokio::test]
    async fn single_declaration_builds_route_and_instance_entries() {
        let (synchronizer, _host) = synchronizer_for(EndpointSettings::new("local"));
        let orders = declaration("Orders", &["Cmd"], &[]);

        synchronizer
            .process_change(entry_for("instance-orders", &orders))
            .await;

        let view = synchronizer.view();
        assert_eq!(
            view.routes.get(&MessageType::new("Cmd")),
            Some(&"Orders".to_string())
        );
        let expected_instance = EndpointInstance::from_declaration(&orders);
        assert_eq!(
            view.instances.get("Orders"),
            Some(&HashSet::from([expected_instance]))
        );
    }

    #[tokio::test]
    async fn removal_drains_the_instance_and_its_routes() {
        let (synchronizer, _host) = synchronizer_for(EndpointSettings::new("local"));
        let orders = declaration("Orders", &["Cmd"], &[]);

        synchronizer
            .process_change(entry_for("instance-orders", &orders))
            .await;
        synchronizer
            .process_removal(entry_for("instance-orders", &orders))
            .await;

        let view = synchronizer.view();
        assert!(!view.routes.contains_key(&MessageType::new("Cmd")));
        assert_eq!(view.instances.get("Orders"), Some(&HashSet::new()));
    }

    #[tokio::test]
    async fn route_goes_to_the_most_recently_processed_endpoint() {
        let (synchronizer, _host) = synchronizer_for(EndpointSettings::new("local"));

        synchronizer
            .process_change(entry_for(
                "instance-orders",
                &declaration("Orders", &["Cmd"], &[]),
            ))
            .await;
        synchronizer
            .process_change(entry_for(
                "instance-billing",
                &declaration("Billing", &["Cmd"], &[]),
            ))
            .await;

        assert_eq!(
            synchronizer.view().routes.get(&MessageType::new("Cmd")),
            Some(&"Billing".to_string())
        );
    }

    #[tokio::test]
    async fn removal_of_one_instance_keeps_routes_of_a_still_live_sibling() {
        let (synchronizer, _host) = synchronizer_for(EndpointSettings::new("local"));
        let first = declaration("Orders", &["Cmd"], &[]);
        let mut second = declaration("Orders", &["Cmd"], &[]);
        second
            .instance_properties
            .insert("queue".to_string(), "Orders-2".to_string());

        synchronizer
            .process_change(entry_for("instance-1", &first))
            .await;
        synchronizer
            .process_change(entry_for("instance-2", &second))
            .await;
        synchronizer
            .process_removal(entry_for("instance-1", &first))
            .await;

        let view = synchronizer.view();
        assert_eq!(
            view.routes.get(&MessageType::new("Cmd")),
            Some(&"Orders".to_string())
        );
        assert_eq!(
            view.instances.get("Orders").map(HashSet::len),
            Some(1)
        );
    }

    #[tokio::test]
    async fn first_publisher_wins_until_its_entry_disappears() {
        let (synchronizer, _host) = synchronizer_for(EndpointSettings::new("local"));
        let event_type = MessageType::new("Evt");
        let first = declaration("Orders", &[], &["Evt"]);
        let second = declaration("Billing", &[], &["Evt"]);

        synchronizer
            .process_change(entry_for("instance-orders", &first))
            .await;
        synchronizer
            .process_change(entry_for("instance-billing", &second))
            .await;
        assert_eq!(
            synchronizer.view().publishers.get(&event_type),
            Some(&"Orders".to_string())
        );

        // Only after the first publisher's entry goes away can the second
        // claim the type, on its next processed declaration.
        synchronizer
            .process_removal(entry_for("instance-orders", &first))
            .await;
        assert!(!synchronizer.view().publishers.contains_key(&event_type));
        synchronizer
            .process_change(entry_for("instance-billing", &second))
            .await;
        assert_eq!(
            synchronizer.view().publishers.get(&event_type),
            Some(&"Billing".to_string())
        );
    }

    #[tokio::test]
    async fn no_instance_ever_appears_in_two_buckets() {
        let (synchronizer, _host) = synchronizer_for(EndpointSettings::new("local"));

        synchronizer
            .process_change(entry_for(
                "instance-orders",
                &declaration("Orders", &["Cmd"], &[]),
            ))
            .await;
        synchronizer
            .process_change(entry_for(
                "instance-billing",
                &declaration("Billing", &["Inv"], &[]),
            ))
            .await;
        // Re-process the same declarations (heartbeats with changed payloads
        // land here too).
        synchronizer
            .process_change(entry_for(
                "instance-orders",
                &declaration("Orders", &["Cmd", "Cmd2"], &[]),
            ))
            .await;

        let view = synchronizer.view();
        let mut seen = HashSet::new();
        for instances in view.instances.values() {
            for instance in instances {
                assert!(seen.insert(instance.clone()), "instance in two buckets");
            }
        }
    }

    #[tokio::test]
    async fn malformed_declaration_is_dropped_and_view_unchanged() {
        let (synchronizer, _host) = synchronizer_for(EndpointSettings::new("local"));

        synchronizer
            .process_change(entry_for(
                "instance-orders",
                &declaration("Orders", &["Cmd"], &[]),
            ))
            .await;
        synchronizer
            .process_change(Entry::new(
                "instance-broken",
                HANDLED_MESSAGES_TYPE,
                "not json",
            ))
            .await;

        let view = synchronizer.view();
        assert_eq!(view.routes.len(), 1);
        assert_eq!(view.instances.len(), 1);
    }

    #[tokio::test]
    async fn newly_discovered_publisher_of_a_locally_handled_type_triggers_subscribe() {
        let settings =
            EndpointSettings::new("local").handling([MessageType::new("Evt")]);
        let (synchronizer, host) = synchronizer_for(settings);
        let publisher = declaration("Orders", &[], &["Evt", "OtherEvt"]);

        synchronizer
            .process_change(entry_for("instance-orders", &publisher))
            .await;
        // An unchanged publisher set on a later event must not re-subscribe.
        synchronizer
            .process_change(entry_for("instance-orders", &publisher))
            .await;

        assert_eq!(
            host.subscribed.lock().expect("lock subscribed").clone(),
            vec![MessageType::new("Evt")]
        );
    }

    #[tokio::test]
    async fn sinks_receive_full_replacement_state_under_the_routing_source() {
        let (synchronizer, host) = synchronizer_for(EndpointSettings::new("local"));
        let orders = declaration("Orders", &["Cmd"], &["Evt"]);

        synchronizer
            .process_change(entry_for("instance-orders", &orders))
            .await;

        let route_pushes = host.route_pushes.lock().expect("lock route_pushes").clone();
        assert_eq!(route_pushes.len(), 1);
        assert_eq!(route_pushes[0].0, ROUTING_SOURCE);
        assert_eq!(
            route_pushes[0].1,
            vec![(MessageType::new("Cmd"), "Orders".to_string())]
        );

        let publisher_pushes = host
            .publisher_pushes
            .lock()
            .expect("lock publisher_pushes")
            .clone();
        assert_eq!(
            publisher_pushes[0].1,
            vec![(MessageType::new("Evt"), "Orders".to_string())]
        );

        let instance_pushes = host
            .instance_pushes
            .lock()
            .expect("lock instance_pushes")
            .clone();
        assert_eq!(
            instance_pushes[0].1,
            vec![EndpointInstance::from_declaration(&orders)]
        );
    }
}

//! Capability contracts consumed from the hosting message-bus runtime.

use crate::declaration::{EndpointInstance, MessageType};
use crate::error::RoutingError;
use async_trait::async_trait;

/// Source key under which this subsystem contributes table entries. Hosts
/// with replace-by-source tables keep entries from other sources (static
/// configuration, hand-written routes) untouched.
pub const ROUTING_SOURCE: &str = "AutomaticRouting";

/// Message-type to endpoint routing table sink.
#[async_trait]
pub trait RouteTableSink: Send + Sync {
    /// Replaces all routes previously contributed under `source`.
    async fn replace_routes(
        &self,
        source: &str,
        routes: Vec<(MessageType, String)>,
    ) -> Result<(), RoutingError>;
}

/// Message-type to publishing-endpoint table sink.
#[async_trait]
pub trait PublisherTableSink: Send + Sync {
    /// Replaces all publishers previously contributed under `source`.
    async fn replace_publishers(
        &self,
        source: &str,
        publishers: Vec<(MessageType, String)>,
    ) -> Result<(), RoutingError>;
}

/// Known-endpoint-instance table sink.
#[async_trait]
pub trait InstanceTableSink: Send + Sync {
    /// Replaces all instances previously contributed under `source`.
    async fn replace_instances(
        &self,
        source: &str,
        instances: Vec<EndpointInstance>,
    ) -> Result<(), RoutingError>;
}

/// Subscribe action of the local endpoint, invoked when a publisher is
/// discovered for a message type the local endpoint handles.
#[async_trait]
pub trait SubscriptionControl: Send + Sync {
    async fn subscribe(&self, message_type: &MessageType) -> Result<(), RoutingError>;
}

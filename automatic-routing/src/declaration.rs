//! Handled-message declarations and the identities derived from them.

use crate::error::RoutingError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Well-known backplane entry type under which declarations travel.
pub const HANDLED_MESSAGES_TYPE: &str = "HandledMessages";

/// Opaque, explicitly-registered message type identifier (namespace + name).
///
/// The hosting process supplies the identifiers it knows about at startup;
/// nothing here resolves them against live types.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageType {
    fn from(identifier: &str) -> Self {
        Self::new(identifier)
    }
}

/// The payload an instance advertises under [`HANDLED_MESSAGES_TYPE`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandledMessageDeclaration {
    pub endpoint_name: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub instance_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub handled_message_types: Vec<MessageType>,
    #[serde(default)]
    pub published_message_types: Vec<MessageType>,
    /// Producers running the explicit-liveness variant flip this to `false`
    /// on clean shutdown; the default keeps declarations from producers that
    /// rely purely on backend TTLs valid.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl HandledMessageDeclaration {
    pub fn decode(data: &str) -> Result<Self, RoutingError> {
        serde_json::from_str(data).map_err(|err| RoutingError::MalformedDeclaration(err.to_string()))
    }

    pub fn encode(&self) -> String {
        // Serialization of a map of strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Identity of one running endpoint instance: the unit of liveness and of
/// instance-set membership. Two instances are equal iff endpoint name,
/// discriminator, and all instance properties match.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EndpointInstance {
    pub endpoint: String,
    pub discriminator: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl EndpointInstance {
    pub fn from_declaration(declaration: &HandledMessageDeclaration) -> Self {
        Self {
            endpoint: declaration.endpoint_name.clone(),
            discriminator: declaration.discriminator.clone(),
            properties: declaration.instance_properties.clone(),
        }
    }

    /// Transport address advertised by the instance.
    pub fn queue(&self) -> Option<&str> {
        self.properties.get("queue").map(String::as_str)
    }
}

impl Display for EndpointInstance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint)?;
        if let Some(discriminator) = &self.discriminator {
            write!(f, "-{discriminator}")?;
        }
        if let Some(queue) = self.queue() {
            write!(f, " (queue: {queue})")?;
        }
        Ok(())
    }
}

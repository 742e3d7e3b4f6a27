//! Local-endpoint configuration supplied by the host at startup.

use crate::declaration::{HandledMessageDeclaration, MessageType};
use std::collections::BTreeMap;

/// What the hosting process knows about itself: its logical endpoint name,
/// its instance identity, and the message types it handles and publishes.
#[derive(Clone, Debug)]
pub struct EndpointSettings {
    pub endpoint_name: String,
    pub discriminator: Option<String>,
    pub instance_properties: BTreeMap<String, String>,
    pub handled_message_types: Vec<MessageType>,
    pub published_message_types: Vec<MessageType>,
}

impl EndpointSettings {
    pub fn new(endpoint_name: impl Into<String>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            discriminator: None,
            instance_properties: BTreeMap::new(),
            handled_message_types: Vec::new(),
            published_message_types: Vec::new(),
        }
    }

    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    pub fn with_instance_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.instance_properties.insert(key.into(), value.into());
        self
    }

    pub fn handling(mut self, message_types: impl IntoIterator<Item = MessageType>) -> Self {
        self.handled_message_types.extend(message_types);
        self
    }

    pub fn publishing(mut self, message_types: impl IntoIterator<Item = MessageType>) -> Self {
        self.published_message_types.extend(message_types);
        self
    }

    pub fn handles(&self, message_type: &MessageType) -> bool {
        self.handled_message_types.contains(message_type)
    }

    /// Builds the declaration this instance advertises. The mandatory
    /// `"queue"` instance property defaults to the endpoint name when the
    /// host has not set an explicit transport address.
    pub fn local_declaration(&self) -> HandledMessageDeclaration {
        let mut instance_properties = self.instance_properties.clone();
        instance_properties
            .entry("queue".to_string())
            .or_insert_with(|| self.endpoint_name.clone());

        HandledMessageDeclaration {
            endpoint_name: self.endpoint_name.clone(),
            discriminator: self.discriminator.clone(),
            instance_properties,
            handled_message_types: self.handled_message_types.clone(),
            published_message_types: self.published_message_types.clone(),
            active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EndpointSettings;
    use crate::declaration::MessageType;

    #[test]
    fn local_declaration_defaults_the_queue_property() {
        let declaration = EndpointSettings::new("Orders").local_declaration();

        assert_eq!(
            declaration.instance_properties.get("queue"),
            Some(&"Orders".to_string())
        );
        assert!(declaration.active);
    }

    #[test]
    fn explicit_queue_property_is_preserved() {
        let declaration = EndpointSettings::new("Orders")
            .with_instance_property("queue", "orders-main")
            .with_instance_property("machine", "host-1")
            .handling([MessageType::new("Sales.PlaceOrder")])
            .local_declaration();

        assert_eq!(
            declaration.instance_properties.get("queue"),
            Some(&"orders-main".to_string())
        );
        assert_eq!(
            declaration.handled_message_types,
            vec![MessageType::new("Sales.PlaceOrder")]
        );
    }
}

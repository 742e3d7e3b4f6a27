//! Consul agent/health API payloads and the mapping back to entries.

use data_backplane::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

const WIRE_TAG: &str = "ConsulWire:";

pub(crate) const CHECK_STATUS_PASSING: &str = "passing";

#[derive(Serialize)]
pub(crate) struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Check")]
    pub check: AgentServiceCheck,
}

#[derive(Serialize)]
pub(crate) struct AgentServiceCheck {
    #[serde(rename = "TTL")]
    pub ttl: String,
    #[serde(rename = "DeregisterCriticalServiceAfter")]
    pub deregister_critical_service_after: String,
    #[serde(rename = "Status")]
    pub status: String,
}

#[derive(Deserialize)]
pub(crate) struct HealthServiceNode {
    #[serde(rename = "Service")]
    pub service: AgentService,
    #[serde(rename = "Checks", default)]
    pub checks: Vec<HealthCheck>,
}

#[derive(Deserialize)]
pub(crate) struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize)]
pub(crate) struct HealthCheck {
    #[serde(rename = "Status")]
    pub status: String,
}

/// Maps health-service results back to entries: only services whose checks
/// are all passing count as live, the service id carries `owner:type`, the
/// single tag carries the payload, and the caller's own entries are dropped.
/// Malformed registrations (no `:` in the id, no tags) are skipped.
pub(crate) fn entries_from_health(nodes: Vec<HealthServiceNode>, own_owner: &str) -> Vec<Entry> {
    let mut entries = Vec::new();
    for node in nodes {
        if !node
            .checks
            .iter()
            .all(|check| check.status == CHECK_STATUS_PASSING)
        {
            continue;
        }
        let Some((owner, entry_type)) = node.service.id.split_once(':') else {
            debug!(
                "{WIRE_TAG} skipping service with malformed id: {}",
                node.service.id
            );
            continue;
        };
        let Some(data) = node.service.tags.first() else {
            debug!(
                "{WIRE_TAG} skipping tagless service: {}",
                node.service.id
            );
            continue;
        };
        if owner == own_owner {
            continue;
        }
        entries.push(Entry::new(owner, entry_type, data.clone()));
    }
    entries
}

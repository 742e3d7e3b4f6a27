/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! # backplane-consul
//!
//! Consul-based [`DataBackplane`] adapter over the local agent's HTTP API.
//!
//! Every `(owner, type)` pair is one Consul service registration under the
//! shared service name `NServiceBus.Dataplane`, with id `owner:type` and the
//! payload carried as the registration's single tag. Liveness is a TTL health
//! check: `publish` first attempts a lightweight check-in against an existing
//! check and only falls back to a full re-registration when the check-in
//! fails (unknown check, restarted agent). `query` reads the health endpoint
//! and keeps only services whose checks are all passing, excluding the
//! caller's own owner id.

mod wire;

use async_trait::async_trait;
use data_backplane::{BackplaneError, DataBackplane, Entry};
use std::time::Duration;
use tracing::debug;
use wire::{entries_from_health, AgentServiceCheck, AgentServiceRegistration, HealthServiceNode};

const CONSUL_BACKPLANE_TAG: &str = "ConsulBackplane:";
const CONSUL_BACKPLANE_FN_PUBLISH_TAG: &str = "publish():";

/// Shared Consul service name for all backplane registrations.
pub const SERVICE_NAME: &str = "NServiceBus.Dataplane";

const DEFAULT_AGENT_ADDRESS: &str = "http://127.0.0.1:8500";
const CHECK_TTL: &str = "10s";
const DEREGISTER_CRITICAL_AFTER: &str = "60s";
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConsulBackplane {
    owner: String,
    agent_address: String,
    http: reqwest::Client,
}

impl ConsulBackplane {
    /// Connects to the agent on localhost:8500.
    pub fn new(owner: impl Into<String>) -> Result<Self, BackplaneError> {
        Self::with_agent_address(owner, DEFAULT_AGENT_ADDRESS)
    }

    pub fn with_agent_address(
        owner: impl Into<String>,
        agent_address: impl Into<String>,
    ) -> Result<Self, BackplaneError> {
        let agent_address = agent_address.into();
        // The timeout is load-bearing: without it a wedged agent hangs every
        // query, so a client that cannot be built with it is a hard error.
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| {
                BackplaneError::BackendUnavailable(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self {
            owner: owner.into(),
            agent_address: agent_address.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn service_id(&self, entry_type: &str) -> String {
        format!("{}:{}", self.owner, entry_type)
    }

    fn agent_url(&self, path: &str) -> String {
        format!("{}{path}", self.agent_address)
    }

    async fn check_in(&self, service_id: &str) -> Result<(), BackplaneError> {
        let url = self.agent_url(&format!("/v1/agent/check/pass/service:{service_id}"));
        self.http
            .put(url)
            .send()
            .await
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))?
            .error_for_status()
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))?;
        Ok(())
    }

    async fn register_service(&self, service_id: &str, data: &str) -> Result<(), BackplaneError> {
        let registration = AgentServiceRegistration {
            id: service_id.to_string(),
            name: SERVICE_NAME.to_string(),
            tags: vec![data.to_string()],
            check: AgentServiceCheck {
                ttl: CHECK_TTL.to_string(),
                deregister_critical_service_after: DEREGISTER_CRITICAL_AFTER.to_string(),
                status: wire::CHECK_STATUS_PASSING.to_string(),
            },
        };
        self.http
            .put(self.agent_url("/v1/agent/service/register"))
            .json(&registration)
            .send()
            .await
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))?
            .error_for_status()
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DataBackplane for ConsulBackplane {
    async fn publish(&self, entry_type: &str, data: &str) -> Result<(), BackplaneError> {
        let service_id = self.service_id(entry_type);
        match self.check_in(&service_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // No TTL check to pass yet (first publish, or the agent lost
                // the registration), so register the service from scratch.
                debug!(
                    "{}:{} check-in for {service_id} failed ({err}), registering service",
                    CONSUL_BACKPLANE_TAG, CONSUL_BACKPLANE_FN_PUBLISH_TAG
                );
                self.register_service(&service_id, data).await
            }
        }
    }

    async fn revoke(&self, entry_type: &str) -> Result<(), BackplaneError> {
        let url = self.agent_url(&format!(
            "/v1/agent/service/deregister/{}",
            self.service_id(entry_type)
        ));
        let response = self
            .http
            .put(url)
            .send()
            .await
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))?;
        // Deregistering a service the agent does not know is not an error.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))?;
        Ok(())
    }

    async fn query(&self) -> Result<Vec<Entry>, BackplaneError> {
        let url = self.agent_url(&format!("/v1/health/service/{SERVICE_NAME}"));
        let nodes: Vec<HealthServiceNode> = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))?
            .error_for_status()
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))?
            .json()
            .await
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))?;

        Ok(entries_from_health(nodes, &self.owner))
    }
}

#[cfg(test)]
mod tests {
    use super::ConsulBackplane;

    #[test]
    fn construction_builds_a_client_with_its_timeout() {
        assert!(ConsulBackplane::new("instance-a").is_ok());
    }

    #[test]
    fn service_id_concatenates_owner_and_type() {
        let backplane = ConsulBackplane::new("instance-a").expect("build backplane");

        assert_eq!(
            backplane.service_id("HandledMessages"),
            "instance-a:HandledMessages"
        );
    }

    #[test]
    fn agent_address_trailing_slash_is_normalized() {
        let backplane = ConsulBackplane::with_agent_address("instance-a", "http://consul:8500/")
            .expect("build backplane");

        assert_eq!(
            backplane.agent_url("/v1/agent/service/register"),
            "http://consul:8500/v1/agent/service/register"
        );
    }
}

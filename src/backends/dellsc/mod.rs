//! Dell Storage Center Adapter
//!
//! Drives a Storage Center through the Dell Storage Manager Data Collector
//! REST API.

pub mod api;
pub mod client;
pub mod driver;
mod mapping;
pub mod models;
mod replay;
mod replication;

#[cfg(test)]
pub(crate) mod fake;

pub use api::ScApi;
pub use client::{HttpClient, HttpClientConfig, RestResponse, RestTransport};
pub use driver::StorageCenterDriver;
pub use models::ReplicationType;

use crate::error::{Error, Result};
use crate::jobs::PollConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// One replication target array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationTarget {
    /// Serial number of the destination Storage Center
    pub ssn: u64,
    /// QoS node name, created on each array if missing
    #[serde(default = "default_qos_node")]
    pub qos_node: String,
    #[serde(default)]
    pub replication_type: ReplicationType,
    /// Synchronous only: prefer high availability over consistency
    #[serde(default)]
    pub auto_failover: bool,
    #[serde(default)]
    pub replicate_active: bool,
}

fn default_qos_node() -> String {
    "cinderqos".to_string()
}

/// Configuration for the Storage Center adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScConfig {
    /// Data Collector address
    pub san_ip: String,
    pub san_port: u16,
    pub username: String,
    pub password: String,
    pub verify_cert: bool,
    pub api_version: String,
    /// Serial number of the managed Storage Center
    pub ssn: u64,
    /// Folder path for volumes, created on demand
    pub volume_folder: String,
    /// Folder path for servers, created on demand
    pub server_folder: String,
    pub server_os: String,
    /// Notes stamped on every object the adapter creates
    pub notes: String,
    pub replication_targets: Vec<ReplicationTarget>,
    pub request_timeout_secs: u64,
    pub async_task_poll: PollConfig,
    pub cmm_poll: PollConfig,
}

impl Default for ScConfig {
    fn default() -> Self {
        Self {
            san_ip: String::new(),
            san_port: 3033,
            username: "Admin".to_string(),
            password: String::new(),
            verify_cert: false,
            api_version: "2.0".to_string(),
            ssn: 64702,
            volume_folder: "openstack".to_string(),
            server_folder: "openstack".to_string(),
            server_os: "Red Hat Linux 6.x".to_string(),
            notes: "Created by array-volume-adapters".to_string(),
            replication_targets: Vec::new(),
            request_timeout_secs: 60,
            async_task_poll: PollConfig::async_task_default(),
            cmm_poll: PollConfig::cmm_default(),
        }
    }
}

impl ScConfig {
    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.san_ip.is_empty() {
            return Err(Error::Configuration("dellsc: san_ip is required".into()));
        }
        if self.password.is_empty() {
            return Err(Error::Configuration("dellsc: password is required".into()));
        }
        if self.replication_targets.iter().any(|t| t.ssn == self.ssn) {
            return Err(Error::Configuration(
                "dellsc: a replication target cannot be the managed array".into(),
            ));
        }
        if self.cmm_poll.max_retries == 0 || self.async_task_poll.max_retries == 0 {
            return Err(Error::Configuration("dellsc: poll budgets must be non-zero".into()));
        }
        Ok(())
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            base_url: format!("https://{}:{}", self.san_ip, self.san_port),
            username: self.username.clone(),
            password: self.password.clone(),
            verify_cert: self.verify_cert,
            api_version: self.api_version.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            async_task_poll: self.async_task_poll,
        }
    }
}

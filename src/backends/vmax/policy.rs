//! Provisioning policy and masking object naming

use super::smis::ServiceLevel;
use crate::domain::Protocol;
use serde::{Deserialize, Serialize};

const NO_SLO: &str = "No_SLO";
const NO_WORKLOAD: &str = "NONE";

/// How the array places volumes that are not masked to a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum ProvisioningPolicy {
    /// FAST-managed array; `fast_policy` of `None` means no tiering
    V2 {
        pool: String,
        fast_policy: Option<String>,
    },
    /// SLO-managed array
    V3 {
        srp: String,
        slo: Option<String>,
        workload: Option<String>,
    },
}

/// Names of the objects that mask one volume to one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskingNames {
    pub storage_group: String,
    pub masking_view: String,
    pub initiator_group: String,
    pub port_group: String,
}

impl ProvisioningPolicy {
    /// FAST policy name, V2 only
    pub fn fast_policy(&self) -> Option<&str> {
        match self {
            ProvisioningPolicy::V2 { fast_policy, .. } => fast_policy.as_deref(),
            ProvisioningPolicy::V3 { .. } => None,
        }
    }

    pub fn service_level(&self) -> Option<ServiceLevel> {
        match self {
            ProvisioningPolicy::V2 { .. } => None,
            ProvisioningPolicy::V3 { srp, slo, workload } => Some(ServiceLevel {
                srp: srp.clone(),
                slo: slo.clone(),
                workload: workload.clone(),
            }),
        }
    }

    /// Group an unmasked volume lives in; `None` for V2 without FAST
    pub fn default_group_name(&self) -> Option<String> {
        match self {
            ProvisioningPolicy::V2 { fast_policy, .. } => fast_policy
                .as_ref()
                .map(|policy| format!("OS_default_{}_SG", policy)),
            ProvisioningPolicy::V3 { srp, slo: None, .. } => {
                Some(format!("OS-{}-{}-SG", srp, NO_SLO))
            }
            ProvisioningPolicy::V3 {
                srp,
                slo: Some(slo),
                workload,
            } => Some(format!(
                "OS-{}-{}-{}-SG",
                srp,
                slo,
                workload.as_deref().unwrap_or(NO_WORKLOAD)
            )),
        }
    }

    fn placement(&self) -> String {
        match self {
            ProvisioningPolicy::V2 {
                pool,
                fast_policy: Some(policy),
            } => format!("{}-{}-FP", pool, policy),
            ProvisioningPolicy::V2 { pool, .. } => pool.clone(),
            ProvisioningPolicy::V3 { srp, slo: None, .. } => format!("{}-{}", srp, NO_SLO),
            ProvisioningPolicy::V3 {
                srp,
                slo: Some(slo),
                workload,
            } => format!(
                "{}-{}-{}",
                srp,
                slo,
                workload.as_deref().unwrap_or(NO_WORKLOAD)
            ),
        }
    }

    /// Masking object names for `host` over `protocol`
    pub fn names(&self, host: &str, protocol: Protocol, port_group: &str) -> MaskingNames {
        let host = short_host_name(host);
        let prefix = format!("OS-{}-{}-{}", host, self.placement(), protocol);
        MaskingNames {
            storage_group: format!("{}-SG", prefix),
            masking_view: format!("{}-MV", prefix),
            initiator_group: format!("OS-{}-{}-IG", host, protocol),
            port_group: port_group.to_string(),
        }
    }
}

/// Host name up to the first dot
pub fn short_host_name(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}

/// Pick one of `port_groups` for `host`; the same host always gets the
/// same group.
pub fn choose_port_group<'a>(port_groups: &'a [String], host: &str) -> Option<&'a str> {
    if port_groups.is_empty() {
        return None;
    }
    let seed = short_host_name(host)
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    port_groups.get(seed % port_groups.len()).map(String::as_str)
}

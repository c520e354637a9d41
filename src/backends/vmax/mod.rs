//! EMC VMAX Adapter
//!
//! Masks volumes to hosts through SMI-S. The array keeps every unmasked
//! volume in a policy-specific default storage group; attach and detach
//! move it between that group and a per-host masking view.

pub mod driver;
mod fast;
pub mod masking;
pub mod policy;
pub mod smis;
pub mod state;
pub mod utils;

#[cfg(test)]
pub(crate) mod fake;

pub use driver::VmaxDriver;
pub use masking::{MaskedVolume, MaskingEngine, MaskingRequest, TeardownRequest};
pub use policy::{MaskingNames, ProvisioningPolicy};
pub use smis::{SmisConnection, SmisConnectionRef};
pub use state::{MaskingLifecycle, MaskingState};
pub use utils::SmisUtils;

use crate::error::{Error, Result};
use crate::jobs::PollConfig;
use serde::{Deserialize, Serialize};

/// Configuration for the VMAX adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmaxConfig {
    /// Array system name, e.g. `SYMMETRIX+000195900551`
    pub system: String,
    pub policy: ProvisioningPolicy,
    /// Port groups hosts are spread over
    pub port_groups: Vec<String>,
    #[serde(default)]
    pub job_poll: PollConfig,
}

impl VmaxConfig {
    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.system.is_empty() {
            return Err(Error::Configuration("vmax: system is required".into()));
        }
        if self.port_groups.is_empty() {
            return Err(Error::Configuration("vmax: at least one port group is required".into()));
        }
        if self.job_poll.max_retries == 0 {
            return Err(Error::Configuration("vmax: poll budget must be non-zero".into()));
        }
        if let ProvisioningPolicy::V3 { slo: None, workload: Some(_), .. } = &self.policy {
            return Err(Error::Configuration("vmax: a workload needs an SLO".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_config_from_yaml() {
        let config: VmaxConfig = serde_yaml::from_str(
            r#"
system: SYMMETRIX+000195900551
policy:
  family: v3
  srp: SRP_1
  slo: Gold
  workload: OLTP
port_groups: [OS-pg-1, OS-pg-2]
"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.job_poll, PollConfig::cim_default());
        assert_eq!(
            config.policy.default_group_name().as_deref(),
            Some("OS-SRP_1-Gold-OLTP-SG")
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = VmaxConfig {
            system: "SYMMETRIX+000195900551".into(),
            policy: ProvisioningPolicy::V3 {
                srp: "SRP_1".into(),
                slo: None,
                workload: Some("OLTP".into()),
            },
            port_groups: vec![],
            job_poll: PollConfig::default(),
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
        config.port_groups.push("OS-pg".into());
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
        config.policy = ProvisioningPolicy::V2 {
            pool: "SATA".into(),
            fast_policy: None,
        };
        assert!(config.validate().is_ok());
    }
}

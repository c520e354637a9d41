//! Default storage groups and FAST tier policies

use super::policy::ProvisioningPolicy;
use super::smis::{CimRef, Device, MaskingGroup};
use super::utils::{SmisUtils, BACKEND};
use crate::error::{Error, Result};
use tracing::{debug, info, warn};

impl SmisUtils {
    /// Default group of `policy`, which must currently hold `device`.
    ///
    /// V2 arrays must have FAST enabled.
    pub async fn get_and_verify_default_storage_group(
        &self,
        system: &str,
        device: &Device,
        policy: &ProvisioningPolicy,
    ) -> Result<MaskingGroup> {
        let name = policy.default_group_name().ok_or_else(|| {
            Error::Configuration(format!("No default storage group for policy {:?}", policy))
        })?;
        if policy.fast_policy().is_some() && !self.conn.is_fast_enabled(system).await? {
            return Err(Error::Configuration(format!(
                "FAST is not supported on {}",
                system
            )));
        }
        let group = self
            .find_storage_group(system, &name)
            .await?
            .ok_or_else(|| Error::not_found("default storage group", name.clone()))?;
        if !self.is_member(&group, device).await? {
            return Err(Error::not_found(
                "default storage group membership",
                format!("{} in {}", device.device_id, name),
            ));
        }
        Ok(group)
    }

    /// Find the default group of `policy`, creating it (and for V2 binding
    /// it to the tier policy) when absent.
    pub async fn get_or_create_default_storage_group(
        &self,
        ccs: &CimRef,
        system: &str,
        policy: &ProvisioningPolicy,
    ) -> Result<MaskingGroup> {
        let name = policy.default_group_name().ok_or_else(|| {
            Error::Configuration(format!("No default storage group for policy {:?}", policy))
        })?;
        if let Some(group) = self.find_storage_group(system, &name).await? {
            return Ok(group);
        }

        let service_level = policy.service_level();
        let result = self
            .conn
            .create_storage_group(ccs, &name, service_level.as_ref())
            .await?;
        self.check_invoke(&format!("creating default storage group {}", name), result)
            .await?;
        let group = self
            .find_storage_group(system, &name)
            .await?
            .ok_or_else(|| Error::backend(BACKEND, format!("Default storage group {} not found after create", name)))?;
        info!("Created default storage group {}", name);

        if let Some(fast_policy) = policy.fast_policy() {
            self.associate_with_tier_policy(system, &group, fast_policy).await?;
        }
        Ok(group)
    }

    /// Put `device` back into its default group; no-op when the policy has
    /// none or the device is already there.
    pub async fn return_to_default_storage_group(
        &self,
        ccs: &CimRef,
        system: &str,
        device: &Device,
        policy: &ProvisioningPolicy,
    ) -> Result<()> {
        if policy.default_group_name().is_none() {
            debug!("No default storage group for volume {}", device.device_id);
            return Ok(());
        }
        let group = self.get_or_create_default_storage_group(ccs, system, policy).await?;
        if self.is_member(&group, device).await? {
            debug!("Volume {} already in {}", device.device_id, group.name);
            return Ok(());
        }
        self.add_device_verified(ccs, &group, device).await
    }

    pub async fn associate_with_tier_policy(
        &self,
        system: &str,
        group: &MaskingGroup,
        fast_policy: &str,
    ) -> Result<()> {
        let rule = self
            .conn
            .tier_policy_rule(system, fast_policy)
            .await?
            .ok_or_else(|| Error::not_found("tier policy", fast_policy))?;
        let result = self.conn.add_group_to_tier_policy(&rule, group).await?;
        self.check_invoke(
            &format!("adding {} to tier policy {}", group.name, fast_policy),
            result,
        )
        .await?;
        info!("Storage group {} associated with FAST policy {}", group.name, fast_policy);
        Ok(())
    }

    /// Best effort; a group that cannot be released is still deleted after
    pub async fn disassociate_from_tier_policy(
        &self,
        system: &str,
        group: &MaskingGroup,
        fast_policy: &str,
    ) -> Result<()> {
        let Some(rule) = self.conn.tier_policy_rule(system, fast_policy).await? else {
            warn!("Tier policy {} not found on {}", fast_policy, system);
            return Ok(());
        };
        let result = self.conn.remove_group_from_tier_policy(&rule, group).await?;
        if let Err(e) = self
            .check_invoke(
                &format!("removing {} from tier policy {}", group.name, fast_policy),
                result,
            )
            .await
        {
            warn!("Unable to disassociate {} from {}: {}", group.name, fast_policy, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::{FakeArray, SYSTEM};
    use super::*;
    use crate::jobs::PollConfig;
    use assert_matches::assert_matches;

    fn v2() -> ProvisioningPolicy {
        ProvisioningPolicy::V2 {
            pool: "SATA".into(),
            fast_policy: Some("GOLD1".into()),
        }
    }

    #[tokio::test]
    async fn test_verify_default_group_requires_membership() {
        let array = FakeArray::new();
        let utils = SmisUtils::new(array.clone(), PollConfig::immediate(3));
        let device = array.add_device("0001A");

        assert_matches!(
            utils.get_and_verify_default_storage_group(SYSTEM, &device, &v2()).await,
            Err(Error::ResourceNotFound { .. })
        );

        array.add_storage_group("OS_default_GOLD1_SG", &[]);
        assert_matches!(
            utils.get_and_verify_default_storage_group(SYSTEM, &device, &v2()).await,
            Err(Error::ResourceNotFound { .. })
        );

        array.add_storage_group("OS_default_GOLD1_SG", &["0001A"]);
        let group = utils
            .get_and_verify_default_storage_group(SYSTEM, &device, &v2())
            .await
            .unwrap();
        assert_eq!(group.name, "OS_default_GOLD1_SG");
    }

    #[tokio::test]
    async fn test_fast_must_be_enabled() {
        let array = FakeArray::new();
        array.set_fast_enabled(false);
        let utils = SmisUtils::new(array.clone(), PollConfig::immediate(3));
        let device = array.add_device("0001A");
        assert_matches!(
            utils.get_and_verify_default_storage_group(SYSTEM, &device, &v2()).await,
            Err(Error::Configuration(_))
        );
    }

    #[tokio::test]
    async fn test_default_group_created_and_bound_to_policy() {
        let array = FakeArray::new();
        let utils = SmisUtils::new(array.clone(), PollConfig::immediate(3));
        let ccs = array.ccs();
        let device = array.add_device("0001A");

        utils
            .return_to_default_storage_group(&ccs, SYSTEM, &device, &v2())
            .await
            .unwrap();

        assert_eq!(array.members("OS_default_GOLD1_SG"), vec!["0001A".to_string()]);
        assert_eq!(array.policy_of("OS_default_GOLD1_SG").as_deref(), Some("GOLD1"));
    }
}

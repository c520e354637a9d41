//! Array Adapters
//!
//! - Dell Storage Center: REST (Dell Storage Manager Data Collector)
//! - EMC VMAX: SMI-S

pub mod dellsc;
pub mod vmax;

pub use dellsc::{ScConfig, StorageCenterDriver};
pub use vmax::{SmisConnectionRef, VmaxConfig, VmaxDriver};

use crate::domain::VolumeDriverRef;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Settings for one configured array
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Dellsc(ScConfig),
    Vmax(VmaxConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Dellsc(_) => "dellsc",
            BackendConfig::Vmax(_) => "vmax",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            BackendConfig::Dellsc(config) => config.validate(),
            BackendConfig::Vmax(config) => config.validate(),
        }
    }
}

/// Factory for array drivers
pub struct BackendFactory;

impl BackendFactory {
    /// Build the driver for `config`. VMAX drivers need an SMI-S connection
    /// from the caller.
    pub async fn create(config: &BackendConfig, smis: Option<SmisConnectionRef>) -> Result<VolumeDriverRef> {
        config.validate()?;
        match config {
            BackendConfig::Dellsc(sc) => {
                let driver = StorageCenterDriver::connect(sc.clone()).await?;
                info!("Connected to Dell Storage Center {}", sc.ssn);
                Ok(Arc::new(driver))
            }
            BackendConfig::Vmax(vmax) => {
                let conn = smis.ok_or_else(|| {
                    Error::Configuration(format!("vmax: no SMI-S connection for {}", vmax.system))
                })?;
                info!("Using VMAX {}", vmax.system);
                Ok(Arc::new(VmaxDriver::new(conn, vmax.clone())))
            }
        }
    }
}

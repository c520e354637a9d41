//! Array Volume Adapters
//!
//! Block-storage volume drivers for two enterprise arrays, behind one
//! vendor-neutral contract.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │             VolumeDriver / VolumeProvisioner (domain ports)          │
//! ├──────────────────────────────────┬───────────────────────────────────┤
//! │      Dell Storage Center         │            EMC VMAX               │
//! │  ┌────────────┐ ┌─────────────┐  │  ┌─────────────┐ ┌─────────────┐  │
//! │  │ ScApi      │ │ Replication │  │  │ Masking     │ │ FAST /      │  │
//! │  │ (volumes,  │ │ (QoS, flip, │  │  │ engine +    │ │ default SGs │  │
//! │  │  servers,  │ │  failover)  │  │  │ lifecycle   │ │             │  │
//! │  │  CMM clone)│ │             │  │  │             │ │             │  │
//! │  └─────┬──────┘ └──────┬──────┘  │  └──────┬──────┘ └──────┬──────┘  │
//! │        └───────┬───────┘         │         └───────┬───────┘         │
//! │          RestTransport           │          SmisConnection           │
//! ├──────────────────────────────────┴───────────────────────────────────┤
//! │        Job poller (async tasks, CMM, CIM jobs) · Lock registry       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`backends`]: the Dell SC and VMAX adapters and their factory
//! - [`domain`]: driver ports and shared identifiers
//! - [`jobs`]: bounded polling of vendor jobs
//! - [`locks`]: named locks for shared array objects
//! - [`config`]: YAML configuration
//! - [`error`]: Error types and handling

pub mod backends;
pub mod config;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod locks;

// Re-export commonly used types
pub use backends::{
    BackendConfig, BackendFactory, ScConfig, StorageCenterDriver, VmaxConfig, VmaxDriver,
};

pub use config::{AdapterConfig, LoggingConfig};

pub use domain::{
    ConnectionInfo, Connector, Protocol, ProviderId, SnapshotRef, VolumeDriver, VolumeDriverRef,
    VolumeProvisioner, VolumeProvisionerRef, VolumeRef, VolumeUpdate,
};

pub use error::{Error, ErrorClass, Result};

pub use jobs::{JobState, PollConfig};

pub use locks::LockRegistry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

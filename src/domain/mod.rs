//! Domain layer - Vendor-neutral types and port definitions
//!
//! This module defines the traits (ports) that the array adapters implement
//! and the identifiers shared between them.

pub mod ids;
pub mod ports;

pub use ids::ProviderId;
pub use ports::*;

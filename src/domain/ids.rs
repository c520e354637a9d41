//! Composite array volume identifiers

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `<array-serial>.<local-index>`
///
/// The serial segment always names the owning array, which is how calls are
/// routed once several arrays are federated (replication, failover).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId {
    pub serial: u64,
    pub index: u64,
}

impl ProviderId {
    pub fn new(serial: u64, index: u64) -> Self {
        Self { serial, index }
    }

    /// Whether this id belongs to the array with `serial`
    pub fn is_on(&self, serial: u64) -> bool {
        self.serial == serial
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.serial, self.index)
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (serial, index) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidVolumeId(s.to_string()))?;
        let serial = serial
            .parse()
            .map_err(|_| Error::InvalidVolumeId(s.to_string()))?;
        let index = index
            .parse()
            .map_err(|_| Error::InvalidVolumeId(s.to_string()))?;
        Ok(Self { serial, index })
    }
}

impl TryFrom<String> for ProviderId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.to_string()
    }
}

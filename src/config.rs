//! Adapter configuration file

use crate::backends::BackendConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Logging defaults, overridable from the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level YAML document
///
/// ```yaml
/// logging:
///   level: debug
/// backends:
///   sc-east:
///     type: dellsc
///     san_ip: 10.0.0.10
///     password: secret
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub logging: LoggingConfig,
    pub backends: BTreeMap<String, BackendConfig>,
}

impl AdapterConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::Configuration("No backends configured".into()));
        }
        for (name, backend) in &self.backends {
            backend
                .validate()
                .map_err(|e| Error::Configuration(format!("backend {}: {}", name, e)))?;
        }
        Ok(())
    }

    /// Backend called `name`, or the only one configured when `None`
    pub fn backend(&self, name: Option<&str>) -> Result<(&str, &BackendConfig)> {
        match name {
            Some(name) => self
                .backends
                .get_key_value(name)
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| Error::Configuration(format!("Unknown backend {}", name))),
            None if self.backends.len() == 1 => self
                .backends
                .iter()
                .next()
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| Error::Configuration("No backends configured".into())),
            None => Err(Error::Configuration(
                "Several backends configured; pick one with --backend".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    const YAML: &str = r#"
logging:
  level: debug
backends:
  sc-east:
    type: dellsc
    san_ip: 10.0.0.10
    password: secret
    ssn: 64702
    replication_targets:
      - ssn: 12345
        replication_type: Synchronous
        auto_failover: true
  vmax-1:
    type: vmax
    system: SYMMETRIX+000195900551
    policy:
      family: v2
      pool: SATA
      fast_policy: GOLD1
    port_groups: [OS-pg]
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = AdapterConfig::load(file.path()).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json);
        let (name, backend) = config.backend(Some("sc-east")).unwrap();
        assert_eq!(name, "sc-east");
        assert_matches!(backend, BackendConfig::Dellsc(sc) if sc.replication_targets[0].auto_failover);
        assert_matches!(config.backend(Some("vmax-1")), Ok((_, BackendConfig::Vmax(_))));
        assert_matches!(config.backend(None), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let yaml = "backends:\n  sc:\n    type: dellsc\n    san_ip: 10.0.0.10\n";
        assert_matches!(AdapterConfig::from_yaml(yaml), Err(Error::Configuration(msg)) if msg.contains("password"));
        assert_matches!(AdapterConfig::from_yaml("backends: {}"), Err(Error::Configuration(_)));
        assert_matches!(AdapterConfig::from_yaml("backends: ["), Err(Error::YamlParse(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            AdapterConfig::load(dir.path().join("absent.yaml")),
            Err(Error::Io(_))
        );
    }
}

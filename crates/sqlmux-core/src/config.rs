//! sqlmux.toml configuration parser.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::driver::{DriverEntry, DriverRegistry};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MuxConfig {
    #[serde(default)]
    pub pool: PoolSection,
    /// Extra drivers, consulted before the built-in table.
    #[serde(default)]
    pub drivers: Vec<DriverEntry>,
    /// Per-driver-token property overrides, merged over the built-in presets.
    #[serde(default)]
    pub driver_properties: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolSection {
    /// Fixed pool size. Unset means `2 * cpus + 1`.
    pub max_size: Option<u32>,
    pub leak_detection_threshold_secs: Option<u64>,
}

impl MuxConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: MuxConfig = toml::from_str(content)?;
        if config.pool.max_size == Some(0) {
            anyhow::bail!("pool.max_size must be at least 1");
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Configured drivers followed by the built-ins.
    pub fn driver_registry(&self) -> DriverRegistry {
        DriverRegistry::with_entries(self.drivers.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BackendResolver;

    #[test]
    fn empty_config_uses_defaults() {
        let config = MuxConfig::from_toml_str("").unwrap();
        assert_eq!(config, MuxConfig::default());
        assert_eq!(config.pool.max_size, None);
        assert_eq!(
            config.driver_registry().entries(),
            DriverRegistry::builtin().entries()
        );
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
[pool]
max_size = 16
leak_detection_threshold_secs = 30

[[drivers]]
prefix = "jdbc:clickhouse:"
token = "com.clickhouse.jdbc.ClickHouseDriver"

[driver_properties."com.clickhouse.jdbc.ClickHouseDriver"]
compress = "true"
"#;
        let config = MuxConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.pool.max_size, Some(16));
        assert_eq!(config.pool.leak_detection_threshold_secs, Some(30));
        assert_eq!(
            config.driver_properties["com.clickhouse.jdbc.ClickHouseDriver"]["compress"],
            "true"
        );

        let registry = config.driver_registry();
        assert_eq!(
            registry.resolve("jdbc:clickhouse://ch:8123/db").unwrap(),
            "com.clickhouse.jdbc.ClickHouseDriver"
        );
        assert_eq!(registry.resolve("jdbc:h2:mem:x").unwrap(), "org.h2.Driver");
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let err = MuxConfig::from_toml_str("[pool]\nmax_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_size"));
    }

    #[test]
    fn unknown_shape_is_an_error() {
        assert!(MuxConfig::from_toml_str("drivers = 3").is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = MuxConfig::default();
        config.pool.max_size = Some(4);
        config
            .drivers
            .push(DriverEntry::new("jdbc:duckdb:", "org.duckdb.DuckDBDriver"));
        let text = config.to_toml_string().unwrap();
        assert_eq!(MuxConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlmux.toml");
        std::fs::write(&path, "[pool]\nleak_detection_threshold_secs = 5\n").unwrap();

        let config = MuxConfig::from_file(&path).unwrap();
        assert_eq!(config.pool.leak_detection_threshold_secs, Some(5));
    }

    #[test]
    fn from_file_missing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MuxConfig::from_file(&dir.path().join("absent.toml")).is_err());
    }
}

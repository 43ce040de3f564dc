//! Pool settings — what a cache miss hands to the [`PoolFactory`](crate::PoolFactory).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;

use sqlmux_core::{ConnectionIdentity, MuxConfig};

/// Pool size is `POOL_SIZE_MULTIPLIER * parallelism + POOL_SIZE_OFFSET`.
pub const POOL_SIZE_MULTIPLIER: u32 = 2;
pub const POOL_SIZE_OFFSET: u32 = 1;

/// A borrowed connection held longer than this is reported as a leak by the pool.
pub const DEFAULT_LEAK_DETECTION_THRESHOLD: Duration = Duration::from_secs(60);

/// Driver tokens that get the MySQL "maximum performance" preset.
const MYSQL_FAMILY_TOKENS: [&str; 3] = [
    "com.mysql.cj.jdbc.Driver",
    "com.mysql.jdbc.Driver",
    "org.mariadb.jdbc.Driver",
];

/// Pool size for a host with `parallelism` execution units.
pub fn pool_size_for(parallelism: usize) -> NonZeroU32 {
    let units = u32::try_from(parallelism).unwrap_or(u32::MAX);
    let size = units
        .saturating_mul(POOL_SIZE_MULTIPLIER)
        .saturating_add(POOL_SIZE_OFFSET);
    NonZeroU32::new(size).unwrap_or(NonZeroU32::MIN)
}

/// Pool size for this host. Falls back to one execution unit when the
/// parallelism can't be determined.
pub fn default_pool_size() -> NonZeroU32 {
    let parallelism = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    pool_size_for(parallelism)
}

/// Per-driver property presets, keyed by driver token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverProperties {
    by_token: HashMap<String, BTreeMap<String, String>>,
}

impl DriverProperties {
    pub fn empty() -> Self {
        Self {
            by_token: HashMap::new(),
        }
    }

    /// MySQL-family drivers get `useConfigs=maxPerformance`.
    pub fn builtin() -> Self {
        let mut props = Self::empty();
        for token in MYSQL_FAMILY_TOKENS {
            props.insert(token, "useConfigs", "maxPerformance");
        }
        props
    }

    pub fn insert(&mut self, token: &str, key: &str, value: &str) -> &mut Self {
        self.by_token
            .entry(token.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Merge `other` over `self`; per-key, `other` wins.
    pub fn merge(&mut self, other: &BTreeMap<String, BTreeMap<String, String>>) {
        for (token, properties) in other {
            for (key, value) in properties {
                self.insert(token, key, value);
            }
        }
    }

    pub fn get(&self, token: &str) -> Option<&BTreeMap<String, String>> {
        self.by_token.get(token)
    }
}

impl Default for DriverProperties {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Construction-time options for [`SqlManager`](crate::SqlManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Maximum connections per pool (default: `2 * cpus + 1`).
    pub max_pool_size: NonZeroU32,
    /// Leak detection threshold passed to every pool (default: 60s).
    pub leak_detection_threshold: Duration,
    /// Driver-specific property presets (default: [`DriverProperties::builtin`]).
    pub driver_properties: DriverProperties,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_pool_size: default_pool_size(),
            leak_detection_threshold: DEFAULT_LEAK_DETECTION_THRESHOLD,
            driver_properties: DriverProperties::builtin(),
        }
    }
}

impl ManagerOptions {
    pub fn from_config(config: &MuxConfig) -> Self {
        let mut driver_properties = DriverProperties::builtin();
        driver_properties.merge(&config.driver_properties);

        Self {
            max_pool_size: config
                .pool
                .max_size
                .and_then(NonZeroU32::new)
                .unwrap_or_else(default_pool_size),
            leak_detection_threshold: config
                .pool
                .leak_detection_threshold_secs
                .map_or(DEFAULT_LEAK_DETECTION_THRESHOLD, Duration::from_secs),
            driver_properties,
        }
    }
}

/// Everything a factory needs to build the pool for one identity.
#[derive(Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub principal: Option<String>,
    pub credential: Option<String>,
    pub driver_token: String,
    /// Authentication-free address the pool connects to.
    pub target: String,
    pub max_size: u32,
    pub leak_detection_threshold: Duration,
    /// Driver-specific properties; empty for drivers without a preset.
    pub properties: BTreeMap<String, String>,
}

impl PoolSettings {
    pub fn for_identity(identity: &ConnectionIdentity, options: &ManagerOptions) -> Self {
        Self {
            principal: identity.principal().map(str::to_string),
            credential: identity.credential().map(str::to_string),
            driver_token: identity.driver_token().to_string(),
            target: identity.canonical_address().to_string(),
            max_size: options.max_pool_size.get(),
            leak_detection_threshold: options.leak_detection_threshold,
            properties: options
                .driver_properties
                .get(identity.driver_token())
                .cloned()
                .unwrap_or_default(),
        }
    }
}

impl fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSettings")
            .field("principal", &self.principal)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("driver_token", &self.driver_token)
            .field("target", &self.target)
            .field("max_size", &self.max_size)
            .field("leak_detection_threshold", &self.leak_detection_threshold)
            .field("properties", &self.properties)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlmux_core::DriverRegistry;

    fn identity(raw: &str) -> ConnectionIdentity {
        ConnectionIdentity::parse(raw, &DriverRegistry::builtin()).unwrap()
    }

    #[test]
    fn pool_size_formula() {
        assert_eq!(pool_size_for(0).get(), 1);
        assert_eq!(pool_size_for(1).get(), 3);
        assert_eq!(pool_size_for(4).get(), 9);
        assert_eq!(pool_size_for(16).get(), 33);
        assert_eq!(pool_size_for(usize::MAX).get(), u32::MAX);
    }

    #[test]
    fn default_pool_size_is_odd_and_at_least_three() {
        let size = default_pool_size().get();
        assert!(size >= 3);
        assert_eq!(size % 2, 1);
    }

    #[test]
    fn options_defaults() {
        let options = ManagerOptions::default();
        assert_eq!(options.max_pool_size, default_pool_size());
        assert_eq!(options.leak_detection_threshold, Duration::from_secs(60));
        assert_eq!(options.driver_properties, DriverProperties::builtin());
    }

    #[test]
    fn mysql_family_gets_max_performance() {
        let props = DriverProperties::builtin();
        for token in MYSQL_FAMILY_TOKENS {
            assert_eq!(props.get(token).unwrap()["useConfigs"], "maxPerformance");
        }
        assert!(props.get("org.h2.Driver").is_none());
    }

    #[test]
    fn settings_carry_identity_and_preset() {
        let options = ManagerOptions {
            max_pool_size: NonZeroU32::new(7).unwrap(),
            ..ManagerOptions::default()
        };
        let settings =
            PoolSettings::for_identity(&identity("jdbc:mysql://alice:s%40cret@db/app"), &options);

        assert_eq!(settings.principal.as_deref(), Some("alice"));
        assert_eq!(settings.credential.as_deref(), Some("s@cret"));
        assert_eq!(settings.driver_token, "com.mysql.cj.jdbc.Driver");
        assert_eq!(settings.target, "jdbc:mysql://db/app");
        assert_eq!(settings.max_size, 7);
        assert_eq!(settings.leak_detection_threshold, DEFAULT_LEAK_DETECTION_THRESHOLD);
        assert_eq!(settings.properties["useConfigs"], "maxPerformance");
    }

    #[test]
    fn unknown_driver_gets_no_properties() {
        let settings =
            PoolSettings::for_identity(&identity("jdbc:h2:mem:testdb"), &ManagerOptions::default());
        assert!(settings.properties.is_empty());
        assert_eq!(settings.principal, None);
    }

    #[test]
    fn from_config_merges_over_presets() {
        let config = MuxConfig::from_toml_str(
            r#"
[pool]
max_size = 5
leak_detection_threshold_secs = 10

[driver_properties."com.mysql.cj.jdbc.Driver"]
useConfigs = "fullDebug"
cachePrepStmts = "true"
"#,
        )
        .unwrap();

        let options = ManagerOptions::from_config(&config);
        assert_eq!(options.max_pool_size.get(), 5);
        assert_eq!(options.leak_detection_threshold, Duration::from_secs(10));

        let mysql = options.driver_properties.get("com.mysql.cj.jdbc.Driver").unwrap();
        assert_eq!(mysql["useConfigs"], "fullDebug");
        assert_eq!(mysql["cachePrepStmts"], "true");
        let mariadb = options.driver_properties.get("org.mariadb.jdbc.Driver").unwrap();
        assert_eq!(mariadb["useConfigs"], "maxPerformance");
    }

    #[test]
    fn zero_size_in_code_built_config_falls_back() {
        // from_toml_str rejects 0; a config assembled in code does not go through it.
        let mut config = MuxConfig::default();
        config.pool.max_size = Some(0);
        let options = ManagerOptions::from_config(&config);
        assert_eq!(options.max_pool_size, default_pool_size());
    }

    #[test]
    fn debug_redacts_credential() {
        let settings = PoolSettings::for_identity(
            &identity("jdbc:mysql://alice:hunter2@db/app"),
            &ManagerOptions::default(),
        );
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}

//! Driver resolution — which backend handles a canonical address.

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Maps a canonical address to the token of the driver that accepts it.
///
/// Implementations may inspect the environment (installed drivers, feature
/// flags) but must not open a connection.
pub trait BackendResolver: Send + Sync {
    fn resolve(&self, canonical_address: &str) -> Result<String, IdentityError>;
}

impl<F> BackendResolver for F
where
    F: Fn(&str) -> Result<String, IdentityError> + Send + Sync,
{
    fn resolve(&self, canonical_address: &str) -> Result<String, IdentityError> {
        self(canonical_address)
    }
}

/// One registry row: addresses starting with `prefix` belong to `token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverEntry {
    pub prefix: String,
    pub token: String,
}

impl DriverEntry {
    pub fn new(prefix: &str, token: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            token: token.to_string(),
        }
    }

    /// ASCII case-insensitive prefix match.
    pub fn accepts(&self, canonical_address: &str) -> bool {
        canonical_address
            .get(..self.prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(&self.prefix))
    }
}

/// Ordered prefix table. The first entry that accepts an address wins.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    entries: Vec<DriverEntry>,
}

impl DriverRegistry {
    /// An empty registry; every address is unresolved until entries are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the drivers sqlmux knows about out of the box.
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                DriverEntry::new("jdbc:h2:", "org.h2.Driver"),
                DriverEntry::new("jdbc:mysql:", "com.mysql.cj.jdbc.Driver"),
                DriverEntry::new("jdbc:mariadb:", "org.mariadb.jdbc.Driver"),
                DriverEntry::new("jdbc:postgresql:", "org.postgresql.Driver"),
                DriverEntry::new("jdbc:sqlite:", "org.sqlite.JDBC"),
                DriverEntry::new(
                    "jdbc:sqlserver:",
                    "com.microsoft.sqlserver.jdbc.SQLServerDriver",
                ),
            ],
        }
    }

    /// `entries` first, then the built-ins.
    pub fn with_entries(entries: impl IntoIterator<Item = DriverEntry>) -> Self {
        let mut registry = Self {
            entries: entries.into_iter().collect(),
        };
        registry.entries.extend(Self::builtin().entries);
        registry
    }

    /// Append an entry. It is consulted after everything already registered.
    pub fn register(&mut self, prefix: &str, token: &str) -> &mut Self {
        self.entries.push(DriverEntry::new(prefix, token));
        self
    }

    pub fn entries(&self) -> &[DriverEntry] {
        &self.entries
    }

    pub fn find(&self, canonical_address: &str) -> Option<&DriverEntry> {
        self.entries.iter().find(|e| e.accepts(canonical_address))
    }
}

impl BackendResolver for DriverRegistry {
    fn resolve(&self, canonical_address: &str) -> Result<String, IdentityError> {
        self.find(canonical_address)
            .map(|entry| entry.token.clone())
            .ok_or_else(|| IdentityError::UnresolvedBackend {
                address: canonical_address.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_resolves_known_schemes() {
        let registry = DriverRegistry::builtin();
        assert_eq!(registry.resolve("jdbc:h2:mem:x").unwrap(), "org.h2.Driver");
        assert_eq!(
            registry.resolve("jdbc:mariadb://db/app").unwrap(),
            "org.mariadb.jdbc.Driver"
        );
        assert_eq!(
            registry.resolve("jdbc:postgresql://db/app").unwrap(),
            "org.postgresql.Driver"
        );
    }

    #[test]
    fn prefix_match_ignores_ascii_case() {
        let registry = DriverRegistry::builtin();
        assert_eq!(
            registry.resolve("JDBC:MySQL://db/app").unwrap(),
            "com.mysql.cj.jdbc.Driver"
        );
    }

    #[test]
    fn scheme_must_match_whole_prefix() {
        // "jdbc:h2x:" must not be claimed by "jdbc:h2:".
        let registry = DriverRegistry::builtin();
        assert!(registry.resolve("jdbc:h2x:mem:x").is_err());
    }

    #[test]
    fn short_or_multibyte_addresses_do_not_panic() {
        let registry = DriverRegistry::builtin();
        assert!(registry.resolve("jdbc").is_err());
        assert!(registry.resolve("jdbc:é").is_err());
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let err = DriverRegistry::new().resolve("jdbc:h2:mem:x").unwrap_err();
        assert!(matches!(err, IdentityError::UnresolvedBackend { .. }));
    }

    #[test]
    fn configured_entries_take_precedence() {
        let registry = DriverRegistry::with_entries([DriverEntry::new(
            "jdbc:mysql:",
            "org.mariadb.jdbc.Driver",
        )]);
        assert_eq!(
            registry.resolve("jdbc:mysql://db/app").unwrap(),
            "org.mariadb.jdbc.Driver"
        );
        assert_eq!(registry.entries().len(), DriverRegistry::builtin().entries().len() + 1);
    }

    #[test]
    fn register_appends() {
        let mut registry = DriverRegistry::new();
        registry
            .register("jdbc:clickhouse:", "com.clickhouse.jdbc.ClickHouseDriver")
            .register("jdbc:clickhouse:", "shadowed");
        assert_eq!(
            registry.resolve("jdbc:clickhouse://ch/db").unwrap(),
            "com.clickhouse.jdbc.ClickHouseDriver"
        );
    }
}

//! Connection string → [`ConnectionIdentity`].
//!
//! Accepted shape:
//!
//! ```text
//! [jdbc:]scheme:[//][principal[:credential]@]address
//! ```
//!
//! The address is taken verbatim. The canonical address always starts with
//! `jdbc:` and reproduces the `//` marker exactly as it appeared in the input,
//! since some drivers treat `jdbc:h2:mem:x` and `jdbc:h2://mem:x` differently.

use std::fmt;
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::driver::BackendResolver;
use crate::error::IdentityError;

static CONNECTION_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:jdbc:)?([^:]+):(//)?(?:([^:]+)(?::([^@]+))?@)?([^\n\r\x{85}\x{2028}\x{2029}]*)$",
    )
    .expect("connection string pattern compiles")
});

/// Normalized, comparable form of a connection string.
///
/// Equality and hashing cover all five fields, including the raw input, so
/// `jdbc:mysql://u:p@host/db` and `mysql://u:p@host/db` are different keys
/// even though they reach the same endpoint.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    principal: Option<String>,
    credential: Option<String>,
    driver_token: String,
    canonical_address: String,
    raw_address: String,
}

impl ConnectionIdentity {
    /// Parse `raw` and resolve its driver token through `resolver`.
    ///
    /// Resolution only inspects the canonical address; it never connects.
    pub fn parse(raw: &str, resolver: &dyn BackendResolver) -> Result<Self, IdentityError> {
        let captures = CONNECTION_STRING
            .captures(raw)
            .ok_or_else(|| IdentityError::Malformed(raw.to_string()))?;

        let scheme = captures.get(1).map_or("", |m| m.as_str());
        let slashes = captures.get(2).map_or("", |m| m.as_str());
        let principal = captures
            .get(3)
            .map(|m| decode_component(raw, m.as_str()))
            .transpose()?;
        let credential = captures
            .get(4)
            .map(|m| decode_component(raw, m.as_str()))
            .transpose()?;
        let address = captures.get(5).map_or("", |m| m.as_str());

        let canonical_address = format!("jdbc:{scheme}:{slashes}{address}");
        let driver_token = resolver.resolve(&canonical_address)?;

        Ok(Self {
            principal,
            credential,
            driver_token,
            canonical_address,
            raw_address: raw.to_string(),
        })
    }

    /// Decoded user name, if the string carried one.
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Decoded password. Only ever present together with a principal.
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn driver_token(&self) -> &str {
        &self.driver_token
    }

    /// The connection string without credentials, always `jdbc:`-prefixed.
    pub fn canonical_address(&self) -> &str {
        &self.canonical_address
    }

    /// The input exactly as given. May contain a password; don't log it.
    pub fn raw_address(&self) -> &str {
        &self.raw_address
    }
}

impl fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionIdentity")
            .field("principal", &self.principal)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("driver_token", &self.driver_token)
            .field("canonical_address", &self.canonical_address)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_address)
    }
}

/// Form-decode a user or password segment: `+` is a space, `%XX` is a byte,
/// and bytes that aren't valid UTF-8 become U+FFFD. A `%` not followed by two
/// hex digits makes the whole string malformed.
fn decode_component(raw: &str, component: &str) -> Result<String, IdentityError> {
    let bytes = component.as_bytes();
    let escapes_complete = bytes
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'%')
        .all(|(i, _)| {
            bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
        });
    if !escapes_complete {
        return Err(IdentityError::Malformed(raw.to_string()));
    }

    let spaced = component.replace('+', " ");
    Ok(percent_decode_str(&spaced).decode_utf8_lossy().into_owned())
}

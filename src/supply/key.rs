use derive_more::Display;
use std::borrow::{Borrow, Cow};
use std::sync::Arc;

/// Identity of one supplied value, derived deterministically from request params.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct SupplyKey(String);

impl SupplyKey {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Matches `*`, an exact key, or a trailing-wildcard prefix such as `quote_*`.
    #[must_use]
    pub fn matches(&self, pattern: &str) -> bool {
        pattern_matches(pattern, &self.0)
    }
}

impl From<&str> for SupplyKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SupplyKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for SupplyKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Derives the key for a params value. Shared by every clone of a supplier.
pub type KeyCreator<P> = Arc<dyn Fn(&P) -> SupplyKey + Send + Sync>;

/// Build a [`KeyCreator`] from a closure
pub fn key_creator<P, F>(f: F) -> KeyCreator<P>
where
    F: Fn(&P) -> SupplyKey + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Escape one id before it becomes part of a composite key.
///
/// `_` separates parts and `,` separates list items, so both are escaped with a
/// backslash (as is the backslash itself). Two different id sequences therefore never
/// produce the same key, and a pattern ending in an unescaped `_` never stops inside an
/// id.
#[must_use]
pub fn key_part(id: &str) -> Cow<'_, str> {
    if !id.contains(['\\', '_', ',']) {
        return Cow::Borrowed(id);
    }

    let mut escaped = String::with_capacity(id.len() + 4);
    for c in id.chars() {
        if matches!(c, '\\' | '_' | ',') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

pub(crate) fn pattern_matches(pattern: &str, key: &str) -> bool {
    if pattern == "*" || pattern == key {
        return true;
    }

    // "network_status_w1_*" matches "network_status_w1_eth"
    if let Some(prefix) = pattern.strip_suffix('*') {
        return key.starts_with(prefix);
    }

    false
}

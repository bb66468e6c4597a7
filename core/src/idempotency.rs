//! Idempotency keys for mutating requests.
//!
//! Generate one key per logical operation and reuse it for every retry of
//! that operation: the server deduplicates on key + body, so a replay returns
//! the original result and a body mismatch is rejected with 409.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque value sent as the `Idempotency-Key` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wrap a caller-chosen key verbatim.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Fresh random (v4 UUID) key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for IdempotencyKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The explicit key when given, otherwise a freshly generated one.
pub fn next_key(explicit: Option<IdempotencyKey>) -> IdempotencyKey {
    explicit.unwrap_or_else(IdempotencyKey::generate)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn explicit_key_is_returned_unchanged() {
        let key = next_key(Some("idem-123".into()));
        assert_eq!(key.as_str(), "idem-123");
    }

    #[test]
    fn generated_keys_do_not_collide() {
        let keys: HashSet<_> = (0..10_000).map(|_| next_key(None)).collect();
        assert_eq!(keys.len(), 10_000);
    }

    #[test]
    fn generated_key_is_a_uuid() {
        let key = IdempotencyKey::generate();
        assert!(Uuid::parse_str(key.as_str()).is_ok());
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&IdempotencyKey::new("k")).unwrap();
        assert_eq!(json, "\"k\"");
    }
}

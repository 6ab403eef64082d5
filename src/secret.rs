//! Zeroized credential type.
//!
//! The provider API token is held in a [`Secret`] so the backing memory is
//! cleared when the value is dropped and so the token can never leak through
//! `Debug`/`Display` formatting or log output.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

/// A sensitive string that is zeroized on drop and redacted when formatted.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Exposes the underlying value.
    ///
    /// Avoid copying the returned slice; copies are not zeroized.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison; credential equality must not leak timing.
        use subtle::ConstantTimeEq;
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for Secret {}

impl Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Secret::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expose_returns_value() {
        let secret = Secret::new("api-token-123".to_string());
        assert_eq!(secret.expose(), "api-token-123");
        assert!(!secret.is_empty());
    }

    #[test]
    fn test_debug_and_display_are_redacted() {
        let secret = Secret::from("super-secret");
        assert!(!format!("{:?}", secret).contains("super-secret"));
        assert!(!format!("{}", secret).contains("super-secret"));
        assert!(format!("{:?}", secret).contains("REDACTED"));
    }

    #[test]
    fn test_equality() {
        assert_eq!(Secret::from("same"), Secret::from("same"));
        assert_ne!(Secret::from("same"), Secret::from("other"));
    }

    #[test]
    fn test_serde_round_trip() {
        let original = Secret::from("serialized-token");
        let json = serde_json::to_string(&original).unwrap();
        let restored: Secret = serde_json::from_str(&json).unwrap();
        assert_eq!(original, restored);
    }
}

//! Token authentication.
//!
//! Clients attach a shared-secret token to each call and servers compare it
//! against their configured token. Tokens are compared in constant time.
//!
//! # Example
//!
//! ```
//! use relayrpc_common::auth::AuthConfig;
//!
//! let auth = AuthConfig::with_token("my-secret-token");
//! assert!(auth.validate_token("my-secret-token"));
//! assert!(!auth.validate_token("guess"));
//!
//! let open = AuthConfig::disabled();
//! assert!(open.validate_token("anything"));
//! ```

use std::fmt;

#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// The expected token, None if authentication is disabled
    token: Option<String>,
}

impl AuthConfig {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { token: None }
    }

    pub fn requires_auth(&self) -> bool {
        self.token.is_some()
    }

    /// Validates a token against the configured one.
    ///
    /// If authentication is disabled, this always returns `true`.
    pub fn validate_token(&self, provided: &str) -> bool {
        match &self.token {
            Some(expected) => constant_time_eq(expected, provided),
            None => true,
        }
    }
}

impl fmt::Display for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token {
            Some(_) => write!(f, "Token(*****)"),
            None => write!(f, "Disabled"),
        }
    }
}

/// Compares two strings without short-circuiting on the first difference.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_with_token() {
        let auth = AuthConfig::with_token("test-token");
        assert!(auth.requires_auth());
        assert!(auth.validate_token("test-token"));
        assert!(!auth.validate_token("wrong-token"));
    }

    #[test]
    fn test_auth_config_disabled() {
        let auth = AuthConfig::default();
        assert!(!auth.requires_auth());
        assert!(auth.validate_token(""));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("same-key-123", "same-key-123"));
        assert!(!constant_time_eq("key1", "key2"));
        assert!(!constant_time_eq("short", "longer"));
        assert!(!constant_time_eq("a", ""));
    }

    #[test]
    fn test_display_hides_token() {
        assert_eq!(AuthConfig::with_token("secret").to_string(), "Token(*****)");
        assert_eq!(AuthConfig::disabled().to_string(), "Disabled");
    }
}

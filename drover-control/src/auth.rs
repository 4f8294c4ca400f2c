//! Token auth for the control socket.
//!
//! Tokens are stored as SHA-256 hex hashes in configuration; the
//! incoming plaintext is hashed and compared. With auth disabled the
//! socket relies on its filesystem permissions alone.

use hex::encode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlAuthConfig {
    #[serde(default)]
    pub enabled: bool,

    /// SHA-256 hashes (64 hex chars) of accepted tokens. Generate with
    /// `echo -n "token" | sha256sum`.
    #[serde(default)]
    pub token_hashes: Vec<String>,
}

impl ControlAuthConfig {
    /// Validate an optional plaintext token. Always passes when auth is
    /// disabled.
    #[must_use]
    pub fn validate(&self, token: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(token) = token else {
            return false;
        };
        let hash = encode(Sha256::digest(token.as_bytes()));
        self.token_hashes.iter().any(|h| h.eq_ignore_ascii_case(&hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SHA-256 of "test-token"
    const TEST_HASH: &str = "4c5dc9b7708905f77f5e5d16316b5dfb425e68cb326dcd55a860e90a7707031e";

    #[test]
    fn test_disabled_allows_everything() {
        let config = ControlAuthConfig::default();
        assert!(config.validate(None));
        assert!(config.validate(Some("anything")));
    }

    #[test]
    fn test_enabled_requires_matching_token() {
        let config = ControlAuthConfig {
            enabled: true,
            token_hashes: vec![TEST_HASH.to_string()],
        };
        assert!(config.validate(Some("test-token")));
        assert!(!config.validate(Some("wrong-token")));
        assert!(!config.validate(None));
    }
}

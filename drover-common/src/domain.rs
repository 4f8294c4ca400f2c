//! Destination-domain newtype.
//!
//! Wraps the domain half of a recipient address so that bucket keys,
//! health classifications, and per-domain configuration cannot be mixed
//! up with full addresses or arbitrary strings.

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// A destination domain, stored lowercased.
///
/// Cheap to clone (`Arc<str>` inside); used as the key for recipient
/// buckets and domain-health lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(Arc<str>);

impl Domain {
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref().trim().to_ascii_lowercase()))
    }

    /// Extract the domain part of a recipient address.
    ///
    /// Returns `None` when the address has no `@` or an empty domain part.
    #[must_use]
    pub fn of_address(address: &str) -> Option<Self> {
        let (_, domain) = address.rsplit_once('@')?;
        let domain = domain.trim();
        if domain.is_empty() {
            None
        } else {
            Some(Self::new(domain))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

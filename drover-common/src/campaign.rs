//! Campaign identity, sender profiles, and recipient-list hygiene.

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::domain::Domain;

/// Opaque campaign identifier, assigned by the layer that owns campaign
/// definitions (outside this control plane).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(Arc<str>);

impl CampaignId {
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CampaignId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One sender identity a job can rotate through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    /// Display name, empty when the profile is a bare address.
    #[serde(default)]
    pub name: String,
    /// Envelope address.
    pub address: String,
}

impl SenderProfile {
    /// Parse one profile line. Accepted forms:
    ///
    /// - `Name <addr@domain>`
    /// - `addr@domain | Name`
    /// - `addr@domain`
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (name, address) = if let Some((name, rest)) = line.split_once('<') {
            let address = rest.split_once('>')?.0;
            (name.trim(), address.trim())
        } else if let Some((address, name)) = line.split_once('|') {
            (name.trim(), address.trim())
        } else {
            ("", line)
        };

        let address = address.to_ascii_lowercase();
        is_valid_address(&address).then(|| Self {
            name: name.to_string(),
            address,
        })
    }

    /// The sender's own domain, used when stamping message identifiers.
    #[must_use]
    pub fn domain(&self) -> Domain {
        Domain::of_address(&self.address).unwrap_or_else(|| Domain::new("localhost"))
    }
}

impl Display for SenderProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} <{}>", self.name, self.address)
        }
    }
}

/// A campaign as this control plane sees it: identity, the recipient
/// list to work through, content variants, and the sender identities to
/// rotate across. Content itself is produced elsewhere; drover only
/// needs the variant count and the sender list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    #[serde(default)]
    pub name: String,
    /// Sanitised recipient addresses, in import order.
    pub recipients: Vec<String>,
    /// Subject/content variant labels; the dispatcher rotates the
    /// variant index across retries.
    #[serde(default)]
    pub subjects: Vec<String>,
    pub senders: Vec<SenderProfile>,
    /// Per-campaign chunk size override.
    #[serde(default)]
    pub chunk_size: Option<u32>,
    /// Per-campaign worker limit override.
    #[serde(default)]
    pub worker_limit: Option<u32>,
}

/// Syntactic address check, deliberately loose: one `@`, non-empty local
/// part, a dot somewhere in the domain part, no whitespace.
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    if address.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

/// Split a pasted recipient blob (newlines, commas, semicolons, spaces)
/// into lowercased, deduplicated, syntactically valid addresses,
/// preserving first-seen order.
#[must_use]
pub fn sanitize_recipient_list(raw: &str) -> Vec<String> {
    let mut seen = AHashSet::new();
    let mut out = Vec::new();
    for piece in raw.split(|c: char| c == '\n' || c == '\r' || c == ',' || c == ';' || c == ' ') {
        let address = piece.trim().to_ascii_lowercase();
        if is_valid_address(&address) && seen.insert(address.clone()) {
            out.push(address);
        }
    }
    out
}

/// Parse a block of sender-profile lines, dropping invalid ones.
#[must_use]
pub fn parse_sender_lines(raw: &str) -> Vec<SenderProfile> {
    raw.lines().filter_map(SenderProfile::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_profile_forms() {
        let named = SenderProfile::parse("Jo Mail <jo@sender.example>").unwrap();
        assert_eq!(named.name, "Jo Mail");
        assert_eq!(named.address, "jo@sender.example");

        let piped = SenderProfile::parse("jo@sender.example | Jo Mail").unwrap();
        assert_eq!(piped.name, "Jo Mail");
        assert_eq!(piped.address, "jo@sender.example");

        let bare = SenderProfile::parse("jo@sender.example").unwrap();
        assert!(bare.name.is_empty());
    }

    #[test]
    fn test_sender_profile_rejects_invalid() {
        assert!(SenderProfile::parse("not-an-address").is_none());
        assert!(SenderProfile::parse("Broken <nodomain@>").is_none());
    }

    #[test]
    fn test_sender_profile_lowercases_address() {
        let profile = SenderProfile::parse("Jo <JO@Sender.Example>").unwrap();
        assert_eq!(profile.address, "jo@sender.example");
        assert_eq!(profile.domain().as_str(), "sender.example");
    }

    #[test]
    fn test_sanitize_recipient_list() {
        let raw = "A@example.com\nb@example.com, a@example.com; bogus\nc@mail.example.org";
        let list = sanitize_recipient_list(raw);
        assert_eq!(
            list,
            vec!["a@example.com", "b@example.com", "c@mail.example.org"]
        );
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("user@example.com"));
        assert!(!is_valid_address("user@localhost"));
        assert!(!is_valid_address("user @example.com"));
        assert!(!is_valid_address("@example.com"));
        assert!(!is_valid_address("user@.example.com"));
    }
}

//! Record normalisation: outcome aliases, field extraction, and the
//! dedup content hash.

use sha2::{Digest, Sha256};

use drover_common::{CampaignId, OutcomeKind};

use crate::bridge::RawRecord;

/// Map the bridge's outcome spellings onto [`OutcomeKind`].
///
/// Single letters come from the MTA's accounting record types; the
/// longer aliases from downstream normalisers. Anything unrecognised is
/// `Unknown`, which is still ingested and counted.
#[must_use]
pub fn normalize_outcome(raw: &str) -> OutcomeKind {
    match raw.trim().to_ascii_lowercase().as_str() {
        "d" | "delivered" | "delivery" | "success" => OutcomeKind::Delivered,
        "b" | "bounce" | "bounced" | "hardbounce" | "softbounce" => OutcomeKind::Bounced,
        "t" | "defer" | "deferred" | "deferral" | "transient" => OutcomeKind::Deferred,
        "c" | "complaint" | "complained" | "fbl" => OutcomeKind::Complained,
        _ => OutcomeKind::Unknown,
    }
}

/// Stable content hash for replay protection: line endings normalised
/// to `\n`, then SHA-256 over the text, hex-encoded.
#[must_use]
pub fn content_hash(record: &RawRecord) -> String {
    let normalised = record.raw_text().replace("\r\n", "\n").replace('\r', "\n");
    let digest = Sha256::digest(normalised.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// One record decoded into the fields the pipeline acts on. Ephemeral;
/// nothing beyond the hash and the counter delta outlives the batch.
#[derive(Debug, Clone)]
pub struct AccountingEvent {
    pub recipient: Option<String>,
    pub outcome: OutcomeKind,
    /// Explicit job-id field, highest-priority resolution input.
    pub explicit_job: Option<String>,
    /// Message identifier, mined for an embedded job token.
    pub message_id: Option<String>,
    /// Campaign id, the last-resort resolution input.
    pub campaign_id: Option<CampaignId>,
    pub hash: String,
}

impl AccountingEvent {
    #[must_use]
    pub fn from_record(record: &RawRecord) -> Self {
        let outcome = record
            .field(&["type", "event", "kind", "record", "status"])
            .map_or(OutcomeKind::Unknown, |s| normalize_outcome(&s));

        Self {
            recipient: record.field(&["rcpt", "recipient", "to", "rcpt-to"]),
            outcome,
            explicit_job: record.field(&["x-job-id", "job-id", "jobid"]),
            message_id: record.field(&["message-id", "msgid", "orig-message-id"]),
            campaign_id: record
                .field(&["x-campaign-id", "campaign-id", "cid"])
                .map(|s| CampaignId::new(&s)),
            hash: content_hash(record),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> RawRecord {
        let mut map = serde_json::Map::new();
        for (k, v) in pairs {
            map.insert((*k).to_string(), serde_json::Value::String((*v).to_string()));
        }
        RawRecord(map)
    }

    #[test]
    fn test_outcome_aliases() {
        assert_eq!(normalize_outcome("D"), OutcomeKind::Delivered);
        assert_eq!(normalize_outcome("delivery"), OutcomeKind::Delivered);
        assert_eq!(normalize_outcome("b"), OutcomeKind::Bounced);
        assert_eq!(normalize_outcome("hardbounce"), OutcomeKind::Bounced);
        assert_eq!(normalize_outcome("T"), OutcomeKind::Deferred);
        assert_eq!(normalize_outcome("fbl"), OutcomeKind::Complained);
        assert_eq!(normalize_outcome("rb"), OutcomeKind::Unknown);
        assert_eq!(normalize_outcome(""), OutcomeKind::Unknown);
    }

    #[test]
    fn test_content_hash_normalises_line_endings() {
        let unix = record(&[("raw", "D,a@example.com\nsecond")]);
        let dos = record(&[("raw", "D,a@example.com\r\nsecond")]);
        let mac = record(&[("raw", "D,a@example.com\rsecond")]);
        assert_eq!(content_hash(&unix), content_hash(&dos));
        assert_eq!(content_hash(&unix), content_hash(&mac));

        let other = record(&[("raw", "D,b@example.com")]);
        assert_ne!(content_hash(&unix), content_hash(&other));
    }

    #[test]
    fn test_event_extraction() {
        let rec = record(&[
            ("type", "d"),
            ("rcpt", "user@example.com"),
            ("header_x-job-id", "01ARZ3NDEKTSV4RRFFQ69G5FAV"),
            ("header_x-campaign-id", "camp-9"),
            ("message-id", "<ab12.01ARZ3NDEKTSV4RRFFQ69G5FAV@send.example>"),
        ]);

        let event = AccountingEvent::from_record(&rec);
        assert_eq!(event.outcome, OutcomeKind::Delivered);
        assert_eq!(event.recipient.as_deref(), Some("user@example.com"));
        assert_eq!(
            event.explicit_job.as_deref(),
            Some("01ARZ3NDEKTSV4RRFFQ69G5FAV")
        );
        assert_eq!(
            event.campaign_id.as_ref().map(CampaignId::as_str),
            Some("camp-9")
        );
        assert_eq!(event.hash.len(), 64);
    }
}

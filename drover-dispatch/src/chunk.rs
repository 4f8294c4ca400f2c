//! The chunk: one dispatch attempt's worth of recipients from one
//! bucket, one sender.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use drover_common::{Domain, JobId, SenderProfile};

/// Chunk lifecycle. `Sent` and `Abandoned` are terminal; the engine
/// advances the bucket cursor only on those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Attempting,
    RetryWait,
    Sent,
    Abandoned,
}

/// Ephemeral unit of work built by the engine and driven by the
/// scheduler. Never persisted; only the counters it contributes to the
/// job outlive it.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub job_id: JobId,
    pub domain: Domain,
    pub recipients: Vec<String>,
    /// Index into the job's sender list, fixed when the chunk is built;
    /// rotated per retry to route around a failing pairing.
    pub sender_index: usize,
    /// Index into the job's content variants; rotated with the sender.
    pub variant_index: usize,
    pub attempt: u32,
    pub state: ChunkState,
}

impl Chunk {
    #[must_use]
    pub fn new(
        job_id: JobId,
        domain: Domain,
        recipients: Vec<String>,
        sender_index: usize,
    ) -> Self {
        Self {
            job_id,
            domain,
            recipients,
            sender_index,
            variant_index: sender_index,
            attempt: 0,
            state: ChunkState::Pending,
        }
    }

    /// The sender this attempt goes out under.
    #[must_use]
    pub fn sender<'a>(&self, senders: &'a [SenderProfile]) -> Option<&'a SenderProfile> {
        if senders.is_empty() {
            None
        } else {
            senders.get(self.sender_index % senders.len())
        }
    }

    /// Rotate sender and content variant for the next attempt.
    pub const fn rotate_variant(&mut self) {
        self.sender_index = self.sender_index.wrapping_add(1);
        self.variant_index = self.variant_index.wrapping_add(1);
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.recipients.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

/// Per-recipient token for message identifiers.
///
/// The full identifier is stamped `<{token}.{job_id}@{sender domain}>`;
/// the accounting resolver recovers the job id from the last
/// dot-separated segment of the local part.
#[must_use]
pub fn message_token(job_id: JobId, recipient: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(recipient.as_bytes());
    let digest = hasher.finalize();

    // 10 hex chars is plenty: the token only disambiguates recipients
    // within one job.
    digest.iter().take(5).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_wraps_modulo_list() {
        let senders = vec![
            SenderProfile::parse("a@s.example").unwrap(),
            SenderProfile::parse("b@s.example").unwrap(),
        ];
        let mut chunk = Chunk::new(
            JobId::new(),
            Domain::new("example.com"),
            vec!["x@example.com".to_string()],
            1,
        );
        assert_eq!(chunk.sender(&senders).unwrap().address, "b@s.example");

        chunk.rotate_variant();
        assert_eq!(chunk.sender(&senders).unwrap().address, "a@s.example");
        assert_eq!(chunk.variant_index, 2);
    }

    #[test]
    fn test_sender_empty_list() {
        let chunk = Chunk::new(JobId::new(), Domain::new("example.com"), vec![], 0);
        assert!(chunk.sender(&[]).is_none());
    }

    #[test]
    fn test_message_token_deterministic_per_job_and_recipient() {
        let job = JobId::new();
        let token = message_token(job, "user@example.com");
        assert_eq!(token, message_token(job, "user@example.com"));
        assert_ne!(token, message_token(job, "other@example.com"));
        assert_eq!(token.len(), 10);
    }
}

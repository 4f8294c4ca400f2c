//! Recipient partitioning into per-destination-domain buckets.

use ahash::{AHashMap, AHashSet};

use drover_common::Domain;

/// Ordered queue of one destination domain's recipients within a job.
///
/// The cursor marks dispatch progress and only ever moves forward, on
/// terminal chunk state. At most one chunk per bucket is in flight.
#[derive(Debug, Clone)]
pub struct DestinationBucket {
    pub domain: Domain,
    recipients: Vec<String>,
    cursor: usize,
    in_flight: bool,
}

impl DestinationBucket {
    #[must_use]
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            recipients: Vec::new(),
            cursor: 0,
            in_flight: false,
        }
    }

    pub fn push(&mut self, recipient: String) {
        self.recipients.push(recipient);
    }

    /// Recipients not yet covered by a terminal chunk.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.recipients.len() - self.cursor
    }

    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Take up to `max` recipients for a chunk, without advancing the
    /// cursor, and mark the bucket busy.
    pub fn begin_chunk(&mut self, max: usize) -> Vec<String> {
        debug_assert!(!self.in_flight);
        let end = (self.cursor + max.max(1)).min(self.recipients.len());
        let slice = self.recipients[self.cursor..end].to_vec();
        if !slice.is_empty() {
            self.in_flight = true;
        }
        slice
    }

    /// Terminal chunk state: advance the cursor past the chunk and free
    /// the bucket.
    pub fn finish_chunk(&mut self, chunk_len: usize) {
        self.cursor = (self.cursor + chunk_len).min(self.recipients.len());
        self.in_flight = false;
    }

    /// Halted mid-retry (job stop): free the bucket without advancing.
    pub const fn release_chunk(&mut self) {
        self.in_flight = false;
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.recipients.len()
    }
}

/// Result of partitioning a campaign's recipient list.
#[derive(Debug)]
pub struct PartitionOutcome {
    /// Buckets in first-sighting order of their domain.
    pub buckets: Vec<DestinationBucket>,
    /// Recipients dropped at partition time (suppressed or unparsable),
    /// counted on the job's `skipped` counter.
    pub skipped: u64,
    pub total: u64,
}

/// Partition recipients by destination domain, preserving order within
/// each bucket and creating buckets lazily in first-sighting order.
#[must_use]
pub fn partition_recipients(
    recipients: &[String],
    suppressed: &AHashSet<String>,
) -> PartitionOutcome {
    let mut buckets: Vec<DestinationBucket> = Vec::new();
    let mut index: AHashMap<Domain, usize> = AHashMap::new();
    let mut skipped = 0u64;

    for recipient in recipients {
        let Some(domain) = Domain::of_address(recipient) else {
            skipped += 1;
            continue;
        };
        if suppressed.contains(recipient) {
            skipped += 1;
            continue;
        }

        let slot = *index.entry(domain.clone()).or_insert_with(|| {
            buckets.push(DestinationBucket::new(domain));
            buckets.len() - 1
        });
        buckets[slot].push(recipient.clone());
    }

    PartitionOutcome {
        buckets,
        skipped,
        total: recipients.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_buckets_in_first_sighting_order() {
        let recipients = addresses(&[
            "a@gmail.example",
            "b@yahoo.example",
            "c@gmail.example",
            "d@corp.example",
        ]);
        let outcome = partition_recipients(&recipients, &AHashSet::new());

        let domains: Vec<&str> = outcome.buckets.iter().map(|b| b.domain.as_str()).collect();
        assert_eq!(domains, vec!["gmail.example", "yahoo.example", "corp.example"]);
        assert_eq!(outcome.buckets[0].remaining(), 2);
    }

    #[test]
    fn test_suppressed_and_malformed_are_skipped() {
        let mut suppressed = AHashSet::new();
        suppressed.insert("b@yahoo.example".to_string());

        let recipients = addresses(&["a@gmail.example", "b@yahoo.example", "broken"]);
        let outcome = partition_recipients(&recipients, &suppressed);

        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.buckets.len(), 1);
    }

    #[test]
    fn test_cursor_advances_only_on_finish() {
        let recipients = addresses(&["a@x.example", "b@x.example", "c@x.example"]);
        let outcome = partition_recipients(&recipients, &AHashSet::new());
        let mut bucket = outcome.buckets.into_iter().next().unwrap();

        let chunk = bucket.begin_chunk(2);
        assert_eq!(chunk, vec!["a@x.example", "b@x.example"]);
        assert!(bucket.is_in_flight());
        assert_eq!(bucket.remaining(), 3, "cursor untouched while in flight");

        bucket.finish_chunk(chunk.len());
        assert_eq!(bucket.remaining(), 1);
        assert!(!bucket.is_in_flight());
    }

    #[test]
    fn test_release_keeps_cursor() {
        let recipients = addresses(&["a@x.example", "b@x.example"]);
        let outcome = partition_recipients(&recipients, &AHashSet::new());
        let mut bucket = outcome.buckets.into_iter().next().unwrap();

        let chunk = bucket.begin_chunk(2);
        assert_eq!(chunk.len(), 2);
        bucket.release_chunk();
        assert_eq!(bucket.remaining(), 2);
        assert!(!bucket.is_in_flight());
    }
}

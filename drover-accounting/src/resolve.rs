//! Job resolution: an ordered chain of strategies mapping one
//! accounting event onto the job whose counters it credits.

use std::sync::Arc;

use tracing::trace;

use drover_common::{CampaignId, Job, JobId};

use crate::record::AccountingEvent;

/// The registry view the resolver chain needs: lookup by id and the
/// campaign's active jobs, most recently started first.
pub trait ActiveJobs: Send + Sync + std::fmt::Debug {
    fn find(&self, id: JobId) -> Option<Arc<Job>>;

    fn active_for_campaign(&self, campaign_id: &CampaignId) -> Vec<Arc<Job>>;
}

/// One resolution strategy. Strategies are pure lookups; the chain
/// tries them in fixed priority order.
pub trait JobResolver: Send + Sync + std::fmt::Debug {
    fn resolve(&self, event: &AccountingEvent, jobs: &dyn ActiveJobs) -> Option<Arc<Job>>;
}

/// Strategy (a): the record carries an explicit job-id field.
#[derive(Debug, Default)]
pub struct ExplicitJobIdResolver;

impl JobResolver for ExplicitJobIdResolver {
    fn resolve(&self, event: &AccountingEvent, jobs: &dyn ActiveJobs) -> Option<Arc<Job>> {
        let id = JobId::parse(event.explicit_job.as_deref()?)?;
        jobs.find(id)
    }
}

/// Strategy (b): a job token embedded in the message identifier.
///
/// Identifiers are stamped `<{token}.{job_id}@{domain}>` at dispatch
/// time; the last dot-separated segment of the local part that parses
/// as a job id wins.
#[derive(Debug, Default)]
pub struct MessageIdResolver;

impl MessageIdResolver {
    fn job_token(message_id: &str) -> Option<JobId> {
        let local = message_id
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .split('@')
            .next()?;
        local.rsplit('.').find_map(JobId::parse)
    }
}

impl JobResolver for MessageIdResolver {
    fn resolve(&self, event: &AccountingEvent, jobs: &dyn ActiveJobs) -> Option<Arc<Job>> {
        let id = Self::job_token(event.message_id.as_deref()?)?;
        jobs.find(id)
    }
}

/// Strategy (c): fall back to the campaign id. With multiple active
/// jobs (the forced-duplicate escape hatch) the most recently started
/// one gets the credit.
#[derive(Debug, Default)]
pub struct CampaignFallbackResolver;

impl JobResolver for CampaignFallbackResolver {
    fn resolve(&self, event: &AccountingEvent, jobs: &dyn ActiveJobs) -> Option<Arc<Job>> {
        let campaign_id = event.campaign_id.as_ref()?;
        jobs.active_for_campaign(campaign_id).into_iter().next()
    }
}

/// The fixed-priority chain.
#[derive(Debug)]
pub struct ResolverChain {
    resolvers: Vec<Box<dyn JobResolver>>,
}

impl ResolverChain {
    #[must_use]
    pub fn new(resolvers: Vec<Box<dyn JobResolver>>) -> Self {
        Self { resolvers }
    }

    pub fn resolve(&self, event: &AccountingEvent, jobs: &dyn ActiveJobs) -> Option<Arc<Job>> {
        for resolver in &self.resolvers {
            if let Some(job) = resolver.resolve(event, jobs) {
                trace!(job = %job.id, "record resolved");
                return Some(job);
            }
        }
        None
    }
}

impl Default for ResolverChain {
    /// Explicit job id, then message-id token, then campaign fallback.
    fn default() -> Self {
        Self::new(vec![
            Box::new(ExplicitJobIdResolver),
            Box::new(MessageIdResolver),
            Box::new(CampaignFallbackResolver),
        ])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use drover_common::{Campaign, JobStatus, OutcomeKind};

    #[derive(Debug, Default)]
    struct StubJobs {
        jobs: Vec<Arc<Job>>,
    }

    impl ActiveJobs for StubJobs {
        fn find(&self, id: JobId) -> Option<Arc<Job>> {
            self.jobs.iter().find(|j| j.id == id).cloned()
        }

        fn active_for_campaign(&self, campaign_id: &CampaignId) -> Vec<Arc<Job>> {
            let mut jobs: Vec<Arc<Job>> = self
                .jobs
                .iter()
                .filter(|j| &j.campaign_id == campaign_id && j.status().is_active())
                .cloned()
                .collect();
            jobs.sort_by(|a, b| {
                b.started_at
                    .cmp(&a.started_at)
                    .then_with(|| b.id.to_string().cmp(&a.id.to_string()))
            });
            jobs
        }
    }

    fn job(campaign: &str) -> Arc<Job> {
        let campaign = Campaign {
            id: CampaignId::new(campaign),
            name: String::new(),
            recipients: vec![],
            subjects: vec![],
            senders: vec![],
            chunk_size: None,
            worker_limit: None,
        };
        let job = Job::new(&campaign, 50, 4);
        job.set_status(JobStatus::Running);
        Arc::new(job)
    }

    fn event(
        explicit_job: Option<String>,
        message_id: Option<String>,
        campaign_id: Option<&str>,
    ) -> AccountingEvent {
        AccountingEvent {
            recipient: Some("user@example.com".to_string()),
            outcome: OutcomeKind::Delivered,
            explicit_job,
            message_id,
            campaign_id: campaign_id.map(CampaignId::new),
            hash: "h".to_string(),
        }
    }

    #[test]
    fn test_explicit_job_id_wins_over_everything() {
        let job_a = job("camp-1");
        let job_b = job("camp-1");
        let jobs = StubJobs {
            jobs: vec![Arc::clone(&job_a), Arc::clone(&job_b)],
        };

        let event = event(
            Some(job_a.id.to_string()),
            Some(format!("<tok.{}@send.example>", job_b.id)),
            Some("camp-1"),
        );
        let resolved = ResolverChain::default().resolve(&event, &jobs).unwrap();
        assert_eq!(resolved.id, job_a.id);
    }

    #[test]
    fn test_message_id_token_second_priority() {
        let job_a = job("camp-1");
        let jobs = StubJobs {
            jobs: vec![Arc::clone(&job_a)],
        };

        let event = event(
            None,
            Some(format!("<ab12cd.{}@send.example>", job_a.id)),
            None,
        );
        let resolved = ResolverChain::default().resolve(&event, &jobs).unwrap();
        assert_eq!(resolved.id, job_a.id);
    }

    #[test]
    fn test_campaign_fallback_takes_most_recent_active() {
        let older = job("camp-1");
        let newer = job("camp-1");
        let jobs = StubJobs {
            jobs: vec![Arc::clone(&older), Arc::clone(&newer)],
        };

        let event = event(None, None, Some("camp-1"));
        let resolved = ResolverChain::default().resolve(&event, &jobs).unwrap();
        let expected = jobs.active_for_campaign(&CampaignId::new("camp-1"))[0].id;
        assert_eq!(resolved.id, expected);
    }

    #[test]
    fn test_campaign_fallback_skips_inactive() {
        let done = job("camp-1");
        done.set_status(JobStatus::Completed);
        let jobs = StubJobs { jobs: vec![done] };

        let event = event(None, None, Some("camp-1"));
        assert!(ResolverChain::default().resolve(&event, &jobs).is_none());
    }

    #[test]
    fn test_unresolvable_event() {
        let jobs = StubJobs::default();
        let event = event(Some("not-a-job-id".to_string()), None, None);
        assert!(ResolverChain::default().resolve(&event, &jobs).is_none());
    }

    #[test]
    fn test_message_id_token_parsing() {
        let id = JobId::new();
        assert_eq!(
            MessageIdResolver::job_token(&format!("<tok.{id}@x.example>")),
            Some(id)
        );
        assert_eq!(
            MessageIdResolver::job_token(&format!("tok.{id}@x.example")),
            Some(id),
            "angle brackets optional"
        );
        assert!(MessageIdResolver::job_token("<plain@x.example>").is_none());
    }
}

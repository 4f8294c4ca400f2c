//! Job admission and lookup.
//!
//! At most one active job per campaign, unless the caller forces a
//! duplicate (a deliberate escape hatch; both jobs then run
//! independently). Jobs across campaigns never coordinate beyond the
//! shared pressure/domain-health views.

use std::sync::Arc;

use ahash::AHashSet;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use drover_common::{Campaign, CampaignId, Job, JobId, JobView, TuningResolver};
use drover_pressure::{DomainHealthTracker, HealthGateConfig, PressureGauge};
use drover_store::{JobRow, Store};

use crate::{
    bucket::partition_recipients,
    engine::{DispatchEngine, EngineConfig},
    error::DispatchError,
    scheduler::ChunkScheduler,
};

/// Registry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub health_gate: HealthGateConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Addresses never dispatched to; counted as skipped at partition
    /// time. Full suppression management lives with the UI layer.
    #[serde(default)]
    pub suppressed: Vec<String>,
}

/// Tracks jobs per campaign and owns the running engines.
#[derive(Debug)]
pub struct JobRegistry {
    scheduler: Arc<ChunkScheduler>,
    gauge: Arc<PressureGauge>,
    health: Arc<DomainHealthTracker>,
    store: Arc<dyn Store>,
    tuning: Arc<TuningResolver>,
    config: RegistryConfig,
    suppressed: AHashSet<String>,
    jobs: DashMap<JobId, Arc<Job>>,
    engines: DashMap<JobId, Arc<DispatchEngine>>,
    by_campaign: DashMap<CampaignId, Vec<JobId>>,
}

impl JobRegistry {
    #[must_use]
    pub fn new(
        scheduler: Arc<ChunkScheduler>,
        gauge: Arc<PressureGauge>,
        health: Arc<DomainHealthTracker>,
        store: Arc<dyn Store>,
        tuning: Arc<TuningResolver>,
        config: RegistryConfig,
    ) -> Self {
        let suppressed = config
            .suppressed
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .collect();
        Self {
            scheduler,
            gauge,
            health,
            store,
            tuning,
            config,
            suppressed,
            jobs: DashMap::new(),
            engines: DashMap::new(),
            by_campaign: DashMap::new(),
        }
    }

    /// Admit and start a job for the campaign.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::DuplicateActiveJob`] when the campaign already
    ///   has an active job and `force` is not set.
    /// - [`DispatchError::Busy`] when the MTA busy gate refuses
    ///   admission under the strict health policy.
    /// - [`DispatchError::NoSenders`] / [`DispatchError::NoRecipients`]
    ///   for campaigns this engine cannot act on.
    /// - [`DispatchError::Store`] when the initial row write fails.
    pub async fn request_start(
        &self,
        campaign: &Campaign,
        force: bool,
    ) -> Result<Arc<Job>, DispatchError> {
        if campaign.senders.is_empty() {
            return Err(DispatchError::NoSenders(campaign.id.clone()));
        }

        if !force && !self.active_for_campaign(&campaign.id).is_empty() {
            return Err(DispatchError::DuplicateActiveJob(campaign.id.clone()));
        }

        let gate_warning = match self.gauge.gate_violation(&self.config.health_gate) {
            Some(reason) if self.config.health_gate.required => {
                return Err(DispatchError::Busy(reason));
            }
            other => other,
        };

        let tuning = self.tuning.effective();
        let job = Arc::new(Job::new(campaign, tuning.chunk_size, tuning.worker_limit));
        if let Some(reason) = gate_warning {
            warn!(job = %job.id, reason = %reason, "starting despite busy MTA");
            job.record_warning(format!("started while busy: {reason}"));
        }

        let partition = partition_recipients(&campaign.recipients, &self.suppressed);
        job.counters.add_skipped(partition.skipped);
        job.set_total_recipients(partition.total);
        if partition.buckets.is_empty() {
            return Err(DispatchError::NoRecipients(campaign.id.clone()));
        }
        let bucket_count = partition.buckets.len();

        // The row must exist before any accounting outcome can land on it.
        self.store.save_job(&JobRow::of_job(&job)).await?;

        let engine = Arc::new(DispatchEngine::new(
            Arc::clone(&job),
            partition,
            Arc::clone(&self.scheduler),
            Arc::clone(&self.gauge),
            Arc::clone(&self.health),
            Arc::clone(&self.store),
            self.config.engine,
        ));

        self.jobs.insert(job.id, Arc::clone(&job));
        self.engines.insert(job.id, Arc::clone(&engine));
        self.by_campaign
            .entry(campaign.id.clone())
            .or_default()
            .push(job.id);

        info!(
            job = %job.id,
            campaign = %campaign.id,
            buckets = bucket_count,
            forced = force,
            "job admitted"
        );
        tokio::spawn(engine.run());

        Ok(job)
    }

    /// Pause the campaign's most recently started active job.
    ///
    /// # Errors
    /// [`DispatchError::NoActiveJob`] when there is nothing to act on.
    pub fn pause(&self, campaign_id: &CampaignId) -> Result<Arc<Job>, DispatchError> {
        self.with_current_engine(campaign_id, DispatchEngine::pause)
    }

    /// Resume the campaign's most recently started active job.
    ///
    /// # Errors
    /// [`DispatchError::NoActiveJob`] when there is nothing to act on.
    pub fn resume(&self, campaign_id: &CampaignId) -> Result<Arc<Job>, DispatchError> {
        self.with_current_engine(campaign_id, DispatchEngine::resume)
    }

    /// Stop the campaign's most recently started active job.
    ///
    /// # Errors
    /// [`DispatchError::NoActiveJob`] when there is nothing to act on.
    pub fn stop(&self, campaign_id: &CampaignId) -> Result<Arc<Job>, DispatchError> {
        self.with_current_engine(campaign_id, DispatchEngine::stop)
    }

    fn with_current_engine(
        &self,
        campaign_id: &CampaignId,
        act: impl Fn(&DispatchEngine),
    ) -> Result<Arc<Job>, DispatchError> {
        let job = self
            .active_for_campaign(campaign_id)
            .into_iter()
            .next()
            .ok_or_else(|| DispatchError::NoActiveJob(campaign_id.clone()))?;
        if let Some(engine) = self.engines.get(&job.id) {
            act(&engine);
        }
        Ok(job)
    }

    #[must_use]
    pub fn find(&self, id: JobId) -> Option<Arc<Job>> {
        self.jobs.get(&id).map(|job| Arc::clone(&job))
    }

    /// Active jobs for the campaign, most recently started first. The
    /// accounting fallback resolver credits the head of this list when
    /// a record carries only a campaign id.
    #[must_use]
    pub fn active_for_campaign(&self, campaign_id: &CampaignId) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = self
            .by_campaign
            .get(campaign_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.jobs.get(id).map(|job| Arc::clone(&job)))
                    .filter(|job| job.status().is_active())
                    .collect()
            })
            .unwrap_or_default();
        // ULID string order breaks started_at ties deterministically.
        jobs.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.to_string().cmp(&a.id.to_string()))
        });
        jobs
    }

    /// Read-only projection of every known job.
    #[must_use]
    pub fn views(&self) -> Vec<JobView> {
        let mut views: Vec<JobView> = self.jobs.iter().map(|job| job.view()).collect();
        views.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        views
    }
}

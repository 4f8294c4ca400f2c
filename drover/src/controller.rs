//! Wires the subsystems together and supervises them.

use std::sync::Arc;

use tokio::{sync::broadcast, task::JoinSet};
use tracing::warn;

use drover_accounting::{AccountingPoller, ActiveJobs, BridgeClient, HttpBridgeClient};
use drover_common::{CampaignId, Job, JobId, Signal, TuningOverlay, TuningResolver, internal, logging};
use drover_control::ControlServer;
use drover_dispatch::{
    ChunkScheduler, ChunkTransport, HttpInjectTransport, JobRegistry, LogTransport, TokioClock,
};
use drover_pressure::{
    DomainHealthTracker, HttpMetricsSource, MetricsSource, PressureGauge, StaticMetricsSource,
};
use drover_store::{FileStore, MemoryStore, Store};

use crate::{
    config::{DroverConfig, StoreConfig},
    control_handler::Handler,
};

/// Adapter giving the accounting resolver chain its registry view.
#[derive(Debug)]
struct RegistryJobs(Arc<JobRegistry>);

impl ActiveJobs for RegistryJobs {
    fn find(&self, id: JobId) -> Option<Arc<Job>> {
        self.0.find(id)
    }

    fn active_for_campaign(&self, campaign_id: &CampaignId) -> Vec<Arc<Job>> {
        self.0.active_for_campaign(campaign_id)
    }
}

/// The assembled control plane.
pub struct Drover {
    config: DroverConfig,
}

impl Drover {
    #[must_use]
    pub const fn new(config: DroverConfig) -> Self {
        Self { config }
    }

    /// Load the configuration file and build the controller.
    ///
    /// # Errors
    /// Configuration I/O or syntax errors.
    pub fn from_config(path: &std::path::Path) -> anyhow::Result<Self> {
        Ok(Self::new(DroverConfig::from_file(path)?))
    }

    /// Run until SIGINT/SIGTERM.
    ///
    /// # Errors
    /// Fails on unrecoverable startup problems (store unusable,
    /// control socket taken); everything after startup degrades per
    /// subsystem instead of exiting.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let config = self.config;

        let store: Arc<dyn Store> = match &config.store {
            StoreConfig::Memory => {
                warn!("memory store configured: counters will not survive restart");
                Arc::new(MemoryStore::new())
            }
            StoreConfig::File { path } => Arc::new(FileStore::open(path.clone()).await?),
        };

        let metrics: Arc<dyn MetricsSource> = match &config.metrics {
            Some(metrics_config) => Arc::new(
                HttpMetricsSource::new(metrics_config)
                    .map_err(|e| anyhow::anyhow!("metrics client: {e}"))?,
            ),
            None => {
                warn!("no metrics endpoint configured, MTA will always read as idle");
                Arc::new(StaticMetricsSource::idle())
            }
        };

        let gauge = Arc::new(PressureGauge::new(
            Arc::clone(&metrics),
            config.pressure.clone(),
        ));
        let health = Arc::new(DomainHealthTracker::new(metrics, config.domain_health));

        let transport: Arc<dyn ChunkTransport> = match &config.inject {
            Some(inject) => Arc::new(
                HttpInjectTransport::new(inject)
                    .map_err(|e| anyhow::anyhow!("inject client: {e}"))?,
            ),
            None => {
                warn!("no injection endpoint configured, dispatch will dry-run");
                Arc::new(LogTransport)
            }
        };

        let scheduler = Arc::new(ChunkScheduler::new(
            Arc::clone(&gauge),
            Arc::clone(&health),
            config.retry,
            transport,
            Arc::new(TokioClock),
        ));

        let tuning = Arc::new(TuningResolver::new(config.tuning, TuningOverlay::from_env()));
        let registry = Arc::new(JobRegistry::new(
            scheduler,
            Arc::clone(&gauge),
            Arc::clone(&health),
            Arc::clone(&store),
            Arc::clone(&tuning),
            config.registry,
        ));

        let poller = match &config.bridge {
            Some(bridge_config) => {
                let bridge: Arc<dyn BridgeClient> = Arc::new(
                    HttpBridgeClient::new(bridge_config)
                        .map_err(|e| anyhow::anyhow!("bridge client: {e}"))?,
                );
                Some(Arc::new(AccountingPoller::new(
                    bridge,
                    Arc::clone(&store),
                    Arc::new(RegistryJobs(Arc::clone(&registry))),
                    Arc::clone(&tuning),
                    config.poller.clone(),
                )))
            }
            None => {
                warn!("no accounting bridge configured, outcomes will not be reconciled");
                None
            }
        };

        let campaigns = config
            .campaigns
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();
        let handler = Arc::new(Handler::new(
            Arc::clone(&registry),
            campaigns,
            poller.clone(),
            Arc::clone(&gauge),
            Arc::clone(&health),
        ));

        let (shutdown_tx, _) = broadcast::channel::<Signal>(16);
        let mut tasks: JoinSet<()> = JoinSet::new();

        {
            let gauge = Arc::clone(&gauge);
            let rx = shutdown_tx.subscribe();
            tasks.spawn(async move { gauge.run(rx).await });
        }
        if let Some(poller) = &poller {
            let poller = Arc::clone(poller);
            let rx = shutdown_tx.subscribe();
            tasks.spawn(async move { poller.run(rx).await });
        }
        {
            let control = config.control.clone();
            let rx = shutdown_tx.subscribe();
            tasks.spawn(async move {
                let server = ControlServer::new(control.socket_path, control.auth, handler);
                if let Err(e) = server.serve(rx).await {
                    warn!(error = %e, "control server exited");
                }
            });
        }

        internal!("drover running");
        wait_for_signal().await;
        internal!("shutting down");

        let _ = shutdown_tx.send(Signal::Shutdown);
        while tasks.join_next().await.is_some() {}
        Ok(())
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(terminate) => terminate,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM, relying on ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

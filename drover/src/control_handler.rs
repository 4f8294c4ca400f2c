//! Maps control-protocol commands onto the running subsystems.

use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;

use drover_accounting::AccountingPoller;
use drover_common::{Campaign, CampaignId};
use drover_control::{
    AccountingCommand, AccountingView, CommandHandler, CursorView, DomainView, JobCommand,
    PressureCommand, PressureView, Request, RequestCommand, Response, ResponsePayload,
    SystemCommand,
};
use drover_dispatch::JobRegistry;
use drover_pressure::{DomainClass, DomainHealthTracker, PressureGauge};

pub(crate) struct Handler {
    registry: Arc<JobRegistry>,
    campaigns: AHashMap<CampaignId, Campaign>,
    poller: Option<Arc<AccountingPoller>>,
    gauge: Arc<PressureGauge>,
    health: Arc<DomainHealthTracker>,
}

impl Handler {
    pub(crate) fn new(
        registry: Arc<JobRegistry>,
        campaigns: AHashMap<CampaignId, Campaign>,
        poller: Option<Arc<AccountingPoller>>,
        gauge: Arc<PressureGauge>,
        health: Arc<DomainHealthTracker>,
    ) -> Self {
        Self {
            registry,
            campaigns,
            poller,
            gauge,
            health,
        }
    }

    async fn handle_job(&self, command: JobCommand) -> Response {
        match command {
            JobCommand::Start { campaign_id, force } => {
                let id = CampaignId::new(&campaign_id);
                let Some(campaign) = self.campaigns.get(&id) else {
                    return Response::error(format!("unknown campaign {campaign_id}"));
                };
                match self.registry.request_start(campaign, force).await {
                    Ok(job) => Response::payload(ResponsePayload::Jobs(vec![job.view()])),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            JobCommand::Pause { campaign_id } => {
                match self.registry.pause(&CampaignId::new(&campaign_id)) {
                    Ok(job) => Response::ok(format!("job {} paused", job.id)),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            JobCommand::Resume { campaign_id } => {
                match self.registry.resume(&CampaignId::new(&campaign_id)) {
                    Ok(job) => Response::ok(format!("job {} resumed", job.id)),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            JobCommand::Stop { campaign_id } => {
                match self.registry.stop(&CampaignId::new(&campaign_id)) {
                    Ok(job) => Response::ok(format!("job {} stopping", job.id)),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            JobCommand::Status { campaign_id } => {
                let views = match campaign_id {
                    Some(campaign_id) => {
                        let id = CampaignId::new(&campaign_id);
                        self.registry
                            .views()
                            .into_iter()
                            .filter(|v| v.campaign_id == id)
                            .collect()
                    }
                    None => self.registry.views(),
                };
                Response::payload(ResponsePayload::Jobs(views))
            }
        }
    }

    async fn handle_accounting(&self, command: AccountingCommand) -> Response {
        let Some(poller) = &self.poller else {
            return Response::error("no accounting bridge configured");
        };

        match command {
            AccountingCommand::PullNow => {
                poller.trigger();
                Response::ok("pull scheduled")
            }
            AccountingCommand::Status => {
                let cursor = poller.cursor_row().await.map(|state| CursorView {
                    source_kind: state.source_kind,
                    cursor_token: state.cursor_token,
                    last_poll_time: state.last_poll_time,
                    events_received: state.events_received,
                    events_ingested: state.events_ingested,
                    duplicates_dropped: state.duplicates_dropped,
                    job_not_found: state.job_not_found,
                    db_write_failures: state.db_write_failures,
                    last_error: state.last_error,
                });

                let mut view = AccountingView {
                    cursor,
                    ..Default::default()
                };
                match poller.bridge_status().await {
                    Ok(status) => {
                        view.bridge_reachable = true;
                        view.bridge_last_source = status.last_source;
                        view.bridge_parsed = status.parsed;
                        view.bridge_skipped = status.skipped;
                        view.bridge_unknown_outcome = status.unknown_outcome;
                        view.bridge_last_error = status.last_error;
                    }
                    Err(e) => {
                        view.bridge_reachable = false;
                        view.bridge_last_error = Some(e.to_string());
                    }
                }
                Response::payload(ResponsePayload::Accounting(view))
            }
        }
    }

    async fn handle_pressure(&self) -> Response {
        let snapshot = self.gauge.current();
        let domains = self
            .health
            .snapshot()
            .await
            .into_iter()
            .map(|status| DomainView {
                domain: status.domain.to_string(),
                class: match status.class {
                    DomainClass::Normal => "normal".to_string(),
                    DomainClass::Slow => "slow".to_string(),
                    DomainClass::Backoff => "backoff".to_string(),
                },
                deferrals: status.deferrals,
                errors: status.errors,
            })
            .collect();

        Response::payload(ResponsePayload::Pressure(PressureView {
            level: snapshot.level,
            stale: snapshot.stale,
            sampled_at: Some(snapshot.sampled_at),
            queued_recipients: snapshot.summary.queued_recipients,
            queued_messages: snapshot.summary.queued_messages,
            spool_recipients: snapshot.summary.spool_recipients,
            spool_messages: snapshot.summary.spool_messages,
            deferred_count: snapshot.summary.deferred_count,
            domains,
        }))
    }
}

#[async_trait]
impl CommandHandler for Handler {
    async fn handle_request(&self, request: Request) -> drover_control::Result<Response> {
        Ok(match request.command {
            RequestCommand::Job(command) => self.handle_job(command).await,
            RequestCommand::Accounting(command) => self.handle_accounting(command).await,
            RequestCommand::Pressure(PressureCommand::Status) => self.handle_pressure().await,
            RequestCommand::System(SystemCommand::Ping) => Response::ok("pong"),
        })
    }
}

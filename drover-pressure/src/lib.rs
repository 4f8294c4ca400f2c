//! Backpressure inputs for the dispatch scheduler.
//!
//! Two read-mostly views over the MTA's self-reported load, sampled on
//! independent cadences:
//!
//! - [`PressureGauge`] turns queue/spool/deferred counts into a discrete
//!   pressure level (0 to 3) with a parameter bundle per level.
//! - [`DomainHealthTracker`] classifies individual destination domains
//!   as normal, slow, or backoff from per-domain deferral/error counts.
//!
//! Both fail open: an unreachable metrics endpoint degrades to the last
//! known state, never to a stalled dispatcher, unless strict mode is
//! configured on the gauge.

mod domain_health;
mod error;
mod gauge;
mod source;

pub use domain_health::{DomainClass, DomainHealthConfig, DomainHealthTracker, DomainStatus};
pub use error::MetricsError;
pub use gauge::{
    EffectiveParams, HealthGateConfig, LevelParams, PressureConfig, PressureGauge,
    PressureSnapshot, PressureThresholds,
};
pub use source::{
    DomainDetail, HttpMetricsSource, MetricsSource, MetricsSourceConfig, QueueSummary,
    StaticMetricsSource,
};

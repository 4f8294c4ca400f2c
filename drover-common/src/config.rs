//! Layered runtime tuning.
//!
//! The knobs that operators adjust while jobs are running resolve
//! through three layers, highest precedence first: runtime overrides
//! (set through the control surface), process environment, built-in
//! defaults. Components hold a shared resolver and consult
//! [`TuningResolver::effective`] once per dispatch or poll cycle rather
//! than caching values.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Fully-resolved tuning values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuning {
    /// Recipients per chunk before pressure caps apply.
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: u32,

    /// Concurrent chunks per job before pressure caps apply.
    #[serde(default = "defaults::worker_limit")]
    pub worker_limit: u32,

    /// Steady-state accounting poll interval.
    #[serde(default = "defaults::accounting_interval_secs")]
    pub accounting_interval_secs: u64,

    /// Record limit per bridge pull.
    #[serde(default = "defaults::accounting_max_records")]
    pub accounting_max_records: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            chunk_size: defaults::chunk_size(),
            worker_limit: defaults::worker_limit(),
            accounting_interval_secs: defaults::accounting_interval_secs(),
            accounting_max_records: defaults::accounting_max_records(),
        }
    }
}

mod defaults {
    pub const fn chunk_size() -> u32 {
        50
    }

    pub const fn worker_limit() -> u32 {
        8
    }

    pub const fn accounting_interval_secs() -> u64 {
        30
    }

    pub const fn accounting_max_records() -> u32 {
        500
    }
}

/// One layer of partial overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningOverlay {
    #[serde(default)]
    pub chunk_size: Option<u32>,
    #[serde(default)]
    pub worker_limit: Option<u32>,
    #[serde(default)]
    pub accounting_interval_secs: Option<u64>,
    #[serde(default)]
    pub accounting_max_records: Option<u32>,
}

impl TuningOverlay {
    /// Read the environment layer from `DROVER_*` variables. Unparseable
    /// values are ignored rather than fatal.
    #[must_use]
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok()?.trim().parse().ok()
        }

        Self {
            chunk_size: var("DROVER_CHUNK_SIZE"),
            worker_limit: var("DROVER_WORKER_LIMIT"),
            accounting_interval_secs: var("DROVER_ACCOUNTING_INTERVAL_SECS"),
            accounting_max_records: var("DROVER_ACCOUNTING_MAX_RECORDS"),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Resolver holding the three layers. Shared (`Arc`) between the
/// controller, the dispatch engines, and the accounting poller.
#[derive(Debug)]
pub struct TuningResolver {
    defaults: Tuning,
    env: TuningOverlay,
    runtime: RwLock<TuningOverlay>,
}

impl TuningResolver {
    #[must_use]
    pub fn new(defaults: Tuning, env: TuningOverlay) -> Self {
        Self {
            defaults,
            env,
            runtime: RwLock::new(TuningOverlay::default()),
        }
    }

    /// Replace the runtime override layer.
    pub fn set_runtime(&self, overlay: TuningOverlay) {
        *self.runtime.write() = overlay;
    }

    /// Resolve current effective values: runtime > env > defaults.
    #[must_use]
    pub fn effective(&self) -> Tuning {
        let runtime = *self.runtime.read();
        Tuning {
            chunk_size: runtime
                .chunk_size
                .or(self.env.chunk_size)
                .unwrap_or(self.defaults.chunk_size),
            worker_limit: runtime
                .worker_limit
                .or(self.env.worker_limit)
                .unwrap_or(self.defaults.worker_limit),
            accounting_interval_secs: runtime
                .accounting_interval_secs
                .or(self.env.accounting_interval_secs)
                .unwrap_or(self.defaults.accounting_interval_secs),
            accounting_max_records: runtime
                .accounting_max_records
                .or(self.env.accounting_max_records)
                .unwrap_or(self.defaults.accounting_max_records),
        }
    }
}

impl Default for TuningResolver {
    fn default() -> Self {
        Self::new(Tuning::default(), TuningOverlay::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_no_overlays() {
        let resolver = TuningResolver::default();
        assert_eq!(resolver.effective(), Tuning::default());
    }

    #[test]
    fn test_env_layer_beats_defaults() {
        let env = TuningOverlay {
            chunk_size: Some(100),
            ..Default::default()
        };
        let resolver = TuningResolver::new(Tuning::default(), env);
        let effective = resolver.effective();
        assert_eq!(effective.chunk_size, 100);
        assert_eq!(effective.worker_limit, Tuning::default().worker_limit);
    }

    #[test]
    fn test_runtime_layer_beats_env() {
        let env = TuningOverlay {
            chunk_size: Some(100),
            worker_limit: Some(2),
            ..Default::default()
        };
        let resolver = TuningResolver::new(Tuning::default(), env);
        resolver.set_runtime(TuningOverlay {
            chunk_size: Some(25),
            ..Default::default()
        });

        let effective = resolver.effective();
        assert_eq!(effective.chunk_size, 25);
        assert_eq!(effective.worker_limit, 2);
    }

    #[test]
    fn test_runtime_layer_can_be_cleared() {
        let resolver = TuningResolver::default();
        resolver.set_runtime(TuningOverlay {
            worker_limit: Some(1),
            ..Default::default()
        });
        assert_eq!(resolver.effective().worker_limit, 1);

        resolver.set_runtime(TuningOverlay::default());
        assert_eq!(
            resolver.effective().worker_limit,
            Tuning::default().worker_limit
        );
    }
}

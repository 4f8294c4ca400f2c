//! Timer abstraction.
//!
//! The scheduler's retry waits go through this trait instead of calling
//! `tokio::time::sleep` directly, so tests drive the state machine on
//! paused virtual time.

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Production clock over the tokio timer (which tests can pause).
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

//! Operator control surface for a running drover instance.
//!
//! IPC over a Unix domain socket with length-prefixed bincode frames:
//! job lifecycle commands per campaign, accounting pull-now and status,
//! pressure/domain-health status, and a system ping. Everything a
//! status command returns is a read-only projection.

pub mod auth;
pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use auth::ControlAuthConfig;
pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{
    AccountingCommand, AccountingView, CursorView, DomainView, JobCommand, PROTOCOL_VERSION,
    PressureCommand, PressureView, Request, RequestCommand, Response, ResponsePayload,
    SystemCommand,
};
pub use server::{CommandHandler, ControlServer};

/// Default path for the control socket.
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/drover.sock";

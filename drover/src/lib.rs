//! Drover: control plane for bulk-email dispatch in front of an
//! external MTA.
//!
//! This crate wires the pieces together: configuration, the pressure
//! sampler, the per-job dispatch engines, the accounting poller, and
//! the operator control surface.

pub mod config;
mod control_handler;
pub mod controller;

pub use config::DroverConfig;
pub use controller::Drover;

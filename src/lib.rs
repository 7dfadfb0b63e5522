//! # Triage
//!
//! Error-report deduplication and issue lifecycle engine. Reports are
//! fingerprinted and folded into one record per distinct error; the
//! orchestrator keeps a tracker issue per record open, quiet, reopened or
//! closed as the error comes and goes.

pub mod clock;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod intake;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod repositories;
pub mod scheduler;
pub mod settings;
pub mod telemetry;
pub mod tracker;
pub use migration;

// src/lib.rs
//! Imports timesheet data from a PSA system and keeps per-employee,
//! per-fiscal-month worked/logged/billed totals up to date.

pub mod agents;
pub mod aggregator;
pub mod classification;
pub mod config;
pub mod export;
pub mod fiscal;
pub mod models;
pub mod psa_client;
pub mod reconciler;
pub mod records;
pub mod server;
pub mod store;
pub mod sync;
pub mod worked_hours;

mod sync_tests;

pub use config::AppConfig;
pub use psa_client::{PsaClient, TimeSource};
pub use store::{FileStore, TimeStore};
pub use sync::{SyncOptions, SyncOrchestrator, SyncOutcome, SyncReport, SyncTarget};

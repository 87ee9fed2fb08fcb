//! Eventflow Builder
//!
//! The build worker fleet: transforms pending build jobs into terminal
//! outcomes by dispatching isolated build workloads on the orchestrator,
//! observing them to completion, and reporting status back to the store.
//!
//! Architecture:
//! - Configuration: settings from environment or defaults
//! - Worker: event path (bus subscription) and recovery path (store poll)
//! - Dispatch: build task construction (fetch / dind / pack)
//! - Monitor: status polling with a wall-clock budget
//!
//! Workers compete freely; the store's conditional `pending -> building`
//! claim guarantees that at most one worker processes a given job.

pub mod config;
pub mod dispatch;
pub mod monitor;
pub mod worker;

pub use config::Config;
pub use worker::BuildWorker;

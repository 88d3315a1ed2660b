//! # Intake Common Library
//!
//! Shared code for the intake hub and admin desk sessions:
//! - Submission data model and per-form payloads
//! - SLA clock (deadline computation and classification)
//! - Audit diff/fold over field snapshots
//! - Change events and the EventBus
//! - View derivation (filter + sort)
//! - Bulk operation reports and the backend trait
//! - Configuration loading and database bootstrap

pub mod api;
pub mod audit;
pub mod bulk;
pub mod change;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod model;
pub mod payload;
pub mod sla;
pub mod time;
pub mod view;

pub use error::{Error, ErrorKind, Result};
pub use model::{AdminId, Priority, Submission, SubmissionStatus};

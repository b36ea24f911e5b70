//! Rollcall Common Library
//!
//! Shared code for all Rollcall services including:
//! - Database models and the attendance store abstraction
//! - Mail transport abstraction
//! - Error types and handling
//! - Configuration management
//! - Caller context extraction
//! - Metrics and observability
//! - Clock abstraction

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod mail;
pub mod metrics;
pub mod store;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use mail::Mailer;
pub use store::{AttendanceStore, CheckIn, MemoryStore, PgStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

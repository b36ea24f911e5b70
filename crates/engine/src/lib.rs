//! Rollcall Attendance Engine
//!
//! The session state machine that governs check-in/out transitions and
//! the notification policy resolver. Stateless per call; all mutual
//! exclusion happens through the attendance store.

pub mod policy;
pub mod session;

pub use policy::{EffectivePolicy, NotifyDecision, PolicyResolver, PolicySource};
pub use session::{notification_log, AttendanceEngine, SelfCheckoutInfo};

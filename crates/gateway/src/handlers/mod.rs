//! API handlers module

pub mod admin;
pub mod attendance;
pub mod health;

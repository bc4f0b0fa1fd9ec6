//! Approvals: library crate for the server binary and integration tests.
//!
//! Re-exports modules needed by integration tests in `tests/`.

pub mod access;
pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod notification;
pub mod seed;
pub mod store;

//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations
//! - Denormalized counter primitives

pub mod counters;
mod database;
mod models;

pub use database::{Database, LikeAction, LikeOutcome, LikeTarget, RequestOutcome};
pub use models::*;

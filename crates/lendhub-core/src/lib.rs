//! Shared types for the Lendhub caching and job infrastructure.
//!
//! This crate holds the error taxonomy and the small set of serde models
//! that cross crate boundaries (cached book summaries, session data).
//! Everything else lives in `lendhub-cache`, `lendhub-jobs`, and
//! `lendhub-server`.

pub mod error;
pub mod model;

pub use error::CoreError;
pub use model::{BookSummary, CommunityStats, SessionData};

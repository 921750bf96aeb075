//! Assignment coordination for concurrent review sessions.
//!
//! - [`Coordinator`]: hands out items, records completions, reports progress
//! - [`SessionRegistry`]: session bookkeeping and lazy expiry
//! - [`SharedState`]: the persisted aggregate both operate on
//!
//! # Assignment order
//!
//! The lowest free index always wins. Items reclaimed from expired or reset
//! sessions sit in a released set below the cursor and are handed out
//! before anything at the cursor, so assignment order is deterministic.

pub mod assigner;
pub mod registry;
pub mod state;

pub use assigner::{
    AdminStats, AssignOutcome, Assignment, Completion, Coordinator, LeaderboardRow, Progress,
};
pub use registry::SessionRegistry;
pub use state::{Decision, LeaderboardEntry, Session, SharedState};

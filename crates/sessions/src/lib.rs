//! Tier Store and Session Manager primitives: per-session ordered turns at
//! three tiers, session metadata rows, and per-session concurrency control.

pub mod session_lock;
pub mod session_registry;
pub mod tier_store;

pub use session_lock::SessionLockMap;
pub use session_registry::SessionRegistry;
pub use tier_store::{AppendOutcome, LookupOutcome, TierStore};

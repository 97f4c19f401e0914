//! Shared types for the tiered contextual memory engine: the Turn/Session/
//! UserFact/EpisodicEntry data model, configuration, the shared error type,
//! and structured trace events. Every other crate in this workspace depends
//! on this one; it depends on nothing internal.

pub mod cancel;
pub mod config;
pub mod error;
pub mod trace;
pub mod turn;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use turn::{ChatStatus, EpisodicEntry, Role, Session, Turn, TurnMetadata, UserFact};

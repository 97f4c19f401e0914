//! Core data model: Turn, Session, UserFact, EpisodicEntry.
//!
//! These types are owned by no single crate's persistence layer — the Tier
//! Store, Episodic Store and User-Fact Store all read and write them, so
//! they live here as the shared vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a turn is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        f.write_str(s)
    }
}

/// One exchange between user and assistant, or a single role-labeled
/// message — the atomic unit of the Tier Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    /// Compact representation: key/value shorthand for user turns, a
    /// ≤20-word distillation for assistant turns.
    pub tier1: String,
    /// One-to-two sentence summary.
    pub tier2: String,
    /// Full original text, byte-equal to what was sent/produced.
    pub tier3: String,
    /// Tier at which this turn renders in the next prompt build.
    /// Monotonically non-decreasing over the turn's life.
    pub required_tier: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: TurnMetadata,
}

/// Free-form tags on a turn. Modeled as a struct rather than an open map
/// since the core only ever sets a fixed, known set of flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub contains_search_results: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced_break: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tier_fallback: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_fallback: bool,
}

impl Turn {
    /// Render this turn's text at its `required_tier`.
    pub fn rendered_at_required_tier(&self) -> &str {
        self.rendered_at(self.required_tier)
    }

    pub fn rendered_at(&self, tier: u8) -> &str {
        match tier {
            1 => &self.tier1,
            2 => &self.tier2,
            _ => &self.tier3,
        }
    }

    /// Set `required_tier` to `max(current, n)`. Returns true if it changed.
    pub fn escalate_required_tier(&mut self, n: u8) -> bool {
        let n = n.clamp(1, 3);
        if n > self.required_tier {
            self.required_tier = n;
            true
        } else {
            false
        }
    }
}

/// Session metadata row. The ordered turns themselves live in the Tier
/// Store; a Session here is the title/activity bookkeeping the Session
/// Manager and HTTP layer need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            title: String::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Derive a short title from the first user turn, if not already set.
    pub fn maybe_set_title_from(&mut self, first_user_text: &str) {
        if !self.title.is_empty() {
            return;
        }
        let words: Vec<&str> = first_user_text.split_whitespace().take(8).collect();
        self.title = words.join(" ");
    }
}

/// Durable user-scoped key/value fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFact {
    pub user_id: String,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// An archived turn or contiguous group of turns, read-only once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEntry {
    pub episode_id: String,
    pub user_id: String,
    pub source_session_id: String,
    pub turn_ids: Vec<String>,
    /// Short string used for retrieval matching.
    pub summary: String,
    /// Full (tier3) content of the archived turns, concatenated in order.
    pub payload: String,
    pub archived_at: DateTime<Utc>,
}

/// Outcome status returned to the HTTP layer for a `ChatTurn` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Ok,
    ForcedBreak,
    Error,
}

use serde::Serialize;

/// Structured trace events emitted across all context-engine crates.
///
/// Emitted through `tracing` as a single structured field rather than a
/// prose log line, so a log processor can parse it without scraping text.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TurnIngested {
        session_id: String,
        turn_id: String,
        role: String,
        tier_fallback: bool,
    },
    TierEscalated {
        session_id: String,
        turn_id: String,
        from_tier: u8,
        to_tier: u8,
    },
    DirectiveDispatched {
        session_id: String,
        turn_id: String,
        directive: String,
        interrupting: bool,
    },
    PromptBuilt {
        session_id: String,
        turn_id: String,
        estimated_tokens: usize,
        turns_included: usize,
        turns_degraded: usize,
    },
    LlmCallCompleted {
        session_id: String,
        provider: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmCallFailed {
        session_id: String,
        provider: String,
        reason: String,
    },
    Pruned {
        session_id: String,
        turns_removed: usize,
        episode_id: String,
    },
    SessionResolved {
        user_id: String,
        session_id: String,
        is_new: bool,
    },
    SessionEvicted {
        session_id: String,
        idle_seconds: i64,
    },
    SessionDeleted {
        session_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cce_event");
    }
}

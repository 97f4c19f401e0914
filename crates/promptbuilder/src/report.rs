use serde::{Deserialize, Serialize};

/// Structured report returned alongside every prompt build, for the same
/// observability purpose context-assembly telemetry serves elsewhere in
/// this codebase: a trace event, not a log line meant for human parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptReport {
    pub turns_included: usize,
    pub turns_degraded: usize,
    pub user_facts_block_chars: usize,
    pub episodic_block_chars: usize,
    pub total_estimated_tokens: u32,
}

//! Capability interfaces the Conversation Orchestrator and Action Handler
//! depend on. An LLM Provider turns a rendered prompt into a reply; a
//! Search Provider resolves `[SEARCH: ...]` directives. Both are traded as
//! `Arc<dyn Trait>` so adapters and test doubles are interchangeable.

use async_trait::async_trait;
use cce_domain::cancel::CancelToken;
use cce_domain::error::Result;

/// Per-call sampling knobs. `None` lets the provider fall back to its
/// configured default.
#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send `prompt` and wait for the full reply text. Request-response
    /// only — no token streaming crosses this boundary.
    async fn complete(
        &self,
        prompt: &str,
        opts: &CompleteOptions,
        cancel: &CancelToken,
    ) -> Result<String>;

    /// A stable identifier for logging and trace events.
    fn provider_id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, cancel: &CancelToken) -> Result<Vec<SearchHit>>;
}

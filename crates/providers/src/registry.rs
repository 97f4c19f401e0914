//! Construction of the configured LLM Provider and, if enabled, Search
//! Provider from the application's [`Config`]. Single-provider: this
//! engine calls out to exactly one LLM backend, unlike the multi-provider
//! role routing a larger gateway might need.

use std::sync::Arc;

use cce_domain::config::{LlmConfig, SearchConfig};
use cce_domain::error::{Error, Result};

use crate::openai_compat::OpenAiCompatProvider;
use crate::search_http::HttpSearchProvider;
use crate::traits::{LlmProvider, SearchProvider};

/// Build the configured LLM provider. `config.llm.providers` currently
/// holds exactly one entry in practice; the first is used.
pub fn build_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider_cfg = config
        .providers
        .first()
        .ok_or_else(|| Error::Config("no LLM provider configured".into()))?;
    let provider = OpenAiCompatProvider::from_config(provider_cfg)?;
    Ok(Arc::new(provider))
}

/// Build the search provider if `config.search.enabled`.
pub fn build_search_provider(config: &SearchConfig) -> Result<Option<Arc<dyn SearchProvider>>> {
    if !config.enabled {
        return Ok(None);
    }
    let provider = HttpSearchProvider::from_config(config)?;
    Ok(Some(Arc::new(provider)))
}

//! Concrete adapters for the LLM Provider and Search Provider capability
//! interfaces, plus construction from configuration.

pub mod openai_compat;
pub mod registry;
pub mod search_http;
pub mod traits;
pub(crate) mod util;

pub use registry::{build_llm_provider, build_search_provider};
pub use traits::{CompleteOptions, LlmProvider, SearchHit, SearchProvider};

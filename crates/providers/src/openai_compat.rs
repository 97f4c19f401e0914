//! LLM Provider adapter for any OpenAI-compatible chat completions endpoint
//! (OpenAI, Ollama, vLLM, LM Studio, Together, and similar). The rendered
//! prompt is sent as a single user message; the first choice's content is
//! the returned reply. No tool-calling wire format and no streaming — the
//! Action Handler parses directives out of the plain-text reply itself.

use async_trait::async_trait;
use cce_domain::cancel::CancelToken;
use cce_domain::config::ProviderConfig;
use cce_domain::error::{Error, Result};
use serde_json::Value;

use crate::traits::{CompleteOptions, LlmProvider};
use crate::util::{from_reqwest, resolve_api_key};

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
            client,
        })
    }

    fn build_body(&self, prompt: &str, opts: &CompleteOptions) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(temp) = opts.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = opts.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

fn parse_reply(body: &Value, provider: &str) -> Result<String> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "missing message content in response".into(),
        })?;

    Ok(content.to_string())
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        prompt: &str,
        opts: &CompleteOptions,
        cancel: &CancelToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Other("cancelled before dispatch".into()));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(prompt, opts);

        tracing::debug!(provider = %self.id, %url, "llm provider complete request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        if cancel.is_cancelled() {
            return Err(Error::Other("cancelled after dispatch".into()));
        }

        let json: Value = serde_json::from_str(&text).map_err(Error::Json)?;
        parse_reply(&json, &self.id)
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reply_extracts_first_choice_content() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "hello there"}}],
        });
        assert_eq!(parse_reply(&body, "p").unwrap(), "hello there");
    }

    #[test]
    fn parse_reply_errors_on_empty_choices() {
        let body = serde_json::json!({"choices": []});
        assert!(parse_reply(&body, "p").is_err());
    }

    #[test]
    fn build_body_includes_prompt_as_single_user_message() {
        let cfg = ProviderConfig {
            id: "p".into(),
            base_url: "http://localhost".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "CCE_TEST_BUILD_BODY_KEY".into(),
        };
        std::env::set_var("CCE_TEST_BUILD_BODY_KEY", "k");
        let provider = OpenAiCompatProvider::from_config(&cfg).unwrap();
        let body = provider.build_body("say hi", &CompleteOptions::default());
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "say hi");
        std::env::remove_var("CCE_TEST_BUILD_BODY_KEY");
    }
}

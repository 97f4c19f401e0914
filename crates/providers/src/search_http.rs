//! Search Provider adapter backed by a single configured HTTP search API.
//! Expects a JSON response shaped as `{"results": [{"title","url","snippet"}, ...]}`;
//! any provider conforming to that contract (a self-hosted search gateway,
//! a SearX instance behind a thin translation layer, etc.) can sit behind it.

use async_trait::async_trait;
use cce_domain::cancel::CancelToken;
use cce_domain::config::SearchConfig;
use cce_domain::error::{Error, Result};
use serde_json::Value;

use crate::traits::{SearchHit, SearchProvider};
use crate::util::{from_reqwest, resolve_api_key};

pub struct HttpSearchProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpSearchProvider {
    pub fn from_config(cfg: &SearchConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

fn parse_hits(body: &Value) -> Vec<SearchHit> {
    body.get("results")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    Some(SearchHit {
                        title: item.get("title")?.as_str()?.to_string(),
                        url: item.get("url")?.as_str()?.to_string(),
                        snippet: item
                            .get("snippet")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, cancel: &CancelToken) -> Result<Vec<SearchHit>> {
        if cancel.is_cancelled() {
            return Err(Error::Other("cancelled before dispatch".into()));
        }

        let resp = self
            .client
            .get(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: "search".into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let json: Value = serde_json::from_str(&text).map_err(Error::Json)?;
        Ok(parse_hits(&json))
    }
}

//! Layered configuration: typed structs deserialized from TOML, every field
//! defaulted so a zero-config file still produces a working service, plus a
//! `validate()` pass that collects every issue instead of panicking on the
//! first one.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub sessions: SessionsConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            sessions: SessionsConfig::default(),
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_str(raw: &str) -> Result<Self, crate::error::Error> {
        toml::from_str(raw).map_err(|e| crate::error::Error::Config(e.to_string()))
    }

    /// Validate cross-field invariants. Returns every issue found rather
    /// than stopping at the first one, so an operator sees the whole
    /// picture in a single pass.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.orchestrator.prompt_token_budget == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "orchestrator.prompt_token_budget".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.orchestrator.turn_keep_floor == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "orchestrator.turn_keep_floor".into(),
                message: "K_min of zero disables the pruner's floor guarantee".into(),
            });
        }
        if self.orchestrator.max_loop == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "orchestrator.max_loop".into(),
                message: "max_loop of zero forces every turn to forced_break immediately".into(),
            });
        }
        if self.llm.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "llm.providers".into(),
                message: "at least one LLM provider must be configured".into(),
            });
        }
        for (i, p) in self.llm.providers.iter().enumerate() {
            if p.base_url.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: "must not be empty".into(),
                });
            }
        }
        if self.search.enabled && self.search.base_url.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "search.base_url".into(),
                message: "search.enabled is true but no base_url is configured".into(),
            });
        }

        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

// ── Server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: d_bind_addr(),
            cors_allowed_origins: vec!["http://localhost:3000".into()],
        }
    }
}

fn d_bind_addr() -> String {
    "0.0.0.0:8080".into()
}

// ── Orchestrator ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub prompt_token_budget: u32,
    pub turn_keep_floor: usize,
    pub max_loop: u32,
    pub llm_call_timeout_secs: u64,
    pub user_turn_deadline_secs: u64,
    pub safety_margin_tokens: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            prompt_token_budget: d_prompt_token_budget(),
            turn_keep_floor: d_turn_keep_floor(),
            max_loop: d_max_loop(),
            llm_call_timeout_secs: 30,
            user_turn_deadline_secs: 60,
            safety_margin_tokens: 500,
        }
    }
}

fn d_prompt_token_budget() -> u32 {
    30_000
}
fn d_turn_keep_floor() -> usize {
    5
}
fn d_max_loop() -> u32 {
    2
}

// ── Sessions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub idle_ttl_secs: i64,
    pub eviction_sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 3600,
            eviction_sweep_interval_secs: 300,
        }
    }
}

// ── Storage ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: "./state".into(),
        }
    }
}

// ── LLM ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self { providers: vec![] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub id: String,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key. The key
    /// itself is never stored in the TOML file.
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            base_url: String::new(),
            model: "gpt-4o-mini".into(),
            api_key_env: "LLM_API_KEY".into(),
        }
    }
}

// ── Search ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key_env: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key_env: "SEARCH_API_KEY".into(),
        }
    }
}

// ── Observability ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_level: "info".into(),
            otlp_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_flags_missing_provider() {
        let cfg = Config::default();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "llm.providers" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn valid_config_has_no_errors() {
        let mut cfg = Config::default();
        cfg.llm.providers.push(ProviderConfig {
            id: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            api_key_env: "OPENAI_API_KEY".into(),
        });
        let issues = cfg.validate();
        assert!(issues.iter().all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let cfg = Config::load_from_str("").unwrap();
        assert_eq!(cfg.orchestrator.prompt_token_budget, 30_000);
        assert_eq!(cfg.orchestrator.turn_keep_floor, 5);
    }

    #[test]
    fn search_enabled_without_base_url_is_an_error() {
        let mut cfg = Config::default();
        cfg.search.enabled = true;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "search.base_url" && i.severity == ConfigSeverity::Error));
    }
}

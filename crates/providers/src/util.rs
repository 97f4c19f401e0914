//! Shared helpers for provider adapters: reqwest error mapping and API-key
//! resolution from the single environment variable named in config.

use cce_domain::error::{Error, Result};

pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Transient(format!("timeout: {e}"))
    } else if e.is_connect() {
        Error::Transient(format!("connect error: {e}"))
    } else {
        Error::Provider {
            provider: "http".into(),
            message: e.to_string(),
        }
    }
}

/// Read the API key from the environment variable named in config. Keys
/// never live in the config file itself.
pub fn resolve_api_key(env_var: &str) -> Result<String> {
    std::env::var(env_var).map_err(|_| {
        Error::Config(format!(
            "environment variable '{env_var}' is not set or not valid UTF-8"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_reads_env() {
        let var_name = "CCE_TEST_RESOLVE_ENV_KEY";
        std::env::set_var(var_name, "secret-value");
        assert_eq!(resolve_api_key(var_name).unwrap(), "secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_missing_is_config_error() {
        let err = resolve_api_key("CCE_TEST_NONEXISTENT_VAR_9999").unwrap_err();
        assert!(err.to_string().contains("CCE_TEST_NONEXISTENT_VAR_9999"));
    }
}

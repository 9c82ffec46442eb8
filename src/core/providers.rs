use crate::core::config::Config;
use crate::utils::url::{normalize_base_url, DEFAULT_OPENAI_BASE_URL};
use std::error::Error;
use std::fmt;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

const QUICK_FIXES: &[&str] = &[
    "export OPENAI_API_KEY=sk-...                     # Use the OpenAI API",
    "export OPENAI_BASE_URL=http://localhost:8080/v1  # Point at an OpenAI-compatible server",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSession {
    pub api_key: String,
    pub base_url: String,
    pub provider_display_name: String,
}

#[derive(Debug)]
pub struct ProviderResolutionError {
    message: String,
    quick_fixes: &'static [&'static str],
    exit_code: i32,
}

impl ProviderResolutionError {
    pub fn missing_authentication() -> Self {
        Self {
            message: "❌ OPENAI_API_KEY environment variable not set\n\nSet environment variables:\n   export OPENAI_API_KEY=\"your-api-key-here\"\n   export OPENAI_BASE_URL=\"https://api.openai.com/v1\"  # Optional".to_string(),
            quick_fixes: QUICK_FIXES,
            exit_code: 2,
        }
    }

    pub fn quick_fixes(&self) -> &'static [&'static str] {
        self.quick_fixes
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl fmt::Display for ProviderResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ProviderResolutionError {}

/// Resolve the credential and endpoint for this process.
///
/// The key always comes from `OPENAI_API_KEY`; an empty value is accepted for
/// local servers that do not check it. The endpoint is `OPENAI_BASE_URL`,
/// then the config file's `base_url`, then the OpenAI default.
pub fn resolve_env_session(config: &Config) -> Result<ProviderSession, ProviderResolutionError> {
    let api_key =
        std::env::var(API_KEY_ENV).map_err(|_| ProviderResolutionError::missing_authentication())?;

    let base_url = std::env::var(BASE_URL_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| config.base_url.clone())
        .map(|value| normalize_base_url(&value))
        .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());

    let provider_display_name = if base_url == DEFAULT_OPENAI_BASE_URL {
        "OpenAI".to_string()
    } else {
        "OpenAI-compatible".to_string()
    };

    Ok(ProviderSession {
        api_key,
        base_url,
        provider_display_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::TestEnvVarGuard;

    #[test]
    fn missing_key_reports_quick_fixes() {
        let mut env_guard = TestEnvVarGuard::new();
        env_guard.remove_var(API_KEY_ENV);
        env_guard.remove_var(BASE_URL_ENV);

        let err = resolve_env_session(&Config::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        assert!(!err.quick_fixes().is_empty());
    }

    #[test]
    fn defaults_to_openai_endpoint() {
        let mut env_guard = TestEnvVarGuard::new();
        env_guard.set_var(API_KEY_ENV, "sk-env");
        env_guard.remove_var(BASE_URL_ENV);

        let session = resolve_env_session(&Config::default()).unwrap();
        assert_eq!(session.api_key, "sk-env");
        assert_eq!(session.base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(session.provider_display_name, "OpenAI");
    }

    #[test]
    fn env_base_url_wins_over_config() {
        let mut env_guard = TestEnvVarGuard::new();
        env_guard.set_var(API_KEY_ENV, "");
        env_guard.set_var(BASE_URL_ENV, "http://localhost:8080/v1/");

        let config = Config {
            base_url: Some("https://config.example/v1".to_string()),
            ..Default::default()
        };
        let session = resolve_env_session(&config).unwrap();
        assert_eq!(session.api_key, "");
        assert_eq!(session.base_url, "http://localhost:8080/v1");
        assert_eq!(session.provider_display_name, "OpenAI-compatible");
    }

    #[test]
    fn config_base_url_used_without_env_override() {
        let mut env_guard = TestEnvVarGuard::new();
        env_guard.set_var(API_KEY_ENV, "sk-env");
        env_guard.remove_var(BASE_URL_ENV);

        let config = Config {
            base_url: Some("https://config.example/v1".to_string()),
            ..Default::default()
        };
        let session = resolve_env_session(&config).unwrap();
        assert_eq!(session.base_url, "https://config.example/v1");
    }
}

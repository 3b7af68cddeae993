//! GitHub API connection settings.

use std::time::Duration;

use runs::ConfigError;

const ENV_TOKEN: &str = "GITHUB_TOKEN";
const ENV_API_URL: &str = "GITHUB_API_URL";
const ENV_TIMEOUT: &str = "GITHUB_REQUEST_TIMEOUT_SECS";

/// Public GitHub REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings for [`crate::GitHubActionsClient`].
#[derive(Clone)]
pub struct GitHubConfig {
    /// REST API root, e.g. `https://ghe.example.com/api/v3` for GitHub Enterprise.
    pub api_url: String,
    /// Installation or personal access token with `actions:write`.
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl GitHubConfig {
    /// Settings for the public API with the default timeout.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Replaces the API root.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Loads `GITHUB_TOKEN`, `GITHUB_API_URL` and `GITHUB_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(ENV_TOKEN)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing {
                key: ENV_TOKEN.to_string(),
            })?;

        let mut config = Self::new(token);
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            config.api_url = url;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_TIMEOUT.to_string(),
                message: format!("'{raw}' is not a number of seconds"),
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

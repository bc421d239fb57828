// Process configuration
// Everything beyond the incident id is supplied at startup through the
// environment; the pipeline itself takes no other inputs

use std::time::Duration;

use anyhow::{anyhow, Context};

use crate::auth::GrantConfig;

/// OAuth settings for the token lifecycle manager
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Present for the authorization-code grant; absent means
    /// client-credentials
    pub refresh_token: Option<String>,
}

impl OAuthSettings {
    /// Grant configuration for the token manager
    pub fn grant(&self) -> GrantConfig {
        match &self.refresh_token {
            Some(refresh_token) => GrantConfig::AuthorizationCode {
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
                refresh_token: Some(refresh_token.clone()),
            },
            None => GrantConfig::ClientCredentials {
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
            },
        }
    }
}

/// Complete process configuration
#[derive(Debug, Clone)]
pub struct PilotConfig {
    /// Issue tracker REST base URL
    pub tracker_base_url: String,
    /// Code host REST base URL
    pub codehost_base_url: String,
    /// Structured tool-call endpoint URL (preferred backend)
    pub tool_endpoint_url: String,
    /// OAuth token endpoint and client credentials
    pub oauth: OAuthSettings,
    /// Bound on each backend adapter invocation
    pub call_timeout: Duration,
    /// Bound on each fan-out target task
    pub fanout_timeout: Duration,
    /// Bound on token endpoint calls
    pub auth_timeout: Duration,
    /// How far back `list_commits` looks for suspect changes
    pub commit_lookback_days: i64,
}

impl PilotConfig {
    /// Read configuration from the environment
    ///
    /// URLs and client credentials are required; timeouts and the commit
    /// window fall back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let require = |name: &str| {
            std::env::var(name).map_err(|_| anyhow!("missing required env var {}", name))
        };
        let secs = |name: &str, default: u64| -> anyhow::Result<Duration> {
            match std::env::var(name) {
                Ok(raw) => Ok(Duration::from_secs(
                    raw.parse::<u64>()
                        .with_context(|| format!("{} must be an integer", name))?,
                )),
                Err(_) => Ok(Duration::from_secs(default)),
            }
        };

        Ok(PilotConfig {
            tracker_base_url: require("TRACKER_BASE_URL")?,
            codehost_base_url: require("CODEHOST_BASE_URL")?,
            tool_endpoint_url: require("TOOL_ENDPOINT_URL")?,
            oauth: OAuthSettings {
                token_url: require("OAUTH_TOKEN_URL")?,
                client_id: require("OAUTH_CLIENT_ID")?,
                client_secret: require("OAUTH_CLIENT_SECRET")?,
                refresh_token: std::env::var("OAUTH_REFRESH_TOKEN").ok(),
            },
            call_timeout: secs("CALL_TIMEOUT_SECS", 30)?,
            fanout_timeout: secs("FANOUT_TIMEOUT_SECS", 60)?,
            auth_timeout: secs("AUTH_TIMEOUT_SECS", 15)?,
            commit_lookback_days: match std::env::var("COMMIT_LOOKBACK_DAYS") {
                Ok(raw) => raw
                    .parse::<i64>()
                    .context("COMMIT_LOOKBACK_DAYS must be an integer")?,
                Err(_) => 7,
            },
        })
    }
}

impl Default for PilotConfig {
    /// Placeholder configuration for tests and offline construction
    fn default() -> Self {
        PilotConfig {
            tracker_base_url: "https://tracker.example.com".to_string(),
            codehost_base_url: "https://codehost.example.com".to_string(),
            tool_endpoint_url: "https://tools.example.com/invoke".to_string(),
            oauth: OAuthSettings {
                token_url: "https://auth.example.com/oauth/token".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                refresh_token: None,
            },
            call_timeout: Duration::from_secs(30),
            fanout_timeout: Duration::from_secs(60),
            auth_timeout: Duration::from_secs(15),
            commit_lookback_days: 7,
        }
    }
}

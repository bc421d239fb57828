// Credential configuration and token records
// Wire types follow the standard OAuth2 token endpoint shapes

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the token lifecycle
///
/// All of these are fatal to the immediate caller (the step fails and the
/// pipeline records it) but never fatal to the process.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No credentials were configured for this process
    #[error("no credentials configured")]
    NoCredentials,

    /// Authorization-code grant without a refresh token; the caller must
    /// re-run an interactive authorization flow out of band
    #[error("no refresh token available; interactive authorization required")]
    NoRefreshToken,

    /// The token endpoint answered with a non-success status
    #[error("token endpoint returned {code}: {body}")]
    Status { code: u16, body: String },

    /// The token endpoint could not be reached
    #[error("transport error talking to token endpoint: {0}")]
    Transport(String),

    /// The token endpoint answered 2xx but the body was not a token response
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

/// OAuth2 grant configuration supplied at process startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GrantConfig {
    /// Machine-to-machine: client id/secret exchanged directly for a token
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
    /// User-delegated: a refresh token (obtained by a one-time interactive
    /// flow, out of scope here) is exchanged for new access/refresh pairs
    AuthorizationCode {
        client_id: String,
        client_secret: String,
        refresh_token: Option<String>,
    },
}

/// Credential store - token endpoint plus grant configuration
///
/// Leaf component with no dependencies. The mutable token cache lives in the
/// [`TokenLifecycleManager`](super::TokenLifecycleManager), not here, so this
/// struct can be cloned freely into the manager at startup.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    /// OAuth2 token endpoint accepting form-encoded grant requests
    pub token_url: String,
    /// Which grant to use when refreshing
    pub grant: GrantConfig,
}

impl CredentialStore {
    pub fn new(token_url: impl Into<String>, grant: GrantConfig) -> Self {
        CredentialStore {
            token_url: token_url.into(),
            grant,
        }
    }
}

/// Token endpoint response per RFC 6749 §5.1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEndpointResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// A cached bearer token with its lifecycle metadata
///
/// Records are replaced, never mutated in place: each successful refresh
/// constructs a fresh record and swaps it into the manager's cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The bearer token value
    pub access_token: String,
    /// Token type from the endpoint, normally "Bearer"
    pub token_type: String,
    /// When this record was constructed
    pub obtained_at: DateTime<Utc>,
    /// Derived from the endpoint's `expires_in`; `None` means the endpoint
    /// gave no lifetime, which we treat as already expired
    pub expires_at: Option<DateTime<Utc>>,
    /// Rotating refresh token, carried forward when the endpoint omits one
    pub refresh_token: Option<String>,
    /// Space-separated scopes granted, split for convenience
    pub scope: Vec<String>,
}

impl TokenRecord {
    /// Build a record from a token endpoint response
    pub fn from_response(response: TokenEndpointResponse, now: DateTime<Utc>) -> Self {
        TokenRecord {
            access_token: response.access_token,
            token_type: response.token_type,
            obtained_at: now,
            expires_at: response
                .expires_in
                .map(|secs| now + Duration::seconds(secs as i64)),
            refresh_token: response.refresh_token,
            scope: response
                .scope
                .map(|s| s.split(' ').map(String::from).collect())
                .unwrap_or_default(),
        }
    }

    /// Whether this token is still usable `margin` from now
    ///
    /// A token with no expiry is never fresh; an unset `expires_at` is
    /// treated as already expired.
    pub fn fresh_for(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + margin < expires_at,
            None => false,
        }
    }

    /// Authorization header value for this token
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(expires_in: Option<u64>) -> TokenEndpointResponse {
        TokenEndpointResponse {
            access_token: "tok-123".to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
            refresh_token: Some("refresh-456".to_string()),
            scope: Some("read_api write_api".to_string()),
        }
    }

    #[test]
    fn test_record_from_response() {
        let now = Utc::now();
        let record = TokenRecord::from_response(response(Some(3600)), now);

        assert_eq!(record.access_token, "tok-123");
        assert_eq!(record.expires_at, Some(now + Duration::seconds(3600)));
        assert_eq!(record.refresh_token.as_deref(), Some("refresh-456"));
        assert_eq!(record.scope, vec!["read_api", "write_api"]);
        assert_eq!(record.authorization_header(), "Bearer tok-123");
    }

    #[test]
    fn test_freshness_margin() {
        let now = Utc::now();
        let record = TokenRecord::from_response(response(Some(600)), now);

        // Expires in 10 minutes: fresh for a 5-minute margin,
        // stale for a 15-minute margin
        assert!(record.fresh_for(Duration::minutes(5)));
        assert!(!record.fresh_for(Duration::minutes(15)));
    }

    #[test]
    fn test_missing_expiry_is_already_expired() {
        let record = TokenRecord::from_response(response(None), Utc::now());
        assert!(!record.fresh_for(Duration::zero()));
    }

    #[test]
    fn test_token_response_defaults() {
        let parsed: TokenEndpointResponse =
            serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();
        assert_eq!(parsed.token_type, "Bearer");
        assert!(parsed.expires_in.is_none());
        assert!(parsed.refresh_token.is_none());
    }
}

// Token lifecycle manager
// Hands out a currently-valid bearer token, refreshing at most once even
// under concurrent callers (double-checked locking)

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::credentials::{
    AuthError, CredentialStore, GrantConfig, TokenEndpointResponse, TokenRecord,
};

/// Tokens expiring within this window are refreshed eagerly
const RENEWAL_MARGIN_MINUTES: i64 = 5;

/// The OAuth2 token endpoint seam
///
/// Abstracted behind a trait so tests can count refresh calls without a
/// network; production uses [`HttpTokenEndpoint`].
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// POST a form-encoded grant request and parse the token response
    async fn request_token(
        &self,
        form: &[(&'static str, String)],
    ) -> Result<TokenEndpointResponse, AuthError>;
}

/// Real token endpoint client over HTTP
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_url: String,
    timeout: StdDuration,
}

impl HttpTokenEndpoint {
    pub fn new(token_url: impl Into<String>, timeout: StdDuration) -> Self {
        HttpTokenEndpoint {
            client: reqwest::Client::new(),
            token_url: token_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn request_token(
        &self,
        form: &[(&'static str, String)],
    ) -> Result<TokenEndpointResponse, AuthError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Status {
                code: status.as_u16(),
                body,
            });
        }

        response
            .json::<TokenEndpointResponse>()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }
}

/// Optional process-external store for the token record
///
/// Lets refreshed tokens survive process restarts and be shared between
/// processes. Purely an integration point; the in-memory implementation is
/// the default.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<Option<TokenRecord>>;
    async fn save(&self, record: &TokenRecord) -> anyhow::Result<()>;
}

/// In-memory token store, mainly for tests and single-process runs
#[derive(Default)]
pub struct InMemoryTokenStore {
    inner: RwLock<Option<TokenRecord>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self) -> anyhow::Result<Option<TokenRecord>> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, record: &TokenRecord) -> anyhow::Result<()> {
        *self.inner.write().await = Some(record.clone());
        Ok(())
    }
}

/// Token lifecycle manager
///
/// Wraps the [`CredentialStore`] and exposes one operation: give me a token
/// that is valid right now. The cached record is read under a fast shared
/// lock; refreshes serialize on a separate mutex and re-check the cache
/// after acquiring it, so `N` concurrent callers with an expired cache
/// produce exactly one refresh call.
pub struct TokenLifecycleManager {
    credentials: CredentialStore,
    endpoint: Arc<dyn TokenEndpoint>,
    store: Option<Arc<dyn TokenStore>>,
    cached: RwLock<Option<TokenRecord>>,
    refresh_lock: Mutex<()>,
    renewal_margin: Duration,
}

impl TokenLifecycleManager {
    /// Create a manager with the default 5-minute renewal margin
    pub fn new(credentials: CredentialStore, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        TokenLifecycleManager {
            credentials,
            endpoint,
            store: None,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            renewal_margin: Duration::minutes(RENEWAL_MARGIN_MINUTES),
        }
    }

    /// Attach an external token store; refreshed records are written through
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the renewal margin (tests use a zero margin)
    pub fn with_renewal_margin(mut self, margin: Duration) -> Self {
        self.renewal_margin = margin;
        self
    }

    /// Install a token directly, bypassing the endpoint.
    /// Used to adopt a bootstrap token or to seed tests.
    pub async fn install_token(&self, record: TokenRecord) {
        *self.cached.write().await = Some(record);
    }

    /// Get a token valid right now, refreshing if absent or near expiry
    ///
    /// Cache hits perform zero network calls.
    pub async fn get_valid_token(&self) -> Result<TokenRecord, AuthError> {
        // Fast path: shared read of a fresh cached record
        if let Some(record) = self.cached.read().await.as_ref() {
            if record.fresh_for(self.renewal_margin) {
                return Ok(record.clone());
            }
        }

        // Slow path: serialize refreshes, then re-check (another caller may
        // have refreshed while we waited for the lock)
        let _guard = self.refresh_lock.lock().await;
        if let Some(record) = self.cached.read().await.as_ref() {
            if record.fresh_for(self.renewal_margin) {
                debug!("token refreshed by a concurrent caller, reusing");
                return Ok(record.clone());
            }
        }

        // A sibling process may have refreshed and persisted already
        if let Some(adopted) = self.try_adopt_stored().await {
            return Ok(adopted);
        }

        let record = self.refresh().await?;
        *self.cached.write().await = Some(record.clone());

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&record).await {
                warn!("failed to persist refreshed token: {}", e);
            }
        }

        Ok(record)
    }

    /// Adopt a fresh record from the external store, if one exists
    async fn try_adopt_stored(&self) -> Option<TokenRecord> {
        let store = self.store.as_ref()?;
        match store.load().await {
            Ok(Some(record)) if record.fresh_for(self.renewal_margin) => {
                info!("adopted fresh token from external store");
                *self.cached.write().await = Some(record.clone());
                Some(record)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("token store load failed: {}", e);
                None
            }
        }
    }

    /// Perform one refresh against the token endpoint
    async fn refresh(&self) -> Result<TokenRecord, AuthError> {
        let form = self.grant_form().await?;
        debug!(
            grant_type = form
                .iter()
                .find(|(k, _)| *k == "grant_type")
                .map(|(_, v)| v.as_str())
                .unwrap_or("?"),
            "refreshing token"
        );

        let response = self.endpoint.request_token(&form).await?;
        let mut record = TokenRecord::from_response(response, Utc::now());

        // Endpoints that do not rotate refresh tokens omit the field;
        // carry the previous one forward so the next refresh still works
        if record.refresh_token.is_none() {
            record.refresh_token = self.current_refresh_token().await;
        }

        info!(
            expires_at = ?record.expires_at,
            "token refresh succeeded"
        );
        Ok(record)
    }

    /// Build the form parameters for the configured grant
    async fn grant_form(&self) -> Result<Vec<(&'static str, String)>, AuthError> {
        match &self.credentials.grant {
            GrantConfig::ClientCredentials {
                client_id,
                client_secret,
            } => Ok(vec![
                ("grant_type", "client_credentials".to_string()),
                ("client_id", client_id.clone()),
                ("client_secret", client_secret.clone()),
            ]),
            GrantConfig::AuthorizationCode {
                client_id,
                client_secret,
                ..
            } => {
                let refresh_token = self
                    .current_refresh_token()
                    .await
                    .ok_or(AuthError::NoRefreshToken)?;
                Ok(vec![
                    ("grant_type", "refresh_token".to_string()),
                    ("refresh_token", refresh_token),
                    ("client_id", client_id.clone()),
                    ("client_secret", client_secret.clone()),
                ])
            }
        }
    }

    /// The most recent refresh token: the rotated one from the cached
    /// record, falling back to the one configured at startup
    async fn current_refresh_token(&self) -> Option<String> {
        if let Some(record) = self.cached.read().await.as_ref() {
            if record.refresh_token.is_some() {
                return record.refresh_token.clone();
            }
        }
        match &self.credentials.grant {
            GrantConfig::AuthorizationCode { refresh_token, .. } => refresh_token.clone(),
            GrantConfig::ClientCredentials { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake endpoint that counts refresh calls
    struct CountingEndpoint {
        calls: AtomicUsize,
        rotate_refresh: bool,
    }

    impl CountingEndpoint {
        fn new() -> Self {
            CountingEndpoint {
                calls: AtomicUsize::new(0),
                rotate_refresh: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenEndpoint for CountingEndpoint {
        async fn request_token(
            &self,
            _form: &[(&'static str, String)],
        ) -> Result<TokenEndpointResponse, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            // Small delay widens the race window for the double-check test
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            Ok(TokenEndpointResponse {
                access_token: format!("tok-{}", n),
                token_type: "Bearer".to_string(),
                expires_in: Some(3600),
                refresh_token: self
                    .rotate_refresh
                    .then(|| format!("refresh-{}", n)),
                scope: None,
            })
        }
    }

    fn client_credentials_store() -> CredentialStore {
        CredentialStore::new(
            "https://auth.example.com/oauth/token",
            GrantConfig::ClientCredentials {
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
            },
        )
    }

    fn fresh_record() -> TokenRecord {
        TokenRecord::from_response(
            TokenEndpointResponse {
                access_token: "cached".to_string(),
                token_type: "Bearer".to_string(),
                expires_in: Some(3600),
                refresh_token: None,
                scope: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_network_calls() {
        let endpoint = Arc::new(CountingEndpoint::new());
        let manager =
            TokenLifecycleManager::new(client_credentials_store(), endpoint.clone());
        manager.install_token(fresh_record()).await;

        let token = manager.get_valid_token().await.unwrap();
        assert_eq!(token.access_token, "cached");
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_cache_triggers_exactly_one_refresh() {
        let endpoint = Arc::new(CountingEndpoint::new());
        let manager = Arc::new(TokenLifecycleManager::new(
            client_credentials_store(),
            endpoint.clone(),
        ));

        // Cache is empty, eight callers race for a token
        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.get_valid_token().await.unwrap()
            }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap());
        }

        assert_eq!(endpoint.calls(), 1);
        // Every caller got the same record
        assert!(tokens.iter().all(|t| t.access_token == tokens[0].access_token));
    }

    #[tokio::test]
    async fn test_near_expiry_token_is_refreshed() {
        let endpoint = Arc::new(CountingEndpoint::new());
        let manager =
            TokenLifecycleManager::new(client_credentials_store(), endpoint.clone());

        // Expires in 2 minutes, inside the 5-minute margin
        let near_expiry = TokenRecord::from_response(
            TokenEndpointResponse {
                access_token: "stale".to_string(),
                token_type: "Bearer".to_string(),
                expires_in: Some(120),
                refresh_token: None,
                scope: None,
            },
            Utc::now(),
        );
        manager.install_token(near_expiry).await;

        let token = manager.get_valid_token().await.unwrap();
        assert_ne!(token.access_token, "stale");
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn test_auth_code_grant_without_refresh_token_fails() {
        let endpoint = Arc::new(CountingEndpoint::new());
        let store = CredentialStore::new(
            "https://auth.example.com/oauth/token",
            GrantConfig::AuthorizationCode {
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
                refresh_token: None,
            },
        );
        let manager = TokenLifecycleManager::new(store, endpoint.clone());

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NoRefreshToken));
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_token_carried_forward_when_not_rotated() {
        let endpoint = Arc::new(CountingEndpoint {
            calls: AtomicUsize::new(0),
            rotate_refresh: false,
        });
        let store = CredentialStore::new(
            "https://auth.example.com/oauth/token",
            GrantConfig::AuthorizationCode {
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
                refresh_token: Some("initial-refresh".to_string()),
            },
        );
        let manager = TokenLifecycleManager::new(store, endpoint)
            .with_renewal_margin(Duration::zero());

        let token = manager.get_valid_token().await.unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("initial-refresh"));
    }

    #[tokio::test]
    async fn test_refreshed_token_persisted_to_store() {
        let endpoint = Arc::new(CountingEndpoint::new());
        let store = Arc::new(InMemoryTokenStore::new());
        let manager = TokenLifecycleManager::new(client_credentials_store(), endpoint)
            .with_store(store.clone());

        let token = manager.get_valid_token().await.unwrap();

        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.access_token, token.access_token);
    }

    #[tokio::test]
    async fn test_fresh_stored_token_adopted_without_refresh() {
        let endpoint = Arc::new(CountingEndpoint::new());
        let store = Arc::new(InMemoryTokenStore::new());
        store.save(&fresh_record()).await.unwrap();

        let manager =
            TokenLifecycleManager::new(client_credentials_store(), endpoint.clone())
                .with_store(store);

        let token = manager.get_valid_token().await.unwrap();
        assert_eq!(token.access_token, "cached");
        assert_eq!(endpoint.calls(), 0);
    }
}

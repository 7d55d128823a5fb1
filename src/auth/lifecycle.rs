//! Single-token lifecycle: authorize, store, test, refresh, revoke
//!
//! All slot mutations go through one async mutex. Refresh and code redemption
//! hold it across the provider round trip, so a concurrent revoke or refresh
//! cannot interleave between reading the slot and writing its replacement.
//! The slot is only written after an exchange has fully succeeded.

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::claims::IdTokenClaims;
use super::error::LifecycleError;
use super::provider::{AuthorizationRedirect, IdentityClient, ProviderExchange, DEFAULT_LIFETIME_SECS};
use super::scopes::{self, MANDATORY_IDENTITY_SCOPES};
use super::tokens::{FlowType, Token, TokenStatistics, TokenStatus, TokenStore};
use super::usage::{NewUsage, UsageLog, UsageRecord};
use crate::api::client::GraphClient;
use crate::config::{ConfigProvider, Configuration};

/// Note attached to a token that authenticates but is not authorized for `/me`.
pub const INSUFFICIENT_PERMISSIONS: &str = "valid but insufficient permissions";

/// Result of a completed authorization.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub token: Token,
    /// Provider response as received
    pub raw: serde_json::Value,
    pub account: Option<IdTokenClaims>,
}

/// Result of a successful refresh.
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub token: Token,
}

/// Result of a revoke call.
#[derive(Debug, Clone)]
pub struct Revocation {
    /// False when the token was already revoked
    pub changed: bool,
    pub token: Token,
}

/// Outcome of a liveness test.
#[derive(Debug, Clone, Serialize)]
pub struct TokenTest {
    pub valid: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub note: Option<String>,
    pub error: Option<String>,
    /// `/me` profile, when the call succeeded
    pub profile: Option<serde_json::Value>,
}

pub struct TokenLifecycle {
    config: Mutex<Box<dyn ConfigProvider>>,
    tokens: Mutex<Box<dyn TokenStore>>,
    usage: Mutex<Box<dyn UsageLog>>,
    graph: GraphClient,
    default_redirect_uri: String,
    pending_state: Mutex<Option<String>>,
    last_exchange: Mutex<Option<serde_json::Value>>,
}

impl TokenLifecycle {
    pub fn new(
        config: Box<dyn ConfigProvider>,
        tokens: Box<dyn TokenStore>,
        usage: Box<dyn UsageLog>,
        graph: GraphClient,
        default_redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            tokens: Mutex::new(tokens),
            usage: Mutex::new(usage),
            graph,
            default_redirect_uri: default_redirect_uri.into(),
            pending_state: Mutex::new(None),
            last_exchange: Mutex::new(None),
        }
    }

    pub fn graph(&self) -> &GraphClient {
        &self.graph
    }

    pub async fn configuration(&self) -> Result<Configuration, LifecycleError> {
        Ok(self.config.lock().await.get()?)
    }

    /// Persist `config` (normalized) and return what was stored.
    pub async fn save_configuration(
        &self,
        config: Configuration,
    ) -> Result<Configuration, LifecycleError> {
        let config = config.normalized();
        self.config.lock().await.set(config.clone())?;
        Ok(config)
    }

    /// Configured redirect URI, or the server's own callback.
    pub fn redirect_uri(&self, config: &Configuration) -> String {
        if config.redirect_uri.is_empty() {
            self.default_redirect_uri.clone()
        } else {
            config.redirect_uri.clone()
        }
    }

    fn identity(&self, config: &Configuration) -> Result<IdentityClient, LifecycleError> {
        IdentityClient::new(self.graph.http().clone(), config)
    }

    /// Build the sign-in URL. The issued `state` is remembered for the callback.
    pub async fn begin_authorization(&self) -> Result<AuthorizationRedirect, LifecycleError> {
        let config = self.configuration().await?;
        let identity = self.identity(&config)?;
        let scopes = scopes::negotiate(&config.scopes);
        let redirect = identity.authorization_url(&scopes, &self.redirect_uri(&config))?;

        *self.pending_state.lock().await = Some(redirect.state.clone());
        tracing::info!("Redirecting to Azure AD login...");
        Ok(redirect)
    }

    /// Compare a callback's `state` with the one issued by
    /// [`begin_authorization`](Self::begin_authorization). Skipped when this
    /// process issued none, as with a `callback` run after a separate `login`.
    pub async fn check_state(&self, returned: Option<&str>) -> Result<(), LifecycleError> {
        let mut pending = self.pending_state.lock().await;
        if let Some(expected) = pending.as_deref() {
            match returned {
                Some(returned) if returned == expected => {}
                Some(_) => {
                    tracing::warn!("Callback state does not match the issued state");
                    return Err(LifecycleError::Authorization(
                        "state mismatch; start the sign-in again".to_string(),
                    ));
                }
                None => {
                    tracing::warn!("Callback carried no state although one was issued");
                    return Err(LifecycleError::Authorization(
                        "state missing; start the sign-in again".to_string(),
                    ));
                }
            }
        }
        *pending = None;
        Ok(())
    }

    /// Redeem an authorization code and overwrite the slot with the result.
    pub async fn complete_authorization(
        &self,
        code: Option<&str>,
    ) -> Result<Authorized, LifecycleError> {
        let code = code
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                LifecycleError::Authorization("Authorization code not received".to_string())
            })?;

        let config = self.configuration().await?;
        let identity = self.identity(&config)?;
        let requested = scopes::negotiate(&config.scopes);

        let mut slot = self.tokens.lock().await;
        tracing::info!("Exchanging authorization code for token...");
        let exchange = identity
            .exchange_code(code, &requested, &self.redirect_uri(&config))
            .await?;

        let (token, account) = build_token(
            &config,
            &exchange,
            FlowType::AuthorizationCode,
            &requested,
            None,
        );

        slot.set(token.clone())?;
        drop(slot);

        *self.last_exchange.lock().await = Some(exchange.raw.clone());
        tracing::info!("Obtained user access token (expires {})", token.expires_at);

        Ok(Authorized {
            token,
            raw: exchange.raw,
            account,
        })
    }

    /// Trade the stored refresh token for a new token.
    pub async fn refresh_token(&self, token_id: &str) -> Result<Refreshed, LifecycleError> {
        let mut slot = self.tokens.lock().await;
        let existing = find(slot.as_ref(), token_id)?;
        let refresh_token = existing
            .refresh_token
            .clone()
            .filter(|rt| !rt.is_empty())
            .ok_or(LifecycleError::NoRefreshToken)?;

        let config = self.configuration().await?;
        let identity = self.identity(&config)?;
        let requested = if existing.scopes.is_empty() {
            MANDATORY_IDENTITY_SCOPES.iter().map(|s| s.to_string()).collect()
        } else {
            existing.scopes.clone()
        };

        tracing::info!("Refreshing token {}...", existing.id);
        let exchange = identity
            .exchange_refresh_token(&refresh_token, &requested)
            .await?;

        let (token, _) = build_token(
            &config,
            &exchange,
            FlowType::RefreshToken,
            &requested,
            Some(&existing),
        );
        slot.replace(token.clone(), Some(TokenStatus::Refreshed))?;
        drop(slot);

        *self.last_exchange.lock().await = Some(exchange.raw);
        tracing::info!("Token refreshed (expires {})", token.expires_at);

        Ok(Refreshed { token })
    }

    /// Flag the token revoked. Revoking twice is a no-op.
    pub async fn revoke_token(&self, token_id: &str) -> Result<Revocation, LifecycleError> {
        let mut slot = self.tokens.lock().await;
        let mut token = find(slot.as_ref(), token_id)?;

        if token.status == TokenStatus::Revoked {
            return Ok(Revocation {
                changed: false,
                token,
            });
        }

        slot.set_status(TokenStatus::Revoked)?;
        token.status = TokenStatus::Revoked;
        tracing::info!("Token {} revoked", token.id);
        Ok(Revocation {
            changed: true,
            token,
        })
    }

    /// Call `/me` with the token and report whether it authenticates.
    pub async fn test_token(&self, token_id: &str) -> Result<TokenTest, LifecycleError> {
        let token = find(self.tokens.lock().await.as_ref(), token_id)?;

        if token.status == TokenStatus::Revoked {
            return Ok(TokenTest {
                valid: false,
                status_code: None,
                response_time_ms: 0,
                note: Some("token has been revoked".to_string()),
                error: None,
                profile: None,
            });
        }

        let url = self.graph.me_url();
        match self.graph.authenticated_get(&url, &token.access_token).await {
            Ok(resp) => {
                let (valid, note) = match resp.status {
                    200..=299 => (true, None),
                    403 => (true, Some(INSUFFICIENT_PERMISSIONS.to_string())),
                    _ => (false, None),
                };
                let error_message =
                    (!valid).then(|| format!("Token validation failed (HTTP {})", resp.status));
                self.record_usage(&token, &url, resp.status, resp.latency_ms, error_message.clone())
                    .await?;

                if valid {
                    let mut slot = self.tokens.lock().await;
                    let unchanged = slot
                        .get()?
                        .map_or(false, |t| t.access_token == token.access_token);
                    if unchanged {
                        slot.mark_used(Utc::now())?;
                    }
                    match &note {
                        Some(note) => tracing::warn!("Token is {}", note),
                        None => tracing::info!("Token validation successful"),
                    }
                } else {
                    tracing::warn!("Token is invalid or expired (HTTP {})", resp.status);
                }

                let profile = resp.is_success().then_some(resp.body);
                Ok(TokenTest {
                    valid,
                    status_code: Some(resp.status),
                    response_time_ms: resp.latency_ms,
                    note,
                    error: error_message,
                    profile,
                })
            }
            Err(failure) => {
                let message = failure.error.to_string();
                self.record_usage(&token, &url, 500, failure.latency_ms, Some(message.clone()))
                    .await?;
                tracing::warn!("Token test could not reach Graph: {}", message);
                Ok(TokenTest {
                    valid: false,
                    status_code: None,
                    response_time_ms: failure.latency_ms,
                    note: None,
                    error: Some(message),
                    profile: None,
                })
            }
        }
    }

    async fn record_usage(
        &self,
        token: &Token,
        endpoint: &str,
        status_code: u16,
        response_time_ms: u64,
        error_message: Option<String>,
    ) -> Result<(), LifecycleError> {
        self.usage.lock().await.append(NewUsage {
            token_id: token.id,
            endpoint: endpoint.to_string(),
            method: "GET".to_string(),
            status_code,
            response_time_ms,
            error_message,
        })?;
        Ok(())
    }

    /// Whatever occupies the slot, in any state.
    pub async fn current_token(&self) -> Result<Option<Token>, LifecycleError> {
        Ok(self.tokens.lock().await.get()?)
    }

    /// The slot's token when it is active and unexpired.
    pub async fn active_token(&self) -> Result<Option<Token>, LifecycleError> {
        let now = Utc::now();
        Ok(self
            .current_token()
            .await?
            .filter(|t| t.status == TokenStatus::Active && !t.is_expired(now)))
    }

    /// Tokens displaced from the slot, most recent first.
    pub async fn retired_tokens(&self) -> Result<Vec<Token>, LifecycleError> {
        Ok(self.tokens.lock().await.retired()?)
    }

    pub async fn usage_history(&self, limit: usize) -> Result<Vec<UsageRecord>, LifecycleError> {
        Ok(self.usage.lock().await.list_recent(limit)?)
    }

    pub async fn statistics(&self) -> Result<TokenStatistics, LifecycleError> {
        let slot = self.current_token().await?;
        Ok(TokenStatistics::from_slot(slot.as_ref(), Utc::now()))
    }

    /// The last raw provider response, handed out once.
    pub async fn take_last_exchange(&self) -> Option<serde_json::Value> {
        self.last_exchange.lock().await.take()
    }
}

/// The slot's token if `token_id` names it.
fn find(store: &dyn TokenStore, token_id: &str) -> Result<Token, LifecycleError> {
    store
        .get()?
        .filter(|t| t.matches_id(token_id))
        .ok_or_else(|| LifecycleError::NotFound(token_id.to_string()))
}

fn build_token(
    config: &Configuration,
    exchange: &ProviderExchange,
    flow_type: FlowType,
    requested: &[String],
    previous: Option<&Token>,
) -> (Token, Option<IdTokenClaims>) {
    let response = &exchange.response;
    let now = Utc::now();
    let lifetime = response
        .expires_in
        .unwrap_or(DEFAULT_LIFETIME_SECS)
        .min(u64::from(u32::MAX));
    let account = response.id_token.as_deref().and_then(IdTokenClaims::decode);

    let token = Token {
        id: previous.map_or(super::tokens::SLOT_ID, |t| t.id),
        client_id: config.client_id.clone(),
        tenant_id: config.tenant_id.clone(),
        access_token: response.access_token.clone(),
        // Providers may omit a rotated refresh token; the old one stays valid.
        refresh_token: response
            .refresh_token
            .clone()
            .or_else(|| previous.and_then(|t| t.refresh_token.clone())),
        token_type: response
            .token_type
            .clone()
            .unwrap_or_else(|| "Bearer".to_string()),
        expires_at: now + Duration::seconds(lifetime as i64),
        scopes: scopes::granted_scopes(response.scope.as_deref(), requested),
        flow_type,
        user_id: account
            .as_ref()
            .and_then(IdTokenClaims::home_account_id)
            .or_else(|| previous.and_then(|t| t.user_id.clone())),
        status: TokenStatus::Active,
        created_at: now,
        last_used: None,
    };
    (token, account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::closed_port_uri;
    use crate::auth::claims::encode_test_id_token;
    use crate::auth::tokens::{sample_token, MemoryTokenStore, SLOT_ID};
    use crate::auth::usage::MemoryUsageLog;
    use crate::config::MemoryConfig;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{bearer_token, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials(authority: &str) -> Configuration {
        Configuration {
            client_id: "c1".into(),
            client_secret: "s1".into(),
            tenant_id: "t1".into(),
            authority: authority.into(),
            scopes: vec!["https://graph.microsoft.com/Calendars.Read".into()],
            ..Default::default()
        }
    }

    fn lifecycle(server: &MockServer, config: Configuration) -> TokenLifecycle {
        lifecycle_at(&server.uri(), config)
    }

    fn lifecycle_at(base: &str, config: Configuration) -> TokenLifecycle {
        TokenLifecycle::new(
            Box::new(MemoryConfig::new(config)),
            Box::new(MemoryTokenStore::new()),
            Box::new(MemoryUsageLog::new()),
            GraphClient::new(reqwest::Client::new()).with_base_url(&format!("{}/v1.0", base)),
            "http://localhost:3000/api/auth/callback",
        )
    }

    async fn with_provider(server: &MockServer) -> TokenLifecycle {
        lifecycle(server, credentials(&format!("{}/t1", server.uri())))
    }

    async fn seed(lc: &TokenLifecycle, token: Token) {
        lc.tokens.lock().await.set(token).unwrap();
    }

    async fn mount_token_response(server: &MockServer, grant: &str, status: u16, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .and(body_string_contains(format!("grant_type={}", grant)))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_me(server: &MockServer, status: u16) {
        Mock::given(method("GET"))
            .and(path("/v1.0/me"))
            .and(bearer_token("AT"))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(serde_json::json!({"id": "u1", "displayName": "Adele Vance"})),
            )
            .mount(server)
            .await;
    }

    fn assert_close(actual: chrono::DateTime<Utc>, expected: chrono::DateTime<Utc>) {
        let drift = (actual - expected).num_milliseconds().abs();
        assert!(drift <= 1000, "drift of {}ms", drift);
    }

    #[tokio::test]
    async fn test_begin_authorization_scope_negotiation() {
        let server = MockServer::start().await;
        let lc = lifecycle(&server, credentials(""));

        let redirect = lc.begin_authorization().await.unwrap();
        let url = url::Url::parse(&redirect.url).unwrap();
        let scope = url
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        assert!(scope.starts_with(
            "https://graph.microsoft.com/User.Read openid profile email offline_access"
        ));
        assert!(scope.ends_with("https://graph.microsoft.com/Calendars.Read"));
        assert!(!redirect.url.contains(".default"));
        assert!(redirect.url.contains("response_mode=query"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_begin_authorization_requires_credentials() {
        let server = MockServer::start().await;
        let lc = lifecycle(
            &server,
            Configuration {
                client_id: "c1".into(),
                ..Default::default()
            },
        );
        let err = lc.begin_authorization().await.unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[tokio::test]
    async fn test_complete_authorization_stores_single_active_token() {
        let server = MockServer::start().await;
        mount_token_response(
            &server,
            "authorization_code",
            200,
            serde_json::json!({
                "access_token": "AT",
                "refresh_token": "RT",
                "expires_in": 3600,
                "scope": "User.Read",
            }),
        )
        .await;
        let lc = with_provider(&server).await;
        seed(&lc, sample_token("old", Some("old-rt"))).await;

        let authorized = lc.complete_authorization(Some("code-1")).await.unwrap();

        let stored = lc.current_token().await.unwrap().unwrap();
        assert_eq!(stored, authorized.token);
        assert_eq!(stored.access_token, "AT");
        assert_eq!(stored.refresh_token.as_deref(), Some("RT"));
        assert_eq!(stored.scopes, vec!["User.Read".to_string()]);
        assert_eq!(stored.status, TokenStatus::Active);
        assert_eq!(stored.flow_type, FlowType::AuthorizationCode);
        assert_eq!(stored.id, SLOT_ID);
        assert_close(stored.expires_at, Utc::now() + Duration::seconds(3600));
        assert_eq!(authorized.raw["scope"], "User.Read");

        let retired = lc.retired_tokens().await.unwrap();
        assert_eq!(retired[0].access_token, "old");

        assert_eq!(lc.take_last_exchange().await.unwrap()["refresh_token"], "RT");
        assert!(lc.take_last_exchange().await.is_none());
    }

    #[tokio::test]
    async fn test_complete_authorization_reads_account_from_id_token() {
        let server = MockServer::start().await;
        let id_token = encode_test_id_token(&serde_json::json!({
            "oid": "o1",
            "tid": "t1",
            "preferred_username": "adele@contoso.com",
        }));
        mount_token_response(
            &server,
            "authorization_code",
            200,
            serde_json::json!({"access_token": "AT", "expires_in": 60, "id_token": id_token}),
        )
        .await;
        let lc = with_provider(&server).await;

        let authorized = lc.complete_authorization(Some("code-1")).await.unwrap();
        assert_eq!(authorized.token.user_id.as_deref(), Some("o1.t1"));
        assert_eq!(
            authorized.account.unwrap().preferred_username.as_deref(),
            Some("adele@contoso.com")
        );
        // No scope reported: the requested scopes are recorded.
        assert_eq!(authorized.token.scopes[0], scopes::GRAPH_USER_READ);
        assert!(authorized.token.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_complete_authorization_without_code() {
        let server = MockServer::start().await;
        let lc = with_provider(&server).await;

        for code in [None, Some(""), Some("   ")] {
            let err = lc.complete_authorization(code).await.unwrap_err();
            assert_eq!(err.kind(), "AuthorizationError");
        }
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_authorization_provider_rejection_keeps_slot() {
        let server = MockServer::start().await;
        mount_token_response(
            &server,
            "authorization_code",
            400,
            serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS54005: OAuth2 Authorization code was already redeemed.",
            }),
        )
        .await;
        let lc = with_provider(&server).await;
        seed(&lc, sample_token("keep", None)).await;

        let err = lc.complete_authorization(Some("used")).await.unwrap_err();
        assert!(err.to_string().contains("AADSTS54005"));
        assert_eq!(err.kind(), "TokenExchangeError");
        assert_eq!(lc.current_token().await.unwrap().unwrap().access_token, "keep");
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let server = MockServer::start().await;
        let lc = with_provider(&server).await;
        let token = sample_token("AT", None);
        seed(&lc, token.clone()).await;

        let err = lc.refresh_token("1").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NoRefreshToken));
        assert_eq!(lc.current_token().await.unwrap().unwrap(), token);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_refresh_token_when_omitted() {
        let server = MockServer::start().await;
        mount_token_response(
            &server,
            "refresh_token",
            200,
            serde_json::json!({"access_token": "AT2", "expires_in": 3600, "scope": "User.Read"}),
        )
        .await;
        let lc = with_provider(&server).await;
        let mut previous = sample_token("AT", Some("RT"));
        previous.user_id = Some("o1.t1".into());
        seed(&lc, previous).await;

        let refreshed = lc.refresh_token("1").await.unwrap();

        let stored = lc.current_token().await.unwrap().unwrap();
        assert_eq!(stored, refreshed.token);
        assert_eq!(stored.access_token, "AT2");
        assert_eq!(stored.refresh_token.as_deref(), Some("RT"));
        assert_eq!(stored.flow_type, FlowType::RefreshToken);
        assert_eq!(stored.status, TokenStatus::Active);
        assert_eq!(stored.user_id.as_deref(), Some("o1.t1"));

        let retired = lc.retired_tokens().await.unwrap();
        assert_eq!(retired[0].access_token, "AT");
        assert_eq!(retired[0].status, TokenStatus::Refreshed);
    }

    #[tokio::test]
    async fn test_refresh_takes_rotated_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t1/oauth2/v2.0/token"))
            .and(body_string_contains("refresh_token=RT"))
            .and(body_string_contains("scope=User.Read"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "AT2",
                "refresh_token": "RT2",
                "expires_in": 1800,
            })))
            .expect(1)
            .mount(&server)
            .await;
        let lc = with_provider(&server).await;
        seed(&lc, sample_token("AT", Some("RT"))).await;

        let refreshed = lc.refresh_token("1").await.unwrap();
        assert_eq!(refreshed.token.refresh_token.as_deref(), Some("RT2"));
        // Scope not reported: the previously granted scopes carry over.
        assert_eq!(refreshed.token.scopes, vec!["User.Read".to_string()]);
        assert_close(refreshed.token.expires_at, Utc::now() + Duration::seconds(1800));
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_slot_untouched() {
        let server = MockServer::start().await;
        mount_token_response(
            &server,
            "refresh_token",
            400,
            serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS700082: The refresh token has expired due to inactivity.",
            }),
        )
        .await;
        let lc = with_provider(&server).await;
        let token = sample_token("AT", Some("RT"));
        seed(&lc, token.clone()).await;

        let err = lc.refresh_token("1").await.unwrap_err();
        match err {
            LifecycleError::TokenExchange { description, .. } => {
                assert!(description.starts_with("AADSTS700082"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(lc.current_token().await.unwrap().unwrap(), token);
        assert!(lc.retired_tokens().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_requires_configuration() {
        let server = MockServer::start().await;
        let lc = lifecycle(&server, Configuration::default());
        seed(&lc, sample_token("AT", Some("RT"))).await;

        let err = lc.refresh_token("1").await.unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[tokio::test]
    async fn test_refresh_unknown_token() {
        let server = MockServer::start().await;
        let lc = with_provider(&server).await;
        assert_eq!(lc.refresh_token("1").await.unwrap_err().kind(), "NotFoundError");

        seed(&lc, sample_token("AT", Some("RT"))).await;
        assert_eq!(lc.refresh_token("2").await.unwrap_err().kind(), "NotFoundError");
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let server = MockServer::start().await;
        let lc = with_provider(&server).await;

        let err = lc.revoke_token("1").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));

        seed(&lc, sample_token("AT", None)).await;
        let first = lc.revoke_token("1").await.unwrap();
        assert!(first.changed);
        assert_eq!(first.token.status, TokenStatus::Revoked);

        let second = assert_ok!(lc.revoke_token("1").await);
        assert!(!second.changed);

        let stored = lc.current_token().await.unwrap().unwrap();
        assert_eq!(stored.status, TokenStatus::Revoked);
        assert!(lc.active_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forbidden_counts_as_valid() {
        let server = MockServer::start().await;
        mount_me(&server, 403).await;
        let lc = with_provider(&server).await;
        seed(&lc, sample_token("AT", None)).await;

        let test = lc.test_token("1").await.unwrap();
        assert!(test.valid);
        assert_eq!(test.note.as_deref(), Some(INSUFFICIENT_PERMISSIONS));
        assert_eq!(test.status_code, Some(403));

        let usage = lc.usage_history(10).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].status_code, 403);
        assert_eq!(usage[0].method, "GET");
        assert!(usage[0].endpoint.ends_with("/v1.0/me"));
    }

    #[tokio::test]
    async fn test_unauthorized_is_invalid() {
        let server = MockServer::start().await;
        mount_me(&server, 401).await;
        let lc = with_provider(&server).await;
        seed(&lc, sample_token("AT", None)).await;

        let test = lc.test_token("1").await.unwrap();
        assert!(!test.valid);
        assert!(test.note.is_none());

        let usage = lc.usage_history(10).await.unwrap();
        assert_eq!(usage[0].status_code, 401);
        assert!(usage[0].error_message.is_some());
        assert!(lc.current_token().await.unwrap().unwrap().last_used.is_none());
    }

    #[tokio::test]
    async fn test_success_marks_token_used() {
        let server = MockServer::start().await;
        mount_me(&server, 200).await;
        let lc = with_provider(&server).await;
        seed(&lc, sample_token("AT", None)).await;

        let test = lc.test_token("1").await.unwrap();
        assert!(test.valid);
        assert_eq!(test.profile.unwrap()["displayName"], "Adele Vance");
        assert!(lc.current_token().await.unwrap().unwrap().last_used.is_some());
        assert_eq!(lc.usage_history(10).await.unwrap()[0].status_code, 200);
    }

    #[tokio::test]
    async fn test_network_failure_logs_500() {
        let base = closed_port_uri();
        let lc = lifecycle_at(&base, credentials(&format!("{}/t1", base)));
        seed(&lc, sample_token("AT", None)).await;

        let test = lc.test_token("1").await.unwrap();
        assert!(!test.valid);
        assert!(test.error.is_some());

        let usage = lc.usage_history(10).await.unwrap();
        assert_eq!(usage[0].status_code, 500);
        assert!(usage[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_revoked_token_is_not_sent() {
        let server = MockServer::start().await;
        let lc = with_provider(&server).await;
        seed(&lc, sample_token("AT", None)).await;
        lc.revoke_token("1").await.unwrap();

        let test = lc.test_token("1").await.unwrap();
        assert!(!test.valid);
        assert!(server.received_requests().await.unwrap().is_empty());
        assert!(lc.usage_history(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_test_unknown_token() {
        let server = MockServer::start().await;
        let lc = with_provider(&server).await;
        assert_err!(lc.test_token("1").await);
    }

    #[tokio::test]
    async fn test_state_check() {
        let server = MockServer::start().await;
        let lc = lifecycle(&server, credentials(""));

        // Nothing issued yet: callbacks from another process are accepted.
        assert_ok!(lc.check_state(Some("anything")).await);

        let redirect = lc.begin_authorization().await.unwrap();
        let err = lc.check_state(Some("forged")).await.unwrap_err();
        assert_eq!(err.kind(), "AuthorizationError");
        assert_ok!(lc.check_state(Some(redirect.state.as_str())).await);
    }

    #[tokio::test]
    async fn test_missing_state_rejected_once_issued() {
        let server = MockServer::start().await;
        let lc = lifecycle(&server, credentials(""));

        assert_ok!(lc.check_state(None).await);

        let redirect = lc.begin_authorization().await.unwrap();
        let err = lc.check_state(None).await.unwrap_err();
        assert_eq!(err.kind(), "AuthorizationError");

        // The issued state stays pending until a matching callback arrives.
        assert_ok!(lc.check_state(Some(redirect.state.as_str())).await);
        assert_ok!(lc.check_state(None).await);
    }

    #[tokio::test]
    async fn test_statistics_follow_slot() {
        let server = MockServer::start().await;
        let lc = with_provider(&server).await;
        assert_eq!(lc.statistics().await.unwrap().total_tokens, 0);

        seed(&lc, sample_token("AT", None)).await;
        assert_eq!(lc.statistics().await.unwrap().active_tokens, 1);

        lc.revoke_token("1").await.unwrap();
        let stats = lc.statistics().await.unwrap();
        assert_eq!((stats.total_tokens, stats.revoked_tokens), (1, 1));
    }

    #[tokio::test]
    async fn test_redirect_uri_fallback() {
        let server = MockServer::start().await;
        let lc = with_provider(&server).await;
        let mut config = lc.configuration().await.unwrap();
        assert_eq!(lc.redirect_uri(&config), "http://localhost:3000/api/auth/callback");

        config.redirect_uri = "https://app.example.com/cb".into();
        let saved = lc.save_configuration(config).await.unwrap();
        assert_eq!(lc.redirect_uri(&saved), "https://app.example.com/cb");
    }
}

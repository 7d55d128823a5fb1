//! Microsoft identity platform client
//!
//! The authorization URL is built with the `oauth2` crate. Token requests are
//! posted to the token endpoint directly so that every field the endpoint
//! returns (the refresh token in particular) reaches the caller untouched.

use oauth2::{basic::BasicClient, AuthUrl, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope};
use serde::{Deserialize, Deserializer, Serialize};

use super::error::LifecycleError;
use super::scopes;
use crate::config::Configuration;

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_LIFETIME_SECS: u64 = 3600;

/// Where to send the user's browser.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRedirect {
    pub url: String,
    /// CSRF `state` value embedded in `url`
    pub state: String,
    pub scopes: Vec<String>,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default, deserialize_with = "lifetime")]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Space-separated granted scopes
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Error body returned by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderError {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ProviderError {
    /// Human-readable reason for a failed token request.
    pub fn describe(status: u16, body: &str) -> String {
        match serde_json::from_str::<ProviderError>(body) {
            Ok(err) => err
                .error_description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or(err.error),
            Err(_) if body.trim().is_empty() => format!("HTTP {}", status),
            Err(_) => format!("HTTP {}: {}", status, body.trim()),
        }
    }
}

/// A parsed token response together with the raw JSON, kept for display.
#[derive(Debug, Clone)]
pub struct ProviderExchange {
    pub response: ProviderTokenResponse,
    pub raw: serde_json::Value,
}

/// `expires_in` is a number on the v2 endpoint but a string on some older ones.
fn lifetime<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Seconds>::deserialize(deserializer)? {
        Some(Seconds::Number(n)) => Some(n),
        Some(Seconds::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Confidential client for one application registration.
pub struct IdentityClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    authority: String,
}

impl IdentityClient {
    /// Fails with a configuration error when credentials are incomplete.
    pub fn new(http: reqwest::Client, config: &Configuration) -> Result<Self, LifecycleError> {
        config.require_credentials()?;
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authority: config.authority(),
        })
    }

    fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority)
    }

    fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority)
    }

    /// Build the sign-in URL with `response_mode=query`.
    pub fn authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<AuthorizationRedirect, LifecycleError> {
        let auth_url = AuthUrl::new(self.authorize_endpoint())
            .map_err(|e| LifecycleError::Configuration(format!("invalid authority: {}", e)))?;
        let redirect_url = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| LifecycleError::Configuration(format!("invalid redirect URI: {}", e)))?;

        let client = BasicClient::new(
            ClientId::new(self.client_id.clone()),
            Some(ClientSecret::new(self.client_secret.clone())),
            auth_url,
            None,
        )
        .set_redirect_uri(redirect_url);

        let (url, state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .add_extra_param("response_mode", "query")
            .url();

        Ok(AuthorizationRedirect {
            url: url.to_string(),
            state: state.secret().clone(),
            scopes: scopes.to_vec(),
        })
    }

    /// Redeem an authorization code.
    pub async fn exchange_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<ProviderExchange, LifecycleError> {
        let scope = scopes::join(scopes);
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
        ])
        .await
    }

    /// Redeem a refresh token.
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<ProviderExchange, LifecycleError> {
        let scope = scopes::join(scopes);
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<ProviderExchange, LifecycleError> {
        let url = self.token_endpoint();
        tracing::debug!("POST {}", url);

        let resp = self.http.post(&url).form(form).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let description = ProviderError::describe(status.as_u16(), &body);
            tracing::warn!("Token endpoint returned HTTP {}: {}", status.as_u16(), description);
            return Err(LifecycleError::TokenExchange {
                status: status.as_u16(),
                description,
            });
        }

        let malformed = |e: serde_json::Error| LifecycleError::TokenExchange {
            status: status.as_u16(),
            description: format!("malformed token response: {}", e),
        };
        let raw: serde_json::Value = serde_json::from_str(&body).map_err(malformed)?;
        let response: ProviderTokenResponse =
            serde_json::from_value(raw.clone()).map_err(malformed)?;

        Ok(ProviderExchange { response, raw })
    }
}

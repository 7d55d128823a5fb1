use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;
use crate::api::RelayRequest;
use crate::auth::usage::DEFAULT_HISTORY_LIMIT;
use crate::auth::LifecycleError;
use crate::config::{mask, Configuration, ConfigurationUpdate};

// --- Request types ---

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    pub auth: Option<String>,
    pub message: Option<String>,
    pub show_response: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsageQuery {
    pub limit: Option<usize>,
}

// --- Handlers ---

pub async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<Value>, ApiError> {
    let lifecycle = &state.lifecycle;
    let token = lifecycle.active_token().await?;
    let stats = lifecycle.statistics().await?;
    let config = lifecycle.configuration().await?.masked();
    let token_response = if query.show_response.unwrap_or(false) {
        lifecycle.take_last_exchange().await
    } else {
        None
    };

    Ok(Json(json!({
        "success": true,
        "token": token,
        "stats": stats,
        "config": config,
        "tokenResponse": token_response,
        "auth": query.auth,
        "message": query.message,
    })))
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn get_config(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let config = state.lifecycle.configuration().await?;
    Ok(Json(json!({ "success": true, "config": config.masked() })))
}

/// Replace the configuration. A secret that is omitted, or echoed back in
/// masked form, keeps the stored secret.
pub async fn save_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigurationUpdate>,
) -> Result<Json<Value>, ApiError> {
    let current = state.lifecycle.configuration().await?;
    let keep_secret = match update.client_secret.as_deref() {
        None => true,
        Some(secret) => !current.client_secret.is_empty() && secret == mask(&current.client_secret),
    };

    let mut config = Configuration::from(update);
    if keep_secret {
        config.client_secret = current.client_secret;
    }
    state.lifecycle.save_configuration(config).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn login(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    let redirect = state.lifecycle.begin_authorization().await?;
    Ok(Redirect::to(&redirect.url))
}

pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    match complete_callback(&state, query).await {
        Ok(()) => Redirect::to("/?auth=success&show_response=true"),
        Err(e) => {
            tracing::error!("Authorization callback failed: {}", e);
            let message: String =
                url::form_urlencoded::byte_serialize(e.to_string().as_bytes()).collect();
            Redirect::to(&format!("/?auth=error&message={}", message))
        }
    }
}

async fn complete_callback(state: &AppState, query: CallbackQuery) -> Result<(), LifecycleError> {
    if let Some(error) = query.error {
        return Err(LifecycleError::Authorization(
            query.error_description.unwrap_or(error),
        ));
    }
    state.lifecycle.check_state(query.state.as_deref()).await?;
    state
        .lifecycle
        .complete_authorization(query.code.as_deref())
        .await?;
    Ok(())
}

pub async fn test_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let test = state.lifecycle.test_token(&id).await?;

    let mut body = json!({
        "success": true,
        "valid": test.valid,
        "responseTime": test.response_time_ms,
    });
    if let Some(status) = test.status_code {
        body["statusCode"] = json!(status);
    }
    if let Some(note) = test.note {
        body["note"] = json!(note);
    }
    if let Some(error) = test.error {
        body["error"] = json!(error);
    }
    Ok(Json(body))
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let revocation = state.lifecycle.revoke_token(&id).await?;
    Ok(Json(json!({
        "success": true,
        "changes": u8::from(revocation.changed),
    })))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let refreshed = state.lifecycle.refresh_token(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Token refreshed successfully",
        "expires_at": refreshed.token.expires_at,
    })))
}

/// The usage log is shared by every token that has occupied the slot, so
/// `id` is only checked for existence.
pub async fn token_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Value>, ApiError> {
    let current = state.lifecycle.current_token().await?;
    if !current.map_or(false, |t| t.matches_id(&id)) {
        return Err(LifecycleError::NotFound(id).into());
    }
    let usage = state
        .lifecycle
        .usage_history(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;
    Ok(Json(json!({ "success": true, "usage": usage })))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.lifecycle.statistics().await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

pub async fn test_request(
    State(state): State<AppState>,
    Json(request): Json<RelayRequest>,
) -> Result<Json<Value>, ApiError> {
    let response = state.lifecycle.graph().relay(request).await?;
    Ok(Json(json!({ "success": true, "response": response })))
}

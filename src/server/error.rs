use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::api::RelayError;
use crate::auth::LifecycleError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Lifecycle(e) => match e {
                LifecycleError::Configuration(_)
                | LifecycleError::Authorization(_)
                | LifecycleError::TokenExchange { .. }
                | LifecycleError::NoRefreshToken => StatusCode::BAD_REQUEST,
                LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
                LifecycleError::Network(_) => StatusCode::BAD_GATEWAY,
                LifecycleError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Relay(RelayError::Network { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Relay(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }

        let body = match &self {
            ApiError::Lifecycle(LifecycleError::TokenExchange { status, .. }) => json!({
                "success": false,
                "error": self.to_string(),
                "kind": "TokenExchangeError",
                "providerStatus": status,
            }),
            ApiError::Lifecycle(e) => json!({
                "success": false,
                "error": e.to_string(),
                "kind": e.kind(),
            }),
            ApiError::Relay(RelayError::Network {
                message,
                response_time,
            }) => json!({
                "success": false,
                "error": message,
                "responseTime": response_time,
            }),
            ApiError::Relay(e) => json!({
                "success": false,
                "error": e.to_string(),
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const SYSTEM_SUBJECT: &str = "system";
pub const SYSTEM_ROLE: &str = "system";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthResponse {
    pub token: String,
    pub expires_in: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Failed to create token: {0}")]
    TokenCreation(String),
    #[error("Failed to verify token: {0}")]
    TokenVerification(String),
    #[error("Token has expired")]
    Expired,
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Token does not identify a user")]
    NotAUser,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::TokenCreation(_) => "could not create token".to_string(),
            other => other.to_string(),
        };
        (StatusCode::UNAUTHORIZED, Json(json!({ "message": message }))).into_response()
    }
}

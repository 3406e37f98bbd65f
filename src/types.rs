//! Wire types for the portal API

use serde::{Deserialize, Serialize};

/// Body of `POST /auth/refresh`
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Successful response of `POST /auth/refresh`
///
/// The server only rotates the access token; the refresh token stays valid
/// until it expires server-side.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Body of `POST /auth/login` and `POST /auth/register`
#[derive(Debug, Clone, Serialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

/// Token pair returned by login and register
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Structured error body the API may return on non-2xx responses.
///
/// Either field may be absent; consumers fall back to a status-coded message.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    /// Best human-readable message, preferring `detail` over `message`.
    pub fn into_message(self) -> Option<String> {
        self.detail.or(self.message)
    }
}

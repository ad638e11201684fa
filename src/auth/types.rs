// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access/refresh token pair as persisted between process invocations
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Expiry decoded from the access token's `exp` claim, when present
    pub expires_at: Option<i64>,
}

impl Credential {
    /// Build a credential, deriving the expiry from the token itself
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        let access_token = access_token.into();
        let expires_at = super::claims::decode_claims(&access_token)
            .ok()
            .and_then(|claims| claims.exp);

        Self {
            access_token,
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            expires_at,
        }
    }

    /// Expiry as a UTC timestamp
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    }
}

/// Claims read from an access token payload (signature is never verified)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenClaims {
    pub exp: Option<i64>,
    pub subject: Option<String>,
}

/// Summary of the stored credential for display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub subject: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub seconds_remaining: Option<i64>,
    pub expiring_soon: bool,
    pub has_refresh_token: bool,
}

/// Login request
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Login response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: Option<LoginUser>,
}

#[derive(Deserialize)]
pub struct LoginUser {
    pub id: Option<serde_json::Value>,
}

/// Refresh request
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Refresh response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

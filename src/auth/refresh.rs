// Login and token refresh exchanges against the authentication service

use reqwest::{Client, StatusCode};

use super::types::{
    Credential, LoginRequest, LoginResponse, RefreshRequest, RefreshResponse,
};
use super::{LOGIN_PATH, REFRESH_PATH};
use crate::error::{ProbeError, Result};

/// Build an endpoint URL under the auth host
pub fn auth_url(auth_host: &str, path: &str) -> String {
    format!("{}{}", auth_host.trim_end_matches('/'), path)
}

/// Exchange the refresh token for a new credential
///
/// Does not touch storage; the caller persists the result.
pub async fn refresh_credential(
    client: &Client,
    auth_host: &str,
    creds: &Credential,
) -> Result<Credential> {
    let refresh_token = creds
        .refresh_token
        .as_deref()
        .ok_or_else(|| ProbeError::RefreshFailed {
            status: None,
            message: "no refresh token stored".to_string(),
        })?;

    let url = auth_url(auth_host, REFRESH_PATH);
    tracing::info!("Refreshing access token via {}", url);

    let response = client
        .post(&url)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await
        .map_err(|e| ProbeError::RefreshFailed {
            status: None,
            message: ProbeError::transport(&e).to_string(),
        })?;

    let status = response.status();
    if status != StatusCode::OK {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Token refresh rejected"
        );
        return Err(ProbeError::RefreshFailed {
            status: Some(status.as_u16()),
            message: format!("{} - {}", status, error_text),
        });
    }

    let data: RefreshResponse = response.json().await.map_err(|e| ProbeError::RefreshFailed {
        status: Some(status.as_u16()),
        message: format!("unrecognized refresh response: {}", e),
    })?;

    if data.access_token.is_empty() {
        return Err(ProbeError::RefreshFailed {
            status: Some(status.as_u16()),
            message: "refresh response does not contain accessToken".to_string(),
        });
    }

    // Issuers may rotate the refresh token or leave it out
    let refresh_token = data
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| creds.refresh_token.clone());
    let refreshed = Credential::new(data.access_token, refresh_token);

    tracing::info!(
        "Token refreshed, expires: {}",
        refreshed
            .expires_at_utc()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    );

    Ok(refreshed)
}

/// Log in with email and password
pub async fn login(
    client: &Client,
    auth_host: &str,
    email: &str,
    password: &str,
) -> Result<Credential> {
    let url = auth_url(auth_host, LOGIN_PATH);
    tracing::info!("Logging in as {} via {}", email, url);

    let response = client
        .post(&url)
        .json(&LoginRequest { email, password })
        .send()
        .await
        .map_err(|e| ProbeError::transport(&e))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), body = %error_text, "Login rejected");
        return Err(ProbeError::LoginFailed {
            status: Some(status.as_u16()),
            message: format!("{} - {}", status, error_text),
        });
    }

    let data: LoginResponse = response.json().await.map_err(|e| ProbeError::ShapeNotRecognized {
        endpoint: LOGIN_PATH.to_string(),
        detail: e.to_string(),
    })?;

    if data.access_token.is_empty() {
        return Err(ProbeError::LoginFailed {
            status: Some(status.as_u16()),
            message: "login response does not contain accessToken".to_string(),
        });
    }

    if let Some(id) = data.user.and_then(|u| u.id) {
        tracing::debug!(user_id = %id, "Login response carried user id");
    }

    Ok(Credential::new(data.access_token, data.refresh_token))
}

use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::claims;
use super::credentials::CredentialStore;
use super::refresh;
use super::types::{Credential, TokenStatus};
use crate::error::{ProbeError, Result};

/// Default expiry buffer: refresh tokens expiring within 5 minutes
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;

/// Token lifecycle manager
/// Decides whether the stored access token is usable, refreshes it and persists the result
pub struct TokenManager {
    /// Durable credential storage
    store: Arc<dyn CredentialStore>,

    /// HTTP client for login and refresh requests
    client: Client,

    /// Base URL of the authentication service
    auth_host: String,

    /// Expiry buffer in seconds
    refresh_buffer: i64,

    /// Serializes refreshes within this process
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    /// Create a new TokenManager
    pub fn new(
        store: Arc<dyn CredentialStore>,
        auth_host: impl Into<String>,
        refresh_buffer: i64,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProbeError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(store, auth_host, refresh_buffer, client))
    }

    /// Create a TokenManager around an existing HTTP client
    pub fn with_client(
        store: Arc<dyn CredentialStore>,
        auth_host: impl Into<String>,
        refresh_buffer: i64,
        client: Client,
    ) -> Self {
        Self {
            store,
            client,
            auth_host: auth_host.into(),
            refresh_buffer,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn auth_host(&self) -> &str {
        &self.auth_host
    }

    pub fn refresh_buffer(&self) -> i64 {
        self.refresh_buffer
    }

    /// Read the persisted credential
    pub fn load_credential(&self) -> Result<Credential> {
        self.store.load()
    }

    /// Check the credential against an explicit buffer
    pub fn is_expiring_soon(&self, credential: &Credential, buffer_seconds: i64) -> bool {
        claims::is_expiring_soon(credential, buffer_seconds)
    }

    /// Exchange the refresh token and persist the new credential
    ///
    /// On failure the stored credential is left untouched.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let refreshed = refresh::refresh_credential(&self.client, &self.auth_host, credential).await?;

        // The refresh already succeeded; a failed write only costs the next process a refresh
        if let Err(e) = self.store.save(&refreshed) {
            tracing::error!(
                "Refreshed credential could not be persisted to {}: {}",
                self.store.location(),
                e
            );
        }

        Ok(refreshed)
    }

    /// Get a valid access token using the configured buffer
    pub async fn ensure_valid_credential(&self) -> Result<String> {
        self.ensure_valid_credential_with_buffer(self.refresh_buffer)
            .await
    }

    /// Load, check expiry, refresh if needed and return the access token
    pub async fn ensure_valid_credential_with_buffer(&self, buffer_seconds: i64) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        let credential = self
            .load_credential()
            .map_err(|e| ProbeError::AuthenticationUnavailable(Box::new(e)))?;

        if !self.is_expiring_soon(&credential, buffer_seconds) {
            return Ok(credential.access_token);
        }

        tracing::debug!(buffer_seconds, "Access token expiring soon, refreshing");
        match self.refresh(&credential).await {
            Ok(refreshed) => Ok(refreshed.access_token),
            Err(e) => {
                tracing::error!("Token refresh failed: {}", e);
                Err(ProbeError::AuthenticationUnavailable(Box::new(e)))
            }
        }
    }

    /// Refresh regardless of expiry
    pub async fn force_refresh(&self) -> Result<Credential> {
        let _guard = self.refresh_lock.lock().await;
        let credential = self.load_credential()?;
        self.refresh(&credential).await
    }

    /// Log in and persist the resulting credential
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential> {
        let credential = refresh::login(&self.client, &self.auth_host, email, password).await?;
        self.store.save(&credential)?;
        tracing::info!("Login successful, credential saved to {}", self.store.location());
        Ok(credential)
    }

    /// Describe the stored credential
    pub fn status(&self) -> Result<TokenStatus> {
        let credential = self.load_credential()?;
        let claims = claims::decode_claims(&credential.access_token).unwrap_or_default();
        let now = Utc::now().timestamp();

        Ok(TokenStatus {
            subject: claims.subject,
            expires_at: credential.expires_at_utc(),
            seconds_remaining: credential.expires_at.map(|exp| exp - now),
            expiring_soon: self.is_expiring_soon(&credential, self.refresh_buffer),
            has_refresh_token: credential.refresh_token.is_some(),
        })
    }
}

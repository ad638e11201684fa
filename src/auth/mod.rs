// Authentication module
// Manages token lifecycle and credential persistence

pub mod claims;
mod credentials;
mod manager;
mod refresh;
mod types;

pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use manager::{TokenManager, DEFAULT_REFRESH_BUFFER_SECS};
pub use refresh::auth_url;
pub use types::{Credential, TokenClaims, TokenStatus};

/// Login endpoint path under the auth host
pub const LOGIN_PATH: &str = "/login";

/// Refresh endpoint path under the auth host
pub const REFRESH_PATH: &str = "/refresh";

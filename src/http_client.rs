use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, LOCATION,
};
use reqwest::{redirect, Client, Method, Url};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{self, claims, TokenManager};
use crate::error::{ProbeError, Result};

/// Characters of a non-JSON body kept in the parsed body excerpt
pub const BODY_PREVIEW_CHARS: usize = 500;

/// Identity header most resource servers in the platform expect
pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";

static DUPLICATE_SLASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"/{2,}").unwrap());

/// Collapse duplicate slashes and ensure a single leading slash; the query is kept as-is
pub fn normalize_path(path: &str) -> String {
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };

    let collapsed = DUPLICATE_SLASHES.replace_all(path.trim(), "/");
    let mut normalized = if collapsed.starts_with('/') {
        collapsed.into_owned()
    } else {
        format!("/{}", collapsed)
    };

    if let Some(query) = query {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized
}

/// A request as described by the caller; never mutated by the executor
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub base_url: String,
    /// Path with optional query string
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl RequestSpec {
    pub fn new(method: Method, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method,
            base_url: base_url.into(),
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(Method::GET, base_url, path)
    }

    pub fn post(base_url: impl Into<String>, path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, base_url, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a header from strings, e.g. parsed from the command line
    pub fn try_header(self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| ProbeError::InvalidConfig(format!("invalid header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| ProbeError::InvalidConfig(format!("invalid header value for {}: {}", name, e)))?;
        Ok(self.with_header(name, value))
    }

    /// Full target URL with the normalized path
    pub fn url(&self) -> Result<Url> {
        let target = format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            normalize_path(&self.path)
        );
        Url::parse(&target)
            .map_err(|e| ProbeError::InvalidConfig(format!("invalid request URL {}: {}", target, e)))
    }
}

/// Per-call execution options
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// `None` means required, except for the login and refresh endpoints
    pub require_auth: Option<bool>,

    /// Token to use instead of consulting the token manager
    pub explicit_token: Option<String>,
}

impl ExecuteOptions {
    /// Send without auth if no token can be obtained
    pub fn best_effort() -> Self {
        Self {
            require_auth: Some(false),
            explicit_token: None,
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            require_auth: Some(true),
            explicit_token: Some(token.into()),
        }
    }
}

/// Response in a shape callers can handle uniformly
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    /// Decoded JSON, or `{"rawExcerpt", "parseError"}` when the body is not JSON
    pub parsed_body: Value,
    pub raw_body: String,
    pub is_redirect: bool,
    pub redirect_location: Option<String>,
}

impl NormalizedResponse {
    pub fn from_parts(status_code: u16, headers: &HeaderMap, raw_body: String) -> Self {
        let mut flat: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            flat.entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let is_redirect = (300..400).contains(&status_code);
        let redirect_location = if is_redirect {
            headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        } else {
            None
        };

        Self {
            status_code,
            headers: flat,
            parsed_body: parse_body(&raw_body),
            raw_body,
            is_redirect,
            redirect_location,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// JSON pointer lookup into the parsed body
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.parsed_body.pointer(pointer)
    }
}

/// Parse JSON, falling back to a bounded excerpt of the raw text
fn parse_body(raw: &str) -> Value {
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => json!({
            "rawExcerpt": raw.chars().take(BODY_PREVIEW_CHARS).collect::<String>(),
            "parseError": e.to_string(),
        }),
    }
}

/// Executes single HTTP calls decorated with the caller's identity
///
/// Never retries and never follows redirects: a redirect to another host
/// would otherwise carry or drop the Authorization header silently.
pub struct AuthenticatedClient {
    /// HTTP client with redirects disabled
    client: Client,

    /// Token lifecycle manager
    tokens: Arc<TokenManager>,

    /// Header carrying the token subject
    identity_header: HeaderName,
}

impl AuthenticatedClient {
    /// Create a new executor
    pub fn new(
        tokens: Arc<TokenManager>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProbeError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            tokens,
            identity_header: HeaderName::from_static(DEFAULT_IDENTITY_HEADER),
        })
    }

    pub fn with_identity_header(mut self, name: HeaderName) -> Self {
        self.identity_header = name;
        self
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// True for the login and refresh endpoints of the configured auth host
    fn is_auth_endpoint(&self, url: &Url) -> bool {
        [auth::LOGIN_PATH, auth::REFRESH_PATH].iter().any(|path| {
            Url::parse(&auth::auth_url(self.tokens.auth_host(), path))
                .map(|endpoint| {
                    endpoint.scheme() == url.scheme()
                        && endpoint.host_str() == url.host_str()
                        && endpoint.port_or_known_default() == url.port_or_known_default()
                        && endpoint.path() == url.path()
                })
                .unwrap_or(false)
        })
    }

    /// Pick the token for this call according to the options
    async fn resolve_token(&self, url: &Url, options: &ExecuteOptions) -> Result<Option<String>> {
        if let Some(ref token) = options.explicit_token {
            return Ok(Some(token.clone()));
        }

        // Auth endpoints must never recurse into the token manager
        if self.is_auth_endpoint(url) {
            if options.require_auth == Some(true) {
                tracing::warn!(url = %url, "Ignoring require_auth for auth endpoint");
            }
            return Ok(None);
        }

        let require_auth = options.require_auth.unwrap_or(true);
        match self.tokens.ensure_valid_credential().await {
            Ok(token) => Ok(Some(token)),
            Err(e) if require_auth => Err(ProbeError::AuthenticationRequired(e.to_string())),
            Err(e) => {
                tracing::warn!(
                    url = %url,
                    error = %e,
                    "No usable token, sending request without authentication"
                );
                Ok(None)
            }
        }
    }

    /// Build the headers for a call: caller headers, default content type, auth and identity
    pub fn decorate(&self, spec: &RequestSpec, token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = spec.headers.clone();

        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        if let Some(token) = token {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ProbeError::AuthenticationRequired("token is not a valid header value".to_string())
            })?;
            headers.insert(AUTHORIZATION, bearer);

            // Best effort: not every token carries a subject
            match claims::subject_of(token).and_then(|s| HeaderValue::from_str(&s).ok()) {
                Some(subject) => {
                    headers.insert(self.identity_header.clone(), subject);
                }
                None => tracing::debug!("Token subject not decodable, identity header omitted"),
            }
        }

        Ok(headers)
    }

    /// Perform one decorated call and normalize the response
    pub async fn execute(
        &self,
        spec: &RequestSpec,
        options: &ExecuteOptions,
    ) -> Result<NormalizedResponse> {
        let url = spec.url()?;
        let token = self.resolve_token(&url, options).await?;
        let headers = self.decorate(spec, token.as_deref())?;

        tracing::debug!(
            method = %spec.method,
            url = %url,
            authenticated = token.is_some(),
            "Sending HTTP request"
        );

        let mut builder = self
            .client
            .request(spec.method.clone(), url.clone())
            .headers(headers);
        if let Some(ref body) = spec.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            let err = ProbeError::transport(&e);
            tracing::warn!(url = %url, error = %err, "HTTP request error");
            err
        })?;

        let status = response.status();
        let response_headers = response.headers().clone();
        let raw_body = response.text().await.map_err(|e| {
            let err = ProbeError::transport(&e);
            tracing::warn!(url = %url, error = %err, "Failed to read response body");
            err
        })?;

        let normalized = NormalizedResponse::from_parts(status.as_u16(), &response_headers, raw_body);
        tracing::debug!(
            status = normalized.status_code,
            is_redirect = normalized.is_redirect,
            "Received HTTP response"
        );

        Ok(normalized)
    }
}

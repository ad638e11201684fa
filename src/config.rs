use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::auth::DEFAULT_REFRESH_BUFFER_SECS;
use crate::http_client::DEFAULT_IDENTITY_HEADER;

/// svc-probe - authenticated requests and pipeline polling
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the authentication service
    #[arg(long, env = "AUTH_HOST", global = true)]
    pub auth_host: Option<String>,

    /// Base URL of the resource services
    #[arg(long, env = "API_HOST", global = true)]
    pub api_host: Option<String>,

    /// Directory holding the access_token and refresh_token files
    #[arg(long, env = "CREDENTIALS_DIR", global = true)]
    pub credentials_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30", global = true)]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Log in and store the credential
    Login {
        #[arg(long, env = "PROBE_EMAIL")]
        email: Option<String>,

        #[arg(long, env = "PROBE_PASSWORD")]
        password: Option<String>,
    },

    /// Show the stored token status
    Token {
        /// Refresh even if the token is not expiring
        #[arg(long)]
        refresh: bool,
    },

    /// Execute a single request and print the normalized response
    Request {
        /// HTTP method
        method: String,

        /// Path (and query) under the API host
        path: String,

        /// JSON request body
        #[arg(long)]
        body: Option<String>,

        /// Extra header as NAME:VALUE, repeatable
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,

        /// Send without authentication when no token is available
        #[arg(long)]
        no_auth: bool,
    },

    /// Poll a GET endpoint until a condition holds
    Poll {
        /// Path (and query) under the API host
        path: String,

        /// JSON pointer of the list to inspect
        #[arg(long, default_value = "")]
        pointer: String,

        /// Require an item with FIELD=VALUE in the list
        #[arg(long)]
        contains: Option<String>,

        /// Require this status code instead of a list condition
        #[arg(long, conflicts_with = "contains")]
        status: Option<u16>,

        /// Maximum attempts (values below 1 still run once)
        #[arg(long, default_value = "10", allow_hyphen_values = true)]
        attempts: i64,

        /// Delay between attempts in milliseconds
        #[arg(long, default_value = "2000", allow_hyphen_values = true)]
        interval_ms: i64,

        /// Overall deadline in seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Endpoints
    pub auth_host: String,
    pub api_host: String,

    // Credentials
    pub credentials_dir: PathBuf,
    pub token_refresh_buffer: i64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub identity_header: String,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Resolve configuration with priority: CLI > ENV > defaults
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let config = Config {
            auth_host: args
                .auth_host
                .clone()
                .context("AUTH_HOST is required (use --auth-host or set AUTH_HOST env var)")?,

            // Resource services default to the auth host for single-gateway setups
            api_host: args
                .api_host
                .clone()
                .or_else(|| args.auth_host.clone())
                .unwrap_or_default(),

            credentials_dir: args
                .credentials_dir
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_credentials_dir),

            token_refresh_buffer: std::env::var("TOKEN_REFRESH_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REFRESH_BUFFER_SECS),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            identity_header: std::env::var("IDENTITY_HEADER")
                .unwrap_or_else(|_| DEFAULT_IDENTITY_HEADER.to_string()),

            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Load `.env`, parse the command line and resolve the configuration
    pub fn load() -> Result<(Self, Command)> {
        dotenvy::dotenv().ok();
        let args = CliArgs::parse();
        let config = Self::from_args(&args)?;
        Ok((config, args.command))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("AUTH_HOST", &self.auth_host), ("API_HOST", &self.api_host)] {
            reqwest::Url::parse(value)
                .with_context(|| format!("{} is not a valid URL: {}", name, value))?;
        }

        if self.token_refresh_buffer < 0 {
            anyhow::bail!(
                "TOKEN_REFRESH_BUFFER must not be negative: {}",
                self.token_refresh_buffer
            );
        }

        reqwest::header::HeaderName::from_bytes(self.identity_header.as_bytes())
            .with_context(|| format!("IDENTITY_HEADER is not a valid header name: {}", self.identity_header))?;

        Ok(())
    }
}

/// Default credential directory under the user's config dir
fn default_credentials_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("svc-probe"))
        .unwrap_or_else(|| PathBuf::from(".svc-probe"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

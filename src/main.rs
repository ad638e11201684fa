use anyhow::{Context, Result};
use dialoguer::{Confirm, Input, Password};
use reqwest::header::HeaderName;
use reqwest::Method;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use svc_probe::auth::{FileCredentialStore, TokenManager};
use svc_probe::config::{Command, Config};
use svc_probe::http_client::{AuthenticatedClient, ExecuteOptions, RequestSpec};
use svc_probe::poll::{predicates, PollConfig, PollVerifier};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;
    config.validate()?;

    // Logs go to stderr so stdout carries only the JSON result
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!(
        auth_host = %config.auth_host,
        api_host = %config.api_host,
        credentials_dir = %config.credentials_dir.display(),
        "Configuration loaded"
    );

    let store = Arc::new(FileCredentialStore::new(config.credentials_dir.clone()));
    let tokens = Arc::new(TokenManager::new(
        store,
        config.auth_host.clone(),
        config.token_refresh_buffer,
        Duration::from_secs(config.http_request_timeout),
    )?);

    let identity_header = HeaderName::from_bytes(config.identity_header.as_bytes())
        .context("Invalid IDENTITY_HEADER")?;
    let client = AuthenticatedClient::new(
        tokens.clone(),
        Duration::from_secs(config.http_connect_timeout),
        Duration::from_secs(config.http_request_timeout),
    )?
    .with_identity_header(identity_header);

    match command {
        Command::Login { email, password } => {
            let (email, password) = prompt_credentials(email, password)?;
            tokens.login(&email, &password).await?;
            print_json(&tokens.status()?)?;
        }

        Command::Token { refresh } => {
            if refresh {
                tokens.force_refresh().await?;
            }
            print_json(&tokens.status()?)?;
        }

        Command::Request {
            method,
            path,
            body,
            headers,
            no_auth,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;

            let mut spec = RequestSpec::new(method, config.api_host.clone(), path);
            if let Some(body) = body {
                spec = spec.with_body(serde_json::from_str(&body).context("--body is not valid JSON")?);
            }
            for header in &headers {
                let (name, value) = header
                    .split_once(':')
                    .with_context(|| format!("Header must be NAME:VALUE, got {}", header))?;
                spec = spec.try_header(name, value)?;
            }

            let options = if no_auth {
                ExecuteOptions::best_effort()
            } else {
                ensure_logged_in(&tokens).await?;
                ExecuteOptions::default()
            };

            let response = client.execute(&spec, &options).await?;
            print_json(&response)?;
        }

        Command::Poll {
            path,
            pointer,
            contains,
            status,
            attempts,
            interval_ms,
            deadline_secs,
        } => {
            let predicate =
                predicates::from_options(&pointer, contains.as_deref(), status)?;

            let mut poll_config = PollConfig::new(attempts, interval_ms)?;
            if let Some(secs) = deadline_secs {
                poll_config = poll_config.with_deadline(Duration::from_secs(secs));
            }

            ensure_logged_in(&tokens).await?;

            let spec = RequestSpec::get(config.api_host.clone(), path);
            let outcome = PollVerifier::new(poll_config)
                .verify(&client, &spec, &ExecuteOptions::default(), predicate)
                .await;

            print_json(&outcome)?;
            if !outcome.succeeded() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Offer an interactive login when the stored credential is missing or unusable
async fn ensure_logged_in(tokens: &TokenManager) -> Result<()> {
    let err = match tokens.ensure_valid_credential().await {
        Ok(_) => return Ok(()),
        Err(e) => e,
    };

    if !err.needs_login() || !std::io::stdin().is_terminal() {
        return Err(err.into());
    }

    tracing::warn!("{}", err);
    let login_now = Confirm::new()
        .with_prompt("No usable credential. Log in now?")
        .default(true)
        .interact()
        .context("Failed to read confirmation")?;
    if !login_now {
        return Err(err.into());
    }

    let (email, password) = prompt_credentials(None, None)?;
    tokens.login(&email, &password).await?;
    Ok(())
}

/// Fill in missing login values from the terminal
fn prompt_credentials(email: Option<String>, password: Option<String>) -> Result<(String, String)> {
    let email = match email {
        Some(email) => email,
        None => Input::new()
            .with_prompt("Email")
            .interact_text()
            .context("Failed to read email")?,
    };

    let password = match password {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    if email.is_empty() || password.is_empty() {
        anyhow::bail!("Email and password must not be empty");
    }

    Ok((email, password))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

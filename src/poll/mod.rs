// Bounded poll-until-condition verification
//
// Attempts run strictly one after another; the only suspension points are the
// in-flight request and the inter-attempt delay, both cancelled by the deadline.

pub mod predicates;

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{ProbeError, Result};
use crate::http_client::{AuthenticatedClient, ExecuteOptions, NormalizedResponse, RequestSpec};

/// Terminal state of a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    /// The predicate held on some attempt
    Satisfied,
    /// All attempts ran without satisfying the predicate
    Exhausted,
    /// A non-retryable error or the deadline stopped polling
    Aborted,
}

/// Result of a poll
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOutcome {
    pub status: PollStatus,
    pub attempts_used: u32,
    /// Satisfying response, or the last observed one for diagnostics
    pub result: Option<NormalizedResponse>,
    pub last_error: Option<String>,
}

impl PollOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == PollStatus::Satisfied
    }
}

/// Poll parameters
#[derive(Debug, Clone)]
pub struct PollConfig {
    max_attempts: u32,
    interval: Duration,
    deadline: Option<Duration>,
}

impl PollConfig {
    /// `max_attempts <= 0` still yields one attempt; a negative interval is rejected
    pub fn new(max_attempts: i64, interval_ms: i64) -> Result<Self> {
        if interval_ms < 0 {
            return Err(ProbeError::InvalidConfig(format!(
                "poll interval must not be negative, got {}ms",
                interval_ms
            )));
        }

        let max_attempts = max_attempts.clamp(1, u32::MAX as i64) as u32;
        Ok(Self {
            max_attempts,
            interval: Duration::from_millis(interval_ms as u64),
            deadline: None,
        })
    }

    /// Overall time budget, measured from the start of the poll
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Repeats a request until a predicate over its response holds
pub struct PollVerifier {
    config: PollConfig,
}

impl PollVerifier {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    /// Poll an authenticated request
    pub async fn verify<P>(
        &self,
        client: &AuthenticatedClient,
        spec: &RequestSpec,
        options: &ExecuteOptions,
        predicate: P,
    ) -> PollOutcome
    where
        P: FnMut(&NormalizedResponse) -> bool,
    {
        self.verify_with(|| client.execute(spec, options), predicate)
            .await
    }

    /// Poll an arbitrary attempt function
    pub async fn verify_with<F, Fut, P>(&self, mut attempt: F, mut predicate: P) -> PollOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<NormalizedResponse>>,
        P: FnMut(&NormalizedResponse) -> bool,
    {
        let max_attempts = self.config.max_attempts;
        // A deadline too far out to represent is no deadline at all
        let deadline = self
            .config
            .deadline
            .and_then(|d| Instant::now().checked_add(d));

        let mut last_response: Option<NormalizedResponse> = None;
        let mut last_error: Option<String> = None;

        for attempt_no in 1..=max_attempts {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return aborted(
                    attempt_no - 1,
                    last_response,
                    format!("deadline elapsed before attempt {}", attempt_no),
                );
            }

            tracing::debug!(attempt = attempt_no, max_attempts, "Executing poll attempt");

            let result = match deadline {
                Some(d) => match tokio::time::timeout_at(d, attempt()).await {
                    Ok(result) => result,
                    Err(_) => {
                        return aborted(
                            attempt_no,
                            last_response,
                            format!("deadline elapsed during attempt {}", attempt_no),
                        )
                    }
                },
                None => attempt().await,
            };

            match result {
                Ok(response) => {
                    if predicate(&response) {
                        tracing::info!(attempts = attempt_no, "Poll condition satisfied");
                        return PollOutcome {
                            status: PollStatus::Satisfied,
                            attempts_used: attempt_no,
                            result: Some(response),
                            last_error: None,
                        };
                    }
                    last_error = Some(format!(
                        "condition not satisfied on attempt {} (HTTP {})",
                        attempt_no, response.status_code
                    ));
                    last_response = Some(response);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        attempt = attempt_no,
                        error = %e,
                        "Poll attempt failed, will retry"
                    );
                    last_error = Some(e.to_string());
                }
                Err(e) => {
                    tracing::error!(attempt = attempt_no, error = %e, "Poll aborted");
                    return aborted(attempt_no, last_response, e.to_string());
                }
            }

            if attempt_no < max_attempts {
                let delay = tokio::time::sleep(self.config.interval);
                match deadline {
                    Some(d) => {
                        if tokio::time::timeout_at(d, delay).await.is_err() {
                            return aborted(
                                attempt_no,
                                last_response,
                                format!("deadline elapsed after attempt {}", attempt_no),
                            );
                        }
                    }
                    None => delay.await,
                }
            }
        }

        tracing::warn!(attempts = max_attempts, "Poll exhausted without satisfying condition");
        PollOutcome {
            status: PollStatus::Exhausted,
            attempts_used: max_attempts,
            result: last_response,
            last_error,
        }
    }
}

fn aborted(
    attempts_used: u32,
    last_response: Option<NormalizedResponse>,
    reason: String,
) -> PollOutcome {
    PollOutcome {
        status: PollStatus::Aborted,
        attempts_used,
        result: last_response,
        last_error: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use std::cell::Cell;

    fn ok_response(body: &str) -> Result<NormalizedResponse> {
        Ok(NormalizedResponse::from_parts(200, &HeaderMap::new(), body.to_string()))
    }

    fn transport_error() -> Result<NormalizedResponse> {
        Err(ProbeError::TransportError {
            kind: "connection_failed",
            message: "refused".to_string(),
        })
    }

    #[test]
    fn test_config_floor_and_validation() {
        assert_eq!(PollConfig::new(0, 10).unwrap().max_attempts(), 1);
        assert_eq!(PollConfig::new(-5, 10).unwrap().max_attempts(), 1);
        assert_eq!(PollConfig::new(3, 0).unwrap().max_attempts(), 3);
        assert!(matches!(
            PollConfig::new(3, -1),
            Err(ProbeError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_unrepresentable_deadline_polls_without_one() {
        let config = PollConfig::new(2, 0)
            .unwrap()
            .with_deadline(Duration::from_secs(u64::MAX));
        let calls = Cell::new(0);

        let outcome = PollVerifier::new(config)
            .verify_with(
                || {
                    calls.set(calls.get() + 1);
                    async { ok_response("{}") }
                },
                |_| calls.get() == 2,
            )
            .await;

        assert_eq!(outcome.status, PollStatus::Satisfied);
        assert_eq!(outcome.attempts_used, 2);
    }

    #[tokio::test]
    async fn test_satisfied_on_third_attempt() {
        let verifier = PollVerifier::new(PollConfig::new(3, 1).unwrap());
        let calls = Cell::new(0);

        let outcome = verifier
            .verify_with(
                || {
                    calls.set(calls.get() + 1);
                    async { ok_response("{}") }
                },
                |_| calls.get() == 3,
            )
            .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts_used, 3);
        assert!(outcome.result.is_some());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_keeps_last_response() {
        let verifier = PollVerifier::new(PollConfig::new(3, 1).unwrap());
        let calls = Cell::new(0);

        let outcome = verifier
            .verify_with(
                || {
                    calls.set(calls.get() + 1);
                    let body = format!(r#"{{"attempt": {}}}"#, calls.get());
                    async move { ok_response(&body) }
                },
                |_| false,
            )
            .await;

        assert_eq!(outcome.status, PollStatus::Exhausted);
        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts_used, 3);
        assert_eq!(outcome.result.unwrap().parsed_body["attempt"], 3);
        assert!(outcome.last_error.unwrap().contains("attempt 3"));
    }

    #[tokio::test]
    async fn test_non_positive_max_attempts_runs_once() {
        for max_attempts in [0, -1, -100] {
            let verifier = PollVerifier::new(PollConfig::new(max_attempts, 1).unwrap());
            let calls = Cell::new(0);

            let outcome = verifier
                .verify_with(
                    || {
                        calls.set(calls.get() + 1);
                        async { ok_response("{}") }
                    },
                    |_| false,
                )
                .await;

            assert_eq!(calls.get(), 1);
            assert_eq!(outcome.attempts_used, 1);
            assert_eq!(outcome.status, PollStatus::Exhausted);
        }
    }

    #[tokio::test]
    async fn test_authentication_required_aborts_immediately() {
        let verifier = PollVerifier::new(PollConfig::new(5, 1).unwrap());
        let calls = Cell::new(0);

        let outcome = verifier
            .verify_with(
                || {
                    calls.set(calls.get() + 1);
                    async {
                        Err(ProbeError::AuthenticationRequired(
                            "no stored credential".to_string(),
                        ))
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(outcome.status, PollStatus::Aborted);
        assert_eq!(outcome.attempts_used, 1);
        assert_eq!(calls.get(), 1);
        assert!(outcome.last_error.unwrap().contains("Authentication required"));
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let verifier = PollVerifier::new(PollConfig::new(4, 1).unwrap());
        let calls = Cell::new(0);

        let outcome = verifier
            .verify_with(
                || {
                    calls.set(calls.get() + 1);
                    let n = calls.get();
                    async move {
                        if n < 3 {
                            transport_error()
                        } else {
                            ok_response(r#"{"ready": true}"#)
                        }
                    }
                },
                |r| r.parsed_body["ready"] == true,
            )
            .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts_used, 3);
    }

    #[tokio::test]
    async fn test_transport_errors_until_exhausted() {
        let verifier = PollVerifier::new(PollConfig::new(2, 1).unwrap());
        let outcome = verifier
            .verify_with(|| async { transport_error() }, |_| true)
            .await;

        assert_eq!(outcome.status, PollStatus::Exhausted);
        assert_eq!(outcome.attempts_used, 2);
        assert!(outcome.result.is_none());
        assert!(outcome.last_error.unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_deadline_during_interval_aborts() {
        let config = PollConfig::new(10, 500)
            .unwrap()
            .with_deadline(Duration::from_millis(50));
        let verifier = PollVerifier::new(config);
        let calls = Cell::new(0);

        let started = std::time::Instant::now();
        let outcome = verifier
            .verify_with(
                || {
                    calls.set(calls.get() + 1);
                    async { ok_response("{}") }
                },
                |_| false,
            )
            .await;

        assert_eq!(outcome.status, PollStatus::Aborted);
        assert_eq!(outcome.attempts_used, 1);
        assert_eq!(calls.get(), 1);
        assert!(outcome.last_error.unwrap().contains("deadline"));
        assert!(started.elapsed() < Duration::from_millis(450));
    }

    #[tokio::test]
    async fn test_deadline_during_attempt_aborts() {
        let config = PollConfig::new(3, 1)
            .unwrap()
            .with_deadline(Duration::from_millis(30));
        let verifier = PollVerifier::new(config);

        let outcome = verifier
            .verify_with(
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    ok_response("{}")
                },
                |_| true,
            )
            .await;

        assert_eq!(outcome.status, PollStatus::Aborted);
        assert_eq!(outcome.attempts_used, 1);
        assert!(outcome.result.is_none());
    }
}

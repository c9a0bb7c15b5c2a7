//! Fetch execution with uniform failure handling.
//!
//! The executor owns the retry loop for one request: it ensures a session,
//! sends the provider's request closure, classifies the response, and
//! reacts per outcome. Throttling and transient failures retry without an
//! attempt cap (the feeds recover on their own schedule); only
//! cancellation or a contract violation ends the loop early.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::harvest::classify::{classify, BodyProbe, FetchOutcome, Payload};
use crate::harvest::retry::RetryPolicy;
use crate::harvest::session::{AuthError, SessionManager, SessionState};
use crate::shutdown::CancelToken;

/// Status and decoded body of one HTTP exchange, before classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Decoded body
    pub payload: Payload,
}

impl RawResponse {
    /// Decode a reqwest response into status + payload.
    pub async fn from_response(response: reqwest::Response) -> Result<RawResponse, reqwest::Error> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse {
            status,
            payload: Payload::from_text(body),
        })
    }
}

/// Terminal fetch failures. Retryable conditions never surface here.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Could not establish or re-establish a session
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Provider response violated its contract
    #[error("provider contract violation (status {status}): {message}")]
    Contract {
        /// HTTP status of the offending response
        status: u16,
        /// Body preview
        message: String,
    },

    /// Cancellation arrived while the request was pending or backing off
    #[error("fetch cancelled")]
    Cancelled,
}

/// Drives one logical fetch to completion through retries and re-login.
pub struct FetchExecutor {
    client: Client,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl FetchExecutor {
    /// Build an executor over a shared HTTP client.
    pub fn new(client: Client, policy: RetryPolicy, cancel: CancelToken) -> Self {
        Self {
            client,
            policy,
            cancel,
        }
    }

    /// The HTTP client requests are issued with.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Execute `send` until it yields a well-formed payload.
    ///
    /// `send` receives the client and current session state and performs
    /// exactly one HTTP exchange. Outcome handling:
    ///
    /// - rate limited: pause for the policy's rate-limit interval, retry
    /// - transient (including transport errors): back off per policy, retry
    /// - session expired: invalidate, re-login, retry; a second expiry
    ///   without an intervening healthy response is treated as rejected
    ///   credentials
    /// - fatal: log the offending body and stop
    pub async fn execute<F, Fut>(
        &self,
        session: &mut SessionManager,
        probe: BodyProbe,
        send: F,
    ) -> Result<Payload, FetchError>
    where
        F: Fn(Client, SessionState) -> Fut,
        Fut: Future<Output = Result<RawResponse, reqwest::Error>>,
    {
        let mut transient_attempt: u32 = 0;
        let mut relogin_pending = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let state = session.ensure_session(&self.client).await?;

            let raw = match send(self.client.clone(), state).await {
                Ok(raw) => raw,
                Err(e) => {
                    // A transport failure says nothing about the fresh
                    // session, so a later expiry starts a new relogin cycle
                    relogin_pending = false;
                    let delay = self.policy.transient_delay(transient_attempt);
                    warn!(error = %e, retry_in_secs = delay.as_secs(), "transport error, retrying");
                    transient_attempt = transient_attempt.saturating_add(1);
                    self.pause(delay).await?;
                    continue;
                }
            };

            match classify(raw.status, raw.payload, probe) {
                FetchOutcome::Success(payload) => return Ok(payload),
                FetchOutcome::RateLimited => {
                    relogin_pending = false;
                    let delay = self.policy.rate_limit_pause;
                    debug!(pause_secs = delay.as_secs(), "provider throttled, pausing");
                    self.pause(delay).await?;
                }
                FetchOutcome::SessionExpired => {
                    if relogin_pending {
                        return Err(FetchError::Auth(AuthError::CredentialsRejected(
                            "session expired again immediately after re-login".to_string(),
                        )));
                    }
                    warn!("session expired, re-authenticating");
                    relogin_pending = true;
                    session.invalidate();
                }
                FetchOutcome::TransientError(status) => {
                    relogin_pending = false;
                    let delay = self.policy.transient_delay(transient_attempt);
                    warn!(
                        status,
                        retry_in_secs = delay.as_secs(),
                        "transient provider error, retrying"
                    );
                    transient_attempt = transient_attempt.saturating_add(1);
                    self.pause(delay).await?;
                }
                FetchOutcome::FatalError { status, message } => {
                    error!(status, body = %message, "provider contract violation");
                    return Err(FetchError::Contract { status, message });
                }
            }
        }
    }

    async fn pause(&self, delay: Duration) -> Result<(), FetchError> {
        if self.cancel.sleep(delay).await {
            Ok(())
        } else {
            Err(FetchError::Cancelled)
        }
    }
}

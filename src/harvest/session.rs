//! Authentication sessions.
//!
//! Each series task owns its own session so a re-login in one task never
//! invalidates credentials another task is using mid-flight. The
//! [`Authenticator`] trait is the seam providers implement; the
//! [`SessionManager`] caches the resulting state and performs lazy login
//! and explicit invalidation on expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Errors raised while establishing a session.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The provider rejected the configured credentials
    #[error("credentials rejected: {0}")]
    CredentialsRejected(String),

    /// Transport failure while talking to the login endpoint
    #[error("login transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Login response missing the expected session material
    #[error("login response malformed: {0}")]
    Malformed(String),
}

/// Provider session material captured at login.
///
/// `token` carries whatever the provider hands back that must be replayed
/// on subsequent requests (an XSRF token, a cookie jar string); providers
/// that authenticate per request leave it empty.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Opaque session material replayed on each request
    pub token: Option<String>,
    /// When the session was established
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// A session carrying a token obtained at `now`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            authenticated_at: Some(Utc::now()),
        }
    }

    /// Anonymous session for providers without a login step.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Provider login behavior.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Perform the provider's login exchange and capture session material.
    async fn login(&self, client: &Client) -> Result<SessionState, AuthError>;

    /// Whether this provider needs a login before data requests. Defaults
    /// to `true`; keyless or API-key-per-request providers override.
    fn requires_login(&self) -> bool {
        true
    }
}

/// Authenticator for providers that need no session at all.
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn login(&self, _client: &Client) -> Result<SessionState, AuthError> {
        Ok(SessionState::anonymous())
    }

    fn requires_login(&self) -> bool {
        false
    }
}

/// Per-task session cache around an [`Authenticator`].
pub struct SessionManager {
    authenticator: Box<dyn Authenticator>,
    state: Option<SessionState>,
}

impl SessionManager {
    /// Wrap an authenticator with an empty session cache.
    pub fn new(authenticator: Box<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            state: None,
        }
    }

    /// Return the cached session, logging in first if none is held.
    pub async fn ensure_session(&mut self, client: &Client) -> Result<SessionState, AuthError> {
        if let Some(state) = &self.state {
            return Ok(state.clone());
        }
        if !self.authenticator.requires_login() {
            let state = SessionState::anonymous();
            self.state = Some(state.clone());
            return Ok(state);
        }
        debug!("establishing provider session");
        let state = self.authenticator.login(client).await?;
        self.state = Some(state.clone());
        Ok(state)
    }

    /// Drop the cached session so the next `ensure_session` logs in again.
    pub fn invalidate(&mut self) {
        debug!("session invalidated");
        self.state = None;
    }
}

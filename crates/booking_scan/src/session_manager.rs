use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::markup::extract_csrf_token;
use crate::transport::BookingTransport;

/// Lifecycle of the booking-site session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No bootstrap has been attempted yet
    Uninitialized,
    /// The landing page yielded an anti-forgery token
    Ready { token: String },
    /// Bootstrap found no token, or the API rejected the last one
    AuthExpired,
}

impl SessionState {
    /// Short name used in logs and stats
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready { .. } => "ready",
            SessionState::AuthExpired => "auth_expired",
        }
    }

    /// Outcome of a bootstrap attempt
    fn bootstrapped(token: Option<String>) -> Self {
        match token {
            Some(token) => SessionState::Ready { token },
            None => SessionState::AuthExpired,
        }
    }

    /// The server refused the current token
    fn rejected(self) -> Self {
        match self {
            SessionState::Ready { .. } => SessionState::AuthExpired,
            other => other,
        }
    }
}

/// Number of re-bootstrap transitions one API call may trigger
#[derive(Debug, Clone)]
pub struct ReauthBudget {
    used: u32,
    limit: u32,
}

impl ReauthBudget {
    /// Budget allowing a single re-bootstrap
    pub fn once() -> Self {
        Self { used: 0, limit: 1 }
    }

    fn try_consume(&mut self) -> bool {
        if self.used < self.limit {
            self.used += 1;
            true
        } else {
            false
        }
    }

    /// Re-bootstraps spent so far
    pub fn used(&self) -> u32 {
        self.used
    }
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    bootstrap_count: u32,
    last_bootstrapped: Option<DateTime<Utc>>,
}

/// Owns the anti-forgery token for the booking site
pub struct SessionManager {
    transport: Arc<dyn BookingTransport>,
    session_state: RwLock<SessionInner>,
    landing_url: String,
}

impl SessionManager {
    /// Create a session manager; nothing is fetched until the first bootstrap
    pub fn new(transport: Arc<dyn BookingTransport>, config: &MonitorConfig) -> Self {
        Self {
            transport,
            session_state: RwLock::new(SessionInner {
                state: SessionState::Uninitialized,
                bootstrap_count: 0,
                last_bootstrapped: None,
            }),
            landing_url: config.reservation_url(),
        }
    }

    /// Bootstrap once; failures leave the session without a token instead of erroring
    pub async fn initialize(&self) -> Option<String> {
        info!("Creating booking-site session");

        let token = match self.transport.get(&self.landing_url, &[]).await {
            Ok(response) if response.is_success() => {
                let token = extract_csrf_token(&response.body);
                match token {
                    Some(ref token) => {
                        let shown: String = token.chars().take(10).collect();
                        info!("Obtained anti-forgery token: {}...", shown);
                    }
                    None => warn!("Anti-forgery token not found on {}", self.landing_url),
                }
                token
            }
            Ok(response) => {
                warn!(
                    "Session bootstrap failed with status {}: {}",
                    response.status,
                    response.body_preview()
                );
                None
            }
            Err(e) => {
                error!("Session bootstrap failed: {}", e);
                None
            }
        };

        let mut inner = self.session_state.write().await;
        inner.state = SessionState::bootstrapped(token.clone());
        inner.bootstrap_count += 1;
        inner.last_bootstrapped = Some(Utc::now());

        token
    }

    /// Token for the next API call, bootstrapping first if the session was never created
    pub async fn ensure_token(&self) -> Option<String> {
        let state = self.state().await;
        match state {
            SessionState::Ready { token } => Some(token),
            SessionState::Uninitialized => self.initialize().await,
            SessionState::AuthExpired => None,
        }
    }

    /// Re-bootstrap if the budget allows it
    pub async fn reauthenticate(&self, budget: &mut ReauthBudget) -> Option<String> {
        if !budget.try_consume() {
            debug!("Re-bootstrap budget exhausted");
            return None;
        }

        info!("Re-bootstrapping session ({} of {})", budget.used, budget.limit);
        self.initialize().await
    }

    /// Forget the current session so the next token request bootstraps again
    pub async fn reset(&self) {
        let mut inner = self.session_state.write().await;
        debug!("Resetting session (was {})", inner.state.name());
        inner.state = SessionState::Uninitialized;
    }

    /// Record that the server refused the current token
    pub async fn mark_rejected(&self) {
        let mut inner = self.session_state.write().await;
        let previous = std::mem::replace(&mut inner.state, SessionState::Uninitialized);
        inner.state = previous.rejected();
        warn!("Anti-forgery token rejected, session is {}", inner.state.name());
    }

    /// Snapshot of the current session state
    pub async fn state(&self) -> SessionState {
        self.session_state.read().await.state.clone()
    }

    /// Get current session statistics
    pub async fn get_session_stats(&self) -> SessionStats {
        let inner = self.session_state.read().await;

        SessionStats {
            state: inner.state.name(),
            has_token: matches!(inner.state, SessionState::Ready { .. }),
            bootstrap_count: inner.bootstrap_count,
            last_bootstrapped: inner.last_bootstrapped,
        }
    }
}

/// Statistics about the current session
#[derive(Debug, Serialize)]
pub struct SessionStats {
    /// Name of the current `SessionState`
    pub state: &'static str,
    /// Whether a token is held
    pub has_token: bool,
    /// Bootstraps attempted since the process started
    pub bootstrap_count: u32,
    /// When the last bootstrap ran
    pub last_bootstrapped: Option<DateTime<Utc>>,
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local guard for the authentication forms.
//!
//! Combines a per-action lockout window with the request pattern analyzer,
//! keyed by the client fingerprint. A blocked attempt is rejected before any
//! backend call is made.

use crate::error::{AppError, RateLimitSource, Result};
use crate::services::pattern::{PatternSettings, PatternVerdict, RequestPatternAnalyzer};
use crate::services::rate_limit::RateWindow;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthAction {
    Login,
    Signup,
    PasswordReset,
}

impl AuthAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthAction::Login => "login",
            AuthAction::Signup => "signup",
            AuthAction::PasswordReset => "password_reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub max_attempts: usize,
    pub window: Duration,
}

impl WindowLimit {
    pub const fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardSettings {
    /// Failed logins per window.
    pub login: WindowLimit,
    /// Signup attempts per window.
    pub signup: WindowLimit,
    /// Password reset requests per window.
    pub password_reset: WindowLimit,
    pub pattern: PatternSettings,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            login: WindowLimit::new(5, Duration::from_secs(15 * 60)),
            signup: WindowLimit::new(3, Duration::from_secs(60 * 60)),
            password_reset: WindowLimit::new(3, Duration::from_secs(60 * 60)),
            pattern: PatternSettings::default(),
        }
    }
}

impl GuardSettings {
    fn limit(&self, action: AuthAction) -> WindowLimit {
        match action {
            AuthAction::Login => self.login,
            AuthAction::Signup => self.signup,
            AuthAction::PasswordReset => self.password_reset,
        }
    }
}

pub struct AuthGuard {
    client_key: String,
    settings: GuardSettings,
    windows: DashMap<(AuthAction, String), RateWindow>,
    analyzer: RequestPatternAnalyzer,
}

impl AuthGuard {
    pub fn new(client_key: impl Into<String>, settings: GuardSettings) -> Self {
        let analyzer = RequestPatternAnalyzer::new(settings.pattern.clone());
        Self {
            client_key: client_key.into(),
            settings,
            windows: DashMap::new(),
            analyzer,
        }
    }

    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    fn key(&self, action: AuthAction) -> (AuthAction, String) {
        (action, self.client_key.clone())
    }

    /// Decide whether an attempt at `action` may reach the backend.
    pub fn precheck(&self, action: AuthAction) -> Result<()> {
        self.precheck_at(action, Instant::now())
    }

    pub fn precheck_at(&self, action: AuthAction, now: Instant) -> Result<()> {
        if let Some(mut window) = self.windows.get_mut(&self.key(action)) {
            if let Some(retry_after) = window.retry_after(now) {
                tracing::warn!(
                    action = action.as_str(),
                    client = %self.client_key,
                    retry_after_secs = retry_after.as_secs(),
                    "Attempt blocked by lockout window"
                );
                return Err(local_limit(retry_after));
            }
        }

        let pattern_key = format!("{}:{}", action.as_str(), self.client_key);
        match self.analyzer.record_at(&pattern_key, now) {
            PatternVerdict::Normal => Ok(()),
            PatternVerdict::Suspicious {
                reason,
                retry_after,
            } => {
                tracing::warn!(
                    action = action.as_str(),
                    client = %self.client_key,
                    reason = ?reason,
                    "Attempt blocked by request pattern"
                );
                Err(local_limit(retry_after))
            }
        }
    }

    /// Count an attempt against the action's window.
    pub fn record_attempt(&self, action: AuthAction) {
        self.record_attempt_at(action, Instant::now());
    }

    pub fn record_attempt_at(&self, action: AuthAction, now: Instant) {
        let limit = self.settings.limit(action);
        self.windows
            .entry(self.key(action))
            .or_insert_with(|| RateWindow::new(limit.max_attempts, limit.window))
            .record(now);
    }

    /// Count a failed attempt. Same window as [`record_attempt`](Self::record_attempt).
    pub fn record_failure(&self, action: AuthAction) {
        tracing::debug!(action = action.as_str(), client = %self.client_key, "Failed attempt");
        self.record_attempt(action);
    }

    /// Clear the action's window after a success.
    pub fn record_success(&self, action: AuthAction) {
        self.windows.remove(&self.key(action));
    }
}

fn local_limit(retry_after: Duration) -> AppError {
    AppError::RateLimited {
        retry_after,
        origin: RateLimitSource::Local,
    }
}

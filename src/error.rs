// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent user-facing messages.

use crate::backend::{BackendError, BackendErrorKind};
use crate::services::validation::sanitize_text;
use std::time::Duration;

/// Where a rate-limit decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitSource {
    /// Local heuristics blocked the attempt before any network call.
    Local,
    /// The backend rejected the request with a rate-limit error.
    Backend,
}

/// Application error type returned by every session operation.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Password does not meet the strength policy: {}", .violations.join("; "))]
    WeakPassword { violations: Vec<String> },

    #[error("Rate limited ({origin:?}), retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        origin: RateLimitSource,
    },

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Session expired")]
    SessionExpired,

    #[error("Backend request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Backend request cancelled")]
    Cancelled,

    #[error("Backend error: {0}")]
    Backend(BackendError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<BackendError> for AppError {
    /// Lift structured backend failures into the error kinds callers branch on.
    fn from(err: BackendError) -> Self {
        match err.kind {
            BackendErrorKind::RateLimited { retry_after } => AppError::RateLimited {
                retry_after,
                origin: RateLimitSource::Backend,
            },
            BackendErrorKind::InvalidCredentials => AppError::InvalidCredentials,
            BackendErrorKind::SessionExpired => AppError::SessionExpired,
            _ => AppError::Backend(err),
        }
    }
}

impl AppError {
    /// Short machine-readable code, used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::WeakPassword { .. } => "weak_password",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::SessionExpired => "session_expired",
            AppError::TimedOut(_) => "timed_out",
            AppError::Cancelled => "cancelled",
            AppError::Backend(_) => "backend_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Retry-after duration for rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AppError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::RateLimited { .. })
    }

    /// Message safe to show in a form. Raw backend text is only ever
    /// surfaced after sanitization.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => sanitize_text(msg),
            AppError::WeakPassword { violations } => violations
                .first()
                .cloned()
                .unwrap_or_else(|| "Password is too weak".to_string()),
            AppError::RateLimited { retry_after, .. } => format!(
                "Too many attempts. Please try again in {} seconds.",
                countdown_secs(*retry_after)
            ),
            AppError::Unauthenticated => "Please log in to continue.".to_string(),
            AppError::Forbidden(_) => {
                "You do not have permission to perform this action.".to_string()
            }
            AppError::InvalidCredentials => "Invalid email or password.".to_string(),
            AppError::SessionExpired => {
                "Your session has expired. Please log in again.".to_string()
            }
            AppError::TimedOut(_) => "The request timed out. Please try again.".to_string(),
            AppError::Cancelled => "The request was cancelled.".to_string(),
            AppError::Backend(err) => match &err.kind {
                BackendErrorKind::UserAlreadyExists => {
                    "An account with this email already exists.".to_string()
                }
                BackendErrorKind::EmailNotConfirmed => {
                    "Please confirm your email address before logging in.".to_string()
                }
                BackendErrorKind::WeakPassword | BackendErrorKind::Validation => {
                    let msg = sanitize_text(&err.message);
                    if msg.is_empty() {
                        "The submitted data was rejected.".to_string()
                    } else {
                        msg
                    }
                }
                BackendErrorKind::NotFound => {
                    "The requested item could not be found.".to_string()
                }
                BackendErrorKind::PermissionDenied => {
                    "You do not have permission to perform this action.".to_string()
                }
                BackendErrorKind::Conflict => {
                    "This change conflicts with existing data.".to_string()
                }
                BackendErrorKind::Network | BackendErrorKind::Unavailable => {
                    "Unable to reach the server. Please check your connection and try again."
                        .to_string()
                }
                _ => {
                    tracing::error!(error = %err, "Unexpected backend error");
                    "Something went wrong. Please try again.".to_string()
                }
            },
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

/// Whole seconds for a visible countdown, rounded up and never zero.
pub fn countdown_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_rate_limit_becomes_rate_limited() {
        let err = AppError::from(BackendError::new(
            BackendErrorKind::RateLimited {
                retry_after: Duration::from_secs(30),
            },
            "email rate limit exceeded",
        ));
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert!(matches!(
            err,
            AppError::RateLimited {
                origin: RateLimitSource::Backend,
                ..
            }
        ));
    }

    #[test]
    fn test_rate_limited_message_has_countdown() {
        let err = AppError::RateLimited {
            retry_after: Duration::from_millis(4_200),
            origin: RateLimitSource::Local,
        };
        assert_eq!(
            err.user_message(),
            "Too many attempts. Please try again in 5 seconds."
        );
    }

    #[test]
    fn test_backend_validation_text_is_sanitized() {
        let err = AppError::from(BackendError::new(
            BackendErrorKind::Validation,
            "<script>alert(1)</script>Bio is too long",
        ));
        let msg = err.user_message();
        assert!(!msg.contains('<'));
        assert!(msg.contains("Bio is too long"));
    }

    #[test]
    fn test_unknown_backend_error_is_generic() {
        let err = AppError::from(BackendError::new(
            BackendErrorKind::Unknown,
            "relation \"profiles\" does not exist",
        ));
        assert_eq!(err.user_message(), "Something went wrong. Please try again.");
    }

    #[test]
    fn test_countdown_never_zero() {
        assert_eq!(countdown_secs(Duration::ZERO), 1);
        assert_eq!(countdown_secs(Duration::from_secs(60)), 60);
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - client-side logic layer.

pub mod fingerprint;
pub mod guard;
pub mod pattern;
pub mod rate_limit;
pub mod session;
pub mod social;
pub mod validation;

pub use fingerprint::ClientEnvironment;
pub use guard::{AuthAction, AuthGuard, GuardSettings, WindowLimit};
pub use pattern::{PatternSettings, PatternVerdict, RequestPatternAnalyzer, SuspicionReason};
pub use rate_limit::{RateLimiter, RateWindow};
pub use session::{
    BestEffort, FailurePolicy, Navigation, Operation, SessionManager, SessionSettings,
    SessionSnapshot,
};
pub use validation::{PasswordStrength, UrlPolicy};

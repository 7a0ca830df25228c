// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Input validation and sanitization.
//!
//! Everything here is pure and synchronous. Validators run before any
//! backend call, so a rejected input never costs a network round trip.
//!
//! - [`validate_email`]: structural email check, returns the normalized address
//! - [`check_password_strength`]: signup/password-change policy, all violations
//! - [`validate_login_password`]: the weaker check used by the login form
//! - [`sanitize_text`]: strips markup and script vectors from free text
//! - [`validate_url`]: scheme and host checks for user-supplied links

use crate::error::{AppError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};
use validator::ValidateEmail;

const MAX_EMAIL_LEN: usize = 254;
const MIN_LOGIN_PASSWORD_LEN: usize = 6;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;

/// Lowercase fragments that make a password too guessable.
const COMMON_PASSWORD_FRAGMENTS: &[&str] = &[
    "password", "passw0rd", "qwerty", "123456", "12345678", "abc123", "letmein", "welcome",
    "admin", "iloveyou", "monkey", "dragon", "111111", "football", "baseball",
];

static EMAIL_STRUCTURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$")
        .expect("email regex is valid")
});

static ANGLE_BRACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[<>]").expect("regex is valid"));

static SCRIPT_SCHEMES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:javascript|vbscript|data)\s*:").expect("regex is valid")
});

static EVENT_HANDLERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)on\w+\s*=").expect("regex is valid"));

static INJECTION_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*script|javascript:|vbscript:|data:text/html|\bon[a-z]+\s*=")
        .expect("regex is valid")
});

// ─── Email & Passwords ───────────────────────────────────────────

/// Validate an email address and return it trimmed and lowercased.
pub fn validate_email(input: &str) -> Result<String> {
    let email = input.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(AppError::Validation(
            "Email address is too long".to_string(),
        ));
    }

    let invalid = || AppError::Validation("Please enter a valid email address".to_string());

    if email.contains('<') || email.contains('>') || email.contains("..") {
        return Err(invalid());
    }
    if email.starts_with('.') || email.ends_with('.') {
        return Err(invalid());
    }
    let local = email.split('@').next().unwrap_or_default();
    if local.starts_with('.') || local.ends_with('.') {
        return Err(invalid());
    }
    if !EMAIL_STRUCTURE.is_match(&email) || !ValidateEmail::validate_email(&email) {
        return Err(invalid());
    }

    Ok(email)
}

/// Minimal check for the login form. The full strength policy applies only
/// when a password is chosen, so older passwords still work.
pub fn validate_login_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(AppError::Validation("Password is required".to_string()));
    }
    if password.chars().count() < MIN_LOGIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters long",
            MIN_LOGIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Outcome of [`check_password_strength`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordStrength {
    pub is_valid: bool,
    /// Every violated rule, in policy order.
    pub violations: Vec<String>,
}

impl PasswordStrength {
    /// Convert to a `Result`, carrying all violations on failure.
    pub fn into_result(self) -> Result<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(AppError::WeakPassword {
                violations: self.violations,
            })
        }
    }
}

/// Evaluate a new password against the strength policy.
pub fn check_password_strength(password: &str) -> PasswordStrength {
    let mut violations = Vec::new();
    let len = password.chars().count();

    if len < MIN_PASSWORD_LEN {
        violations.push(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        ));
    }
    if len > MAX_PASSWORD_LEN {
        violations.push(format!(
            "Password must be no more than {} characters long",
            MAX_PASSWORD_LEN
        ));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        violations.push("Password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        violations.push("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push("Password must contain at least one number".to_string());
    }
    if !password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        violations.push("Password must contain at least one special character".to_string());
    }
    if has_repeated_run(password, 3) {
        violations
            .push("Password must not contain three or more repeated characters".to_string());
    }
    let lowered = password.to_lowercase();
    if COMMON_PASSWORD_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
    {
        violations.push("Password is too common or contains a common pattern".to_string());
    }
    if INJECTION_MARKERS.is_match(password) {
        violations.push("Password contains disallowed content".to_string());
    }

    PasswordStrength {
        is_valid: violations.is_empty(),
        violations,
    }
}

/// True if some character repeats `run` or more times in a row.
fn has_repeated_run(s: &str, run: usize) -> bool {
    let mut previous = None;
    let mut count = 0;
    for c in s.chars() {
        if Some(c) == previous {
            count += 1;
        } else {
            previous = Some(c);
            count = 1;
        }
        if count >= run {
            return true;
        }
    }
    false
}

// ─── Free Text ───────────────────────────────────────────────────

/// Strip markup and script vectors from user-supplied text.
///
/// Removal repeats until nothing changes, so input like `<scr<x>ipt>` or
/// `javajavascript:script:` cannot reassemble a pattern after one pass.
/// Newlines and tabs survive; other control characters do not.
pub fn sanitize_text(input: &str) -> String {
    let mut text: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    loop {
        let stripped = strip_once(&text);
        if stripped == text {
            break;
        }
        text = stripped;
    }

    text.trim().to_string()
}

fn strip_once(text: &str) -> String {
    let text = ANGLE_BRACKETS.replace_all(text, "");
    let text = SCRIPT_SCHEMES.replace_all(&text, "");
    EVENT_HANDLERS.replace_all(&text, "").into_owned()
}

/// Require a non-blank value; returns it trimmed.
pub fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Reject values longer than `max` characters.
pub fn validate_length(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

// ─── URLs ────────────────────────────────────────────────────────

/// Which hosts a user-supplied URL may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlPolicy {
    /// Any http(s) host, including localhost. Development only.
    Permissive,
    /// Public hosts only: no loopback, private, link-local or internal names.
    Production,
}

/// Parse and check a user-supplied URL.
pub fn validate_url(input: &str, policy: UrlPolicy) -> Result<Url> {
    let invalid = |reason: &str| AppError::Validation(reason.to_string());

    let url = Url::parse(input.trim()).map_err(|_| invalid("Please enter a valid URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("URL must start with http:// or https://"));
    }
    let host = url
        .host()
        .ok_or_else(|| invalid("Please enter a valid URL"))?;

    if policy == UrlPolicy::Production {
        let internal = match &host {
            Host::Domain(domain) => is_internal_domain(domain),
            Host::Ipv4(ip) => is_internal_ipv4(ip),
            Host::Ipv6(ip) => is_internal_ipv6(ip),
        };
        if internal {
            return Err(invalid("URL must point to a public address"));
        }
    }

    Ok(url)
}

fn is_internal_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    domain == "localhost"
        || domain.ends_with(".localhost")
        || domain.ends_with(".local")
        || domain.ends_with(".internal")
}

fn is_internal_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || octets[0] == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
}

fn is_internal_ipv6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link local
        || ip.to_ipv4_mapped().is_some_and(|v4| is_internal_ipv4(&v4))
}

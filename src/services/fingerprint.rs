// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client environment fingerprint used to key local rate limits.
//!
//! The fingerprint is a rate-limit key only. It is trivially spoofable and
//! must never be treated as a credential.

use sha2::{Digest, Sha256};

/// Observable traits of the client environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientEnvironment {
    pub user_agent: String,
    pub language: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub color_depth: u8,
    pub timezone_offset_minutes: i32,
    /// Text-metrics signature from canvas rendering, when available.
    pub canvas_signature: Option<String>,
}

impl ClientEnvironment {
    /// Describe the current process. Native clients have no screen or
    /// canvas, so those traits stay at their defaults.
    pub fn current_process() -> Self {
        let language = std::env::var("LANG")
            .ok()
            .and_then(|lang| lang.split('.').next().map(str::to_string))
            .unwrap_or_default();

        Self {
            user_agent: format!(
                "sportsync/{} ({})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS
            ),
            language,
            timezone_offset_minutes: chrono::Local::now().offset().local_minus_utc() / 60,
            ..Default::default()
        }
    }

    /// First 16 hex characters of a SHA-256 over all traits.
    pub fn fingerprint(&self) -> String {
        let parts: [&str; 7] = [
            &self.user_agent,
            &self.language,
            &self.screen_width.to_string(),
            &self.screen_height.to_string(),
            &self.color_depth.to_string(),
            &self.timezone_offset_minutes.to_string(),
            self.canvas_signature.as_deref().unwrap_or(""),
        ];

        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f_u8]);
        }
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Request pattern analysis.
//!
//! Flags keys whose request timing looks automated: too many requests in a
//! short burst, or a steady cadence faster than a person can type. A flagged
//! key stays blocked for a cooldown period.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Thresholds for [`RequestPatternAnalyzer`].
#[derive(Debug, Clone)]
pub struct PatternSettings {
    pub burst_window: Duration,
    /// More than this many requests inside `burst_window` is a burst.
    pub burst_limit: usize,
    /// Requests needed before cadence is judged.
    pub min_samples: usize,
    /// Average spacing below this over `min_samples` requests is machine timing.
    pub min_interval: Duration,
    /// Timestamps kept per key.
    pub history: usize,
    pub cooldown: Duration,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            burst_window: Duration::from_secs(10),
            burst_limit: 8,
            min_samples: 4,
            min_interval: Duration::from_millis(250),
            history: 20,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspicionReason {
    Burst,
    MachineTiming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternVerdict {
    Normal,
    Suspicious {
        reason: SuspicionReason,
        retry_after: Duration,
    },
}

impl PatternVerdict {
    pub fn is_suspicious(&self) -> bool {
        matches!(self, PatternVerdict::Suspicious { .. })
    }
}

#[derive(Debug, Default)]
struct KeyHistory {
    requests: VecDeque<Instant>,
    blocked_until: Option<(Instant, SuspicionReason)>,
}

impl KeyHistory {
    fn active_block(&mut self, now: Instant) -> Option<PatternVerdict> {
        match self.blocked_until {
            Some((until, reason)) if now < until => Some(PatternVerdict::Suspicious {
                reason,
                retry_after: until - now,
            }),
            Some(_) => {
                self.blocked_until = None;
                None
            }
            None => None,
        }
    }
}

pub struct RequestPatternAnalyzer {
    settings: PatternSettings,
    keys: DashMap<String, KeyHistory>,
}

impl RequestPatternAnalyzer {
    pub fn new(settings: PatternSettings) -> Self {
        Self {
            settings,
            keys: DashMap::new(),
        }
    }

    /// Record a request for `key` and judge the pattern so far.
    pub fn record(&self, key: &str) -> PatternVerdict {
        self.record_at(key, Instant::now())
    }

    pub fn record_at(&self, key: &str, now: Instant) -> PatternVerdict {
        let mut history = self.keys.entry(key.to_string()).or_default();

        if let Some(verdict) = history.active_block(now) {
            return verdict;
        }

        history.requests.push_back(now);
        while history.requests.len() > self.settings.history {
            history.requests.pop_front();
        }

        match self.evaluate(&history.requests, now) {
            Some(reason) => {
                tracing::warn!(key, reason = ?reason, "Suspicious request pattern");
                history.blocked_until = Some((now + self.settings.cooldown, reason));
                PatternVerdict::Suspicious {
                    reason,
                    retry_after: self.settings.cooldown,
                }
            }
            None => PatternVerdict::Normal,
        }
    }

    /// Current verdict for `key` without recording a request.
    pub fn check_at(&self, key: &str, now: Instant) -> PatternVerdict {
        self.keys
            .get_mut(key)
            .and_then(|mut history| history.active_block(now))
            .unwrap_or(PatternVerdict::Normal)
    }

    pub fn reset(&self, key: &str) {
        self.keys.remove(key);
    }

    fn evaluate(&self, requests: &VecDeque<Instant>, now: Instant) -> Option<SuspicionReason> {
        let in_burst = requests
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.settings.burst_window)
            .count();
        if in_burst > self.settings.burst_limit {
            return Some(SuspicionReason::Burst);
        }

        let samples = self.settings.min_samples.max(2);
        if requests.len() >= samples {
            let first = requests[requests.len() - samples];
            let last = requests[requests.len() - 1];
            let average = last.saturating_duration_since(first) / (samples as u32 - 1);
            if average < self.settings.min_interval {
                return Some(SuspicionReason::MachineTiming);
            }
        }
        None
    }
}

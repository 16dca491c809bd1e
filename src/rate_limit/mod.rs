//! Rate limiting
//!
//! Sliding-log limiter with three independent lanes. Each (lane, key) pair
//! keeps the instants of its admitted requests inside the current window.
//! Counters are process-local; several instances behind a balancer each
//! enforce their own limit.
//!
//! A GCRA limiter such as `governor` spaces admissions out at a steady
//! rate, so it cannot express "N requests in any trailing window". The log
//! admits a full burst up front and frees each slot exactly one window
//! after the request that used it.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::{RateLimitConfig, WindowConfig};

/// Which budget a request draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitLane {
    /// Every authenticated partner request
    Global,
    /// Export creation only
    Export,
    /// Processor webhook, keyed by caller IP
    Webhook,
}

impl RateLimitLane {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitLane::Global => "global",
            RateLimitLane::Export => "export",
            RateLimitLane::Webhook => "webhook",
        }
    }
}

impl fmt::Display for RateLimitLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Denied { retry_after_secs: u64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    logs: DashMap<(RateLimitLane, String), VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            logs: DashMap::new(),
        }
    }

    fn window(&self, lane: RateLimitLane) -> WindowConfig {
        match lane {
            RateLimitLane::Global => self.config.global,
            RateLimitLane::Export => self.config.export,
            RateLimitLane::Webhook => self.config.webhook,
        }
    }

    /// Record one request against `key` in `lane` if the budget allows it
    pub fn check(&self, lane: RateLimitLane, key: &str) -> RateLimitDecision {
        self.check_at(lane, key, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock
    pub fn check_at(&self, lane: RateLimitLane, key: &str, now: Instant) -> RateLimitDecision {
        let limits = self.window(lane);
        let window = limits.window();

        let mut log = self.logs.entry((lane, key.to_string())).or_default();
        evict_expired(&mut log, now, window);

        if log.len() as u32 >= limits.max_requests {
            // The oldest entry leaving the window frees the next slot
            let retry_after = log
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(window);
            return RateLimitDecision::Denied {
                retry_after_secs: ceil_secs(retry_after).max(1),
            };
        }

        log.push_back(now);
        RateLimitDecision::Allowed {
            remaining: limits.max_requests - log.len() as u32,
        }
    }

    /// Drop keys with no requests left inside their window
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    pub fn prune_at(&self, now: Instant) -> usize {
        let before = self.logs.len();
        self.logs.retain(|(lane, _), log| {
            let window = self.window(*lane).window();
            evict_expired(log, now, window);
            !log.is_empty()
        });
        before.saturating_sub(self.logs.len())
    }

    /// Number of tracked (lane, key) pairs
    pub fn tracked_keys(&self) -> usize {
        self.logs.len()
    }
}

fn evict_expired(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = log.front() {
        if now.saturating_duration_since(*oldest) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

//! Per-submitter rate limiting for payment-proof uploads
//!
//! Two rules must both pass: a cooldown between consecutive submissions and
//! a burst limit over a trailing window. Tripping the burst limit blocks the
//! submitter outright for a while.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Why a submission was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpamRejection {
    #[error("submissions blocked for another {remaining_secs}s")]
    Blocked { remaining_secs: u64 },

    #[error("please wait {remaining_secs}s before sending another receipt")]
    Cooldown { remaining_secs: u64 },

    #[error("too many receipts, blocked for {block_secs}s")]
    BurstLimit { block_secs: u64 },
}

impl SpamRejection {
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            SpamRejection::Blocked { remaining_secs }
            | SpamRejection::Cooldown { remaining_secs } => *remaining_secs,
            SpamRejection::BurstLimit { block_secs } => *block_secs,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            SpamRejection::Blocked { .. } => "blocked",
            SpamRejection::Cooldown { .. } => "cooldown",
            SpamRejection::BurstLimit { .. } => "burst_limit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpamPolicy {
    pub cooldown: Duration,
    pub window: Duration,
    pub max_in_window: usize,
    pub block: Duration,
}

impl Default for SpamPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::seconds(15),
            window: Duration::minutes(2),
            max_in_window: 3,
            block: Duration::minutes(2),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SpamState {
    recent: Vec<DateTime<Utc>>,
    blocked_until: Option<DateTime<Utc>>,
}

/// Snapshot of one submitter's limiter state
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SpamStats {
    pub recent_submissions: usize,
    pub blocked: bool,
    pub blocked_remaining_secs: u64,
    pub last_submission: Option<DateTime<Utc>>,
}

fn ceil_secs(d: Duration) -> u64 {
    let ms = d.num_milliseconds().max(0) as u64;
    ms.div_ceil(1000)
}

#[derive(Clone, Default)]
pub struct SpamGate {
    states: Arc<RwLock<HashMap<u64, SpamState>>>,
    policy: SpamPolicy,
}

impl SpamGate {
    pub fn new(policy: SpamPolicy) -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    /// Check and, when allowed, record a submission happening now
    pub async fn check(&self, submitter: u64) -> Result<(), SpamRejection> {
        self.check_at(submitter, Utc::now()).await
    }

    pub async fn check_at(&self, submitter: u64, now: DateTime<Utc>) -> Result<(), SpamRejection> {
        let mut states = self.states.write().await;
        let state = states.entry(submitter).or_default();

        let result = self.evaluate(state, now);
        match &result {
            Ok(()) => {
                state.recent.push(now);
            }
            Err(rejection) => {
                tracing::warn!(
                    user_id = submitter,
                    reason = rejection.reason(),
                    remaining_secs = rejection.retry_after_secs(),
                    "Receipt submission rate limited"
                );
            }
        }
        result
    }

    fn evaluate(&self, state: &mut SpamState, now: DateTime<Utc>) -> Result<(), SpamRejection> {
        if let Some(until) = state.blocked_until {
            if now < until {
                return Err(SpamRejection::Blocked {
                    remaining_secs: ceil_secs(until - now),
                });
            }
            state.blocked_until = None;
        }

        let window = self.policy.window;
        state.recent.retain(|t| now - *t < window);

        if let Some(last) = state.recent.iter().max() {
            let since = now - *last;
            if since < self.policy.cooldown {
                return Err(SpamRejection::Cooldown {
                    remaining_secs: ceil_secs(self.policy.cooldown - since),
                });
            }
        }

        if state.recent.len() >= self.policy.max_in_window {
            state.blocked_until = Some(now + self.policy.block);
            return Err(SpamRejection::BurstLimit {
                block_secs: ceil_secs(self.policy.block),
            });
        }

        Ok(())
    }

    pub async fn stats(&self, submitter: u64) -> SpamStats {
        self.stats_at(submitter, Utc::now()).await
    }

    pub async fn stats_at(&self, submitter: u64, now: DateTime<Utc>) -> SpamStats {
        let states = self.states.read().await;
        let Some(state) = states.get(&submitter) else {
            return SpamStats {
                recent_submissions: 0,
                blocked: false,
                blocked_remaining_secs: 0,
                last_submission: None,
            };
        };

        let remaining = state
            .blocked_until
            .filter(|until| *until > now)
            .map(|until| ceil_secs(until - now))
            .unwrap_or(0);

        SpamStats {
            recent_submissions: state
                .recent
                .iter()
                .filter(|t| now - **t < self.policy.window)
                .count(),
            blocked: remaining > 0,
            blocked_remaining_secs: remaining,
            last_submission: state.recent.iter().max().copied(),
        }
    }

    /// Forget expired timestamps and blocks. Returns entries removed.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut states = self.states.write().await;
        let before = states.len();
        let window = self.policy.window;

        states.retain(|_, state| {
            state.recent.retain(|t| now - *t < window);
            if state.blocked_until.map(|until| now >= until).unwrap_or(false) {
                state.blocked_until = None;
            }
            !state.recent.is_empty() || state.blocked_until.is_some()
        });

        before - states.len()
    }

    /// Lift any block and history for a submitter
    pub async fn reset(&self, submitter: u64) {
        self.states.write().await.remove(&submitter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn test_cooldown_rejects_rapid_resubmission() {
        let gate = SpamGate::default();
        let start = t0();

        assert!(gate.check_at(1, start).await.is_ok());
        assert_eq!(
            gate.check_at(1, start + Duration::seconds(1)).await,
            Err(SpamRejection::Cooldown { remaining_secs: 14 })
        );
        assert!(matches!(
            gate.check_at(1, start + Duration::seconds(2)).await,
            Err(SpamRejection::Cooldown { .. })
        ));
        assert!(gate.check_at(1, start + Duration::seconds(15)).await.is_ok());
    }

    #[tokio::test]
    async fn test_fourth_submission_in_window_blocks() {
        let gate = SpamGate::default();
        let start = t0();

        for offset in [0, 20, 40] {
            assert!(gate.check_at(1, start + Duration::seconds(offset)).await.is_ok());
        }

        let fourth = start + Duration::seconds(60);
        assert_eq!(
            gate.check_at(1, fourth).await,
            Err(SpamRejection::BurstLimit { block_secs: 120 })
        );

        // blocked regardless of the window emptying
        assert!(matches!(
            gate.check_at(1, fourth + Duration::seconds(119)).await,
            Err(SpamRejection::Blocked { remaining_secs: 1 })
        ));
        assert!(gate.check_at(1, fourth + Duration::seconds(120)).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejections_are_not_recorded() {
        let gate = SpamGate::default();
        let start = t0();
        gate.check_at(1, start).await.unwrap();
        let _ = gate.check_at(1, start + Duration::seconds(5)).await;

        let stats = gate.stats_at(1, start + Duration::seconds(6)).await;
        assert_eq!(stats.recent_submissions, 1);
        assert_eq!(stats.last_submission, Some(start));
    }

    #[tokio::test]
    async fn test_submitters_are_independent() {
        let gate = SpamGate::default();
        let start = t0();
        assert!(gate.check_at(1, start).await.is_ok());
        assert!(gate.check_at(2, start).await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_submitters() {
        let gate = SpamGate::default();
        let start = t0();
        gate.check_at(1, start).await.unwrap();
        gate.check_at(2, start + Duration::minutes(3)).await.unwrap();

        assert_eq!(gate.cleanup(start + Duration::minutes(3)).await, 1);
        assert_eq!(gate.stats_at(2, start + Duration::minutes(3)).await.recent_submissions, 1);
    }
}

/*
 * Per-identity rate limiting: one serial actor per identity owning a sliding-window bucket.
 * Concurrent checks on the same identity are linearised through the actor mailbox, so N parallel
 * requests always produce exactly N sequential decisions with no cross-identity coupling.
 */

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::utils::error::{AppError, Result};

const MAILBOX_DEPTH: usize = 64;

/// Sliding window length
fn window() -> Duration {
    Duration::hours(1)
}

/// Request tier determining the hourly limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Anonymous,
    Authenticated,
}

/// Tier limits, sourced from configuration at bootstrap
#[derive(Debug, Clone, Copy)]
pub struct TierLimits {
    pub anonymous: u32,
    pub authenticated: u32,
}

impl TierLimits {
    pub fn limit_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Anonymous => self.anonymous,
            Tier::Authenticated => self.authenticated,
        }
    }
}

/// Outcome of a rate check
#[derive(Debug, Clone, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub captcha_required: bool,
}

impl RateDecision {
    /// Whole seconds until the window resets, floored to one
    pub fn retry_after_secs(&self) -> u64 {
        let seconds = (self.reset_at - Utc::now()).num_seconds();
        seconds.max(1) as u64
    }
}

/// Per-identity counter owned exclusively by its actor
#[derive(Debug)]
struct RateBucket {
    count: u32,
    window_start: DateTime<Utc>,
    captcha_required: bool,
    last_request_time: DateTime<Utc>,
}

impl RateBucket {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
            captcha_required: false,
            last_request_time: now,
        }
    }

    fn maybe_reset(&mut self, now: DateTime<Utc>) {
        if now - self.window_start >= window() {
            self.count = 0;
            self.window_start = now;
            self.captcha_required = false;
        }
    }

    fn check(&mut self, limit: u32, now: DateTime<Utc>) -> RateDecision {
        self.maybe_reset(now);
        self.last_request_time = now;
        let reset_at = self.window_start + window();

        if self.count < limit {
            self.count += 1;
            RateDecision {
                allowed: true,
                remaining: limit - self.count,
                reset_at,
                captcha_required: self.captcha_required,
            }
        } else {
            // Repeated denials inside one window escalate to a captcha.
            self.captcha_required = true;
            RateDecision {
                allowed: false,
                remaining: 0,
                reset_at,
                captcha_required: self.captcha_required,
            }
        }
    }
}

enum RateMessage {
    Check {
        tier: Tier,
        reply: oneshot::Sender<RateDecision>,
    },
    Record,
    Reset,
}

/// Coordinator owning one actor per identity
pub struct RateCoordinator {
    actors: DashMap<String, mpsc::Sender<RateMessage>>,
    limits: TierLimits,
}

impl RateCoordinator {
    pub fn new(limits: TierLimits) -> Self {
        Self {
            actors: DashMap::new(),
            limits,
        }
    }

    fn spawn_actor(identity: &str, limits: TierLimits) -> mpsc::Sender<RateMessage> {
        let (tx, mut rx) = mpsc::channel::<RateMessage>(MAILBOX_DEPTH);
        let identity = identity.to_string();

        tokio::spawn(async move {
            let mut bucket = RateBucket::new(Utc::now());

            while let Some(message) = rx.recv().await {
                match message {
                    RateMessage::Check { tier, reply } => {
                        let decision = bucket.check(limits.limit_for(tier), Utc::now());
                        debug!(
                            identity = %identity,
                            allowed = decision.allowed,
                            remaining = decision.remaining,
                            "Rate check"
                        );
                        let _ = reply.send(decision);
                    }
                    RateMessage::Record => {
                        let now = Utc::now();
                        bucket.maybe_reset(now);
                        bucket.count += 1;
                        bucket.last_request_time = now;
                    }
                    RateMessage::Reset => {
                        bucket = RateBucket::new(Utc::now());
                    }
                }
            }
        });

        tx
    }

    fn sender_for(&self, identity: &str) -> mpsc::Sender<RateMessage> {
        self.actors
            .entry(identity.to_string())
            .or_insert_with(|| Self::spawn_actor(identity, self.limits))
            .clone()
    }

    async fn send(&self, identity: &str, message: RateMessage) -> Result<()> {
        let sender = self.sender_for(identity);
        if sender.send(message).await.is_err() {
            // The actor died; drop the stale mailbox so the next call respawns.
            self.actors.remove(identity);
            return Err(AppError::internal(format!(
                "rate coordinator actor for {} is gone",
                identity
            )));
        }
        Ok(())
    }

    /// Check-and-increment under the identity's actor
    pub async fn check(&self, identity: &str, tier: Tier) -> Result<RateDecision> {
        let (reply, receiver) = oneshot::channel();
        self.send(identity, RateMessage::Check { tier, reply }).await?;
        receiver
            .await
            .map_err(|_| AppError::internal("rate coordinator reply channel closed"))
    }

    /// Out-of-band accounting increment
    pub async fn record(&self, identity: &str) -> Result<()> {
        self.send(identity, RateMessage::Record).await
    }

    /// Reset the identity's window
    pub async fn reset(&self, identity: &str) -> Result<()> {
        self.send(identity, RateMessage::Reset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn coordinator(anonymous: u32) -> Arc<RateCoordinator> {
        Arc::new(RateCoordinator::new(TierLimits {
            anonymous,
            authenticated: 20,
        }))
    }

    #[tokio::test]
    async fn test_limit_enforced_sequentially() {
        let coordinator = coordinator(3);

        for expected_remaining in [2u32, 1, 0] {
            let decision = coordinator.check("ip-1", Tier::Anonymous).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = coordinator.check("ip-1", Tier::Anonymous).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.captcha_required);
        assert!(denied.retry_after_secs() >= 1);
    }

    #[tokio::test]
    async fn test_concurrent_checks_are_linearised() {
        let coordinator = coordinator(5);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                coordinator.check("ip-2", Tier::Anonymous).await.unwrap()
            }));
        }

        let mut allowed = 0;
        let mut denied = 0;
        for handle in handles {
            let decision = handle.await.unwrap();
            if decision.allowed {
                allowed += 1;
            } else {
                denied += 1;
            }
        }

        assert_eq!(allowed, 5);
        assert_eq!(denied, 5);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let coordinator = coordinator(1);

        assert!(coordinator.check("ip-a", Tier::Anonymous).await.unwrap().allowed);
        assert!(!coordinator.check("ip-a", Tier::Anonymous).await.unwrap().allowed);
        // A different identity still has its full budget.
        assert!(coordinator.check("ip-b", Tier::Anonymous).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_authenticated_tier_uses_higher_limit() {
        let coordinator = coordinator(1);
        let decision = coordinator.check("subject-1", Tier::Authenticated).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 19);
    }

    #[tokio::test]
    async fn test_reset_restores_budget() {
        let coordinator = coordinator(1);

        assert!(coordinator.check("ip-r", Tier::Anonymous).await.unwrap().allowed);
        assert!(!coordinator.check("ip-r", Tier::Anonymous).await.unwrap().allowed);

        coordinator.reset("ip-r").await.unwrap();
        assert!(coordinator.check("ip-r", Tier::Anonymous).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_remaining_is_non_increasing() {
        let coordinator = coordinator(5);
        let mut previous = u32::MAX;
        for _ in 0..7 {
            let decision = coordinator.check("ip-m", Tier::Anonymous).await.unwrap();
            assert!(decision.remaining <= previous);
            previous = decision.remaining;
        }
    }
}

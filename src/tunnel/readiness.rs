// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Bounded polling of the relay pod's phase
//!
//! Running out of attempts is not an error here; the caller decides what an
//! exhausted poll means. The decision step is pure and the delay is injected,
//! so termination can be tested without real sleeps.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Terminal-success pod phase
pub const RUNNING: &str = "Running";

/// Sleep port used between attempts
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// What to do after observing a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Ready,
    Retry,
    GiveUp,
}

/// Decide after the `attempt`-th observation (1-based)
pub fn decide(phase: &str, attempt: u32, max_attempts: u32) -> PollDecision {
    if phase == RUNNING {
        PollDecision::Ready
    } else if attempt >= max_attempts {
        PollDecision::GiveUp
    } else {
        PollDecision::Retry
    }
}

/// How a poll ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Running { attempts: u32 },
    Exhausted { attempts: u32, last_phase: String },
    /// The pod disappeared while polling
    Missing { attempts: u32 },
}

/// One observed phase, passed to the caller's hook
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub attempt: u32,
    pub max_attempts: u32,
    pub phase: &'a str,
}

#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    max_attempts: u32,
    interval: Duration,
}

impl ReadinessPoller {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Poll until the phase is Running, the pod is gone, or attempts run out
    ///
    /// `read` yields the current phase, or `None` when the pod does not exist.
    /// Read errors abort the poll.
    pub async fn wait<R, Fut, E, O>(
        &self,
        mut read: R,
        delay: &dyn Delay,
        mut observe: O,
    ) -> Result<Readiness, E>
    where
        R: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<String>, E>>,
        O: FnMut(Observation<'_>),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(phase) = read().await? else {
                return Ok(Readiness::Missing { attempts: attempt });
            };

            observe(Observation {
                attempt,
                max_attempts: self.max_attempts,
                phase: &phase,
            });

            match decide(&phase, attempt, self.max_attempts) {
                PollDecision::Ready => return Ok(Readiness::Running { attempts: attempt }),
                PollDecision::GiveUp => {
                    return Ok(Readiness::Exhausted {
                        attempts: attempt,
                        last_phase: phase,
                    });
                }
                PollDecision::Retry => delay.sleep(self.interval).await,
            }
        }
    }
}

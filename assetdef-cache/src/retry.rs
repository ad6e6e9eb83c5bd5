//! Retry escalation for fetch attempts.
//!
//! ```text
//! Attempting --error--> RetryImmediate --error--> RetryDelayed --error--> Terminal
//!      |                      |                        |
//!      +-------- ok ----------+---------- ok ----------+-----------------> Terminal
//! ```
//!
//! The machine only counts and decides; waiting is delegated to a
//! [`Scheduler`] so tests can drive delays without real timers.

use assetdef_core::RetryConfig;
use assetdef_fetch::UrlSource;
use async_trait::async_trait;
use std::time::Duration;

/// Where the machine is in the escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    RetryImmediate,
    RetryDelayed,
    Terminal,
}

/// How many retries of each kind are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub immediate: u32,
    pub delayed: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// A single definitive attempt.
    pub const fn none() -> Self {
        Self {
            immediate: 0,
            delayed: 0,
            delay: Duration::ZERO,
        }
    }

    /// Script pointers get the configured escalation; repository URLs get none.
    pub fn for_source(source: UrlSource, config: &RetryConfig) -> Self {
        match source {
            UrlSource::ScriptUri => Self {
                immediate: config.script_uri_immediate_retries,
                delayed: config.script_uri_delayed_retries,
                delay: config.script_uri_retry_delay(),
            },
            UrlSource::Repository => Self::none(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        1 + self.immediate + self.delayed
    }
}

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Deliver the last outcome.
    Done,
    RetryNow,
    RetryAfter(Duration),
}

#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    attempts: u32,
    immediate_used: u32,
    delayed_used: u32,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempting,
            attempts: 0,
            immediate_used: 0,
            delayed_used: 0,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Attempts reported so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record an attempt's result and decide the next step.
    pub fn on_outcome(&mut self, failed: bool) -> NextStep {
        if self.state == RetryState::Terminal {
            return NextStep::Done;
        }
        self.attempts += 1;

        if !failed {
            self.state = RetryState::Terminal;
            return NextStep::Done;
        }
        if self.immediate_used < self.policy.immediate {
            self.immediate_used += 1;
            self.state = RetryState::RetryImmediate;
            return NextStep::RetryNow;
        }
        if self.delayed_used < self.policy.delayed {
            self.delayed_used += 1;
            self.state = RetryState::RetryDelayed;
            return NextStep::RetryAfter(self.policy.delay);
        }
        self.state = RetryState::Terminal;
        NextStep::Done
    }
}

/// Waits between attempts.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Scheduler on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

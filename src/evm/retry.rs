// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Retry policy, gas escalation and call timeouts.
//!
//! [`RetryPolicy`] is the single retry loop used by max transfers, native
//! refunds and idempotent RPC reads. Callers supply the retryable predicate:
//! gas-related errors for writes, transient errors for reads.
//!
//! Attempts are strictly sequential with a fixed delay between them.

use std::future::Future;
use std::time::Duration;

use crate::config::{EvmConfig, TransferTuning};
use crate::error::SettlementError;

// =============================================================================
// Retry Policy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `attempt(n)` for `n = 1..=max_attempts`.
    ///
    /// A non-retryable error is returned as-is on the attempt that raised it.
    /// Running out of attempts yields [`SettlementError::RetriesExhausted`].
    pub async fn run<T, F, Fut, P>(
        &self,
        operation: &str,
        is_retryable: P,
        mut attempt: F,
    ) -> Result<T, SettlementError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SettlementError>>,
        P: Fn(&SettlementError) -> bool,
    {
        let mut n = 1;
        loop {
            match attempt(n).await {
                Ok(value) => {
                    if n > 1 {
                        tracing::info!(operation = %operation, attempt = n, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !is_retryable(&e) => {
                    tracing::warn!(operation = %operation, attempt = n, error = %e, "Terminal failure");
                    return Err(e);
                }
                Err(e) if n >= self.max_attempts => {
                    tracing::error!(operation = %operation, attempts = n, error = %e, "Retries exhausted");
                    return Err(SettlementError::RetriesExhausted {
                        attempts: n,
                        last_error: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        operation = %operation,
                        attempt = n,
                        retries_left = self.max_attempts - n,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    n += 1;
                }
            }
        }
    }
}

// =============================================================================
// Gas Escalation
// =============================================================================

/// Gas price schedule: attempt `n` pays
/// `base × (initial + (n − 1) × increment / 100)`.
///
/// Kept in integer percent so the result is exact and rounded down to whole
/// wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEscalation {
    initial_percent: u64,
    increment_percent: u64,
}

impl GasEscalation {
    pub fn new(initial_multiplier: f64, increment_percent: u64) -> Self {
        let initial_percent = if initial_multiplier.is_finite() && initial_multiplier > 0.0 {
            (initial_multiplier * 100.0).floor() as u64
        } else {
            100
        };
        Self {
            initial_percent,
            increment_percent,
        }
    }

    pub fn from_tuning(tuning: &TransferTuning) -> Self {
        Self::new(tuning.initial_gas_multiplier, tuning.gas_increment_percent)
    }

    /// Multiplier for `attempt`, in percent.
    pub fn percent(&self, attempt: u32) -> u64 {
        let steps = u64::from(attempt.saturating_sub(1));
        self.initial_percent
            .saturating_add(steps.saturating_mul(self.increment_percent))
    }

    pub fn gas_price(&self, base: u128, attempt: u32) -> u128 {
        base.saturating_mul(u128::from(self.percent(attempt))) / 100
    }
}

// =============================================================================
// Timeouts and Safe Calls
// =============================================================================

/// Bound a fallible future by `duration`.
///
/// On expiry the future is dropped and [`SettlementError::Timeout`] returned.
/// For submissions that means the outcome is unknown, not failed.
pub async fn with_timeout<T, F>(
    duration: Duration,
    operation: &str,
    fut: F,
) -> Result<T, SettlementError>
where
    F: Future<Output = Result<T, SettlementError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation = %operation, timeout_ms = duration.as_millis() as u64, "Call timed out");
            Err(SettlementError::Timeout(operation.to_string()))
        }
    }
}

/// Timeout and retry budget for contract/RPC calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// Retries after the first attempt (reads only)
    pub retries: u32,
    pub delay: Duration,
}

impl CallPolicy {
    pub fn from_config(config: &EvmConfig) -> Self {
        Self {
            timeout: config.call_timeout,
            retries: config.call_retries,
            delay: config.transfer.retry_delay,
        }
    }
}

/// Idempotent read with a per-attempt timeout and bounded retry of transient
/// failures. The last underlying error is returned when retries run out.
pub async fn safe_call<T, F, Fut>(
    policy: &CallPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, SettlementError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SettlementError>>,
{
    let retry = RetryPolicy::new(policy.retries.saturating_add(1), policy.delay);
    let result = retry
        .run(operation, SettlementError::is_transient, |_| {
            with_timeout(policy.timeout, operation, call())
        })
        .await;
    match result {
        Err(SettlementError::RetriesExhausted { last_error, .. }) => Err(*last_error),
        other => other,
    }
}

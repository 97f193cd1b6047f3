// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Circuit breaker around the inference backend.
//!
//! ```text
//!            failure_threshold consecutive failures
//!   CLOSED ─────────────────────────────────────────► OPEN
//!     ▲                                                │
//!     │ success_threshold                              │ recovery_timeout since
//!     │ consecutive successes                          │ the last failure (lazy)
//!     │                                                ▼
//!     └──────────────────────────────────────────── HALF_OPEN
//!                      any failure ─────────────────► OPEN
//! ```
//!
//! The OPEN → HALF_OPEN transition is evaluated lazily whenever the state is
//! observed; there is no timer task. A single mutex guards all fields.

use crate::BreakerConfig;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Fast-failing every request.
    Open,
    /// Letting requests through to probe recovery.
    HalfOpen,
}

/// Snapshot of the breaker for health endpoints.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_s: f64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
}

/// Thread-safe circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Moves OPEN to HALF_OPEN once the recovery timeout has elapsed.
    fn maybe_transition(&self, inner: &mut Inner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner.last_failure.map_or(Duration::MAX, |t| t.elapsed());
        if elapsed >= self.config.recovery_timeout() {
            inner.state = CircuitState::HalfOpen;
            inner.successes = 0;
            tracing::info!("circuit '{}': HALF_OPEN (probing)", self.name);
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_transition(&mut inner);
        inner.state
    }

    /// Returns `true` if a request may go through (CLOSED or HALF_OPEN).
    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Time left until an OPEN circuit will probe again; zero otherwise.
    pub fn retry_after(&self) -> Duration {
        let mut inner = self.inner.lock();
        self.maybe_transition(&mut inner);
        match (inner.state, inner.last_failure) {
            (CircuitState::Open, Some(t)) => self.config.recovery_timeout().saturating_sub(t.elapsed()),
            _ => Duration::ZERO,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.successes += 1;
            if inner.successes >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.successes = 0;
                tracing::info!("circuit '{}': CLOSED (recovered)", self.name);
            }
        } else {
            inner.failures = 0;
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        inner.successes = 0;
        inner.last_failure = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            tracing::warn!("circuit '{}': OPEN (half-open probe failed)", self.name);
        } else if inner.state == CircuitState::Closed
            && inner.failures >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            tracing::warn!(
                "circuit '{}': OPEN after {} consecutive failures",
                self.name,
                inner.failures
            );
        }
    }

    /// Forces the breaker back to CLOSED.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.last_failure = None;
    }

    pub fn status(&self) -> BreakerStatus {
        let mut inner = self.inner.lock();
        self.maybe_transition(&mut inner);
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failures,
            success_count: inner.successes,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            recovery_timeout_s: self.config.recovery_timeout_s,
        }
    }
}

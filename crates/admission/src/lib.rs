// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # admission
//!
//! Protects the inference backend from overload and cascading failure.
//!
//! ```text
//!  request ──► CircuitBreaker ──open──► CircuitOpen ("temporarily unavailable")
//!                   │ closed / half-open
//!                   ▼
//!             InferenceBatcher ──► InferenceBackend (blocking pool)
//!                   │
//!                   └──► success / failure fed back to the breaker
//! ```
//!
//! [`AdmissionGate`] wires the two together; both halves can also be used
//! on their own.
//!
//! # Example
//! ```
//! use admission::{BreakerConfig, CircuitBreaker, CircuitState};
//!
//! let breaker = CircuitBreaker::new("inference", BreakerConfig::default());
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! for _ in 0..5 {
//!     breaker.record_failure();
//! }
//! assert!(!breaker.allow_request());
//! ```

pub mod backend;
mod batcher;
mod breaker;
mod config;
mod error;
mod gateway;
mod stats;

pub use backend::{BackendError, EchoBackend, GenerationParams, InferenceBackend};
pub use batcher::InferenceBatcher;
pub use breaker::{BreakerStatus, CircuitBreaker, CircuitState};
pub use config::{AdmissionConfig, BatcherConfig, BreakerConfig};
pub use error::AdmissionError;
pub use gateway::{AdmissionGate, INFERENCE_CIRCUIT};
pub use stats::BatcherStats;

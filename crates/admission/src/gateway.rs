// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The admission path every generation request takes: breaker first, then
//! the batcher.

use crate::backend::{GenerationParams, InferenceBackend};
use crate::{
    AdmissionConfig, AdmissionError, BatcherStats, BreakerStatus, CircuitBreaker, InferenceBatcher,
};
use std::sync::Arc;

/// Breaker name used when the gate builds its own breaker.
pub const INFERENCE_CIRCUIT: &str = "inference";

/// Composes a [`CircuitBreaker`] with an [`InferenceBatcher`].
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    breaker: Arc<CircuitBreaker>,
    batcher: Arc<InferenceBatcher>,
}

impl AdmissionGate {
    pub fn new(breaker: Arc<CircuitBreaker>, batcher: Arc<InferenceBatcher>) -> Self {
        Self { breaker, batcher }
    }

    /// Builds both halves from configuration.
    pub fn from_config(backend: Arc<dyn InferenceBackend>, config: &AdmissionConfig) -> Self {
        Self::new(
            Arc::new(CircuitBreaker::new(INFERENCE_CIRCUIT, config.breaker.clone())),
            Arc::new(InferenceBatcher::new(backend, config.batch.clone())),
        )
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn batcher(&self) -> &Arc<InferenceBatcher> {
        &self.batcher
    }

    /// Admits one request.
    ///
    /// An open circuit fails fast with [`AdmissionError::CircuitOpen`].
    /// Backend errors and timeouts count against the breaker; a shutdown
    /// does not.
    pub async fn generate(
        &self,
        prompt: impl Into<String>,
        params: GenerationParams,
    ) -> Result<String, AdmissionError> {
        if !self.breaker.allow_request() {
            return Err(AdmissionError::CircuitOpen {
                name: self.breaker.name().to_string(),
                retry_after: self.breaker.retry_after(),
            });
        }

        let result = self.batcher.submit(prompt, params).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(AdmissionError::Backend(_)) | Err(AdmissionError::Timeout { .. }) => {
                self.breaker.record_failure()
            }
            Err(_) => {}
        }
        result
    }

    pub fn stats(&self) -> BatcherStats {
        self.batcher.stats()
    }

    pub fn status(&self) -> BreakerStatus {
        self.breaker.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::{BatcherConfig, BreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyBackend {
        calls: AtomicUsize,
        healthy_after: usize,
    }

    impl InferenceBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn generate(&self, prompt: &str, _: &GenerationParams) -> Result<String, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.healthy_after {
                Err(BackendError::new("device lost"))
            } else {
                Ok(prompt.to_string())
            }
        }
    }

    fn gate(backend: Arc<FlakyBackend>, recovery_s: f64) -> AdmissionGate {
        let config = AdmissionConfig {
            batch: BatcherConfig {
                window_ms: 5,
                max_batch: 4,
                timeout_s: 5.0,
            },
            breaker: BreakerConfig {
                failure_threshold: 3,
                recovery_timeout_s: recovery_s,
                success_threshold: 1,
            },
        };
        AdmissionGate::from_config(backend, &config)
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let backend = Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            healthy_after: usize::MAX,
        });
        let gate = gate(backend.clone(), 60.0);

        for _ in 0..3 {
            let err = gate.generate("p", GenerationParams::default()).await.unwrap_err();
            assert!(matches!(err, AdmissionError::Backend(_)));
        }
        assert_eq!(gate.status().state, CircuitState::Open);

        let err = gate.generate("p", GenerationParams::default()).await.unwrap_err();
        assert!(matches!(err, AdmissionError::CircuitOpen { .. }));
        assert!(err.is_retryable());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recovers_through_half_open() {
        let backend = Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            healthy_after: 3,
        });
        let gate = gate(backend, 0.0);
        gate.batcher().start();

        for _ in 0..3 {
            assert!(gate.generate("p", GenerationParams::default()).await.is_err());
        }
        assert_eq!(gate.status().state, CircuitState::HalfOpen);

        let out = gate.generate("back", GenerationParams::default()).await.unwrap();
        assert_eq!(out, "back");
        assert_eq!(gate.status().state, CircuitState::Closed);

        gate.batcher().stop().await;
        assert_eq!(gate.stats().total_requests, 4);
    }
}

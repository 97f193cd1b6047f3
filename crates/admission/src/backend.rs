// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The inference backend seen by the admission layer.
//!
//! Backends are synchronous: a forward pass is blocking work, so the batcher
//! always calls them from tokio's blocking pool.

/// Sampling parameters for one generation request.
///
/// Requests are only fused into one backend call when their parameters
/// compare equal.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationParams {
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub stop: Vec<String>,
}

fn default_max_new_tokens() -> u32 {
    128
}
fn default_temperature() -> f32 {
    1.0
}
fn default_top_p() -> f32 {
    1.0
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            stop: Vec::new(),
        }
    }
}

/// Failure reported by a backend for one request or one batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A text generation backend.
pub trait InferenceBackend: Send + Sync + 'static {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Generates a completion for one prompt.
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError>;

    /// Whether [`generate_batch`](Self::generate_batch) is a real fused call.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Generates completions for several prompts sharing one parameter set.
    ///
    /// Must return exactly one output per prompt, in order. The default runs
    /// the prompts one by one.
    fn generate_batch(
        &self,
        prompts: &[String],
        params: &GenerationParams,
    ) -> Result<Vec<String>, BackendError> {
        prompts.iter().map(|p| self.generate(p, params)).collect()
    }
}

/// Deterministic backend that echoes prompts back.
///
/// Prompts containing `fail_marker` fail, which makes per-request error
/// isolation observable.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    batched: bool,
    fail_marker: Option<String>,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self {
            batched: false,
            fail_marker: None,
        }
    }

    /// Advertise fused batch support.
    pub fn batched(mut self) -> Self {
        self.batched = true;
        self
    }

    /// Fail every prompt containing `marker`.
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
        if let Some(marker) = &self.fail_marker {
            if prompt.contains(marker.as_str()) {
                return Err(BackendError::new(format!("prompt rejected: {prompt}")));
            }
        }
        let words: Vec<&str> = prompt
            .split_whitespace()
            .take(params.max_new_tokens as usize)
            .collect();
        Ok(words.join(" "))
    }

    fn supports_batch(&self) -> bool {
        self.batched
    }

    fn generate_batch(
        &self,
        prompts: &[String],
        params: &GenerationParams,
    ) -> Result<Vec<String>, BackendError> {
        // A fused call fails as a whole, like a real batched forward pass.
        prompts.iter().map(|p| self.generate(p, params)).collect()
    }
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for request admission.

use std::time::Duration;

/// Errors a caller of the admission layer can see.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    /// The request was not resolved in time. Work may still finish in the
    /// background; only the caller was released.
    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout { request_id: u64, timeout: Duration },

    /// The circuit is open: the backend is temporarily unavailable.
    #[error("circuit '{name}' is open; backend temporarily unavailable (retry in {retry_after:?})")]
    CircuitOpen { name: String, retry_after: Duration },

    /// The backend failed this request.
    #[error("backend error: {0}")]
    Backend(String),

    /// The batcher stopped before the request could be queued.
    #[error("batcher is shutting down")]
    ShuttingDown,
}

impl AdmissionError {
    /// Returns `true` for conditions a client may retry later.
    ///
    /// An open circuit and a timeout are transient; a backend error for a
    /// specific request is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdmissionError::CircuitOpen { .. }
                | AdmissionError::Timeout { .. }
                | AdmissionError::ShuttingDown
        )
    }
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # orchestrator
//!
//! Keeps model blocks spread over GPU memory, host RAM, local disk and
//! remote nodes, moving them as device pressure changes.
//!
//! # Architecture
//!
//! ```text
//!   DeviceMonitor ──readings──► BlockOrchestrator ◄── LayerSource
//!                                 │      │     │
//!            ┌────────────────────┘      │     └─────────────────┐
//!            ▼                           ▼                       ▼
//!     DeviceBalancer ──► registry   TierBenchmarker     HostRamCache / DiskStore
//!     (device sets)     (tier truth)  (route choice)    / BlockTransport (remote)
//!
//!   ControlLoop: rebalance → apply_promotions → decay_sweep, every cycle
//! ```
//!
//! The registry ([`memory_manager::HierarchicalMemoryManager`]) is the only
//! source of truth for where a block lives; the stores only hold bytes.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use orchestrator::{BlockOrchestrator, ServiceConfig, SyntheticSource, synthetic_stack};
//! use resource_monitor::DrmMonitor;
//!
//! # async fn run() -> Result<(), orchestrator::OrchestratorError> {
//! let config = ServiceConfig::from_file("orchestrator.toml".as_ref())?;
//! let orch = BlockOrchestrator::new(
//!     &config,
//!     Arc::new(DrmMonitor::new()),
//!     config.create_transport()?,
//!     Arc::new(SyntheticSource::default()),
//! )?;
//!
//! let stack = synthetic_stack(32, 256);
//! let report = orch.auto_manage(&stack[0..4], 2, config.rebalance_threshold_pct, config.host_ram_limit).await?;
//! println!("{}", report.rebalance.summary());
//! # Ok(())
//! # }
//! ```

mod benchmark;
mod config;
mod control;
mod error;
mod layers;
mod metrics;
mod orchestrator;
mod store;

pub use benchmark::{BenchmarkResult, TierBenchmarker};
pub use config::{DeviceConfig, ServiceConfig, TransportKind};
pub use control::ControlLoop;
pub use error::OrchestratorError;
pub use layers::{synthetic_stack, Layer, LayerSource, LayerStreamer, SyntheticSource};
pub use metrics::{MetricsSnapshot, OrchestratorMetrics, TierCounts};
pub use orchestrator::{
    AutoManageReport, BlockMove, BlockOrchestrator, OrchestratorSummary, RebalancePhase,
    RebalanceReport,
};
pub use store::{DiskStore, HostRamCache};

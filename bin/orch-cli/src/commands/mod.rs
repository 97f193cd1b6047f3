// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

pub mod bench;
pub mod config;
pub mod serve_node;
pub mod simulate;
pub mod status;

use anyhow::Context;
use orchestrator::ServiceConfig;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose > 1)
        .init();
}

/// Loads `path`, or the defaults when no file was given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ServiceConfig> {
    match path {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => {
            tracing::debug!("no --config given, using defaults");
            Ok(ServiceConfig::default())
        }
    }
}

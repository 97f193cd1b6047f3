// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `vram-orch config`: the effective configuration, defaults filled in.

use orchestrator::ServiceConfig;

pub fn execute(config: &ServiceConfig) -> anyhow::Result<()> {
    config.validate()?;
    print!("{}", config.to_toml()?);
    Ok(())
}

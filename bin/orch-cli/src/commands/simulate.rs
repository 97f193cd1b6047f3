// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `vram-orch simulate`: streams a synthetic model through the hierarchy.
//!
//! Device readings are scripted from `--pressure`; remote nodes are served
//! in-process. Each step moves the active window one layer forward and
//! re-reads every loaded layer that was pushed off-device.

use admission::{AdmissionError, AdmissionGate, EchoBackend, GenerationParams};
use anyhow::Context;
use block_transport::{InMemoryTransport, RemoteNode};
use memory_manager::Capacity;
use orchestrator::{
    synthetic_stack, BlockOrchestrator, DeviceConfig, ServiceConfig, SyntheticSource,
};
use resource_monitor::{DeviceId, PushMonitor};
use std::sync::Arc;

pub struct SimulateOptions {
    pub layers: usize,
    pub layer_size: String,
    pub window: usize,
    pub lookahead: usize,
    pub steps: usize,
    pub pressure: String,
    pub requests: usize,
    pub json: bool,
}

pub async fn execute(config: &ServiceConfig, opts: SimulateOptions) -> anyhow::Result<()> {
    anyhow::ensure!(opts.layers > 0, "--layers must be at least 1");
    anyhow::ensure!(opts.window > 0, "--window must be at least 1");
    let layer_size = Capacity::parse(&opts.layer_size)?;
    let size_mb = u32::try_from(layer_size.as_mb()).context("layer size too large")?;
    let pressure = parse_pressure(&opts.pressure)?;

    let mut config = config.clone();
    config.scratch_dir = config.scratch_dir.join("simulate");
    if config.devices.is_empty() {
        config.devices = (0..2)
            .map(|i| DeviceConfig {
                id: DeviceId(i),
                capacity: Capacity::from_gb(8),
                cache_size: None,
            })
            .collect();
    }
    if config.remote_nodes.is_empty() {
        config.remote_nodes = vec![RemoteNode::new(1, "in-process")];
    }

    let monitor = Arc::new(PushMonitor::with_devices(config.devices.iter().map(|d| d.id)));
    let orch = BlockOrchestrator::new(
        &config,
        monitor.clone(),
        Arc::new(InMemoryTransport::new()),
        Arc::new(SyntheticSource::default()),
    )?;

    let stack = synthetic_stack(opts.layers, size_mb);
    let width = opts.window.min(stack.len());
    println!(
        "Simulating {} layers x {} over {} devices, window {width}, lookahead {}",
        stack.len(),
        layer_size,
        config.devices.len(),
        opts.lookahead
    );

    for step in 0..opts.steps {
        for (i, device) in config.devices.iter().enumerate() {
            monitor.set(device.id, pressure[(step + i) % pressure.len()]);
        }

        let start = step % stack.len();
        let end = (start + width).min(stack.len());
        let report = orch
            .auto_manage(
                &stack[start..end],
                opts.lookahead,
                config.rebalance_threshold_pct,
                config.host_ram_limit,
            )
            .await?;

        for name in orch.streamer().loaded_names() {
            let Some(id) = orch.streamer().block_of(&name) else {
                continue;
            };
            if orch.registry().get_tier(id).is_some_and(|t| !t.is_device()) {
                orch.fetch_block(id).await;
            }
        }
        let promoted = orch.apply_promotions().await;
        orch.registry().decay_sweep();

        tracing::info!(
            "step {step}: +{} -{} layers, {}, {} promoted",
            report.prefetched.len(),
            report.unloaded.len(),
            report.rebalance.summary(),
            promoted.len()
        );
    }

    let summary = orch.summary();
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        println!("{}", summary.render());
    }

    if opts.requests > 0 {
        run_requests(&config, opts.requests).await?;
    }
    Ok(())
}

async fn run_requests(config: &ServiceConfig, count: usize) -> anyhow::Result<()> {
    let gate = AdmissionGate::from_config(Arc::new(EchoBackend::new().batched()), &config.admission);
    gate.batcher().start();

    let tasks: Vec<_> = (0..count)
        .map(|i| {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.generate(format!("request {i} for the hierarchy"), GenerationParams::default())
                    .await
            })
        })
        .collect();

    let mut failed = 0usize;
    for task in tasks {
        match task.await? {
            Ok(_) => {}
            Err(e @ AdmissionError::CircuitOpen { .. }) => {
                tracing::warn!("{e}");
                failed += 1;
            }
            Err(e) => {
                tracing::error!("request failed: {e}");
                failed += 1;
            }
        }
    }
    gate.batcher().stop().await;

    println!();
    println!("Admission: {count} requests, {failed} failed");
    println!("  {}", gate.stats().summary());
    println!("  circuit '{}' is {:?}", gate.status().name, gate.status().state);
    Ok(())
}

fn parse_pressure(spec: &str) -> anyhow::Result<Vec<f64>> {
    let values = spec
        .split(',')
        .map(|s| {
            let v: f64 = s.trim().parse().with_context(|| format!("bad pressure value '{s}'"))?;
            anyhow::ensure!((0.0..=100.0).contains(&v), "pressure {v} outside 0-100");
            Ok(v)
        })
        .collect::<anyhow::Result<Vec<f64>>>()?;
    anyhow::ensure!(!values.is_empty(), "--pressure needs at least one value");
    Ok(values)
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `vram-orch bench`: latency of each off-device tier for a synthetic block.

use memory_manager::{Block, Tier};
use orchestrator::{ServiceConfig, TierBenchmarker};

pub async fn execute(config: &ServiceConfig, payload_kb: usize, rounds: usize) -> anyhow::Result<()> {
    anyhow::ensure!(rounds > 0, "--rounds must be at least 1");

    let transport = config.create_transport()?;
    let bench = TierBenchmarker::new(
        config.scratch_dir.join("bench"),
        config.remote_nodes.clone(),
        transport,
        config.remote_timeout(),
    );
    let size_mb = u32::try_from((payload_kb / 1024).max(1))?;
    let block = Block::synthetic(size_mb, payload_kb * 1024);

    println!("Benchmarking {} KiB block ({} rounds)", payload_kb, rounds);
    println!("  Scratch:      {}", bench.scratch_dir().display());
    match config.remote_nodes.first() {
        Some(node) => println!("  Remote probe: {node}"),
        None => println!("  Remote probe: none configured"),
    }
    println!();
    println!("  {:<8} {:>12} {:>12} {:>12}   fastest", "round", "host_ram", "local_disk", "remote");

    for round in 1..=rounds {
        let result = bench.bench_all(&block).await;
        println!(
            "  {:<8} {:>12} {:>12} {:>12}   {}",
            round,
            fmt_latency(result.get(Tier::HostRam)),
            fmt_latency(result.get(Tier::LocalDisk)),
            fmt_latency(result.get(Tier::Remote)),
            bench.fastest_tier(),
        );
    }

    let fastest = bench.fastest_tier();
    println!();
    if fastest.is_device() {
        println!("  No off-device tier reachable: blocks would stay on the device.");
    } else {
        println!("  Pressure relief would route to: {fastest}");
    }
    Ok(())
}

fn fmt_latency(secs: Option<f64>) -> String {
    match secs {
        Some(s) if s.is_finite() => format!("{:.3} ms", s * 1000.0),
        _ => "unreachable".to_string(),
    }
}

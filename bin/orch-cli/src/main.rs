// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # vram-orch
//!
//! Command-line interface for the memory-hierarchy block orchestrator.
//!
//! ## Usage
//! ```bash
//! # Device utilisation as seen by the DRM sysfs monitor
//! vram-orch status
//!
//! # Measure host RAM / local disk / remote latency for a 4 MB block
//! vram-orch --config orchestrator.toml bench --payload-kb 4096
//!
//! # Stream a synthetic 32-layer model through two simulated GPUs
//! vram-orch simulate --layers 32 --window 4 --steps 40 --pressure 60,95
//!
//! # Serve blocks to peers over TCP
//! vram-orch serve-node --node-id 1 --listen 0.0.0.0:18900
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vram-orch",
    about = "Block orchestration across GPU, host RAM, local disk and remote memory",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display per-device utilisation.
    Status {
        /// DRM class directory to read instead of /sys/class/drm.
        #[arg(long)]
        drm_root: Option<std::path::PathBuf>,

        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Benchmark the off-device tiers with a synthetic block.
    Bench {
        /// Payload size of the synthetic block in KiB.
        #[arg(long, default_value_t = 1024)]
        payload_kb: usize,

        /// Number of benchmark rounds.
        #[arg(long, default_value_t = 3)]
        rounds: usize,
    },

    /// Stream a synthetic layer stack through the hierarchy.
    Simulate {
        /// Number of layers in the synthetic model.
        #[arg(long, default_value_t = 24)]
        layers: usize,

        /// Size of each layer (e.g., "256M", "1G").
        #[arg(long, default_value = "256M")]
        layer_size: String,

        /// Active window width, in layers.
        #[arg(long, default_value_t = 4)]
        window: usize,

        /// Layers prefetched per step.
        #[arg(long, default_value_t = 2)]
        lookahead: usize,

        /// Number of auto-manage steps.
        #[arg(long, default_value_t = 30)]
        steps: usize,

        /// Comma-separated device utilisation (%) cycled across steps.
        #[arg(long, default_value = "40,70,95")]
        pressure: String,

        /// Also push this many demo prompts through the admission gate.
        #[arg(long, default_value_t = 0)]
        requests: usize,

        /// Print the final summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run a TCP block node.
    ServeNode {
        /// Node id used in packet headers.
        #[arg(long)]
        node_id: Option<u32>,

        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:18900")]
        listen: String,

        /// Refuse new blocks once this many are held.
        #[arg(long)]
        max_blocks: Option<usize>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Status { drm_root, json } => commands::status::execute(drm_root, json).await,
        Commands::Bench { payload_kb, rounds } => {
            commands::bench::execute(&config, payload_kb, rounds).await
        }
        Commands::Simulate {
            layers,
            layer_size,
            window,
            lookahead,
            steps,
            pressure,
            requests,
            json,
        } => {
            let opts = commands::simulate::SimulateOptions {
                layers,
                layer_size,
                window,
                lookahead,
                steps,
                pressure,
                requests,
                json,
            };
            commands::simulate::execute(&config, opts).await
        }
        Commands::ServeNode {
            node_id,
            listen,
            max_blocks,
        } => {
            commands::serve_node::execute(&config, node_id, listen, max_blocks).await
        }
        Commands::Config => commands::config::execute(&config),
    }
}

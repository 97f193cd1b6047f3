// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `vram-orch serve-node`: a TCP block node peers can spill to.
//!
//! Runs until Ctrl-C. Without `--max-blocks` the node keeps every block it
//! is sent.

use block_transport::BlockNodeServer;
use orchestrator::ServiceConfig;
use std::sync::Arc;

pub async fn execute(
    config: &ServiceConfig,
    node_id: Option<u32>,
    listen: String,
    max_blocks: Option<usize>,
) -> anyhow::Result<()> {
    let node_id = node_id.unwrap_or(config.node_id);
    let mut server = BlockNodeServer::new(node_id, config.codec());
    if let Some(max) = max_blocks {
        server = server.with_max_blocks(max);
    }
    let server = Arc::new(server);
    let (addr, handle) = Arc::clone(&server).spawn(listen.as_str()).await?;

    println!(
        "Block node {node_id} listening on {addr} ({} checksums)",
        if config.secure_packets { "SHA-256" } else { "byte-sum" }
    );
    tracing::info!("serving node {node_id} on {addr}");

    tokio::signal::ctrl_c().await?;
    handle.abort();
    println!("Stopped; {} blocks were held in memory.", server.len());
    Ok(())
}

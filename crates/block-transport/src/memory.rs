// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! In-process transport for simulations and tests.
//!
//! Blocks are kept in a per-node map. Nodes can be marked as failing to
//! exercise the fallback paths of callers without real sockets.

use crate::{BlockTransport, RemoteNode, TransportError};
use async_trait::async_trait;
use memory_manager::{Block, BlockId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Nodes {
    stored: HashMap<u32, HashMap<BlockId, Block>>,
    failing: HashSet<u32>,
    sends: u64,
}

/// A transport whose "remote nodes" live in this process.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    nodes: Mutex<Nodes>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every request to `node` fail with a connection error.
    pub fn fail_node(&self, node: u32) {
        self.nodes.lock().failing.insert(node);
    }

    pub fn heal_node(&self, node: u32) {
        self.nodes.lock().failing.remove(&node);
    }

    /// Ids of the blocks stored on `node`, sorted.
    pub fn stored_on(&self, node: u32) -> Vec<BlockId> {
        let nodes = self.nodes.lock();
        let mut ids: Vec<BlockId> = nodes
            .stored
            .get(&node)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of successful sends.
    pub fn sends(&self) -> u64 {
        self.nodes.lock().sends
    }

    fn check(nodes: &Nodes, node: &RemoteNode) -> Result<(), TransportError> {
        if nodes.failing.contains(&node.id) {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{node} is unreachable"),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockTransport for InMemoryTransport {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn send(&self, node: &RemoteNode, block: &Block) -> Result<(), TransportError> {
        let mut nodes = self.nodes.lock();
        Self::check(&nodes, node)?;
        nodes
            .stored
            .entry(node.id)
            .or_default()
            .insert(block.id(), block.clone());
        nodes.sends += 1;
        Ok(())
    }

    async fn fetch(&self, node: &RemoteNode, id: BlockId) -> Result<Option<Block>, TransportError> {
        let nodes = self.nodes.lock();
        Self::check(&nodes, node)?;
        Ok(nodes.stored.get(&node.id).and_then(|m| m.get(&id)).cloned())
    }

    async fn probe(&self, node: &RemoteNode, payload: &[u8]) -> Result<Duration, TransportError> {
        let start = Instant::now();
        Self::check(&self.nodes.lock(), node)?;
        let echo = payload.to_vec();
        std::hint::black_box(&echo);
        Ok(start.elapsed())
    }
}

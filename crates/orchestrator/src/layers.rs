// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model layers as blocks.
//!
//! A [`LayerSource`] turns a layer description into a [`Block`]; the
//! [`LayerStreamer`] remembers which layers are currently loaded so the
//! orchestrator can prefetch ahead of the active window and unload what
//! falls behind it.

use crate::OrchestratorError;
use memory_manager::{Block, BlockId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

/// One model layer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Layer {
    pub name: String,
    pub size_mb: u32,
}

impl Layer {
    pub fn new(name: impl Into<String>, size_mb: u32) -> Self {
        Self {
            name: name.into(),
            size_mb,
        }
    }
}

/// Materialises layer weights into blocks.
pub trait LayerSource: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self, layer: &Layer) -> Result<Block, OrchestratorError>;
}

/// Produces placeholder blocks of the right size for simulation and tests.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    payload_len: usize,
}

impl SyntheticSource {
    /// `payload_len` bytes are actually allocated per block, independent of
    /// the nominal `size_mb`.
    pub fn new(payload_len: usize) -> Self {
        Self { payload_len }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl LayerSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn load(&self, layer: &Layer) -> Result<Block, OrchestratorError> {
        if layer.size_mb == 0 {
            return Err(OrchestratorError::LayerLoadError {
                layer: layer.name.clone(),
                detail: "layer has zero size".to_string(),
            });
        }
        Ok(Block::synthetic(layer.size_mb, self.payload_len))
    }
}

/// Builds a stack of `count` equally sized layers named `layer.0`, `layer.1`, ...
pub fn synthetic_stack(count: usize, size_mb: u32) -> Vec<Layer> {
    (0..count)
        .map(|i| Layer::new(format!("layer.{i}"), size_mb))
        .collect()
}

/// Which layers are loaded, and as which blocks.
#[derive(Debug, Default)]
pub struct LayerStreamer {
    loaded: Mutex<BTreeMap<String, BlockId>>,
}

impl LayerStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `lookahead` layers of the window that are not loaded yet.
    pub fn to_prefetch<'a>(&self, window: &'a [Layer], lookahead: usize) -> Vec<&'a Layer> {
        let loaded = self.loaded.lock();
        window
            .iter()
            .take(lookahead)
            .filter(|l| !loaded.contains_key(&l.name))
            .collect()
    }

    pub fn mark_loaded(&self, layer: &Layer, block: BlockId) {
        self.loaded.lock().insert(layer.name.clone(), block);
    }

    pub fn block_of(&self, name: &str) -> Option<BlockId> {
        self.loaded.lock().get(name).copied()
    }

    pub fn loaded_blocks(&self) -> Vec<BlockId> {
        self.loaded.lock().values().copied().collect()
    }

    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded.lock().keys().cloned().collect()
    }

    /// Forgets every loaded layer not in `window`, returning what was dropped.
    pub fn retain_window(&self, window: &[Layer]) -> Vec<(String, BlockId)> {
        let active: HashSet<&str> = window.iter().map(|l| l.name.as_str()).collect();
        let mut loaded = self.loaded.lock();
        let stale: Vec<String> = loaded
            .keys()
            .filter(|name| !active.contains(name.as_str()))
            .cloned()
            .collect();
        stale
            .into_iter()
            .filter_map(|name| loaded.remove(&name).map(|id| (name, id)))
            .collect()
    }
}

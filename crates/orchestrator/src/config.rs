// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Service configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! node_id = 0
//! scratch_dir = "/tmp/vram-orchestrator"
//! rebalance_threshold_pct = 90.0
//! host_ram_limit = 10
//! remote_timeout_ms = 500
//! transport = "tcp"            # or "shared-path"
//! secure_packets = true
//! cycle_interval_ms = 1000
//! default_cache_size = 8
//!
//! [hotness]
//! decay = 0.9
//! promote_threshold = 3.0
//!
//! [[devices]]
//! id = 0
//! capacity = "24G"
//!
//! [[remote_nodes]]
//! id = 1
//! address = "10.0.0.2:18900"
//!
//! [admission.batch]
//! max_batch = 8
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::OrchestratorError;
use admission::AdmissionConfig;
use block_transport::{BlockTransport, PacketCodec, RemoteNode, SharedPathTransport, TcpTransport};
use memory_manager::{Capacity, DeviceSpec, HierarchicalMemoryManager, HotnessPolicy, Tier, TierLimit};
use resource_monitor::DeviceId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How blocks reach remote nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Length-prefixed packets over TCP.
    #[default]
    Tcp,
    /// Packet files under a directory every node mounts.
    SharedPath,
}

/// One managed accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceConfig {
    pub id: DeviceId,
    /// Usable memory, human-readable (`"24G"`).
    pub capacity: Capacity,
    /// Maximum resident blocks; `default_cache_size` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<usize>,
}

/// Configuration for one orchestrator node.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServiceConfig {
    /// This node's id on the block network.
    #[serde(default)]
    pub node_id: u32,
    /// Root for the local-disk tier and benchmark scratch files.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Device utilisation (%) above which rebalancing starts.
    #[serde(default = "default_threshold")]
    pub rebalance_threshold_pct: f64,
    /// Maximum blocks held in the host RAM tier.
    #[serde(default = "default_host_ram_limit")]
    pub host_ram_limit: usize,
    /// Timeout for every remote request, including benchmark probes.
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
    #[serde(default)]
    pub transport: TransportKind,
    /// Shared directory for the shared-path transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_root: Option<PathBuf>,
    /// Use SHA-256 packet checksums instead of the byte sum.
    #[serde(default = "default_true")]
    pub secure_packets: bool,
    /// Period of the background control loop.
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    /// Resident-block limit for devices that do not set one.
    #[serde(default = "default_cache_size")]
    pub default_cache_size: usize,
    #[serde(default)]
    pub hotness: HotnessPolicy,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub remote_nodes: Vec<RemoteNode>,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("/tmp/vram-orchestrator")
}
fn default_threshold() -> f64 {
    90.0
}
fn default_host_ram_limit() -> usize {
    10
}
fn default_remote_timeout_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}
fn default_cycle_interval_ms() -> u64 {
    1000
}
fn default_cache_size() -> usize {
    8
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            scratch_dir: default_scratch_dir(),
            rebalance_threshold_pct: default_threshold(),
            host_ram_limit: default_host_ram_limit(),
            remote_timeout_ms: default_remote_timeout_ms(),
            transport: TransportKind::default(),
            shared_root: None,
            secure_packets: true,
            cycle_interval_ms: default_cycle_interval_ms(),
            default_cache_size: default_cache_size(),
            hotness: HotnessPolicy::default(),
            devices: Vec::new(),
            remote_nodes: Vec::new(),
            admission: AdmissionConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, OrchestratorError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| OrchestratorError::ConfigError(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, OrchestratorError> {
        toml::to_string_pretty(self)
            .map_err(|e| OrchestratorError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Checks cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let fail = |msg: String| Err(OrchestratorError::ConfigError(msg));

        if !(0.0..=100.0).contains(&self.rebalance_threshold_pct) {
            return fail(format!(
                "rebalance_threshold_pct must be within 0-100, got {}",
                self.rebalance_threshold_pct
            ));
        }
        if !(self.hotness.decay > 0.0 && self.hotness.decay <= 1.0) {
            return fail(format!("hotness.decay must be in (0, 1], got {}", self.hotness.decay));
        }
        if self.transport == TransportKind::SharedPath && self.shared_root.is_none() {
            return fail("transport 'shared-path' requires shared_root".to_string());
        }

        let mut seen = std::collections::BTreeSet::new();
        for device in &self.devices {
            if !seen.insert(device.id) {
                return fail(format!("device {} is listed twice", device.id));
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        for node in &self.remote_nodes {
            if !seen.insert(node.id) {
                return fail(format!("remote node {} is listed twice", node.id));
            }
            if self.transport == TransportKind::Tcp && node.address.is_empty() {
                return fail(format!("remote node {} has no address", node.id));
            }
        }

        self.admission
            .validate()
            .map_err(|e| OrchestratorError::ConfigError(format!("admission: {e}")))
    }

    /// Device specs with the default cache size filled in.
    pub fn device_specs(&self) -> Vec<DeviceSpec> {
        self.devices
            .iter()
            .map(|d| {
                DeviceSpec::new(
                    d.id,
                    d.capacity,
                    d.cache_size.unwrap_or(self.default_cache_size),
                )
            })
            .collect()
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms.max(1))
    }

    pub fn codec(&self) -> PacketCodec {
        PacketCodec::new(self.secure_packets)
    }

    /// Creates the tier registry: host RAM bounded by `host_ram_limit`.
    pub fn create_registry(&self) -> HierarchicalMemoryManager {
        HierarchicalMemoryManager::new(self.hotness)
            .with_limit(Tier::HostRam, TierLimit::blocks(self.host_ram_limit))
    }

    /// Creates the transport specified by this config.
    pub fn create_transport(&self) -> Result<Arc<dyn BlockTransport>, OrchestratorError> {
        match self.transport {
            TransportKind::Tcp => Ok(Arc::new(TcpTransport::new(
                self.node_id,
                self.codec(),
                self.remote_timeout(),
            ))),
            TransportKind::SharedPath => {
                let root = self.shared_root.clone().ok_or_else(|| {
                    OrchestratorError::ConfigError(
                        "transport 'shared-path' requires shared_root".to_string(),
                    )
                })?;
                Ok(Arc::new(SharedPathTransport::new(self.node_id, root, self.codec())))
            }
        }
    }
}

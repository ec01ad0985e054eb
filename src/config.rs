//! Cluster configuration file shared by the coordinator and all workers.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::model::PartitionId;
use crate::topology::{NodeId, NodeInfo, Topology};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cluster must have at least one partition")]
    NoPartitions,

    #[error("partition {0} has no replicas")]
    EmptyPartition(PartitionId),

    #[error("partition {0} is outside 0..{1}")]
    UnknownPartition(PartitionId, u32),

    #[error("node {0} is listed in partitions {1} and {2}")]
    DuplicateNode(NodeId, PartitionId, PartitionId),

    #[error("node {0} is not part of the cluster")]
    UnknownNode(NodeId),
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    partitions: u32,
    partitions_map: BTreeMap<PartitionId, Vec<NodeInfo>>,
    #[serde(default)]
    ledger: Option<PathBuf>,
    #[serde(default)]
    coordinator: Option<Endpoint>,
    #[serde(default)]
    timeouts: Timeouts,
    #[serde(default)]
    commit_retry: CommitRetry,
}

/// Listen address of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 6000,
        }
    }
}

impl Endpoint {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Network timeouts, in milliseconds in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub connect_ms: u64,
    pub request_ms: u64,
    pub prepare_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: 1_000,
            request_ms: 5_000,
            prepare_ms: 5_000,
        }
    }
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn prepare(&self) -> Duration {
        Duration::from_millis(self.prepare_ms)
    }
}

/// Redelivery policy for COMMIT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommitRetry {
    pub attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for CommitRetry {
    fn default() -> Self {
        Self {
            attempts: 10,
            initial_backoff_ms: 150,
            max_backoff_ms: 1_200,
        }
    }
}

impl CommitRetry {
    /// Backoff before retry number `attempt` (0-based), doubling up to the cap.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16) as u32).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Parsed and validated cluster configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub topology: Topology,
    pub ledger: Option<PathBuf>,
    pub coordinator: Endpoint,
    pub timeouts: Timeouts,
    pub commit_retry: CommitRetry,
}

/// Everything one worker needs to start.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub node: NodeInfo,
    pub partition: PartitionId,
    pub partition_count: u32,
    pub snapshot: PathBuf,
    pub ledger: Option<PathBuf>,
}

impl ClusterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, Path::new("<inline>"))
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let topology = Topology::new(raw.partitions, raw.partitions_map)?;
        Ok(Self {
            topology,
            ledger: raw.ledger,
            coordinator: raw.coordinator.unwrap_or_default(),
            timeouts: raw.timeouts,
            commit_retry: raw.commit_retry,
        })
    }

    pub fn worker(&self, id: NodeId) -> Result<WorkerConfig, ConfigError> {
        let (partition, node) = self.topology.node(id).ok_or(ConfigError::UnknownNode(id))?;
        let snapshot = node
            .data
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("data/partition{partition}_node{id}.csv")));
        Ok(WorkerConfig {
            node: node.clone(),
            partition,
            partition_count: self.topology.partition_count(),
            snapshot,
            ledger: self.ledger.clone(),
        })
    }
}

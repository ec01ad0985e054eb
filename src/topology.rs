//! Static partition/replica layout of the cluster.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::model::{AccountId, PartitionId};

/// Worker node identifier, unique across the cluster.
pub type NodeId = u32;

/// One worker replica as listed in the cluster file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Snapshot file of this replica.
    #[serde(default)]
    pub data: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl NodeInfo {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Partition layout: `account mod partitions` picks the partition, and each
/// partition lists its replicas, the first one being authoritative.
#[derive(Debug, Clone)]
pub struct Topology {
    partitions: u32,
    replicas: Vec<Vec<NodeInfo>>,
}

impl Topology {
    pub fn new(
        partitions: u32,
        mut map: BTreeMap<PartitionId, Vec<NodeInfo>>,
    ) -> Result<Self, ConfigError> {
        if partitions == 0 {
            return Err(ConfigError::NoPartitions);
        }
        if let Some(&extra) = map.keys().find(|&&p| p >= partitions) {
            return Err(ConfigError::UnknownPartition(extra, partitions));
        }

        let mut seen = BTreeMap::new();
        let mut replicas = Vec::with_capacity(partitions as usize);
        for partition in 0..partitions {
            let nodes = map.remove(&partition).unwrap_or_default();
            if nodes.is_empty() {
                return Err(ConfigError::EmptyPartition(partition));
            }
            for node in &nodes {
                if let Some(other) = seen.insert(node.id, partition) {
                    return Err(ConfigError::DuplicateNode(node.id, other, partition));
                }
            }
            replicas.push(nodes);
        }

        Ok(Self {
            partitions,
            replicas,
        })
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions
    }

    pub fn partition_of(&self, account: AccountId) -> PartitionId {
        partition_of(account, self.partitions)
    }

    /// Replicas of a partition, authoritative first.
    pub fn replicas(&self, partition: PartitionId) -> &[NodeInfo] {
        self.replicas
            .get(partition as usize)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Union of the replica sets of the given partitions, without duplicates.
    pub fn participants(&self, partitions: &[PartitionId]) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = Vec::new();
        for &partition in partitions {
            for node in self.replicas(partition) {
                if !nodes.iter().any(|n| n.id == node.id) {
                    nodes.push(node.clone());
                }
            }
        }
        nodes
    }

    /// Looks a node up by id, returning the partition it serves.
    pub fn node(&self, id: NodeId) -> Option<(PartitionId, &NodeInfo)> {
        self.replicas.iter().enumerate().find_map(|(p, nodes)| {
            nodes
                .iter()
                .find(|n| n.id == id)
                .map(|n| (p as PartitionId, n))
        })
    }
}

/// Owning partition of an account. Negative ids wrap like positive ones.
pub fn partition_of(account: AccountId, partitions: u32) -> PartitionId {
    account.rem_euclid(i64::from(partitions)) as PartitionId
}

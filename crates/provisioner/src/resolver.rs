//! Cluster and pool resolution.
//!
//! Handles carry a cluster ID and a numeric pool ID. Before anything can be
//! done with them those must be turned into monitor endpoints and a pool
//! name, possibly across a disaster-recovery mapping to a peer cluster.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use common::Credentials;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while resolving cluster locations.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No configuration exists for the cluster, directly or through a mapping.
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    /// The pool is not known in the cluster.
    #[error("unknown pool {pool} in cluster {cluster_id}")]
    UnknownPool { cluster_id: String, pool: String },

    /// The cluster configuration could not be parsed.
    #[error("invalid cluster configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    /// The cluster configuration could not be read.
    #[error("failed to read cluster configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection details of a resolved cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Local cluster ID, after any disaster-recovery mapping.
    pub cluster_id: String,
    /// Monitor endpoints to connect to.
    pub monitors: Vec<String>,
    /// Name from the cluster map, used when the request carries none.
    pub cluster_name: Option<String>,
}

/// Resolves cluster and pool identifiers into connection details.
#[async_trait]
pub trait ClusterResolver: Send + Sync {
    /// Maps a cluster ID from a handle to local connection details.
    async fn resolve_cluster(&self, cluster_id: &str) -> Result<ClusterInfo, ResolveError>;

    /// Maps a pool ID from a handle to the local pool name.
    async fn resolve_pool_name(
        &self,
        cluster_id: &str,
        location_id: i64,
    ) -> Result<String, ResolveError>;

    /// Returns the IDs of the journal pool and the data pool, in that order.
    async fn resolve_pool_ids(
        &self,
        monitors: &[String],
        journal_pool: &str,
        pool: &str,
        credentials: &Credentials,
    ) -> Result<(i64, i64), ResolveError>;
}

/// A pool known in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub id: i64,
    pub name: String,
}

/// One locally reachable cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEntry {
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    #[serde(default)]
    pub cluster_name: Option<String>,
    pub monitors: Vec<String>,
    #[serde(default)]
    pub pools: Vec<PoolEntry>,
}

/// Pairing of a cluster with its disaster-recovery peer.
///
/// Both maps hold `{peer: local}` pairs and are read in either direction.
/// Pool IDs are strings, as they are in the source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMapping {
    #[serde(rename = "clusterIDMapping")]
    pub cluster_id_mapping: HashMap<String, String>,
    #[serde(rename = "rbdPoolIDMapping", default)]
    pub rbd_pool_id_mapping: Vec<HashMap<String, String>>,
}

/// Cluster configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
    #[serde(default)]
    pub mappings: Vec<ClusterMapping>,
}

/// Returns the other side of a `{key: value}` pair if `id` is on either side.
fn mapped_id<'a>(key: &'a str, value: &'a str, id: &str) -> Option<&'a str> {
    if key == id {
        Some(value)
    } else if value == id {
        Some(key)
    } else {
        None
    }
}

/// Resolver backed by a static cluster configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticClusterResolver {
    config: ClusterConfig,
}

impl StaticClusterResolver {
    /// Creates a resolver from a parsed configuration.
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ResolveError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ResolveError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn cluster(&self, cluster_id: &str) -> Option<&ClusterEntry> {
        self.config
            .clusters
            .iter()
            .find(|c| c.cluster_id == cluster_id)
    }

    /// Finds the local cluster for `cluster_id`, along with the mapping used.
    fn local_cluster(
        &self,
        cluster_id: &str,
    ) -> Result<(&ClusterEntry, Option<&ClusterMapping>), ResolveError> {
        if let Some(cluster) = self.cluster(cluster_id) {
            return Ok((cluster, None));
        }
        self.config
            .mappings
            .iter()
            .find_map(|mapping| {
                mapping.cluster_id_mapping.iter().find_map(|(k, v)| {
                    mapped_id(k, v, cluster_id)
                        .and_then(|mapped| self.cluster(mapped))
                        .map(|cluster| (cluster, Some(mapping)))
                })
            })
            .ok_or_else(|| ResolveError::UnknownCluster(cluster_id.to_string()))
    }
}

#[async_trait]
impl ClusterResolver for StaticClusterResolver {
    async fn resolve_cluster(&self, cluster_id: &str) -> Result<ClusterInfo, ResolveError> {
        let (cluster, mapping) = self.local_cluster(cluster_id)?;
        if mapping.is_some() {
            tracing::debug!(from = cluster_id, to = %cluster.cluster_id, "cluster ID mapped");
        }
        Ok(ClusterInfo {
            cluster_id: cluster.cluster_id.clone(),
            monitors: cluster.monitors.clone(),
            cluster_name: cluster.cluster_name.clone(),
        })
    }

    async fn resolve_pool_name(
        &self,
        cluster_id: &str,
        location_id: i64,
    ) -> Result<String, ResolveError> {
        let (cluster, mapping) = self.local_cluster(cluster_id)?;

        let requested = location_id.to_string();
        let pool_id = mapping
            .into_iter()
            .flat_map(|m| m.rbd_pool_id_mapping.iter())
            .flat_map(|pairs| pairs.iter())
            .find_map(|(k, v)| mapped_id(k, v, &requested))
            .and_then(|mapped| mapped.parse::<i64>().ok())
            .unwrap_or(location_id);

        cluster
            .pools
            .iter()
            .find(|p| p.id == pool_id)
            .map(|p| p.name.clone())
            .ok_or_else(|| ResolveError::UnknownPool {
                cluster_id: cluster.cluster_id.clone(),
                pool: pool_id.to_string(),
            })
    }

    async fn resolve_pool_ids(
        &self,
        monitors: &[String],
        journal_pool: &str,
        pool: &str,
        _credentials: &Credentials,
    ) -> Result<(i64, i64), ResolveError> {
        let cluster = self
            .config
            .clusters
            .iter()
            .find(|c| c.monitors == monitors)
            .ok_or_else(|| ResolveError::UnknownCluster(monitors.join(",")))?;

        let pool_id = |name: &str| {
            cluster
                .pools
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.id)
                .ok_or_else(|| ResolveError::UnknownPool {
                    cluster_id: cluster.cluster_id.clone(),
                    pool: name.to_string(),
                })
        };

        Ok((pool_id(journal_pool)?, pool_id(pool)?))
    }
}

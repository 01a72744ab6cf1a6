//! Controller configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use journal::PostgresJournal;
use provisioner::{
    ClusterConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_SNAPSHOT_NAME_PREFIX, RecoverySettings,
    ResolveError, StaticClusterResolver,
};
use sqlx::PgPool;

/// Driver name handled by default.
pub const DEFAULT_DRIVER_NAME: &str = "rbd.csi.ceph.com";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Controller configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `CSI_DRIVER_NAME`: driver whose objects are reconciled (default: `"rbd.csi.ceph.com"`)
/// - `CSI_CLUSTER_NAME`: cluster name passed to recovery (default: none)
/// - `CSI_INSTANCE_ID`: namespace of this deployment's journal entries (default: `"default"`)
/// - `CSI_SNAPSHOT_NAME_PREFIX`: prefix of regenerated image names (default: `"csi-snap-"`)
/// - `CSI_CALL_TIMEOUT_SECS`: bounded wait for each external call (default: `30`)
/// - `CSI_CLUSTER_CONFIG`: path of the JSON cluster map (default: none)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
///
/// Empty values count as unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub driver_name: String,
    pub cluster_name: Option<String>,
    pub instance_id: String,
    pub snapshot_name_prefix: String,
    pub call_timeout: Duration,
    pub cluster_config_path: Option<PathBuf>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            driver_name: var("CSI_DRIVER_NAME").unwrap_or(defaults.driver_name),
            cluster_name: var("CSI_CLUSTER_NAME"),
            instance_id: var("CSI_INSTANCE_ID").unwrap_or(defaults.instance_id),
            snapshot_name_prefix: var("CSI_SNAPSHOT_NAME_PREFIX")
                .unwrap_or(defaults.snapshot_name_prefix),
            call_timeout: var("CSI_CALL_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            cluster_config_path: var("CSI_CLUSTER_CONFIG").map(PathBuf::from),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
        }
    }

    /// Returns the recovery settings derived from this configuration.
    pub fn recovery_settings(&self) -> RecoverySettings {
        RecoverySettings {
            name_prefix: self.snapshot_name_prefix.clone(),
            journal_pool: None,
            call_timeout: self.call_timeout,
        }
    }

    /// Builds the PostgreSQL journal for this deployment's instance.
    pub fn postgres_journal(&self, pool: PgPool) -> PostgresJournal {
        PostgresJournal::new(pool, self.instance_id.clone())
    }

    /// Builds the cluster resolver from the configured cluster map.
    ///
    /// Without a configured path the resolver knows no clusters.
    pub fn cluster_resolver(&self) -> Result<StaticClusterResolver, ResolveError> {
        match &self.cluster_config_path {
            Some(path) => StaticClusterResolver::from_file(path),
            None => Ok(StaticClusterResolver::new(ClusterConfig::default())),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            cluster_name: None,
            instance_id: "default".to_string(),
            snapshot_name_prefix: DEFAULT_SNAPSHOT_NAME_PREFIX.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            cluster_config_path: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.driver_name, "rbd.csi.ceph.com");
        assert_eq!(config.cluster_name, None);
        assert_eq!(config.instance_id, "default");
        assert_eq!(config.snapshot_name_prefix, "csi-snap-");
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        assert_eq!(from_pairs(&[]), Config::default());
    }

    #[test]
    fn test_values_are_read() {
        let config = from_pairs(&[
            ("CSI_DRIVER_NAME", "rbd.example.com"),
            ("CSI_CLUSTER_NAME", "east"),
            ("CSI_INSTANCE_ID", "dr-site"),
            ("CSI_SNAPSHOT_NAME_PREFIX", "snap-"),
            ("CSI_CALL_TIMEOUT_SECS", "5"),
            ("CSI_CLUSTER_CONFIG", "/etc/ceph-csi-config/config.json"),
            ("RUST_LOG", "debug"),
            ("LOG_FORMAT", "JSON"),
        ]);
        assert_eq!(config.driver_name, "rbd.example.com");
        assert_eq!(config.cluster_name.as_deref(), Some("east"));
        assert_eq!(config.instance_id, "dr-site");
        assert_eq!(config.snapshot_name_prefix, "snap-");
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(
            config.cluster_config_path,
            Some(PathBuf::from("/etc/ceph-csi-config/config.json"))
        );
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = from_pairs(&[("CSI_CLUSTER_NAME", ""), ("CSI_DRIVER_NAME", "")]);
        assert_eq!(config.cluster_name, None);
        assert_eq!(config.driver_name, DEFAULT_DRIVER_NAME);
    }

    #[test]
    fn test_invalid_timeout_falls_back() {
        let config = from_pairs(&[("CSI_CALL_TIMEOUT_SECS", "soon")]);
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
    }

    #[test]
    fn test_recovery_settings() {
        let config = from_pairs(&[("CSI_SNAPSHOT_NAME_PREFIX", "snap-")]);
        let settings = config.recovery_settings();
        assert_eq!(settings.name_prefix, "snap-");
        assert_eq!(settings.journal_pool, None);
        assert_eq!(settings.call_timeout, config.call_timeout);
    }

    #[tokio::test]
    async fn test_postgres_journal_uses_instance_id() {
        let config = from_pairs(&[("CSI_INSTANCE_ID", "dr-site")]);
        let pool = PgPool::connect_lazy("postgres://postgres@localhost/postgres").unwrap();
        assert_eq!(config.postgres_journal(pool).instance_id(), "dr-site");
    }

    #[test]
    fn test_cluster_resolver_without_path() {
        assert!(Config::default().cluster_resolver().is_ok());

        let config = from_pairs(&[("CSI_CLUSTER_CONFIG", "/nonexistent/config.json")]);
        assert!(matches!(config.cluster_resolver(), Err(ResolveError::Io(_))));
    }
}

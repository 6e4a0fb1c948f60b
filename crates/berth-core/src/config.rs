//! Controller configuration.
//!
//! Loaded from TOML. Every field has a default matching the stock chat
//! deployment (a MongoDB `Deployment` named `mongo` bound to `mongo-pvc`), so
//! an empty file is a valid config.
//!
//! Secrets are not configuration: `[database]` only names the environment
//! variables that hold credentials *inside the database container*, and
//! `[managed].secret_name` names the cluster secret that populates them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::retry::RetryPolicy;
use crate::domain::{AccessMode, StorageTemplate, WorkloadSpec};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BerthConfig {
    pub cluster: ClusterConfig,
    pub legacy: LegacyConfig,
    pub managed: ManagedConfig,
    pub database: DatabaseConfig,
    pub timeouts: TimeoutConfig,
    pub probe: ProbeConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub kubectl: String,
    pub context: Option<String>,
    pub namespace: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            context: None,
            namespace: "default".to_string(),
        }
    }
}

/// Names of the legacy objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LegacyConfig {
    pub deployment: String,
    pub claim: String,
    /// Manually created volume behind the claim, if any.
    pub volume: Option<String>,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            deployment: "mongo".to_string(),
            claim: "mongo-pvc".to_string(),
            volume: Some("mongo-pv".to_string()),
        }
    }
}

/// Desired managed topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagedConfig {
    pub statefulset: String,
    pub service: String,
    pub image: String,
    pub replicas: u32,
    pub container_port: u16,
    pub storage_template: String,
    pub storage_size: String,
    pub storage_class: Option<String>,
    pub access_mode: AccessMode,
    pub mount_path: String,
    pub secret_name: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl Default for ManagedConfig {
    fn default() -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "mongo".to_string());
        labels.insert("topology".to_string(), "managed".to_string());
        Self {
            statefulset: "mongo".to_string(),
            service: "mongo-headless".to_string(),
            image: "mongo:7.0".to_string(),
            replicas: 1,
            container_port: 27017,
            storage_template: "data".to_string(),
            storage_size: "5Gi".to_string(),
            storage_class: None,
            access_mode: AccessMode::ReadWriteOnce,
            mount_path: "/data/db".to_string(),
            secret_name: Some("mongo-credentials".to_string()),
            labels,
        }
    }
}

/// Admin channel settings.
///
/// Command templates run under `sh -c` inside the database container. The
/// `{auth}` placeholder expands to the credential flags, which reference the
/// container's own environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub container: Option<String>,
    pub username_env: String,
    pub password_env: String,
    pub auth_database: String,
    pub ping_command: String,
    /// Must print the number of user databases.
    pub empty_check_command: String,
    /// Must write the dump to stdout.
    pub dump_command: String,
    /// Must read the dump from stdin.
    pub restore_command: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            container: Some("mongo".to_string()),
            username_env: "MONGO_INITDB_ROOT_USERNAME".to_string(),
            password_env: "MONGO_INITDB_ROOT_PASSWORD".to_string(),
            auth_database: "admin".to_string(),
            ping_command: "mongosh --quiet {auth} --eval 'db.adminCommand({ ping: 1 }).ok'"
                .to_string(),
            empty_check_command: "mongosh --quiet {auth} --eval \
                 'db.adminCommand({ listDatabases: 1 }).databases\
                 .filter(d => ![\"admin\", \"config\", \"local\"].includes(d.name)).length'"
                .to_string(),
            dump_command: "mongodump --quiet {auth} --archive".to_string(),
            restore_command: "mongorestore --quiet {auth} --archive --drop".to_string(),
        }
    }
}

impl DatabaseConfig {
    fn auth_flags(&self) -> String {
        format!(
            "--username \"${}\" --password \"${}\" --authenticationDatabase {}",
            self.username_env, self.password_env, self.auth_database
        )
    }

    /// Expand `{auth}` in a command template.
    pub fn render(&self, template: &str) -> String {
        template.replace("{auth}", &self.auth_flags())
    }
}

/// Bounded waits, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    pub termination_ms: u64,
    pub readiness_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            termination_ms: 120_000,
            readiness_ms: 300_000,
            poll_interval_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    pub fn termination(&self) -> Duration {
        Duration::from_millis(self.termination_ms)
    }

    pub fn readiness(&self) -> Duration {
        Duration::from_millis(self.readiness_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Liveness probe of the new instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 15_000,
        }
    }
}

impl ProbeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_attempts: self.max_attempts,
            max_delay: Some(Duration::from_millis(self.max_delay_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    pub artifact_dir: PathBuf,
    /// Attempts per admin command while the instance is unreachable.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    /// Keep the artifact after a successful migration.
    pub retain_artifact: bool,
    /// Proceed without a backup when the legacy instance cannot be reached.
    pub allow_unreachable_source: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("berth-backups"),
            max_attempts: 3,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            retain_artifact: true,
            allow_unreachable_source: true,
        }
    }
}

impl BackupConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_attempts: self.max_attempts,
            max_delay: None,
        }
    }
}

impl BerthConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: BerthConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Fail fast on values that would only blow up halfway through a migration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let names = [
            ("cluster.kubectl", &self.cluster.kubectl),
            ("cluster.namespace", &self.cluster.namespace),
            ("legacy.deployment", &self.legacy.deployment),
            ("legacy.claim", &self.legacy.claim),
            ("managed.statefulset", &self.managed.statefulset),
            ("managed.service", &self.managed.service),
            ("managed.image", &self.managed.image),
            ("managed.storage_template", &self.managed.storage_template),
            ("managed.storage_size", &self.managed.storage_size),
            ("database.username_env", &self.database.username_env),
            ("database.password_env", &self.database.password_env),
        ];
        if let Some((field, _)) = names.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("{field} must not be empty")));
        }
        if self.managed.replicas == 0 {
            return Err(ConfigError::Invalid("managed.replicas must be at least 1".into()));
        }
        if self.timeouts.termination_ms == 0
            || self.timeouts.readiness_ms == 0
            || self.timeouts.poll_interval_ms == 0
        {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.probe.max_attempts == 0 || self.backup.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.probe.multiplier < 1.0 || self.backup.multiplier < 1.0 {
            return Err(ConfigError::Invalid("backoff multipliers must be >= 1.0".into()));
        }
        if let Some(volume) = &self.legacy.volume {
            let managed_prefix = format!(
                "{}-{}-",
                self.managed.storage_template, self.managed.statefulset
            );
            if volume.starts_with(&managed_prefix) {
                return Err(ConfigError::Invalid(format!(
                    "legacy.volume {volume} collides with managed claim names"
                )));
            }
        }
        Ok(())
    }

    /// Desired state of the managed workload.
    pub fn managed_spec(&self) -> WorkloadSpec {
        let managed = &self.managed;
        WorkloadSpec {
            name: managed.statefulset.clone(),
            service_name: managed.service.clone(),
            image: managed.image.clone(),
            replicas: managed.replicas,
            container_name: self
                .database
                .container
                .clone()
                .unwrap_or_else(|| managed.statefulset.clone()),
            container_port: managed.container_port,
            labels: managed.labels.clone(),
            storage: StorageTemplate {
                name: managed.storage_template.clone(),
                capacity: managed.storage_size.clone(),
                access_mode: managed.access_mode,
                storage_class: managed.storage_class.clone(),
                mount_path: managed.mount_path.clone(),
            },
            secret_name: managed.secret_name.clone(),
        }
    }

    /// In-cluster DNS endpoints of the managed replicas.
    pub fn managed_endpoints(&self) -> Vec<String> {
        let spec = self.managed_spec();
        (0..spec.replicas)
            .map(|ordinal| {
                format!(
                    "{}.{}.{}.svc.cluster.local:{}",
                    spec.instance_name(ordinal),
                    spec.service_name,
                    self.cluster.namespace,
                    spec.container_port
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_valid() {
        let config = BerthConfig::from_toml_str("").unwrap();
        assert_eq!(config, BerthConfig::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = BerthConfig::from_toml_str(
            r#"
            [cluster]
            namespace = "chat"

            [managed]
            replicas = 3
            storage_size = "20Gi"
            access_mode = "ReadWriteOncePod"

            [timeouts]
            readiness_ms = 60000
            "#,
        )
        .unwrap();
        assert_eq!(config.cluster.namespace, "chat");
        assert_eq!(config.managed.replicas, 3);
        assert_eq!(config.managed.access_mode, AccessMode::ReadWriteOncePod);
        assert_eq!(config.timeouts.readiness(), Duration::from_secs(60));
        // untouched sections keep defaults
        assert_eq!(config.legacy.claim, "mongo-pvc");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = BerthConfig::from_toml_str("[legacy]\npassword = \"hunter2\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_replicas_is_invalid() {
        let err = BerthConfig::from_toml_str("[managed]\nreplicas = 0\n").unwrap_err();
        assert!(err.to_string().contains("managed.replicas"));
    }

    #[test]
    fn empty_name_is_invalid() {
        let err = BerthConfig::from_toml_str("[legacy]\nclaim = \"\"\n").unwrap_err();
        assert!(err.to_string().contains("legacy.claim"));
    }

    #[test]
    fn auth_placeholder_references_container_env() {
        let db = DatabaseConfig::default();
        let rendered = db.render(&db.dump_command);
        assert!(rendered.contains("\"$MONGO_INITDB_ROOT_USERNAME\""));
        assert!(rendered.contains("\"$MONGO_INITDB_ROOT_PASSWORD\""));
        assert!(!rendered.contains("{auth}"));
    }

    #[test]
    fn endpoints_cover_every_replica() {
        let mut config = BerthConfig::default();
        config.cluster.namespace = "chat".to_string();
        config.managed.replicas = 2;
        assert_eq!(
            config.managed_endpoints(),
            vec![
                "mongo-0.mongo-headless.chat.svc.cluster.local:27017".to_string(),
                "mongo-1.mongo-headless.chat.svc.cluster.local:27017".to_string(),
            ]
        );
    }
}

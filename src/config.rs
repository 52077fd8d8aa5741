//! Bootstrap configuration
//!
//! All well-known paths, principals, and timeouts the original deployment
//! hard-coded are carried in an explicit [`BootstrapConfig`] that is passed
//! through the role state machines. The struct deserializes from a YAML file
//! with per-field defaults matching the reference deployment.

use crate::error::{BootstrapError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Role a node plays during bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Accepts writes, sources the replication stream
    Primary,
    /// Receives the one-time backup then applies the primary's stream
    Replica,
}

impl std::str::FromStr for NodeRole {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" | "master" => Ok(NodeRole::Primary),
            "replica" | "slave" => Ok(NodeRole::Replica),
            other => Err(BootstrapError::config(format!(
                "unknown role '{other}' (expected 'primary' or 'replica')"
            ))),
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Replica => write!(f, "replica"),
        }
    }
}

/// A cluster member known at provisioning time
///
/// `server_id` is the engine's server identity; it is assigned once and must
/// be unique cluster-wide.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub host: String,
    pub server_id: u32,
}

/// Readiness polling parameters
///
/// One shared interval/ceiling pair covers all three rendezvous points:
/// service ping, remote channel probe, and artifact arrival. The reference
/// deployment polls every second with a ten minute ceiling.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PollConfig {
    /// Seconds between predicate evaluations
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Seconds before a wait fails with a timeout
    #[serde(default = "default_ceiling_secs")]
    pub ceiling_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            ceiling_secs: default_ceiling_secs(),
        }
    }
}

impl PollConfig {
    /// Delay between predicate evaluations
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Maximum total wait before the poll fails
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }
}

const fn default_interval_secs() -> u64 {
    1
}
const fn default_ceiling_secs() -> u64 {
    600
}

/// Full bootstrap configuration for one node
///
/// Loaded once from YAML at process start and passed by reference through the
/// role orchestrator; nothing here mutates after load.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    /// This node's engine server identity (unique cluster-wide)
    pub server_id: u32,
    /// Application database created on the primary and replicated out
    pub database: String,
    /// Full replica set, known to the primary at bootstrap time
    #[serde(default)]
    pub replicas: Vec<Node>,
    /// Primary's address; required for the replica role
    #[serde(default)]
    pub primary_host: Option<String>,
    /// Engine superuser password, applied on every node
    pub root_password: String,
    /// Whether the superuser may log in from remote addresses
    #[serde(default)]
    pub allow_remote_root: bool,
    /// Replication principal name, granted on the primary per replica address
    #[serde(default = "default_repl_user")]
    pub repl_user: String,
    /// Replication principal secret
    pub repl_password: String,
    /// OS-level transfer principal that receives the backup artifact
    #[serde(default = "default_transfer_user")]
    pub transfer_user: String,
    /// Landing directory for the backup artifact on every node
    #[serde(default = "default_transfer_dir")]
    pub transfer_dir: PathBuf,
    /// Artifact file name inside the transfer directory
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    /// Role-specific engine config fragment (appended for the primary,
    /// overwritten for the replica)
    #[serde(default = "default_engine_conf")]
    pub engine_conf: PathBuf,
    /// Engine config file holding the bind-address directive
    #[serde(default = "default_bind_conf")]
    pub bind_conf: PathBuf,
    /// Authentication-stack policy file patched by the channel window
    #[serde(default = "default_auth_stack_conf")]
    pub auth_stack_conf: PathBuf,
    /// Secure-shell daemon config patched by the channel window
    #[serde(default = "default_daemon_conf")]
    pub daemon_conf: PathBuf,
    /// Directory holding pre-change snapshots of the two policy files
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    /// Database engine port
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    /// Readiness polling parameters
    #[serde(default)]
    pub poll: PollConfig,
}

fn default_repl_user() -> String {
    "repl".to_string()
}
fn default_transfer_user() -> String {
    "xfer".to_string()
}
fn default_transfer_dir() -> PathBuf {
    PathBuf::from("/var/lib/repl-bootstrap/transfer")
}
fn default_artifact_name() -> String {
    "cluster-dump.sql".to_string()
}
fn default_engine_conf() -> PathBuf {
    PathBuf::from("/etc/mysql/conf.d/replication.cnf")
}
fn default_bind_conf() -> PathBuf {
    PathBuf::from("/etc/mysql/mysql.conf.d/mysqld.cnf")
}
fn default_auth_stack_conf() -> PathBuf {
    PathBuf::from("/etc/pam.d/sshd")
}
fn default_daemon_conf() -> PathBuf {
    PathBuf::from("/etc/ssh/sshd_config")
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("/var/lib/repl-bootstrap/snapshots")
}
const fn default_db_port() -> u16 {
    3306
}

impl BootstrapConfig {
    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the file cannot be read, does not parse,
    /// or fails cross-field validation for the given role.
    pub fn load(path: &Path, role: NodeRole) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BootstrapError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let cfg: BootstrapConfig = serde_yaml::from_str(&raw)
            .map_err(|e| BootstrapError::config(format!("cannot parse {}: {e}", path.display())))?;
        cfg.validate(role)?;
        Ok(cfg)
    }

    /// Cross-field validation for one role
    pub fn validate(&self, role: NodeRole) -> Result<()> {
        if self.server_id == 0 {
            return Err(BootstrapError::config("server_id must be non-zero"));
        }
        if role == NodeRole::Replica && self.primary_host.is_none() {
            return Err(BootstrapError::config(
                "primary_host is required for the replica role",
            ));
        }
        let mut ids: Vec<u32> = self.replicas.iter().map(|n| n.server_id).collect();
        ids.push(self.server_id);
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.replicas.len() + 1 {
            return Err(BootstrapError::config(
                "server ids must be unique cluster-wide",
            ));
        }
        Ok(())
    }

    /// Well-known path of the backup artifact on this node
    pub fn artifact_path(&self) -> PathBuf {
        self.transfer_dir.join(&self.artifact_name)
    }

    /// Primary host, for code paths that already validated the replica role
    pub fn primary_host(&self) -> Result<&str> {
        self.primary_host
            .as_deref()
            .ok_or_else(|| BootstrapError::config("primary_host is not set"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn minimal_yaml() -> &'static str {
        "server_id: 1\n\
         database: appdb\n\
         root_password: rootpw\n\
         repl_password: replpw\n"
    }

    #[test]
    fn test_minimal_config_defaults() {
        let cfg: BootstrapConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(cfg.repl_user, "repl");
        assert_eq!(cfg.transfer_user, "xfer");
        assert_eq!(cfg.db_port, 3306);
        assert_eq!(cfg.poll.interval_secs, 1);
        assert_eq!(cfg.poll.ceiling_secs, 600);
        assert!(cfg.replicas.is_empty());
        assert_eq!(
            cfg.artifact_path(),
            PathBuf::from("/var/lib/repl-bootstrap/transfer/cluster-dump.sql")
        );
    }

    #[test]
    fn test_replica_role_requires_primary_host() {
        let cfg: BootstrapConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert!(cfg.validate(NodeRole::Primary).is_ok());
        assert!(cfg.validate(NodeRole::Replica).is_err());
    }

    #[test]
    fn test_replica_list_parses() {
        let yaml = format!(
            "{}replicas:\n  - host: replica-1\n    server_id: 2\n  - host: replica-2\n    server_id: 3\n",
            minimal_yaml()
        );
        let cfg: BootstrapConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.replicas.len(), 2);
        assert_eq!(cfg.replicas[0].host, "replica-1");
        assert_eq!(cfg.replicas[1].server_id, 3);
        assert!(cfg.validate(NodeRole::Primary).is_ok());
    }

    #[test]
    fn test_duplicate_server_ids_rejected() {
        let yaml = format!(
            "{}replicas:\n  - host: replica-1\n    server_id: 1\n",
            minimal_yaml()
        );
        let cfg: BootstrapConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.validate(NodeRole::Primary).is_err());
    }

    #[test]
    fn test_zero_server_id_rejected() {
        let yaml = minimal_yaml().replace("server_id: 1", "server_id: 0");
        let cfg: BootstrapConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.validate(NodeRole::Primary).is_err());
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!(NodeRole::from_str("primary").unwrap(), NodeRole::Primary);
        assert_eq!(NodeRole::from_str("replica").unwrap(), NodeRole::Replica);
        assert_eq!(NodeRole::from_str("master").unwrap(), NodeRole::Primary);
        assert!(NodeRole::from_str("arbiter").is_err());
    }

    #[test]
    fn test_poll_config_durations() {
        let poll = PollConfig {
            interval_secs: 2,
            ceiling_secs: 30,
        };
        assert_eq!(poll.interval(), Duration::from_secs(2));
        assert_eq!(poll.ceiling(), Duration::from_secs(30));
    }
}

//! Engine configuration patching
//!
//! Role-specific replication parameters are plain text fragments written into
//! the engine's config store before the service starts; patches against a
//! stopped service are inert until start.
//!
//! The primary fragment is APPENDED (it coexists with base defaults), the
//! replica fragment OVERWRITES its target (replica identity is singular and
//! fixed). The asymmetry is deliberate and load-bearing: re-running the
//! replica patch is idempotent, re-running the primary patch duplicates the
//! block, so callers invoke it once per process lifetime.

use crate::error::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Render the primary's replication fragment
fn primary_fragment(server_id: u32, database: &str) -> String {
    format!(
        "\n[mysqld]\n\
         server-id = {server_id}\n\
         log-bin = mysql-bin\n\
         binlog-do-db = {database}\n"
    )
}

/// Render the replica's replication fragment
fn replica_fragment(server_id: u32, database: &str) -> String {
    format!(
        "[mysqld]\n\
         server-id = {server_id}\n\
         relay-log = relay-bin\n\
         replicate-do-db = {database}\n\
         read_only = ON\n"
    )
}

/// Append the primary replication block to the engine config fragment
///
/// NOT idempotent: a second invocation appends a second block. The role
/// orchestrator guarantees a single invocation per bootstrap.
pub fn apply_primary_config(path: &Path, server_id: u32, database: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(primary_fragment(server_id, database).as_bytes())?;
    info!(
        "Appended primary replication config (server-id {}) to {}",
        server_id,
        path.display()
    );
    Ok(())
}

/// Overwrite the engine config fragment with the replica replication block
///
/// Idempotent: the target is fully replaced on every invocation.
pub fn apply_replica_config(path: &Path, server_id: u32, database: &str) -> Result<()> {
    std::fs::write(path, replica_fragment(server_id, database))?;
    info!(
        "Wrote replica replication config (server-id {}) to {}",
        server_id,
        path.display()
    );
    Ok(())
}

/// Relax the engine's network binding so non-local connections are accepted
///
/// Rewrites every `bind-address` directive in place; appends one if the file
/// carries none (or does not exist yet).
pub fn bind_all_interfaces(path: &Path) -> Result<()> {
    let original = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut replaced = false;
    let mut lines: Vec<String> = original
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("bind-address") {
                replaced = true;
                "bind-address = 0.0.0.0".to_string()
            } else {
                line.to_string()
            }
        })
        .collect();

    if !replaced {
        lines.push("bind-address = 0.0.0.0".to_string());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    std::fs::write(path, out)?;
    info!("Bound engine to all interfaces in {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_config_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replication.cnf");
        std::fs::write(&path, "# base defaults\n").unwrap();

        apply_primary_config(&path, 1, "appdb").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# base defaults\n"));
        assert!(text.contains("server-id = 1"));
        assert!(text.contains("binlog-do-db = appdb"));
    }

    #[test]
    fn test_primary_config_double_apply_duplicates_block() {
        // The append asymmetry is documented behavior: two invocations must
        // yield two blocks, not one.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replication.cnf");

        apply_primary_config(&path, 1, "appdb").unwrap();
        apply_primary_config(&path, 1, "appdb").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("server-id = 1").count(), 2);
        assert_eq!(text.matches("[mysqld]").count(), 2);
    }

    #[test]
    fn test_replica_config_overwrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replication.cnf");
        std::fs::write(&path, "stale content that must vanish\n").unwrap();

        apply_replica_config(&path, 2, "appdb").unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        apply_replica_config(&path, 2, "appdb").unwrap();
        let second = std::fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
        assert!(!first.contains("stale content"));
        assert!(first.contains("server-id = 2"));
        assert!(first.contains("replicate-do-db = appdb"));
        assert!(first.contains("read_only = ON"));
    }

    #[test]
    fn test_bind_all_interfaces_rewrites_existing_directive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysqld.cnf");
        std::fs::write(&path, "[mysqld]\nbind-address = 127.0.0.1\nport = 3306\n").unwrap();

        bind_all_interfaces(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("bind-address = 0.0.0.0"));
        assert!(!text.contains("127.0.0.1"));
        assert!(text.contains("port = 3306"));
    }

    #[test]
    fn test_bind_all_interfaces_appends_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysqld.cnf");
        std::fs::write(&path, "[mysqld]\nport = 3306\n").unwrap();

        bind_all_interfaces(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("bind-address = 0.0.0.0\n"));
    }

    #[test]
    fn test_bind_all_interfaces_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysqld.cnf");

        bind_all_interfaces(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "bind-address = 0.0.0.0\n");
    }
}

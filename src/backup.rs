//! Backup artifact production, distribution, and restore
//!
//! The primary takes one consistent full-cluster dump with the replication
//! position embedded in its header, holds the global read lock through
//! distribution, and pushes the artifact to each replica over that replica's
//! secure channel window. The replica polls for the artifact to land, then
//! loads it as a full replace of local state.
//!
//! A completion marker is appended after the dump finishes so a partially
//! transferred file never reads as ready on the receiving side.

use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result};
use crate::poll::wait_until;
use crate::system::{EngineControl, SecureChannel};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::net::IpAddr;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Last line of every complete artifact
const COMPLETE_MARKER: &str = "-- repl-bootstrap: dump complete";

/// How far into the dump the embedded position statement may appear
const POSITION_SCAN_LINES: usize = 200;

/// Readiness view of the backup artifact's landing path
///
/// Both rendezvous sides go through this seam, so a later implementation can
/// swap the polling for an explicit completion signal without touching the
/// state machines.
pub trait ArtifactStore {
    /// True once a complete artifact is present and readable at `path`
    fn ready(&self, path: &Path) -> Result<bool>;
}

/// Filesystem-backed artifact store
pub struct FsArtifactStore;

impl ArtifactStore for FsArtifactStore {
    fn ready(&self, path: &Path) -> Result<bool> {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return Ok(false),
        };
        let tail = read_tail(file)?;
        Ok(last_line(&tail).is_some_and(|line| line.starts_with(COMPLETE_MARKER.as_bytes())))
    }
}

/// Read up to the final 4 KiB without scanning the whole dump
fn read_tail(mut file: std::fs::File) -> Result<Vec<u8>> {
    let len = file.metadata()?.len();
    let tail = len.min(4096);
    file.seek(SeekFrom::End(-(tail as i64)))?;
    let mut buf = Vec::with_capacity(tail as usize);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Final non-empty line of the buffer, as raw bytes
///
/// Dump rows may carry arbitrary binary data, so the tail is never assumed
/// to decode as UTF-8; the marker comparison stays at the byte level.
fn last_line(tail: &[u8]) -> Option<&[u8]> {
    tail.split(|&b| b == b'\n')
        .rev()
        .find(|line| line.iter().any(|b| !b.is_ascii_whitespace()))
}

/// Create the application database and take the annotated full dump
///
/// The dump call implicitly takes the engine's global read lock; callers
/// must release it (`UNLOCK TABLES`) only after every replica has confirmed
/// receipt, so each replica's copy is consistent with the position recorded
/// inside it.
pub fn create_backup(engine: &mut dyn EngineControl, cfg: &BootstrapConfig) -> Result<()> {
    engine.exec_sql(&format!(
        "CREATE DATABASE IF NOT EXISTS `{}`",
        cfg.database
    ))?;

    std::fs::create_dir_all(&cfg.transfer_dir)?;
    let artifact = cfg.artifact_path();
    engine.dump_all(&artifact)?;

    let stamp = chrono::Utc::now().to_rfc3339();
    let mut file = std::fs::OpenOptions::new().append(true).open(&artifact)?;
    use std::io::Write;
    writeln!(file, "{COMPLETE_MARKER} {stamp}")?;

    match read_embedded_position(&artifact)? {
        Some(position) => info!("Backup taken at position: {}", position),
        None => debug!("Dump carries no recognizable position statement"),
    }
    info!("Backup artifact ready at {}", artifact.display());
    Ok(())
}

/// Extract the replication position statement embedded in the dump header
///
/// Lines are read as raw bytes and decoded lossily, so binary row data ahead
/// of the position comment never aborts the scan.
pub fn read_embedded_position(artifact: &Path) -> Result<Option<String>> {
    let file = std::fs::File::open(artifact)?;
    let mut reader = BufReader::new(file);
    let mut raw = Vec::new();
    for _ in 0..POSITION_SCAN_LINES {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&raw);
        if line.contains("SOURCE_LOG_FILE") || line.contains("MASTER_LOG_FILE") {
            return Ok(Some(line.trim().trim_start_matches("-- ").to_string()));
        }
    }
    Ok(None)
}

/// Wait for every replica's channel window, in replica order
///
/// The probe is a remote secure-shell command, not a TCP connect: it
/// distinguishes "window open" from "host merely up".
pub async fn confirm_replicas_reachable(
    channel: &mut dyn SecureChannel,
    cfg: &BootstrapConfig,
    replica_ips: &[IpAddr],
    cancel: &CancellationToken,
) -> Result<()> {
    for &ip in replica_ips {
        let user = cfg.transfer_user.clone();
        wait_until(
            &format!("channel window at {user}@{ip}"),
            &cfg.poll,
            cancel,
            || channel.probe(ip, &user),
        )
        .await?;
    }
    Ok(())
}

/// Push the artifact to every confirmed replica, sequentially
///
/// Sequential by design: worst-case total time is bounded by
/// `replica_count x ceiling` and the single dump file never sees concurrent
/// readers. Each push failure aborts the primary sequence.
pub fn distribute(
    channel: &mut dyn SecureChannel,
    cfg: &BootstrapConfig,
    replica_ips: &[IpAddr],
) -> Result<()> {
    let artifact = cfg.artifact_path();
    for &ip in replica_ips {
        channel.push(ip, &cfg.transfer_user, &artifact, &cfg.transfer_dir)?;
        info!("Artifact delivered to {}", ip);
    }
    Ok(())
}

/// Wait for a complete artifact to land in the local transfer directory
pub async fn await_backup(
    store: &dyn ArtifactStore,
    cfg: &BootstrapConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let artifact = cfg.artifact_path();
    wait_until(
        &format!("backup artifact at {}", artifact.display()),
        &cfg.poll,
        cancel,
        || store.ready(&artifact),
    )
    .await
}

/// Load the artifact as a full replace of local state
///
/// Fails fast when the engine already holds user schemas instead of silently
/// overwriting them; bootstrap assumes an empty replica.
pub fn restore(engine: &mut dyn EngineControl, cfg: &BootstrapConfig) -> Result<()> {
    let existing = engine.user_schema_count()?;
    if existing > 0 {
        return Err(BootstrapError::precondition(format!(
            "restore target already holds {existing} user schema(s); refusing to overwrite"
        )));
    }

    let artifact = cfg.artifact_path();
    if let Some(position) = read_embedded_position(&artifact)? {
        info!("Restoring dump recorded at position: {}", position);
    }
    engine.load_dump(&artifact)?;
    info!("Local state restored from {}", artifact.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollConfig;
    use std::path::PathBuf;

    struct ScriptedEngine {
        statements: Vec<String>,
        dump_body: String,
        schemas: usize,
        loaded: Option<PathBuf>,
    }

    impl ScriptedEngine {
        fn new(dump_body: &str, schemas: usize) -> Self {
            Self {
                statements: vec![],
                dump_body: dump_body.to_string(),
                schemas,
                loaded: None,
            }
        }
    }

    impl EngineControl for ScriptedEngine {
        fn start_service(&mut self) -> Result<()> {
            Ok(())
        }
        fn ping(&mut self) -> Result<bool> {
            Ok(true)
        }
        fn exec_sql(&mut self, sql: &str) -> Result<()> {
            self.statements.push(sql.to_string());
            Ok(())
        }
        fn dump_all(&mut self, artifact: &Path) -> Result<()> {
            std::fs::write(artifact, &self.dump_body)?;
            Ok(())
        }
        fn load_dump(&mut self, artifact: &Path) -> Result<()> {
            self.loaded = Some(artifact.to_path_buf());
            Ok(())
        }
        fn user_schema_count(&mut self) -> Result<usize> {
            Ok(self.schemas)
        }
    }

    const DUMP_BODY: &str = "-- dump header\n\
        -- CHANGE REPLICATION SOURCE TO SOURCE_LOG_FILE='binlog.000002', SOURCE_LOG_POS=157;\n\
        CREATE DATABASE `appdb`;\n\
        INSERT INTO t VALUES (1),(2),(3);\n";

    fn test_config(dir: &tempfile::TempDir) -> BootstrapConfig {
        BootstrapConfig {
            server_id: 1,
            database: "appdb".to_string(),
            replicas: vec![],
            primary_host: None,
            root_password: "rootpw".to_string(),
            allow_remote_root: false,
            repl_user: "repl".to_string(),
            repl_password: "replpw".to_string(),
            transfer_user: "xfer".to_string(),
            transfer_dir: dir.path().join("transfer"),
            artifact_name: "cluster-dump.sql".to_string(),
            engine_conf: dir.path().join("replication.cnf"),
            bind_conf: dir.path().join("mysqld.cnf"),
            auth_stack_conf: dir.path().join("sshd.pam"),
            daemon_conf: dir.path().join("sshd_config"),
            snapshot_dir: dir.path().join("snapshots"),
            db_port: 3306,
            poll: PollConfig {
                interval_secs: 1,
                ceiling_secs: 0,
            },
        }
    }

    #[test]
    fn test_create_backup_creates_database_then_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir);
        let mut engine = ScriptedEngine::new(DUMP_BODY, 0);

        create_backup(&mut engine, &cfg).unwrap();

        assert_eq!(
            engine.statements,
            vec!["CREATE DATABASE IF NOT EXISTS `appdb`".to_string()]
        );
        let text = std::fs::read_to_string(cfg.artifact_path()).unwrap();
        assert!(text.starts_with("-- dump header"));
        assert!(text.lines().last().unwrap().starts_with(COMPLETE_MARKER));
    }

    #[test]
    fn test_store_not_ready_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster-dump.sql");
        let store = FsArtifactStore;

        assert!(!store.ready(&path).unwrap());

        std::fs::write(&path, DUMP_BODY).unwrap();
        assert!(!store.ready(&path).unwrap());

        std::fs::write(&path, format!("{DUMP_BODY}{COMPLETE_MARKER} now\n")).unwrap();
        assert!(store.ready(&path).unwrap());
    }

    #[test]
    fn test_binary_rows_do_not_break_readiness_or_position() {
        // Dumps routinely embed blob and latin1 bytes; readiness and the
        // position scan must stay byte-level instead of requiring UTF-8.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster-dump.sql");
        let store = FsArtifactStore;

        let mut dump = Vec::new();
        dump.extend_from_slice(b"INSERT INTO t VALUES (");
        dump.extend_from_slice(&[0xff, 0xfe, 0x80, 0x81]);
        dump.extend_from_slice(b");\n");
        std::fs::write(&path, &dump).unwrap();
        assert!(!store.ready(&path).unwrap());

        dump.extend_from_slice(format!("{COMPLETE_MARKER} now\n").as_bytes());
        std::fs::write(&path, &dump).unwrap();
        assert!(store.ready(&path).unwrap());

        let mut header = Vec::new();
        header.extend_from_slice(b"-- blob comment ");
        header.extend_from_slice(&[0xff, 0xfe, 0x80, 0x81]);
        header.extend_from_slice(b"\n");
        header.extend_from_slice(
            b"-- CHANGE REPLICATION SOURCE TO SOURCE_LOG_FILE='binlog.000002', SOURCE_LOG_POS=157;\n",
        );
        std::fs::write(&path, &header).unwrap();
        let position = read_embedded_position(&path).unwrap().unwrap();
        assert!(position.contains("SOURCE_LOG_POS=157"));
    }

    #[test]
    fn test_read_embedded_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster-dump.sql");
        std::fs::write(&path, DUMP_BODY).unwrap();

        let position = read_embedded_position(&path).unwrap().unwrap();
        assert!(position.contains("SOURCE_LOG_FILE='binlog.000002'"));
        assert!(position.contains("SOURCE_LOG_POS=157"));

        std::fs::write(&path, "-- no position here\n").unwrap();
        assert!(read_embedded_position(&path).unwrap().is_none());
    }

    #[test]
    fn test_restore_refuses_non_empty_target() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir);
        std::fs::create_dir_all(&cfg.transfer_dir).unwrap();
        std::fs::write(cfg.artifact_path(), DUMP_BODY).unwrap();

        let mut engine = ScriptedEngine::new(DUMP_BODY, 2);
        let err = restore(&mut engine, &cfg).unwrap_err();
        assert!(matches!(err, BootstrapError::Precondition(_)));
        assert!(engine.loaded.is_none());
    }

    #[test]
    fn test_restore_loads_on_empty_target() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir);
        std::fs::create_dir_all(&cfg.transfer_dir).unwrap();
        std::fs::write(cfg.artifact_path(), DUMP_BODY).unwrap();

        let mut engine = ScriptedEngine::new(DUMP_BODY, 0);
        restore(&mut engine, &cfg).unwrap();
        assert_eq!(engine.loaded.unwrap(), cfg.artifact_path());
    }

    #[tokio::test]
    async fn test_await_backup_times_out_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir);
        let cancel = CancellationToken::new();

        let err = await_backup(&FsArtifactStore, &cfg, &cancel).await.unwrap_err();
        assert!(err.is_timeout());
    }
}

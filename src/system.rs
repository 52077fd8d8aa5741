//! External collaborators behind trait seams
//!
//! The database engine, the secure-shell channel, the host OS, and name
//! resolution are external to the bootstrap core. Each sits behind a small
//! trait so the orchestrator's ordering and cleanup logic can be exercised
//! against in-memory fakes, while the production implementations here shell
//! out to the engine's client tools, `ssh`/`scp`, and the service supervisor.

use crate::error::{BootstrapError, Result};
use crate::poll;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, info};

/// Control surface of the local database engine
pub trait EngineControl {
    /// Start the engine through the service supervisor
    fn start_service(&mut self) -> Result<()>;
    /// Health probe; `Ok(false)` means "not up yet", not an error
    fn ping(&mut self) -> Result<bool>;
    /// Execute one SQL statement as the superuser
    fn exec_sql(&mut self, sql: &str) -> Result<()>;
    /// Full logical dump of all schemas into `artifact`, with the
    /// consistency-locking flag that embeds the replication position
    fn dump_all(&mut self, artifact: &Path) -> Result<()>;
    /// Load a dump as a full replace of local state
    fn load_dump(&mut self, artifact: &Path) -> Result<()>;
    /// Number of non-system schemas currently present
    fn user_schema_count(&mut self) -> Result<usize>;
}

/// Outbound secure-shell operations against a replica's channel window
pub trait SecureChannel {
    /// Attempt a trivial remote command; distinguishes "window open" from
    /// "host merely up"
    fn probe(&mut self, ip: IpAddr, user: &str) -> Result<bool>;
    /// Push a local file into the remote transfer directory
    fn push(&mut self, ip: IpAddr, user: &str, local: &Path, remote_dir: &Path) -> Result<()>;
}

/// Local host operations used by the channel window and reachability checks
pub trait HostSystem {
    /// Create the transfer principal if absent
    fn ensure_user(&mut self, name: &str) -> Result<()>;
    /// Remove the transfer principal's password hash
    fn clear_password(&mut self, name: &str) -> Result<()>;
    /// Restart the secure-shell daemon so policy edits take effect
    fn restart_ssh_daemon(&mut self) -> Result<()>;
    /// TCP probe of a remote database port
    fn db_port_open(&mut self, ip: IpAddr, port: u16) -> Result<bool>;
}

/// Name resolution for every node reference
///
/// Grants, channel restrictions, and transfer targets all use the resolved
/// IP, never the logical node name.
pub trait Resolver {
    fn resolve(&self, host: &str) -> Result<IpAddr>;
}

fn run_output(cmd: &mut Command) -> Result<Output> {
    let rendered = format!("{cmd:?}");
    debug!("Running command: {}", rendered);
    cmd.output()
        .map_err(|e| BootstrapError::generic(format!("failed to spawn {rendered}: {e}")))
}

fn run_checked(cmd: &mut Command, what: &str) -> Result<Output> {
    let out = run_output(cmd)?;
    if out.status.success() {
        return Ok(out);
    }
    let stderr = String::from_utf8_lossy(&out.stderr);
    Err(BootstrapError::generic(format!(
        "{what} failed (status {}): {}",
        out.status,
        stderr.trim()
    )))
}

/// Production engine control via the engine's client tools
pub struct SystemEngine {
    service_name: String,
    root_password: String,
}

impl SystemEngine {
    pub fn new(service_name: impl Into<String>, root_password: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            root_password: root_password.into(),
        }
    }

    /// Client invocation with the superuser secret passed through the
    /// environment, keeping it out of the process list.
    fn client(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-uroot").env("MYSQL_PWD", &self.root_password);
        cmd
    }
}

impl EngineControl for SystemEngine {
    fn start_service(&mut self) -> Result<()> {
        run_checked(
            Command::new("systemctl").args(["start", &self.service_name]),
            "service start",
        )?;
        info!("Requested start of service {}", self.service_name);
        Ok(())
    }

    fn ping(&mut self) -> Result<bool> {
        let out = run_output(self.client("mysqladmin").arg("ping").stderr(Stdio::null()))?;
        Ok(out.status.success())
    }

    fn exec_sql(&mut self, sql: &str) -> Result<()> {
        let out = run_output(self.client("mysql").args(["-e", sql]))?;
        if out.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        Err(BootstrapError::sql(format!(
            "statement failed (status {}): {}",
            out.status,
            stderr.trim()
        )))
    }

    fn dump_all(&mut self, artifact: &Path) -> Result<()> {
        // --master-data embeds the replication position in the dump header
        // and takes the global read lock the orchestrator later releases.
        let out = run_checked(
            self.client("mysqldump")
                .args(["--all-databases", "--master-data", "--flush-logs"]),
            "full dump",
        )?;
        std::fs::write(artifact, &out.stdout)?;
        info!(
            "Wrote {} byte dump to {}",
            out.stdout.len(),
            artifact.display()
        );
        Ok(())
    }

    fn load_dump(&mut self, artifact: &Path) -> Result<()> {
        let file = std::fs::File::open(artifact)?;
        let out = run_output(self.client("mysql").stdin(Stdio::from(file)))?;
        if out.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        Err(BootstrapError::sql(format!(
            "dump load failed (status {}): {}",
            out.status,
            stderr.trim()
        )))
    }

    fn user_schema_count(&mut self) -> Result<usize> {
        let out = run_checked(
            self.client("mysql").args([
                "-N",
                "-e",
                "SELECT COUNT(*) FROM information_schema.schemata \
                 WHERE schema_name NOT IN \
                 ('mysql','information_schema','performance_schema','sys')",
            ]),
            "schema count query",
        )?;
        let text = String::from_utf8_lossy(&out.stdout);
        text.trim()
            .parse::<usize>()
            .map_err(|e| BootstrapError::sql(format!("unparseable schema count '{}': {e}", text.trim())))
    }
}

/// Production secure-shell channel via `ssh`/`scp`
pub struct SshChannel {
    connect_timeout_secs: u32,
}

impl SshChannel {
    pub fn new() -> Self {
        Self {
            connect_timeout_secs: 5,
        }
    }

    fn batch_args(&self) -> [String; 4] {
        [
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ]
    }
}

impl Default for SshChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureChannel for SshChannel {
    fn probe(&mut self, ip: IpAddr, user: &str) -> Result<bool> {
        let out = run_output(
            Command::new("ssh")
                .args(self.batch_args())
                .arg(format!("{user}@{ip}"))
                .arg("true")
                .stderr(Stdio::null()),
        )?;
        Ok(out.status.success())
    }

    fn push(&mut self, ip: IpAddr, user: &str, local: &Path, remote_dir: &Path) -> Result<()> {
        let out = run_output(
            Command::new("scp")
                .args(self.batch_args())
                .arg(local)
                .arg(format!("{user}@{ip}:{}/", remote_dir.display())),
        )?;
        if out.status.success() {
            info!("Pushed {} to {}@{}", local.display(), user, ip);
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        Err(BootstrapError::transfer(format!(
            "scp to {user}@{ip} failed (status {}): {}",
            out.status,
            stderr.trim()
        )))
    }
}

/// Production host operations via the usual system tools
pub struct SystemHost {
    ssh_service: String,
}

impl SystemHost {
    pub fn new(ssh_service: impl Into<String>) -> Self {
        Self {
            ssh_service: ssh_service.into(),
        }
    }
}

impl HostSystem for SystemHost {
    fn ensure_user(&mut self, name: &str) -> Result<()> {
        let exists = run_output(Command::new("id").arg("-u").arg(name).stderr(Stdio::null()))?
            .status
            .success();
        if exists {
            debug!("Transfer principal {} already exists", name);
            return Ok(());
        }
        run_checked(
            Command::new("useradd").args(["-m", name]),
            "transfer principal creation",
        )?;
        info!("Created transfer principal {}", name);
        Ok(())
    }

    fn clear_password(&mut self, name: &str) -> Result<()> {
        run_checked(
            Command::new("passwd").args(["-d", name]),
            "password removal",
        )?;
        Ok(())
    }

    fn restart_ssh_daemon(&mut self) -> Result<()> {
        run_checked(
            Command::new("systemctl").args(["restart", &self.ssh_service]),
            "ssh daemon restart",
        )?;
        info!("Restarted {}", self.ssh_service);
        Ok(())
    }

    fn db_port_open(&mut self, ip: IpAddr, port: u16) -> Result<bool> {
        Ok(poll::tcp_port_open(ip, port, Duration::from_secs(2)))
    }
}

/// Name resolution through the host directory service
pub struct DnsResolver;

impl Resolver for DnsResolver {
    fn resolve(&self, host: &str) -> Result<IpAddr> {
        // Literal addresses resolve to themselves.
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let mut addrs = (host, 0)
            .to_socket_addrs()
            .map_err(|e| BootstrapError::resolve(format!("{host}: {e}")))?;
        addrs
            .next()
            .map(|a| a.ip())
            .ok_or_else(|| BootstrapError::resolve(format!("{host}: no addresses returned")))
    }
}

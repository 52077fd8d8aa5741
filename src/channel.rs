//! Secure channel window management
//!
//! A replica opens a narrow window during which the transfer principal may
//! log in over SSH without a password, restricted to the primary's address.
//! The window is an owned resource: both policy files are snapshotted before
//! any edit and restored byte-for-byte on [`ChannelWindow::close`], which the
//! replica orchestrator runs on every exit path. A failed bootstrap must
//! never leave a passwordless, network-open login active; `Drop` is a loud
//! best-effort backstop, never the intended path.

use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result};
use crate::system::HostSystem;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Marker prefixed to every line this module injects
const WINDOW_MARKER: &str = "# repl-bootstrap transfer window";

/// An open secure channel window holding the pre-change policy snapshots
#[derive(Debug)]
pub struct ChannelWindow {
    auth_stack_path: PathBuf,
    daemon_conf_path: PathBuf,
    auth_stack_saved: Vec<u8>,
    daemon_saved: Vec<u8>,
    transfer_user: String,
    restored: bool,
}

/// Auth-stack bypass scoped to the transfer principal only
///
/// Any other principal skips the permit line and continues through the
/// normal stack unchanged.
fn auth_bypass_lines(user: &str) -> String {
    format!(
        "{WINDOW_MARKER}: scoped bypass for {user}\n\
         auth [success=1 default=ignore] pam_succeed_if.so quiet user != {user}\n\
         auth sufficient pam_permit.so\n"
    )
}

/// Daemon-config block restricting the passwordless login to the primary
fn daemon_match_block(user: &str, primary_ip: IpAddr) -> String {
    format!(
        "\n{WINDOW_MARKER} (restricted to primary address)\n\
         Match User {user} Address {primary_ip}\n\
         \tPasswordAuthentication yes\n\
         \tPermitEmptyPasswords yes\n\
         Match all\n"
    )
}

impl ChannelWindow {
    /// Open the window for the transfer principal
    ///
    /// Snapshots the auth-stack and daemon config files (in memory and under
    /// the snapshot directory for operator recovery), ensures the transfer
    /// principal exists with no password, injects the scoped bypass and the
    /// address-restricted match block, and restarts the SSH daemon.
    ///
    /// If anything fails after the first edit, the files are restored before
    /// the error is returned; an `Err` from `open` means the window is shut.
    pub fn open(
        cfg: &BootstrapConfig,
        primary_ip: IpAddr,
        host: &mut dyn HostSystem,
    ) -> Result<Self> {
        let auth_stack_saved = std::fs::read(&cfg.auth_stack_conf).map_err(|e| {
            BootstrapError::channel(format!(
                "cannot snapshot {}: {e}",
                cfg.auth_stack_conf.display()
            ))
        })?;
        let daemon_saved = std::fs::read(&cfg.daemon_conf).map_err(|e| {
            BootstrapError::channel(format!(
                "cannot snapshot {}: {e}",
                cfg.daemon_conf.display()
            ))
        })?;

        std::fs::create_dir_all(&cfg.snapshot_dir)?;
        std::fs::write(cfg.snapshot_dir.join("auth_stack.orig"), &auth_stack_saved)?;
        std::fs::write(cfg.snapshot_dir.join("daemon_conf.orig"), &daemon_saved)?;

        let mut window = ChannelWindow {
            auth_stack_path: cfg.auth_stack_conf.clone(),
            daemon_conf_path: cfg.daemon_conf.clone(),
            auth_stack_saved,
            daemon_saved,
            transfer_user: cfg.transfer_user.clone(),
            restored: false,
        };

        if let Err(e) = window.apply(primary_ip, host) {
            // Never hand back a half-open window.
            if let Err(restore_err) = window.close(host) {
                error!(
                    "Rollback of partially opened channel window failed: {}",
                    restore_err
                );
            }
            return Err(e);
        }

        info!(
            "Secure channel window open for {} (primary {})",
            window.transfer_user, primary_ip
        );
        Ok(window)
    }

    fn apply(&mut self, primary_ip: IpAddr, host: &mut dyn HostSystem) -> Result<()> {
        host.ensure_user(&self.transfer_user)?;
        host.clear_password(&self.transfer_user)?;

        let mut auth = auth_bypass_lines(&self.transfer_user).into_bytes();
        auth.extend_from_slice(&self.auth_stack_saved);
        std::fs::write(&self.auth_stack_path, auth)?;

        let mut daemon = self.daemon_saved.clone();
        daemon.extend_from_slice(daemon_match_block(&self.transfer_user, primary_ip).as_bytes());
        std::fs::write(&self.daemon_conf_path, daemon)?;

        host.restart_ssh_daemon()
    }

    /// Restore both policy files to their pre-open content and restart the
    /// daemon
    ///
    /// Runs on every replica exit path, including failure. Restoration is
    /// maximal best-effort: a failure on one file never skips the other, and
    /// the daemon restart is attempted regardless, because leaving the
    /// passwordless window open is worse than any restore error.
    pub fn close(&mut self, host: &mut dyn HostSystem) -> Result<()> {
        if self.restored {
            return Ok(());
        }

        let mut first_err: Option<BootstrapError> = None;

        if let Err(e) = std::fs::write(&self.auth_stack_path, &self.auth_stack_saved) {
            error!(
                "Failed to restore {}: {}",
                self.auth_stack_path.display(),
                e
            );
            first_err = Some(BootstrapError::channel(format!(
                "restore of {} failed: {e}",
                self.auth_stack_path.display()
            )));
        }
        if let Err(e) = std::fs::write(&self.daemon_conf_path, &self.daemon_saved) {
            error!(
                "Failed to restore {}: {}",
                self.daemon_conf_path.display(),
                e
            );
            first_err.get_or_insert(BootstrapError::channel(format!(
                "restore of {} failed: {e}",
                self.daemon_conf_path.display()
            )));
        }

        if let Err(e) = host.restart_ssh_daemon() {
            error!("SSH daemon restart during window close failed: {}", e);
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => {
                self.restored = true;
                info!("Secure channel window closed, policy restored");
                Ok(())
            }
        }
    }
}

impl Drop for ChannelWindow {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        error!(
            "Channel window for {} dropped while open; restoring policy files",
            self.transfer_user
        );
        if let Err(e) = std::fs::write(&self.auth_stack_path, &self.auth_stack_saved) {
            error!(
                "Emergency restore of {} failed: {}",
                self.auth_stack_path.display(),
                e
            );
        }
        if let Err(e) = std::fs::write(&self.daemon_conf_path, &self.daemon_saved) {
            error!(
                "Emergency restore of {} failed: {}",
                self.daemon_conf_path.display(),
                e
            );
        }
        warn!("SSH daemon restart still required for restored policy to take effect");
    }
}

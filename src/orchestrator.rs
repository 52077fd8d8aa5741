//! Role orchestration state machines
//!
//! One control process per node runs exactly one of these sequences. Every
//! state transition failure is fatal for the whole role; the only retry is
//! the bounded poll inside a single readiness wait. The replica sequence
//! guarantees the secure channel window is closed on every exit path,
//! including timeout aborts part-way through.

use crate::backup::{self, ArtifactStore};
use crate::channel::ChannelWindow;
use crate::config::{BootstrapConfig, NodeRole};
use crate::credentials::{self, sql_literal};
use crate::enginecfg;
use crate::error::Result;
use crate::poll::wait_until;
use crate::system::{EngineControl, HostSystem, Resolver, SecureChannel};
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// States of the primary bootstrap sequence, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryState {
    ConfigApplied,
    ServiceUp,
    PrincipalsGranted,
    RootSet,
    BackupTaken,
    ReplicasReachable,
    BackupSent,
    Unlocked,
}

/// States of the replica bootstrap sequence, in order
///
/// `ChannelClosed` is reached on every path, success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    ConfigApplied,
    ChannelOpen,
    ServiceUp,
    RootSet,
    BackupReceived,
    Restored,
    PrimaryReachable,
    ReplicationStarted,
    ChannelClosed,
}

impl std::fmt::Display for PrimaryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Drives one node through its role sequence
///
/// Holds the external collaborators behind their trait seams; the production
/// binary wires in the system implementations, tests wire in fakes.
pub struct Orchestrator<'a> {
    cfg: &'a BootstrapConfig,
    engine: &'a mut dyn EngineControl,
    channel: &'a mut dyn SecureChannel,
    host: &'a mut dyn HostSystem,
    resolver: &'a dyn Resolver,
    store: &'a dyn ArtifactStore,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        cfg: &'a BootstrapConfig,
        engine: &'a mut dyn EngineControl,
        channel: &'a mut dyn SecureChannel,
        host: &'a mut dyn HostSystem,
        resolver: &'a dyn Resolver,
        store: &'a dyn ArtifactStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            engine,
            channel,
            host,
            resolver,
            store,
            cancel,
        }
    }

    /// Run the sequence for the given role
    pub async fn run(&mut self, role: NodeRole) -> Result<()> {
        match role {
            NodeRole::Primary => self.setup_master().await,
            NodeRole::Replica => self.setup_replica().await,
        }
    }

    fn primary_state(&self, state: PrimaryState) {
        info!("primary: reached {}", state);
    }

    fn replica_state(&self, state: ReplicaState) {
        info!("replica: reached {}", state);
    }

    /// Primary sequence: config, service, principals, root, backup,
    /// reachability, distribution, unlock
    ///
    /// With an empty replica set the reachability and distribution steps are
    /// no-ops and the sequence still ends at `Unlocked`.
    pub async fn setup_master(&mut self) -> Result<()> {
        enginecfg::apply_primary_config(
            &self.cfg.engine_conf,
            self.cfg.server_id,
            &self.cfg.database,
        )?;
        enginecfg::bind_all_interfaces(&self.cfg.bind_conf)?;
        self.primary_state(PrimaryState::ConfigApplied);

        self.engine.start_service()?;
        {
            let engine = &mut *self.engine;
            wait_until(
                "database service ping",
                &self.cfg.poll,
                &self.cancel,
                || engine.ping(),
            )
            .await?;
        }
        self.primary_state(PrimaryState::ServiceUp);

        let replica_ips = credentials::grant_replication(
            self.engine,
            self.resolver,
            &self.cfg.replicas,
            &self.cfg.repl_user,
            &self.cfg.repl_password,
        )?;
        self.primary_state(PrimaryState::PrincipalsGranted);

        credentials::apply_root_credential(
            self.engine,
            &self.cfg.root_password,
            self.cfg.allow_remote_root,
        )?;
        self.primary_state(PrimaryState::RootSet);

        backup::create_backup(self.engine, self.cfg)?;
        self.primary_state(PrimaryState::BackupTaken);

        backup::confirm_replicas_reachable(self.channel, self.cfg, &replica_ips, &self.cancel)
            .await?;
        self.primary_state(PrimaryState::ReplicasReachable);

        backup::distribute(self.channel, self.cfg, &replica_ips)?;
        self.primary_state(PrimaryState::BackupSent);

        // The dump's global read lock spans through distribution; release it
        // only once every replica holds a consistent copy.
        self.engine.exec_sql("UNLOCK TABLES")?;
        self.primary_state(PrimaryState::Unlocked);
        Ok(())
    }

    /// Replica sequence: config, channel window, service, root, receive,
    /// restore, attach, and unconditional window close
    pub async fn setup_replica(&mut self) -> Result<()> {
        enginecfg::apply_replica_config(
            &self.cfg.engine_conf,
            self.cfg.server_id,
            &self.cfg.database,
        )?;
        enginecfg::bind_all_interfaces(&self.cfg.bind_conf)?;
        self.replica_state(ReplicaState::ConfigApplied);

        let primary_ip = self.resolver.resolve(self.cfg.primary_host()?)?;
        let mut window = ChannelWindow::open(self.cfg, primary_ip, self.host)?;
        self.replica_state(ReplicaState::ChannelOpen);

        // Everything after the window opens runs under a guaranteed close:
        // the window is restored before any error propagates.
        let sequence = self.replica_sequence(primary_ip).await;
        let closed = window.close(self.host);
        if closed.is_ok() {
            self.replica_state(ReplicaState::ChannelClosed);
        }

        sequence.and(closed)
    }

    async fn replica_sequence(&mut self, primary_ip: IpAddr) -> Result<()> {
        self.engine.start_service()?;
        {
            let engine = &mut *self.engine;
            wait_until(
                "database service ping",
                &self.cfg.poll,
                &self.cancel,
                || engine.ping(),
            )
            .await?;
        }
        self.replica_state(ReplicaState::ServiceUp);

        credentials::apply_root_credential(
            self.engine,
            &self.cfg.root_password,
            self.cfg.allow_remote_root,
        )?;
        self.replica_state(ReplicaState::RootSet);

        backup::await_backup(self.store, self.cfg, &self.cancel).await?;
        self.replica_state(ReplicaState::BackupReceived);

        backup::restore(self.engine, self.cfg)?;
        self.replica_state(ReplicaState::Restored);

        {
            let host = &mut *self.host;
            let port = self.cfg.db_port;
            wait_until(
                &format!("primary database port {primary_ip}:{port}"),
                &self.cfg.poll,
                &self.cancel,
                || host.db_port_open(primary_ip, port),
            )
            .await?;
        }
        self.replica_state(ReplicaState::PrimaryReachable);

        self.attach_replication(primary_ip)?;
        self.replica_state(ReplicaState::ReplicationStarted);
        Ok(())
    }

    /// Point the local engine at the primary and start applying its stream
    ///
    /// The start position is the one embedded in the dump at backup time and
    /// applied during restore; no manually supplied offset is ever used.
    fn attach_replication(&mut self, primary_ip: IpAddr) -> Result<()> {
        if let Some(position) = backup::read_embedded_position(&self.cfg.artifact_path())? {
            info!("Attaching with embedded position: {}", position);
        }

        // Idempotent no-op when replication was never running.
        self.engine.exec_sql("STOP REPLICA")?;
        self.engine.exec_sql(&format!(
            "CHANGE REPLICATION SOURCE TO SOURCE_HOST='{primary_ip}', \
             SOURCE_PORT={}, SOURCE_USER='{}', SOURCE_PASSWORD={}",
            self.cfg.db_port,
            self.cfg.repl_user,
            sql_literal(&self.cfg.repl_password),
        ))?;
        self.engine.exec_sql("START REPLICA")?;
        Ok(())
    }
}

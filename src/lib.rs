//! # Primary/Replica Cluster Bootstrap Orchestrator
//!
//! One-shot bootstrap of a primary/replica relational-database cluster from
//! a cold start: provision one node as primary, take a consistent snapshot
//! annotated with the replication position, open a narrow time-boxed secure
//! channel to each replica, transfer the snapshot, and attach each replica
//! to the primary's replication stream.
//!
//! ## Protocol shape
//!
//! Each role runs a strictly ordered, timeout-bounded sequence (see
//! [`orchestrator`]); the primary and the replicas rendezvous only through
//! three polled conditions, never through messages:
//!
//! - the primary does not push until a replica's channel window is observed
//!   open,
//! - a replica does not restore until the backup artifact is observed
//!   complete,
//! - a replica does not attach until the primary's database port is observed
//!   reachable.
//!
//! All three waits share one interval/ceiling pair and fail closed: a ceiling
//! expiry aborts the whole role sequence, and the replica still restores its
//! secure-shell policy before exiting.
//!
//! ## Security model
//!
//! No standing passwordless trust is ever configured. The replica opens a
//! [`channel::ChannelWindow`] that permits passwordless login for a single
//! transfer principal from the primary's address only, and restores both
//! policy files byte-for-byte on every exit path, including failures.
//!
//! ## Quick start
//!
//! ```ignore
//! use repl_bootstrap::{
//!     BootstrapConfig, CancellationToken, FsArtifactStore, NodeRole, Orchestrator,
//! };
//! use repl_bootstrap::system::{DnsResolver, SshChannel, SystemEngine, SystemHost};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> repl_bootstrap::Result<()> {
//!     let cfg = BootstrapConfig::load(Path::new("bootstrap.yaml"), NodeRole::Primary)?;
//!     let mut engine = SystemEngine::new("mysql", cfg.root_password.as_str());
//!     let mut channel = SshChannel::new();
//!     let mut host = SystemHost::new("ssh");
//!     let store = FsArtifactStore;
//!
//!     let mut orchestrator = Orchestrator::new(
//!         &cfg, &mut engine, &mut channel, &mut host,
//!         &DnsResolver, &store, CancellationToken::new(),
//!     );
//!     orchestrator.run(NodeRole::Primary).await
//! }
//! ```

pub mod backup;
pub mod channel;
pub mod config;
pub mod credentials;
pub mod enginecfg;
pub mod error;
pub mod orchestrator;
pub mod poll;
pub mod system;

// Re-export the main types for convenience
pub use backup::{ArtifactStore, FsArtifactStore};
pub use channel::ChannelWindow;
pub use config::{BootstrapConfig, Node, NodeRole, PollConfig};
pub use error::{BootstrapError, Result};
pub use orchestrator::{Orchestrator, PrimaryState, ReplicaState};
pub use poll::{tcp_port_open, wait_until};
pub use system::{EngineControl, HostSystem, Resolver, SecureChannel};

// Re-export tokio_util for CancellationToken
pub use tokio_util::sync::CancellationToken;

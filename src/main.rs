//! Bootstrap entrypoint
//!
//! Usage: `repl-bootstrap <primary|replica> [config.yaml]`
//!
//! Runs the role's full bootstrap sequence and exits non-zero on any fatal
//! abort, including readiness timeouts.

use repl_bootstrap::system::{DnsResolver, SshChannel, SystemEngine, SystemHost};
use repl_bootstrap::{
    BootstrapConfig, CancellationToken, FsArtifactStore, NodeRole, Orchestrator, Result,
};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "/etc/repl-bootstrap/bootstrap.yaml";

fn usage() -> ! {
    eprintln!("usage: repl-bootstrap <primary|replica> [config.yaml]");
    std::process::exit(2);
}

async fn run(role: NodeRole, config_path: PathBuf) -> Result<()> {
    let cfg = BootstrapConfig::load(&config_path, role)?;
    info!(
        "Bootstrapping {} (server id {}, {} replica(s))",
        role,
        cfg.server_id,
        cfg.replicas.len()
    );

    let mut engine = SystemEngine::new("mysql", cfg.root_password.as_str());
    let mut channel = SshChannel::new();
    let mut host = SystemHost::new("ssh");
    let resolver = DnsResolver;
    let store = FsArtifactStore;

    let mut orchestrator = Orchestrator::new(
        &cfg,
        &mut engine,
        &mut channel,
        &mut host,
        &resolver,
        &store,
        CancellationToken::new(),
    );
    orchestrator.run(role).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let role = match args.next().map(|s| NodeRole::from_str(&s)) {
        Some(Ok(role)) => role,
        _ => usage(),
    };
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    if args.next().is_some() {
        usage();
    }

    match run(role, config_path).await {
        Ok(()) => info!("Bootstrap complete"),
        Err(e) => {
            // A timeout must force a non-zero exit like every other fatal
            // abort; nothing downstream gets to swallow it.
            error!("Bootstrap failed: {}", e);
            std::process::exit(1);
        }
    }
}

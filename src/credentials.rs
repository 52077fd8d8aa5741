//! Engine credential provisioning
//!
//! Two primary-side concerns: the per-replica replication principal (an
//! IP-scoped engine account limited to `REPLICATION SLAVE`) and the root
//! credential applied identically on every node. The replica-side secure
//! channel window lives in [`crate::channel`].

use crate::config::Node;
use crate::error::Result;
use crate::system::{EngineControl, Resolver};
use std::net::IpAddr;
use tracing::info;

/// Escape a value for interpolation into a single-quoted SQL literal
pub(crate) fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Create the replication principal for every replica address
///
/// Each replica host is resolved to an IP first; the grant host-mask is the
/// resolved IP, not the logical name, so later authentication never depends
/// on reverse resolution. A pre-existing grant surfaces as a duplicate-entry
/// engine error and propagates as fatal.
///
/// Returns the resolved addresses in replica order for reuse by the
/// distributor.
pub fn grant_replication(
    engine: &mut dyn EngineControl,
    resolver: &dyn Resolver,
    replicas: &[Node],
    user: &str,
    password: &str,
) -> Result<Vec<IpAddr>> {
    let mut resolved = Vec::with_capacity(replicas.len());

    for node in replicas {
        let ip = resolver.resolve(&node.host)?;
        engine.exec_sql(&format!(
            "CREATE USER '{user}'@'{ip}' IDENTIFIED BY {}",
            sql_literal(password)
        ))?;
        engine.exec_sql(&format!(
            "GRANT REPLICATION SLAVE ON *.* TO '{user}'@'{ip}'"
        ))?;
        info!("Granted REPLICATION SLAVE to '{}'@'{}' ({})", user, ip, node.host);
        resolved.push(ip);
    }

    if !replicas.is_empty() {
        engine.exec_sql("FLUSH PRIVILEGES")?;
    }
    Ok(resolved)
}

/// Apply the root credential, optionally widening it to remote addresses
///
/// Applied on every node regardless of role. Idempotent in effect only;
/// re-running a full role sequence is unsupported.
pub fn apply_root_credential(
    engine: &mut dyn EngineControl,
    password: &str,
    allow_remote: bool,
) -> Result<()> {
    engine.exec_sql(&format!(
        "ALTER USER 'root'@'localhost' IDENTIFIED BY {}",
        sql_literal(password)
    ))?;

    if allow_remote {
        engine.exec_sql(&format!(
            "CREATE USER IF NOT EXISTS 'root'@'%' IDENTIFIED BY {}",
            sql_literal(password)
        ))?;
        engine.exec_sql("GRANT ALL PRIVILEGES ON *.* TO 'root'@'%' WITH GRANT OPTION")?;
        info!("Root credential applied (remote root enabled)");
    } else {
        info!("Root credential applied");
    }

    engine.exec_sql("FLUSH PRIVILEGES")?;
    Ok(())
}

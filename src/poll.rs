//! Readiness polling with a fixed interval and a hard ceiling
//!
//! Every cross-process and cross-node rendezvous in the bootstrap protocol
//! (service ping, remote channel probe, artifact arrival, primary port) goes
//! through [`wait_until`]: re-evaluate a predicate at a fixed interval until
//! it holds or the ceiling elapses. A ceiling expiry is a distinguishable
//! fatal failure, never a silent success.
//!
//! Polling is deliberately busy-wait with sleep rather than event-driven:
//! the predicates are external-process and network probes with no
//! notification mechanism, and bootstrap is a one-shot, human-timescale
//! operation.

use crate::config::PollConfig;
use crate::error::{BootstrapError, Result};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait until a predicate holds or the ceiling elapses
///
/// The predicate is evaluated immediately, then once per interval. A
/// predicate error counts as "not ready" and is retained so a later timeout
/// reports the last failing condition instead of swallowing it.
///
/// # Arguments
///
/// * `label` - What is being waited for; appears in logs and in the timeout error
/// * `poll` - Interval and ceiling
/// * `cancel` - Cancellation token; cancellation returns a `Cancelled` error
/// * `predicate` - Returns `Ok(true)` once the awaited condition holds
///
/// # Errors
///
/// Returns `Timeout` if the ceiling elapses first, `Cancelled` if the token
/// fires first. Both abort the caller's whole role sequence.
pub async fn wait_until<F>(
    label: &str,
    poll: &PollConfig,
    cancel: &CancellationToken,
    mut predicate: F,
) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let started = Instant::now();
    let deadline = started + poll.ceiling();
    let mut last_failure: Option<BootstrapError>;
    let mut attempt: u64 = 0;

    info!("Waiting for {} (ceiling {:?})", label, poll.ceiling());

    loop {
        if cancel.is_cancelled() {
            return Err(BootstrapError::cancelled(format!(
                "while waiting for {label}"
            )));
        }

        attempt += 1;
        last_failure = match predicate() {
            Ok(true) => {
                info!(
                    "{} ready after {:?} ({} poll attempts)",
                    label,
                    started.elapsed(),
                    attempt
                );
                return Ok(());
            }
            Ok(false) => {
                debug!("{} not ready (attempt {})", label, attempt);
                None
            }
            Err(e) => {
                debug!("{} probe failed (attempt {}): {}", label, attempt, e);
                Some(e)
            }
        };

        if Instant::now() >= deadline {
            let detail = match last_failure {
                Some(e) => format!("{label} after {:?} (last failure: {e})", poll.ceiling()),
                None => format!("{label} after {:?}", poll.ceiling()),
            };
            warn!("Timed out waiting for {}", detail);
            return Err(BootstrapError::timeout(detail));
        }

        tokio::select! {
            _ = tokio::time::sleep(poll.interval()) => {}
            _ = cancel.cancelled() => {
                return Err(BootstrapError::cancelled(format!(
                    "while waiting for {label}"
                )));
            }
        }
    }
}

/// Probe: TCP connect to `ip:port` within a short per-attempt timeout
///
/// Used for the replica's primary-reachability check. Connection refusal and
/// connect timeout both read as "not ready".
pub fn tcp_port_open(ip: IpAddr, port: u16, connect_timeout: Duration) -> bool {
    let addr = SocketAddr::new(ip, port);
    TcpStream::connect_timeout(&addr, connect_timeout).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn poll(interval_secs: u64, ceiling_secs: u64) -> PollConfig {
        PollConfig {
            interval_secs,
            ceiling_secs,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_takes_one_attempt() {
        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = Arc::clone(&calls);
        let cancel = CancellationToken::new();

        wait_until("instant condition", &poll(1, 10), &cancel, move || {
            calls2.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_at_first_poll_after_flip() {
        // Predicate becomes true at t=3s; with a 1s interval the wait must
        // return at the first poll at or after t=3s, well before the ceiling.
        let start = Instant::now();
        let cancel = CancellationToken::new();

        wait_until("flips at 3s", &poll(1, 600), &cancel, move || {
            Ok(start.elapsed() >= Duration::from_secs(3))
        })
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_true_times_out_at_ceiling() {
        let start = Instant::now();
        let cancel = CancellationToken::new();

        let err = wait_until("never ready", &poll(1, 5), &cancel, || Ok(false))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(err.to_string().contains("never ready"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_preserves_last_probe_failure() {
        let cancel = CancellationToken::new();

        let err = wait_until("failing probe", &poll(1, 3), &cancel, || {
            Err(BootstrapError::channel("connection refused"))
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ceiling_still_evaluates_once() {
        // A zero ceiling with an immediately-true predicate must succeed;
        // with a false predicate it must time out after the single attempt.
        let cancel = CancellationToken::new();

        wait_until("already ready", &poll(1, 0), &cancel, || Ok(true))
            .await
            .unwrap();

        let err = wait_until("not ready", &poll(1, 0), &cancel, || Ok(false))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            child.cancel();
        });

        let err = wait_until("cancelled wait", &poll(1, 600), &cancel, || Ok(false))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_tcp_port_open_refused() {
        // Port 1 on loopback is almost certainly closed.
        let open = tcp_port_open(
            IpAddr::from([127, 0, 0, 1]),
            1,
            Duration::from_millis(100),
        );
        assert!(!open);
    }
}

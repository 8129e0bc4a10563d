//! Heartbeat ping/pong liveness supervision.
//!
//! One supervisor sweeps every connection per tick. A connection that
//! answered since the previous sweep is flipped to "pending" and pinged again;
//! one that did not accumulates a missed pong, and once it reaches
//! `max_missed` it is evicted through [`ConnectionRegistry::evict`].

use std::sync::Arc;
use std::time::Duration;

use apisync_core::ServerMessage;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::registry::{ConnectionRegistry, LeaveReason};

/// What a single sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections sent a `ping`.
    pub pinged: usize,
    /// Connections evicted as unresponsive.
    pub evicted: usize,
}

/// Run one liveness sweep over all connections.
pub fn sweep(registry: &ConnectionRegistry, ping_frame: &Arc<String>, max_missed: u32) -> SweepReport {
    let mut report = SweepReport::default();
    let connections = registry.all();
    if connections.is_empty() {
        return report;
    }
    debug!(connections = connections.len(), "pinging connections");

    for conn in connections {
        if !conn.check_alive() {
            let missed = conn.record_missed_pong();
            if missed >= max_missed.max(1) {
                warn!(conn_id = %conn.id, missed, "connection is unresponsive, terminating");
                if registry.evict(&conn.id, LeaveReason::Unresponsive) {
                    report.evicted += 1;
                }
                continue;
            }
        }
        if conn.send(ping_frame.clone()) {
            report.pinged += 1;
        }
    }
    report
}

/// Sweep every `interval` until `cancel` fires.
///
/// The first sweep runs one full interval after start.
pub async fn run_supervisor(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    max_missed: u32,
    cancel: CancellationToken,
) {
    let ping_frame = match ServerMessage::Ping.encode() {
        Ok(json) => Arc::new(json),
        Err(e) => {
            warn!(error = %e, "failed to encode ping, liveness supervision disabled");
            return;
        }
    };

    let mut ticker = time::interval(interval);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = sweep(&registry, &ping_frame, max_missed);
                if report.evicted > 0 {
                    debug!(evicted = report.evicted, pinged = report.pinged, "liveness sweep");
                }
            }
            () = cancel.cancelled() => {
                debug!("liveness supervisor stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::make_connection;

    fn ping() -> Arc<String> {
        Arc::new(ServerMessage::Ping.encode().unwrap())
    }

    #[tokio::test]
    async fn alive_connection_is_pinged_and_marked_pending() {
        let registry = ConnectionRegistry::default();
        let (conn, mut rx) = make_connection();
        registry.admit(conn.clone(), Arc::new("schema".into()));
        let _ = rx.recv().await;

        let report = sweep(&registry, &ping(), 1);

        assert_eq!(report, SweepReport { pinged: 1, evicted: 0 });
        assert!(!conn.is_alive());
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn silent_connection_is_evicted_on_second_sweep() {
        let registry = ConnectionRegistry::default();
        let (conn, _rx) = make_connection();
        registry.admit(conn.clone(), Arc::new("schema".into()));

        let _ = sweep(&registry, &ping(), 1);
        let report = sweep(&registry, &ping(), 1);

        assert_eq!(report.evicted, 1);
        assert!(registry.is_empty());
        assert!(conn.is_terminated());
    }

    #[test]
    fn pong_between_sweeps_keeps_connection() {
        let registry = ConnectionRegistry::default();
        let (conn, _rx) = make_connection();
        registry.admit(conn.clone(), Arc::new("schema".into()));

        for _ in 0..5 {
            let _ = sweep(&registry, &ping(), 1);
            conn.mark_alive();
        }

        assert_eq!(registry.len(), 1);
        assert!(!conn.is_terminated());
    }

    #[test]
    fn grace_allows_extra_missed_sweeps() {
        let registry = ConnectionRegistry::default();
        let (conn, _rx) = make_connection();
        registry.admit(conn.clone(), Arc::new("schema".into()));

        // ALIVE -> pending, then two misses tolerated with max_missed = 3
        for _ in 0..3 {
            assert_eq!(sweep(&registry, &ping(), 3).evicted, 0);
        }
        assert_eq!(conn.missed_pongs(), 2);
        assert_eq!(sweep(&registry, &ping(), 3).evicted, 1);
    }

    #[test]
    fn empty_registry_sweep_is_noop() {
        let registry = ConnectionRegistry::default();
        assert_eq!(sweep(&registry, &ping(), 1), SweepReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_evicts_silent_connection() {
        let registry = Arc::new(ConnectionRegistry::default());
        let (conn, _rx) = make_connection();
        registry.admit(conn.clone(), Arc::new("schema".into()));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_supervisor(
            registry.clone(),
            Duration::from_secs(30),
            1,
            cancel.clone(),
        ));

        conn.termination_token().cancelled().await;
        assert!(registry.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn supervisor_stops_on_cancel() {
        let registry = Arc::new(ConnectionRegistry::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_supervisor(
            registry,
            Duration::from_secs(100),
            1,
            cancel.clone(),
        ));
        cancel.cancel();
        handle.await.unwrap();
    }
}

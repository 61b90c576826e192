//! Control-plane proxy: a small RESP server exposing aggregated stats.
//!
//! Runs on the orchestrator thread, answers each connection with an
//! `INFO`-like bulk string built from every worker's `Stats::snapshot()`.
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use logger::logger::Logger;
use resp::value::RespValue;

use crate::stats::StatsSnapshot;

pub struct Proxy {
    listener: TcpListener,
    logger: Logger,
}

impl Proxy {
    pub fn bind(addr: SocketAddr, logger: Logger) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Proxy { listener, logger })
    }

    /// Accepts at most one pending connection and serves it synchronously
    /// with a single stats reply, matching the orchestrator's
    /// cooperative-loop contract: a slow client would otherwise starve
    /// everything else on this thread, so each request gets a short
    /// write timeout.
    pub fn poll_once(&self, snapshot_provider: impl Fn() -> StatsSnapshot) {
        match self.listener.accept() {
            Ok((stream, _addr)) => self.serve(stream, snapshot_provider()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => self.logger.warn(&format!("accept failed: {e}"), "PROXY"),
        }
    }

    fn serve(&self, mut stream: TcpStream, snapshot: StatsSnapshot) {
        let _ = stream.set_write_timeout(Some(Duration::from_millis(500)));
        let body = RespValue::bulk(snapshot.render());
        if let Err(e) = stream.write_all(&body.encode()) {
            self.logger.warn(&format!("write failed: {e}"), "PROXY");
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

pub type SharedStatsList = Arc<Vec<Arc<crate::stats::Stats>>>;

/// Builds the aggregation closure `Proxy::poll_once` expects from a list
/// of per-worker stats handles.
pub fn aggregate_snapshot(all_stats: &SharedStatsList) -> StatsSnapshot {
    let snapshots: Vec<StatsSnapshot> = all_stats.iter().map(|s| s.snapshot()).collect();
    StatsSnapshot::aggregate(&snapshots)
}

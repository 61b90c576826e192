//! Per-worker counters reported by the control-plane proxy, so
//! `engine::proxy` can build its `INFO`-like reply straight off a
//! snapshot.
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    pub total_msgs_recv: AtomicU64,
    pub total_msgs_sent: AtomicU64,
    pub total_net_input_bytes: AtomicU64,
    pub total_net_output_bytes: AtomicU64,
    pub mbufs_inqueue: AtomicU64,
    pub msgs_outqueue: AtomicU64,
    pub rdb_parsed_count: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_msgs_recv: u64,
    pub total_msgs_sent: u64,
    pub total_net_input_bytes: u64,
    pub total_net_output_bytes: u64,
    pub mbufs_inqueue: u64,
    pub msgs_outqueue: u64,
    pub rdb_parsed_count: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_msg_recv(&self, bytes: u64) {
        self.total_msgs_recv.fetch_add(1, Ordering::Relaxed);
        self.total_net_input_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_msg_sent(&self, bytes: u64) {
        self.total_msgs_sent.fetch_add(1, Ordering::Relaxed);
        self.total_net_output_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_rdb_parsed(&self) {
        self.rdb_parsed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_mbufs_inqueue(&self, n: u64) {
        self.mbufs_inqueue.store(n, Ordering::Relaxed);
    }

    pub fn set_msgs_outqueue(&self, n: u64) {
        self.msgs_outqueue.store(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_msgs_recv: self.total_msgs_recv.load(Ordering::Relaxed),
            total_msgs_sent: self.total_msgs_sent.load(Ordering::Relaxed),
            total_net_input_bytes: self.total_net_input_bytes.load(Ordering::Relaxed),
            total_net_output_bytes: self.total_net_output_bytes.load(Ordering::Relaxed),
            mbufs_inqueue: self.mbufs_inqueue.load(Ordering::Relaxed),
            msgs_outqueue: self.msgs_outqueue.load(Ordering::Relaxed),
            rdb_parsed_count: self.rdb_parsed_count.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    pub fn aggregate(snapshots: &[StatsSnapshot]) -> StatsSnapshot {
        let mut total = StatsSnapshot::default();
        for s in snapshots {
            total.total_msgs_recv += s.total_msgs_recv;
            total.total_msgs_sent += s.total_msgs_sent;
            total.total_net_input_bytes += s.total_net_input_bytes;
            total.total_net_output_bytes += s.total_net_output_bytes;
            total.mbufs_inqueue += s.mbufs_inqueue;
            total.msgs_outqueue += s.msgs_outqueue;
            total.rdb_parsed_count += s.rdb_parsed_count;
        }
        total
    }

    pub fn render(&self) -> String {
        format!(
            "stat_total_msgs_recv:{}\r\n\
             stat_total_msgs_sent:{}\r\n\
             stat_total_net_input_bytes:{}\r\n\
             stat_total_net_output_bytes:{}\r\n\
             stat_mbufs_inqueue:{}\r\n\
             stat_msgs_outqueue:{}\r\n\
             stat_rdb_parsed_count:{}\r\n",
            self.total_msgs_recv,
            self.total_msgs_sent,
            self.total_net_input_bytes,
            self.total_net_output_bytes,
            self.mbufs_inqueue,
            self.msgs_outqueue,
            self.rdb_parsed_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_across_calls() {
        let stats = Stats::new();
        stats.record_msg_recv(10);
        stats.record_msg_recv(5);
        stats.record_msg_sent(7);
        let snap = stats.snapshot();
        assert_eq!(snap.total_msgs_recv, 2);
        assert_eq!(snap.total_net_input_bytes, 15);
        assert_eq!(snap.total_msgs_sent, 1);
        assert_eq!(snap.total_net_output_bytes, 7);
    }

    #[test]
    fn aggregate_sums_across_workers() {
        let a = StatsSnapshot {
            total_msgs_sent: 5,
            ..Default::default()
        };
        let b = StatsSnapshot {
            total_msgs_sent: 3,
            ..Default::default()
        };
        let total = StatsSnapshot::aggregate(&[a, b]);
        assert_eq!(total.total_msgs_sent, 8);
    }

    #[test]
    fn render_includes_every_documented_field_name() {
        let snap = StatsSnapshot::default();
        let rendered = snap.render();
        for field in [
            "stat_total_msgs_recv",
            "stat_total_msgs_sent",
            "stat_total_net_input_bytes",
            "stat_total_net_output_bytes",
            "stat_mbufs_inqueue",
            "stat_msgs_outqueue",
            "stat_rdb_parsed_count",
        ] {
            assert!(rendered.contains(field));
        }
    }
}

//! Writer worker: parses bytes handed over by a reader into framed
//! messages, fragments and routes them, and pumps target connections.
//!
//! The pure decision functions (`parse_prepare`, `prepare_send_data`)
//! are kept free of socket I/O so they can be exercised directly by
//! tests; `WriterWorker` wires them to real `TcpStream`s.
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Cursor, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use logger::logger::Logger;

use crate::buffer::msg::{Msg, MsgDirection, ParseResult};
use crate::buffer::pool::MsgPool;
use crate::error::EngineError;
use crate::group::Group;
use crate::ids::TargetId;
use crate::node::source::{ReplicationState, SourceNode};
use crate::node::target::TargetNode;
use crate::rdb::{RdbReader, SimpleRdbReader};
use crate::stats::Stats;

const RESP_CHECK_OK: &[u8] = b"+OK";

/// Drains every chunk currently available on `node` and feeds it through
/// the in-progress message parser, returning every request that
/// completed this pass.
pub fn parse_prepare(node: &mut SourceNode, msg_pool: &MsgPool, noreply: bool) -> Vec<Msg> {
    let mut completed = Vec::new();
    while let Some(chunk) = node.next_chunk() {
        if node.in_progress.is_none() {
            let mut msg = msg_pool.acquire(MsgDirection::Request);
            msg.noreply = noreply;
            node.in_progress = Some(msg);
        }
        let msg = node.in_progress.as_mut().expect("just inserted above");
        match msg.append_and_parse(&chunk) {
            ParseResult::Ok => {
                if let Some(tail) = msg.take_tail() {
                    node.push_piece_front(tail);
                }
                completed.push(node.in_progress.take().expect("message just completed"));
            }
            ParseResult::Repair | ParseResult::Again => {
                // valid so far; wait for the next chunk.
            }
            ParseResult::Error => {
                if let Some(dropped) = node.in_progress.take() {
                    msg_pool.release(dropped);
                }
            }
        }
    }
    completed
}

/// Decodes as much of a `Transfer`-state source's buffered RDB bytes as
/// currently form a complete snapshot, converting each entry into a
/// `RESTORE` request and driving the node to `Connected` once the
/// terminating EOF opcode is reached. Returns nothing (and leaves the
/// buffer intact) if the bytes gathered so far don't yet decode
/// cleanly — this only distinguishes "not enough bytes yet" from "done"
/// by whether decoding ran to completion without error, so a snapshot
/// truncated at exactly an entry boundary would be mistaken for more
/// data pending rather than a malformed stream; `SimpleRdbReader` is
/// built for whole, complete snapshots, not arbitrary byte-at-a-time
/// resumption.
pub fn drain_rdb(node: &mut SourceNode, msg_pool: &MsgPool) -> Vec<Msg> {
    while let Some(chunk) = node.rdb_queue.pop_front() {
        node.rdb_buffer.extend_from_slice(&chunk);
    }
    if node.rdb_buffer.is_empty() {
        return Vec::new();
    }
    let mut reader = SimpleRdbReader::new(Cursor::new(node.rdb_buffer.as_slice()));
    let mut entries = Vec::new();
    loop {
        match reader.next_entry() {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => break,
            Err(_) => return Vec::new(),
        }
    }
    node.rdb_buffer.clear();
    node.transition(ReplicationState::Connected);
    entries
        .into_iter()
        .map(|entry| {
            let mut msg = msg_pool.acquire(MsgDirection::Request);
            let args = entry
                .to_restore_command()
                .as_command_args()
                .expect("to_restore_command always builds a bulk-string array");
            msg.load_command(&args);
            msg
        })
        .collect()
}

/// One-shot read of a file-backed source: opens the configured RDB file
/// the first time it's seen, decodes every entry, and marks the node
/// `Connected` so the file is never re-read on a later pass.
pub fn drain_file_source(node: &mut SourceNode, msg_pool: &MsgPool) -> Vec<Msg> {
    if node.state == ReplicationState::Connected {
        return Vec::new();
    }
    let Some(path) = node.file_source.clone() else {
        return Vec::new();
    };
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };
    let mut reader = SimpleRdbReader::new(file);
    let mut completed = Vec::new();
    loop {
        match reader.next_entry() {
            Ok(Some(entry)) => {
                let mut msg = msg_pool.acquire(MsgDirection::Request);
                let args = entry
                    .to_restore_command()
                    .as_command_args()
                    .expect("to_restore_command always builds a bulk-string array");
                msg.load_command(&args);
                completed.push(msg);
            }
            Ok(None) | Err(_) => break,
        }
    }
    node.transition(ReplicationState::Connected);
    completed
}

/// Fragments and routes a completed request, returning the list of
/// `(target, sub-message)` pairs it should be handed to. A `noforward`
/// message yields nothing.
pub fn prepare_send_data(group: &Group, msg: Msg) -> Result<Vec<(TargetId, Msg)>, EngineError> {
    if msg.noforward {
        return Ok(Vec::new());
    }
    let keys = msg.key_args();
    if keys.len() <= 1 {
        let target = match keys.first() {
            Some(key) => group.route(key),
            None => group.targets().first().copied(),
        };
        let target = target.ok_or_else(|| {
            EngineError::routing("WRITER", "no backend owns this command's key")
        })?;
        return Ok(vec![(target, msg)]);
    }

    let fragments = msg.fragment();
    if fragments.is_empty() {
        // keys() said >1 but fragment() disagreed (e.g. GETs without
        // fragmentation support): fall back to routing on the first key.
        let target = group
            .route(keys[0])
            .ok_or_else(|| EngineError::routing("WRITER", "no backend owns this command's key"))?;
        return Ok(vec![(target, msg)]);
    }

    let mut routed = Vec::with_capacity(fragments.len());
    for frag in fragments {
        let frag_key = frag.key_args();
        let target = frag_key
            .first()
            .and_then(|k| group.route(k))
            .ok_or_else(|| EngineError::routing("WRITER", "no backend owns fragment's key"))?;
        routed.push((target, frag));
    }
    Ok(routed)
}

/// Validates that a parsed response looks like a sane reply to `req`:
/// currently a minimal sanity check (non-empty bytes). A mismatch is
/// logged, never treated as fatal.
pub fn resp_check(_req: &Msg, response: &Msg) -> bool {
    !response.data().is_empty()
}

pub struct WriterWorker {
    noreply: bool,
    group: Group,
    targets: HashMap<TargetId, TargetNode>,
    streams: HashMap<TargetId, TcpStream>,
    file_sinks: HashMap<TargetId, std::fs::File>,
    msg_pool: MsgPool,
    stats: Arc<Stats>,
    logger: Logger,
}

impl WriterWorker {
    pub fn new(group: Group, targets: Vec<TargetNode>, noreply: bool, logger: Logger) -> Self {
        let targets = targets.into_iter().map(|t| (t.id, t)).collect();
        WriterWorker {
            noreply,
            group,
            targets,
            streams: HashMap::new(),
            file_sinks: HashMap::new(),
            msg_pool: MsgPool::new(),
            stats: Arc::new(Stats::new()),
            logger,
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Runs one pass of parse → route → dispatch for `node`: a
    /// file-backed source is decoded once through `drain_file_source`, a
    /// live source still in its RDB-transfer phase is decoded through
    /// `drain_rdb`, and a fully connected live source has its command
    /// stream parsed as usual.
    pub fn process_source(&mut self, node: &mut SourceNode) {
        let completed = if node.file_source.is_some() {
            drain_file_source(node, &self.msg_pool)
        } else if node.state == ReplicationState::Transfer {
            drain_rdb(node, &self.msg_pool)
        } else {
            parse_prepare(node, &self.msg_pool, self.noreply)
        };
        for msg in completed {
            self.stats.record_msg_recv(msg.mlen as u64);
            match prepare_send_data(&self.group, msg) {
                Ok(routed) => {
                    for (target_id, sub_msg) in routed {
                        self.enqueue(target_id, sub_msg);
                    }
                }
                Err(e) => {
                    self.logger.error(&e.to_string(), "WRITER");
                }
            }
        }
    }

    fn enqueue(&mut self, target_id: TargetId, msg: Msg) {
        if let Some(target) = self.targets.get_mut(&target_id) {
            target.enqueue_send(msg);
        } else {
            self.logger
                .error(&format!("unknown target {target_id}"), "WRITER");
        }
    }

    /// Ensures a non-blocking connection exists for `target_id`,
    /// dialing if the socket is currently closed.
    fn ensure_connected(&mut self, target_id: TargetId) -> Result<(), EngineError> {
        if self.streams.contains_key(&target_id) {
            return Ok(());
        }
        let addr = self
            .targets
            .get(&target_id)
            .map(|t| t.addr)
            .ok_or_else(|| EngineError::setup("WRITER", "unknown target id"))?;
        let stream = TcpStream::connect_timeout(&addr, Duration::from_millis(500))
            .map_err(|e| EngineError::target_recoverable("WRITER", format!("connect failed: {e}")))?;
        stream
            .set_nonblocking(true)
            .map_err(|e| EngineError::setup("WRITER", format!("set_nonblocking failed: {e}")))?;
        self.streams.insert(target_id, stream);
        if let Some(target) = self.targets.get_mut(&target_id) {
            target.mark_open();
        }
        Ok(())
    }

    /// Opens (if needed) the file backing an `RDBFILE` target's sink.
    fn ensure_file_sink(&mut self, target_id: TargetId) -> Result<(), EngineError> {
        if self.file_sinks.contains_key(&target_id) {
            return Ok(());
        }
        let path = self
            .targets
            .get(&target_id)
            .and_then(|t| t.file_sink.clone())
            .ok_or_else(|| EngineError::setup("WRITER", "target has no file sink configured"))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EngineError::setup("WRITER", format!("open sink file failed: {e}")))?;
        self.file_sinks.insert(target_id, file);
        if let Some(target) = self.targets.get_mut(&target_id) {
            target.mark_open();
        }
        Ok(())
    }

    /// Writes `send_data`'s full backlog straight to the target's sink
    /// file: local file writes don't raise `WouldBlock`, so there is no
    /// partial-write cursor to track here the way `pump_send` tracks
    /// `send_progress` for a socket target.
    fn pump_send_file(&mut self, target_id: TargetId) {
        if let Err(e) = self.ensure_file_sink(target_id) {
            self.logger.warn(&e.to_string(), "WRITER");
            return;
        }
        let Some(file) = self.file_sinks.get_mut(&target_id) else {
            return;
        };
        let Some(target) = self.targets.get_mut(&target_id) else {
            return;
        };
        while let Some(msg) = target.send_data.front() {
            if let Err(e) = file.write_all(msg.encode()) {
                self.logger.error(&format!("sink write failed: {e}"), "WRITER");
                break;
            }
            self.stats.record_msg_sent(msg.mlen as u64);
            target.complete_send();
        }
    }

    /// Writes as much of `send_data`'s head as the socket accepts,
    /// resuming from `send_progress` rather than the start of the
    /// message so a `WouldBlock` mid-write never re-sends an already
    /// flushed prefix, advancing messages into `sent_data` once fully
    /// written (or releasing them immediately under `noreply`). A
    /// file-backed target is dispatched to `pump_send_file` instead,
    /// bypassing the TCP connect path entirely.
    pub fn pump_send(&mut self, target_id: TargetId) {
        let is_file_sink = self
            .targets
            .get(&target_id)
            .map(|t| t.file_sink.is_some())
            .unwrap_or(false);
        if is_file_sink {
            self.pump_send_file(target_id);
            return;
        }
        if let Err(e) = self.ensure_connected(target_id) {
            self.logger.warn(&e.to_string(), "WRITER");
            return;
        }
        let Some(stream) = self.streams.get_mut(&target_id) else {
            return;
        };
        let Some(target) = self.targets.get_mut(&target_id) else {
            return;
        };
        while let Some(msg) = target.send_data.front() {
            let bytes = msg.encode();
            if target.send_progress >= bytes.len() {
                self.stats.record_msg_sent(msg.mlen as u64);
                target.complete_send();
                continue;
            }
            match stream.write(&bytes[target.send_progress..]) {
                Ok(0) => {
                    target.disconnect();
                    self.streams.remove(&target_id);
                    break;
                }
                Ok(n) => {
                    target.send_progress += n;
                    if target.send_progress >= bytes.len() {
                        self.stats.record_msg_sent(msg.mlen as u64);
                        target.complete_send();
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => {
                    target.disconnect();
                    self.streams.remove(&target_id);
                    break;
                }
            }
        }
    }

    /// Reads whatever is available from `target_id`'s socket into
    /// `msg_rcv` and reconciles completed responses against the head of
    /// `sent_data`.
    pub fn pump_recv(&mut self, target_id: TargetId) {
        let Some(stream) = self.streams.get_mut(&target_id) else {
            return;
        };
        let mut buf = [0u8; 4096];
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                if let Some(target) = self.targets.get_mut(&target_id) {
                    target.disconnect();
                }
                self.streams.remove(&target_id);
                return;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(_) => {
                if let Some(target) = self.targets.get_mut(&target_id) {
                    target.disconnect();
                }
                self.streams.remove(&target_id);
                return;
            }
        };

        let Some(target) = self.targets.get_mut(&target_id) else {
            return;
        };
        if target.msg_rcv.is_none() {
            target.msg_rcv = Some(self.msg_pool.acquire(MsgDirection::Response));
        }
        let msg_rcv = target.msg_rcv.as_mut().expect("just inserted above");
        match msg_rcv.append_and_parse(&buf[..n]) {
            ParseResult::Ok => {
                let tail = msg_rcv.take_tail();
                let response = target.msg_rcv.take().expect("response just completed");
                if let Some(req) = target.pop_matching_request() {
                    if !resp_check(&req, &response) {
                        self.logger.warn("response mismatch", "WRITER");
                    }
                    self.msg_pool.release(req);
                }
                self.msg_pool.release(response);
                if let Some(tail) = tail {
                    let mut next = self.msg_pool.acquire(MsgDirection::Response);
                    next.append_and_parse(&tail);
                    target.msg_rcv = Some(next);
                }
            }
            ParseResult::Error => {
                // A malformed response can desynchronize request/response
                // pairing irrecoverably, so this target is hard-reconnected
                // rather than left running.
                self.logger
                    .error("response parse error, forcing reconnect", "WRITER");
                target.disconnect();
                self.streams.remove(&target_id);
            }
            ParseResult::Repair | ParseResult::Again => {}
        }
    }

    /// `writeThreadCron`: re-dials any target whose socket is closed but
    /// still has pending sends.
    pub fn cron_reconnect(&mut self) {
        let pending: Vec<TargetId> = self
            .targets
            .iter()
            .filter(|(id, t)| {
                t.file_sink.is_none()
                    && !t.is_open()
                    && !t.send_data.is_empty()
                    && !self.streams.contains_key(id)
            })
            .map(|(id, _)| *id)
            .collect();
        for target_id in pending {
            if let Err(e) = self.ensure_connected(target_id) {
                self.logger.warn(&e.to_string(), "WRITER");
            }
        }
    }

    pub fn target_ids(&self) -> Vec<TargetId> {
        self.targets.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;
    use crate::ids::{ReaderId, SourceId, WriterId};
    use crate::node::source::{ReplicationState, SourceNode};

    fn source_node() -> SourceNode {
        let mut n = SourceNode::new(
            SourceId(1),
            "127.0.0.1:6380".parse().unwrap(),
            ReaderId(0),
            WriterId(0),
        );
        n.transition(ReplicationState::Connected);
        n
    }

    #[test]
    fn parse_prepare_assembles_one_message_from_two_chunks() {
        let pool = MsgPool::new();
        let mut node = source_node();
        node.cmd_queue.push_back(b"*3\r\n$3\r\nSET\r\n".to_vec());
        node.cmd_queue.push_back(b"$1\r\nk\r\n$1\r\nv\r\n".to_vec());
        let completed = parse_prepare(&mut node, &pool, false);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].args()[1], b"k".to_vec());
    }

    #[test]
    fn parse_prepare_splits_two_messages_arriving_in_one_chunk() {
        let pool = MsgPool::new();
        let mut node = source_node();
        node.cmd_queue
            .push_back(b"+OK\r\n+PONG\r\n".to_vec());
        let completed = parse_prepare(&mut node, &pool, false);
        assert_eq!(completed.len(), 1);
        // the tail ("+PONG\r\n") was pushed back as piece data, ready for
        // the next pass.
        assert_eq!(node.piece_data.front(), Some(&b"+PONG\r\n".to_vec()));
    }

    #[test]
    fn single_key_command_routes_to_the_single_target() {
        let group = Group::single(TargetId(1));
        let pool = MsgPool::new();
        let mut msg = pool.acquire(MsgDirection::Request);
        msg.append_and_parse(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
        let routed = prepare_send_data(&group, msg).unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].0, TargetId(1));
    }

    #[test]
    fn noforward_command_is_dropped_silently() {
        let group = Group::single(TargetId(1));
        let pool = MsgPool::new();
        let mut msg = pool.acquire(MsgDirection::Request);
        msg.append_and_parse(b"*1\r\n$4\r\nPING\r\n");
        let routed = prepare_send_data(&group, msg).unwrap();
        assert!(routed.is_empty());
    }

    #[test]
    fn variadic_key_command_fans_out_across_cluster_shards() {
        let targets = vec![TargetId(1), TargetId(2)];
        let group = Group::cluster_even(&targets).unwrap();
        let pool = MsgPool::new();
        let mut msg = pool.acquire(MsgDirection::Request);
        msg.append_and_parse(b"*3\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n");
        let routed = prepare_send_data(&group, msg).unwrap();
        assert!(routed.len() >= 1);
        for (_, sub) in &routed {
            assert!(sub.args().len() >= 2);
        }
    }

    fn transfer_node() -> SourceNode {
        let mut n = SourceNode::new(
            SourceId(1),
            "127.0.0.1:6380".parse().unwrap(),
            ReaderId(0),
            WriterId(0),
        );
        n.transition(ReplicationState::Transfer);
        n
    }

    #[test]
    fn drain_rdb_waits_for_a_complete_snapshot_before_emitting_anything() {
        let pool = MsgPool::new();
        let mut node = transfer_node();
        let fixture = crate::rdb::encode_fixture(&[crate::rdb::RdbEntry {
            key: b"k".to_vec(),
            serialized_value: b"v".to_vec(),
        }]);
        node.rdb_queue.push_back(fixture[..5].to_vec());
        let completed = drain_rdb(&mut node, &pool);
        assert!(completed.is_empty());
        assert_eq!(node.state, ReplicationState::Transfer);
        assert!(!node.rdb_buffer.is_empty());
    }

    #[test]
    fn drain_rdb_converts_entries_into_restore_commands_and_reconnects() {
        let pool = MsgPool::new();
        let mut node = transfer_node();
        let fixture = crate::rdb::encode_fixture(&[
            crate::rdb::RdbEntry {
                key: b"k1".to_vec(),
                serialized_value: b"v1".to_vec(),
            },
            crate::rdb::RdbEntry {
                key: b"k2".to_vec(),
                serialized_value: b"v2".to_vec(),
            },
        ]);
        node.rdb_queue.push_back(fixture);
        let completed = drain_rdb(&mut node, &pool);
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].args()[0], b"RESTORE".to_vec());
        assert_eq!(completed[0].args()[1], b"k1".to_vec());
        assert_eq!(completed[1].args()[1], b"k2".to_vec());
        assert_eq!(node.state, ReplicationState::Connected);
        assert!(node.rdb_buffer.is_empty());
    }

    #[test]
    fn drain_file_source_reads_the_snapshot_exactly_once() {
        use std::io::Write as _;
        let pool = MsgPool::new();
        let path = std::env::temp_dir().join("rmt_test_drain_file_source.rdb");
        let fixture = crate::rdb::encode_fixture(&[crate::rdb::RdbEntry {
            key: b"only".to_vec(),
            serialized_value: b"val".to_vec(),
        }]);
        std::fs::File::create(&path).unwrap().write_all(&fixture).unwrap();

        let mut node = SourceNode::new_file(SourceId(1), path.clone(), ReaderId(0), WriterId(0));
        let first = drain_file_source(&mut node, &pool);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].args()[1], b"only".to_vec());
        assert_eq!(node.state, ReplicationState::Connected);

        let second = drain_file_source(&mut node, &pool);
        assert!(second.is_empty());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn pump_send_file_writes_the_backlog_to_the_sink_file() {
        let path = std::env::temp_dir().join("rmt_test_pump_send_file.out");
        let _ = std::fs::remove_file(&path);

        let target = TargetNode::new_file(TargetId(1), path.clone(), false);
        let group = Group::single(TargetId(1));
        let mut writer = WriterWorker::new(group, vec![target], false, Logger::null());
        let pool = MsgPool::new();
        let mut msg = pool.acquire(MsgDirection::Request);
        msg.append_and_parse(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
        writer.targets.get_mut(&TargetId(1)).unwrap().enqueue_send(msg);

        writer.pump_send(TargetId(1));

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n".to_vec());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn pump_send_resumes_from_partial_progress_without_duplicating_bytes() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let mut server = listener.accept().unwrap().0;

        let group = Group::single(TargetId(1));
        let mut target = TargetNode::new(TargetId(1), addr, false);
        let pool = MsgPool::new();
        let mut msg = pool.acquire(MsgDirection::Request);
        msg.append_and_parse(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
        let full_len = msg.encode().len();
        let already_sent = full_len / 2;
        target.enqueue_send(msg);
        target.send_progress = already_sent;
        target.mark_open();

        let mut writer = WriterWorker::new(group, vec![], false, Logger::null());
        writer.targets.insert(TargetId(1), target);
        writer.streams.insert(TargetId(1), client);

        writer.pump_send(TargetId(1));

        server
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 256];
        let n = server.read(&mut buf).unwrap();
        assert_eq!(n, full_len - already_sent);
    }
}

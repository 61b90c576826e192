//! Source-side replication state: per-peer connection bookkeeping for
//! one Redis instance being replicated from.
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use crate::buffer::msg::Msg;
use crate::ids::{ReaderId, SourceId, WriterId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationState {
    None,
    Connecting,
    Transfer,
    Connected,
    Error,
}

pub struct SourceNode {
    pub id: SourceId,
    pub addr: SocketAddr,
    pub state: ReplicationState,
    pub reader: ReaderId,
    pub writer: WriterId,
    /// Bytes pulled from the socket during `Transfer`, awaiting the
    /// writer's RDB decode.
    pub rdb_queue: VecDeque<Vec<u8>>,
    /// Bytes pulled from the socket once `Connected`, awaiting the
    /// writer's command parser.
    pub cmd_queue: VecDeque<Vec<u8>>,
    /// Leftover tail split off an incomplete parse, re-spliced ahead of
    /// the next queued chunk.
    pub piece_data: VecDeque<Vec<u8>>,
    pub last_heartbeat: Option<Instant>,
    pub replid: Option<String>,
    pub offset: i64,
    /// Bytes accumulated so far from a live `Transfer`-state socket,
    /// waiting for a complete RDB snapshot to decode.
    pub rdb_buffer: Vec<u8>,
    /// Set for a source whose snapshot is a local RDB file rather than
    /// a live replication link — no reader thread ever touches this
    /// node; the writer reads the file directly and once.
    pub file_source: Option<PathBuf>,
    /// The request currently being assembled by the writer's parser.
    pub in_progress: Option<Msg>,
}

impl SourceNode {
    pub fn new(id: SourceId, addr: SocketAddr, reader: ReaderId, writer: WriterId) -> Self {
        SourceNode {
            id,
            addr,
            state: ReplicationState::None,
            reader,
            writer,
            rdb_queue: VecDeque::new(),
            cmd_queue: VecDeque::new(),
            piece_data: VecDeque::new(),
            last_heartbeat: None,
            replid: None,
            offset: -1,
            rdb_buffer: Vec::new(),
            file_source: None,
            in_progress: None,
        }
    }

    /// Builds a source backed by a local RDB file instead of a replication
    /// link. `addr` is never dialed for these nodes — it only satisfies
    /// the struct's shape so file and socket sources share one type.
    pub fn new_file(id: SourceId, path: PathBuf, reader: ReaderId, writer: WriterId) -> Self {
        let mut node = SourceNode::new(id, "0.0.0.0:0".parse().unwrap(), reader, writer);
        node.file_source = Some(path);
        node
    }

    pub fn hostname(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn transition(&mut self, next: ReplicationState) {
        self.state = next;
    }

    /// Pushes a byte chunk arriving from the source socket onto whichever
    /// queue matches the current replication state.
    pub fn enqueue(&mut self, bytes: Vec<u8>) {
        match self.state {
            ReplicationState::Transfer => self.rdb_queue.push_back(bytes),
            ReplicationState::Connected => self.cmd_queue.push_back(bytes),
            _ => {}
        }
    }

    /// Next chunk to feed the parser: leftover piece data first, then the
    /// queue matching replication state — while `Connected`, any
    /// residual RDB bytes still drain ahead of the command stream.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if let Some(piece) = self.piece_data.pop_front() {
            return Some(piece);
        }
        match self.state {
            ReplicationState::Transfer => self.rdb_queue.pop_front(),
            ReplicationState::Connected => self
                .rdb_queue
                .pop_front()
                .or_else(|| self.cmd_queue.pop_front()),
            _ => None,
        }
    }

    pub fn push_piece_front(&mut self, tail: Vec<u8>) {
        self.piece_data.push_front(tail);
    }
}

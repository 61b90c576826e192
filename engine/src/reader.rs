//! Reader worker: drives the replication handshake against a source and
//! hands raw bytes off to its paired writer via the source node's
//! queues plus a wake signal.
//!
//! Acts as a Redis replica: sends PING, REPLCONF listening-port,
//! REPLCONF capa eof, then PSYNC ? -1. The handshake byte-building is
//! split out as free functions so it can be tested without a live
//! socket; `ReaderWorker` wires them to a real, non-blocking
//! `TcpStream`.
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use logger::logger::Logger;

use crate::buffer::pool::SegmentPool;
use crate::error::EngineError;
use crate::node::source::{ReplicationState, SourceNode};

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the four handshake commands sent before `PSYNC`, in order.
pub fn handshake_commands(listening_port: u16) -> Vec<Vec<u8>> {
    vec![
        b"*1\r\n$4\r\nPING\r\n".to_vec(),
        format!(
            "*3\r\n$8\r\nREPLCONF\r\n$14\r\nlistening-port\r\n${}\r\n{}\r\n",
            listening_port.to_string().len(),
            listening_port
        )
        .into_bytes(),
        b"*3\r\n$8\r\nREPLCONF\r\n$4\r\ncapa\r\n$3\r\neof\r\n".to_vec(),
        b"*3\r\n$5\r\nPSYNC\r\n$1\r\n?\r\n$2\r\n-1\r\n".to_vec(),
    ]
}

pub fn write_handshake(stream: &mut impl Write, listening_port: u16) -> std::io::Result<()> {
    for cmd in handshake_commands(listening_port) {
        stream.write_all(&cmd)?;
    }
    Ok(())
}

/// Parses a `+FULLRESYNC <replid> <offset>\r\n` line into its two
/// fields.
pub fn parse_fullresync(line: &[u8]) -> Option<(String, i64)> {
    let text = std::str::from_utf8(line).ok()?;
    let text = text.trim_start_matches('+').trim_end();
    let mut parts = text.split_whitespace();
    if parts.next()? != "FULLRESYNC" {
        return None;
    }
    let replid = parts.next()?.to_string();
    let offset: i64 = parts.next()?.parse().ok()?;
    Some((replid, offset))
}

/// Reads one `\r\n`-terminated line a byte at a time. A `BufReader` would
/// over-read past the handshake replies into the RDB bytes that follow
/// `+FULLRESYNC` on the same stream, so the handshake is read this way
/// instead, leaving the stream positioned exactly at the first RDB byte.
fn read_line(stream: &mut impl Read) -> std::io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte)?;
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            return Ok(line);
        }
    }
}

pub struct ReaderWorker {
    listening_port: u16,
    wake: Sender<()>,
    logger: Logger,
    segments: Arc<SegmentPool>,
}

impl ReaderWorker {
    pub fn new(listening_port: u16, wake: Sender<()>, logger: Logger, segments: Arc<SegmentPool>) -> Self {
        ReaderWorker {
            listening_port,
            wake,
            logger,
            segments,
        }
    }

    /// Copies `bytes` through the segment pool before handing them to
    /// `node` — acquiring a segment, writing as much as it holds,
    /// enqueuing its readable slice, and releasing it back, looping if
    /// `bytes` is larger than one segment. Falls back to enqueuing the
    /// slice directly if the pool is exhausted, so a full pool degrades
    /// to unpooled allocation rather than dropping bytes.
    fn buffer_via_segment(&self, node: &mut SourceNode, bytes: &[u8]) {
        let mut offset = 0;
        while offset < bytes.len() {
            match self.segments.acquire() {
                Ok(mut seg) => {
                    let n = seg.write(&bytes[offset..]);
                    node.enqueue(seg.readable().to_vec());
                    self.segments.release(seg);
                    if n == 0 {
                        node.enqueue(bytes[offset..].to_vec());
                        return;
                    }
                    offset += n;
                }
                Err(_) => {
                    node.enqueue(bytes[offset..].to_vec());
                    return;
                }
            }
        }
    }

    /// Dials `node.addr`, runs the handshake and transitions
    /// `NONE → CONNECTING → TRANSFER`, returning the open stream the
    /// caller continues to poll for RDB and command bytes. The stream is
    /// kept blocking for the handshake itself (replies arrive one at a
    /// time, in order) and only switched to non-blocking once `PSYNC`'s
    /// `+FULLRESYNC` reply has been parsed and the RDB phase begins.
    pub fn connect_master(&self, node: &mut SourceNode) -> Result<TcpStream, EngineError> {
        node.transition(ReplicationState::Connecting);
        let mut stream = TcpStream::connect_timeout(&node.addr, Duration::from_millis(500))
            .map_err(|e| EngineError::source_recoverable("READER", format!("connect failed: {e}")))?;
        write_handshake(&mut stream, self.listening_port)
            .map_err(|e| EngineError::source_recoverable("READER", format!("handshake write failed: {e}")))?;

        // PING, REPLCONF listening-port, REPLCONF capa eof each get a
        // generic one-line reply (+PONG / +OK); only PSYNC's reply needs
        // parsing.
        for _ in 0..3 {
            read_line(&mut stream).map_err(|e| {
                EngineError::source_recoverable("READER", format!("handshake read failed: {e}"))
            })?;
        }
        let psync_reply = read_line(&mut stream).map_err(|e| {
            EngineError::source_recoverable("READER", format!("handshake read failed: {e}"))
        })?;
        let (replid, offset) = parse_fullresync(&psync_reply).ok_or_else(|| {
            EngineError::source_recoverable(
                "READER",
                format!("unexpected PSYNC reply: {}", String::from_utf8_lossy(&psync_reply)),
            )
        })?;
        node.replid = Some(replid);
        node.offset = offset;

        stream
            .set_nonblocking(true)
            .map_err(|e| EngineError::setup("READER", format!("set_nonblocking failed: {e}")))?;
        node.transition(ReplicationState::Transfer);
        node.last_heartbeat = Some(Instant::now());
        Ok(stream)
    }

    /// Non-blocking read of whatever is available on `stream`; on
    /// success, enqueues the bytes onto `node`'s current-state queue and
    /// wakes the writer so the new bytes get parsed promptly.
    pub fn poll_once(&self, node: &mut SourceNode, stream: &mut TcpStream) -> Result<usize, EngineError> {
        let mut buf = [0u8; 4096];
        match stream.read(&mut buf) {
            Ok(0) => {
                node.transition(ReplicationState::Error);
                Err(EngineError::source_recoverable("READER", "source closed connection"))
            }
            Ok(n) => {
                self.buffer_via_segment(node, &buf[..n]);
                node.last_heartbeat = Some(Instant::now());
                let _ = self.wake.send(());
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                node.transition(ReplicationState::Error);
                Err(EngineError::source_recoverable("READER", format!("read error: {e}")))
            }
        }
    }

    /// Transitions a node whose heartbeat has lapsed into `ERROR` so the
    /// next tick re-dials from `NONE`.
    pub fn cron(&self, node: &mut SourceNode) {
        if node.state == ReplicationState::Error {
            node.transition(ReplicationState::None);
            self.logger.info(&format!("{} returned to NONE for re-dial", node.addr), "READER");
            return;
        }
        if let Some(last) = node.last_heartbeat {
            if last.elapsed() > HEARTBEAT_TIMEOUT && node.state != ReplicationState::None {
                self.logger
                    .warn(&format!("{} heartbeat timeout", node.addr), "READER");
                node.transition(ReplicationState::Error);
            }
        }
    }
}

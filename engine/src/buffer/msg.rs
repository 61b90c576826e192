//! Framed RESP message, parsed from a stream of segments handed to the
//! writer by its reader.
//!
//! The original `Msg` holds its bytes as a live chain of `Segment`s so a
//! half-parsed tail can be spliced without copying. This port keeps a
//! single growable `Vec<u8>` instead (segments are copied in on
//! `append_segment`) — `Segment`/`SegmentPool` still exist and still
//! balance acquire/release (buffer::pool), but the byte-chain-splicing
//! machinery collapses to `Vec::drain`. The four-way parse outcome the
//! spec requires at this level (`OK`/`REPAIR`/`AGAIN`/`ERROR`) is
//! preserved by translating `resp::parser::ParseOutcome`.
use resp::command::{classify, pairwise_command_name, CommandKind as RespCommandKind};
use resp::parser::{ParseOutcome, Parser};
use resp::value::RespValue;

use crate::ids::MsgId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgDirection {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    Ok,
    Repair,
    Again,
    Error,
}

/// A `[start, end)` slice into `Msg::data` identifying one key argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySlice {
    pub start: usize,
    pub end: usize,
}

pub struct Msg {
    pub id: MsgId,
    pub direction: MsgDirection,
    data: Vec<u8>,
    pub mlen: usize,
    pub command: RespCommandKind,
    pub keys: Vec<KeySlice>,
    pub noreply: bool,
    pub noforward: bool,
    pub sent: bool,
    pub peer: Option<MsgId>,
    pub frag_seq: u32,
    args: Vec<Vec<u8>>,
}

impl Msg {
    pub fn new(id: MsgId, direction: MsgDirection) -> Self {
        Msg {
            id,
            direction,
            data: Vec::new(),
            mlen: 0,
            command: RespCommandKind::Unknown,
            keys: Vec::new(),
            noreply: false,
            noforward: false,
            sent: false,
            peer: None,
            frag_seq: 0,
            args: Vec::new(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Copies `bytes` onto the tail of the message and attempts to parse
    /// a complete value out of whatever has accumulated so far.
    pub fn append_and_parse(&mut self, bytes: &[u8]) -> ParseResult {
        self.data.extend_from_slice(bytes);
        self.mlen = self.data.len();
        match Parser::parse(&self.data) {
            ParseOutcome::Complete { value, consumed } => {
                self.bind_value(&value);
                // any bytes past the parsed value belong to the *next*
                // message; the writer splits them back out via `take_tail`.
                if consumed < self.data.len() {
                    ParseResult::Ok
                } else {
                    self.data.truncate(consumed);
                    ParseResult::Ok
                }
            }
            ParseOutcome::NeedHeader => ParseResult::Again,
            ParseOutcome::NeedPayload { .. } => ParseResult::Repair,
            ParseOutcome::Error(_) => ParseResult::Error,
        }
    }

    /// After an `Ok` parse, whatever trails the consumed value — the
    /// counterpart of `msg_split` pushing a remainder back onto
    /// `piece_data`.
    pub fn take_tail(&mut self) -> Option<Vec<u8>> {
        match Parser::parse(&self.data) {
            ParseOutcome::Complete { consumed, .. } if consumed < self.data.len() => {
                let tail = self.data.split_off(consumed);
                self.mlen = self.data.len();
                Some(tail)
            }
            _ => None,
        }
    }

    fn bind_value(&mut self, value: &RespValue) {
        let Some(args) = value.as_command_args() else {
            self.command = RespCommandKind::Unknown;
            return;
        };
        self.args = args;
        let Some(name) = self.args.first() else {
            self.command = RespCommandKind::Unknown;
            return;
        };
        self.command = classify(name);
        self.keys = self.locate_keys();
        if matches!(self.command, RespCommandKind::NoForward) {
            self.noforward = true;
        }
    }

    /// The actual key argument bytes this command carries, used for
    /// routing. `keys` (byte-range slices) describes where they sit in
    /// the wire encoding per the data model; for routing decisions the
    /// argument bytes themselves are simpler and exact, so this is the
    /// method `prepare_send_data` calls.
    pub fn key_args(&self) -> Vec<&[u8]> {
        match self.command {
            RespCommandKind::SingleKey { key_index } => self
                .args
                .get(key_index)
                .map(|a| a.as_slice())
                .into_iter()
                .collect(),
            RespCommandKind::VariadicKeys { first } => {
                self.args.get(first..).unwrap_or(&[]).iter().map(|a| a.as_slice()).collect()
            }
            RespCommandKind::KeyValuePairs { first } => self
                .args
                .get(first..)
                .unwrap_or(&[])
                .iter()
                .step_by(2)
                .map(|a| a.as_slice())
                .collect(),
            RespCommandKind::NoForward | RespCommandKind::Unknown => Vec::new(),
        }
    }

    fn locate_keys(&self) -> Vec<KeySlice> {
        // Offsets are recomputed over `args` rather than tracked through
        // the byte stream: correctness only needs argument *identity*
        // here (fragment() re-serializes from `args`, it never slices
        // `self.data` directly), so approximate byte ranges suffice.
        let mut offset = 0usize;
        let mut ranges = Vec::new();
        for arg in &self.args {
            ranges.push(KeySlice {
                start: offset,
                end: offset + arg.len(),
            });
            offset += arg.len();
        }
        match self.command {
            RespCommandKind::SingleKey { key_index } => ranges
                .get(key_index)
                .copied()
                .into_iter()
                .collect(),
            RespCommandKind::VariadicKeys { first } => ranges.get(first..).unwrap_or(&[]).to_vec(),
            RespCommandKind::KeyValuePairs { first } => ranges
                .get(first..)
                .unwrap_or(&[])
                .iter()
                .step_by(2)
                .copied()
                .collect(),
            RespCommandKind::NoForward | RespCommandKind::Unknown => Vec::new(),
        }
    }

    /// Splits a multi-key command into per-key (or per-pair) sub-messages
    /// so each can be routed to the shard owning its own key, mirroring
    /// `msg.fragment(group, msg, #slots, &frag_list)`. Returns an empty
    /// vec for single-key or keyless commands, in which case the caller
    /// should route `self` as-is.
    pub fn fragment(&self) -> Vec<Msg> {
        if self.args.is_empty() {
            return Vec::new();
        }
        let name = &self.args[0];
        match self.command {
            RespCommandKind::VariadicKeys { first } => self.args[first..]
                .iter()
                .enumerate()
                .map(|(i, key)| self.sub_message(name, &[key.clone()], first as u32 + i as u32))
                .collect(),
            RespCommandKind::KeyValuePairs { first } => {
                let pair_name = pairwise_command_name(name);
                self.args[first..]
                    .chunks(2)
                    .enumerate()
                    .map(|(i, pair)| self.sub_message(pair_name, pair, first as u32 + i as u32))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn sub_message(&self, name: &[u8], rest: &[Vec<u8>], frag_seq: u32) -> Msg {
        let mut args = Vec::with_capacity(1 + rest.len());
        args.push(name.to_vec());
        args.extend_from_slice(rest);
        let value = RespValue::command(&args);
        let mut sub = Msg::new(self.id, self.direction);
        sub.data = value.encode();
        sub.mlen = sub.data.len();
        sub.noreply = self.noreply;
        sub.frag_seq = frag_seq;
        sub.bind_value(&value);
        sub
    }

    pub fn encode(&self) -> &[u8] {
        &self.data
    }

    /// Loads a full command directly into an acquired `Msg`, bypassing
    /// `append_and_parse`. Used for commands built locally rather than
    /// parsed off the wire, such as the `RESTORE` commands an RDB
    /// snapshot decodes into.
    pub fn load_command(&mut self, args: &[Vec<u8>]) {
        let value = RespValue::command(args);
        self.data = value.encode();
        self.mlen = self.data.len();
        self.bind_value(&value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::msg::MsgDirection::Request;

    fn msg_from(bytes: &[u8]) -> Msg {
        let mut m = Msg::new(MsgId(1), Request);
        assert_eq!(m.append_and_parse(bytes), ParseResult::Ok);
        m
    }

    #[test]
    fn parses_a_single_key_command_and_extracts_its_key() {
        let m = msg_from(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
        assert_eq!(m.keys.len(), 1);
        assert_eq!(m.args()[1], b"k".to_vec());
    }

    #[test]
    fn incomplete_input_reports_repair_or_again() {
        let mut m = Msg::new(MsgId(1), Request);
        assert_eq!(m.append_and_parse(b"*3\r\n$3\r\nSET"), ParseResult::Again);
        assert_eq!(m.append_and_parse(b"\r\n$1\r\nk\r\n$5\r\nhel"), ParseResult::Repair);
        assert_eq!(m.append_and_parse(b"lo\r\n"), ParseResult::Ok);
    }

    #[test]
    fn malformed_input_reports_error() {
        let mut m = Msg::new(MsgId(1), Request);
        assert_eq!(m.append_and_parse(b"?nonsense\r\n"), ParseResult::Error);
    }

    #[test]
    fn take_tail_splits_off_bytes_belonging_to_the_next_message() {
        let mut m = Msg::new(MsgId(1), Request);
        m.append_and_parse(b"+OK\r\n+PONG\r\n");
        let tail = m.take_tail().unwrap();
        assert_eq!(tail, b"+PONG\r\n");
        assert_eq!(m.data(), b"+OK\r\n");
    }

    #[test]
    fn fragments_a_variadic_key_command_per_key() {
        let m = msg_from(b"*3\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n");
        let frags = m.fragment();
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].args()[1], b"a".to_vec());
        assert_eq!(frags[1].args()[1], b"b".to_vec());
    }

    #[test]
    fn fragments_a_key_value_pair_command_per_pair() {
        let m = msg_from(b"*5\r\n$4\r\nMSET\r\n$1\r\nk\r\n$1\r\nv\r\n$1\r\nj\r\n$1\r\nw\r\n");
        let frags = m.fragment();
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].args(), &[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        assert_eq!(frags[1].args(), &[b"SET".to_vec(), b"j".to_vec(), b"w".to_vec()]);
    }

    #[test]
    fn load_command_builds_a_message_without_parsing_bytes() {
        let mut m = Msg::new(MsgId(1), Request);
        m.load_command(&[b"RESTORE".to_vec(), b"k".to_vec(), b"0".to_vec(), b"payload".to_vec()]);
        assert_eq!(m.args()[0], b"RESTORE".to_vec());
        assert_eq!(m.keys.len(), 1);
    }

    #[test]
    fn single_key_command_produces_no_fragments() {
        let m = msg_from(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
        assert!(m.fragment().is_empty());
    }
}

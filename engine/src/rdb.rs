//! RDB decoding capability.
//!
//! RDB internals are treated as a pluggable capability behind a trait;
//! this module defines the seam the writer calls through and a minimal
//! reader that drives the snapshot phase of every source — whether the
//! bytes arrive over a live `PSYNC` link or are read straight off a
//! configured RDB file — without reimplementing the full RDB opcode set.
use std::io::Read;

use resp::value::RespValue;

use crate::error::EngineError;

/// One decoded key/value pair pulled out of an RDB stream, re-expressed
/// as the `RESTORE key ttl serialized-value` command the writer emits
/// downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdbEntry {
    pub key: Vec<u8>,
    pub serialized_value: Vec<u8>,
}

impl RdbEntry {
    pub fn to_restore_command(&self) -> RespValue {
        RespValue::command(&[
            b"RESTORE".to_vec(),
            self.key.clone(),
            b"0".to_vec(),
            self.serialized_value.clone(),
        ])
    }
}

pub trait RdbReader {
    /// Pulls the next entry out of the stream, or `None` at end-of-file.
    fn next_entry(&mut self) -> Result<Option<RdbEntry>, EngineError>;
}

const RDB_MAGIC: &[u8] = b"REDIS";
const OPCODE_EOF: u8 = 0xFF;

/// Reads the minimal subset of the RDB format this engine needs: the
/// 9-byte header (`REDIS00xx`) followed by a flat run of
/// length-prefixed `(key, value)` pairs and a terminating `0xFF` opcode.
/// Auxiliary fields, expire times, and the non-string value encodings a
/// full RDB parser supports are out of scope here — the writer only
/// needs the key/value pairs to re-emit as `RESTORE` commands.
pub struct SimpleRdbReader<R: Read> {
    source: R,
    header_checked: bool,
    finished: bool,
}

impl<R: Read> SimpleRdbReader<R> {
    pub fn new(source: R) -> Self {
        SimpleRdbReader {
            source,
            header_checked: false,
            finished: false,
        }
    }

    fn check_header(&mut self) -> Result<(), EngineError> {
        let mut magic = [0u8; 9];
        self.source
            .read_exact(&mut magic)
            .map_err(|e| EngineError::parse("RDB", format!("truncated RDB header: {e}")))?;
        if &magic[..5] != RDB_MAGIC {
            return Err(EngineError::parse("RDB", "missing REDIS magic string"));
        }
        self.header_checked = true;
        Ok(())
    }

    fn read_length(&mut self) -> Result<Option<u32>, EngineError> {
        let mut len_buf = [0u8; 4];
        match self.source.read_exact(&mut len_buf) {
            Ok(()) => Ok(Some(u32::from_be_bytes(len_buf))),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(EngineError::parse("RDB", format!("read error: {e}"))),
        }
    }

    fn read_blob(&mut self, len: u32) -> Result<Vec<u8>, EngineError> {
        let mut buf = vec![0u8; len as usize];
        self.source
            .read_exact(&mut buf)
            .map_err(|e| EngineError::parse("RDB", format!("truncated entry: {e}")))?;
        Ok(buf)
    }
}

impl<R: Read> RdbReader for SimpleRdbReader<R> {
    fn next_entry(&mut self) -> Result<Option<RdbEntry>, EngineError> {
        if self.finished {
            return Ok(None);
        }
        if !self.header_checked {
            self.check_header()?;
        }
        let mut opcode = [0u8; 1];
        if self.source.read_exact(&mut opcode).is_err() {
            self.finished = true;
            return Ok(None);
        }
        if opcode[0] == OPCODE_EOF {
            self.finished = true;
            return Ok(None);
        }

        let key_len = match self.read_length()? {
            Some(n) => n,
            None => {
                self.finished = true;
                return Ok(None);
            }
        };
        let key = self.read_blob(key_len)?;
        let value_len = self
            .read_length()?
            .ok_or_else(|| EngineError::parse("RDB", "truncated entry: missing value length"))?;
        let serialized_value = self.read_blob(value_len)?;
        Ok(Some(RdbEntry {
            key,
            serialized_value,
        }))
    }
}

/// Writes entries in the same flat format `SimpleRdbReader` expects,
/// used by tests to build fixtures without a real Redis dump.
pub fn encode_fixture(entries: &[RdbEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"REDIS0011");
    for entry in entries {
        out.push(0x00);
        out.extend_from_slice(&(entry.key.len() as u32).to_be_bytes());
        out.extend_from_slice(&entry.key);
        out.extend_from_slice(&(entry.serialized_value.len() as u32).to_be_bytes());
        out.extend_from_slice(&entry.serialized_value);
    }
    out.push(OPCODE_EOF);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_every_entry_then_reports_end_of_file() {
        let entries = vec![
            RdbEntry {
                key: b"k1".to_vec(),
                serialized_value: b"v1".to_vec(),
            },
            RdbEntry {
                key: b"k2".to_vec(),
                serialized_value: b"v2".to_vec(),
            },
        ];
        let bytes = encode_fixture(&entries);
        let mut reader = SimpleRdbReader::new(Cursor::new(bytes));
        assert_eq!(reader.next_entry().unwrap(), Some(entries[0].clone()));
        assert_eq!(reader.next_entry().unwrap(), Some(entries[1].clone()));
        assert_eq!(reader.next_entry().unwrap(), None);
    }

    #[test]
    fn rejects_a_stream_missing_the_redis_magic() {
        let mut reader = SimpleRdbReader::new(Cursor::new(b"NOTREDIS!".to_vec()));
        assert!(reader.next_entry().is_err());
    }

    #[test]
    fn restore_command_carries_key_and_value() {
        let entry = RdbEntry {
            key: b"k".to_vec(),
            serialized_value: b"payload".to_vec(),
        };
        let cmd = entry.to_restore_command();
        let args = cmd.as_command_args().unwrap();
        assert_eq!(args[0], b"RESTORE");
        assert_eq!(args[1], b"k");
        assert_eq!(args[3], b"payload");
    }
}

//! Byte-oriented RESP value model.
//!
//! Unlike the RESP types this crate began as a sibling of (built on
//! `String`, one struct per wire type), migration traffic is framed from
//! raw segments arriving off a socket, so `RespValue` is built directly
//! over `Vec<u8>` and carries only the variants the replication stream and
//! target protocol actually use.

/// Maximum accepted length for a bulk string payload, mirroring Redis'
/// own `proto-max-bulk-len` default.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

pub const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(Vec<u8>),
    Error(Vec<u8>),
    Integer(i64),
    BulkString(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString(b"OK".to_vec())
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null_bulk() -> Self {
        RespValue::BulkString(None)
    }

    pub fn error(message: impl Into<Vec<u8>>) -> Self {
        RespValue::Error(message.into())
    }

    /// Builds the `*N\r\n$len\r\narg\r\n...` encoding of a command made of
    /// plain bulk-string arguments, the shape every replicated write and
    /// every command this engine issues to a target takes.
    pub fn command(args: &[impl AsRef<[u8]>]) -> Self {
        RespValue::Array(Some(
            args.iter()
                .map(|a| RespValue::bulk(a.as_ref().to_vec()))
                .collect(),
        ))
    }

    /// Serializes this value to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s);
                out.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s);
                out.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(CRLF);
            }
            RespValue::BulkString(None) => {
                out.extend_from_slice(b"$-1\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                out.push(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                out.extend_from_slice(data);
                out.extend_from_slice(CRLF);
            }
            RespValue::Array(None) => {
                out.extend_from_slice(b"*-1\r\n");
            }
            RespValue::Array(Some(items)) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }

    /// Extracts the bulk-string arguments of a command array, lower-cased
    /// for the first argument (the command name), leaving the rest as-is.
    /// Returns `None` for anything that is not a well-formed command
    /// array (all elements bulk strings).
    pub fn as_command_args(&self) -> Option<Vec<Vec<u8>>> {
        let RespValue::Array(Some(items)) = self else {
            return None;
        };
        items
            .iter()
            .map(|v| match v {
                RespValue::BulkString(Some(data)) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_set_command() {
        let cmd = RespValue::command(&["SET", "k", "v"]);
        assert_eq!(cmd.encode(), b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n".to_vec());
    }

    #[test]
    fn encodes_simple_reply_kinds() {
        assert_eq!(RespValue::ok().encode(), b"+OK\r\n".to_vec());
        assert_eq!(RespValue::Integer(42).encode(), b":42\r\n".to_vec());
        assert_eq!(RespValue::null_bulk().encode(), b"$-1\r\n".to_vec());
        assert_eq!(
            RespValue::error("ERR bad").encode(),
            b"-ERR bad\r\n".to_vec()
        );
    }

    #[test]
    fn round_trips_command_args() {
        let cmd = RespValue::command(&["MSET", "a", "1", "b", "2"]);
        let args = cmd.as_command_args().unwrap();
        assert_eq!(args, vec![b"MSET".to_vec(), b"a".to_vec(), b"1".to_vec(), b"b".to_vec(), b"2".to_vec()]);
    }
}

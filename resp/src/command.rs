//! Command classification used to decide whether a parsed request needs
//! fragmentation across target shards, and whether it should reach the
//! target at all.
//!
//! Every command is named as a `CMD_*` string constant; this module
//! adds the one extra bit of information the writer needs that a
//! single node never did: how a command's keys partition across
//! shards.

pub const CMD_SET: &str = "SET";
pub const CMD_GET: &str = "GET";
pub const CMD_DEL: &str = "DEL";
pub const CMD_MSET: &str = "MSET";
pub const CMD_MGET: &str = "MGET";
pub const CMD_EXPIRE: &str = "EXPIRE";
pub const CMD_RESTORE: &str = "RESTORE";
pub const CMD_SELECT: &str = "SELECT";
pub const CMD_PING: &str = "PING";
pub const CMD_REPLCONF: &str = "REPLCONF";
pub const CMD_PSYNC: &str = "PSYNC";
pub const CMD_PUBLISH: &str = "PUBLISH";
pub const CMD_SETNX: &str = "SETNX";

/// How a command's keys are laid out in its argument list, which in turn
/// decides how `engine::writer::fragment` splits it across shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Exactly one key, at a fixed argument position (`SET`, `GET`,
    /// `EXPIRE`, `RESTORE`, ...). No fragmentation needed.
    SingleKey { key_index: usize },
    /// Keys are every argument from `first` to the end (`DEL key...`,
    /// `MGET key...`). Fragments into one sub-command per target slot,
    /// each carrying only the keys routed to that slot.
    VariadicKeys { first: usize },
    /// Keys and values alternate from `first` (`MSET k1 v1 k2 v2 ...`).
    /// Fragments the same way as `VariadicKeys` but keeps key/value pairs
    /// together.
    KeyValuePairs { first: usize },
    /// Not a data command the target needs to see at all (`SELECT`,
    /// `PING`, `REPLCONF`, `PSYNC`): `noforward`.
    NoForward,
    /// Anything else observed in the stream: routed on no key (first key
    /// missing means the writer cannot shard it), forwarded verbatim to
    /// every node in `SINGLE`/`RDBFILE` groups and treated as an error in
    /// `CLUSTER` groups since there is no way to pick a shard.
    Unknown,
}

/// Classifies a command by its uppercased name, returning a
/// `CommandKind` rather than dispatching a handler directly.
pub fn classify(name: &[u8]) -> CommandKind {
    let upper = name.to_ascii_uppercase();
    match upper.as_slice() {
        b"SET" | b"GETDEL" | b"APPEND" | b"STRLEN" | b"INCR" | b"DECR" | b"GET" | b"EXPIRE"
        | b"PERSIST" | b"TTL" | b"PTTL" | b"TYPE" | b"RESTORE" | b"DUMP" | b"LPUSH" | b"RPUSH"
        | b"LLEN" | b"LRANGE" | b"SADD" | b"SMEMBERS" | b"SISMEMBER" => {
            CommandKind::SingleKey { key_index: 1 }
        }
        b"DEL" | b"UNLINK" | b"MGET" | b"EXISTS" | b"TOUCH" => {
            CommandKind::VariadicKeys { first: 1 }
        }
        b"MSET" | b"MSETNX" => CommandKind::KeyValuePairs { first: 1 },
        b"SELECT" | b"PING" | b"REPLCONF" | b"PSYNC" | b"HELLO" | b"AUTH" => {
            CommandKind::NoForward
        }
        _ => CommandKind::Unknown,
    }
}

/// The single-pair command name a `KeyValuePairs` command fragments
/// into: `MSET k1 v1 k2 v2` fragments into `SET k1 v1` / `SET k2 v2`,
/// not two `MSET` calls, since each fragment only carries one pair.
pub fn pairwise_command_name(name: &[u8]) -> &'static [u8] {
    match name.to_ascii_uppercase().as_slice() {
        b"MSET" => CMD_SET.as_bytes(),
        b"MSETNX" => CMD_SETNX.as_bytes(),
        _ => CMD_SET.as_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairwise_command_name_maps_mset_to_set() {
        assert_eq!(pairwise_command_name(b"MSET"), b"SET");
        assert_eq!(pairwise_command_name(b"mset"), b"SET");
    }

    #[test]
    fn pairwise_command_name_maps_msetnx_to_setnx() {
        assert_eq!(pairwise_command_name(b"MSETNX"), b"SETNX");
    }

    #[test]
    fn classifies_set_as_single_key() {
        assert_eq!(classify(b"SET"), CommandKind::SingleKey { key_index: 1 });
        assert_eq!(classify(b"set"), CommandKind::SingleKey { key_index: 1 });
    }

    #[test]
    fn classifies_del_and_mget_as_variadic() {
        assert_eq!(classify(b"DEL"), CommandKind::VariadicKeys { first: 1 });
        assert_eq!(classify(b"MGET"), CommandKind::VariadicKeys { first: 1 });
    }

    #[test]
    fn classifies_mset_as_key_value_pairs() {
        assert_eq!(classify(b"MSET"), CommandKind::KeyValuePairs { first: 1 });
    }

    #[test]
    fn classifies_meta_commands_as_noforward() {
        assert_eq!(classify(b"SELECT"), CommandKind::NoForward);
        assert_eq!(classify(b"PING"), CommandKind::NoForward);
    }
}

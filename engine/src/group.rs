//! Target topology and slot routing.
//!
//! Keys hash to a cluster slot with the same crc16/16384 scheme a single
//! node uses to own its own keyspace (`resp::crc16`); this module builds
//! a table of `TargetId`s spanning however many nodes the group actually
//! has, instead of a single owner.
use std::net::SocketAddr;

use resp::crc16::{key_slot, TOTAL_SLOTS};

use crate::ids::TargetId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    Single,
    Cluster,
    RdbFile,
}

/// A target-side topology: either one node, a full 16384-slot cluster
/// table, or a bare RDB file sink that accepts everything.
#[derive(Debug, Clone)]
pub enum Group {
    Single {
        target: TargetId,
    },
    Cluster {
        slots: Vec<TargetId>,
    },
    RdbFile {
        target: TargetId,
    },
}

impl Group {
    pub fn single(target: TargetId) -> Self {
        Group::Single { target }
    }

    pub fn rdb_file(target: TargetId) -> Self {
        Group::RdbFile { target }
    }

    /// Builds an evenly-striped slot table across `targets`, in the
    /// absence of live `CLUSTER SLOTS` topology data (deployed once at
    /// startup from the configured target address list).
    pub fn cluster_even(targets: &[TargetId]) -> Result<Self, String> {
        if targets.is_empty() {
            return Err("cluster group requires at least one target".to_string());
        }
        let mut slots = Vec::with_capacity(TOTAL_SLOTS as usize);
        for slot in 0..TOTAL_SLOTS {
            let owner = targets[(slot as usize) % targets.len()];
            slots.push(owner);
        }
        Ok(Group::Cluster { slots })
    }

    pub fn kind(&self) -> GroupKind {
        match self {
            Group::Single { .. } => GroupKind::Single,
            Group::Cluster { .. } => GroupKind::Cluster,
            Group::RdbFile { .. } => GroupKind::RdbFile,
        }
    }

    /// Resolves which target owns `key`. Always succeeds for `Single` and
    /// `RdbFile` groups; for `Cluster` groups the slot table is always
    /// fully populated by `cluster_even`, so this never returns `None` in
    /// practice, but callers should still treat it as fallible — "no
    /// backend owns this key" is a routing error, not a panic.
    pub fn route(&self, key: &[u8]) -> Option<TargetId> {
        match self {
            Group::Single { target } | Group::RdbFile { target } => Some(*target),
            Group::Cluster { slots } => slots.get(key_slot(key) as usize).copied(),
        }
    }

    /// All distinct targets reachable through this group, in stable
    /// order, for fanning out multi-key commands across shards.
    pub fn targets(&self) -> Vec<TargetId> {
        match self {
            Group::Single { target } | Group::RdbFile { target } => vec![*target],
            Group::Cluster { slots } => {
                let mut seen = Vec::new();
                for t in slots {
                    if !seen.contains(t) {
                        seen.push(*t);
                    }
                }
                seen
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetEndpoint {
    pub id: TargetId,
    pub addr: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_group_routes_every_key_to_the_same_target() {
        let g = Group::single(TargetId(1));
        assert_eq!(g.route(b"foo"), Some(TargetId(1)));
        assert_eq!(g.route(b"bar"), Some(TargetId(1)));
        assert_eq!(g.targets(), vec![TargetId(1)]);
    }

    #[test]
    fn cluster_group_distributes_across_all_targets() {
        let targets = vec![TargetId(1), TargetId(2), TargetId(3)];
        let g = Group::cluster_even(&targets).unwrap();
        assert_eq!(g.targets().len(), 3);
        // every key resolves to one of the configured targets
        for key in [b"a".as_slice(), b"b", b"long-key-name", b"{tag}suffix"] {
            assert!(targets.contains(&g.route(key).unwrap()));
        }
    }

    #[test]
    fn hash_tagged_keys_collide_onto_the_same_target() {
        let targets = vec![TargetId(1), TargetId(2), TargetId(3), TargetId(4)];
        let g = Group::cluster_even(&targets).unwrap();
        let a = g.route(b"{user1000}.following").unwrap();
        let b = g.route(b"{user1000}.followers").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cluster_group_rejects_empty_target_list() {
        assert!(Group::cluster_even(&[]).is_err());
    }
}

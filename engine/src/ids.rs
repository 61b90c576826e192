//! Integer/opaque identifiers standing in for a pointer graph: every
//! cross-structure reference in this crate is one of the ids below,
//! resolved through the orchestrator's arenas rather than followed
//! directly.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

id_type!(SourceId);
id_type!(TargetId);
id_type!(ReaderId);
id_type!(WriterId);
id_type!(MsgId);

/// Monotonic id generator, one per id kind: migration-engine ids only
/// need to be unique within one process run, so a counter is simpler
/// and trivially testable than a random-id scheme.
#[derive(Debug, Default)]
pub struct IdGen(AtomicU64);

impl IdGen {
    pub const fn new() -> Self {
        IdGen(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

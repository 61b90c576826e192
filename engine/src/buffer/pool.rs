//! Segment and message pools.
//!
//! A free-list of pre-sized segments, handed out on `acquire` and
//! returned on an explicit `release` call rather than `Drop`, so pool
//! hand-back stays an observable step a test can assert on —
//! acquire/release balance after a clean shutdown.
use std::sync::Mutex;

use crate::buffer::msg::{Msg, MsgDirection};
use crate::buffer::segment::Segment;
use crate::error::EngineError;
use crate::ids::{IdGen, MsgId};

pub struct SegmentPool {
    segment_size: usize,
    free: Mutex<Vec<Segment>>,
    capacity: usize,
    outstanding: Mutex<usize>,
}

impl SegmentPool {
    pub fn new(segment_size: usize, capacity: usize) -> Self {
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(Segment::with_capacity(segment_size));
        }
        SegmentPool {
            segment_size,
            free: Mutex::new(free),
            capacity,
            outstanding: Mutex::new(0),
        }
    }

    pub fn acquire(&self) -> Result<Segment, EngineError> {
        let mut free = self.free.lock().expect("segment pool mutex poisoned");
        match free.pop() {
            Some(seg) => {
                *self.outstanding.lock().unwrap() += 1;
                Ok(seg)
            }
            None => Err(EngineError::pool_exhausted("SEGMENT-POOL")),
        }
    }

    pub fn release(&self, mut segment: Segment) {
        segment.reset();
        self.free.lock().expect("segment pool mutex poisoned").push(segment);
        let mut outstanding = self.outstanding.lock().unwrap();
        *outstanding = outstanding.saturating_sub(1);
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of segments currently checked out; must be zero after a
    /// clean shutdown.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.lock().unwrap()
    }
}

/// Id-issuing counterpart to `SegmentPool` for `Msg`s: unlike segments,
/// messages are not pre-allocated (their size is unbounded), so this is
/// just a shared id generator plus a live count, mirroring the intent of
/// `msg_get`/`msg_put` without pretending messages are fixed-size.
pub struct MsgPool {
    ids: IdGen,
    outstanding: Mutex<usize>,
}

impl MsgPool {
    pub fn new() -> Self {
        MsgPool {
            ids: IdGen::new(),
            outstanding: Mutex::new(0),
        }
    }

    pub fn acquire(&self, direction: MsgDirection) -> Msg {
        *self.outstanding.lock().unwrap() += 1;
        Msg::new(MsgId(self.ids.next()), direction)
    }

    pub fn release(&self, _msg: Msg) {
        let mut outstanding = self.outstanding.lock().unwrap();
        *outstanding = outstanding.saturating_sub(1);
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.lock().unwrap()
    }
}

impl Default for MsgPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_are_balanced() {
        let pool = SegmentPool::new(64, 4);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.outstanding(), 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn exhausted_pool_reports_pool_exhausted_error() {
        let pool = SegmentPool::new(64, 1);
        let _held = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::PoolExhausted);
    }

    #[test]
    fn released_segment_is_reset_before_reuse() {
        let pool = SegmentPool::new(8, 1);
        let mut seg = pool.acquire().unwrap();
        seg.write(b"abc");
        pool.release(seg);
        let reused = pool.acquire().unwrap();
        assert!(reused.is_empty());
    }

    #[test]
    fn msg_pool_tracks_outstanding_messages() {
        let pool = MsgPool::new();
        let msg = pool.acquire(MsgDirection::Request);
        assert_eq!(pool.outstanding(), 1);
        pool.release(msg);
        assert_eq!(pool.outstanding(), 0);
    }
}

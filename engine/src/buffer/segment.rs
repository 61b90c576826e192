//! Fixed-capacity byte segment, the unit of cross-thread transfer between
//! a reader's socket read and a writer's parser.
//!
//! A flat buffer with a read cursor (`pos`) and write cursor (`last`);
//! `empty` iff `pos == last`, `full` iff `last == capacity`.

#[derive(Debug)]
pub struct Segment {
    data: Box<[u8]>,
    pos: usize,
    last: usize,
}

impl Segment {
    pub fn with_capacity(capacity: usize) -> Self {
        Segment {
            data: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
            last: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn last(&self) -> usize {
        self.last
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.last
    }

    pub fn is_full(&self) -> bool {
        self.last == self.capacity()
    }

    /// Unread bytes between `pos` and `last`.
    pub fn readable(&self) -> &[u8] {
        &self.data[self.pos..self.last]
    }

    /// Writable room between `last` and the segment's end.
    pub fn free(&self) -> usize {
        self.capacity() - self.last
    }

    /// Appends `bytes`, truncated to whatever room remains; returns the
    /// number of bytes actually copied.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.free());
        self.data[self.last..self.last + n].copy_from_slice(&bytes[..n]);
        self.last += n;
        n
    }

    /// Advances the read cursor by `n` bytes (caps at `last`).
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.last);
    }

    /// Resets both cursors to zero, as done by the pool before an
    /// acquired segment is handed back out.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.last = 0;
    }

    /// Splits this segment at absolute offset `at` (measured from the
    /// start of the buffer, not from `pos`): truncates `self.last` to
    /// `at` and returns a brand-new segment of the same capacity holding
    /// the `[at, last)` tail, preserving total byte content across both
    /// halves (spec property: `msg_split` idempotence).
    pub fn split_at(&mut self, at: usize) -> Segment {
        assert!(at <= self.last, "split point beyond written data");
        let mut tail = Segment::with_capacity(self.capacity());
        let tail_len = self.last - at;
        tail.data[..tail_len].copy_from_slice(&self.data[at..self.last]);
        tail.last = tail_len;
        tail.pos = self.pos.saturating_sub(at);
        self.last = at;
        if self.pos > at {
            self.pos = at;
        }
        tail
    }
}

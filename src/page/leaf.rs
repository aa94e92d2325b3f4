use super::node::{peek_next, peek_size, NodeHeaderView, NODE_HEADER_SIZE};
use super::{PageId, INVALID_PAGE_ID};
use crate::key::{Key, Value, KEY_SIZE};

const SLOT_SIZE: usize = KEY_SIZE + 8;

/// Safe typed view over a leaf page's bytes: the common node header plus a
/// packed array of `(Key, Value)` slots in ascending key order. Slots
/// `[size..capacity)` are expected to stay zeroed; callers that shrink
/// `size` must zero the vacated slots themselves (see `Tree::delete`).
pub struct LeafView<'a> {
    header: NodeHeaderView<'a>,
    body: &'a mut [u8],
    capacity: usize,
}

impl<'a> LeafView<'a> {
    pub fn new(buf: &'a mut [u8], capacity: usize) -> Self {
        let (header_buf, body) = buf.split_at_mut(NODE_HEADER_SIZE);
        Self {
            header: NodeHeaderView::new(header_buf),
            body,
            capacity,
        }
    }

    pub fn format(buf: &'a mut [u8], capacity: usize) -> Self {
        let mut view = Self::new(buf, capacity);
        view.header.set_is_leaf(true);
        view.header.set_is_deleted(false);
        view.header.set_level(0);
        view.header.set_size(0);
        view.header.set_next(INVALID_PAGE_ID);
        view
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.header.size() as usize
    }

    pub fn set_size(&mut self, size: usize) {
        self.header.set_size(size as u32);
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    pub fn next(&self) -> PageId {
        self.header.next()
    }

    pub fn set_next(&mut self, next: PageId) {
        self.header.set_next(next);
    }

    pub fn is_deleted(&self) -> bool {
        self.header.is_deleted()
    }

    pub fn mark_deleted(&mut self) {
        self.header.set_is_deleted(true);
    }

    fn slot_offset(&self, index: usize) -> usize {
        index * SLOT_SIZE
    }

    pub fn key_at(&self, index: usize) -> Key {
        let off = self.slot_offset(index);
        Key::from_bytes(&self.body[off..off + KEY_SIZE])
    }

    pub fn value_at(&self, index: usize) -> Value {
        let off = self.slot_offset(index) + KEY_SIZE;
        Value::from_le_bytes(self.body[off..off + 8].try_into().unwrap())
    }

    pub fn set_slot(&mut self, index: usize, key: Key, value: Value) {
        let off = self.slot_offset(index);
        key.write_to(&mut self.body[off..off + KEY_SIZE]);
        self.body[off + KEY_SIZE..off + SLOT_SIZE].copy_from_slice(&value.to_le_bytes());
    }

    fn zero_slot(&mut self, index: usize) {
        let off = self.slot_offset(index);
        self.body[off..off + SLOT_SIZE].fill(0);
    }

    /// Binary search over the live slots for `key`. `Ok(i)` on an exact
    /// match, `Err(i)` for the insertion point that keeps ordering.
    pub fn find(&self, key: Key) -> Result<usize, usize> {
        let size = self.size();
        let mut lo = 0usize;
        let mut hi = size;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid).cmp(&key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Shifts slots `[index..size)` one to the right, writes `(key, value)`
    /// at `index`, and bumps `size`. Caller must have already checked
    /// `!is_full()`.
    pub fn insert_at(&mut self, index: usize, key: Key, value: Value) {
        let size = self.size();
        debug_assert!(size < self.capacity);
        for i in (index..size).rev() {
            let (k, v) = (self.key_at(i), self.value_at(i));
            self.set_slot(i + 1, k, v);
        }
        self.set_slot(index, key, value);
        self.set_size(size + 1);
    }

    /// Shifts slots `(index..size)` one to the left over `index`, zeroes the
    /// vacated final slot, and decrements `size`.
    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);
        for i in index..size - 1 {
            let (k, v) = (self.key_at(i + 1), self.value_at(i + 1));
            self.set_slot(i, k, v);
        }
        self.zero_slot(size - 1);
        self.set_size(size - 1);
    }

    /// Moves slots `[split_at..size)` into `right`, zeroes the vacated
    /// slots here, and shrinks this view's `size` to `split_at`. Used for
    /// both leaf splits (moving the right half out) and borrow/merge
    /// (moving one slot or the whole tail).
    pub fn move_tail_to(&mut self, split_at: usize, right: &mut LeafView) {
        let size = self.size();
        let mut dst = right.size();
        for i in split_at..size {
            let (k, v) = (self.key_at(i), self.value_at(i));
            right.set_slot(dst, k, v);
            dst += 1;
        }
        right.set_size(dst);
        for i in split_at..size {
            self.zero_slot(i);
        }
        self.set_size(split_at);
    }

}

/// Shared-borrow counterpart to `LeafView` for read-only traversal
/// (`Tree::search`, `Tree::iter`) — holds the buffer pool's read lock on
/// its frame instead of the write lock `LeafView` needs.
pub struct LeafReader<'a> {
    buf: &'a [u8],
    capacity: usize,
}

impl<'a> LeafReader<'a> {
    pub fn new(buf: &'a [u8], capacity: usize) -> Self {
        Self { buf, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        peek_size(self.buf)
    }

    pub fn next(&self) -> PageId {
        peek_next(self.buf)
    }

    fn slot_offset(&self, index: usize) -> usize {
        NODE_HEADER_SIZE + index * SLOT_SIZE
    }

    pub fn key_at(&self, index: usize) -> Key {
        let off = self.slot_offset(index);
        Key::from_bytes(&self.buf[off..off + KEY_SIZE])
    }

    pub fn value_at(&self, index: usize) -> Value {
        let off = self.slot_offset(index) + KEY_SIZE;
        Value::from_le_bytes(self.buf[off..off + 8].try_into().unwrap())
    }

    /// Same semantics as `LeafView::find`.
    pub fn find(&self, key: Key) -> Result<usize, usize> {
        let size = self.size();
        let mut lo = 0usize;
        let mut hi = size;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid).cmp(&key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }
}

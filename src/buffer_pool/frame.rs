use crate::page::{PageId, INVALID_PAGE_ID};

use super::replacer::FrameId;

/// Bookkeeping for one pool slot: identity, pin count, dirty bit. Lives in
/// `BufferPool::inner` behind the coarse pool mutex, alongside the page
/// table, free list, and replacer — mirroring `spec.md` §4.C's "one coarse
/// mutex guarding the page table, free list, and replacer".
///
/// The frame's actual bytes live in `BufferPool::bufs[frame_id]`, a
/// separate `RwLock<PageBuf>` not guarded by the coarse mutex, so disk I/O
/// on a frame's content can run after the coarse lock has been released
/// (`spec.md` §4.C's concurrency contract: "I/O happens outside the coarse
/// lock, holding only the per-frame write lock").
#[derive(Debug)]
pub struct FrameMeta {
    pub id: FrameId,
    pub page_id: PageId,
    pub pin_count: u32,
    pub dirty: bool,
}

impl FrameMeta {
    pub fn new(id: FrameId) -> Self {
        Self {
            id,
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            dirty: false,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    pub fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.dirty = false;
    }
}

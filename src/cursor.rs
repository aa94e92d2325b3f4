use std::collections::HashMap;

use crate::buffer_pool::BufferPool;
use crate::page::PageId;
use anyhow::Result;

/// `(node, child_index_in_parent)` recorded during downward search and
/// consumed during upward split/merge propagation. Grounded on
/// `examples/original_source/bt2/bt.go`'s `breadCrumb` / `tx.breadCrumbs`
/// — the direct ancestor of this type.
#[derive(Debug, Clone, Copy)]
pub struct Breadcrumb {
    pub page_id: PageId,
    pub child_index: usize,
}

/// Per-operation bookkeeping: the breadcrumb stack built by descent and
/// unwound during propagation, plus the set of pages to unpin/flush once
/// the operation finishes. Grounded on the Go prototype's `tx` type
/// (`breadCrumbs`, `tobeCleaned`, `tobeFlushed`, `popNext`, `addUnpin`,
/// `addFlush`), with one deliberate improvement noted in `spec.md` §9:
/// the Go cleanup unconditionally unpins every tracked page as dirty
/// (`bpm.UnpinPage(int(pageID), true)`); this cursor instead remembers
/// per-page whether a write was actually observed, so read-only
/// traversals (`search`, `iter`) don't force spurious eviction writes.
///
/// Every top-level tree operation (`insert`/`delete`/`search`) is
/// structured so every exit path — success, logical error, or a
/// propagated I/O error — calls `finish()` exactly once. This is a plain
/// method rather than a `Drop` impl: draining can itself need to take the
/// buffer pool's lock and propagate an `Err` from `flush_page`, which a
/// `Drop` impl cannot do without silently swallowing it.
#[derive(Debug, Default)]
pub struct Cursor {
    breadcrumbs: Vec<Breadcrumb>,
    to_unpin: HashMap<PageId, bool>,
    to_flush: Vec<PageId>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pinned page for release at `finish()`. Idempotent;
    /// called once per `new_page`/`fetch_page` a tree operation performs,
    /// whether or not it also becomes a breadcrumb.
    pub fn track(&mut self, page_id: PageId) {
        self.to_unpin.entry(page_id).or_insert(false);
    }

    /// Marks a tracked page as having been written through, so `finish()`
    /// unpins it dirty. Also tracks the page if this is the first mention
    /// of it (e.g. a freshly allocated sibling that was never pushed as a
    /// breadcrumb).
    pub fn mark_dirty(&mut self, page_id: PageId) {
        self.to_unpin.insert(page_id, true);
    }

    /// Pushes a node onto the breadcrumb stack during descent and tracks
    /// it for unpinning. `child_index` is the index in the *parent* at
    /// which this node is referenced (used to rederive sibling/separator
    /// positions during delete-side rebalance, per `spec.md` §9's note to
    /// avoid the source's index-variable reuse bugs).
    pub fn push(&mut self, page_id: PageId, child_index: usize) {
        self.track(page_id);
        self.breadcrumbs.push(Breadcrumb {
            page_id,
            child_index,
        });
    }

    /// Pops the innermost breadcrumb (the one nearest the leaf) during
    /// upward propagation. The page stays pinned — it's already tracked
    /// for unpin at `finish()` — this just removes it from the stack so
    /// propagation can continue to the next ancestor.
    pub fn pop(&mut self) -> Option<Breadcrumb> {
        self.breadcrumbs.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.breadcrumbs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.breadcrumbs.len()
    }

    /// Schedules `page_id` to be flushed (in addition to unpinned) at
    /// `finish()` — used when the header page's `root_pgid` changes.
    pub fn flush(&mut self, page_id: PageId) {
        self.to_flush.push(page_id);
    }

    /// Releases every tracked pin (dirty-marking pages that were
    /// written) and flushes every page scheduled for flush. Called
    /// exactly once, at every exit point of a top-level tree operation.
    pub fn finish(self, pool: &BufferPool) -> Result<()> {
        for (page_id, dirty) in self.to_unpin {
            pool.unpin_page(page_id, dirty);
        }
        for page_id in self.to_flush {
            pool.flush_page(page_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_preserves_lifo_order() {
        let mut cursor = Cursor::new();
        cursor.push(1, 0);
        cursor.push(2, 1);
        cursor.push(3, 0);

        assert_eq!(cursor.pop().unwrap().page_id, 3);
        assert_eq!(cursor.pop().unwrap().page_id, 2);
        assert_eq!(cursor.pop().unwrap().page_id, 1);
        assert!(cursor.pop().is_none());
    }

    #[test]
    fn mark_dirty_tracks_even_if_never_pushed() {
        let mut cursor = Cursor::new();
        cursor.mark_dirty(7);
        assert_eq!(cursor.to_unpin.get(&7), Some(&true));
    }

    #[test]
    fn track_does_not_override_existing_dirty_flag() {
        let mut cursor = Cursor::new();
        cursor.mark_dirty(7);
        cursor.track(7);
        assert_eq!(cursor.to_unpin.get(&7), Some(&true));
    }
}

use super::PageId;

/// Offsets within the 32-byte header page (page id 0). Distinct from the
/// tree node header in `node.rs` — the header page never holds a node.
const FLAGS_OFFSET: usize = 0;
const ROOT_PGID_OFFSET: usize = 8;
const NODE_SIZE_OFFSET: usize = 16;

pub const INIT_FLAG: u64 = 1 << 0;

/// Typed view over the database header page's byte buffer.
pub struct HeaderView<'a> {
    buf: &'a mut [u8],
}

impl<'a> HeaderView<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    pub fn flags(&self) -> u64 {
        u64::from_le_bytes(self.buf[FLAGS_OFFSET..FLAGS_OFFSET + 8].try_into().unwrap())
    }

    pub fn set_flags(&mut self, flags: u64) {
        self.buf[FLAGS_OFFSET..FLAGS_OFFSET + 8].copy_from_slice(&flags.to_le_bytes());
    }

    pub fn is_init(&self) -> bool {
        self.flags() & INIT_FLAG != 0
    }

    pub fn set_init(&mut self) {
        let flags = self.flags() | INIT_FLAG;
        self.set_flags(flags);
    }

    pub fn root_pgid(&self) -> PageId {
        PageId::from_le_bytes(
            self.buf[ROOT_PGID_OFFSET..ROOT_PGID_OFFSET + 8]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_root_pgid(&mut self, pgid: PageId) {
        self.buf[ROOT_PGID_OFFSET..ROOT_PGID_OFFSET + 8].copy_from_slice(&pgid.to_le_bytes());
    }

    pub fn node_size(&self) -> u32 {
        u32::from_le_bytes(
            self.buf[NODE_SIZE_OFFSET..NODE_SIZE_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_node_size(&mut self, node_size: u32) {
        self.buf[NODE_SIZE_OFFSET..NODE_SIZE_OFFSET + 4].copy_from_slice(&node_size.to_le_bytes());
    }
}

/// Read-only peek at `root_pgid`, usable from a shared `&[u8]` borrow (no
/// `HeaderView` construction, which requires `&mut`). Descending readers
/// (`search`/`iter`) use this to stay on the buffer pool's read lock
/// instead of the write lock `HeaderView` requires.
pub fn peek_root_pgid(buf: &[u8]) -> PageId {
    PageId::from_le_bytes(
        buf[ROOT_PGID_OFFSET..ROOT_PGID_OFFSET + 8]
            .try_into()
            .unwrap(),
    )
}

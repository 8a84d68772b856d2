//! Shared constants: page layout, thresholds, checkpoint defaults.
//!
//! Centralized in one module rather than scattered as magic numbers across the files
//! that use them.

/// Default page size in bytes. The only size this engine creates databases with;
/// `PRAGMA page_size`-style negotiation is not supported.
pub const PAGE_SIZE: usize = 4096;

/// Page 1 is always the database header page.
pub const HEADER_PAGE_ID: u32 = 1;

/// Bytes of the fixed header layout (magic..crc32c), padded out to fit in page 1.
pub const HEADER_SIZE: usize = 64;

pub const FILE_MAGIC: &[u8; 4] = b"DYDB";
pub const FORMAT_VERSION: u16 = 1;

/// Cache slots held in memory by the pager before eviction kicks in.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Cells/rows whose encoded value exceeds this many bytes are considered for compression.
pub const COMPRESS_THRESHOLD: usize = 64;
/// A compressed payload must save at least this fraction of its original size to be kept
/// compressed-inline rather than written back out uncompressed.
pub const COMPRESS_MIN_SAVINGS: f64 = 0.10;

/// A single inline cell value may not exceed this fraction of a leaf page.
pub const MAX_INLINE_FRACTION: f64 = 0.25;
/// Derived absolute byte threshold: values larger than this go to an overflow chain.
pub const fn max_inline_value_bytes() -> usize {
    (PAGE_SIZE as f64 * MAX_INLINE_FRACTION) as usize
}

/// A leaf/internal page below this fraction of live bytes is considered underflowed.
pub const MIN_FILL_FRACTION: f64 = 0.25;

/// Bytes reserved for the btree page header (kind, flags, num_cells, next_leaf, reserved).
pub const BTREE_PAGE_HEADER_BYTES: usize = 16;
/// Bytes per slot in the cell-pointer array.
pub const CELL_POINTER_BYTES: usize = 2;

/// Overflow page header: 4-byte next-page pointer.
pub const OVERFLOW_HEADER_BYTES: usize = 4;

/// WAL checkpoint trigger defaults; any field set to 0 disables that trigger.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointConfig {
    pub every_bytes: u64,
    pub every_ms: u64,
    pub memory_threshold: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            every_bytes: 4 * 1024 * 1024,
            every_ms: 5_000,
            memory_threshold: 16 * 1024 * 1024,
        }
    }
}

/// Trigram length used by the trigram index; patterns whose longest literal run is
/// shorter than this must fall back to a full scan.
pub const TRIGRAM_LEN: usize = 3;

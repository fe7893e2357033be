use core::mem;

/// Size of a machine word; also the size of every boundary tag
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// All block sizes are multiple of this number; this number is also the alignment of every payload
/// returned by the allocator (a double word)
pub const ALIGN_SIZE: usize = 2 * WORD_SIZE;

/// Bytes taken by the header and footer tags of a block
pub const OVERHEAD: usize = 2 * WORD_SIZE;

/// Smallest legal block: header, footer and the two free-list links
pub const MIN_BLOCK_SIZE: usize = 4 * WORD_SIZE;

/// Number of size classes (segregated free lists)
///
/// Class `i` holds free blocks of `MIN_BLOCK_SIZE << i` bytes or more; the last class is a
/// catch-all. The largest `CLASSES*` feature enabled wins.
pub const CLASSES: usize = if cfg!(feature = "CLASSES20") {
    20
} else if cfg!(feature = "CLASSES16") {
    16
} else if cfg!(feature = "CLASSES8") {
    8
} else {
    12
};

// NOTE CLASSES MUST be less than 32 because `FreeLists.bitmap` is a `u32`
#[allow(dead_code)]
const ASSERT0: [(); 0 - !(CLASSES < 32) as usize] = [];

/// Threshold of the last (catch-all) size class
pub const MAX_CLASS_SIZE: usize = MIN_BLOCK_SIZE << (CLASSES - 1);

/// The arena never grows by less than this many bytes
pub const CHUNK_SIZE: usize = 1 << 12;

// NOTE growing the arena must keep its top double-word aligned
#[allow(dead_code)]
const ASSERT1: [(); 0 - !(CHUNK_SIZE % ALIGN_SIZE == 0) as usize] = [];

/// If the excess space has at least this many bytes then the block should be split
pub const SPLIT_THRESHOLD: usize = MIN_BLOCK_SIZE;

/// Prologue block: an allocated, payload-less block at the bottom of the arena
pub const PROLOGUE_SIZE: usize = OVERHEAD;

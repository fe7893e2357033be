use core::{cmp, mem};

use crate::consts;

const BITS: u32 = 8 * mem::size_of::<usize>() as u32;

/// Find Last Set
pub fn fls(x: usize) -> u32 {
    debug_assert!(x != 0);

    BITS - x.leading_zeros() - 1
}

// Find First Set
pub fn ffs(x: u32) -> usize {
    x.trailing_zeros() as usize
}

/// Threshold (smallest block size) of size class `class`
pub fn threshold(class: usize) -> usize {
    debug_assert!(class < consts::CLASSES);

    consts::MIN_BLOCK_SIZE << class
}

/// The class a free block of `size` bytes lives in
pub(crate) fn mapping_insert(size: usize) -> usize {
    debug_assert_eq!(size % consts::ALIGN_SIZE, 0);
    debug_assert!(size >= consts::MIN_BLOCK_SIZE);

    cmp::min(
        fls(size / consts::MIN_BLOCK_SIZE) as usize,
        consts::CLASSES - 1,
    )
}

// Computes the first class whose every block is at least `size` bytes; only the catch-all class
// may hold blocks smaller than `size`
pub(crate) fn mapping_search(size: usize) -> usize {
    debug_assert_eq!(size % consts::ALIGN_SIZE, 0);

    let q = size / consts::MIN_BLOCK_SIZE + (size % consts::MIN_BLOCK_SIZE != 0) as usize;
    let class = if q <= 1 {
        0
    } else {
        (BITS - (q - 1).leading_zeros()) as usize
    };

    cmp::min(class, consts::CLASSES - 1)
}

/// Block size needed to serve a request of `size` payload bytes
pub(crate) fn adjust_size(size: usize) -> Option<usize> {
    let size = size.checked_add(consts::OVERHEAD)?;

    Some(cmp::max(
        round_up(size, consts::ALIGN_SIZE)?,
        consts::MIN_BLOCK_SIZE,
    ))
}

/// How much to grow the arena by when no free block fits a `size` bytes block
///
/// Grows to the threshold of the class that would serve `size`, and never by less than a chunk.
pub(crate) fn growth_size(size: usize) -> usize {
    let size = if size <= consts::MAX_CLASS_SIZE {
        threshold(mapping_search(size))
    } else {
        size
    };

    cmp::max(size, consts::CHUNK_SIZE)
}

pub fn round_up(x: usize, multiple: usize) -> Option<usize> {
    debug_assert!(multiple.is_power_of_two());

    Some(x.checked_add(multiple - 1)? & !(multiple - 1))
}

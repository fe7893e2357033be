use core::{fmt, ops, ptr, ptr::NonNull};

use crate::{
    block::{Block, Tag},
    consts::{self, WORD_SIZE},
};

/// The free-list node stored in the first two payload words of a free block
///
/// Only meaningful while the block's allocated bit is clear; once the block is handed out these
/// words belong to the caller.
#[repr(C)]
struct Links {
    prev_free: Option<NonNull<u8>>,
    next_free: Option<NonNull<u8>>,
}

/// A block whose allocated bit is clear
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct FreeBlock {
    block: Block,
}

impl FreeBlock {
    /* Constructors */
    /// # Safety
    ///
    /// `block` must be a free block
    pub unsafe fn new_unchecked(block: Block) -> Self {
        debug_assert!(!block.is_allocated());

        FreeBlock { block }
    }

    /// Formats `size` bytes at `block` as an unlinked free block
    ///
    /// # Safety
    ///
    /// `size` bytes starting at the header of `block` must belong to the arena
    pub unsafe fn from_parts(block: Block, size: usize) -> Self {
        // check size
        debug_assert_eq!(size % consts::ALIGN_SIZE, 0);
        debug_assert!(size >= consts::MIN_BLOCK_SIZE);

        block.set_tags(Tag::new(size, false));

        let fb = FreeBlock { block };
        fb.set_prev_free(None);
        fb.set_next_free(None);

        fb
    }

    /* Getters */
    pub fn block(self) -> Block {
        self.block
    }

    pub fn prev_free(self) -> Option<FreeBlock> {
        self.prev_link()
            .map(|block| unsafe { FreeBlock::new_unchecked(block) })
    }

    pub fn next_free(self) -> Option<FreeBlock> {
        self.next_link()
            .map(|block| unsafe { FreeBlock::new_unchecked(block) })
    }

    /// The raw `prev` link, without checking what it points to
    pub fn prev_link(self) -> Option<Block> {
        unsafe {
            (*self.links())
                .prev_free
                .map(|bp| Block::from_payload(bp))
        }
    }

    /// The raw `next` link, without checking what it points to
    pub fn next_link(self) -> Option<Block> {
        unsafe {
            (*self.links())
                .next_free
                .map(|bp| Block::from_payload(bp))
        }
    }

    /* Setters */
    pub fn set_prev_free(self, prev_free: Option<FreeBlock>) {
        unsafe {
            ptr::write(
                ptr::addr_of_mut!((*self.links()).prev_free),
                prev_free.map(|fb| fb.payload()),
            );
        }
    }

    pub fn set_next_free(self, next_free: Option<FreeBlock>) {
        debug_assert!(next_free != Some(self), "free list cycle at {:?}", self);

        unsafe {
            ptr::write(
                ptr::addr_of_mut!((*self.links()).next_free),
                next_free.map(|fb| fb.payload()),
            );
        }
    }

    /* Miscellaneous */
    /// Marks the whole block allocated; internal fragmentation is absorbed
    pub fn into_used(self) -> Block {
        unsafe {
            self.block.set_tags(Tag::new(self.size(), true));
        }

        self.block
    }

    fn links(self) -> *mut Links {
        debug_assert_eq!(core::mem::size_of::<Links>(), 2 * WORD_SIZE);

        self.block.payload().as_ptr() as *mut Links
    }
}

impl ops::Deref for FreeBlock {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.block
    }
}

impl fmt::Debug for FreeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeBlock")
            .field("bp", &self.payload())
            .field("size", &self.size())
            .field("prev_free", &self.prev_free().map(|fb| fb.payload()))
            .field("next_free", &self.next_free().map(|fb| fb.payload()))
            .finish()
    }
}

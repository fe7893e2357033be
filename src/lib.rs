//! A segregated-fit, boundary-tag allocator over a single growable arena
//!
//! # Features
//!
//! - `malloc` / `free` / `realloc` over one contiguous arena that is extended on demand through
//!   a [`Grow`] primitive (`sbrk` or a fixed buffer)
//!
//! - Boundary tags: every block carries its size and allocated bit in a header *and* a footer
//!   word, so a freed block is merged with both of its physical neighbors in constant time
//!
//! - Segregated free lists: free blocks are bucketed into [`CLASSES`] size classes with
//!   geometrically growing thresholds; an allocation inspects at most [`CLASSES`] list heads
//!
//! - Interchangeable fit policies ([`fit`]): segregated first fit (default), first fit, next fit,
//!   best fit
//!
//! - A consistency checker ([`Heap::check`]) that walks every block and every free list
//!
//! - `no_std`
//!
//! # Example
//!
//! ```
//! use segfit::{Heap, Region};
//!
//! #[repr(align(16))]
//! struct Aligned<T>(T);
//!
//! let mut memory = Aligned([0; 8 * 1024]);
//! let mut heap = Heap::init(Region::new(&mut memory.0)).unwrap();
//!
//! let x = heap.alloc(100).unwrap();
//! assert!(x.is_some());
//!
//! // `alloc(0)` hands out no block
//! assert_eq!(heap.alloc(0), Ok(None));
//!
//! let y = unsafe { heap.realloc(x, 200) }.unwrap();
//! unsafe { heap.free(y) };
//!
//! assert!(heap.check(false).is_ok());
//! ```
//!
//! # Layout
//!
//! ``` text
//!  start                                                                   top
//!  | pad | prologue | block | block | ...                         | block | epilogue |
//!        [hdr][ftr]   [hdr| payload |ftr]                                  [hdr]
//! ```
//!
//! The prologue is an allocated block without payload and the epilogue a zero sized allocated
//! header; together they spare the allocator every boundary check. Each time the arena grows the
//! old epilogue becomes the header of the new free block and a fresh epilogue is written at the
//! new top.
//!
//! Payloads are aligned to [`ALIGN_SIZE`] (two machine words) and every block is at least
//! [`MIN_BLOCK_SIZE`] bytes: header, footer and the two free-list links that live in the payload
//! of a free block.
//!
//! # Cargo features
//!
//! - `CLASSES8`, `CLASSES16`, `CLASSES20`: number of size classes (12 if none is enabled; the
//!   largest enabled wins)
//! - `sbrk`: the [`Sbrk`] growth primitive (unix only)
//! - `spin`: [`LockedHeap`], a `GlobalAlloc` guarded by a spin lock
//! - `tracing`: debug logs on growth, split and merge; warnings for every problem found by
//!   [`Heap::check`]
//! - `ufmt`: `ufmt::uDebug` for the checker's findings
//!
//! # Limitations
//!
//! - Single threaded: a `Heap` is a plain `&mut self` data structure; wrap it in a lock (see
//!   [`LockedHeap`]) to share it
//! - The arena only grows; memory is never handed back to the system
//! - Alignments above [`ALIGN_SIZE`] are not supported
//!
//! # References
//!
//! 1. Bryant, O'Hallaron. *Computer Systems: A Programmer's Perspective*, 9.9 Dynamic Memory
//!    Allocation
//! 2. Wilson, Johnstone, Neely, Boles. *Dynamic Storage Allocation: A Survey and Critical Review*

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]

use core::{cmp, fmt, num::NonZeroUsize, ptr, ptr::NonNull};

pub use crate::{
    check::{BlockInfo, Finding, Report},
    consts::{ALIGN_SIZE, CHUNK_SIZE, CLASSES, MIN_BLOCK_SIZE, WORD_SIZE},
    error::{Error, GrowError},
    fit::{BestFit, ExplicitBestFit, Fit, FirstFit, NextFit, SegregatedFit},
    grow::{Grow, Region},
};
#[cfg(all(unix, feature = "sbrk"))]
pub use crate::grow::Sbrk;
#[cfg(feature = "spin")]
pub use crate::lock::LockedHeap;
use crate::{
    block::{Block, Tag},
    fit::Arena,
    free_block::FreeBlock,
    free_list::FreeLists,
};

#[macro_use]
mod macros;
mod block;
mod check;
mod consts;
mod error;
pub mod fit;
mod free_block;
mod free_list;
pub mod grow;
#[cfg(feature = "spin")]
mod lock;
mod util;

/// A heap: one arena, its size classes and a fit policy
pub struct Heap<G, F = SegregatedFit> {
    grow: G,
    fit: F,
    lists: FreeLists,
    prologue: Block,
    start: NonNull<u8>,
    // payload pointer of the epilogue; i.e. the top of the arena
    end: NonNull<u8>,
}

// NOTE the heap exclusively owns its arena; the raw pointers never alias anything outside of it
unsafe impl<G, F> Send for Heap<G, F>
where
    G: Send,
    F: Send,
{
}

impl<G> Heap<G>
where
    G: Grow,
{
    /* Constructors */
    /// Creates a heap that uses segregated first fit
    ///
    /// See [`init_with`](Heap::init_with)
    pub fn init(grow: G) -> Result<Self, Error> {
        Self::init_with(grow, SegregatedFit)
    }
}

impl<G, F> Heap<G, F>
where
    G: Grow,
    F: Fit,
{
    /// Lays out the prologue and epilogue on a fresh arena obtained from `grow` and extends it by
    /// [`CHUNK_SIZE`] bytes
    ///
    /// Fails if `grow` can't provide the initial arena or hands out memory that is not word
    /// aligned.
    pub fn init_with(mut grow: G, fit: F) -> Result<Self, Error> {
        let start = grow.grow(4 * WORD_SIZE)?;
        let addr = start.as_ptr() as usize;

        if addr % WORD_SIZE != 0 {
            return Err(Error::Misaligned);
        }

        // keep the top of the arena double-word aligned so that every payload is
        let pad = if (addr + 4 * WORD_SIZE) % ALIGN_SIZE == 0 {
            0
        } else {
            let more = grow.grow(WORD_SIZE)?;
            if more.as_ptr() as usize != addr + 4 * WORD_SIZE {
                return Err(Error::Discontiguous);
            }
            WORD_SIZE
        };

        let (prologue, end) = unsafe {
            let base = start.as_ptr();

            // alignment padding
            ptr::write_bytes(base as *mut usize, 0, 1 + pad / WORD_SIZE);

            let bp = NonNull::new_unchecked(base.add(pad + 2 * WORD_SIZE));
            let prologue = Block::from_payload(bp);
            prologue.set_tags(Tag::new(consts::PROLOGUE_SIZE, true));

            let end = NonNull::new_unchecked(base.add(pad + 4 * WORD_SIZE));
            Block::from_payload(end).set_header(Tag::EPILOGUE);

            (prologue, end)
        };

        debug_assert_eq!(end.as_ptr() as usize % ALIGN_SIZE, 0);

        let mut heap = Heap {
            grow,
            fit,
            lists: FreeLists::new(),
            prologue,
            start,
            end,
        };

        heap.extend(CHUNK_SIZE)?;

        Ok(heap)
    }

    /* Public API */
    /// Allocates a block with room for at least `size` bytes
    ///
    /// Returns `Ok(None)` if `size` is zero. The returned pointer is [`ALIGN_SIZE`]-bytes
    /// aligned. On error the heap is left as it was.
    pub fn alloc(&mut self, size: usize) -> Result<Option<NonNull<u8>>, Error> {
        match NonZeroUsize::new(size) {
            Some(size) => self.allocate(size).map(Some),
            // ignore spurious requests
            None => Ok(None),
        }
    }

    /// Frees the block referenced by `ptr`; `None` is a no-op
    ///
    /// The block is merged with its free neighbors before it re-enters a free list.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and not freed since
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let ptr = match ptr {
            Some(ptr) => ptr,
            None => return,
        };

        let block = Block::from_payload(ptr);
        debug_assert!(block.is_allocated(), "double free of {:?}", ptr);

        block.set_tags(Tag::new(block.size(), false));

        let merged = self.coalesce(FreeBlock::new_unchecked(block));
        self.lists.insert(merged);
    }

    /// Moves the allocation referenced by `ptr` into a block with room for `size` bytes
    ///
    /// - `size == 0` frees `ptr` and returns `Ok(None)`
    /// - `ptr == None` is the same as [`alloc`](Heap::alloc)
    ///
    /// Otherwise a new block is allocated, the first `min(size, usable_size(ptr))` bytes are
    /// copied over and the old block is freed. If the new block can't be allocated the old one is
    /// left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and not freed since
    pub unsafe fn realloc(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, Error> {
        let size = match NonZeroUsize::new(size) {
            Some(size) => size,
            None => {
                self.free(ptr);
                return Ok(None);
            }
        };

        let old = match ptr {
            Some(old) => old,
            None => return self.allocate(size).map(Some),
        };

        let new = self.allocate(size)?;

        // copy the old data
        let len = cmp::min(size.get(), self.usable_size(old));
        ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), len);

        self.free(Some(old));

        Ok(Some(new))
    }

    /// Number of bytes the caller may use at `ptr`; at least what was asked for
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and not freed since
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        Block::from_payload(ptr).usable_size()
    }

    /// Bytes obtained from the growth primitive so far
    pub fn arena_len(&self) -> usize {
        self.end.as_ptr() as usize - self.start.as_ptr() as usize
    }

    /* Private API */
    fn allocate(&mut self, size: NonZeroUsize) -> Result<NonNull<u8>, Error> {
        let asize = util::adjust_size(size.get()).ok_or(Error::TooLarge)?;

        let arena = Arena::new(&self.lists, self.first());
        let fb = match self.fit.find(arena, asize) {
            Some(fb) => fb,
            // no fit found; get more memory
            None => self.extend(util::growth_size(asize))?,
        };

        debug_assert!(fb.size() >= asize);

        unsafe { Ok(self.take(fb, asize).payload()) }
    }

    /// Removes the listed block `fb` from its list and allocates `asize` bytes at its start
    unsafe fn take(&mut self, fb: FreeBlock, asize: usize) -> Block {
        let csize = fb.size();
        let rest = csize - asize;

        if rest >= consts::SPLIT_THRESHOLD
            && util::mapping_insert(rest) == util::mapping_insert(csize)
        {
            // the remainder stays in the same class; it takes over `fb`'s list position
            let used = fb.block();
            let next = Block::from_payload(NonNull::new_unchecked(
                used.payload().as_ptr().add(asize),
            ));

            self.lists.splice(fb, FreeBlock::from_parts(next, rest));
            used.set_tags(Tag::new(asize, true));

            return used;
        }

        self.lists.unlink(fb);
        self.place(fb, asize)
    }

    /// Carves an allocated block of `asize` bytes out of the front of `fb`
    ///
    /// `fb` must already be unlinked
    unsafe fn place(&mut self, fb: FreeBlock, asize: usize) -> Block {
        let csize = fb.size();

        if csize - asize >= consts::SPLIT_THRESHOLD {
            let used = fb.block();
            used.set_tags(Tag::new(asize, true));

            let rest = FreeBlock::from_parts(used.next_phys(), csize - asize);
            self.lists.insert(rest);

            debug!(
                "split {} byte block at {:p}: {} + {}",
                csize,
                used.payload(),
                asize,
                csize - asize
            );

            used
        } else {
            fb.into_used()
        }
    }

    /// Merges the unlinked free block `fb` with its free physical neighbors
    ///
    /// Neighbors are unlinked from their lists; the merged block is returned unlinked.
    unsafe fn coalesce(&mut self, fb: FreeBlock) -> FreeBlock {
        let block = fb.block();

        // the first block has only the prologue below it
        let prev_alloc = block == self.first() || block.prev_tag().is_allocated();
        let next_alloc = block.next_phys().is_allocated();

        let merged = match (prev_alloc, next_alloc) {
            (true, true) => return fb,
            (true, false) => {
                let next = FreeBlock::new_unchecked(block.next_phys());
                self.lists.unlink(next);

                block.set_tags(Tag::new(block.size() + next.size(), false));
                self.fit.absorbed(next.block(), block);

                block
            }
            (false, true) => {
                let prev = FreeBlock::new_unchecked(block.prev_phys());
                self.lists.unlink(prev);

                let merged = prev.block();
                merged.set_tags(Tag::new(prev.size() + block.size(), false));
                self.fit.absorbed(block, merged);

                merged
            }
            (false, false) => {
                let prev = FreeBlock::new_unchecked(block.prev_phys());
                let next = FreeBlock::new_unchecked(block.next_phys());
                self.lists.unlink(prev);
                self.lists.unlink(next);

                let merged = prev.block();
                merged.set_tags(Tag::new(
                    prev.size() + block.size() + next.size(),
                    false,
                ));
                self.fit.absorbed(block, merged);
                self.fit.absorbed(next.block(), merged);

                merged
            }
        };

        debug!(
            "coalesced {:p} into a {} byte block at {:p}",
            block.payload(),
            merged.size(),
            merged.payload()
        );

        FreeBlock::new_unchecked(merged)
    }

    /// Grows the arena by (at least) `size` bytes and files the new space as one free block
    ///
    /// On failure the arena is left as it was.
    fn extend(&mut self, size: usize) -> Result<FreeBlock, Error> {
        // an even number of words keeps the top double-word aligned
        let size = util::round_up(size, ALIGN_SIZE).ok_or(Error::TooLarge)?;
        let bp = self.grow.grow(size)?;

        if bp != self.end {
            return Err(Error::Discontiguous);
        }

        unsafe {
            // the old epilogue becomes the header of the new block
            let fb = FreeBlock::from_parts(Block::from_payload(bp), size);

            self.end = NonNull::new_unchecked(bp.as_ptr().add(size));
            Block::from_payload(self.end).set_header(Tag::EPILOGUE);

            self.lists.insert(fb);

            debug!("grew the arena by {} bytes; top = {:p}", size, self.end);

            Ok(fb)
        }
    }

    /* Getters */
    /// The lowest block after the prologue
    fn first(&self) -> Block {
        unsafe {
            Block::from_payload(NonNull::new_unchecked(
                self.prologue.payload().as_ptr().add(consts::PROLOGUE_SIZE),
            ))
        }
    }

    // lowest and highest payload address in the arena (the latter belongs to the epilogue)
    fn bounds(&self) -> (usize, usize) {
        (self.first().addr(), self.end.as_ptr() as usize)
    }

    #[cfg(test)]
    fn free_blocks(&self) -> impl Iterator<Item = (usize, FreeBlock)> + '_ {
        self.lists
            .classes()
            .flat_map(move |class| self.lists.iter(class).map(move |fb| (class, fb)))
    }
}

impl<G, F> fmt::Debug for Heap<G, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("prologue", &self.prologue.payload())
            .field("end", &self.end)
            .field("free_lists", &self.lists)
            .finish()
    }
}

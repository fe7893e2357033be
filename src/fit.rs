//! Fit search policies
//!
//! Every policy answers the same question, "which free block should serve a block of `size`
//! bytes?", over the same heap. [`SegregatedFit`] is the default; the others walk the physical
//! block list instead of the size classes and are mostly useful to compare fragmentation.

use crate::{
    block::{Block, Blocks},
    consts,
    free_block::FreeBlock,
    free_list::FreeLists,
    util,
};

mod sealed {
    pub trait Sealed {}
}

/// Read-only view of the heap handed to a fit policy
#[derive(Clone, Copy)]
pub struct Arena<'a> {
    lists: &'a FreeLists,
    first: Block,
}

impl<'a> Arena<'a> {
    pub(crate) fn new(lists: &'a FreeLists, first: Block) -> Self {
        Arena { lists, first }
    }

    /// The segregated free lists
    pub fn lists(self) -> &'a FreeLists {
        self.lists
    }

    /// The lowest block after the prologue
    pub fn first(self) -> Block {
        self.first
    }

    /// Every block in address order, allocated ones included
    pub fn blocks(self) -> Blocks<'a> {
        unsafe { Blocks::starting_at(self.first) }
    }
}

/// A fit search policy
///
/// Implementations return a free block of at least `size` bytes, or `None`. They never modify
/// the heap; the caller unlinks and places the returned block.
pub trait Fit: sealed::Sealed {
    /// Picks a free block of at least `size` bytes
    fn find(&mut self, arena: Arena<'_>, size: usize) -> Option<FreeBlock>;

    /// Called when coalescing merges block `gone` into block `into`; `gone` no longer exists
    fn absorbed(&mut self, gone: Block, into: Block) {
        let _ = (gone, into);
    }
}

fn fits(block: &Block, size: usize) -> bool {
    !block.is_allocated() && block.size() >= size
}

/// Segregated first fit (the default)
///
/// Probes the size classes upwards, starting at the first class whose threshold covers `size`,
/// and takes the head of the first non-empty one. Only the catch-all class has to be searched
/// entry by entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SegregatedFit;

impl sealed::Sealed for SegregatedFit {}

impl Fit for SegregatedFit {
    fn find(&mut self, arena: Arena<'_>, size: usize) -> Option<FreeBlock> {
        let lists = arena.lists();
        let class = lists.first_nonempty(util::mapping_search(size))?;

        if class == consts::CLASSES - 1 && size > consts::MAX_CLASS_SIZE {
            lists.iter(class).find(|fb| fb.size() >= size)
        } else {
            lists.head(class)
        }
    }
}

/// First fit over the physical block list
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstFit;

impl sealed::Sealed for FirstFit {}

impl Fit for FirstFit {
    fn find(&mut self, arena: Arena<'_>, size: usize) -> Option<FreeBlock> {
        arena
            .blocks()
            .find(|block| fits(block, size))
            .map(|block| unsafe { FreeBlock::new_unchecked(block) })
    }
}

/// Next fit: first fit that resumes where the previous search stopped, wrapping around
#[derive(Clone, Copy, Debug, Default)]
pub struct NextFit {
    rover: Option<Block>,
}

impl NextFit {
    /// A next fit policy whose first search starts at the bottom of the arena
    pub const fn new() -> Self {
        NextFit { rover: None }
    }
}

impl sealed::Sealed for NextFit {}

impl Fit for NextFit {
    fn find(&mut self, arena: Arena<'_>, size: usize) -> Option<FreeBlock> {
        let start = self.rover.unwrap_or_else(|| arena.first());

        let hit = unsafe { Blocks::starting_at(start) }
            .chain(arena.blocks().take_while(|block| *block != start))
            .find(|block| fits(block, size));

        // start over from the bottom next time if nothing fits
        self.rover = hit;

        hit.map(|block| unsafe { FreeBlock::new_unchecked(block) })
    }

    fn absorbed(&mut self, gone: Block, into: Block) {
        if self.rover == Some(gone) {
            self.rover = Some(into);
        }
    }
}

/// Best fit over the physical block list; an exact match ends the search early
#[derive(Clone, Copy, Debug, Default)]
pub struct BestFit;

impl sealed::Sealed for BestFit {}

impl Fit for BestFit {
    fn find(&mut self, arena: Arena<'_>, size: usize) -> Option<FreeBlock> {
        best(arena.blocks(), size).map(|block| unsafe { FreeBlock::new_unchecked(block) })
    }
}

/// Best fit over the segregated lists
///
/// Blocks in a class are all smaller than blocks in the next one, so the first class holding any
/// fit holds the best one.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExplicitBestFit;

impl sealed::Sealed for ExplicitBestFit {}

impl Fit for ExplicitBestFit {
    fn find(&mut self, arena: Arena<'_>, size: usize) -> Option<FreeBlock> {
        let lists = arena.lists();
        let min = util::mapping_insert(size.max(consts::MIN_BLOCK_SIZE));

        lists
            .classes()
            .filter(|class| *class >= min)
            .find_map(|class| best(lists.iter(class).map(|fb| fb.block()), size))
            .map(|block| unsafe { FreeBlock::new_unchecked(block) })
    }
}

fn best(blocks: impl Iterator<Item = Block>, size: usize) -> Option<Block> {
    let mut best: Option<Block> = None;

    for block in blocks {
        if !fits(&block, size) {
            continue;
        }

        if block.size() == size {
            return Some(block);
        }

        if best.map(|b| block.size() < b.size()).unwrap_or(true) {
            best = Some(block);
        }
    }

    best
}

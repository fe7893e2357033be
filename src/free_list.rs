use core::{fmt, marker::PhantomData};

use crate::{block::Block, consts, free_block::FreeBlock, util};

/// The size-class table: one intrusive, doubly linked, unordered list of free blocks per class
pub struct FreeLists {
    // bit `i` is set iff list `i` is not empty
    bitmap: u32,
    heads: [Option<FreeBlock>; consts::CLASSES],
}

impl FreeLists {
    /* Constructors */
    pub const fn new() -> Self {
        Self {
            bitmap: 0,
            heads: [None; consts::CLASSES],
        }
    }

    /* Public API */
    /// Pushes `block` at the head of the list matching its current size
    ///
    /// # Safety
    ///
    /// `block` must be a free block that is not in any list
    pub unsafe fn insert(&mut self, block: FreeBlock) {
        let class = util::mapping_insert(block.size());
        let head = self.head(class);

        debug_assert!(head != Some(block), "{:?} is already the head of its list", block);

        block.set_prev_free(None);
        block.set_next_free(head);
        if let Some(head) = head {
            head.set_prev_free(Some(block));
        }

        self.set_head(class, Some(block));
    }

    /// Removes `block` from its list
    ///
    /// # Safety
    ///
    /// `block` must be in the list matching its current size; i.e. its size must not have changed
    /// since it was inserted
    pub unsafe fn unlink(&mut self, block: FreeBlock) {
        let next = block.next_free();
        let prev = block.prev_free();

        debug_assert!(next != Some(block), "free list cycle at {:?}", block);

        match (prev, next) {
            (Some(prev), Some(next)) => {
                prev.set_next_free(Some(next));
                next.set_prev_free(Some(prev));
            }
            // this is the head of the list
            (None, Some(next)) => {
                next.set_prev_free(None);
                self.set_head(util::mapping_insert(block.size()), Some(next));
            }
            // this is the tail of the list
            (Some(prev), None) => {
                prev.set_next_free(None);
            }
            // the list is now empty
            (None, None) => {
                let class = util::mapping_insert(block.size());
                debug_assert_eq!(self.head(class), Some(block));

                self.set_head(class, None);
            }
        }
    }

    /// Puts `new` in the list position of `old`, which leaves its list
    ///
    /// # Safety
    ///
    /// `old` must be listed; `new` must be a free block that is not listed and belongs to the
    /// same class as `old`
    pub unsafe fn splice(&mut self, old: FreeBlock, new: FreeBlock) {
        let class = util::mapping_insert(old.size());
        debug_assert_eq!(class, util::mapping_insert(new.size()));

        let prev = old.prev_free();
        let next = old.next_free();

        new.set_prev_free(prev);
        new.set_next_free(next);

        if let Some(next) = next {
            next.set_prev_free(Some(new));
        }

        match prev {
            Some(prev) => prev.set_next_free(Some(new)),
            None => self.set_head(class, Some(new)),
        }
    }

    /// First non-empty class at or above `class`
    pub fn first_nonempty(&self, class: usize) -> Option<usize> {
        debug_assert!(class < consts::CLASSES);

        let bitmap = self.bitmap & (!0 << class);
        if bitmap == 0 {
            None
        } else {
            Some(util::ffs(bitmap))
        }
    }

    /// Classes with at least one free block, smallest first
    pub fn classes(&self) -> Bits {
        Bits(self.bitmap)
    }

    /// Walks list `class`, head first
    pub fn iter(&self, class: usize) -> FreeListIterator<'_> {
        FreeListIterator {
            head: self.head(class),
            _marker: PhantomData,
        }
    }

    /* Getters */
    pub fn head(&self, class: usize) -> Option<FreeBlock> {
        let head = *self
            .heads
            .get(class)
            .unwrap_or_else(|| unsafe { assume_unreachable!() });

        debug_assert!(head.map(|fb| fb.prev_free().is_none()).unwrap_or(true));

        head
    }

    /// The raw head of list `class`; nothing is read from the block it points to
    pub fn head_link(&self, class: usize) -> Option<Block> {
        self.heads
            .get(class)
            .and_then(|head| head.map(|fb| fb.block()))
    }

    /* Setters */
    unsafe fn set_head(&mut self, class: usize, head: Option<FreeBlock>) {
        debug_assert!(
            head.map(|fb| fb.prev_free().is_none()).unwrap_or(true),
            "{:?}",
            head
        );

        *self
            .heads
            .get_mut(class)
            .unwrap_or_else(|| assume_unreachable!()) = head;

        if head.is_some() {
            self.bitmap |= 1 << class;
        } else {
            self.bitmap &= !(1 << class);
        }
    }
}

pub struct Bits(u32);

impl Iterator for Bits {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            let i = util::ffs(self.0);
            self.0 &= !(1 << i);
            Some(i)
        }
    }
}

pub struct FreeListIterator<'a> {
    head: Option<FreeBlock>,
    // freeze the `FreeLists` struct
    _marker: PhantomData<&'a ()>,
}

impl Iterator for FreeListIterator<'_> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<FreeBlock> {
        let fb = self.head?;
        self.head = fb.next_free();
        Some(fb)
    }
}

struct List<'a>(&'a FreeLists, usize);

impl fmt::Debug for List<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter(self.1)).finish()
    }
}

impl fmt::Debug for FreeLists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for class in self.classes() {
            map.entry(&util::threshold(class), &List(self, class));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use core::ptr::NonNull;

    use super::*;

    #[repr(align(16))]
    #[derive(Clone, Copy)]
    struct Word([usize; 2]);

    // carves `n` free blocks of `size` bytes out of `memory`
    unsafe fn blocks(memory: &mut [Word], size: usize, n: usize) -> Vec<FreeBlock> {
        let base = memory.as_mut_ptr() as *mut u8;
        (0..n)
            .map(|i| {
                let bp = NonNull::new_unchecked(base.add(consts::ALIGN_SIZE + i * size));
                FreeBlock::from_parts(Block::from_payload(bp), size)
            })
            .collect()
    }

    #[test]
    fn bits() {
        let mut bits = Bits(0b110011);

        assert_eq!(bits.next(), Some(0));
        assert_eq!(bits.next(), Some(1));
        assert_eq!(bits.next(), Some(4));
        assert_eq!(bits.next(), Some(5));
        assert_eq!(bits.next(), None);
    }

    #[test]
    fn insert_at_head() {
        let mut memory = vec![Word([0; 2]); 64];

        unsafe {
            let fbs = blocks(&mut memory, consts::MIN_BLOCK_SIZE, 3);
            let mut lists = FreeLists::new();

            for fb in &fbs {
                lists.insert(*fb);
            }

            // last in, first out
            let order: Vec<_> = lists.iter(0).collect();
            assert_eq!(order, [fbs[2], fbs[1], fbs[0]]);
            assert_eq!(lists.first_nonempty(0), Some(0));
            assert_eq!(lists.classes().collect::<Vec<_>>(), [0]);
            assert_eq!(fbs[2].prev_free(), None);
            assert_eq!(fbs[1].prev_free(), Some(fbs[2]));
            assert_eq!(fbs[0].next_free(), None);
        }
    }

    #[test]
    fn unlink_every_position() {
        let mut memory = vec![Word([0; 2]); 64];

        unsafe {
            let fbs = blocks(&mut memory, consts::MIN_BLOCK_SIZE, 4);
            let mut lists = FreeLists::new();

            for fb in &fbs {
                lists.insert(*fb);
            }
            // 3 2 1 0

            // middle
            lists.unlink(fbs[2]);
            assert_eq!(lists.iter(0).collect::<Vec<_>>(), [fbs[3], fbs[1], fbs[0]]);

            // tail
            lists.unlink(fbs[0]);
            assert_eq!(lists.iter(0).collect::<Vec<_>>(), [fbs[3], fbs[1]]);

            // head
            lists.unlink(fbs[3]);
            assert_eq!(lists.head(0), Some(fbs[1]));
            assert_eq!(fbs[1].prev_free(), None);

            // only entry
            lists.unlink(fbs[1]);
            assert_eq!(lists.head(0), None);
            assert_eq!(lists.first_nonempty(0), None);
        }
    }

    #[test]
    fn splice_keeps_position() {
        let mut memory = vec![Word([0; 2]); 64];

        unsafe {
            let fbs = blocks(&mut memory, consts::MIN_BLOCK_SIZE, 5);
            let mut lists = FreeLists::new();

            for fb in &fbs[..3] {
                lists.insert(*fb);
            }
            // 2 1 0

            // middle
            lists.splice(fbs[1], fbs[3]);
            assert_eq!(lists.iter(0).collect::<Vec<_>>(), [fbs[2], fbs[3], fbs[0]]);
            assert_eq!(fbs[0].prev_free(), Some(fbs[3]));

            // head
            lists.splice(fbs[2], fbs[4]);
            assert_eq!(lists.iter(0).collect::<Vec<_>>(), [fbs[4], fbs[3], fbs[0]]);
            assert_eq!(fbs[3].prev_free(), Some(fbs[4]));
        }
    }

    #[test]
    fn classes_are_segregated() {
        let mut memory = vec![Word([0; 2]); 64];

        unsafe {
            let small = blocks(&mut memory[..8], consts::MIN_BLOCK_SIZE, 1)[0];
            let big = blocks(&mut memory[8..], 4 * consts::MIN_BLOCK_SIZE, 1)[0];
            let mut lists = FreeLists::new();

            lists.insert(big);
            lists.insert(small);

            assert_eq!(lists.head(0), Some(small));
            assert_eq!(lists.head(2), Some(big));
            assert_eq!(lists.first_nonempty(1), Some(2));
            assert_eq!(lists.first_nonempty(3), None);
            assert_eq!(lists.classes().collect::<Vec<_>>(), [0, 2]);
        }
    }
}

use core::{fmt, marker::PhantomData, ptr, ptr::NonNull};

use crate::consts::{ALIGN_SIZE, OVERHEAD, WORD_SIZE};

/// A boundary tag: block size and allocated bit packed into one word
///
/// The size occupies every bit above the alignment boundary; the allocated flag is bit 0.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tag(usize);

impl Tag {
    const ALLOCATED_BIT: usize = 1 << 0;
    const SIZE_MASK: usize = !(ALIGN_SIZE - 1);

    /// The header of the end-of-arena sentinel
    pub const EPILOGUE: Tag = Tag::new(0, true);

    /* Constructors */
    pub const fn new(size: usize, allocated: bool) -> Self {
        Tag(size | allocated as usize)
    }

    /* Getters */
    pub const fn size(self) -> usize {
        self.0 & Self::SIZE_MASK
    }

    pub const fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED_BIT != 0
    }

    pub const fn bits(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}]",
            self.size(),
            if self.is_allocated() { 'a' } else { 'f' }
        )
    }
}

/// A block, addressed by its payload pointer
///
/// ``` text
///            header                         footer
///          +--------+---------------------+--------+
///          | size|a |      payload        | size|a |
///          +--------+---------------------+--------+
///                   ^ bp
/// ```
///
/// This is the only place that reads or writes raw tag words; everything else goes through the
/// accessors below.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Block {
    bp: NonNull<u8>,
}

impl Block {
    /* Constructors */
    /// # Safety
    ///
    /// `bp` must be the payload pointer of a block (or of the epilogue) inside a live arena
    pub unsafe fn from_payload(bp: NonNull<u8>) -> Self {
        debug_assert_eq!(bp.as_ptr() as usize % WORD_SIZE, 0);

        Block { bp }
    }

    /* Getters */
    pub fn payload(self) -> NonNull<u8> {
        self.bp
    }

    pub fn addr(self) -> usize {
        self.bp.as_ptr() as usize
    }

    pub fn tag(self) -> Tag {
        unsafe { Tag(ptr::read(self.header_ptr())) }
    }

    pub fn footer_tag(self) -> Tag {
        unsafe { Tag(ptr::read(self.footer_ptr())) }
    }

    pub fn size(self) -> usize {
        self.tag().size()
    }

    pub fn is_allocated(self) -> bool {
        self.tag().is_allocated()
    }

    /// Bytes available to the caller
    pub fn usable_size(self) -> usize {
        self.size() - OVERHEAD
    }

    /* Setters */
    /// Writes `tag` into both the header and the footer
    ///
    /// # Safety
    ///
    /// `tag.size()` bytes starting at the header must belong to the arena
    pub unsafe fn set_tags(self, tag: Tag) {
        debug_assert_eq!(tag.size() % ALIGN_SIZE, 0);
        debug_assert!(tag.size() >= OVERHEAD);

        ptr::write(self.header_ptr(), tag.0);
        ptr::write(self.footer_ptr(), tag.0);
    }

    /// Writes `tag` into the header only; used for the epilogue, which has no footer
    pub unsafe fn set_header(self, tag: Tag) {
        ptr::write(self.header_ptr(), tag.0);
    }

    /* Neighbors */
    /// # Safety
    ///
    /// `self` must not be the epilogue
    pub unsafe fn next_phys(self) -> Block {
        debug_assert!(self.size() != 0);

        Block::from_payload(NonNull::new_unchecked(self.bp.as_ptr().add(self.size())))
    }

    /// Tag stored in the footer of the physically previous block
    ///
    /// # Safety
    ///
    /// `self` must not be the prologue
    pub unsafe fn prev_tag(self) -> Tag {
        Tag(ptr::read(
            self.bp.as_ptr().sub(OVERHEAD) as *const usize
        ))
    }

    /// # Safety
    ///
    /// `self` must not be the prologue
    pub unsafe fn prev_phys(self) -> Block {
        let size = self.prev_tag().size();
        debug_assert!(size != 0);

        Block::from_payload(NonNull::new_unchecked(self.bp.as_ptr().sub(size)))
    }

    /* Miscellaneous */
    fn header_ptr(self) -> *mut usize {
        unsafe { self.bp.as_ptr().sub(WORD_SIZE) as *mut usize }
    }

    // NOTE(safety) the size is read from the header; don't call this on the epilogue
    fn footer_ptr(self) -> *mut usize {
        unsafe {
            self.bp
                .as_ptr()
                .add(self.size())
                .sub(OVERHEAD) as *mut usize
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        f.debug_struct("Block")
            .field("bp", &self.bp)
            .field("header", &tag)
            .field(
                "footer",
                &if tag.size() == 0 {
                    None
                } else {
                    Some(self.footer_tag())
                },
            )
            .finish()
    }
}

/// Walks the physical blocks of an arena, in address order, up to (but excluding) the epilogue
pub struct Blocks<'a> {
    cur: Block,
    // freeze the heap
    _marker: PhantomData<&'a ()>,
}

impl Blocks<'_> {
    /// # Safety
    ///
    /// `start` must be a block boundary of an arena that stays untouched while iterating
    pub unsafe fn starting_at(start: Block) -> Self {
        Blocks {
            cur: start,
            _marker: PhantomData,
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.cur;
        if block.size() == 0 {
            None
        } else {
            self.cur = unsafe { block.next_phys() };
            Some(block)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::MIN_BLOCK_SIZE;

    #[repr(align(16))]
    struct Aligned<T>(T);

    #[test]
    fn tag_packing() {
        let tag = Tag::new(MIN_BLOCK_SIZE, true);
        assert_eq!(tag.size(), MIN_BLOCK_SIZE);
        assert!(tag.is_allocated());
        assert_eq!(tag.bits(), MIN_BLOCK_SIZE | 1);

        let tag = Tag::new(3 * ALIGN_SIZE, false);
        assert_eq!(tag.size(), 3 * ALIGN_SIZE);
        assert!(!tag.is_allocated());

        assert_eq!(Tag::EPILOGUE.size(), 0);
        assert!(Tag::EPILOGUE.is_allocated());
    }

    #[test]
    fn neighbors() {
        let mut memory = Aligned([0usize; 16]);

        unsafe {
            let base = memory.0.as_mut_ptr() as *mut u8;

            // | pad | X (2 * MIN) | Y (MIN) | epilogue
            let x = Block::from_payload(NonNull::new_unchecked(base.add(ALIGN_SIZE)));
            x.set_tags(Tag::new(2 * MIN_BLOCK_SIZE, true));
            let y = x.next_phys();
            y.set_tags(Tag::new(MIN_BLOCK_SIZE, false));
            y.next_phys().set_header(Tag::EPILOGUE);

            assert_eq!(y.addr() - x.addr(), 2 * MIN_BLOCK_SIZE);
            assert_eq!(y.prev_phys(), x);
            assert!(y.prev_tag().is_allocated());
            assert_eq!(x.tag(), x.footer_tag());
            assert_eq!(y.tag(), y.footer_tag());
            assert_eq!(x.usable_size(), 2 * MIN_BLOCK_SIZE - OVERHEAD);

            let sizes: Vec<_> = Blocks::starting_at(x).map(|b| b.size()).collect();
            assert_eq!(sizes, [2 * MIN_BLOCK_SIZE, MIN_BLOCK_SIZE]);
        }
    }
}

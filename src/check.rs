//! Heap consistency checker
//!
//! Walks every block and every free list and reports what looks wrong. It never modifies the heap
//! and never tries to repair it.

use core::fmt;

use crate::{
    block::{Block, Tag},
    consts::{self, ALIGN_SIZE, PROLOGUE_SIZE},
    fit::Fit,
    free_block::FreeBlock,
    grow::Grow,
    util, Heap,
};

/// One block as seen by the checker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Payload address
    pub addr: usize,
    /// Size recorded in the header
    pub size: usize,
    /// Allocated bit recorded in the header
    pub allocated: bool,
    /// Size recorded in the footer
    pub footer_size: usize,
    /// Allocated bit recorded in the footer
    pub footer_allocated: bool,
}

/// Something the checker has to say
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Finding {
    /// A block dump; only emitted by verbose checks
    Block(BlockInfo),
    /// The prologue is not an allocated block of the expected size
    BadPrologue,
    /// The walk did not end on a zero sized, allocated header at the top of the arena
    BadEpilogue {
        /// Where the walk ended
        addr: usize,
    },
    /// A payload is not double-word aligned
    Misaligned {
        /// Payload address
        addr: usize,
    },
    /// A block size is not a multiple of the alignment or is below the minimum block size
    BadSize {
        /// Payload address
        addr: usize,
        /// The offending size
        size: usize,
    },
    /// Header and footer disagree
    TagMismatch {
        /// Payload address
        addr: usize,
        /// Raw header word
        header: usize,
        /// Raw footer word
        footer: usize,
    },
    /// A block or free-list entry lies outside of the arena
    OutOfBounds {
        /// The offending address
        addr: usize,
    },
    /// A free list loops back on itself
    ListCycle {
        /// Size class of the list
        class: usize,
        /// Entry at which the walk gave up
        addr: usize,
    },
    /// A free-list entry is not the `prev` of its `next`
    BrokenLink {
        /// Size class of the list
        class: usize,
        /// Payload address
        addr: usize,
    },
    /// An allocated block sits in a free list
    AllocatedInList {
        /// Size class of the list
        class: usize,
        /// Payload address
        addr: usize,
    },
    /// A free block sits in the list of another size class
    WrongClass {
        /// Payload address
        addr: usize,
        /// Class it was found in
        class: usize,
        /// Class its size maps to
        expected: usize,
    },
    /// The number of free blocks in the arena and in the free lists differ
    Unlisted {
        /// Free blocks found walking the arena
        free: usize,
        /// Entries found walking the free lists
        listed: usize,
    },
}

impl Finding {
    /// Whether this finding is an actual problem (and not a block dump)
    pub fn is_problem(&self) -> bool {
        !matches!(self, Finding::Block(_))
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Finding::Block(info) => write!(
                f,
                "{:#x}: header: [{}:{}] footer: [{}:{}]",
                info.addr,
                info.size,
                if info.allocated { 'a' } else { 'f' },
                info.footer_size,
                if info.footer_allocated { 'a' } else { 'f' },
            ),
            Finding::BadPrologue => f.write_str("bad prologue header"),
            Finding::BadEpilogue { addr } => write!(f, "{:#x}: bad epilogue header", addr),
            Finding::Misaligned { addr } => {
                write!(f, "{:#x} is not doubleword aligned", addr)
            }
            Finding::BadSize { addr, size } => write!(f, "{:#x}: bad block size {}", addr, size),
            Finding::TagMismatch {
                addr,
                header,
                footer,
            } => write!(
                f,
                "{:#x}: header {:#x} does not match footer {:#x}",
                addr, header, footer
            ),
            Finding::OutOfBounds { addr } => write!(f, "{:#x} is outside of the arena", addr),
            Finding::ListCycle { class, addr } => {
                write!(f, "free list {} loops at {:#x}", class, addr)
            }
            Finding::BrokenLink { class, addr } => {
                write!(f, "free list {}: broken back link at {:#x}", class, addr)
            }
            Finding::AllocatedInList { class, addr } => {
                write!(f, "free list {}: {:#x} is allocated", class, addr)
            }
            Finding::WrongClass {
                addr,
                class,
                expected,
            } => write!(
                f,
                "{:#x} is in free list {} but belongs to free list {}",
                addr, class, expected
            ),
            Finding::Unlisted { free, listed } => write!(
                f,
                "{} free blocks in the arena but {} in the free lists",
                free, listed
            ),
        }
    }
}

/// Summary of a consistency check
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Report {
    /// Blocks between the prologue and the epilogue
    pub blocks: usize,
    /// How many of those are free
    pub free_blocks: usize,
    /// Bytes held by free blocks, tags included
    pub free_bytes: usize,
    /// Entries found in the free lists
    pub listed: usize,
    /// Findings that are actual problems
    pub problems: usize,
}

impl Report {
    /// `true` if no problem was found
    pub fn is_ok(&self) -> bool {
        self.problems == 0
    }
}

impl<G, F> Heap<G, F>
where
    G: Grow,
    F: Fit,
{
    /// Checks the heap for consistency
    ///
    /// With the `tracing` feature problems are logged as warnings and, if `verbose`, every block
    /// is logged at debug level.
    pub fn check(&self, verbose: bool) -> Report {
        self.check_with(verbose, |_| {})
    }

    /// Like [`check`](Heap::check) but also hands every finding to `sink`
    pub fn check_with(&self, verbose: bool, mut sink: impl FnMut(&Finding)) -> Report {
        let mut report = Report::default();
        let mut emit = |finding: Finding, report: &mut Report| {
            if finding.is_problem() {
                report.problems += 1;
                warn!("{}", finding);
            } else {
                debug!("{}", finding);
            }
            sink(&finding);
        };

        let prologue = self.prologue;
        if prologue.tag().size() != PROLOGUE_SIZE
            || !prologue.is_allocated()
            || prologue.tag() != prologue.footer_tag()
        {
            emit(Finding::BadPrologue, &mut report);
        }

        // physical walk
        let (low, high) = self.bounds();
        let mut block = self.first();
        let end = loop {
            if block.addr() < low || block.addr() > high {
                break None;
            }

            let tag = block.tag();
            if tag.size() == 0 {
                break Some(block);
            }
            if block.addr() + tag.size() > high {
                break None;
            }

            report.blocks += 1;
            if !tag.is_allocated() {
                report.free_blocks += 1;
                report.free_bytes += tag.size();
            }

            for finding in inspect(block) {
                if finding.is_problem() || verbose {
                    emit(finding, &mut report);
                }
            }

            block = unsafe { block.next_phys() };
        };

        match end {
            Some(end) if end.addr() == high && end.tag() == Tag::EPILOGUE => {}
            Some(end) => emit(Finding::BadEpilogue { addr: end.addr() }, &mut report),
            None => emit(Finding::OutOfBounds { addr: block.addr() }, &mut report),
        }

        // free lists
        for class in 0..consts::CLASSES {
            let mut prev: Option<Block> = None;
            let mut steps = 0;
            let mut entry = self.lists.head_link(class);

            // nothing is read through a link before it is known to point into the arena
            while let Some(block) = entry {
                let addr = block.addr();

                if addr < low || addr >= high {
                    emit(Finding::OutOfBounds { addr }, &mut report);
                    break;
                }

                if addr % ALIGN_SIZE != 0 {
                    emit(Finding::Misaligned { addr }, &mut report);
                    break;
                }

                // a list can't have more entries than there are free blocks
                steps += 1;
                if steps > report.free_blocks + 1 {
                    emit(Finding::ListCycle { class, addr }, &mut report);
                    break;
                }

                if block.is_allocated() {
                    emit(Finding::AllocatedInList { class, addr }, &mut report);
                    break;
                }

                report.listed += 1;

                let size = block.size();
                if size >= consts::MIN_BLOCK_SIZE && size % ALIGN_SIZE == 0 {
                    let expected = util::mapping_insert(size);
                    if expected != class {
                        emit(
                            Finding::WrongClass {
                                addr,
                                class,
                                expected,
                            },
                            &mut report,
                        );
                    }
                }

                let fb = unsafe { FreeBlock::new_unchecked(block) };
                if fb.prev_link() != prev {
                    emit(Finding::BrokenLink { class, addr }, &mut report);
                }

                let next = fb.next_link();
                if next == Some(block) {
                    emit(Finding::ListCycle { class, addr }, &mut report);
                    break;
                }

                prev = Some(block);
                entry = next;
            }
        }

        if report.listed != report.free_blocks {
            emit(
                Finding::Unlisted {
                    free: report.free_blocks,
                    listed: report.listed,
                },
                &mut report,
            );
        }

        report
    }
}

// the checks that only need the block itself
fn inspect(block: Block) -> impl Iterator<Item = Finding> {
    let tag = block.tag();
    let footer = block.footer_tag();
    let addr = block.addr();

    let dump = Finding::Block(BlockInfo {
        addr,
        size: tag.size(),
        allocated: tag.is_allocated(),
        footer_size: footer.size(),
        footer_allocated: footer.is_allocated(),
    });

    let misaligned = if addr % ALIGN_SIZE != 0 {
        Some(Finding::Misaligned { addr })
    } else {
        None
    };

    // bits between the allocated flag and the alignment boundary must be clear
    let bad_size = if tag.size() < consts::MIN_BLOCK_SIZE || tag.bits() & (ALIGN_SIZE - 2) != 0 {
        Some(Finding::BadSize {
            addr,
            size: tag.size(),
        })
    } else {
        None
    };

    let mismatch = if tag != footer {
        Some(Finding::TagMismatch {
            addr,
            header: tag.bits(),
            footer: footer.bits(),
        })
    } else {
        None
    };

    Some(dump)
        .into_iter()
        .chain(misaligned)
        .chain(bad_size)
        .chain(mismatch)
}

#[cfg(feature = "ufmt")]
impl ufmt::uDebug for BlockInfo {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        f.debug_struct("BlockInfo")?
            .field("addr", &self.addr)?
            .field("size", &self.size)?
            .field("allocated", &self.allocated)?
            .field("footer_size", &self.footer_size)?
            .field("footer_allocated", &self.footer_allocated)?
            .finish()
    }
}

#[cfg(feature = "ufmt")]
impl ufmt::uDebug for Finding {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        match *self {
            Finding::Block(ref info) => f.debug_tuple("Block")?.field(info)?.finish(),
            Finding::BadPrologue => f.write_str("BadPrologue"),
            Finding::BadEpilogue { addr } => {
                f.debug_struct("BadEpilogue")?.field("addr", &addr)?.finish()
            }
            Finding::Misaligned { addr } => {
                f.debug_struct("Misaligned")?.field("addr", &addr)?.finish()
            }
            Finding::BadSize { addr, size } => f
                .debug_struct("BadSize")?
                .field("addr", &addr)?
                .field("size", &size)?
                .finish(),
            Finding::TagMismatch {
                addr,
                header,
                footer,
            } => f
                .debug_struct("TagMismatch")?
                .field("addr", &addr)?
                .field("header", &header)?
                .field("footer", &footer)?
                .finish(),
            Finding::OutOfBounds { addr } => {
                f.debug_struct("OutOfBounds")?.field("addr", &addr)?.finish()
            }
            Finding::ListCycle { class, addr } => f
                .debug_struct("ListCycle")?
                .field("class", &class)?
                .field("addr", &addr)?
                .finish(),
            Finding::BrokenLink { class, addr } => f
                .debug_struct("BrokenLink")?
                .field("class", &class)?
                .field("addr", &addr)?
                .finish(),
            Finding::AllocatedInList { class, addr } => f
                .debug_struct("AllocatedInList")?
                .field("class", &class)?
                .field("addr", &addr)?
                .finish(),
            Finding::WrongClass {
                addr,
                class,
                expected,
            } => f
                .debug_struct("WrongClass")?
                .field("addr", &addr)?
                .field("class", &class)?
                .field("expected", &expected)?
                .finish(),
            Finding::Unlisted { free, listed } => f
                .debug_struct("Unlisted")?
                .field("free", &free)?
                .field("listed", &listed)?
                .finish(),
        }
    }
}

#[cfg(feature = "ufmt")]
impl ufmt::uDebug for Report {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        f.debug_struct("Report")?
            .field("blocks", &self.blocks)?
            .field("free_blocks", &self.free_blocks)?
            .field("free_bytes", &self.free_bytes)?
            .field("listed", &self.listed)?
            .field("problems", &self.problems)?
            .finish()
    }
}

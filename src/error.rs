use core::fmt;

/// The growth primitive could not extend the arena
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrowError;

impl fmt::Display for GrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the arena could not be grown")
    }
}

/// Errors reported by [`Heap`](crate::Heap)
///
/// None of these leave the heap in an inconsistent state: a failed operation changes nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The growth primitive refused to extend the arena
    OutOfMemory,
    /// The growth primitive handed out a region that is not word aligned
    Misaligned,
    /// The growth primitive handed out a region that does not start at the current top of the
    /// arena; the region is left unused
    Discontiguous,
    /// The requested size overflows the address space
    TooLarge,
}

impl From<GrowError> for Error {
    fn from(_: GrowError) -> Self {
        Error::OutOfMemory
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::OutOfMemory => "out of memory",
            Error::Misaligned => "arena region is not word aligned",
            Error::Discontiguous => "arena region does not follow the top of the arena",
            Error::TooLarge => "requested size is too large",
        })
    }
}

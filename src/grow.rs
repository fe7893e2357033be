//! Arena growth primitives

use core::{marker::PhantomData, ptr::NonNull};

use crate::error::GrowError;

/// Something that can extend the arena, like `sbrk`
///
/// # Safety
///
/// On success `grow(n)` must return the start of `n` fresh, writable bytes that nothing else uses
/// and that immediately follow the region returned by the previous call. The first call may
/// return any address.
pub unsafe trait Grow {
    /// Extends the arena by `bytes` bytes and returns the start of the new region
    ///
    /// `bytes` is always a positive multiple of the machine word size.
    fn grow(&mut self, bytes: usize) -> Result<NonNull<u8>, GrowError>;
}

unsafe impl<G> Grow for &mut G
where
    G: Grow + ?Sized,
{
    fn grow(&mut self, bytes: usize) -> Result<NonNull<u8>, GrowError> {
        (**self).grow(bytes)
    }
}

/// Grows the arena inside a fixed, caller provided buffer
///
/// The buffer plays the role of the whole address range the arena may ever occupy; growth fails
/// once it is exhausted.
pub struct Region<'a> {
    start: NonNull<u8>,
    len: usize,
    top: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> Region<'a> {
    /// Creates a growth primitive that hands out `memory` front to back
    pub fn new(memory: &'a mut [u8]) -> Self {
        Region {
            // NOTE a slice pointer is never null, not even for empty slices
            start: NonNull::from(&mut *memory).cast(),
            len: memory.len(),
            top: 0,
            _marker: PhantomData,
        }
    }

    /// Bytes handed out so far
    pub fn used(&self) -> usize {
        self.top
    }

    /// Total size of the underlying buffer
    pub fn capacity(&self) -> usize {
        self.len
    }
}

// NOTE behaves like the `&mut [u8]` it was created from
unsafe impl Send for Region<'_> {}

unsafe impl Grow for Region<'_> {
    fn grow(&mut self, bytes: usize) -> Result<NonNull<u8>, GrowError> {
        if bytes > self.len - self.top {
            return Err(GrowError);
        }

        let ptr = unsafe { NonNull::new_unchecked(self.start.as_ptr().add(self.top)) };
        self.top += bytes;

        Ok(ptr)
    }
}

/// Grows the arena by moving the program break with `sbrk(2)`
#[cfg(all(unix, feature = "sbrk"))]
pub struct Sbrk {
    _private: (),
}

#[cfg(all(unix, feature = "sbrk"))]
impl Sbrk {
    /// # Safety
    ///
    /// Nothing else (including the system allocator and other `Sbrk` values) may move the program
    /// break while this value is in use, or the arena will not be contiguous
    pub unsafe fn new() -> Self {
        Sbrk { _private: () }
    }
}

#[cfg(all(unix, feature = "sbrk"))]
unsafe impl Grow for Sbrk {
    fn grow(&mut self, bytes: usize) -> Result<NonNull<u8>, GrowError> {
        use core::convert::TryFrom;

        let increment = libc::intptr_t::try_from(bytes).map_err(|_| GrowError)?;
        let address = unsafe { libc::sbrk(increment) };

        if address == usize::MAX as *mut libc::c_void {
            return Err(GrowError);
        }

        NonNull::new(address as *mut u8).ok_or(GrowError)
    }
}

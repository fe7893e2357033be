use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use spin::{Mutex, MutexGuard};

use crate::{consts::ALIGN_SIZE, error::Error, grow::Grow, Heap};

/// A [`Heap`] behind a spin lock, usable as the `#[global_allocator]`
///
/// Allocation requests fail (return null) until [`init`](LockedHeap::init) is called and for
/// alignments above [`ALIGN_SIZE`].
///
/// Don't use it from interrupt handlers: the lock is not reentrant and can deadlock.
pub struct LockedHeap<G> {
    inner: Mutex<Option<Heap<G>>>,
}

impl<G> LockedHeap<G>
where
    G: Grow,
{
    /// A heap without an arena
    pub const fn empty() -> Self {
        LockedHeap {
            inner: Mutex::new(None),
        }
    }

    /// Sets up the arena
    ///
    /// # Safety
    ///
    /// If the heap was already initialized the old arena is abandoned; none of its blocks may be
    /// freed or reallocated afterwards
    pub unsafe fn init(&self, grow: G) -> Result<(), Error> {
        let heap = Heap::init(grow)?;
        *self.inner.lock() = Some(heap);
        Ok(())
    }

    /// Grants direct access to the heap, e.g. to [`check`](Heap::check) it
    pub fn lock(&self) -> MutexGuard<'_, Option<Heap<G>>> {
        self.inner.lock()
    }
}

unsafe impl<G> GlobalAlloc for LockedHeap<G>
where
    G: Grow,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN_SIZE {
            return ptr::null_mut();
        }

        match self.inner.lock().as_mut() {
            Some(heap) => match heap.alloc(layout.size()) {
                Ok(Some(ptr)) => ptr.as_ptr(),
                _ => ptr::null_mut(),
            },
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _: Layout) {
        if let Some(heap) = self.inner.lock().as_mut() {
            heap.free(NonNull::new(ptr));
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGN_SIZE {
            return ptr::null_mut();
        }

        match self.inner.lock().as_mut() {
            // NOTE `new_size` is never zero here
            Some(heap) => match heap.realloc(NonNull::new(ptr), new_size) {
                Ok(Some(ptr)) => ptr.as_ptr(),
                _ => ptr::null_mut(),
            },
            None => ptr::null_mut(),
        }
    }
}

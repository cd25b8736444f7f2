//! Fiber stacks
//!
//! Stacks are mmap-backed with a guard page below the usable region.
//! A stack outlives the fiber that used it when the fiber goes back to
//! the pool; [`FiberStack::scrub`] wipes the stale image before reuse.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix::release_pages;
    } else {
        compile_error!("skein-runtime currently supports unix targets only");
    }
}

use corosensei::stack::{DefaultStack, Stack};
use skein_core::{SchedError, SchedResult};

/// Stack backing one fiber
pub struct FiberStack {
    inner: DefaultStack,
    size: usize,
}

impl FiberStack {
    /// Map a new stack of at least `size` usable bytes.
    pub fn new(size: usize) -> SchedResult<Self> {
        let inner = DefaultStack::new(size)
            .map_err(|e| SchedError::Stack(format!("mapping {} byte stack: {}", size, e)))?;
        Ok(Self { inner, size })
    }

    /// Requested usable size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Highest address of the usable region (stacks grow down)
    #[inline]
    pub fn top(&self) -> usize {
        self.inner.base().get()
    }

    /// Lowest usable address, just above the guard page
    #[inline]
    pub fn bottom(&self) -> usize {
        self.inner.limit().get()
    }

    /// Zero the usable region so nothing from the previous occupant
    /// survives into the next body.
    ///
    /// Must only be called while no context is running on the stack.
    pub fn scrub(&mut self) -> SchedResult<()> {
        let bottom = self.bottom();
        let len = self.top() - bottom;
        // SAFETY: [bottom, top) is the read/write part of a mapping we own
        // exclusively, and no context is executing on it.
        unsafe { release_pages(bottom as *mut u8, len) }
    }

    pub(crate) fn into_inner(self) -> DefaultStack {
        self.inner
    }

    pub(crate) fn from_inner(inner: DefaultStack, size: usize) -> Self {
        Self { inner, size }
    }
}

impl std::fmt::Debug for FiberStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberStack")
            .field("bottom", &format_args!("{:#x}", self.bottom()))
            .field("top", &format_args!("{:#x}", self.top()))
            .field("size", &self.size)
            .finish()
    }
}

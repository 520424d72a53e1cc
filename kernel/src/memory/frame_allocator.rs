//! The seam to the physical frame allocator.
//!
//! The buddy allocator itself lives outside this subsystem; the core
//! only relies on the [`FramePool`] contract. [`PhysicalMemory`] wraps
//! one pool behind its own lock, which is acquired *after* the
//! address-space lock and can be handed down pre-acquired so a batch
//! of page-table updates pays for it once — the mapper may need frames
//! of its own for intermediate table levels.

use alloc::{boxed::Box, sync::Arc};
use spin::{Mutex, MutexGuard};
use x86_64::structures::paging::{PhysFrame, Size4KiB};

/// Physical frame provider plus direct-map access to frame contents.
///
/// Block operations deal in naturally aligned runs of `2^order`
/// contiguous frames, matching a buddy allocator's granularity. The
/// content accessors stand in for the kernel's higher-half direct
/// mapping, so the core never needs a raw physical pointer.
pub trait FramePool: Send {
    /// Allocate a block of `2^order` contiguous frames, returning the
    /// first one, or `None` when physical memory is exhausted.
    fn allocate_frames(&mut self, order: u16) -> Option<PhysFrame<Size4KiB>>;

    /// Return a block previously handed out by
    /// [`allocate_frames`](Self::allocate_frames).
    fn free_frames(&mut self, frame: PhysFrame<Size4KiB>, order: u16);

    /// Single-frame convenience used by the demand-paging paths.
    fn allocate_page(&mut self) -> Option<PhysFrame<Size4KiB>> {
        self.allocate_frames(0)
    }

    fn free_page(&mut self, frame: PhysFrame<Size4KiB>) {
        self.free_frames(frame, 0)
    }

    /// Zero-fill one frame.
    fn zero_frame(&mut self, frame: PhysFrame<Size4KiB>);

    /// Copy a whole frame's contents from `src` to `dst`.
    fn copy_frame(&mut self, dst: PhysFrame<Size4KiB>, src: PhysFrame<Size4KiB>);

    /// Write `bytes` into `frame` starting at `offset`.
    fn write_frame(&mut self, frame: PhysFrame<Size4KiB>, offset: usize, bytes: &[u8]);

    /// Read from `frame` starting at `offset` into `buf`.
    fn read_frame(&mut self, frame: PhysFrame<Size4KiB>, offset: usize, buf: &mut [u8]);
}

/// The process-wide physical memory collaborator.
///
/// Constructed once at boot around the real allocator (or around a
/// test double) and passed to every address space as an `Arc`. Keeping
/// it a parameter rather than a global keeps the core test-doublable.
pub struct PhysicalMemory {
    pool: Mutex<Box<dyn FramePool>>,
}

impl core::fmt::Debug for PhysicalMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhysicalMemory").finish_non_exhaustive()
    }
}

impl PhysicalMemory {
    pub fn new(pool: Box<dyn FramePool>) -> Arc<Self> {
        Arc::new(PhysicalMemory {
            pool: Mutex::new(pool),
        })
    }

    /// Acquire the pool lock. The guard derefs to the pool and can be
    /// passed down into page-table batches.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn FramePool>> {
        self.pool.lock()
    }

    /// Closure convenience for one-shot pool operations.
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut dyn FramePool) -> R) -> R {
        let mut guard = self.pool.lock();
        f(guard.as_mut())
    }
}

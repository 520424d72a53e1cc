//! The hardware page-table facade.
//!
//! The architecture-specific mapper stays outside the subsystem; the
//! core drives it through [`PageSpace`]. Callers serialize updates to
//! the same address through the address-space lock; the facade only
//! has to tolerate concurrent updates to different addresses.

use alloc::boxed::Box;
use x86_64::{
    structures::paging::{PageTableFlags, PhysFrame, Size4KiB},
    VirtAddr,
};

use super::frame_allocator::FramePool;

/// One hardware address space: a page-table tree and the operations
/// the core needs on it.
pub trait PageSpace: Send {
    /// Install a 4 KiB translation. `pool` is the pre-acquired
    /// physical pool, available in case intermediate table levels must
    /// be allocated. Mapping an already-mapped address is a bug.
    fn map4k(
        &mut self,
        pool: &mut dyn FramePool,
        virt: VirtAddr,
        frame: PhysFrame<Size4KiB>,
        user: bool,
        flags: PageTableFlags,
    );

    /// Drop the 4 KiB translation at `virt`. A no-op when nothing is
    /// mapped there, so callers may sweep a range unconditionally.
    fn unmap4k(&mut self, virt: VirtAddr);

    /// Current translation at `virt`, if any.
    fn translate(&self, virt: VirtAddr) -> Option<(PhysFrame<Size4KiB>, PageTableFlags)>;

    /// Make this space current on the calling CPU.
    fn activate(&self);

    /// New page space sharing the kernel's upper half with this one;
    /// the user half starts empty. Used to seed a forked child.
    fn clone_upper_half(&self, pool: &mut dyn FramePool) -> Box<dyn PageSpace>;
}

/// Page-table flags for a user mapping with the given permissions.
///
/// Read is implicit; the execute bit is strictly gated on the
/// mapping's execute permission.
pub fn page_flags_for(write: bool, execute: bool) -> PageTableFlags {
    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
    if write {
        flags.set(PageTableFlags::WRITABLE, true);
    }
    if !execute {
        flags.set(PageTableFlags::NO_EXECUTE, true);
    }
    flags
}

//! Memory objects: the frame containers behind backed mappings.

use alloc::{sync::Arc, vec::Vec};
use bitflags::bitflags;
use spin::Mutex;
use x86_64::structures::paging::{PhysFrame, Size4KiB};

use super::frame_allocator::PhysicalMemory;
use crate::constants::memory::PAGE_SIZE;

/// Shared handle to a memory object. Mappings in any number of address
/// spaces may hold one, and a copy-on-write object holds one to its
/// master.
pub type MemoryRef = Arc<Mutex<MemoryObject>>;

/// How a memory object relates to its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// Frames are owned elsewhere (device memory, boot modules); never
    /// freed by us.
    Physical,
    /// Anonymous memory whose frames we own and free.
    Allocated,
    /// Lazily populated private copy of a master object.
    CopyOnWrite,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryFlags: u32 {
        /// Leave page slots unbacked until the first fault.
        const ON_DEMAND = 1 << 0;
    }
}

/// A dense run of page slots, each either bound to a physical frame or
/// still empty.
#[derive(Debug)]
pub struct MemoryObject {
    kind: MemoryKind,
    flags: MemoryFlags,
    pages: Vec<Option<PhysFrame<Size4KiB>>>,
    master: Option<MemoryRef>,
    physical: Arc<PhysicalMemory>,
}

impl MemoryObject {
    /// Anonymous memory. Combine with [`MemoryFlags::ON_DEMAND`] to
    /// defer frame allocation to the fault handler.
    pub fn new_allocated(physical: Arc<PhysicalMemory>, flags: MemoryFlags) -> MemoryRef {
        Arc::new(Mutex::new(MemoryObject {
            kind: MemoryKind::Allocated,
            flags,
            pages: Vec::new(),
            master: None,
            physical,
        }))
    }

    /// Externally owned frames; the caller binds them with
    /// [`set_page`](Self::set_page) and keeps ownership.
    pub fn new_physical(physical: Arc<PhysicalMemory>) -> MemoryRef {
        Arc::new(Mutex::new(MemoryObject {
            kind: MemoryKind::Physical,
            flags: MemoryFlags::empty(),
            pages: Vec::new(),
            master: None,
            physical,
        }))
    }

    /// A lazily populated private view of `master`, created when a
    /// fork breaks a mapping into copy-on-write halves.
    pub(crate) fn new_copy_on_write(
        master: MemoryRef,
        num_pages: usize,
        physical: Arc<PhysicalMemory>,
    ) -> MemoryRef {
        let mut object = MemoryObject {
            kind: MemoryKind::CopyOnWrite,
            flags: MemoryFlags::empty(),
            pages: Vec::new(),
            master: Some(master),
            physical,
        };
        object.resize(num_pages);
        Arc::new(Mutex::new(object))
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub fn flags(&self) -> MemoryFlags {
        self.flags
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub(crate) fn master(&self) -> Option<&MemoryRef> {
        self.master.as_ref()
    }

    /// Grow to `num_pages` slots; new slots start unbacked. Shrinking
    /// is not supported.
    pub fn resize(&mut self, num_pages: usize) {
        assert!(self.pages.len() < num_pages);
        self.pages.resize(num_pages, None);
    }

    /// The frame bound at `index`, or `None` while the slot is still
    /// unbacked.
    pub fn get_page(&self, index: usize) -> Option<PhysFrame<Size4KiB>> {
        self.pages[index]
    }

    /// Bind a frame to an unbacked slot. Rebinding is a bug.
    pub fn set_page(&mut self, index: usize, frame: PhysFrame<Size4KiB>) {
        assert!(self.pages[index].is_none(), "page slot already bound");
        self.pages[index] = Some(frame);
    }

    /// Zero-fill every bound page.
    pub fn zero_pages(&self) {
        assert!(self.kind == MemoryKind::Allocated);
        let mut pool = self.physical.lock();
        for frame in self.pages.iter().flatten() {
            pool.zero_frame(*frame);
        }
    }

    /// Copy `bytes` into the object starting at byte `offset`,
    /// handling a misaligned head and a partial tail. Every touched
    /// slot must already be bound.
    pub fn copy_to(&self, offset: usize, mut bytes: &[u8]) {
        assert!(self.kind == MemoryKind::Allocated);

        let mut pool = self.physical.lock();
        let mut index = offset / PAGE_SIZE;

        let misalign = offset % PAGE_SIZE;
        if misalign > 0 && !bytes.is_empty() {
            let prefix = (PAGE_SIZE - misalign).min(bytes.len());
            let frame = self.pages[index].expect("copy into an unbacked page");
            pool.write_frame(frame, misalign, &bytes[..prefix]);
            bytes = &bytes[prefix..];
            index += 1;
        }

        while bytes.len() >= PAGE_SIZE {
            let frame = self.pages[index].expect("copy into an unbacked page");
            pool.write_frame(frame, 0, &bytes[..PAGE_SIZE]);
            bytes = &bytes[PAGE_SIZE..];
            index += 1;
        }

        if !bytes.is_empty() {
            let frame = self.pages[index].expect("copy into an unbacked page");
            pool.write_frame(frame, 0, bytes);
        }
    }
}

impl Drop for MemoryObject {
    fn drop(&mut self) {
        match self.kind {
            // the frames belong to someone else
            MemoryKind::Physical => {}
            MemoryKind::Allocated | MemoryKind::CopyOnWrite => {
                let mut pool = self.physical.lock();
                for frame in self.pages.iter().flatten() {
                    pool.free_page(*frame);
                }
            }
        }
    }
}

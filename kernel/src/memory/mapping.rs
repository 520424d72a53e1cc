//! Mapping records: one interval of the virtual address space.

use bitflags::bitflags;
use x86_64::VirtAddr;

use super::{address_tree::MappingId, memory_object::MemoryRef};

bitflags! {
    /// Flags accepted by [`AddressSpace::map`](super::AddressSpace::map).
    ///
    /// Exactly one of the three permission flags must be given, and
    /// exactly one placement flag unless `FIXED` is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// Map at the caller-supplied address instead of searching.
        const FIXED         = 1 << 0;
        /// Search for a hole from the bottom of the window.
        const PREFER_BOTTOM = 1 << 1;
        /// Search for a hole from the top of the window.
        const PREFER_TOP    = 1 << 2;
        /// Child address spaces share this mapping instead of getting a
        /// copy-on-write clone.
        const SHARE_ON_FORK = 1 << 3;
        const READ_ONLY     = 1 << 4;
        const READ_WRITE    = 1 << 5;
        const READ_EXECUTE  = 1 << 6;
    }
}

bitflags! {
    /// Per-mapping state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MappingFlags: u32 {
        const SHARE_ON_FORK = 1 << 0;
    }
}

/// What an interval of the address space currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// Free range, available to the allocator.
    Hole,
    /// Carved out of a hole but not yet given a backing; only exists
    /// inside a `map` call.
    Reserved,
    /// Backed by a memory object.
    Backed,
}

/// Red-black color of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Color {
    Red,
    Black,
}

/// A single interval record.
///
/// Tree links, the in-order neighbor list and the largest-hole augment
/// live directly on the record; the links are arena handles owned by
/// the [`AddressTree`](super::AddressTree), never owning references.
#[derive(Debug)]
pub struct Mapping {
    pub(crate) base: VirtAddr,
    pub(crate) length: u64,
    pub(crate) kind: MappingKind,
    pub(crate) memory: Option<MemoryRef>,
    /// Offset into the memory object; kept for sub-object mappings,
    /// currently always zero.
    pub(crate) memory_offset: u64,
    pub(crate) flags: MappingFlags,
    pub(crate) write_permission: bool,
    pub(crate) execute_permission: bool,

    pub(crate) left: Option<MappingId>,
    pub(crate) right: Option<MappingId>,
    pub(crate) parent: Option<MappingId>,
    pub(crate) color: Color,

    /// In-order predecessor, for constant-time neighbor lookups.
    pub(crate) lower: Option<MappingId>,
    /// In-order successor.
    pub(crate) higher: Option<MappingId>,

    /// Largest hole length in the subtree rooted here.
    pub(crate) largest_hole: u64,
}

impl Mapping {
    pub(crate) fn new(kind: MappingKind, base: VirtAddr, length: u64) -> Self {
        Mapping {
            base,
            length,
            kind,
            memory: None,
            memory_offset: 0,
            flags: MappingFlags::empty(),
            write_permission: false,
            execute_permission: false,
            left: None,
            right: None,
            parent: None,
            color: Color::Red,
            lower: None,
            higher: None,
            largest_hole: if kind == MappingKind::Hole { length } else { 0 },
        }
    }

    pub fn base(&self) -> VirtAddr {
        self.base
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Exclusive end of the interval. Plain `u64` because the topmost
    /// mapping ends at a non-canonical address.
    pub fn end(&self) -> u64 {
        self.base.as_u64() + self.length
    }

    pub fn kind(&self) -> MappingKind {
        self.kind
    }

    pub fn memory(&self) -> Option<&MemoryRef> {
        self.memory.as_ref()
    }

    pub fn memory_offset(&self) -> u64 {
        self.memory_offset
    }

    pub fn flags(&self) -> MappingFlags {
        self.flags
    }

    pub fn is_writable(&self) -> bool {
        self.write_permission
    }

    pub fn is_executable(&self) -> bool {
        self.execute_permission
    }

    pub fn largest_hole(&self) -> u64 {
        self.largest_hole
    }

    /// True if `address` falls inside this interval.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base.as_u64() && address < self.end()
    }
}

//! The virtual memory subsystem.
//!
//! An [`AddressSpace`] keeps an interval tree of [`Mapping`]s over the
//! user window and drives a hardware page-table facade through it.
//! Mappings are backed by refcounted [`MemoryObject`]s; physical frames
//! come from a [`FramePool`] collaborator that is handed in explicitly
//! rather than reached through a global.
//!
//! Lock order, outermost first: address-space state, memory object
//! (a copy-on-write object before its master), physical pool.

pub mod address_space;
pub mod address_tree;
pub mod frame_allocator;
pub mod mapping;
pub mod memory_object;
pub mod paging;


pub use address_space::AddressSpace;
pub use address_tree::{AddressTree, MappingId, Placement};
pub use frame_allocator::{FramePool, PhysicalMemory};
pub use mapping::{MapFlags, Mapping, MappingFlags, MappingKind};
pub use memory_object::{MemoryFlags, MemoryKind, MemoryObject, MemoryRef};
pub use paging::{page_flags_for, PageSpace};

/// Errors surfaced by the fallible address-space operations.
///
/// Invariant violations are kernel bugs and abort instead of flowing
/// through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No hole large enough for the requested length.
    OutOfVirtualSpace,
    /// Bad alignment, bad bounds, or a malformed flag combination.
    InvalidArgument,
    /// The address resolves to no mapping.
    NotFound,
    /// The physical allocator could not produce a frame.
    OutOfMemory,
}

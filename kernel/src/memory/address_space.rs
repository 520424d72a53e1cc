//! Address spaces: map, unmap, fault handling, fork, activate.

use alloc::{boxed::Box, sync::Arc};
use log::{debug, trace, warn};
use spin::Mutex;
use x86_64::{structures::idt::PageFaultErrorCode, VirtAddr};

use super::{
    address_tree::{AddressTree, MappingId, Placement},
    frame_allocator::PhysicalMemory,
    mapping::{MapFlags, Mapping, MappingFlags, MappingKind},
    memory_object::{MemoryFlags, MemoryKind, MemoryObject, MemoryRef},
    paging::{page_flags_for, PageSpace},
    VmError,
};
use crate::constants::memory::{PAGE_SIZE, USER_SPACE_LENGTH, USER_SPACE_START};

struct SpaceState {
    tree: AddressTree,
    page_space: Box<dyn PageSpace>,
}

/// One virtual address space: the mapping tree plus the hardware page
/// table it drives.
///
/// All operations serialize on the internal lock; the physical pool's
/// lock nests strictly inside it.
pub struct AddressSpace {
    state: Mutex<SpaceState>,
    physical: Arc<PhysicalMemory>,
}

impl AddressSpace {
    /// An empty space. Call
    /// [`setup_default_mappings`](Self::setup_default_mappings) to open
    /// the user window; `fork` fills the tree by cloning instead.
    pub fn new(page_space: Box<dyn PageSpace>, physical: Arc<PhysicalMemory>) -> Self {
        AddressSpace {
            state: Mutex::new(SpaceState {
                tree: AddressTree::new(),
                page_space,
            }),
            physical,
        }
    }

    /// Seed the managed user window as one hole.
    pub fn setup_default_mappings(&self) {
        let mut state = self.state.lock();
        assert!(state.tree.is_empty());
        state.tree.insert(Mapping::new(
            MappingKind::Hole,
            VirtAddr::new(USER_SPACE_START),
            USER_SPACE_LENGTH,
        ));
    }

    /// Map `memory` into this space and return the chosen base.
    ///
    /// `flags` must carry exactly one permission flag, and exactly one
    /// placement flag unless `FIXED` is set (then `address` decides).
    /// The memory object must span the mapping; slots it has already
    /// bound are installed in the page table now, the rest wait for
    /// the fault handler.
    pub fn map(
        &self,
        memory: &MemoryRef,
        address: Option<VirtAddr>,
        length: u64,
        flags: MapFlags,
    ) -> Result<VirtAddr, VmError> {
        if length == 0 || length % PAGE_SIZE as u64 != 0 {
            return Err(VmError::InvalidArgument);
        }
        let perms = flags & (MapFlags::READ_ONLY | MapFlags::READ_WRITE | MapFlags::READ_EXECUTE);
        if perms.bits().count_ones() != 1 {
            return Err(VmError::InvalidArgument);
        }
        let write = perms == MapFlags::READ_WRITE;
        let execute = perms == MapFlags::READ_EXECUTE;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let id = if flags.contains(MapFlags::FIXED) {
            let address = address.ok_or(VmError::InvalidArgument)?;
            if address.as_u64() % PAGE_SIZE as u64 != 0 {
                return Err(VmError::InvalidArgument);
            }
            state.tree.allocate_at(address.as_u64(), length)?
        } else {
            let placement = match (
                flags.contains(MapFlags::PREFER_BOTTOM),
                flags.contains(MapFlags::PREFER_TOP),
            ) {
                (true, false) => Placement::Bottom,
                (false, true) => Placement::Top,
                _ => return Err(VmError::InvalidArgument),
            };
            state
                .tree
                .allocate(length, placement)
                .ok_or(VmError::OutOfVirtualSpace)?
        };

        {
            let mapping = state.tree.mapping_mut(id);
            mapping.kind = MappingKind::Backed;
            mapping.memory = Some(Arc::clone(memory));
            mapping.write_permission = write;
            mapping.execute_permission = execute;
            if flags.contains(MapFlags::SHARE_ON_FORK) {
                mapping.flags |= MappingFlags::SHARE_ON_FORK;
            }
        }
        let base = state.tree.mapping(id).base;

        // install whatever is already backed; unbacked slots get their
        // translations lazily from the fault handler
        let page_flags = page_flags_for(write, execute);
        {
            let mem = memory.lock();
            let mut pool_guard = None;
            for i in 0..(length / PAGE_SIZE as u64) {
                let Some(frame) = mem.get_page(i as usize) else {
                    continue;
                };
                let pool = pool_guard.get_or_insert_with(|| self.physical.lock());
                let vaddr = VirtAddr::new(base.as_u64() + i * PAGE_SIZE as u64);
                state.page_space.map4k(&mut ***pool, vaddr, frame, true, page_flags);
            }
        }

        debug_assert!(state.tree.check_invariant());
        debug!("mapped {:#x}..{:#x}", base.as_u64(), base.as_u64() + length);
        Ok(base)
    }

    /// Remove the mapping that starts at `address` and spans exactly
    /// `length` bytes; partial unmap is not supported. The freed range
    /// is coalesced with neighboring holes.
    pub fn unmap(&self, address: VirtAddr, length: u64) -> Result<(), VmError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let id = state.tree.lookup(address.as_u64()).ok_or(VmError::NotFound)?;
        {
            let mapping = state.tree.mapping(id);
            if mapping.kind != MappingKind::Backed {
                return Err(VmError::InvalidArgument);
            }
            if mapping.base != address || mapping.length != length {
                return Err(VmError::InvalidArgument);
            }
        }

        for i in 0..(length / PAGE_SIZE as u64) {
            state
                .page_space
                .unmap4k(VirtAddr::new(address.as_u64() + i * PAGE_SIZE as u64));
        }

        let released_memory = state.tree.mapping_mut(id).memory.take();

        let lower = state.tree.mapping(id).lower;
        let higher = state.tree.mapping(id).higher;
        let lower_hole = lower.map_or(false, |l| state.tree.mapping(l).kind == MappingKind::Hole);
        let higher_hole = higher.map_or(false, |h| state.tree.mapping(h).kind == MappingKind::Hole);

        if lower_hole && higher_hole {
            // grow the lower hole over the mapping and the higher hole
            let mapping_length = state.tree.mapping(id).length;
            let higher = higher.unwrap();
            let higher_length = state.tree.mapping(higher).length;

            state.tree.remove(id);
            state.tree.release(id);
            state.tree.remove(higher);
            state.tree.release(higher);

            let lower = lower.unwrap();
            state.tree.mapping_mut(lower).length += mapping_length + higher_length;
            state.tree.update_largest_hole_upwards(lower);
        } else if lower_hole {
            // grow the lower hole over the mapping
            let mapping_length = state.tree.mapping(id).length;
            state.tree.remove(id);
            state.tree.release(id);

            let lower = lower.unwrap();
            state.tree.mapping_mut(lower).length += mapping_length;
            state.tree.update_largest_hole_upwards(lower);
        } else if higher_hole {
            // pull the higher hole down over the mapping
            let mapping_length = state.tree.mapping(id).length;
            state.tree.remove(id);
            state.tree.release(id);

            let higher = higher.unwrap();
            let mapping = state.tree.mapping_mut(higher);
            mapping.base = VirtAddr::new(mapping.base.as_u64() - mapping_length);
            mapping.length += mapping_length;
            state.tree.update_largest_hole_upwards(higher);
        } else {
            // no hole neighbors: the mapping itself becomes the hole
            state.tree.mapping_mut(id).kind = MappingKind::Hole;
            state.tree.update_largest_hole_upwards(id);
        }

        debug_assert!(state.tree.check_invariant());
        debug!(
            "unmapped {:#x}..{:#x}",
            address.as_u64(),
            address.as_u64() + length
        );

        drop(guard);
        // dropping the last reference returns the frames to the pool,
        // outside our lock
        drop(released_memory);
        Ok(())
    }

    /// Try to resolve a page fault at `address`. Returns true when the
    /// faulting access should be retried.
    pub fn handle_fault(&self, address: VirtAddr, error_code: PageFaultErrorCode) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(id) = state.tree.lookup(address.as_u64()) else {
            return false;
        };
        let mapping = state.tree.mapping(id);
        if mapping.kind != MappingKind::Backed {
            return false;
        }

        let offset = address.as_u64() - mapping.base.as_u64();
        let page_vaddr = VirtAddr::new(address.as_u64() - address.as_u64() % PAGE_SIZE as u64);
        let page_index = (offset / PAGE_SIZE as u64) as usize;
        let flags = page_flags_for(mapping.write_permission, mapping.execute_permission);
        let memory_ref = mapping.memory.clone().expect("backed mapping without memory");

        let mut memory = memory_ref.lock();
        match memory.kind() {
            MemoryKind::Allocated if memory.flags().contains(MemoryFlags::ON_DEMAND) => {
                if let Some(frame) = memory.get_page(page_index) {
                    if state.page_space.translate(page_vaddr).is_some() {
                        // already resolved; a stale fault needs no new frame
                        return false;
                    }
                    // another space sharing this object bound the slot;
                    // only the translation is missing here
                    let mut pool = self.physical.lock();
                    state.page_space.map4k(&mut **pool, page_vaddr, frame, true, flags);
                    trace!("adopted existing binding at {:#x}", page_vaddr.as_u64());
                    return true;
                }
                let mut pool = self.physical.lock();
                let Some(frame) = pool.allocate_page() else {
                    warn!(
                        "out of physical memory resolving {:#x} ({:?})",
                        address.as_u64(),
                        error_code
                    );
                    return false;
                };
                pool.zero_frame(frame);
                memory.set_page(page_index, frame);
                state.page_space.map4k(&mut **pool, page_vaddr, frame, true, flags);

                trace!("demand-backed {:#x}", page_vaddr.as_u64());
                true
            }
            MemoryKind::CopyOnWrite => {
                if memory.get_page(page_index).is_some() {
                    return false;
                }
                let master = memory
                    .master()
                    .cloned()
                    .expect("copy-on-write memory without master");
                let origin = master
                    .lock()
                    .get_page(page_index)
                    .expect("master page is not bound");

                let mut pool = self.physical.lock();
                let Some(frame) = pool.allocate_page() else {
                    warn!(
                        "out of physical memory resolving {:#x} ({:?})",
                        address.as_u64(),
                        error_code
                    );
                    return false;
                };
                pool.copy_frame(frame, origin);
                memory.set_page(page_index, frame);

                // swap the shared read-only translation for the private
                // copy; the mapping's own write permission comes back
                state.page_space.unmap4k(page_vaddr);
                state.page_space.map4k(&mut **pool, page_vaddr, frame, true, flags);

                trace!("copied {:#x} for write", page_vaddr.as_u64());
                true
            }
            _ => false,
        }
    }

    /// Clone this space. Holes clone as holes; shared mappings alias
    /// the same memory object; everything else is broken into
    /// copy-on-write halves, with the write bit masked out of both
    /// page tables until faults re-establish it per side.
    pub fn fork(&self) -> AddressSpace {
        let mut guard = self.state.lock();
        let src = &mut *guard;

        let page_space = {
            let mut pool = self.physical.lock();
            src.page_space.clone_upper_half(&mut **pool)
        };
        let mut dest = SpaceState {
            tree: AddressTree::new(),
            page_space,
        };

        if let Some(root) = src.tree.root() {
            clone_recursive(&self.physical, src, &mut dest, root);
        }
        debug_assert!(dest.tree.check_invariant());
        debug!("forked address space ({} mappings)", dest.tree.len());

        AddressSpace {
            state: Mutex::new(dest),
            physical: Arc::clone(&self.physical),
        }
    }

    /// Make this space current on the calling CPU.
    pub fn activate(&self) {
        self.state.lock().page_space.activate();
    }

    /// Run `f` against the mapping tree, under the space lock.
    pub fn with_tree<R>(&self, f: impl FnOnce(&AddressTree) -> R) -> R {
        let state = self.state.lock();
        f(&state.tree)
    }

    /// Run `f` against the page-table facade, under the space lock.
    pub fn with_page_space<R>(&self, f: impl FnOnce(&dyn PageSpace) -> R) -> R {
        let state = self.state.lock();
        f(state.page_space.as_ref())
    }

    /// Validate the full tree invariant.
    pub fn check_invariant(&self) -> bool {
        self.state.lock().tree.check_invariant()
    }
}

// Pre-order walk of the source tree, building the sibling mapping in
// the destination for every node.
fn clone_recursive(
    physical: &Arc<PhysicalMemory>,
    src: &mut SpaceState,
    dest: &mut SpaceState,
    id: MappingId,
) {
    let (kind, base, length, map_flags, write, execute) = {
        let m = src.tree.mapping(id);
        (
            m.kind,
            m.base,
            m.length,
            m.flags,
            m.write_permission,
            m.execute_permission,
        )
    };
    let mut dest_mapping = Mapping::new(kind, base, length);

    match kind {
        MappingKind::Hole => {}
        MappingKind::Reserved => panic!("fork ran into a reserved mapping"),
        MappingKind::Backed if map_flags.contains(MappingFlags::SHARE_ON_FORK) => {
            let memory_ref = src
                .tree
                .mapping(id)
                .memory
                .clone()
                .expect("backed mapping without memory");
            {
                let memory = memory_ref.lock();
                assert!(matches!(
                    memory.kind(),
                    MemoryKind::Allocated | MemoryKind::Physical
                ));

                let flags = page_flags_for(write, execute);
                let mut pool_guard = None;
                for i in 0..(length / PAGE_SIZE as u64) {
                    let Some(frame) = memory.get_page(i as usize) else {
                        continue;
                    };
                    let pool = pool_guard.get_or_insert_with(|| physical.lock());
                    let vaddr = VirtAddr::new(base.as_u64() + i * PAGE_SIZE as u64);
                    dest.page_space.map4k(&mut ***pool, vaddr, frame, true, flags);
                }
            }
            dest_mapping.memory = Some(memory_ref);
            dest_mapping.flags = map_flags;
            dest_mapping.write_permission = write;
            dest_mapping.execute_permission = execute;
        }
        MappingKind::Backed => {
            let original = src
                .tree
                .mapping(id)
                .memory
                .clone()
                .expect("backed mapping without memory");
            let num_pages;
            {
                let memory = original.lock();
                assert!(
                    memory.kind() == MemoryKind::Allocated,
                    "recursive copy-on-write is not supported"
                );
                num_pages = memory.num_pages();

                // both sides lose the write bit until a fault makes
                // the page private again
                let masked = page_flags_for(false, execute);
                let mut pool = physical.lock();
                for i in 0..(length / PAGE_SIZE as u64) {
                    let Some(frame) = memory.get_page(i as usize) else {
                        continue;
                    };
                    let vaddr = VirtAddr::new(base.as_u64() + i * PAGE_SIZE as u64);
                    src.page_space.unmap4k(vaddr);
                    src.page_space.map4k(&mut **pool, vaddr, frame, true, masked);
                    dest.page_space.map4k(&mut **pool, vaddr, frame, true, masked);
                }
            }

            let src_cow = MemoryObject::new_copy_on_write(
                Arc::clone(&original),
                num_pages,
                Arc::clone(physical),
            );
            let dest_cow = MemoryObject::new_copy_on_write(original, num_pages, Arc::clone(physical));
            src.tree.mapping_mut(id).memory = Some(src_cow);
            dest_mapping.memory = Some(dest_cow);
            dest_mapping.flags = map_flags;
            dest_mapping.write_permission = write;
            dest_mapping.execute_permission = execute;
        }
    }

    dest.tree.insert(dest_mapping);

    let left = src.tree.mapping(id).left;
    let right = src.tree.mapping(id).right;
    if let Some(left) = left {
        clone_recursive(physical, src, dest, left);
    }
    if let Some(right) = right {
        clone_recursive(physical, src, dest, right);
    }
}

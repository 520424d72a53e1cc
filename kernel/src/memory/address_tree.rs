//! The interval tree of mappings.
//!
//! An ordered red-black tree keyed by base address, augmented with the
//! largest free-hole length per subtree so allocation can descend to a
//! fitting hole in O(log n). Nodes live in a slab arena and reference
//! each other through [`MappingId`] handles; child edges own, the
//! parent edge observes. Removal rewires handles instead of copying
//! payloads, so a surviving mapping keeps its identity.
//!
//! An intrusive predecessor/successor list mirrors the in-order
//! traversal and gives unmap constant-time access to its neighbors.

use alloc::vec::Vec;
use log::error;
use x86_64::VirtAddr;

use super::mapping::{Color, Mapping, MappingKind};

/// Stable handle to a mapping inside one [`AddressTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingId(usize);

/// Which end of the address range `allocate` should prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Bottom,
    Top,
}

pub struct AddressTree {
    slots: Vec<Option<Mapping>>,
    free: Vec<usize>,
    root: Option<MappingId>,
}

impl AddressTree {
    pub fn new() -> Self {
        AddressTree {
            slots: Vec::new(),
            free: Vec::new(),
            root: None,
        }
    }

    pub fn root(&self) -> Option<MappingId> {
        self.root
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest hole anywhere in the tree.
    pub fn largest_hole(&self) -> u64 {
        self.root.map_or(0, |r| self.mapping(r).largest_hole)
    }

    pub fn mapping(&self, id: MappingId) -> &Mapping {
        self.slots[id.0].as_ref().expect("stale mapping handle")
    }

    pub(crate) fn mapping_mut(&mut self, id: MappingId) -> &mut Mapping {
        self.slots[id.0].as_mut().expect("stale mapping handle")
    }

    /// Leftmost mapping, i.e. the lowest interval.
    pub fn first(&self) -> Option<MappingId> {
        let mut id = self.root?;
        while let Some(left) = self.mapping(id).left {
            id = left;
        }
        Some(id)
    }

    /// In-order iteration over all mappings, lowest interval first.
    pub fn iter(&self) -> InOrder<'_> {
        InOrder {
            tree: self,
            next: self.first(),
        }
    }

    fn alloc(&mut self, mapping: Mapping) -> MappingId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(mapping);
                MappingId(index)
            }
            None => {
                self.slots.push(Some(mapping));
                MappingId(self.slots.len() - 1)
            }
        }
    }

    /// Release a detached node's slot, returning its payload.
    pub(crate) fn release(&mut self, id: MappingId) -> Mapping {
        let mapping = self.slots[id.0].take().expect("releasing a stale mapping");
        assert!(
            mapping.parent.is_none() && mapping.left.is_none() && mapping.right.is_none(),
            "releasing a mapping that is still linked"
        );
        self.free.push(id.0);
        mapping
    }

    // --------------------------------------------------------
    // Lookup and allocation
    // --------------------------------------------------------

    /// Find the mapping whose interval contains `address`.
    pub fn lookup(&self, address: u64) -> Option<MappingId> {
        let mut current = self.root;
        while let Some(id) = current {
            let mapping = self.mapping(id);
            if address < mapping.base.as_u64() {
                current = mapping.left;
            } else if address >= mapping.end() {
                current = mapping.right;
            } else {
                return Some(id);
            }
        }
        None
    }

    /// Carve a reserved range of `length` bytes out of some hole,
    /// guided by the largest-hole augment. Returns `None` exactly when
    /// no hole is large enough.
    pub(crate) fn allocate(&mut self, length: u64, placement: Placement) -> Option<MappingId> {
        debug_assert!(length > 0);
        let root = self.root?;
        if self.mapping(root).largest_hole < length {
            return None;
        }
        Some(self.allocate_dfs(root, length, placement))
    }

    fn allocate_dfs(&mut self, id: MappingId, length: u64, placement: Placement) -> MappingId {
        let mapping = self.mapping(id);
        match placement {
            Placement::Bottom => {
                if mapping.kind == MappingKind::Hole && mapping.length >= length {
                    return self.split_hole(id, 0, length);
                }
                if let Some(left) = mapping.left {
                    if self.mapping(left).largest_hole >= length {
                        return self.allocate_dfs(left, length, placement);
                    }
                }
                let right = self.mapping(id).right.expect("augment promised a hole");
                assert!(self.mapping(right).largest_hole >= length);
                self.allocate_dfs(right, length, placement)
            }
            Placement::Top => {
                if mapping.kind == MappingKind::Hole && mapping.length >= length {
                    let offset = mapping.length - length;
                    return self.split_hole(id, offset, length);
                }
                if let Some(right) = mapping.right {
                    if self.mapping(right).largest_hole >= length {
                        return self.allocate_dfs(right, length, placement);
                    }
                }
                let left = self.mapping(id).left.expect("augment promised a hole");
                assert!(self.mapping(left).largest_hole >= length);
                self.allocate_dfs(left, length, placement)
            }
        }
    }

    /// Carve a reserved range at a caller-chosen address. The range
    /// must fall inside a single hole.
    pub(crate) fn allocate_at(
        &mut self,
        address: u64,
        length: u64,
    ) -> Result<MappingId, super::VmError> {
        let hole = self.lookup(address).ok_or(super::VmError::NotFound)?;
        let mapping = self.mapping(hole);
        if mapping.kind != MappingKind::Hole {
            return Err(super::VmError::InvalidArgument);
        }
        let offset = address - mapping.base.as_u64();
        if offset + length > mapping.length {
            return Err(super::VmError::InvalidArgument);
        }
        Ok(self.split_hole(hole, offset, length))
    }

    /// Split `length` bytes out of a hole at `split_offset`, leaving a
    /// shortened hole in front and a fresh hole behind as needed. The
    /// carved range comes back as a `Reserved` mapping for the caller
    /// to retype.
    pub(crate) fn split_hole(
        &mut self,
        id: MappingId,
        split_offset: u64,
        split_length: u64,
    ) -> MappingId {
        assert!(split_length > 0);
        assert!(self.mapping(id).kind == MappingKind::Hole);
        assert!(split_offset + split_length <= self.mapping(id).length);

        let hole_address = self.mapping(id).base.as_u64();
        let hole_length = self.mapping(id).length;

        if split_offset == 0 {
            // the carved range starts at the hole's base, so the hole
            // itself goes away
            self.remove(id);
            self.release(id);
        } else {
            self.mapping_mut(id).length = split_offset;
            self.update_largest_hole_upwards(id);
        }

        let split = self.insert(Mapping::new(
            MappingKind::Reserved,
            VirtAddr::new(hole_address + split_offset),
            split_length,
        ));

        if hole_length > split_offset + split_length {
            self.insert(Mapping::new(
                MappingKind::Hole,
                VirtAddr::new(hole_address + split_offset + split_length),
                hole_length - (split_offset + split_length),
            ));
        } else {
            assert!(hole_length == split_offset + split_length);
        }

        split
    }

    // --------------------------------------------------------
    // Insertion
    // --------------------------------------------------------

    pub(crate) fn insert(&mut self, mapping: Mapping) -> MappingId {
        debug_assert!(self.check_structure());
        let id = self.alloc(mapping);

        let Some(mut current) = self.root else {
            self.root = Some(id);
            self.fix_after_insert(id);
            debug_assert!(self.check_structure());
            return id;
        };

        loop {
            let new_base = self.mapping(id).base.as_u64();
            let new_end = self.mapping(id).end();
            let cur_base = self.mapping(current).base.as_u64();
            let cur_end = self.mapping(current).end();

            if new_base < cur_base {
                assert!(new_end <= cur_base, "overlapping mappings");
                if let Some(left) = self.mapping(current).left {
                    current = left;
                    continue;
                }
                self.mapping_mut(current).left = Some(id);
                self.mapping_mut(id).parent = Some(current);

                // "current" is the successor of the new node
                let predecessor = self.mapping(current).lower;
                if let Some(pred) = predecessor {
                    self.mapping_mut(pred).higher = Some(id);
                }
                let node = self.mapping_mut(id);
                node.lower = predecessor;
                node.higher = Some(current);
                self.mapping_mut(current).lower = Some(id);
            } else {
                assert!(new_base >= cur_end, "overlapping mappings");
                if let Some(right) = self.mapping(current).right {
                    current = right;
                    continue;
                }
                self.mapping_mut(current).right = Some(id);
                self.mapping_mut(id).parent = Some(current);

                // "current" is the predecessor of the new node
                let successor = self.mapping(current).higher;
                self.mapping_mut(current).higher = Some(id);
                let node = self.mapping_mut(id);
                node.lower = Some(current);
                node.higher = successor;
                if let Some(succ) = successor {
                    self.mapping_mut(succ).lower = Some(id);
                }
            }

            self.update_largest_hole_upwards(current);
            self.fix_after_insert(id);
            debug_assert!(self.check_structure());
            return id;
        }
    }

    // Precondition: the red-black property may only be violated by the
    // freshly linked red node n (or by n being an unpainted root).
    // Postcondition: the whole tree is a red-black tree again.
    fn fix_after_insert(&mut self, n: MappingId) {
        let Some(parent) = self.mapping(n).parent else {
            self.mapping_mut(n).color = Color::Black;
            return;
        };

        self.mapping_mut(n).color = Color::Red;

        if self.mapping(parent).color == Color::Black {
            return;
        }

        // a red parent is never the root, so a grandparent exists
        let grand = self.mapping(parent).parent.expect("red node without grandparent");
        assert!(self.mapping(grand).color == Color::Black);

        // red uncle: recolor and push the violation upward
        if self.mapping(grand).left == Some(parent) && self.is_red(self.mapping(grand).right) {
            let uncle = self.mapping(grand).right.unwrap();
            self.mapping_mut(grand).color = Color::Red;
            self.mapping_mut(parent).color = Color::Black;
            self.mapping_mut(uncle).color = Color::Black;
            self.fix_after_insert(grand);
            return;
        } else if self.mapping(grand).right == Some(parent) && self.is_red(self.mapping(grand).left)
        {
            let uncle = self.mapping(grand).left.unwrap();
            self.mapping_mut(grand).color = Color::Red;
            self.mapping_mut(parent).color = Color::Black;
            self.mapping_mut(uncle).color = Color::Black;
            self.fix_after_insert(grand);
            return;
        }

        if self.mapping(grand).left == Some(parent) {
            if self.mapping(parent).right == Some(n) {
                self.rotate_left(n);
                self.rotate_right(n);
                self.mapping_mut(n).color = Color::Black;
            } else {
                self.rotate_right(parent);
                self.mapping_mut(parent).color = Color::Black;
            }
        } else {
            assert!(self.mapping(grand).right == Some(parent));
            if self.mapping(parent).left == Some(n) {
                self.rotate_right(n);
                self.rotate_left(n);
                self.mapping_mut(n).color = Color::Black;
            } else {
                self.rotate_left(parent);
                self.mapping_mut(parent).color = Color::Black;
            }
        }
        self.mapping_mut(grand).color = Color::Red;
    }

    // --------------------------------------------------------
    // Removal
    // --------------------------------------------------------

    /// Detach a mapping from the tree and the order list. The slot
    /// stays allocated; pair with [`release`](Self::release).
    pub(crate) fn remove(&mut self, id: MappingId) {
        debug_assert!(self.check_structure());

        let left = self.mapping(id).left;
        let right = self.mapping(id).right;

        if left.is_none() {
            self.remove_half_leaf(id, right);
        } else if right.is_none() {
            self.remove_half_leaf(id, left);
        } else {
            // two children: swap in the in-order predecessor by link
            // rewiring, so handles to it stay valid
            let predecessor = self.mapping(id).lower.expect("left subtree without predecessor");
            let pred_left = self.mapping(predecessor).left;
            self.remove_half_leaf(predecessor, pred_left);
            self.replace_node(id, predecessor);
        }

        debug_assert!(self.check_structure());
    }

    fn replace_node(&mut self, node: MappingId, replacement: MappingId) {
        let parent = self.mapping(node).parent;
        let left = self.mapping(node).left;
        let right = self.mapping(node).right;

        match parent {
            None => self.root = Some(replacement),
            Some(p) => {
                if self.mapping(p).left == Some(node) {
                    self.mapping_mut(p).left = Some(replacement);
                } else {
                    assert!(self.mapping(p).right == Some(node));
                    self.mapping_mut(p).right = Some(replacement);
                }
            }
        }
        self.mapping_mut(replacement).parent = parent;
        self.mapping_mut(replacement).color = self.mapping(node).color;

        self.mapping_mut(replacement).left = left;
        if let Some(l) = left {
            self.mapping_mut(l).parent = Some(replacement);
        }
        self.mapping_mut(replacement).right = right;
        if let Some(r) = right {
            self.mapping_mut(r).parent = Some(replacement);
        }

        let lower = self.mapping(node).lower;
        let higher = self.mapping(node).higher;
        if let Some(lo) = lower {
            self.mapping_mut(lo).higher = Some(replacement);
        }
        self.mapping_mut(replacement).lower = lower;
        self.mapping_mut(replacement).higher = higher;
        if let Some(hi) = higher {
            self.mapping_mut(hi).lower = Some(replacement);
        }

        let detached = self.mapping_mut(node);
        detached.left = None;
        detached.right = None;
        detached.parent = None;
        detached.lower = None;
        detached.higher = None;

        self.update_largest_hole_at(replacement);
        if let Some(p) = parent {
            self.update_largest_hole_upwards(p);
        }
    }

    fn remove_half_leaf(&mut self, id: MappingId, child: Option<MappingId>) {
        let predecessor = self.mapping(id).lower;
        let successor = self.mapping(id).higher;
        if let Some(pred) = predecessor {
            self.mapping_mut(pred).higher = successor;
        }
        if let Some(succ) = successor {
            self.mapping_mut(succ).lower = predecessor;
        }

        if self.mapping(id).color == Color::Black {
            if self.is_red(child) {
                self.mapping_mut(child.unwrap()).color = Color::Black;
            } else {
                // take the missing black out of this path while the
                // node is still linked; this is correct even when the
                // child is a null leaf
                self.fix_after_remove(id);
            }
        }

        assert!(
            (self.mapping(id).left.is_none() && self.mapping(id).right == child)
                || (self.mapping(id).left == child && self.mapping(id).right.is_none())
        );

        let parent = self.mapping(id).parent;
        match parent {
            None => self.root = child,
            Some(p) => {
                if self.mapping(p).left == Some(id) {
                    self.mapping_mut(p).left = child;
                } else {
                    assert!(self.mapping(p).right == Some(id));
                    self.mapping_mut(p).right = child;
                }
            }
        }
        if let Some(c) = child {
            self.mapping_mut(c).parent = parent;
        }

        let detached = self.mapping_mut(id);
        detached.left = None;
        detached.right = None;
        detached.parent = None;
        detached.lower = None;
        detached.higher = None;

        if let Some(p) = parent {
            self.update_largest_hole_upwards(p);
        }
    }

    // Precondition: paths through n carry one black node fewer than
    // paths through its sibling. Postcondition: red-black again.
    fn fix_after_remove(&mut self, n: MappingId) {
        assert!(self.mapping(n).color == Color::Black);

        let Some(parent) = self.mapping(n).parent else {
            return;
        };

        // rotate so that n has a black sibling
        let s;
        if self.mapping(parent).left == Some(n) {
            let right = self.mapping(parent).right.expect("black node without sibling");
            if self.mapping(right).color == Color::Red {
                self.rotate_left(right);
                assert!(self.mapping(parent).left == Some(n));
                self.mapping_mut(parent).color = Color::Red;
                self.mapping_mut(right).color = Color::Black;
            }
            s = self.mapping(parent).right.unwrap();
        } else {
            assert!(self.mapping(parent).right == Some(n));
            let left = self.mapping(parent).left.expect("black node without sibling");
            if self.mapping(left).color == Color::Red {
                self.rotate_right(left);
                assert!(self.mapping(parent).right == Some(n));
                self.mapping_mut(parent).color = Color::Red;
                self.mapping_mut(left).color = Color::Black;
            }
            s = self.mapping(parent).left.unwrap();
        }

        if self.is_black(self.mapping(s).left) && self.is_black(self.mapping(s).right) {
            if self.mapping(parent).color == Color::Black {
                self.mapping_mut(s).color = Color::Red;
                self.fix_after_remove(parent);
            } else {
                self.mapping_mut(parent).color = Color::Black;
                self.mapping_mut(s).color = Color::Red;
            }
            return;
        }

        // at least one of s's children is red
        let parent_color = self.mapping(parent).color;
        if self.mapping(parent).left == Some(n) {
            // rotate so that s's right child is red
            let mut s = s;
            if self.is_red(self.mapping(s).left) && self.is_black(self.mapping(s).right) {
                let child = self.mapping(s).left.unwrap();
                self.rotate_right(child);
                self.mapping_mut(s).color = Color::Red;
                self.mapping_mut(child).color = Color::Black;
                s = child;
            }
            assert!(self.is_red(self.mapping(s).right));

            self.rotate_left(s);
            self.mapping_mut(parent).color = Color::Black;
            self.mapping_mut(s).color = parent_color;
            let sr = self.mapping(s).right.unwrap();
            self.mapping_mut(sr).color = Color::Black;
        } else {
            assert!(self.mapping(parent).right == Some(n));

            // rotate so that s's left child is red
            let mut s = s;
            if self.is_red(self.mapping(s).right) && self.is_black(self.mapping(s).left) {
                let child = self.mapping(s).right.unwrap();
                self.rotate_left(child);
                self.mapping_mut(s).color = Color::Red;
                self.mapping_mut(child).color = Color::Black;
                s = child;
            }
            assert!(self.is_red(self.mapping(s).left));

            self.rotate_right(s);
            self.mapping_mut(parent).color = Color::Black;
            self.mapping_mut(s).color = parent_color;
            let sl = self.mapping(s).left.unwrap();
            self.mapping_mut(sl).color = Color::Black;
        }
    }

    // --------------------------------------------------------
    // Rotations and the augment
    // --------------------------------------------------------

    // Rotate n above its parent; n must be the right child. Augments
    // are refreshed for the demoted node first, then for n.
    fn rotate_left(&mut self, n: MappingId) {
        let u = self.mapping(n).parent.expect("rotation without parent");
        assert!(self.mapping(u).right == Some(n));
        let v = self.mapping(n).left;
        let w = self.mapping(u).parent;

        if let Some(v) = v {
            self.mapping_mut(v).parent = Some(u);
        }
        self.mapping_mut(u).right = v;
        self.mapping_mut(u).parent = Some(n);
        self.mapping_mut(n).left = Some(u);
        self.mapping_mut(n).parent = w;

        match w {
            None => self.root = Some(n),
            Some(w) => {
                if self.mapping(w).left == Some(u) {
                    self.mapping_mut(w).left = Some(n);
                } else {
                    assert!(self.mapping(w).right == Some(u));
                    self.mapping_mut(w).right = Some(n);
                }
            }
        }

        self.update_largest_hole_at(u);
        self.update_largest_hole_at(n);
    }

    // Mirror image of `rotate_left`; n must be the left child.
    fn rotate_right(&mut self, n: MappingId) {
        let u = self.mapping(n).parent.expect("rotation without parent");
        assert!(self.mapping(u).left == Some(n));
        let v = self.mapping(n).right;
        let w = self.mapping(u).parent;

        if let Some(v) = v {
            self.mapping_mut(v).parent = Some(u);
        }
        self.mapping_mut(u).left = v;
        self.mapping_mut(u).parent = Some(n);
        self.mapping_mut(n).right = Some(u);
        self.mapping_mut(n).parent = w;

        match w {
            None => self.root = Some(n),
            Some(w) => {
                if self.mapping(w).left == Some(u) {
                    self.mapping_mut(w).left = Some(n);
                } else {
                    assert!(self.mapping(w).right == Some(u));
                    self.mapping_mut(w).right = Some(n);
                }
            }
        }

        self.update_largest_hole_at(u);
        self.update_largest_hole_at(n);
    }

    fn is_red(&self, id: Option<MappingId>) -> bool {
        id.map_or(false, |i| self.mapping(i).color == Color::Red)
    }

    fn is_black(&self, id: Option<MappingId>) -> bool {
        !self.is_red(id)
    }

    /// Recompute one node's largest-hole summary. Returns whether it
    /// changed.
    fn update_largest_hole_at(&mut self, id: MappingId) -> bool {
        let mapping = self.mapping(id);
        let mut hole = 0;
        if mapping.kind == MappingKind::Hole {
            hole = mapping.length;
        }
        if let Some(left) = mapping.left {
            hole = hole.max(self.mapping(left).largest_hole);
        }
        if let Some(right) = self.mapping(id).right {
            hole = hole.max(self.mapping(right).largest_hole);
        }

        if self.mapping(id).largest_hole != hole {
            self.mapping_mut(id).largest_hole = hole;
            true
        } else {
            false
        }
    }

    /// Recompute summaries from `id` toward the root, stopping at the
    /// first ancestor whose value does not change.
    pub(crate) fn update_largest_hole_upwards(&mut self, id: MappingId) {
        let mut current = Some(id);
        while let Some(id) = current {
            if !self.update_largest_hole_at(id) {
                return;
            }
            current = self.mapping(id).parent;
        }
    }

    // --------------------------------------------------------
    // Invariant checking
    // --------------------------------------------------------

    /// Full structural validation: search-tree order, red-black
    /// coloring, black depth, augment correctness, order-list
    /// threading, interval contiguity and hole canonicalization.
    /// Intended for tests and debug assertions; logs the first
    /// violation it finds.
    pub fn check_invariant(&self) -> bool {
        self.check_structure() && self.check_canonical()
    }

    // The subset of the invariant that holds even mid-operation, while
    // a split or coalesce has temporarily opened a coverage gap.
    pub(crate) fn check_structure(&self) -> bool {
        let Some(root) = self.root else {
            return true;
        };
        if self.mapping(root).parent.is_some() {
            error!("tree root has a parent");
            return false;
        }
        if self.mapping(root).color != Color::Black {
            error!("tree root is red");
            return false;
        }
        self.check_subtree(root).is_some()
    }

    fn check_subtree(&self, id: MappingId) -> Option<(u32, MappingId, MappingId)> {
        let mapping = self.mapping(id);

        let mut hole = 0;
        if mapping.kind == MappingKind::Hole {
            hole = mapping.length;
        }
        if let Some(left) = mapping.left {
            hole = hole.max(self.mapping(left).largest_hole);
        }
        if let Some(right) = mapping.right {
            hole = hole.max(self.mapping(right).largest_hole);
        }
        if mapping.largest_hole != hole {
            error!("largest-hole violation at {:#x}", mapping.base.as_u64());
            return None;
        }

        if mapping.color == Color::Red
            && (!self.is_black(mapping.left) || !self.is_black(mapping.right))
        {
            error!("red-red violation at {:#x}", mapping.base.as_u64());
            return None;
        }

        let mut minimal = id;
        let mut maximal = id;
        let mut left_depth = 0;
        let mut right_depth = 0;

        if let Some(left) = mapping.left {
            if self.mapping(left).parent != Some(id) {
                error!("bad parent link under {:#x}", mapping.base.as_u64());
                return None;
            }
            let (depth, min, predecessor) = self.check_subtree(left)?;
            left_depth = depth;
            minimal = min;

            if mapping.base.as_u64() < self.mapping(predecessor).end() {
                error!("search-tree violation (left) at {:#x}", mapping.base.as_u64());
                return None;
            }
            if self.mapping(predecessor).higher != Some(id) || mapping.lower != Some(predecessor) {
                error!("order-list violation (predecessor) at {:#x}", mapping.base.as_u64());
                return None;
            }
        }

        if let Some(right) = mapping.right {
            if self.mapping(right).parent != Some(id) {
                error!("bad parent link under {:#x}", mapping.base.as_u64());
                return None;
            }
            let (depth, successor, max) = self.check_subtree(right)?;
            right_depth = depth;
            maximal = max;

            if mapping.end() > self.mapping(successor).base.as_u64() {
                error!("search-tree violation (right) at {:#x}", mapping.base.as_u64());
                return None;
            }
            if mapping.higher != Some(successor) || self.mapping(successor).lower != Some(id) {
                error!("order-list violation (successor) at {:#x}", mapping.base.as_u64());
                return None;
            }
        }

        if left_depth != right_depth {
            error!("black-depth violation at {:#x}", mapping.base.as_u64());
            return None;
        }

        let mut depth = left_depth;
        if mapping.color == Color::Black {
            depth += 1;
        }
        Some((depth, minimal, maximal))
    }

    // Quiescent-state checks: mappings tile their range without gaps
    // and adjacent holes have been coalesced.
    fn check_canonical(&self) -> bool {
        let Some(mut current) = self.first() else {
            return true;
        };
        let mut count = 1;
        while let Some(next) = self.mapping(current).higher {
            if self.mapping(current).end() != self.mapping(next).base.as_u64() {
                error!(
                    "coverage gap between {:#x} and {:#x}",
                    self.mapping(current).end(),
                    self.mapping(next).base.as_u64()
                );
                return false;
            }
            if self.mapping(current).kind == MappingKind::Hole
                && self.mapping(next).kind == MappingKind::Hole
            {
                error!("adjacent holes at {:#x}", self.mapping(next).base.as_u64());
                return false;
            }
            current = next;
            count += 1;
        }
        if count != self.len() {
            error!("order list covers {} of {} mappings", count, self.len());
            return false;
        }
        true
    }
}

impl Default for AddressTree {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InOrder<'a> {
    tree: &'a AddressTree,
    next: Option<MappingId>,
}

impl<'a> Iterator for InOrder<'a> {
    type Item = MappingId;

    fn next(&mut self) -> Option<MappingId> {
        let id = self.next?;
        self.next = self.tree.mapping(id).higher;
        Some(id)
    }
}

//! # An arena-backed augmented red-black tree.
//!
//! A red-black tree whose nodes live in a single `Vec` arena and reference each
//! other through plain indices instead of pointers. Rotations, removals and
//! neighbor splices are index rewrites, so the whole structure is expressible
//! in safe code, and slots freed by removals are recycled through an internal
//! free list.
//!
//! On top of the textbook search structure the tree maintains two extras that
//! interval allocators need:
//!
//! - **A subtree aggregate per node.** Items describe their aggregate through
//!   [`Node::aggregate`]; the tree keeps the cached value consistent across
//!   insertions, removals and rotations and exposes it via
//!   [`RbTree::aggregate`]. A typical aggregate is "largest free interval in
//!   this subtree", which turns a first-fit search into a logarithmic descent.
//! - **In-order neighbor links.** Every node knows its in-order predecessor
//!   and successor ([`RbTree::prev`]/[`RbTree::next`]), so walking adjacent
//!   intervals and coalescing them is O(1) per step, no tree search required.
//!
//! The balancing code never looks at item semantics, only at colors and
//! cached aggregates; item types are free to interpret their aggregate however
//! they want (or use `()` for none).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;
use core::mem;

/// Trait implemented by all items stored in an [`RbTree`].
pub trait Node {
    /// The key this item is ordered by. Keys must be unique within one tree.
    type Key: Copy + Ord + fmt::Debug;
    /// The per-subtree aggregate value cached by the tree.
    type Aggregate: Copy + PartialEq + fmt::Debug;

    fn key(&self) -> Self::Key;

    /// Combines this item with the cached aggregates of its child subtrees.
    ///
    /// This must be a pure function of the item and the two child aggregates;
    /// the tree relies on that to stop propagating upwards as soon as a
    /// recomputed aggregate is unchanged.
    fn aggregate(
        &self,
        left: Option<Self::Aggregate>,
        right: Option<Self::Aggregate>,
    ) -> Self::Aggregate;
}

/// Handle to a node in an [`RbTree`] arena.
///
/// Handles stay valid until their node is removed; removing other nodes never
/// invalidates them. A handle must only be used with the tree that produced
/// it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Color {
    Red,
    Black,
}

struct Links {
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    /// In-order predecessor.
    prev: Option<NodeId>,
    /// In-order successor.
    next: Option<NodeId>,
    color: Color,
}

impl Default for Links {
    fn default() -> Self {
        Self {
            parent: None,
            left: None,
            right: None,
            prev: None,
            next: None,
            color: Color::Black,
        }
    }
}

struct OccupiedSlot<T: Node> {
    item: T,
    agg: T::Aggregate,
    links: Links,
}

enum Slot<T: Node> {
    Occupied(OccupiedSlot<T>),
    Vacant { next_free: Option<NodeId> },
}

/// An augmented red-black tree storing its nodes in an index-addressed arena.
pub struct RbTree<T: Node> {
    slots: Vec<Slot<T>>,
    root: Option<NodeId>,
    /// Head of the free list threaded through vacant slots.
    free: Option<NodeId>,
    len: usize,
}

impl<T: Node> Default for RbTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Node + fmt::Debug> fmt::Debug for RbTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, item)| item)).finish()
    }
}

impl<T: Node> RbTree<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            root: None,
            free: None,
            len: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> &T {
        &self.node(id).item
    }

    #[must_use]
    pub fn left(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).links.left
    }

    #[must_use]
    pub fn right(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).links.right
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).links.parent
    }

    /// Returns the in-order predecessor of `id`.
    #[must_use]
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).links.prev
    }

    /// Returns the in-order successor of `id`.
    #[must_use]
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).links.next
    }

    /// Returns the cached aggregate for the subtree rooted at `id`.
    #[must_use]
    pub fn aggregate(&self, id: NodeId) -> T::Aggregate {
        self.node(id).agg
    }

    /// Returns the node with the smallest key.
    #[must_use]
    pub fn first(&self) -> Option<NodeId> {
        let mut current = self.root?;
        while let Some(left) = self.left(current) {
            current = left;
        }
        Some(current)
    }

    /// Returns the node with the largest key.
    #[must_use]
    pub fn last(&self) -> Option<NodeId> {
        let mut current = self.root?;
        while let Some(right) = self.right(current) {
            current = right;
        }
        Some(current)
    }

    /// Returns the node with the greatest key less than or equal to `key`.
    #[must_use]
    pub fn upper_bound(&self, key: T::Key) -> Option<NodeId> {
        let mut current = self.root;
        let mut candidate = None;
        while let Some(id) = current {
            if key < self.node(id).item.key() {
                current = self.left(id);
            } else {
                candidate = Some(id);
                current = self.right(id);
            }
        }
        candidate
    }

    /// Iterates over all nodes in key order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            tree: self,
            cursor: self.first(),
            remaining: self.len,
        }
    }

    /// Mutates the item stored at `id` in place, then restores the aggregate
    /// invariant on the path from `id` to the root.
    ///
    /// The closure may change the item's key only in ways that keep the item
    /// at its current in-order position (checked in debug builds).
    pub fn with_mut<R>(&mut self, id: NodeId, f: impl FnOnce(&mut T) -> R) -> R {
        let out = f(&mut self.node_mut(id).item);

        #[cfg(debug_assertions)]
        {
            let key = self.node(id).item.key();
            if let Some(prev) = self.node(id).links.prev {
                debug_assert!(
                    self.node(prev).item.key() < key,
                    "item mutation moved the key before its predecessor"
                );
            }
            if let Some(next) = self.node(id).links.next {
                debug_assert!(
                    key < self.node(next).item.key(),
                    "item mutation moved the key past its successor"
                );
            }
        }

        self.aggregate_path(Some(id));
        out
    }

    /// Inserts `item` and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if the tree already contains a node with the same key.
    pub fn insert(&mut self, item: T) -> NodeId {
        let key = item.key();
        let id = self.alloc(item);

        let Some(root) = self.root else {
            self.root = Some(id);
            self.fix_insert(id);
            #[cfg(debug_assertions)]
            self.assert_invariants();
            return id;
        };

        let mut current = root;
        loop {
            let current_key = self.node(current).item.key();
            if key < current_key {
                if let Some(left) = self.left(current) {
                    current = left;
                    continue;
                }

                self.node_mut(current).links.left = Some(id);
                self.node_mut(id).links.parent = Some(current);

                // `current` is the in-order successor of the new node
                let pred = self.node(current).links.prev;
                if let Some(pred) = pred {
                    self.node_mut(pred).links.next = Some(id);
                }
                self.node_mut(id).links.prev = pred;
                self.node_mut(id).links.next = Some(current);
                self.node_mut(current).links.prev = Some(id);
            } else if key > current_key {
                if let Some(right) = self.right(current) {
                    current = right;
                    continue;
                }

                self.node_mut(current).links.right = Some(id);
                self.node_mut(id).links.parent = Some(current);

                // `current` is the in-order predecessor of the new node
                let succ = self.node(current).links.next;
                self.node_mut(current).links.next = Some(id);
                self.node_mut(id).links.prev = Some(current);
                self.node_mut(id).links.next = succ;
                if let Some(succ) = succ {
                    self.node_mut(succ).links.prev = Some(id);
                }
            } else {
                panic!("duplicate key {current_key:?} inserted into tree");
            }

            self.aggregate_path(Some(current));
            self.fix_insert(id);
            #[cfg(debug_assertions)]
            self.assert_invariants();
            return id;
        }
    }

    /// Removes the node at `id`, returning its item. The freed slot is
    /// recycled by later insertions.
    pub fn remove(&mut self, id: NodeId) -> T {
        let left = self.left(id);
        let right = self.right(id);

        if left.is_none() {
            self.remove_half_leaf(id, right);
        } else if right.is_none() {
            self.remove_half_leaf(id, left);
        } else {
            // unlink the in-order predecessor (which has no right child) and
            // splice it into this node's structural position
            let pred = self
                .node(id)
                .links
                .prev
                .expect("node with a left subtree has a predecessor");
            let pred_left = self.left(pred);
            self.remove_half_leaf(pred, pred_left);
            self.replace_node(id, pred);
        }

        let item = self.release(id);
        #[cfg(debug_assertions)]
        self.assert_invariants();
        item
    }

    // === internal accessors ===

    fn node(&self, id: NodeId) -> &OccupiedSlot<T> {
        let Slot::Occupied(node) = &self.slots[id.index()] else {
            panic!("stale node handle {id:?}")
        };
        node
    }

    fn node_mut(&mut self, id: NodeId) -> &mut OccupiedSlot<T> {
        let Slot::Occupied(node) = &mut self.slots[id.index()] else {
            panic!("stale node handle {id:?}")
        };
        node
    }

    fn color(&self, id: NodeId) -> Color {
        self.node(id).links.color
    }

    fn set_color(&mut self, id: NodeId, color: Color) {
        self.node_mut(id).links.color = color;
    }

    fn is_red(&self, id: Option<NodeId>) -> bool {
        id.is_some_and(|id| self.color(id) == Color::Red)
    }

    fn is_black(&self, id: Option<NodeId>) -> bool {
        !self.is_red(id)
    }

    // === arena management ===

    fn alloc(&mut self, item: T) -> NodeId {
        let agg = item.aggregate(None, None);
        let slot = OccupiedSlot {
            item,
            agg,
            links: Links::default(),
        };
        self.len += 1;

        if let Some(id) = self.free {
            let Slot::Vacant { next_free } = &self.slots[id.index()] else {
                unreachable!("free list points at an occupied slot")
            };
            self.free = *next_free;
            self.slots[id.index()] = Slot::Occupied(slot);
            id
        } else {
            let index = u32::try_from(self.slots.len()).expect("tree arena exceeds u32 capacity");
            self.slots.push(Slot::Occupied(slot));
            NodeId(index)
        }
    }

    fn release(&mut self, id: NodeId) -> T {
        let slot = mem::replace(
            &mut self.slots[id.index()],
            Slot::Vacant { next_free: self.free },
        );
        self.free = Some(id);
        self.len -= 1;
        let Slot::Occupied(node) = slot else {
            unreachable!("released a vacant slot")
        };
        node.item
    }

    // === aggregate maintenance ===

    /// Recomputes the cached aggregate of `id` from its children, returning
    /// whether the value changed.
    fn refresh_aggregate(&mut self, id: NodeId) -> bool {
        let left = self.left(id).map(|left| self.node(left).agg);
        let right = self.right(id).map(|right| self.node(right).agg);
        let agg = self.node(id).item.aggregate(left, right);

        let node = self.node_mut(id);
        let changed = node.agg != agg;
        node.agg = agg;
        changed
    }

    /// Recomputes aggregates from `node` up to the root, stopping as soon as
    /// a value is unchanged.
    fn aggregate_path(&mut self, mut node: Option<NodeId>) {
        while let Some(id) = node {
            if !self.refresh_aggregate(id) {
                break;
            }
            node = self.node(id).links.parent;
        }
    }

    // === rebalancing ===

    // Precondition: the red-black property may only be violated by `n` itself,
    // which has just been linked in (or recolored) and may have a red parent.
    fn fix_insert(&mut self, n: NodeId) {
        let Some(parent) = self.node(n).links.parent else {
            self.set_color(n, Color::Black);
            return;
        };

        // coloring the node red is not a problem if the parent is black
        self.set_color(n, Color::Red);
        if self.color(parent) == Color::Black {
            return;
        }

        // a red parent below the (black) root guarantees a grandparent
        let grand = self
            .node(parent)
            .links
            .parent
            .expect("red parent must have a parent");
        debug_assert_eq!(self.color(grand), Color::Black);

        // a red uncle allows recoloring both and propagating upwards
        if self.left(grand) == Some(parent) && self.is_red(self.right(grand)) {
            let uncle = self.right(grand).expect("red uncle");
            self.set_color(grand, Color::Red);
            self.set_color(parent, Color::Black);
            self.set_color(uncle, Color::Black);
            self.fix_insert(grand);
            return;
        } else if self.right(grand) == Some(parent) && self.is_red(self.left(grand)) {
            let uncle = self.left(grand).expect("red uncle");
            self.set_color(grand, Color::Red);
            self.set_color(parent, Color::Black);
            self.set_color(uncle, Color::Black);
            self.fix_insert(grand);
            return;
        }

        if self.left(grand) == Some(parent) {
            if self.right(parent) == Some(n) {
                // triangle case
                self.rotate_left(n);
                self.rotate_right(n);
                self.set_color(n, Color::Black);
            } else {
                // line case
                self.rotate_right(parent);
                self.set_color(parent, Color::Black);
            }
            self.set_color(grand, Color::Red);
        } else {
            debug_assert_eq!(self.right(grand), Some(parent));
            if self.left(parent) == Some(n) {
                self.rotate_right(n);
                self.rotate_left(n);
                self.set_color(n, Color::Black);
            } else {
                self.rotate_left(parent);
                self.set_color(parent, Color::Black);
            }
            self.set_color(grand, Color::Red);
        }
    }

    /// Unlinks a node with at most one child (`child`).
    fn remove_half_leaf(&mut self, id: NodeId, child: Option<NodeId>) {
        debug_assert!(self.left(id).is_none() || self.right(id).is_none());

        // splice out of the in-order list
        let pred = self.node(id).links.prev;
        let succ = self.node(id).links.next;
        if let Some(pred) = pred {
            self.node_mut(pred).links.next = succ;
        }
        if let Some(succ) = succ {
            self.node_mut(succ).links.prev = pred;
        }

        if self.color(id) == Color::Black {
            if self.is_red(child) {
                self.set_color(child.expect("red child"), Color::Black);
            } else {
                // rebalance before unlinking: paths through `id` are about to
                // lose one black node. this also covers the empty-child case.
                self.fix_remove(id);
            }
        }

        // the fixup may have rotated, re-read the parent
        let parent = self.node(id).links.parent;
        match parent {
            None => self.root = child,
            Some(parent) if self.left(parent) == Some(id) => {
                self.node_mut(parent).links.left = child;
            }
            Some(parent) => {
                debug_assert_eq!(self.right(parent), Some(id));
                self.node_mut(parent).links.right = child;
            }
        }
        if let Some(child) = child {
            self.node_mut(child).links.parent = parent;
        }

        self.node_mut(id).links = Links::default();

        self.aggregate_path(parent);
    }

    /// Splices `replacement` (already unlinked) into the structural position
    /// of `id`, taking over its parent, children, color and neighbors.
    fn replace_node(&mut self, id: NodeId, replacement: NodeId) {
        let parent = self.node(id).links.parent;
        let left = self.left(id);
        let right = self.right(id);

        match parent {
            None => self.root = Some(replacement),
            Some(parent) if self.left(parent) == Some(id) => {
                self.node_mut(parent).links.left = Some(replacement);
            }
            Some(parent) => {
                debug_assert_eq!(self.right(parent), Some(id));
                self.node_mut(parent).links.right = Some(replacement);
            }
        }
        self.node_mut(replacement).links.parent = parent;
        let color = self.color(id);
        self.set_color(replacement, color);

        self.node_mut(replacement).links.left = left;
        if let Some(left) = left {
            self.node_mut(left).links.parent = Some(replacement);
        }
        self.node_mut(replacement).links.right = right;
        if let Some(right) = right {
            self.node_mut(right).links.parent = Some(replacement);
        }

        // take over the in-order position as well
        let prev = self.node(id).links.prev;
        let next = self.node(id).links.next;
        if let Some(prev) = prev {
            self.node_mut(prev).links.next = Some(replacement);
        }
        self.node_mut(replacement).links.prev = prev;
        self.node_mut(replacement).links.next = next;
        if let Some(next) = next {
            self.node_mut(next).links.prev = Some(replacement);
        }

        self.node_mut(id).links = Links::default();

        self.refresh_aggregate(replacement);
        self.aggregate_path(parent);
    }

    // Precondition: paths through `n` carry one black node less than paths
    // through its sibling. `n` is still linked into the tree.
    fn fix_remove(&mut self, n: NodeId) {
        debug_assert_eq!(self.color(n), Color::Black);

        let Some(parent) = self.node(n).links.parent else {
            return;
        };

        // rotate so that the node has a black sibling
        let mut s;
        if self.left(parent) == Some(n) {
            let sibling = self
                .right(parent)
                .expect("black-height imbalance requires a sibling");
            if self.color(sibling) == Color::Red {
                self.rotate_left(sibling);
                debug_assert_eq!(self.left(parent), Some(n));
                self.set_color(parent, Color::Red);
                self.set_color(sibling, Color::Black);
            }
            s = self.right(parent).expect("sibling after rotation");
        } else {
            debug_assert_eq!(self.right(parent), Some(n));
            let sibling = self
                .left(parent)
                .expect("black-height imbalance requires a sibling");
            if self.color(sibling) == Color::Red {
                self.rotate_right(sibling);
                debug_assert_eq!(self.right(parent), Some(n));
                self.set_color(parent, Color::Red);
                self.set_color(sibling, Color::Black);
            }
            s = self.left(parent).expect("sibling after rotation");
        }

        if self.is_black(self.left(s)) && self.is_black(self.right(s)) {
            if self.color(parent) == Color::Black {
                // both subtrees lost a black node, recurse towards the root
                self.set_color(s, Color::Red);
                self.fix_remove(parent);
            } else {
                self.set_color(parent, Color::Black);
                self.set_color(s, Color::Red);
            }
            return;
        }

        // at least one of the sibling's children is red
        let parent_color = self.color(parent);
        if self.left(parent) == Some(n) {
            // rotate so that the sibling's right child is red
            if self.is_red(self.left(s)) && self.is_black(self.right(s)) {
                let child = self.left(s).expect("red child");
                self.rotate_right(child);
                self.set_color(s, Color::Red);
                self.set_color(child, Color::Black);
                s = child;
            }
            debug_assert!(self.is_red(self.right(s)));

            self.rotate_left(s);
            self.set_color(parent, Color::Black);
            self.set_color(s, parent_color);
            let right = self.right(s).expect("red child after rotation");
            self.set_color(right, Color::Black);
        } else {
            // rotate so that the sibling's left child is red
            if self.is_red(self.right(s)) && self.is_black(self.left(s)) {
                let child = self.right(s).expect("red child");
                self.rotate_left(child);
                self.set_color(s, Color::Red);
                self.set_color(child, Color::Black);
                s = child;
            }
            debug_assert!(self.is_red(self.left(s)));

            self.rotate_right(s);
            self.set_color(parent, Color::Black);
            self.set_color(s, parent_color);
            let left = self.left(s).expect("red child after rotation");
            self.set_color(left, Color::Black);
        }
    }

    // Left rotation (n moves up, its parent u becomes n's left child):
    //   w                 w        |
    //   |                 |        |
    //   u                 n        |
    //  / \      -->      / \       |
    // x   n             u   y      |
    //    / \           / \         |
    //   v   y         x   v        |
    fn rotate_left(&mut self, n: NodeId) {
        let u = self.node(n).links.parent.expect("rotation requires a parent");
        debug_assert_eq!(self.right(u), Some(n));
        let v = self.left(n);
        let w = self.node(u).links.parent;

        if let Some(v) = v {
            self.node_mut(v).links.parent = Some(u);
        }
        self.node_mut(u).links.right = v;
        self.node_mut(u).links.parent = Some(n);
        self.node_mut(n).links.left = Some(u);
        self.node_mut(n).links.parent = w;

        match w {
            None => self.root = Some(n),
            Some(w) if self.left(w) == Some(u) => self.node_mut(w).links.left = Some(n),
            Some(w) => {
                debug_assert_eq!(self.right(w), Some(u));
                self.node_mut(w).links.right = Some(n);
            }
        }

        // only the two rotated nodes change their subtree contents
        self.refresh_aggregate(u);
        self.refresh_aggregate(n);
    }

    // Right rotation, the mirror image of `rotate_left`.
    fn rotate_right(&mut self, n: NodeId) {
        let u = self.node(n).links.parent.expect("rotation requires a parent");
        debug_assert_eq!(self.left(u), Some(n));
        let v = self.right(n);
        let w = self.node(u).links.parent;

        if let Some(v) = v {
            self.node_mut(v).links.parent = Some(u);
        }
        self.node_mut(u).links.left = v;
        self.node_mut(u).links.parent = Some(n);
        self.node_mut(n).links.right = Some(u);
        self.node_mut(n).links.parent = w;

        match w {
            None => self.root = Some(n),
            Some(w) if self.left(w) == Some(u) => self.node_mut(w).links.left = Some(n),
            Some(w) => {
                debug_assert_eq!(self.right(w), Some(u));
                self.node_mut(w).links.right = Some(n);
            }
        }

        self.refresh_aggregate(u);
        self.refresh_aggregate(n);
    }

    // === invariant validation ===

    /// Asserts every structural invariant of the tree: binary search order,
    /// the red-black properties, parent and neighbor link coherence, and
    /// aggregate freshness.
    ///
    /// # Panics
    ///
    /// Panics on the first violation found. A violation is a bug in this
    /// crate (or caller misuse of [`RbTree::with_mut`]), never ordinary
    /// caller error.
    pub fn assert_invariants(&self) {
        let Some(root) = self.root else {
            assert_eq!(self.len, 0, "empty tree with nonzero len");
            return;
        };

        assert!(self.node(root).links.parent.is_none(), "root has a parent");
        assert_eq!(self.color(root), Color::Black, "root must be black");

        let mut count = 0;
        self.check_subtree(root, &mut count);
        assert_eq!(count, self.len, "len does not match reachable node count");

        let first = self.first().expect("non-empty tree has a first node");
        let last = self.last().expect("non-empty tree has a last node");
        assert!(self.node(first).links.prev.is_none(), "first node has a predecessor");
        assert!(self.node(last).links.next.is_none(), "last node has a successor");

        // the neighbor list must visit every node in strictly ascending order
        let mut visited = 0;
        let mut previous: Option<T::Key> = None;
        for (_, item) in self.iter() {
            if let Some(previous) = previous {
                assert!(previous < item.key(), "neighbor list out of order");
            }
            previous = Some(item.key());
            visited += 1;
        }
        assert_eq!(visited, self.len, "neighbor list length mismatch");
    }

    /// Returns the black height of the subtree rooted at `id`.
    fn check_subtree(&self, id: NodeId, count: &mut usize) -> usize {
        *count += 1;
        let node = self.node(id);

        if node.links.color == Color::Red {
            assert!(
                self.is_black(node.links.left) && self.is_black(node.links.right),
                "red node has a red child"
            );
        }

        let mut left_height = 0;
        if let Some(left) = node.links.left {
            assert_eq!(self.node(left).links.parent, Some(id), "broken parent link (left)");
            assert!(
                self.node(left).item.key() < node.item.key(),
                "binary search order violated (left)"
            );
            left_height = self.check_subtree(left, count);

            // the predecessor must be the rightmost node of the left subtree
            let mut pred = left;
            while let Some(right) = self.right(pred) {
                pred = right;
            }
            assert_eq!(node.links.prev, Some(pred), "predecessor link mismatch");
            assert_eq!(self.node(pred).links.next, Some(id), "successor backlink mismatch");
        }

        let mut right_height = 0;
        if let Some(right) = node.links.right {
            assert_eq!(self.node(right).links.parent, Some(id), "broken parent link (right)");
            assert!(
                node.item.key() < self.node(right).item.key(),
                "binary search order violated (right)"
            );
            right_height = self.check_subtree(right, count);

            // the successor must be the leftmost node of the right subtree
            let mut succ = right;
            while let Some(left) = self.left(succ) {
                succ = left;
            }
            assert_eq!(node.links.next, Some(succ), "successor link mismatch");
            assert_eq!(self.node(succ).links.prev, Some(id), "predecessor backlink mismatch");
        }

        assert_eq!(left_height, right_height, "black height mismatch");

        let expected = node.item.aggregate(
            node.links.left.map(|left| self.node(left).agg),
            node.links.right.map(|right| self.node(right).agg),
        );
        assert!(node.agg == expected, "stale aggregate {:?} (expected {:?})", node.agg, expected);

        left_height + usize::from(node.links.color == Color::Black)
    }
}

/// In-order iterator over an [`RbTree`], see [`RbTree::iter`].
pub struct Iter<'a, T: Node> {
    tree: &'a RbTree<T>,
    cursor: Option<NodeId>,
    remaining: usize,
}

impl<'a, T: Node> Iterator for Iter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.tree.next(id);
        self.remaining -= 1;
        Some((id, self.tree.get(id)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Node> ExactSizeIterator for Iter<'_, T> {}

//! Stable id → current position (`pre`) translation.
//!
//! Ids are kept in an implicit treap ordered by position: every tree node
//! stores the size of its subtree, so the rank of a node is the number of
//! nodes to its left. Tree nodes live in an arena and carry parent links,
//! which lets `pre(id)` walk from the id's slot to the root and sum left
//! subtree sizes. Insert and delete at a position split the treap by rank
//! and merge it back. Priorities are a hash of the id, so the shape is
//! deterministic for a given operation history.

use std::collections::HashMap;

use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::NodeId;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone)]
struct Slot {
    id: NodeId,
    priority: u64,
    left: usize,
    right: usize,
    parent: usize,
    size: usize,
}

#[derive(Debug, Clone)]
pub struct IdPreMap {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_id: HashMap<NodeId, usize>,
    root: usize,
}

impl Default for IdPreMap {
    fn default() -> Self {
        Self::new()
    }
}

fn priority_of(id: NodeId) -> u64 {
    // splitmix64 finaliser
    let mut z = id.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl IdPreMap {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), by_id: HashMap::new(), root: NIL }
    }

    /// Map where ids `0..count` sit at positions `0..count`.
    pub fn identity(count: usize) -> Self {
        let mut map = Self::new();
        for id in 0..count as NodeId {
            map.push_back(id);
        }
        map
    }

    pub fn len(&self) -> usize {
        self.size_of(self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root == NIL
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Current position of `id`, or `None` when the id is not live.
    pub fn pre(&self, id: NodeId) -> Option<usize> {
        let mut cur = *self.by_id.get(&id)?;
        let mut rank = self.size_of(self.slots[cur].left);
        while self.slots[cur].parent != NIL {
            let parent = self.slots[cur].parent;
            if self.slots[parent].right == cur {
                rank += self.size_of(self.slots[parent].left) + 1;
            }
            cur = parent;
        }
        Some(rank)
    }

    /// Id stored at position `pre`.
    pub fn id_at(&self, pre: usize) -> Option<NodeId> {
        let mut cur = self.root;
        let mut k = pre;
        while cur != NIL {
            let ls = self.size_of(self.slots[cur].left);
            if k < ls {
                cur = self.slots[cur].left;
            } else if k == ls {
                return Some(self.slots[cur].id);
            } else {
                k -= ls + 1;
                cur = self.slots[cur].right;
            }
        }
        None
    }

    /// Introduces `id` at position `pre`; every id at `pre` or later moves one
    /// position up.
    pub fn insert(&mut self, pre: usize, id: NodeId) -> Result<(), Error> {
        if pre > self.len() {
            return Err(Error::from_code(
                ErrorCode::BXUP0001,
                format!("insert position {pre} beyond map of {} ids", self.len()),
            ));
        }
        if self.by_id.contains_key(&id) {
            return Err(Error::from_code(ErrorCode::BXST0001, format!("id {id} is already mapped")));
        }
        let slot = self.alloc(id);
        let (l, r) = self.split(self.root, pre);
        let left = self.merge(l, slot);
        self.root = self.merge(left, r);
        self.set_parent(self.root, NIL);
        Ok(())
    }

    /// Removes `id`, which must sit at position `pre`; every id after it moves
    /// one position down.
    pub fn delete(&mut self, pre: usize, id: NodeId) -> Result<(), Error> {
        match self.pre(id) {
            Some(p) if p == pre => {}
            Some(p) => {
                return Err(Error::from_code(
                    ErrorCode::BXUP0001,
                    format!("id {id} is at position {p}, not {pre}"),
                ));
            }
            None => {
                return Err(Error::from_code(ErrorCode::BXUP0001, format!("id {id} is not live")));
            }
        }
        let (l, r) = self.split(self.root, pre);
        let (mid, rest) = self.split(r, 1);
        debug_assert_eq!(self.slots[mid].id, id);
        self.release(mid);
        self.root = self.merge(l, rest);
        self.set_parent(self.root, NIL);
        Ok(())
    }

    /// Ids in position order.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.len());
        let mut stack = Vec::new();
        let mut cur = self.root;
        while cur != NIL || !stack.is_empty() {
            while cur != NIL {
                stack.push(cur);
                cur = self.slots[cur].left;
            }
            if let Some(top) = stack.pop() {
                out.push(self.slots[top].id);
                cur = self.slots[top].right;
            }
        }
        out
    }

    /// Appends a fresh id at the end. The caller guarantees `id` is unmapped.
    fn push_back(&mut self, id: NodeId) {
        let slot = self.alloc(id);
        self.root = self.merge(self.root, slot);
        self.set_parent(self.root, NIL);
    }

    fn alloc(&mut self, id: NodeId) -> usize {
        let slot = Slot { id, priority: priority_of(id), left: NIL, right: NIL, parent: NIL, size: 1 };
        let at = if let Some(free) = self.free.pop() {
            self.slots[free] = slot;
            free
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        };
        self.by_id.insert(id, at);
        at
    }

    fn release(&mut self, slot: usize) {
        self.by_id.remove(&self.slots[slot].id);
        self.slots[slot].left = NIL;
        self.slots[slot].right = NIL;
        self.slots[slot].parent = NIL;
        self.free.push(slot);
    }

    #[inline]
    fn size_of(&self, t: usize) -> usize {
        if t == NIL { 0 } else { self.slots[t].size }
    }

    #[inline]
    fn set_parent(&mut self, t: usize, parent: usize) {
        if t != NIL {
            self.slots[t].parent = parent;
        }
    }

    fn set_left(&mut self, t: usize, child: usize) {
        self.slots[t].left = child;
        self.set_parent(child, t);
    }

    fn set_right(&mut self, t: usize, child: usize) {
        self.slots[t].right = child;
        self.set_parent(child, t);
    }

    fn update(&mut self, t: usize) {
        self.slots[t].size = 1 + self.size_of(self.slots[t].left) + self.size_of(self.slots[t].right);
    }

    /// Splits `t` into the first `k` ids and the rest. Parent links of the
    /// returned roots are left for the caller to set.
    fn split(&mut self, t: usize, k: usize) -> (usize, usize) {
        if t == NIL {
            return (NIL, NIL);
        }
        let left = self.slots[t].left;
        let ls = self.size_of(left);
        if k <= ls {
            let (a, b) = self.split(left, k);
            self.set_left(t, b);
            self.update(t);
            self.set_parent(a, NIL);
            (a, t)
        } else {
            let right = self.slots[t].right;
            let (a, b) = self.split(right, k - ls - 1);
            self.set_right(t, a);
            self.update(t);
            self.set_parent(b, NIL);
            (t, b)
        }
    }

    fn merge(&mut self, a: usize, b: usize) -> usize {
        if a == NIL {
            return b;
        }
        if b == NIL {
            return a;
        }
        if self.slots[a].priority >= self.slots[b].priority {
            let right = self.slots[a].right;
            let m = self.merge(right, b);
            self.set_right(a, m);
            self.update(a);
            a
        } else {
            let left = self.slots[b].left;
            let m = self.merge(a, left);
            self.set_left(b, m);
            self.update(b);
            b
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_shifts_following_positions() {
        let mut map = IdPreMap::identity(10);
        map.insert(2, 101).unwrap();
        assert_eq!(map.pre(101), Some(2));
        assert_eq!(map.pre(2), Some(3));
        assert_eq!(map.pre(1), Some(1));
        assert_eq!(map.pre(9), Some(10));
        assert_eq!(map.len(), 11);
    }

    #[test]
    fn delete_then_lookup_is_absent() {
        let mut map = IdPreMap::identity(5);
        map.delete(1, 1).unwrap();
        assert_eq!(map.pre(1), None);
        assert_eq!(map.pre(2), Some(1));
        assert_eq!(map.ids(), vec![0, 2, 3, 4]);
    }

    #[test]
    fn delete_with_wrong_position_is_rejected() {
        let mut map = IdPreMap::identity(3);
        assert!(map.delete(0, 2).is_err());
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn identity_places_ids_at_their_own_position() {
        let map = IdPreMap::identity(6);
        assert_eq!(map.ids(), (0..6).collect::<Vec<NodeId>>());
        assert_eq!(map.pre(5), Some(5));
        assert_eq!(map.id_at(3), Some(3));
    }

    #[test]
    fn slots_are_reused() {
        let mut map = IdPreMap::identity(4);
        map.delete(3, 3).unwrap();
        map.insert(0, 77).unwrap();
        assert_eq!(map.slots.len(), 4);
        assert_eq!(map.ids(), vec![77, 0, 1, 2]);
    }
}

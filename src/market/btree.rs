//! Order-`m` B+ tree keyed by price.
//!
//! Payloads live only in leaves; internal nodes carry separator keys. The
//! leaves form a doubly-linked list so that best-first walks never touch
//! the upper levels, and node records are arena-allocated with a LIFO free
//! list so that a busy market stops allocating once it reaches steady
//! state.
//!
//! Shape invariants, checked by `assert_invariants` under test:
//! - every non-root leaf holds at least `m/2` elements;
//! - every non-root internal node holds at least `m/2 - 1` keys;
//! - the root holds at least one element (or the tree is empty);
//! - the leaf chain visits exactly the keys of an in-order traversal.

use super::fixed_point::Fp;
use either::Either;
use std::collections::HashMap;

const NIL: u32 = 0;

/// Default branching order used by the price stores.
pub(crate) const DEFAULT_TREE_ORDER: usize = 16;

/// Direction of a tree walk. The discriminants are part of the
/// caller-facing wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IterDirection {
    /// Walk from the maximum key down.
    Decreasing = 0,
    /// Walk from the minimum key up.
    Increasing = 1,
}

impl TryFrom<u8> for IterDirection {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(IterDirection::Decreasing),
            1 => Ok(IterDirection::Increasing),
            other => Err(other),
        }
    }
}

#[derive(Debug)]
enum TreeNode<V> {
    Internal {
        keys: Vec<Fp>,
        children: Vec<u32>,
    },
    Leaf {
        keys: Vec<Fp>,
        values: Vec<V>,
        prev: u32,
        next: u32,
    },
}

/// B+ tree over [`Fp`] keys. See the module docs for the shape invariants.
#[derive(Debug)]
pub struct BPlusTree<V> {
    nodes: HashMap<u32, TreeNode<V>>,
    root: u32,
    head_leaf: u32,
    tail_leaf: u32,
    len: usize,
    order: usize,
    next_node_key: u32,
    unused: Vec<u32>,
}

impl<V> Default for BPlusTree<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TREE_ORDER)
    }
}

impl<V> BPlusTree<V> {
    /// Create an empty tree of branching order `m`. `m` must be even and
    /// at least 4.
    pub fn new(order: usize) -> Self {
        debug_assert!(order >= 4 && order % 2 == 0, "tree order must be even and >= 4");
        BPlusTree {
            nodes: HashMap::new(),
            root: NIL,
            head_leaf: NIL,
            tail_leaf: NIL,
            len: 0,
            order,
            next_node_key: 1,
            unused: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Smallest key, if any.
    pub fn min_key(&self) -> Option<Fp> {
        if self.head_leaf == NIL {
            return None;
        }
        match &self.nodes[&self.head_leaf] {
            TreeNode::Leaf { keys, .. } => keys.first().copied(),
            TreeNode::Internal { .. } => unreachable!("head_leaf points at an internal node"),
        }
    }

    /// Largest key, if any.
    pub fn max_key(&self) -> Option<Fp> {
        if self.tail_leaf == NIL {
            return None;
        }
        match &self.nodes[&self.tail_leaf] {
            TreeNode::Leaf { keys, .. } => keys.last().copied(),
            TreeNode::Internal { .. } => unreachable!("tail_leaf points at an internal node"),
        }
    }

    pub fn contains_key(&self, key: Fp) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: Fp) -> Option<&V> {
        if self.root == NIL {
            return None;
        }
        let leaf = self.descend(key);
        match &self.nodes[&leaf] {
            TreeNode::Leaf { keys, values, .. } => keys
                .binary_search(&key)
                .ok()
                .map(|slot| &values[slot]),
            TreeNode::Internal { .. } => unreachable!("descend returned an internal node"),
        }
    }

    pub fn get_mut(&mut self, key: Fp) -> Option<&mut V> {
        if self.root == NIL {
            return None;
        }
        let leaf = self.descend(key);
        match self.nodes.get_mut(&leaf).expect("leaf node") {
            TreeNode::Leaf { keys, values, .. } => keys
                .binary_search(&key)
                .ok()
                .map(|slot| &mut values[slot]),
            TreeNode::Internal { .. } => unreachable!("descend returned an internal node"),
        }
    }

    /// Insert a key/value pair. Returns the previous value when the key was
    /// already present.
    pub fn insert(&mut self, key: Fp, value: V) -> Option<V> {
        if self.root == NIL {
            let root = self.alloc(TreeNode::Leaf {
                keys: vec![key],
                values: vec![value],
                prev: NIL,
                next: NIL,
            });
            self.root = root;
            self.head_leaf = root;
            self.tail_leaf = root;
            self.len = 1;
            return None;
        }

        let path = self.descend_with_path(key);
        let leaf = path.last().map(|(node, _)| *node).unwrap_or(self.root);

        let overflow = match self.nodes.get_mut(&leaf).expect("leaf node") {
            TreeNode::Leaf { keys, values, .. } => match keys.binary_search(&key) {
                Ok(slot) => {
                    let old = std::mem::replace(&mut values[slot], value);
                    return Some(old);
                }
                Err(slot) => {
                    keys.insert(slot, key);
                    values.insert(slot, value);
                    keys.len() > self.order
                }
            },
            TreeNode::Internal { .. } => unreachable!("descend returned an internal node"),
        };
        self.len += 1;

        if overflow {
            self.split_up(leaf, path);
        }
        None
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: Fp) -> Option<V> {
        if self.root == NIL {
            return None;
        }
        let path = self.descend_with_path(key);
        let leaf = path.last().map(|(node, _)| *node).unwrap_or(self.root);

        let value = match self.nodes.get_mut(&leaf).expect("leaf node") {
            TreeNode::Leaf { keys, values, .. } => match keys.binary_search(&key) {
                Ok(slot) => {
                    keys.remove(slot);
                    Some(values.remove(slot))
                }
                Err(_) => None,
            },
            TreeNode::Internal { .. } => unreachable!("descend returned an internal node"),
        }?;
        self.len -= 1;

        self.repair_up(leaf, path);
        Some(value)
    }

    /// Remove and return the entry with the smallest key.
    pub fn pop_min(&mut self) -> Option<(Fp, V)> {
        let key = self.min_key()?;
        let value = self.remove(key).expect("min key present");
        Some((key, value))
    }

    /// Remove and return the entry with the largest key.
    pub fn pop_max(&mut self) -> Option<(Fp, V)> {
        let key = self.max_key()?;
        let value = self.remove(key).expect("max key present");
        Some((key, value))
    }

    /// Iterate entries in increasing key order.
    pub fn iter(&self) -> TreeIter<'_, V> {
        TreeIter {
            tree: self,
            leaf: self.head_leaf,
            slot: 0,
        }
    }

    /// Iterate entries in decreasing key order.
    pub fn iter_rev(&self) -> TreeIterRev<'_, V> {
        let slot = if self.tail_leaf == NIL {
            0
        } else {
            self.leaf_len(self.tail_leaf)
        };
        TreeIterRev {
            tree: self,
            leaf: self.tail_leaf,
            slot,
        }
    }

    /// Iterate in the given [`IterDirection`].
    pub fn iter_direction(
        &self,
        direction: IterDirection,
    ) -> Either<TreeIter<'_, V>, TreeIterRev<'_, V>> {
        match direction {
            IterDirection::Increasing => Either::Left(self.iter()),
            IterDirection::Decreasing => Either::Right(self.iter_rev()),
        }
    }

    fn leaf_len(&self, leaf: u32) -> usize {
        match &self.nodes[&leaf] {
            TreeNode::Leaf { keys, .. } => keys.len(),
            TreeNode::Internal { .. } => unreachable!("expected a leaf"),
        }
    }

    fn alloc(&mut self, node: TreeNode<V>) -> u32 {
        let key = match self.unused.pop() {
            Some(key) => key,
            None => {
                let key = self.next_node_key;
                self.next_node_key += 1;
                key
            }
        };
        self.nodes.insert(key, node);
        key
    }

    fn free(&mut self, key: u32) {
        self.nodes.remove(&key);
        self.unused.push(key);
    }

    /// Walk down to the leaf that owns `key`.
    fn descend(&self, key: Fp) -> u32 {
        let mut node = self.root;
        loop {
            match &self.nodes[&node] {
                TreeNode::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| *k <= key);
                    node = children[idx];
                }
                TreeNode::Leaf { .. } => return node,
            }
        }
    }

    /// Like `descend`, recording `(node, child index chosen)` for every
    /// visited node, the leaf last with a meaningless index.
    fn descend_with_path(&self, key: Fp) -> Vec<(u32, usize)> {
        let mut path = Vec::new();
        let mut node = self.root;
        loop {
            match &self.nodes[&node] {
                TreeNode::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| *k <= key);
                    path.push((node, idx));
                    node = children[idx];
                }
                TreeNode::Leaf { .. } => {
                    path.push((node, 0));
                    return path;
                }
            }
        }
    }

    /// Split `node` (which just overflowed) and propagate upward along
    /// `path`. `path` ends with `node` itself.
    fn split_up(&mut self, node: u32, mut path: Vec<(u32, usize)>) {
        path.pop();
        let mut child = node;
        loop {
            let (separator, right) = self.split_node(child);
            match path.pop() {
                Some((parent, child_idx)) => {
                    let overflow = match self.nodes.get_mut(&parent).expect("parent node") {
                        TreeNode::Internal { keys, children } => {
                            keys.insert(child_idx, separator);
                            children.insert(child_idx + 1, right);
                            children.len() > self.order
                        }
                        TreeNode::Leaf { .. } => unreachable!("leaf on internal path"),
                    };
                    if !overflow {
                        return;
                    }
                    child = parent;
                }
                None => {
                    // `child` was the root.
                    let new_root = self.alloc(TreeNode::Internal {
                        keys: vec![separator],
                        children: vec![child, right],
                    });
                    self.root = new_root;
                    return;
                }
            }
        }
    }

    /// Split one overflowing node, returning the separator key and the key
    /// of the freshly allocated right node.
    fn split_node(&mut self, node: u32) -> (Fp, u32) {
        enum Split<V> {
            Leaf {
                keys: Vec<Fp>,
                values: Vec<V>,
                old_next: u32,
            },
            Internal {
                separator: Fp,
                keys: Vec<Fp>,
                children: Vec<u32>,
            },
        }

        let split = match self.nodes.get_mut(&node).expect("splitting node") {
            TreeNode::Leaf {
                keys, values, next, ..
            } => {
                let mid = keys.len() / 2;
                Split::Leaf {
                    keys: keys.split_off(mid),
                    values: values.split_off(mid),
                    old_next: *next,
                }
            }
            TreeNode::Internal { keys, children } => {
                let mid = keys.len() / 2;
                let right_keys = keys.split_off(mid + 1);
                let separator = keys.pop().expect("separator key");
                let right_children = children.split_off(mid + 1);
                Split::Internal {
                    separator,
                    keys: right_keys,
                    children: right_children,
                }
            }
        };

        match split {
            Split::Leaf {
                keys,
                values,
                old_next,
            } => {
                let separator = keys[0];
                let right = self.alloc(TreeNode::Leaf {
                    keys,
                    values,
                    prev: node,
                    next: old_next,
                });
                match self.nodes.get_mut(&node).expect("left leaf") {
                    TreeNode::Leaf { next, .. } => *next = right,
                    TreeNode::Internal { .. } => unreachable!(),
                }
                if old_next != NIL {
                    match self.nodes.get_mut(&old_next).expect("right neighbor") {
                        TreeNode::Leaf { prev, .. } => *prev = right,
                        TreeNode::Internal { .. } => unreachable!(),
                    }
                } else {
                    self.tail_leaf = right;
                }
                (separator, right)
            }
            Split::Internal {
                separator,
                keys,
                children,
            } => {
                let right = self.alloc(TreeNode::Internal { keys, children });
                (separator, right)
            }
        }
    }

    /// Restore minimum-fill invariants from `node` up along `path` after a
    /// removal. `path` ends with `node` itself.
    fn repair_up(&mut self, node: u32, mut path: Vec<(u32, usize)>) {
        path.pop();
        let mut child = node;
        loop {
            let parent = path.pop();
            if parent.is_none() {
                self.shrink_root();
                return;
            }
            let (parent, child_idx) = parent.expect("checked above");

            if !self.underfull(child) {
                return;
            }
            if self.try_borrow(parent, child_idx) {
                return;
            }
            self.merge_with_sibling(parent, child_idx);
            child = parent;
        }
    }

    fn underfull(&self, node: u32) -> bool {
        match &self.nodes[&node] {
            TreeNode::Leaf { keys, .. } => keys.len() < self.order / 2,
            TreeNode::Internal { children, .. } => children.len() < self.order / 2,
        }
    }

    /// Collapse the root when it lost its last separator, and clear the
    /// tree when the last element is gone.
    fn shrink_root(&mut self) {
        match &self.nodes[&self.root] {
            TreeNode::Internal { children, .. } => {
                if children.len() == 1 {
                    let child = children[0];
                    let old_root = self.root;
                    self.root = child;
                    self.free(old_root);
                }
            }
            TreeNode::Leaf { keys, .. } => {
                if keys.is_empty() {
                    let old_root = self.root;
                    self.root = NIL;
                    self.head_leaf = NIL;
                    self.tail_leaf = NIL;
                    self.free(old_root);
                }
            }
        }
    }

    /// Try to pull one element from a sibling with spare capacity.
    fn try_borrow(&mut self, parent: u32, child_idx: usize) -> bool {
        let (left_sibling, right_sibling) = self.siblings(parent, child_idx);

        if let Some(left) = left_sibling {
            if self.has_spare(left) {
                self.borrow_from_left(parent, child_idx, left);
                return true;
            }
        }
        if let Some(right) = right_sibling {
            if self.has_spare(right) {
                self.borrow_from_right(parent, child_idx, right);
                return true;
            }
        }
        false
    }

    fn siblings(&self, parent: u32, child_idx: usize) -> (Option<u32>, Option<u32>) {
        match &self.nodes[&parent] {
            TreeNode::Internal { children, .. } => {
                let left = (child_idx > 0).then(|| children[child_idx - 1]);
                let right = (child_idx + 1 < children.len()).then(|| children[child_idx + 1]);
                (left, right)
            }
            TreeNode::Leaf { .. } => unreachable!("parent must be internal"),
        }
    }

    fn has_spare(&self, node: u32) -> bool {
        match &self.nodes[&node] {
            TreeNode::Leaf { keys, .. } => keys.len() > self.order / 2,
            TreeNode::Internal { children, .. } => children.len() > self.order / 2,
        }
    }

    fn borrow_from_left(&mut self, parent: u32, child_idx: usize, left: u32) {
        let child = self.child_at(parent, child_idx);
        let separator_idx = child_idx - 1;

        let donated = self.nodes.remove(&left).expect("left sibling");
        match donated {
            TreeNode::Leaf {
                mut keys,
                mut values,
                prev,
                next,
            } => {
                let key = keys.pop().expect("spare element");
                let value = values.pop().expect("spare element");
                self.nodes.insert(
                    left,
                    TreeNode::Leaf {
                        keys,
                        values,
                        prev,
                        next,
                    },
                );
                match self.nodes.get_mut(&child).expect("underfull leaf") {
                    TreeNode::Leaf { keys, values, .. } => {
                        keys.insert(0, key);
                        values.insert(0, value);
                    }
                    TreeNode::Internal { .. } => unreachable!(),
                }
                self.set_separator(parent, separator_idx, key);
            }
            TreeNode::Internal {
                mut keys,
                mut children,
            } => {
                let moved_child = children.pop().expect("spare child");
                let moved_key = keys.pop().expect("spare key");
                self.nodes.insert(left, TreeNode::Internal { keys, children });
                let old_separator = self.separator(parent, separator_idx);
                match self.nodes.get_mut(&child).expect("underfull internal") {
                    TreeNode::Internal { keys, children } => {
                        keys.insert(0, old_separator);
                        children.insert(0, moved_child);
                    }
                    TreeNode::Leaf { .. } => unreachable!(),
                }
                self.set_separator(parent, separator_idx, moved_key);
            }
        }
    }

    fn borrow_from_right(&mut self, parent: u32, child_idx: usize, right: u32) {
        let child = self.child_at(parent, child_idx);
        let separator_idx = child_idx;

        let donated = self.nodes.remove(&right).expect("right sibling");
        match donated {
            TreeNode::Leaf {
                mut keys,
                mut values,
                prev,
                next,
            } => {
                let key = keys.remove(0);
                let value = values.remove(0);
                let new_right_min = keys[0];
                self.nodes.insert(
                    right,
                    TreeNode::Leaf {
                        keys,
                        values,
                        prev,
                        next,
                    },
                );
                match self.nodes.get_mut(&child).expect("underfull leaf") {
                    TreeNode::Leaf { keys, values, .. } => {
                        keys.push(key);
                        values.push(value);
                    }
                    TreeNode::Internal { .. } => unreachable!(),
                }
                self.set_separator(parent, separator_idx, new_right_min);
            }
            TreeNode::Internal {
                mut keys,
                mut children,
            } => {
                let moved_child = children.remove(0);
                let moved_key = keys.remove(0);
                self.nodes
                    .insert(right, TreeNode::Internal { keys, children });
                let old_separator = self.separator(parent, separator_idx);
                match self.nodes.get_mut(&child).expect("underfull internal") {
                    TreeNode::Internal { keys, children } => {
                        keys.push(old_separator);
                        children.push(moved_child);
                    }
                    TreeNode::Leaf { .. } => unreachable!(),
                }
                self.set_separator(parent, separator_idx, moved_key);
            }
        }
    }

    /// Merge the underfull child at `child_idx` with a sibling; both are at
    /// minimum fill, so the result always fits one node.
    fn merge_with_sibling(&mut self, parent: u32, child_idx: usize) {
        let (left_sibling, _) = self.siblings(parent, child_idx);
        // Merge right-into-left: pick the pair so the child is involved.
        let (left_idx, left, right) = match left_sibling {
            Some(left) => (child_idx - 1, left, self.child_at(parent, child_idx)),
            None => (
                child_idx,
                self.child_at(parent, child_idx),
                self.child_at(parent, child_idx + 1),
            ),
        };
        let separator = self.separator(parent, left_idx);

        let absorbed = self.nodes.remove(&right).expect("right merge node");
        match absorbed {
            TreeNode::Leaf {
                mut keys,
                mut values,
                next,
                ..
            } => {
                match self.nodes.get_mut(&left).expect("left merge node") {
                    TreeNode::Leaf {
                        keys: lkeys,
                        values: lvalues,
                        next: lnext,
                        ..
                    } => {
                        lkeys.append(&mut keys);
                        lvalues.append(&mut values);
                        *lnext = next;
                    }
                    TreeNode::Internal { .. } => unreachable!(),
                }
                if next != NIL {
                    match self.nodes.get_mut(&next).expect("leaf after merge") {
                        TreeNode::Leaf { prev, .. } => *prev = left,
                        TreeNode::Internal { .. } => unreachable!(),
                    }
                } else {
                    self.tail_leaf = left;
                }
            }
            TreeNode::Internal {
                mut keys,
                mut children,
            } => match self.nodes.get_mut(&left).expect("left merge node") {
                TreeNode::Internal {
                    keys: lkeys,
                    children: lchildren,
                } => {
                    lkeys.push(separator);
                    lkeys.append(&mut keys);
                    lchildren.append(&mut children);
                }
                TreeNode::Leaf { .. } => unreachable!(),
            },
        }
        self.unused.push(right);

        match self.nodes.get_mut(&parent).expect("merge parent") {
            TreeNode::Internal { keys, children } => {
                keys.remove(left_idx);
                children.remove(left_idx + 1);
            }
            TreeNode::Leaf { .. } => unreachable!(),
        }
    }

    fn child_at(&self, parent: u32, idx: usize) -> u32 {
        match &self.nodes[&parent] {
            TreeNode::Internal { children, .. } => children[idx],
            TreeNode::Leaf { .. } => unreachable!("parent must be internal"),
        }
    }

    fn separator(&self, parent: u32, idx: usize) -> Fp {
        match &self.nodes[&parent] {
            TreeNode::Internal { keys, .. } => keys[idx],
            TreeNode::Leaf { .. } => unreachable!("parent must be internal"),
        }
    }

    fn set_separator(&mut self, parent: u32, idx: usize, key: Fp) {
        match self.nodes.get_mut(&parent).expect("separator parent") {
            TreeNode::Internal { keys, .. } => keys[idx] = key,
            TreeNode::Leaf { .. } => unreachable!("parent must be internal"),
        }
    }

    /// Verify every shape invariant. Test-only; panics on violation.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        if self.root == NIL {
            assert_eq!(self.len, 0);
            assert_eq!(self.head_leaf, NIL);
            assert_eq!(self.tail_leaf, NIL);
            return;
        }

        fn walk<V>(
            tree: &BPlusTree<V>,
            node: u32,
            is_root: bool,
            lower: Option<Fp>,
            upper: Option<Fp>,
            leaves: &mut Vec<u32>,
            count: &mut usize,
        ) {
            match &tree.nodes[&node] {
                TreeNode::Leaf { keys, values, .. } => {
                    assert_eq!(keys.len(), values.len());
                    if is_root {
                        assert!(!keys.is_empty(), "non-empty tree root must hold elements");
                    } else {
                        assert!(keys.len() >= tree.order / 2, "leaf below minimum fill");
                    }
                    assert!(keys.len() <= tree.order, "leaf above capacity");
                    assert!(keys.windows(2).all(|w| w[0] < w[1]), "leaf keys unsorted");
                    if let Some(lo) = lower {
                        assert!(keys[0] >= lo, "leaf key below subtree bound");
                    }
                    if let Some(hi) = upper {
                        assert!(*keys.last().expect("nonempty") < hi, "leaf key above bound");
                    }
                    leaves.push(node);
                    *count += keys.len();
                }
                TreeNode::Internal { keys, children } => {
                    assert_eq!(children.len(), keys.len() + 1);
                    if is_root {
                        assert!(!keys.is_empty(), "internal root must hold a separator");
                    } else {
                        assert!(
                            keys.len() >= tree.order / 2 - 1,
                            "internal node below minimum fill"
                        );
                    }
                    assert!(children.len() <= tree.order, "internal node above capacity");
                    assert!(keys.windows(2).all(|w| w[0] < w[1]), "separators unsorted");
                    for (idx, child) in children.iter().enumerate() {
                        let lo = if idx == 0 { lower } else { Some(keys[idx - 1]) };
                        let hi = if idx == keys.len() {
                            upper
                        } else {
                            Some(keys[idx])
                        };
                        walk(tree, *child, false, lo, hi, leaves, count);
                    }
                }
            }
        }

        let mut leaves = Vec::new();
        let mut count = 0;
        walk(self, self.root, true, None, None, &mut leaves, &mut count);
        assert_eq!(count, self.len, "element count mismatch");

        // The leaf chain must visit the in-order leaves exactly.
        assert_eq!(self.head_leaf, *leaves.first().expect("at least one leaf"));
        assert_eq!(self.tail_leaf, *leaves.last().expect("at least one leaf"));
        let mut chained = Vec::new();
        let mut cursor = self.head_leaf;
        let mut prev = NIL;
        while cursor != NIL {
            chained.push(cursor);
            match &self.nodes[&cursor] {
                TreeNode::Leaf {
                    prev: node_prev,
                    next,
                    ..
                } => {
                    assert_eq!(*node_prev, prev, "leaf back-link broken");
                    prev = cursor;
                    cursor = *next;
                }
                TreeNode::Internal { .. } => unreachable!("leaf chain hit internal node"),
            }
        }
        assert_eq!(chained, leaves, "leaf chain diverges from in-order traversal");

        let keys: Vec<Fp> = self.iter().map(|(k, _)| k).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "iteration unsorted");
    }
}

/// Increasing-order iterator over `(key, &value)` entries.
pub struct TreeIter<'a, V> {
    tree: &'a BPlusTree<V>,
    leaf: u32,
    slot: usize,
}

impl<'a, V> Iterator for TreeIter<'a, V> {
    type Item = (Fp, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.leaf != NIL {
            match &self.tree.nodes[&self.leaf] {
                TreeNode::Leaf {
                    keys, values, next, ..
                } => {
                    if self.slot < keys.len() {
                        let item = (keys[self.slot], &values[self.slot]);
                        self.slot += 1;
                        return Some(item);
                    }
                    self.leaf = *next;
                    self.slot = 0;
                }
                TreeNode::Internal { .. } => unreachable!("iterator on internal node"),
            }
        }
        None
    }
}

/// Decreasing-order iterator over `(key, &value)` entries.
pub struct TreeIterRev<'a, V> {
    tree: &'a BPlusTree<V>,
    leaf: u32,
    slot: usize,
}

impl<'a, V> Iterator for TreeIterRev<'a, V> {
    type Item = (Fp, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.leaf != NIL {
            match &self.tree.nodes[&self.leaf] {
                TreeNode::Leaf {
                    keys, values, prev, ..
                } => {
                    if self.slot > 0 {
                        self.slot -= 1;
                        return Some((keys[self.slot], &values[self.slot]));
                    }
                    self.leaf = *prev;
                    self.slot = if self.leaf == NIL {
                        0
                    } else {
                        self.tree.leaf_len(self.leaf)
                    };
                }
                TreeNode::Internal { .. } => unreachable!("iterator on internal node"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u64) -> Fp {
        Fp::from_int(n)
    }

    #[test]
    fn test_insert_get_small() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        assert!(tree.is_empty());
        for n in [5u64, 3, 9, 1, 7] {
            assert_eq!(tree.insert(fp(n), n * 10), None);
        }
        tree.assert_invariants();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.get(fp(3)), Some(&30));
        assert_eq!(tree.get(fp(4)), None);
        assert_eq!(tree.min_key(), Some(fp(1)));
        assert_eq!(tree.max_key(), Some(fp(9)));
    }

    #[test]
    fn test_insert_replaces_existing() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        tree.insert(fp(1), 10);
        assert_eq!(tree.insert(fp(1), 20), Some(10));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(fp(1)), Some(&20));
    }

    #[test]
    fn test_get_mut() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        tree.insert(fp(1), 10);
        *tree.get_mut(fp(1)).unwrap() = 42;
        assert_eq!(tree.get(fp(1)), Some(&42));
    }

    #[test]
    fn test_ascending_inserts_keep_invariants() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        for n in 0..200u64 {
            tree.insert(fp(n), n);
            tree.assert_invariants();
        }
        let keys: Vec<Fp> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, (0..200).map(fp).collect::<Vec<_>>());
    }

    #[test]
    fn test_descending_inserts_keep_invariants() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        for n in (0..200u64).rev() {
            tree.insert(fp(n), n);
            tree.assert_invariants();
        }
        assert_eq!(tree.min_key(), Some(fp(0)));
        assert_eq!(tree.max_key(), Some(fp(199)));
    }

    #[test]
    fn test_remove_all_ascending() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        for n in 0..100u64 {
            tree.insert(fp(n), n);
        }
        for n in 0..100u64 {
            assert_eq!(tree.remove(fp(n)), Some(n));
            tree.assert_invariants();
        }
        assert!(tree.is_empty());
        assert_eq!(tree.min_key(), None);
    }

    #[test]
    fn test_remove_all_descending() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        for n in 0..100u64 {
            tree.insert(fp(n), n);
        }
        for n in (0..100u64).rev() {
            assert_eq!(tree.remove(fp(n)), Some(n));
            tree.assert_invariants();
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn test_remove_missing_key() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        tree.insert(fp(1), 1);
        assert_eq!(tree.remove(fp(2)), None);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_interleaved_mutations_keep_invariants() {
        // Deterministic pseudo-random workload; exercises borrow and merge
        // on both leaf and internal levels.
        let mut tree: BPlusTree<u64> = BPlusTree::new(6);
        let mut present = std::collections::BTreeSet::new();
        let mut state = 0x2545F4914F6CDD1Du64;
        for _ in 0..2_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let key = state % 500;
            if present.contains(&key) {
                assert_eq!(tree.remove(fp(key)), Some(key));
                present.remove(&key);
            } else {
                assert_eq!(tree.insert(fp(key), key), None);
                present.insert(key);
            }
            tree.assert_invariants();
        }
        let keys: Vec<Fp> = tree.iter().map(|(k, _)| k).collect();
        let expected: Vec<Fp> = present.iter().map(|k| fp(*k)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_iter_rev_matches_forward() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        for n in [8u64, 3, 12, 1, 9, 4, 20, 15] {
            tree.insert(fp(n), n);
        }
        let forward: Vec<Fp> = tree.iter().map(|(k, _)| k).collect();
        let mut backward: Vec<Fp> = tree.iter_rev().map(|(k, _)| k).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_iter_direction_dispatch() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        for n in [2u64, 1, 3] {
            tree.insert(fp(n), n);
        }
        let inc: Vec<Fp> = tree
            .iter_direction(IterDirection::Increasing)
            .map(|(k, _)| k)
            .collect();
        assert_eq!(inc, vec![fp(1), fp(2), fp(3)]);
        let dec: Vec<Fp> = tree
            .iter_direction(IterDirection::Decreasing)
            .map(|(k, _)| k)
            .collect();
        assert_eq!(dec, vec![fp(3), fp(2), fp(1)]);
    }

    #[test]
    fn test_pop_extremes() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        for n in [5u64, 1, 9, 3] {
            tree.insert(fp(n), n);
        }
        assert_eq!(tree.pop_min(), Some((fp(1), 1)));
        assert_eq!(tree.pop_max(), Some((fp(9), 9)));
        tree.assert_invariants();
        assert_eq!(tree.len(), 2);
        let mut empty: BPlusTree<u64> = BPlusTree::new(4);
        assert_eq!(empty.pop_min(), None);
        assert_eq!(empty.pop_max(), None);
    }

    #[test]
    fn test_node_reuse_after_drain() {
        let mut tree: BPlusTree<u64> = BPlusTree::new(4);
        for n in 0..64u64 {
            tree.insert(fp(n), n);
        }
        let allocated = tree.next_node_key;
        for n in 0..64u64 {
            tree.remove(fp(n));
        }
        for n in 0..64u64 {
            tree.insert(fp(n), n);
        }
        tree.assert_invariants();
        // The refill is served from the free list, not fresh allocations.
        assert_eq!(tree.next_node_key, allocated);
    }

    #[test]
    fn test_iter_direction_wire_values() {
        assert_eq!(IterDirection::try_from(0), Ok(IterDirection::Decreasing));
        assert_eq!(IterDirection::try_from(1), Ok(IterDirection::Increasing));
        assert_eq!(IterDirection::try_from(2), Err(2));
    }
}

use {
    alloy_primitives::{B256, U256},
    indexmap::IndexSet,
    thiserror::Error,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("id already present under this key")]
    DuplicateEntry,
    #[error("no such id under this key")]
    EntryNotFound,
}

type Idx = u32;

/// Arena slot 0 is the sentinel leaf shared by every branch.
const NIL: Idx = 0;

#[derive(Debug)]
struct Node {
    key: U256,
    parent: Idx,
    left: Idx,
    right: Idx,
    red: bool,
    /// Ids at this key, in arrival order.
    ids: IndexSet<B256>,
    /// Id count of the subtree rooted here, own ids included.
    total: u64,
}

impl Node {
    fn sentinel() -> Self {
        Self {
            key: U256::ZERO,
            parent: NIL,
            left: NIL,
            right: NIL,
            red: false,
            ids: IndexSet::new(),
            total: 0,
        }
    }
}

/// Ordered map from score to an insertion-ordered id set, with subtree
/// counts for order statistics.
#[derive(Debug)]
pub struct ScoreTree {
    nodes: Vec<Node>,
    free: Vec<Idx>,
    root: Idx,
}

impl Default for ScoreTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::sentinel()],
            free: Vec::new(),
            root: NIL,
        }
    }

    /// Total number of ids across all keys.
    pub fn len(&self) -> u64 {
        self.nodes[self.root as usize].total
    }

    pub fn is_empty(&self) -> bool {
        self.root == NIL
    }

    /// Inserts `id` under `key`, appending to the key's FIFO when the key
    /// already exists.
    pub fn insert(&mut self, id: B256, key: U256) -> Result<(), Error> {
        let existing = self.find(key);
        if existing != NIL {
            let node = &mut self.nodes[existing as usize];
            if !node.ids.insert(id) {
                return Err(Error::DuplicateEntry);
            }
            self.bump_totals(existing, 1);
            return Ok(());
        }
        let fresh = self.alloc(key, id);
        self.link(fresh);
        self.insert_fixup(fresh);
        Ok(())
    }

    /// Removes `id` from `key`, deleting the key node when the last id
    /// under it disappears.
    pub fn remove(&mut self, id: B256, key: U256) -> Result<(), Error> {
        let node = self.find(key);
        if node == NIL || !self.nodes[node as usize].ids.shift_remove(&id) {
            return Err(Error::EntryNotFound);
        }
        if self.nodes[node as usize].ids.is_empty() {
            self.delete_node(node);
        } else {
            self.bump_totals(node, -1);
        }
        Ok(())
    }

    pub fn contains(&self, id: B256, key: U256) -> bool {
        let node = self.find(key);
        node != NIL && self.nodes[node as usize].ids.contains(&id)
    }

    pub fn key_exists(&self, key: U256) -> bool {
        self.find(key) != NIL
    }

    /// Number of ids stored under `key`. O(1) once the key is located.
    pub fn count_at(&self, key: U256) -> u64 {
        let node = self.find(key);
        if node == NIL {
            0
        } else {
            self.nodes[node as usize].ids.len() as u64
        }
    }

    /// Ids under `key` in arrival order.
    pub fn ids_at(&self, key: U256) -> impl Iterator<Item = B256> + '_ {
        let node = self.find(key);
        let ids = if node == NIL {
            None
        } else {
            Some(&self.nodes[node as usize].ids)
        };
        ids.into_iter().flatten().copied()
    }

    /// Smallest key present.
    pub fn first(&self) -> Option<U256> {
        if self.root == NIL {
            return None;
        }
        Some(self.nodes[self.minimum(self.root) as usize].key)
    }

    /// Largest key present.
    pub fn last(&self) -> Option<U256> {
        if self.root == NIL {
            return None;
        }
        let mut n = self.root;
        while self.nodes[n as usize].right != NIL {
            n = self.nodes[n as usize].right;
        }
        Some(self.nodes[n as usize].key)
    }

    /// Largest key strictly below `key`. `key` itself need not exist.
    pub fn prev(&self, key: U256) -> Option<U256> {
        let mut n = self.root;
        let mut best = None;
        while n != NIL {
            let node = &self.nodes[n as usize];
            if node.key < key {
                best = Some(node.key);
                n = node.right;
            } else {
                n = node.left;
            }
        }
        best
    }

    /// Smallest key strictly above `key`. `key` itself need not exist.
    pub fn next(&self, key: U256) -> Option<U256> {
        let mut n = self.root;
        let mut best = None;
        while n != NIL {
            let node = &self.nodes[n as usize];
            if node.key > key {
                best = Some(node.key);
                n = node.left;
            } else {
                n = node.right;
            }
        }
        best
    }

    /// Number of ids stored under keys strictly below `key`.
    pub fn rank(&self, key: U256) -> u64 {
        let mut n = self.root;
        let mut rank = 0;
        while n != NIL {
            let node = &self.nodes[n as usize];
            if node.key < key {
                rank += self.nodes[node.left as usize].total + node.ids.len() as u64;
                n = node.right;
            } else {
                n = node.left;
            }
        }
        rank
    }

    /// Key holding the id at position `rank` in ascending key order,
    /// 0-based over ids (ties occupy consecutive ranks).
    pub fn select(&self, mut rank: u64) -> Option<U256> {
        if rank >= self.len() {
            return None;
        }
        let mut n = self.root;
        loop {
            let node = &self.nodes[n as usize];
            let below = self.nodes[node.left as usize].total;
            let own = node.ids.len() as u64;
            if rank < below {
                n = node.left;
            } else if rank < below + own {
                return Some(node.key);
            } else {
                rank -= below + own;
                n = node.right;
            }
        }
    }

    fn find(&self, key: U256) -> Idx {
        let mut n = self.root;
        while n != NIL {
            let node = &self.nodes[n as usize];
            match key.cmp(&node.key) {
                std::cmp::Ordering::Less => n = node.left,
                std::cmp::Ordering::Greater => n = node.right,
                std::cmp::Ordering::Equal => return n,
            }
        }
        NIL
    }

    fn minimum(&self, mut n: Idx) -> Idx {
        while self.nodes[n as usize].left != NIL {
            n = self.nodes[n as usize].left;
        }
        n
    }

    fn alloc(&mut self, key: U256, id: B256) -> Idx {
        let mut ids = IndexSet::new();
        ids.insert(id);
        let node = Node {
            key,
            parent: NIL,
            left: NIL,
            right: NIL,
            red: true,
            ids,
            total: 1,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as Idx
            }
        }
    }

    /// Standard BST link of a freshly allocated red node, adding its id
    /// to every ancestor's subtree count on the way down.
    fn link(&mut self, fresh: Idx) {
        let key = self.nodes[fresh as usize].key;
        let mut parent = NIL;
        let mut n = self.root;
        while n != NIL {
            parent = n;
            self.nodes[n as usize].total += 1;
            n = if key < self.nodes[n as usize].key {
                self.nodes[n as usize].left
            } else {
                self.nodes[n as usize].right
            };
        }
        self.nodes[fresh as usize].parent = parent;
        if parent == NIL {
            self.root = fresh;
        } else if key < self.nodes[parent as usize].key {
            self.nodes[parent as usize].left = fresh;
        } else {
            self.nodes[parent as usize].right = fresh;
        }
    }

    fn bump_totals(&mut self, mut n: Idx, delta: i64) {
        while n != NIL {
            let total = &mut self.nodes[n as usize].total;
            *total = total.checked_add_signed(delta).unwrap_or(0);
            n = self.nodes[n as usize].parent;
        }
    }

    fn recompute_total(&mut self, n: Idx) {
        if n == NIL {
            return;
        }
        let node = &self.nodes[n as usize];
        let total = node.ids.len() as u64
            + self.nodes[node.left as usize].total
            + self.nodes[node.right as usize].total;
        self.nodes[n as usize].total = total;
    }

    /// Rotations only reshape the subtrees of the rotated pair, so their
    /// two counts are the only ones refreshed here.
    fn rotate_left(&mut self, x: Idx) {
        let y = self.nodes[x as usize].right;
        let y_left = self.nodes[y as usize].left;
        self.nodes[x as usize].right = y_left;
        if y_left != NIL {
            self.nodes[y_left as usize].parent = x;
        }
        let x_parent = self.nodes[x as usize].parent;
        self.nodes[y as usize].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if self.nodes[x_parent as usize].left == x {
            self.nodes[x_parent as usize].left = y;
        } else {
            self.nodes[x_parent as usize].right = y;
        }
        self.nodes[y as usize].left = x;
        self.nodes[x as usize].parent = y;
        self.recompute_total(x);
        self.recompute_total(y);
    }

    fn rotate_right(&mut self, x: Idx) {
        let y = self.nodes[x as usize].left;
        let y_right = self.nodes[y as usize].right;
        self.nodes[x as usize].left = y_right;
        if y_right != NIL {
            self.nodes[y_right as usize].parent = x;
        }
        let x_parent = self.nodes[x as usize].parent;
        self.nodes[y as usize].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if self.nodes[x_parent as usize].right == x {
            self.nodes[x_parent as usize].right = y;
        } else {
            self.nodes[x_parent as usize].left = y;
        }
        self.nodes[y as usize].right = x;
        self.nodes[x as usize].parent = y;
        self.recompute_total(x);
        self.recompute_total(y);
    }

    fn insert_fixup(&mut self, mut z: Idx) {
        while self.is_red(self.nodes[z as usize].parent) {
            let parent = self.nodes[z as usize].parent;
            let grandparent = self.nodes[parent as usize].parent;
            if parent == self.nodes[grandparent as usize].left {
                let uncle = self.nodes[grandparent as usize].right;
                if self.is_red(uncle) {
                    self.nodes[parent as usize].red = false;
                    self.nodes[uncle as usize].red = false;
                    self.nodes[grandparent as usize].red = true;
                    z = grandparent;
                } else {
                    if z == self.nodes[parent as usize].right {
                        z = parent;
                        self.rotate_left(z);
                    }
                    let parent = self.nodes[z as usize].parent;
                    let grandparent = self.nodes[parent as usize].parent;
                    self.nodes[parent as usize].red = false;
                    self.nodes[grandparent as usize].red = true;
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.nodes[grandparent as usize].left;
                if self.is_red(uncle) {
                    self.nodes[parent as usize].red = false;
                    self.nodes[uncle as usize].red = false;
                    self.nodes[grandparent as usize].red = true;
                    z = grandparent;
                } else {
                    if z == self.nodes[parent as usize].left {
                        z = parent;
                        self.rotate_right(z);
                    }
                    let parent = self.nodes[z as usize].parent;
                    let grandparent = self.nodes[parent as usize].parent;
                    self.nodes[parent as usize].red = false;
                    self.nodes[grandparent as usize].red = true;
                    self.rotate_left(grandparent);
                }
            }
        }
        let root = self.root;
        self.nodes[root as usize].red = false;
    }

    fn is_red(&self, n: Idx) -> bool {
        n != NIL && self.nodes[n as usize].red
    }

    fn transplant(&mut self, old: Idx, new: Idx) {
        let parent = self.nodes[old as usize].parent;
        if parent == NIL {
            self.root = new;
        } else if self.nodes[parent as usize].left == old {
            self.nodes[parent as usize].left = new;
        } else {
            self.nodes[parent as usize].right = new;
        }
        // The sentinel's parent is deliberately written as well; the
        // delete fixup needs to walk up from it.
        self.nodes[new as usize].parent = parent;
    }

    /// Unlinks an empty key node, rebalancing and refreshing subtree
    /// counts along the affected spine.
    fn delete_node(&mut self, z: Idx) {
        debug_assert!(self.nodes[z as usize].ids.is_empty());
        let mut y = z;
        let mut y_was_red = self.nodes[y as usize].red;
        let x;
        if self.nodes[z as usize].left == NIL {
            x = self.nodes[z as usize].right;
            self.transplant(z, x);
        } else if self.nodes[z as usize].right == NIL {
            x = self.nodes[z as usize].left;
            self.transplant(z, x);
        } else {
            y = self.minimum(self.nodes[z as usize].right);
            y_was_red = self.nodes[y as usize].red;
            x = self.nodes[y as usize].right;
            if self.nodes[y as usize].parent == z {
                self.nodes[x as usize].parent = y;
            } else {
                self.transplant(y, x);
                let z_right = self.nodes[z as usize].right;
                self.nodes[y as usize].right = z_right;
                self.nodes[z_right as usize].parent = y;
            }
            self.transplant(z, y);
            let z_left = self.nodes[z as usize].left;
            self.nodes[y as usize].left = z_left;
            self.nodes[z_left as usize].parent = y;
            self.nodes[y as usize].red = self.nodes[z as usize].red;
        }
        let mut n = self.nodes[x as usize].parent;
        while n != NIL {
            self.recompute_total(n);
            n = self.nodes[n as usize].parent;
        }
        if !y_was_red {
            self.delete_fixup(x);
        }
        self.release(z);
    }

    fn delete_fixup(&mut self, mut x: Idx) {
        while x != self.root && !self.is_red(x) {
            let parent = self.nodes[x as usize].parent;
            if x == self.nodes[parent as usize].left {
                let mut sibling = self.nodes[parent as usize].right;
                if self.is_red(sibling) {
                    self.nodes[sibling as usize].red = false;
                    self.nodes[parent as usize].red = true;
                    self.rotate_left(parent);
                    sibling = self.nodes[parent as usize].right;
                }
                let s_left = self.nodes[sibling as usize].left;
                let s_right = self.nodes[sibling as usize].right;
                if !self.is_red(s_left) && !self.is_red(s_right) {
                    self.nodes[sibling as usize].red = true;
                    x = parent;
                } else {
                    if !self.is_red(s_right) {
                        self.nodes[s_left as usize].red = false;
                        self.nodes[sibling as usize].red = true;
                        self.rotate_right(sibling);
                        sibling = self.nodes[parent as usize].right;
                    }
                    self.nodes[sibling as usize].red = self.nodes[parent as usize].red;
                    self.nodes[parent as usize].red = false;
                    let s_right = self.nodes[sibling as usize].right;
                    self.nodes[s_right as usize].red = false;
                    self.rotate_left(parent);
                    x = self.root;
                }
            } else {
                let mut sibling = self.nodes[parent as usize].left;
                if self.is_red(sibling) {
                    self.nodes[sibling as usize].red = false;
                    self.nodes[parent as usize].red = true;
                    self.rotate_right(parent);
                    sibling = self.nodes[parent as usize].left;
                }
                let s_right = self.nodes[sibling as usize].right;
                let s_left = self.nodes[sibling as usize].left;
                if !self.is_red(s_right) && !self.is_red(s_left) {
                    self.nodes[sibling as usize].red = true;
                    x = parent;
                } else {
                    if !self.is_red(s_left) {
                        self.nodes[s_right as usize].red = false;
                        self.nodes[sibling as usize].red = true;
                        self.rotate_left(sibling);
                        sibling = self.nodes[parent as usize].left;
                    }
                    self.nodes[sibling as usize].red = self.nodes[parent as usize].red;
                    self.nodes[parent as usize].red = false;
                    let s_left = self.nodes[sibling as usize].left;
                    self.nodes[s_left as usize].red = false;
                    self.rotate_right(parent);
                    x = self.root;
                }
            }
        }
        self.nodes[x as usize].red = false;
    }

    fn release(&mut self, n: Idx) {
        self.nodes[n as usize] = Node::sentinel();
        self.free.push(n);
        // The sentinel must stay pristine for the next operation.
        self.nodes[NIL as usize].parent = NIL;
        self.nodes[NIL as usize].left = NIL;
        self.nodes[NIL as usize].right = NIL;
        self.nodes[NIL as usize].red = false;
        self.nodes[NIL as usize].total = 0;
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom},
        std::collections::BTreeMap,
    };

    fn id(n: u64) -> B256 {
        B256::from(U256::from(n))
    }

    fn key(n: u64) -> U256 {
        U256::from(n)
    }

    impl ScoreTree {
        /// Walks the whole arena checking red-black and subtree-count
        /// invariants. Test-only.
        fn check_invariants(&self) {
            assert!(!self.nodes[NIL as usize].red, "sentinel must be black");
            assert_eq!(self.nodes[NIL as usize].total, 0);
            if self.root != NIL {
                assert!(!self.nodes[self.root as usize].red, "root must be black");
                self.check_subtree(self.root);
            }
        }

        fn check_subtree(&self, n: Idx) -> usize {
            if n == NIL {
                return 1;
            }
            let node = &self.nodes[n as usize];
            assert!(!node.ids.is_empty(), "no key may hold an empty id set");
            if node.red {
                assert!(!self.is_red(node.left) && !self.is_red(node.right), "red violation");
            }
            if node.left != NIL {
                assert!(self.nodes[node.left as usize].key < node.key);
                assert_eq!(self.nodes[node.left as usize].parent, n);
            }
            if node.right != NIL {
                assert!(self.nodes[node.right as usize].key > node.key);
                assert_eq!(self.nodes[node.right as usize].parent, n);
            }
            assert_eq!(
                node.total,
                node.ids.len() as u64
                    + self.nodes[node.left as usize].total
                    + self.nodes[node.right as usize].total,
                "stale subtree count"
            );
            let left_black = self.check_subtree(node.left);
            let right_black = self.check_subtree(node.right);
            assert_eq!(left_black, right_black, "black height mismatch");
            left_black + usize::from(!node.red)
        }
    }

    #[test]
    fn insert_remove_single_key() {
        let mut tree = ScoreTree::new();
        tree.insert(id(1), key(50)).unwrap();
        assert!(tree.key_exists(key(50)));
        assert_eq!(tree.count_at(key(50)), 1);
        tree.remove(id(1), key(50)).unwrap();
        assert!(!tree.key_exists(key(50)));
        assert!(tree.is_empty());
    }

    #[test]
    fn duplicate_id_at_key_rejected() {
        let mut tree = ScoreTree::new();
        tree.insert(id(1), key(50)).unwrap();
        assert_eq!(tree.insert(id(1), key(50)), Err(Error::DuplicateEntry));
        // The same id may exist under a different key though.
        tree.insert(id(1), key(60)).unwrap();
    }

    #[test]
    fn removing_absent_entry_rejected() {
        let mut tree = ScoreTree::new();
        tree.insert(id(1), key(50)).unwrap();
        assert_eq!(tree.remove(id(2), key(50)), Err(Error::EntryNotFound));
        assert_eq!(tree.remove(id(1), key(51)), Err(Error::EntryNotFound));
    }

    #[test]
    fn ties_served_in_arrival_order() {
        let mut tree = ScoreTree::new();
        tree.insert(id(3), key(80)).unwrap();
        tree.insert(id(1), key(80)).unwrap();
        tree.insert(id(2), key(80)).unwrap();
        let order: Vec<_> = tree.ids_at(key(80)).collect();
        assert_eq!(order, vec![id(3), id(1), id(2)]);
        // Removing from the middle keeps the relative order of the rest.
        tree.remove(id(1), key(80)).unwrap();
        let order: Vec<_> = tree.ids_at(key(80)).collect();
        assert_eq!(order, vec![id(3), id(2)]);
    }

    #[test]
    fn last_id_removal_deletes_the_key() {
        let mut tree = ScoreTree::new();
        tree.insert(id(1), key(80)).unwrap();
        tree.insert(id(2), key(80)).unwrap();
        tree.insert(id(3), key(90)).unwrap();
        tree.remove(id(1), key(80)).unwrap();
        assert!(tree.key_exists(key(80)));
        tree.remove(id(2), key(80)).unwrap();
        assert!(!tree.key_exists(key(80)));
        assert_eq!(tree.first(), Some(key(90)));
        tree.check_invariants();
    }

    #[test]
    fn neighbours_and_bounds() {
        let mut tree = ScoreTree::new();
        for k in [70u64, 80, 90, 100] {
            tree.insert(id(k), key(k)).unwrap();
        }
        assert_eq!(tree.first(), Some(key(70)));
        assert_eq!(tree.last(), Some(key(100)));
        assert_eq!(tree.prev(key(90)), Some(key(80)));
        assert_eq!(tree.next(key(90)), Some(key(100)));
        // Neighbours of absent keys still resolve.
        assert_eq!(tree.prev(key(85)), Some(key(80)));
        assert_eq!(tree.next(key(85)), Some(key(90)));
        assert_eq!(tree.prev(key(70)), None);
        assert_eq!(tree.next(key(100)), None);
    }

    #[test]
    fn rank_and_select_count_ties() {
        let mut tree = ScoreTree::new();
        tree.insert(id(1), key(70)).unwrap();
        tree.insert(id(2), key(80)).unwrap();
        tree.insert(id(3), key(80)).unwrap();
        tree.insert(id(4), key(90)).unwrap();
        assert_eq!(tree.rank(key(70)), 0);
        assert_eq!(tree.rank(key(80)), 1);
        assert_eq!(tree.rank(key(90)), 3);
        assert_eq!(tree.rank(key(91)), 4);
        assert_eq!(tree.select(0), Some(key(70)));
        assert_eq!(tree.select(1), Some(key(80)));
        assert_eq!(tree.select(2), Some(key(80)));
        assert_eq!(tree.select(3), Some(key(90)));
        assert_eq!(tree.select(4), None);
    }

    #[test]
    fn randomized_against_reference_model() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = ScoreTree::new();
        let mut model: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for step in 0..4_000u64 {
            let k = rng.gen_range(0..64);
            let insert = rng.gen_bool(0.6);
            if insert {
                let n = step; // unique id per step
                tree.insert(id(n), key(k)).unwrap();
                model.entry(k).or_default().push(n);
            } else if let Some(ids) = model.get_mut(&k) {
                if !ids.is_empty() {
                    let victim = ids.remove(rng.gen_range(0..ids.len()));
                    tree.remove(id(victim), key(k)).unwrap();
                    if ids.is_empty() {
                        model.remove(&k);
                    }
                }
            }
            if step % 128 == 0 {
                tree.check_invariants();
            }
        }
        tree.check_invariants();
        assert_eq!(tree.len(), model.values().map(|v| v.len() as u64).sum::<u64>());
        assert_eq!(tree.first(), model.keys().next().map(|k| key(*k)));
        assert_eq!(tree.last(), model.keys().next_back().map(|k| key(*k)));
        let mut rank = 0;
        for (k, ids) in &model {
            assert_eq!(tree.rank(key(*k)), rank);
            assert_eq!(tree.count_at(key(*k)), ids.len() as u64);
            let fifo: Vec<_> = tree.ids_at(key(*k)).collect();
            let expected: Vec<_> = ids.iter().map(|n| id(*n)).collect();
            assert_eq!(fifo, expected, "FIFO order diverged at key {k}");
            for _ in ids {
                assert_eq!(tree.select(rank), Some(key(*k)));
                rank += 1;
            }
        }
    }

    #[test]
    fn arena_slots_are_recycled() {
        let mut tree = ScoreTree::new();
        let mut keys: Vec<u64> = (0..256).collect();
        keys.shuffle(&mut StdRng::seed_from_u64(3));
        for &k in &keys {
            tree.insert(id(k), key(k)).unwrap();
        }
        for &k in &keys {
            tree.remove(id(k), key(k)).unwrap();
        }
        let allocated = tree.nodes.len();
        for &k in &keys {
            tree.insert(id(k), key(k)).unwrap();
        }
        assert_eq!(tree.nodes.len(), allocated, "freed slots must be reused");
        tree.check_invariants();
    }
}

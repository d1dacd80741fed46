//! Ordered search tree over Node-table slots.
//!
//! Each live node holds one logical key (a single id for the name
//! indexes, a `(parent, child)` pair for the content and mapping
//! relations) plus lesser/greater child links. Insertion is plain
//! unbalanced BST insertion; removal substitutes the in-order successor.
//! Adequate at the engine's scale, and the five operations below are the
//! only seam a self-balancing variant would have to honor.

use std::cmp::Ordering;

use ufs_types::{Id, NodeSlot};

use crate::store::Store;
use crate::{Error, Result};

/// A node's logical key; `key[1]` is zero in single-id trees.
pub(crate) type Key = [Id; 2];

/// Comparison mode of one tree.
#[derive(Debug, Clone, Copy)]
pub(crate) enum KeyOrder {
    /// Single storage id, ordered by its interned name.
    StorageName,
    /// Single area id, ordered by its interned name.
    AreaName,
    /// `(directory, storage)` pair, ordered by directory id, then by the
    /// storage's interned name.
    DirectoryEntry,
    /// `(area, storage)` pair, ordered numerically.
    Pair,
}

/// What a caller knows about the key it is searching for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Probe<'a> {
    Name(&'a str),
    DirectoryEntry(Id, &'a str),
    Pair(Id, Id),
}

impl KeyOrder {
    fn arity(self) -> u8 {
        match self {
            KeyOrder::StorageName | KeyOrder::AreaName => 1,
            KeyOrder::DirectoryEntry | KeyOrder::Pair => 2,
        }
    }

    fn compare(self, store: &Store, a: Key, b: Key) -> Result<Ordering> {
        Ok(match self {
            KeyOrder::StorageName => store.storage_name(a[0])?.cmp(&store.storage_name(b[0])?),
            KeyOrder::AreaName => store.area_name(a[0])?.cmp(&store.area_name(b[0])?),
            KeyOrder::DirectoryEntry => match a[0].cmp(&b[0]) {
                Ordering::Equal => store.storage_name(a[1])?.cmp(&store.storage_name(b[1])?),
                unequal => unequal,
            },
            KeyOrder::Pair => a[0].cmp(&b[0]).then(a[1].cmp(&b[1])),
        })
    }

    fn compare_probe(self, store: &Store, probe: Probe<'_>, key: Key) -> Result<Ordering> {
        Ok(match (self, probe) {
            (KeyOrder::StorageName, Probe::Name(name)) => {
                let stored = store.storage_name(key[0])?;
                name.cmp(&stored.as_str())
            }
            (KeyOrder::AreaName, Probe::Name(name)) => {
                let stored = store.area_name(key[0])?;
                name.cmp(&stored.as_str())
            }
            (KeyOrder::DirectoryEntry, Probe::DirectoryEntry(parent, name)) => {
                match parent.cmp(&key[0]) {
                    Ordering::Equal => {
                        let stored = store.storage_name(key[1])?;
                        name.cmp(&stored.as_str())
                    }
                    unequal => unequal,
                }
            }
            (KeyOrder::Pair, Probe::Pair(a, b)) => a.cmp(&key[0]).then(b.cmp(&key[1])),
            _ => return Err(Error::BadCall("probe does not match the tree's key order")),
        })
    }
}

/// Inserts `key` into the subtree rooted at `node` (0 for an empty tree),
/// returning the possibly-new root id.
pub(crate) fn insert(store: &mut Store, order: KeyOrder, node: Id, key: Key) -> Result<Id> {
    if node == 0 {
        let id = store.allocate_node()?;
        store.write_node(
            id,
            &NodeSlot {
                owned: true,
                key_count: order.arity(),
                left: 0,
                right: 0,
                keys: key,
            },
        )?;
        return Ok(id);
    }
    let mut slot = store.read_node(node)?;
    match order.compare(store, key, slot.keys)? {
        Ordering::Equal => Err(Error::AlreadyExists),
        Ordering::Less => {
            slot.left = insert(store, order, slot.left, key)?;
            store.write_node(node, &slot)?;
            Ok(node)
        }
        Ordering::Greater => {
            slot.right = insert(store, order, slot.right, key)?;
            store.write_node(node, &slot)?;
            Ok(node)
        }
    }
}

/// Removes `key` from the subtree rooted at `node`, returning the
/// possibly-new root id.
pub(crate) fn remove(store: &mut Store, order: KeyOrder, node: Id, key: Key) -> Result<Id> {
    if node == 0 {
        return Err(Error::DoesNotExist);
    }
    let mut slot = store.read_node(node)?;
    match order.compare(store, key, slot.keys)? {
        Ordering::Less => {
            slot.left = remove(store, order, slot.left, key)?;
            store.write_node(node, &slot)?;
            Ok(node)
        }
        Ordering::Greater => {
            slot.right = remove(store, order, slot.right, key)?;
            store.write_node(node, &slot)?;
            Ok(node)
        }
        Ordering::Equal => {
            if slot.left == 0 {
                let next = slot.right;
                store.free_node(node)?;
                Ok(next)
            } else if slot.right == 0 {
                let next = slot.left;
                store.free_node(node)?;
                Ok(next)
            } else {
                let successor = min_key(store, slot.right)?;
                slot.right = remove(store, order, slot.right, successor)?;
                slot.keys = successor;
                store.write_node(node, &slot)?;
                Ok(node)
            }
        }
    }
}

fn min_key(store: &Store, mut node: Id) -> Result<Key> {
    loop {
        let slot = store.read_node(node)?;
        if slot.left == 0 {
            return Ok(slot.keys);
        }
        node = slot.left;
    }
}

/// Finds the stored key matching `probe`.
pub(crate) fn lookup(
    store: &Store,
    order: KeyOrder,
    mut node: Id,
    probe: Probe<'_>,
) -> Result<Option<Key>> {
    while node != 0 {
        let slot = store.read_node(node)?;
        match order.compare_probe(store, probe, slot.keys)? {
            Ordering::Equal => return Ok(Some(slot.keys)),
            Ordering::Less => node = slot.left,
            Ordering::Greater => node = slot.right,
        }
    }
    Ok(None)
}

/// In-order visit of every key in the subtree.
pub(crate) fn in_order(
    store: &Store,
    node: Id,
    visit: &mut dyn FnMut(Key) -> Result<()>,
) -> Result<()> {
    if node == 0 {
        return Ok(());
    }
    let slot = store.read_node(node)?;
    in_order(store, slot.left, visit)?;
    visit(slot.keys)?;
    in_order(store, slot.right, visit)
}

/// Collects the keys accepted by `filter`, in order.
pub(crate) fn collect(
    store: &Store,
    node: Id,
    filter: impl Fn(Key) -> bool,
) -> Result<Vec<Key>> {
    let mut keys = Vec::new();
    in_order(store, node, &mut |key| {
        if filter(key) {
            keys.push(key);
        }
        Ok(())
    })?;
    Ok(keys)
}

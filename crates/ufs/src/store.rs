//! Typed slot tables, string arena and index anchors over a mapped image.

use std::io::Cursor;

use binrw::{BinReaderExt, BinWriterExt};
use ufs_types::{AreaSlot, Id, NodeSlot, StorageSlot};

use crate::image::Image;
use crate::layout::{Layout, SLOT_SIZES, TableKind};
use crate::{Error, Result};

/// Number of node slots reserved as index anchors.
pub(crate) const RESERVED_NODE_SLOTS: u64 = 4;

/// The reserved anchor slots. Each anchor's `left` field persists the root
/// of one index, so every tree survives a process restart; `key_count` 0
/// distinguishes anchors from live tree nodes.
pub(crate) const ANCHOR_DIRECTORIES: Id = 1;
pub(crate) const ANCHOR_AREAS: Id = 2;
pub(crate) const ANCHOR_CONTENT: Id = 3;
pub(crate) const ANCHOR_MAPPINGS: Id = 4;

const ANCHORS: [Id; RESERVED_NODE_SLOTS as usize] = [
    ANCHOR_DIRECTORIES,
    ANCHOR_AREAS,
    ANCHOR_CONTENT,
    ANCHOR_MAPPINGS,
];

/// Slot tables, arena and anchors over one image.
pub(crate) struct Store {
    image: Image,
    layout: Layout,
    /// Arena bytes already handed out.
    str_used: u64,
}

impl Store {
    /// Wraps a freshly initialized image and reserves the anchor slots.
    pub fn create(image: Image, layout: Layout) -> Result<Store> {
        if layout.capacity(TableKind::Nodes) < RESERVED_NODE_SLOTS {
            return Err(Error::BadCall(
                "node capacity cannot hold the index anchors",
            ));
        }
        let mut store = Store {
            image,
            layout,
            str_used: 0,
        };
        for anchor in ANCHORS {
            let id = store.allocate(TableKind::Nodes)?;
            debug_assert_eq!(id, anchor);
            store.write_node(
                id,
                &NodeSlot {
                    owned: true,
                    key_count: 0,
                    left: 0,
                    right: 0,
                    keys: [0, 0],
                },
            )?;
        }
        Ok(store)
    }

    /// Wraps an opened image: checks the anchors and recovers the arena
    /// cursor from the live slots.
    pub fn open(image: Image, layout: Layout) -> Result<Store> {
        let mut store = Store {
            image,
            layout,
            str_used: 0,
        };
        for anchor in ANCHORS {
            let node = store
                .read_node(anchor)
                .map_err(|_| Error::ImageCorrupted("missing index anchor"))?;
            if node.key_count != 0 {
                return Err(Error::ImageCorrupted("anchor slot repurposed"));
            }
        }
        store.str_used = store.scan_arena_used()?;
        Ok(store)
    }

    pub fn sync(&self) -> Result<()> {
        self.image.sync()
    }

    fn slot_offset(&self, table: TableKind, id: Id) -> Result<u64> {
        if id <= 0 || id as u64 > self.layout.capacity(table) {
            return Err(Error::DoesNotExist);
        }
        Ok(self.layout.table_offset(table) + (id as u64 - 1) * SLOT_SIZES[table as usize])
    }

    fn slot_owned(&self, table: TableKind, id: Id) -> Result<bool> {
        let offset = self.slot_offset(table, id)?;
        Ok(self.image.slice(offset, 1)?[0] != 0)
    }

    /// First-free-slot allocation. The returned slot is marked owned and
    /// must be written by the caller.
    fn allocate(&mut self, table: TableKind) -> Result<Id> {
        let base = self.layout.table_offset(table);
        let stride = SLOT_SIZES[table as usize];
        for index in 0..self.layout.capacity(table) {
            let offset = base + index * stride;
            if self.image.slice(offset, 1)?[0] == 0 {
                self.image.slice_mut(offset, 1)?[0] = 1;
                return Ok((index + 1) as Id);
            }
        }
        Err(Error::OutOfMemory)
    }

    /// Releases a slot. Later reads of the id fail until reallocation.
    fn free(&mut self, table: TableKind, id: Id) -> Result<()> {
        if !self.slot_owned(table, id)? {
            return Err(Error::DoesNotExist);
        }
        let offset = self.slot_offset(table, id)?;
        self.image.slice_mut(offset, 1)?[0] = 0;
        Ok(())
    }

    fn read_record<R>(&self, offset: u64, size: u64) -> Result<R>
    where
        R: for<'a> binrw::BinRead<Args<'a> = ()>,
    {
        let mut cursor = Cursor::new(self.image.slice(offset, size)?);
        Ok(cursor.read_le()?)
    }

    fn write_record<R>(&mut self, offset: u64, size: u64, record: &R) -> Result<()>
    where
        R: for<'a> binrw::BinWrite<Args<'a> = ()>,
    {
        let mut cursor = Cursor::new(self.image.slice_mut(offset, size)?);
        cursor
            .write_le(record)
            .map_err(|_| Error::ImageCorrupted("record does not fit its slot"))
    }

    pub fn allocate_storage(&mut self) -> Result<Id> {
        self.allocate(TableKind::Files)
    }

    pub fn free_storage(&mut self, id: Id) -> Result<()> {
        self.free(TableKind::Files, id)
    }

    pub fn read_storage(&self, id: Id) -> Result<StorageSlot> {
        if !self.slot_owned(TableKind::Files, id)? {
            return Err(Error::DoesNotExist);
        }
        self.read_record(self.slot_offset(TableKind::Files, id)?, StorageSlot::SIZE)
    }

    pub fn write_storage(&mut self, id: Id, slot: &StorageSlot) -> Result<()> {
        if !self.slot_owned(TableKind::Files, id)? {
            return Err(Error::DoesNotExist);
        }
        self.write_record(
            self.slot_offset(TableKind::Files, id)?,
            StorageSlot::SIZE,
            slot,
        )
    }

    pub fn allocate_area(&mut self) -> Result<Id> {
        self.allocate(TableKind::Areas)
    }

    pub fn free_area(&mut self, id: Id) -> Result<()> {
        self.free(TableKind::Areas, id)
    }

    pub fn read_area(&self, id: Id) -> Result<AreaSlot> {
        if !self.slot_owned(TableKind::Areas, id)? {
            return Err(Error::DoesNotExist);
        }
        self.read_record(self.slot_offset(TableKind::Areas, id)?, AreaSlot::SIZE)
    }

    pub fn write_area(&mut self, id: Id, slot: &AreaSlot) -> Result<()> {
        if !self.slot_owned(TableKind::Areas, id)? {
            return Err(Error::DoesNotExist);
        }
        self.write_record(self.slot_offset(TableKind::Areas, id)?, AreaSlot::SIZE, slot)
    }

    pub fn allocate_node(&mut self) -> Result<Id> {
        self.allocate(TableKind::Nodes)
    }

    pub fn free_node(&mut self, id: Id) -> Result<()> {
        self.free(TableKind::Nodes, id)
    }

    pub fn read_node(&self, id: Id) -> Result<NodeSlot> {
        if !self.slot_owned(TableKind::Nodes, id)? {
            return Err(Error::DoesNotExist);
        }
        self.read_record(self.slot_offset(TableKind::Nodes, id)?, NodeSlot::SIZE)
    }

    pub fn write_node(&mut self, id: Id, slot: &NodeSlot) -> Result<()> {
        if !self.slot_owned(TableKind::Nodes, id)? {
            return Err(Error::DoesNotExist);
        }
        self.write_record(self.slot_offset(TableKind::Nodes, id)?, NodeSlot::SIZE, slot)
    }

    /// Root of the index persisted at `anchor`.
    pub fn root(&self, anchor: Id) -> Result<Id> {
        Ok(self.read_node(anchor)?.left)
    }

    pub fn set_root(&mut self, anchor: Id, root: Id) -> Result<()> {
        let mut slot = self.read_node(anchor)?;
        slot.left = root;
        self.write_node(anchor, &slot)
    }

    fn arena_bounds(&self) -> (u64, u64) {
        (
            self.layout.table_offset(TableKind::Strings),
            self.layout.capacity(TableKind::Strings),
        )
    }

    /// Appends `name` and a NUL terminator to the arena, returning the
    /// absolute image offset of its first byte. Strings are not
    /// deduplicated and never reclaimed.
    pub fn intern(&mut self, name: &str) -> Result<u64> {
        let (arena, capacity) = self.arena_bounds();
        let needed = name.len() as u64 + 1;
        if self.str_used + needed > capacity {
            return Err(Error::OutOfMemory);
        }
        let offset = arena + self.str_used;
        let dest = self.image.slice_mut(offset, needed)?;
        dest[..name.len()].copy_from_slice(name.as_bytes());
        dest[name.len()] = 0;
        self.str_used += needed;
        Ok(offset)
    }

    /// Reads the NUL-terminated name starting at `offset`.
    pub fn read_name(&self, offset: u64) -> Result<String> {
        let (arena, capacity) = self.arena_bounds();
        if offset < arena || offset >= arena + capacity {
            return Err(Error::ImageCorrupted("name offset outside the arena"));
        }
        let tail = self.image.slice(offset, arena + capacity - offset)?;
        let len = tail
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(Error::ImageCorrupted("unterminated name"))?;
        String::from_utf8(tail[..len].to_vec())
            .map_err(|_| Error::ImageCorrupted("name is not valid UTF-8"))
    }

    pub fn storage_name(&self, id: Id) -> Result<String> {
        self.read_name(self.read_storage(id)?.name_offset)
    }

    pub fn area_name(&self, id: Id) -> Result<String> {
        self.read_name(self.read_area(id)?.name_offset)
    }

    /// Recovers the arena bump cursor by scanning live slots. Dead strings
    /// below the live high-water mark stay allocated, but nothing live can
    /// be overwritten by later interning.
    fn scan_arena_used(&self) -> Result<u64> {
        let (arena, _) = self.arena_bounds();
        let mut used = 0;
        for index in 0..self.layout.capacity(TableKind::Files) {
            let id = (index + 1) as Id;
            if self.slot_owned(TableKind::Files, id)? {
                let slot = self.read_storage(id)?;
                let name = self.read_name(slot.name_offset)?;
                used = used.max(slot.name_offset + name.len() as u64 + 1 - arena);
            }
        }
        for index in 0..self.layout.capacity(TableKind::Areas) {
            let id = (index + 1) as Id;
            if self.slot_owned(TableKind::Areas, id)? {
                let slot = self.read_area(id)?;
                let name = self.read_name(slot.name_offset)?;
                used = used.max(slot.name_offset + name.len() as u64 + 1 - arena);
            }
        }
        Ok(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{self, SizeRequest};
    use ufs_types::StorageKind;

    fn scratch_store(req: &SizeRequest) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        let image = layout::init_image(&path, req).unwrap();
        let store = Store::create(image, Layout::compute(req).unwrap()).unwrap();
        (dir, store)
    }

    fn small_request() -> SizeRequest {
        SizeRequest {
            num_files: 4,
            num_areas: 2,
            num_nodes: 8,
            num_str_bytes: 32,
        }
    }

    #[test]
    fn test_allocate_returns_sequential_ids() {
        let (_dir, mut store) = scratch_store(&small_request());
        assert_eq!(store.allocate_storage().unwrap(), 1);
        assert_eq!(store.allocate_storage().unwrap(), 2);
        assert_eq!(store.allocate_area().unwrap(), 1);
    }

    #[test]
    fn test_anchors_consume_the_first_node_slots() {
        let (_dir, mut store) = scratch_store(&small_request());
        assert_eq!(store.allocate_node().unwrap(), RESERVED_NODE_SLOTS as Id + 1);
    }

    #[test]
    fn test_free_then_read_fails_and_slot_is_reused() {
        let (_dir, mut store) = scratch_store(&small_request());
        let id = store.allocate_storage().unwrap();
        let name_offset = store.intern("a").unwrap();
        store
            .write_storage(
                id,
                &StorageSlot {
                    owned: true,
                    kind: StorageKind::File,
                    parent: 0,
                    name_offset,
                },
            )
            .unwrap();
        store.free_storage(id).unwrap();
        assert!(matches!(store.read_storage(id), Err(Error::DoesNotExist)));
        assert_eq!(store.allocate_storage().unwrap(), id);
    }

    #[test]
    fn test_full_table_reports_out_of_memory() {
        let (_dir, mut store) = scratch_store(&small_request());
        for _ in 0..2 {
            store.allocate_area().unwrap();
        }
        assert!(matches!(store.allocate_area(), Err(Error::OutOfMemory)));
    }

    #[test]
    fn test_intern_and_read_name() {
        let (_dir, mut store) = scratch_store(&small_request());
        let first = store.intern("alpha").unwrap();
        let second = store.intern("beta").unwrap();
        assert_eq!(second, first + 6);
        assert_eq!(store.read_name(first).unwrap(), "alpha");
        assert_eq!(store.read_name(second).unwrap(), "beta");
    }

    #[test]
    fn test_arena_exhaustion() {
        let (_dir, mut store) = scratch_store(&small_request());
        // 32 arena bytes; each intern below takes 16.
        store.intern("123456789012345").unwrap();
        store.intern("123456789012345").unwrap();
        assert!(matches!(store.intern("x"), Err(Error::OutOfMemory)));
    }

    #[test]
    fn test_read_name_outside_arena() {
        let (_dir, store) = scratch_store(&small_request());
        assert!(matches!(
            store.read_name(0),
            Err(Error::ImageCorrupted(_))
        ));
    }

    #[test]
    fn test_reopen_recovers_arena_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        let req = small_request();
        let first_offset;
        {
            let image = layout::init_image(&path, &req).unwrap();
            let mut store = Store::create(image, Layout::compute(&req).unwrap()).unwrap();
            let id = store.allocate_storage().unwrap();
            first_offset = store.intern("alpha").unwrap();
            store
                .write_storage(
                    id,
                    &StorageSlot {
                        owned: true,
                        kind: StorageKind::Directory,
                        parent: 0,
                        name_offset: first_offset,
                    },
                )
                .unwrap();
            store.sync().unwrap();
        }
        let image = Image::open(&path).unwrap();
        let header = layout::validate(&image).unwrap();
        let total = image.len();
        let mut store = Store::open(image, Layout::from_header(&header, total)).unwrap();
        // The next intern must land after "alpha\0".
        assert_eq!(store.intern("beta").unwrap(), first_offset + 6);
        assert_eq!(store.storage_name(1).unwrap(), "alpha");
    }
}

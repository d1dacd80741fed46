//! The UFS semantic engine: directories, files, areas, mappings and views
//! over the persistent image.
//!
//! Every public operation returns a typed result and, on the way out,
//! records its status into the process-wide status word
//! ([`ufs_types::last_status`]) for external consumers of the legacy
//! single-integer channel.

use std::path::{Path, PathBuf};

use ufs_types::{AreaSlot, BASE, Id, StorageKind, StorageSlot};

use crate::error::record;
use crate::layout::{self, Layout, SizeRequest};
use crate::store::{
    ANCHOR_AREAS, ANCHOR_CONTENT, ANCHOR_DIRECTORIES, ANCHOR_MAPPINGS, RESERVED_NODE_SLOTS, Store,
};
use crate::tree::{self, Key, KeyOrder, Probe};
use crate::view::View;
use crate::{Error, Image, Result};

/// Directory holding the canonical image, relative to the working
/// directory.
pub const UFS_DIR: &str = ".ufs";

/// File name of the canonical image inside [`UFS_DIR`].
pub const IMAGE_FILE: &str = "ufs_index";

/// Reserved name of the BASE pseudo-area.
pub const BASE_AREA_NAME: &str = "BASE";

/// The canonical image path, `.ufs/ufs_index` under the working directory.
pub fn canonical_path() -> PathBuf {
    Path::new(UFS_DIR).join(IMAGE_FILE)
}

/// The union filesystem metadata store.
///
/// A `Ufs` owns one mapped image and implements the union-mount algebra on
/// it: named directories holding named files, named areas projecting
/// storages through set-semantics mappings, and view operations that
/// resolve or enumerate what a reader of the mount point sees. The BASE
/// pseudo-area (id 0) always exists, stands for the external filesystem,
/// and can appear in views but never as the area of an explicit mapping.
///
/// The engine is single-threaded: one process is the sole writer, and a
/// multi-threaded host must serialize all calls behind one lock.
pub struct Ufs {
    store: Store,
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::BadCall("name must not be empty"));
    }
    if name.contains('\0') {
        return Err(Error::BadCall("name must not contain NUL"));
    }
    Ok(())
}

impl Ufs {
    /// Opens the canonical image under `.ufs/`, creating it with default
    /// capacities on first use.
    pub fn init() -> Result<Ufs> {
        record(Self::init_impl())
    }

    fn init_impl() -> Result<Ufs> {
        let path = canonical_path();
        if path.exists() {
            Self::open_impl(&path)
        } else {
            std::fs::create_dir_all(UFS_DIR).map_err(Error::CantCreateFile)?;
            Self::create_impl(&path, &SizeRequest::default())
        }
    }

    /// Creates a new image at `path` sized for `req`.
    pub fn create(path: impl AsRef<Path>, req: &SizeRequest) -> Result<Ufs> {
        record(Self::create_impl(path.as_ref(), req))
    }

    fn create_impl(path: &Path, req: &SizeRequest) -> Result<Ufs> {
        if req.num_nodes < RESERVED_NODE_SLOTS {
            return Err(Error::BadCall(
                "node capacity cannot hold the index anchors",
            ));
        }
        let image = layout::init_image(path, req)?;
        let store = Store::create(image, Layout::compute(req)?)?;
        log::info!("created ufs image at {}", path.display());
        Ok(Ufs { store })
    }

    /// Opens and validates an existing image.
    pub fn open(path: impl AsRef<Path>) -> Result<Ufs> {
        record(Self::open_impl(path.as_ref()))
    }

    fn open_impl(path: &Path) -> Result<Ufs> {
        let image = Image::open(path)?;
        let header = layout::validate(&image)?;
        let total_len = image.len();
        let store = Store::open(image, Layout::from_header(&header, total_len))?;
        log::info!("opened ufs image at {}", path.display());
        Ok(Ufs { store })
    }

    /// Flushes the image to its backing device.
    pub fn sync(&mut self) -> Result<()> {
        record(self.store.sync())
    }

    /// Syncs and tears the handle down.
    pub fn close(self) -> Result<()> {
        record(self.store.sync())
        // Dropping unmaps the image.
    }

    fn storage_checked(&self, id: Id, kind: StorageKind) -> Result<StorageSlot> {
        let slot = self.store.read_storage(id)?;
        if slot.kind != kind {
            return Err(Error::DoesNotExist);
        }
        Ok(slot)
    }

    /// Adds a directory with a globally unique name.
    pub fn add_directory(&mut self, name: &str) -> Result<Id> {
        record(self.add_directory_impl(name))
    }

    fn add_directory_impl(&mut self, name: &str) -> Result<Id> {
        check_name(name)?;
        let root = self.store.root(ANCHOR_DIRECTORIES)?;
        if tree::lookup(&self.store, KeyOrder::StorageName, root, Probe::Name(name))?.is_some() {
            return Err(Error::AlreadyExists);
        }
        let name_offset = self.store.intern(name)?;
        let id = self.store.allocate_storage()?;
        self.store.write_storage(
            id,
            &StorageSlot {
                owned: true,
                kind: StorageKind::Directory,
                parent: 0,
                name_offset,
            },
        )?;
        let new_root = match tree::insert(&mut self.store, KeyOrder::StorageName, root, [id, 0]) {
            Ok(new_root) => new_root,
            Err(e) => {
                self.store.free_storage(id).ok();
                return Err(e);
            }
        };
        self.store.set_root(ANCHOR_DIRECTORIES, new_root)?;
        log::debug!("added directory {name:?} as {id}");
        Ok(id)
    }

    /// Adds a file to a live directory; the pair `(directory, name)` must
    /// be new.
    pub fn add_file(&mut self, directory: Id, name: &str) -> Result<Id> {
        record(self.add_file_impl(directory, name))
    }

    fn add_file_impl(&mut self, directory: Id, name: &str) -> Result<Id> {
        check_name(name)?;
        self.storage_checked(directory, StorageKind::Directory)?;
        let root = self.store.root(ANCHOR_CONTENT)?;
        if tree::lookup(
            &self.store,
            KeyOrder::DirectoryEntry,
            root,
            Probe::DirectoryEntry(directory, name),
        )?
        .is_some()
        {
            return Err(Error::AlreadyExists);
        }
        let name_offset = self.store.intern(name)?;
        let id = self.store.allocate_storage()?;
        self.store.write_storage(
            id,
            &StorageSlot {
                owned: true,
                kind: StorageKind::File,
                parent: directory,
                name_offset,
            },
        )?;
        let new_root =
            match tree::insert(&mut self.store, KeyOrder::DirectoryEntry, root, [directory, id]) {
                Ok(new_root) => new_root,
                Err(e) => {
                    self.store.free_storage(id).ok();
                    return Err(e);
                }
            };
        self.store.set_root(ANCHOR_CONTENT, new_root)?;
        log::debug!("added file {name:?} as {id} under directory {directory}");
        Ok(id)
    }

    /// Adds an area with a globally unique name. The BASE name is taken
    /// from the start.
    pub fn add_area(&mut self, name: &str) -> Result<Id> {
        record(self.add_area_impl(name))
    }

    fn add_area_impl(&mut self, name: &str) -> Result<Id> {
        check_name(name)?;
        if name == BASE_AREA_NAME {
            return Err(Error::AlreadyExists);
        }
        let root = self.store.root(ANCHOR_AREAS)?;
        if tree::lookup(&self.store, KeyOrder::AreaName, root, Probe::Name(name))?.is_some() {
            return Err(Error::AlreadyExists);
        }
        let name_offset = self.store.intern(name)?;
        let id = self.store.allocate_area()?;
        self.store.write_area(
            id,
            &AreaSlot {
                owned: true,
                name_offset,
            },
        )?;
        let new_root = match tree::insert(&mut self.store, KeyOrder::AreaName, root, [id, 0]) {
            Ok(new_root) => new_root,
            Err(e) => {
                self.store.free_area(id).ok();
                return Err(e);
            }
        };
        self.store.set_root(ANCHOR_AREAS, new_root)?;
        log::debug!("added area {name:?} as {id}");
        Ok(id)
    }

    /// Looks a directory up by name.
    pub fn get_directory(&self, name: &str) -> Result<Id> {
        record(self.get_directory_impl(name))
    }

    fn get_directory_impl(&self, name: &str) -> Result<Id> {
        check_name(name)?;
        let root = self.store.root(ANCHOR_DIRECTORIES)?;
        match tree::lookup(&self.store, KeyOrder::StorageName, root, Probe::Name(name))? {
            Some(key) => Ok(key[0]),
            None => Err(Error::DoesNotExist),
        }
    }

    /// Looks a file up by its directory and name.
    pub fn get_file(&self, directory: Id, name: &str) -> Result<Id> {
        record(self.get_file_impl(directory, name))
    }

    fn get_file_impl(&self, directory: Id, name: &str) -> Result<Id> {
        check_name(name)?;
        self.storage_checked(directory, StorageKind::Directory)?;
        let root = self.store.root(ANCHOR_CONTENT)?;
        match tree::lookup(
            &self.store,
            KeyOrder::DirectoryEntry,
            root,
            Probe::DirectoryEntry(directory, name),
        )? {
            Some(key) => Ok(key[1]),
            None => Err(Error::DoesNotExist),
        }
    }

    /// Looks an area up by name. The BASE name resolves to id 0.
    pub fn get_area(&self, name: &str) -> Result<Id> {
        record(self.get_area_impl(name))
    }

    fn get_area_impl(&self, name: &str) -> Result<Id> {
        check_name(name)?;
        if name == BASE_AREA_NAME {
            return Ok(BASE);
        }
        let root = self.store.root(ANCHOR_AREAS)?;
        match tree::lookup(&self.store, KeyOrder::AreaName, root, Probe::Name(name))? {
            Some(key) => Ok(key[0]),
            None => Err(Error::DoesNotExist),
        }
    }

    /// Removes an empty directory.
    pub fn remove_directory(&mut self, id: Id) -> Result<()> {
        record(self.remove_directory_impl(id))
    }

    fn remove_directory_impl(&mut self, id: Id) -> Result<()> {
        self.storage_checked(id, StorageKind::Directory)?;
        let content_root = self.store.root(ANCHOR_CONTENT)?;
        let mut occupied = false;
        tree::in_order(&self.store, content_root, &mut |key| {
            if key[0] == id {
                occupied = true;
            }
            Ok(())
        })?;
        if occupied {
            return Err(Error::DirectoryIsNotEmpty);
        }
        // Index removal compares by the directory's name, so it must come
        // before the slot is freed.
        let root = self.store.root(ANCHOR_DIRECTORIES)?;
        let new_root = tree::remove(&mut self.store, KeyOrder::StorageName, root, [id, 0])?;
        self.store.set_root(ANCHOR_DIRECTORIES, new_root)?;
        self.remove_mappings_matching(|key| key[1] == id)?;
        self.store.free_storage(id)?;
        log::debug!("removed directory {id}");
        Ok(())
    }

    /// Removes a file: out of its directory and out of every mapping it
    /// participates in.
    pub fn remove_file(&mut self, id: Id) -> Result<()> {
        record(self.remove_file_impl(id))
    }

    fn remove_file_impl(&mut self, id: Id) -> Result<()> {
        let slot = self.storage_checked(id, StorageKind::File)?;
        let root = self.store.root(ANCHOR_CONTENT)?;
        let new_root =
            tree::remove(&mut self.store, KeyOrder::DirectoryEntry, root, [slot.parent, id])?;
        self.store.set_root(ANCHOR_CONTENT, new_root)?;
        self.remove_mappings_matching(|key| key[1] == id)?;
        self.store.free_storage(id)?;
        log::debug!("removed file {id}");
        Ok(())
    }

    /// Removes an area and every mapping it participates in. BASE cannot
    /// be removed.
    pub fn remove_area(&mut self, id: Id) -> Result<()> {
        record(self.remove_area_impl(id))
    }

    fn remove_area_impl(&mut self, id: Id) -> Result<()> {
        if id == BASE {
            return Err(Error::BadCall("BASE cannot be removed"));
        }
        self.store.read_area(id)?;
        self.remove_mappings_matching(|key| key[0] == id)?;
        let root = self.store.root(ANCHOR_AREAS)?;
        let new_root = tree::remove(&mut self.store, KeyOrder::AreaName, root, [id, 0])?;
        self.store.set_root(ANCHOR_AREAS, new_root)?;
        self.store.free_area(id)?;
        log::debug!("removed area {id}");
        Ok(())
    }

    /// Removes every mapping pair accepted by `filter`.
    fn remove_mappings_matching(&mut self, filter: impl Fn(Key) -> bool) -> Result<()> {
        let mut root = self.store.root(ANCHOR_MAPPINGS)?;
        let doomed = tree::collect(&self.store, root, filter)?;
        for key in doomed {
            root = tree::remove(&mut self.store, KeyOrder::Pair, root, key)?;
        }
        self.store.set_root(ANCHOR_MAPPINGS, root)
    }

    /// Records that `area` projects `storage`. Mappings form a set: adding
    /// a present pair fails with [`Error::AlreadyExists`].
    pub fn add_mapping(&mut self, area: Id, storage: Id) -> Result<()> {
        record(self.add_mapping_impl(area, storage))
    }

    fn add_mapping_impl(&mut self, area: Id, storage: Id) -> Result<()> {
        if area == BASE {
            return Err(Error::BadCall("BASE cannot be the area of a mapping"));
        }
        if area < 0 || storage <= 0 {
            return Err(Error::BadCall("mapping ids must be positive"));
        }
        self.store.read_area(area)?;
        self.store.read_storage(storage)?;
        let root = self.store.root(ANCHOR_MAPPINGS)?;
        let new_root = tree::insert(&mut self.store, KeyOrder::Pair, root, [area, storage])?;
        self.store.set_root(ANCHOR_MAPPINGS, new_root)?;
        log::debug!("mapped storage {storage} into area {area}");
        Ok(())
    }

    /// Membership test for an explicit mapping: `Ok` when present,
    /// [`Error::DoesNotExist`] otherwise.
    pub fn probe_mapping(&self, area: Id, storage: Id) -> Result<()> {
        record(self.probe_mapping_impl(area, storage))
    }

    fn probe_mapping_impl(&self, area: Id, storage: Id) -> Result<()> {
        let root = self.store.root(ANCHOR_MAPPINGS)?;
        match tree::lookup(&self.store, KeyOrder::Pair, root, Probe::Pair(area, storage))? {
            Some(_) => Ok(()),
            None => Err(Error::DoesNotExist),
        }
    }

    /// Resolves which view entry projects `storage`.
    ///
    /// The view is walked in order; BASE shadows everything behind it and
    /// wins immediately, otherwise the first area whose mapping set
    /// contains `storage` wins. A storage no entry projects, not even
    /// implicitly through a BASE entry, fails with
    /// [`Error::CannotResolveStorage`].
    pub fn resolve_storage_in_view(&self, view: &[Id], storage: Id) -> Result<Id> {
        record(self.resolve_impl(view, storage))
    }

    fn resolve_impl(&self, raw: &[Id], storage: Id) -> Result<Id> {
        let view = View::parse(&self.store, raw)?;
        if storage <= 0 {
            return Err(Error::BadCall("storage id must be positive"));
        }
        self.store.read_storage(storage)?;
        self.resolve_in(&view, storage)
    }

    fn resolve_in(&self, view: &View, storage: Id) -> Result<Id> {
        let root = self.store.root(ANCHOR_MAPPINGS)?;
        for &area in view.entries() {
            if area == BASE {
                // The external filesystem is authoritative from here on.
                return Ok(BASE);
            }
            if tree::lookup(&self.store, KeyOrder::Pair, root, Probe::Pair(area, storage))?
                .is_some()
            {
                return Ok(area);
            }
        }
        Err(Error::CannotResolveStorage)
    }

    /// Visits every storage of `directory` that some view entry projects,
    /// as `visit(storage, cursor, total)`. A non-`Ok` return halts the
    /// iteration and propagates. Entries are distinct by name because the
    /// directory's namespace is; visiting order is unspecified.
    pub fn iterate_dir_in_view<F>(&self, view: &[Id], directory: Id, mut visit: F) -> Result<()>
    where
        F: FnMut(Id, usize, usize) -> Result<()>,
    {
        record(self.iterate_impl(view, directory, &mut visit))
    }

    fn iterate_impl(
        &self,
        raw: &[Id],
        directory: Id,
        visit: &mut dyn FnMut(Id, usize, usize) -> Result<()>,
    ) -> Result<()> {
        let view = View::parse(&self.store, raw)?;
        self.storage_checked(directory, StorageKind::Directory)?;
        let content_root = self.store.root(ANCHOR_CONTENT)?;
        let children = tree::collect(&self.store, content_root, |key| key[0] == directory)?;
        let mut visible = Vec::new();
        for key in children {
            match self.resolve_in(&view, key[1]) {
                Ok(_) => visible.push(key[1]),
                Err(Error::CannotResolveStorage) => {}
                Err(other) => return Err(other),
            }
        }
        let total = visible.len();
        for (cursor, &storage) in visible.iter().enumerate() {
            visit(storage, cursor, total)?;
        }
        Ok(())
    }

    /// Folds every mapping of the view's earlier areas into its last
    /// entry, then syncs. Folding into BASE drops the explicit mappings:
    /// those storages become implicitly projected through the external
    /// filesystem.
    pub fn collapse(&mut self, view: &[Id]) -> Result<()> {
        record(self.collapse_impl(view))
    }

    fn collapse_impl(&mut self, raw: &[Id]) -> Result<()> {
        let view = View::parse(&self.store, raw)?;
        let (&last, earlier) = view
            .entries()
            .split_last()
            .ok_or(Error::BadCall("view must not be empty"))?;
        for &area in earlier {
            if area == BASE {
                // BASE never holds explicit mappings; nothing to fold.
                continue;
            }
            let mut root = self.store.root(ANCHOR_MAPPINGS)?;
            let moved = tree::collect(&self.store, root, |key| key[0] == area)?;
            for key in moved {
                let storage = key[1];
                if last != BASE
                    && tree::lookup(&self.store, KeyOrder::Pair, root, Probe::Pair(last, storage))?
                        .is_none()
                {
                    root = tree::insert(&mut self.store, KeyOrder::Pair, root, [last, storage])?;
                }
                root = tree::remove(&mut self.store, KeyOrder::Pair, root, [area, storage])?;
            }
            self.store.set_root(ANCHOR_MAPPINGS, root)?;
        }
        log::debug!("collapsed view into area {last}");
        self.store.sync()
    }
}

impl Drop for Ufs {
    fn drop(&mut self) {
        if let Err(e) = self.store.sync() {
            log::warn!("failed to sync image on drop: {e}");
        }
    }
}

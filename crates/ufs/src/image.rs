//! File-backed, memory-mapped image container.
//!
//! The image knows nothing about tables or headers: it is a sized byte
//! region backed by a file, whose first eight bytes record the region's
//! own length. Durability is explicit: after [`Image::sync`] returns,
//! everything written before the call is on the backing device; between
//! syncs, crash behavior is undefined.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;

use memmap2::MmapMut;

use crate::{Error, Result};

/// Byte length of the length prelude at offset 0.
pub const LEN_PRELUDE: u64 = 8;

/// Rounds `value` up to the next multiple of `align` (a power of two).
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// The system page size; image lengths are padded to a multiple of it.
pub(crate) fn page_size() -> u64 {
    // SAFETY: sysconf with a valid name reads a static configuration value.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as u64 }
}

/// A shared read-write mapping of a backing file.
///
/// The mapping is unmapped when the handle drops; unmapping never fails,
/// so teardown needs no explicit call. A single process is the sole
/// writer; concurrent processes mapping the same image are not supported.
pub struct Image {
    map: MmapMut,
}

impl Image {
    /// Creates the backing file at `path`, sized to exactly `size` bytes,
    /// maps it and records `size` in the length prelude.
    ///
    /// Refuses an existing path and a `size` below the prelude with
    /// [`Error::BadCall`]. Creation the environment forbids (permissions,
    /// missing parent directory) reports [`Error::CantCreateFile`].
    pub fn create(path: impl AsRef<Path>, size: u64) -> Result<Image> {
        let path = path.as_ref();
        if size < LEN_PRELUDE {
            return Err(Error::BadCall("image size must cover the length prelude"));
        }
        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(path).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => Error::BadCall("image path already exists"),
            ErrorKind::PermissionDenied | ErrorKind::NotFound => Error::CantCreateFile(e),
            _ => Error::Unknown(e),
        })?;
        file.set_len(size).map_err(Error::Unknown)?;
        // SAFETY: the file was just created by this process and nothing
        // else holds it; the mapping outlives no borrow of it.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(Error::Unknown)?;
        let mut image = Image { map };
        image.write_u64(0, size)?;
        log::debug!("created image {} ({size} bytes)", path.display());
        Ok(image)
    }

    /// Opens and maps an existing image.
    ///
    /// The length prelude is rewritten with the observed on-disk length,
    /// so the in-memory length word always reflects the true mapped size.
    pub fn open(path: impl AsRef<Path>) -> Result<Image> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Error::DoesNotExist
                } else {
                    Error::Unknown(e)
                }
            })?;
        let on_disk = file.metadata().map_err(Error::Unknown)?.len();
        if on_disk < LEN_PRELUDE {
            return Err(Error::ImageTooSmall);
        }
        // SAFETY: as in `create`; the mapping is backed by a regular file.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(Error::Unknown)?;
        let mut image = Image { map };
        image.write_u64(0, on_disk)?;
        log::debug!("opened image {} ({on_disk} bytes)", path.display());
        Ok(image)
    }

    /// Length in bytes, as recorded in the prelude.
    pub fn len(&self) -> u64 {
        // The constructors guarantee at least LEN_PRELUDE mapped bytes.
        u64::from_le_bytes(self.map[..8].try_into().unwrap())
    }

    /// Whole mapped range, read-only.
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Whole mapped range, writable.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    pub(crate) fn slice(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .ok_or(Error::ImageCorrupted("byte range overflows"))?;
        if end > self.map.len() as u64 {
            return Err(Error::ImageCorrupted("byte range outside the image"));
        }
        Ok(&self.map[offset as usize..end as usize])
    }

    pub(crate) fn slice_mut(&mut self, offset: u64, len: u64) -> Result<&mut [u8]> {
        let end = offset
            .checked_add(len)
            .ok_or(Error::ImageCorrupted("byte range overflows"))?;
        if end > self.map.len() as u64 {
            return Err(Error::ImageCorrupted("byte range outside the image"));
        }
        Ok(&mut self.map[offset as usize..end as usize])
    }

    pub(crate) fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.slice_mut(offset, 8)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Issues a synchronous flush of the entire mapped range.
    pub fn sync(&self) -> Result<()> {
        self.map.flush().map_err(Error::CouldNotSync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        (dir, path)
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(4097, 4096), 8192);
    }

    #[test]
    fn test_create_writes_length_prelude() {
        let (_dir, path) = scratch("img");
        let image = Image::create(&path, 128).unwrap();
        assert_eq!(image.len(), 128);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 128);
        assert_eq!(&image.bytes()[..8], 128u64.to_le_bytes().as_slice());
    }

    #[test]
    fn test_create_rejects_tiny_size() {
        let (_dir, path) = scratch("img");
        assert!(matches!(Image::create(&path, 7), Err(Error::BadCall(_))));
    }

    #[test]
    fn test_create_rejects_existing_path() {
        let (_dir, path) = scratch("img");
        std::fs::write(&path, b"taken").unwrap();
        assert!(matches!(Image::create(&path, 64), Err(Error::BadCall(_))));
    }

    #[test]
    fn test_create_without_parent_cannot_create() {
        let (_dir, path) = scratch("missing/img");
        assert!(matches!(
            Image::create(&path, 64),
            Err(Error::CantCreateFile(_))
        ));
    }

    #[test]
    fn test_open_missing_path() {
        let (_dir, path) = scratch("nope");
        assert!(matches!(Image::open(&path), Err(Error::DoesNotExist)));
    }

    #[test]
    fn test_open_too_small() {
        let (_dir, path) = scratch("img");
        std::fs::write(&path, b"abc").unwrap();
        assert!(matches!(Image::open(&path), Err(Error::ImageTooSmall)));
    }

    #[test]
    fn test_open_records_observed_length() {
        let (_dir, path) = scratch("img");
        // A prelude that lies about the file length.
        let mut bytes = vec![0u8; 64];
        bytes[..8].copy_from_slice(&9999u64.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        let image = Image::open(&path).unwrap();
        assert_eq!(image.len(), 64);
    }

    #[test]
    fn test_sync_makes_writes_visible_on_disk() {
        let (_dir, path) = scratch("img");
        let mut image = Image::create(&path, 128).unwrap();
        image.bytes_mut()[9..20].copy_from_slice(b"hello world");
        image.sync().unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(&on_disk[9..20], b"hello world");
        assert_eq!(on_disk, image.bytes());
    }

    #[test]
    fn test_slice_bounds() {
        let (_dir, path) = scratch("img");
        let image = Image::create(&path, 64).unwrap();
        assert!(image.slice(0, 64).is_ok());
        assert!(matches!(
            image.slice(60, 5),
            Err(Error::ImageCorrupted(_))
        ));
        assert!(matches!(
            image.slice(u64::MAX, 2),
            Err(Error::ImageCorrupted(_))
        ));
    }
}

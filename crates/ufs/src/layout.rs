//! Image layout: the fixed header and the placement of the four tables.
//!
//! A single computation decides every byte offset, so image creation,
//! open-time validation and any external tooling agree on exactly where
//! each table lives.

use std::io::Cursor;
use std::path::Path;

use binrw::{BinReaderExt, BinWriterExt};
use ufs_types::{
    AreaSlot, ImageHeader, NodeSlot, StorageSlot, TABLE_COUNT, UFS_INDEX_VERSION,
};

use crate::image::{Image, LEN_PRELUDE, align_up, page_size};
use crate::{Error, Result};

/// Table indexes within the header's `sizes[]` / `offsets[]` arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableKind {
    Files = 0,
    Areas = 1,
    Nodes = 2,
    Strings = 3,
}

/// Per-table slot strides, in table order. Strings are a raw byte arena.
pub(crate) const SLOT_SIZES: [u64; TABLE_COUNT] =
    [StorageSlot::SIZE, AreaSlot::SIZE, NodeSlot::SIZE, 1];

const SLOT_ALIGN: u64 = 8;

/// Requested capacities for a new image, all strictly positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeRequest {
    pub num_files: u64,
    pub num_areas: u64,
    pub num_nodes: u64,
    pub num_str_bytes: u64,
}

impl Default for SizeRequest {
    /// The capacities used for the canonical image, see
    /// [`Ufs::init`][crate::Ufs::init].
    fn default() -> Self {
        SizeRequest {
            num_files: 1024,
            num_areas: 128,
            num_nodes: 4096,
            num_str_bytes: 64 * 1024,
        }
    }
}

/// Byte placement of the header and tables within an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    pub sizes: [u64; TABLE_COUNT],
    pub offsets: [u64; TABLE_COUNT],
    pub total_len: u64,
}

impl Layout {
    /// Computes the layout for the requested capacities: the length
    /// prelude, the aligned header, then each table at its own alignment,
    /// with the total padded to the page size.
    pub(crate) fn compute(req: &SizeRequest) -> Result<Layout> {
        let sizes = [
            req.num_files,
            req.num_areas,
            req.num_nodes,
            req.num_str_bytes,
        ];
        if sizes.iter().any(|&size| size == 0) {
            return Err(Error::BadCall("size request fields must be positive"));
        }
        let mut cursor = align_up(LEN_PRELUDE, ImageHeader::ALIGN) + ImageHeader::SIZE;
        let mut offsets = [0u64; TABLE_COUNT];
        for (table, offset) in offsets.iter_mut().enumerate() {
            cursor = align_up(cursor, SLOT_ALIGN);
            *offset = cursor;
            let extent = SLOT_SIZES[table]
                .checked_mul(sizes[table])
                .ok_or(Error::BadCall("size request overflows"))?;
            cursor = cursor
                .checked_add(extent)
                .ok_or(Error::BadCall("size request overflows"))?;
        }
        Ok(Layout {
            sizes,
            offsets,
            total_len: align_up(cursor, page_size()),
        })
    }

    /// Reconstructs the layout of an already-validated image.
    pub(crate) fn from_header(header: &ImageHeader, total_len: u64) -> Layout {
        Layout {
            sizes: header.sizes,
            offsets: header.offsets,
            total_len,
        }
    }

    pub(crate) fn capacity(&self, table: TableKind) -> u64 {
        self.sizes[table as usize]
    }

    pub(crate) fn table_offset(&self, table: TableKind) -> u64 {
        self.offsets[table as usize]
    }
}

/// Creates a fresh image at `path` sized for `req` and writes its header.
///
/// Returns the image if and only if [`validate`] accepts what was written.
pub fn init_image(path: impl AsRef<Path>, req: &SizeRequest) -> Result<Image> {
    let layout = Layout::compute(req)?;
    let mut image = Image::create(path, layout.total_len)?;
    let header = ImageHeader {
        version: UFS_INDEX_VERSION,
        sizes: layout.sizes,
        offsets: layout.offsets,
    };
    write_header(&mut image, &header)?;
    validate(&image)?;
    Ok(image)
}

/// Parses and checks the header: magic, version, and that every declared
/// table extent lies inside the mapped range.
pub fn validate(image: &Image) -> Result<ImageHeader> {
    let header = read_header(image)?;
    if header.version != UFS_INDEX_VERSION {
        return Err(Error::VersionMismatch {
            found: header.version,
            expected: UFS_INDEX_VERSION,
        });
    }
    for table in 0..TABLE_COUNT {
        let end = SLOT_SIZES[table]
            .checked_mul(header.sizes[table])
            .and_then(|extent| header.offsets[table].checked_add(extent))
            .ok_or(Error::ImageCorrupted("table extent overflows"))?;
        if end > image.len() {
            return Err(Error::ImageCorrupted("table extends past the image end"));
        }
    }
    Ok(header)
}

pub(crate) fn header_offset() -> u64 {
    align_up(LEN_PRELUDE, ImageHeader::ALIGN)
}

pub(crate) fn read_header(image: &Image) -> Result<ImageHeader> {
    let bytes = image.slice(header_offset(), ImageHeader::SIZE)?;
    let mut cursor = Cursor::new(bytes);
    cursor
        .read_le()
        .map_err(|_| Error::ImageCorrupted("header magic mismatch"))
}

pub(crate) fn write_header(image: &mut Image, header: &ImageHeader) -> Result<()> {
    let bytes = image.slice_mut(header_offset(), ImageHeader::SIZE)?;
    let mut cursor = Cursor::new(bytes);
    cursor
        .write_le(header)
        .map_err(|_| Error::ImageCorrupted("header does not fit its slot"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_request() -> SizeRequest {
        SizeRequest {
            num_files: 1,
            num_areas: 1,
            num_nodes: 1,
            num_str_bytes: 64,
        }
    }

    #[test]
    fn test_compute_places_tables_in_order() {
        let layout = Layout::compute(&SizeRequest::default()).unwrap();
        assert_eq!(layout.offsets[0], header_offset() + ImageHeader::SIZE);
        for table in 1..TABLE_COUNT {
            let prev_end =
                layout.offsets[table - 1] + SLOT_SIZES[table - 1] * layout.sizes[table - 1];
            assert!(layout.offsets[table] >= prev_end);
            assert_eq!(layout.offsets[table] % SLOT_ALIGN, 0);
        }
        assert_eq!(layout.total_len % page_size(), 0);
    }

    #[test]
    fn test_compute_rejects_zero_fields() {
        let mut req = small_request();
        req.num_nodes = 0;
        assert!(matches!(
            Layout::compute(&req),
            Err(Error::BadCall(_))
        ));
    }

    #[test]
    fn test_init_then_validate_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        let req = small_request();
        let image = init_image(&path, &req).unwrap();
        let header = validate(&image).unwrap();
        assert_eq!(header.version, UFS_INDEX_VERSION);
        assert_eq!(header.sizes, [1, 1, 1, 64]);
        drop(image);

        let reopened = Image::open(&path).unwrap();
        let header = validate(&reopened).unwrap();
        assert_eq!(header.sizes, [1, 1, 1, 64]);
        assert_eq!(std::fs::metadata(&path).unwrap().len() % page_size(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        let mut image = init_image(&path, &small_request()).unwrap();
        image.bytes_mut()[header_offset() as usize] ^= 0xff;
        assert!(matches!(
            validate(&image),
            Err(Error::ImageCorrupted("header magic mismatch"))
        ));
    }

    #[test]
    fn test_validate_rejects_version_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        let mut image = init_image(&path, &small_request()).unwrap();
        let mut header = read_header(&image).unwrap();
        header.version = 0;
        write_header(&mut image, &header).unwrap();
        assert!(matches!(
            validate(&image),
            Err(Error::VersionMismatch {
                found: 0,
                expected: UFS_INDEX_VERSION
            })
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        let mut image = init_image(&path, &small_request()).unwrap();
        let mut header = read_header(&image).unwrap();
        header.sizes[2] = u64::MAX / NodeSlot::SIZE;
        write_header(&mut image, &header).unwrap();
        assert!(matches!(validate(&image), Err(Error::ImageCorrupted(_))));
    }
}

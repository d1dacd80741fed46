//! On-image record structures.
//!
//! All records are little-endian with explicit padding, so an image written
//! on one host either reads identically on another or fails validation;
//! nothing here depends on host struct layout.
//!
//! Image layout:
//!
//! ```text
//! ╭──────────────────────┬──────────────────────────────────────────────╮
//! │ Offset               │ Contents                                     │
//! ├──────────────────────┼──────────────────────────────────────────────┤
//! │ 0                    │ u64 total image length in bytes              │
//! │ 8                    │ ImageHeader (magic, version, sizes, offsets) │
//! │ offsets[0]           │ File table: sizes[0] × StorageSlot           │
//! │ offsets[1]           │ Area table: sizes[1] × AreaSlot              │
//! │ offsets[2]           │ Node table: sizes[2] × NodeSlot              │
//! │ offsets[3]           │ String arena: sizes[3] raw bytes             │
//! │ padded to page size  │ -                                            │
//! ╰──────────────────────┴──────────────────────────────────────────────╯
//! ```

use binrw::prelude::*;

use crate::Id;

/// Magic bytes opening the image header (`0x00736675` as a little-endian
/// u32).
pub const UFS_MAGIC: [u8; 4] = *b"ufs\0";

/// Current image format version.
pub const UFS_INDEX_VERSION: u32 = 1;

/// Number of typed tables in the image, in fixed order: files, areas,
/// nodes, strings.
pub const TABLE_COUNT: usize = 4;

/// Fixed image header, written once at image-initialization time.
///
/// `sizes[t]` is the slot capacity of table `t` (byte capacity for the
/// string arena); `offsets[t]` is the absolute byte offset at which table
/// `t` begins. Recording the offsets in the image itself lets readers with
/// a newer layout still locate the tables of older images if version
/// compatibility is ever extended.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(magic(b"ufs\0"), little)]
pub struct ImageHeader {
    /// Image format version; see [`UFS_INDEX_VERSION`].
    pub version: u32,
    /// Slot capacity of each table.
    pub sizes: [u64; TABLE_COUNT],
    /// Absolute byte offset of each table.
    pub offsets: [u64; TABLE_COUNT],
}

impl ImageHeader {
    /// Serialized size in bytes, magic included.
    pub const SIZE: u64 = 72;
    /// Alignment of the header within the image.
    pub const ALIGN: u64 = 8;
}

/// Discriminant separating plain files from directories in the File table.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(repr(u8))]
pub enum StorageKind {
    /// A leaf storage element attached to exactly one directory.
    File = 1,
    /// A directory; owns files, has no parent.
    Directory = 2,
}

/// A File-table slot: a named storage element, either a file or a
/// directory.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct StorageSlot {
    /// Ownership byte; any non-zero value on disk reads as live.
    #[br(map = |byte: u8| byte != 0)]
    #[bw(map = |owned: &bool| u8::from(*owned))]
    pub owned: bool,
    pub kind: StorageKind,
    /// Id of the owning directory; 0 for directories themselves.
    #[brw(pad_before = 6)]
    pub parent: Id,
    /// Arena offset of the NUL-terminated name.
    pub name_offset: u64,
}

impl StorageSlot {
    pub const SIZE: u64 = 24;
}

/// An Area-table slot: a named projection namespace.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct AreaSlot {
    /// Ownership byte; any non-zero value on disk reads as live.
    #[br(map = |byte: u8| byte != 0)]
    #[bw(map = |owned: &bool| u8::from(*owned))]
    pub owned: bool,
    /// Arena offset of the NUL-terminated name.
    #[brw(pad_before = 7)]
    pub name_offset: u64,
}

impl AreaSlot {
    pub const SIZE: u64 = 16;
}

/// A Node-table slot: one cell of the embedded search tree.
///
/// `keys[..key_count]` is the node's logical key: a single id for the
/// name indexes, a `(parent, child)` pair for the content and mapping
/// relations. `key_count` 0 marks a reserved anchor slot.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct NodeSlot {
    /// Ownership byte; any non-zero value on disk reads as live.
    #[br(map = |byte: u8| byte != 0)]
    #[bw(map = |owned: &bool| u8::from(*owned))]
    pub owned: bool,
    pub key_count: u8,
    /// Node id of the lesser subtree; 0 when absent.
    #[brw(pad_before = 6)]
    pub left: Id,
    /// Node id of the greater subtree; 0 when absent.
    pub right: Id,
    pub keys: [Id; 2],
}

impl NodeSlot {
    pub const SIZE: u64 = 40;
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::BinWriterExt;
    use ufs_tests::*;

    #[test]
    fn test_magic_matches_u32_constant() {
        assert_eq!(u32::from_le_bytes(UFS_MAGIC), 0x0073_6675);
    }

    // Any non-zero ownership byte reads as live.
    #[test]
    fn test_non_zero_owned_byte_reads_true() {
        use binrw::BinReaderExt;
        let mut cursor =
            std::io::Cursor::new(hex_to_bytes("17000000000000002001000000000000"));
        let parsed: AreaSlot = cursor.read_le().unwrap();
        assert!(parsed.owned);
    }

    #[test]
    fn test_serialized_sizes_match_constants() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        cursor
            .write_le(&ImageHeader {
                version: UFS_INDEX_VERSION,
                sizes: [0; TABLE_COUNT],
                offsets: [0; TABLE_COUNT],
            })
            .unwrap();
        assert_eq!(cursor.get_ref().len() as u64, ImageHeader::SIZE);

        let mut cursor = std::io::Cursor::new(Vec::new());
        cursor
            .write_le(&StorageSlot {
                owned: true,
                kind: StorageKind::File,
                parent: 1,
                name_offset: 0,
            })
            .unwrap();
        assert_eq!(cursor.get_ref().len() as u64, StorageSlot::SIZE);

        let mut cursor = std::io::Cursor::new(Vec::new());
        cursor
            .write_le(&AreaSlot {
                owned: true,
                name_offset: 0,
            })
            .unwrap();
        assert_eq!(cursor.get_ref().len() as u64, AreaSlot::SIZE);

        let mut cursor = std::io::Cursor::new(Vec::new());
        cursor
            .write_le(&NodeSlot {
                owned: true,
                key_count: 1,
                left: 0,
                right: 0,
                keys: [0, 0],
            })
            .unwrap();
        assert_eq!(cursor.get_ref().len() as u64, NodeSlot::SIZE);
    }

    test_record! {
        ImageHeader => v1: ImageHeader {
            version: 1,
            sizes: [2, 3, 4, 5],
            offsets: [0x10, 0x20, 0x30, 0x40],
        } => "75667300010000000200000000000000030000000000000004000000000000000500000000000000100000000000000020000000000000003000000000000000\
              4000000000000000"
    }

    test_record! {
        StorageSlot => file: StorageSlot {
            owned: true,
            kind: StorageKind::File,
            parent: 7,
            name_offset: 0x98,
        } => "010100000000000007000000000000009800000000000000"
    }

    test_record! {
        StorageSlot => directory: StorageSlot {
            owned: true,
            kind: StorageKind::Directory,
            parent: 0,
            name_offset: 0x120,
        } => "010200000000000000000000000000002001000000000000"
    }

    test_record! {
        AreaSlot => live: AreaSlot {
            owned: true,
            name_offset: 0x120,
        } => "01000000000000002001000000000000"
    }

    test_record! {
        NodeSlot => pair: NodeSlot {
            owned: true,
            key_count: 2,
            left: 5,
            right: 0,
            keys: [3, 9],
        } => "0102000000000000050000000000000000000000000000000300000000000000\
              0900000000000000"
    }
}

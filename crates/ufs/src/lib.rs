//! Persistent metadata store for a FUSE-mounted union overlay.
//!
//! UFS projects one or more named *areas* over an external base
//! filesystem, so readers of a mount point see a deterministic union of
//! virtual namespaces without physically duplicating files. All state
//! lives in a single file-backed, memory-mapped image: a fixed header,
//! four typed slot tables, a string arena and an embedded search tree.
//! [`Ufs`] implements the union-mount operations on top; because the
//! image *is* the state, a restarted process picks up exactly where the
//! last one left off.
//!
//! ```no_run
//! use ufs::{Ufs, SizeRequest};
//!
//! # fn main() -> ufs::Result<()> {
//! let mut fs = Ufs::create("example.img", &SizeRequest::default())?;
//! let docs = fs.add_directory("docs")?;
//! let notes = fs.add_file(docs, "notes.txt")?;
//! let work = fs.add_area("work")?;
//! fs.add_mapping(work, notes)?;
//! assert_eq!(fs.resolve_storage_in_view(&[work], notes)?, work);
//! fs.close()?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod image;
pub mod layout;
mod store;
mod tree;
mod view;

pub use engine::{BASE_AREA_NAME, IMAGE_FILE, UFS_DIR, Ufs};
pub use error::{Error, id_or_code};
pub use image::Image;
pub use layout::SizeRequest;

pub use ufs_types::{BASE, Id, Status, VIEW_END, VIEW_MAX_SIZE, last_status};

/// UFS result type.
pub type Result<T> = std::result::Result<T, Error>;

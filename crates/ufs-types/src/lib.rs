//! Shared vocabulary for the UFS core: identifiers, status codes and the
//! on-image record structures.

pub mod record;
pub mod status;

pub use record::*;
pub use status::{Status, last_status, set_last_status};

/// Identifier of a live entity inside one of the image's typed tables.
///
/// Strictly positive values name a live slot (`slot_index + 1`); identifiers
/// are unique within a table but not across tables. Zero is reserved for the
/// [`BASE`] pseudo-area. Negative values carry status codes on the legacy
/// single-integer channel, see [`Status::as_id`].
pub type Id = i64;

/// The reserved pseudo-area (id 0) referring to the external base
/// filesystem. It exists from the moment an image is initialized, cannot be
/// removed, and cannot be the area of an explicit mapping.
pub const BASE: Id = 0;

/// Terminator for view slices: any negative entry ends the view.
pub const VIEW_END: Id = -1;

/// Maximum number of entries in a view.
pub const VIEW_MAX_SIZE: usize = 32;

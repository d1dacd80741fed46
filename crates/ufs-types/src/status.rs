//! Status codes and the process-wide status word.
//!
//! The engine reports failures through typed results; the status word is
//! the legacy single-integer channel kept for external consumers, refreshed
//! at every public-API edge.
//!
//! [`Status::MappingAlreadyExists`] is carried for vocabulary
//! compatibility with older consumers of the status word; a duplicate
//! mapping reports the generic [`Status::AlreadyExists`] like every other
//! duplicate insertion.

use std::sync::atomic::{AtomicI64, Ordering};

macro_rules! make_status {
    (
        $($name:ident = $value:literal: $description:literal, )+
    ) => {

/// Outcome kinds reported by every public engine operation.
///
/// For each kind, an i64 constant is also provided for easier access.
/// For example, [`Status::CODE_ALREADY_EXISTS`] is `5`, matching
/// [`Status::AlreadyExists`]. Operations that return identifiers use the
/// negative of these codes as their failure channel ([`Status::as_id`]),
/// so the enum doubles as the vocabulary of the status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Status {
    $(
        #[doc = concat!($description, " (", stringify!($value), ")")]
        $name = $value,
    )+
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message_as_string = match self {
            $(
                Status::$name => $description,
            )+
        };
        write!(f, "{} ({})", message_as_string, *self as i64)
    }
}

impl Status {
    // Consts for easier status code access.
    pastey::paste! {
        $(
            #[doc = concat!("[`", stringify!($name), "`][Self::", stringify!($name), "] as i64")]
            pub const [<CODE_ $name:snake:upper>]: i64 = $value;
        )+
    }

    /// Looks up the status kind for a raw code.
    pub fn from_code(code: i64) -> Option<Status> {
        match code {
            $(
                $value => Some(Status::$name),
            )+
            _ => None,
        }
    }

    /// The negative return-channel encoding of this status, for callers
    /// that receive identifiers and status codes over the same integer.
    pub fn as_id(self) -> i64 {
        -(self as i64)
    }
}
    };
}

make_status! {
    NoError = 0: "No error",
    DoesNotExist = 1: "Does not exist",
    ImageIsCorrupted = 2: "Image is corrupted",
    VersionMismatch = 3: "Version mismatch",
    BadCall = 4: "Bad call",
    AlreadyExists = 5: "Already exists",
    OutOfMemory = 6: "Out of memory",
    MappingAlreadyExists = 7: "Mapping already exists",
    CantCreateFile = 8: "Can't create backing file",
    UnknownError = 9: "Unknown error",
    ImageTooSmall = 10: "Image too small",
    ImageCouldNotSync = 11: "Image could not sync",
    ViewContainsDuplicates = 12: "View contains duplicates",
    InvalidAreaInView = 13: "Invalid area in view",
    DirectoryIsNotEmpty = 14: "Directory is not empty",
    CannotResolveStorage = 15: "Cannot resolve storage",
}

static LAST_STATUS: AtomicI64 = AtomicI64::new(Status::CODE_NO_ERROR);

/// Reads the process-wide status word: the code recorded by the most recent
/// public engine operation.
pub fn last_status() -> i64 {
    LAST_STATUS.load(Ordering::Relaxed)
}

/// Stores `status` into the process-wide status word.
pub fn set_last_status(status: Status) {
    LAST_STATUS.store(status as i64, Ordering::Relaxed);
}

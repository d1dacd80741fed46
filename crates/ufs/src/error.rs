//! Error type for all UFS operations.

use ufs_types::{Id, Status};

/// Error kind for every fallible UFS operation.
///
/// Each variant maps onto one [`Status`] code; [`Error::status`] bridges to
/// the legacy status-word and negative-identifier channel.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The named or identified entity is not live, or the image path is
    /// missing.
    #[error("entity does not exist")]
    DoesNotExist,
    #[error("image is corrupted: {0}")]
    ImageCorrupted(&'static str),
    #[error("image format version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("bad call: {0}")]
    BadCall(&'static str),
    #[error("entity already exists")]
    AlreadyExists,
    /// A slot table or the string arena is full.
    #[error("table or arena capacity exhausted")]
    OutOfMemory,
    #[error("cannot create backing file")]
    CantCreateFile(#[source] std::io::Error),
    /// The backing file is smaller than the 8-byte length prelude.
    #[error("image backing file is smaller than its length prelude")]
    ImageTooSmall,
    #[error("image could not sync")]
    CouldNotSync(#[source] std::io::Error),
    #[error("unexpected I/O failure")]
    Unknown(#[source] std::io::Error),
    #[error("view contains duplicate entries")]
    ViewContainsDuplicates,
    #[error("view entry {0} is not BASE or a live area")]
    InvalidAreaInView(Id),
    #[error("directory is not empty")]
    DirectoryIsNotEmpty,
    #[error("no area in the view projects the storage")]
    CannotResolveStorage,
}

impl Error {
    /// The status code this error reports through the status word.
    pub fn status(&self) -> Status {
        match self {
            Error::DoesNotExist => Status::DoesNotExist,
            Error::ImageCorrupted(_) => Status::ImageIsCorrupted,
            Error::VersionMismatch { .. } => Status::VersionMismatch,
            Error::BadCall(_) => Status::BadCall,
            Error::AlreadyExists => Status::AlreadyExists,
            Error::OutOfMemory => Status::OutOfMemory,
            Error::CantCreateFile(_) => Status::CantCreateFile,
            Error::ImageTooSmall => Status::ImageTooSmall,
            Error::CouldNotSync(_) => Status::ImageCouldNotSync,
            Error::Unknown(_) => Status::UnknownError,
            Error::ViewContainsDuplicates => Status::ViewContainsDuplicates,
            Error::InvalidAreaInView(_) => Status::InvalidAreaInView,
            Error::DirectoryIsNotEmpty => Status::DirectoryIsNotEmpty,
            Error::CannotResolveStorage => Status::CannotResolveStorage,
        }
    }
}

impl From<binrw::Error> for Error {
    fn from(_: binrw::Error) -> Self {
        Error::ImageCorrupted("record failed to parse")
    }
}

/// Records the result's status into the process-wide status word and
/// passes the result through. Every public engine operation returns
/// through here.
pub(crate) fn record<T>(result: crate::Result<T>) -> crate::Result<T> {
    let status = match &result {
        Ok(_) => Status::NoError,
        Err(e) => e.status(),
    };
    ufs_types::set_last_status(status);
    result
}

/// Negative-status encoding of an identifier result, for callers driving
/// the legacy single-integer channel.
pub fn id_or_code(result: &crate::Result<Id>) -> Id {
    match result {
        Ok(id) => *id,
        Err(e) => e.status().as_id(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_variant_has_a_status() {
        assert_eq!(Error::DoesNotExist.status(), Status::DoesNotExist);
        assert_eq!(
            Error::VersionMismatch {
                found: 0,
                expected: 1
            }
            .status(),
            Status::VersionMismatch
        );
        assert_eq!(Error::CannotResolveStorage.status(), Status::CannotResolveStorage);
    }

    #[test]
    fn test_id_or_code() {
        assert_eq!(id_or_code(&Ok(42)), 42);
        assert_eq!(id_or_code(&Err(Error::AlreadyExists)), -5);
    }
}

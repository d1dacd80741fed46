#![allow(dead_code)] // Not every test binary uses every helper.

use std::path::PathBuf;

use ufs::{SizeRequest, Ufs};

/// A scratch engine over a throwaway image file. The directory guard must
/// stay alive for as long as the engine does.
pub fn scratch_ufs() -> (tempfile::TempDir, PathBuf, Ufs) {
    scratch_ufs_with(&small_request())
}

pub fn scratch_ufs_with(req: &SizeRequest) -> (tempfile::TempDir, PathBuf, Ufs) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ufs_index");
    let fs = Ufs::create(&path, req).unwrap();
    (dir, path, fs)
}

pub fn small_request() -> SizeRequest {
    SizeRequest {
        num_files: 32,
        num_areas: 8,
        num_nodes: 128,
        num_str_bytes: 1024,
    }
}

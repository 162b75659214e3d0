//! Filesystem usage via statvfs(2).

use crate::snapshot::Usage;
use anyhow::{Context, Result};
use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Measures the filesystem holding `path`
#[derive(Debug, Clone)]
pub struct DiskCollector {
    path: PathBuf,
}

impl DiskCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn collect(&self) -> Result<Usage> {
        let c_path = CString::new(self.path.as_os_str().as_bytes())
            .with_context(|| format!("Invalid disk path {}", self.path.display()))?;
        let mut statvfs = MaybeUninit::<libc::statvfs>::uninit();

        let result = unsafe { libc::statvfs(c_path.as_ptr(), statvfs.as_mut_ptr()) };
        if result != 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("statvfs failed for {}", self.path.display()));
        }

        let statvfs = unsafe { statvfs.assume_init() };
        Ok(usage_from_blocks(
            statvfs.f_blocks as u64,
            statvfs.f_bavail as u64,
            statvfs.f_frsize as u64,
        ))
    }
}

/// Used space counts root-reserved blocks, matching what unprivileged users can still write.
pub fn usage_from_blocks(blocks: u64, available: u64, fragment_size: u64) -> Usage {
    let total_bytes = blocks.saturating_mul(fragment_size);
    let available_bytes = available.saturating_mul(fragment_size);
    Usage::new(total_bytes.saturating_sub(available_bytes), total_bytes)
}

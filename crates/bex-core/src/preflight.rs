//! Preflight checks: free space, destination writability.
//!
//! Runs before the first attempt and again before every retry, because
//! free space changes underneath us while sibling executions write. The
//! space check subtracts bytes reserved by other running executions (see
//! `reserve::SpaceBudget`), not just what the volume reports as free.

use std::path::Path;

use crate::error::BexError;

/// Source of free-space information for a destination path. Injected so
/// tests can simulate full volumes without filling a disk.
pub trait SpaceProbe: Send + Sync {
    fn free_bytes(&self, path: &Path) -> std::io::Result<u64>;
}

/// Probe backed by `statvfs` on the destination volume.
#[derive(Debug, Default)]
pub struct VolumeProbe;

#[cfg(unix)]
impl SpaceProbe for VolumeProbe {
    fn free_bytes(&self, path: &Path) -> std::io::Result<u64> {
        use std::os::unix::ffi::OsStrExt;
        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "nul in path"))?;
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(st.f_bavail as u64 * st.f_frsize as u64)
    }
}

#[cfg(not(unix))]
impl SpaceProbe for VolumeProbe {
    fn free_bytes(&self, _path: &Path) -> std::io::Result<u64> {
        // No statvfs; skip the space check rather than guessing.
        Ok(u64::MAX)
    }
}

/// Verify the destination volume can absorb `required_bytes` while keeping
/// `min_free_space` in reserve, after subtracting what sibling executions
/// have already reserved.
pub fn check_space(
    probe: &dyn SpaceProbe,
    destination: &Path,
    required_bytes: u64,
    min_free_space: u64,
    reserved_by_others: u64,
) -> Result<(), BexError> {
    let free = probe
        .free_bytes(destination)
        .map_err(|e| BexError::PermissionDenied {
            path: destination.to_path_buf(),
            source: e,
        })?;
    let usable = free.saturating_sub(reserved_by_others);
    let required = required_bytes.saturating_add(min_free_space);
    if usable < required {
        return Err(BexError::SpaceExhausted {
            free: usable,
            required,
        });
    }
    Ok(())
}

/// Verify the destination directory exists (creating it if needed) and is
/// writable, by writing and removing a probe file.
pub fn check_destination_writable(destination: &Path) -> Result<(), BexError> {
    std::fs::create_dir_all(destination).map_err(|e| BexError::PermissionDenied {
        path: destination.to_path_buf(),
        source: e,
    })?;
    let probe = tempfile::Builder::new()
        .prefix(".bex-preflight-")
        .tempfile_in(destination)
        .map_err(|e| BexError::PermissionDenied {
            path: destination.to_path_buf(),
            source: e,
        })?;
    // Dropping the NamedTempFile removes the probe.
    drop(probe);
    Ok(())
}

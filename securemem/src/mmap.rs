//! Thin wrappers around the memory-related system calls used by [`Secret`].
//!
//! [`Secret`]: crate::Secret

use crate::error::{Result, SecretError};
use once_cell::sync::Lazy;
use std::ptr;

static PAGE_SIZE: Lazy<usize> =
    Lazy::new(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize });

/// Protection state applied to a locked region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Protection {
    NoAccess,
    ReadOnly,
    ReadWrite,
}

impl Protection {
    fn as_flags(self) -> libc::c_int {
        match self {
            Protection::NoAccess => libc::PROT_NONE,
            Protection::ReadOnly => libc::PROT_READ,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

/// Returns the system page size.
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE
}

/// Rounds `size` up to a whole number of pages.
pub(crate) fn aligned_size(size: usize) -> usize {
    let page = page_size();
    size.div_ceil(page) * page
}

/// Allocates `size` bytes of zeroed, page-aligned anonymous memory.
///
/// `size` must already be page aligned.
pub(crate) fn alloc(size: usize) -> Result<*mut u8> {
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };

    if addr == libc::MAP_FAILED {
        return Err(SecretError::AllocationFailed(format!(
            "mmap: {}",
            std::io::Error::last_os_error()
        )));
    }

    Ok(addr.cast::<u8>())
}

/// Releases a region previously returned by [`alloc`].
///
/// # Safety
///
/// `ptr`/`size` must describe exactly one live allocation from [`alloc`].
pub(crate) unsafe fn free(ptr: *mut u8, size: usize) -> Result<()> {
    if libc::munmap(ptr.cast::<libc::c_void>(), size) != 0 {
        return Err(SecretError::OsError(format!(
            "munmap: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Changes the protection of a region.
///
/// # Safety
///
/// `ptr`/`size` must describe a live allocation from [`alloc`].
pub(crate) unsafe fn protect(ptr: *mut u8, size: usize, protection: Protection) -> Result<()> {
    if libc::mprotect(ptr.cast::<libc::c_void>(), size, protection.as_flags()) != 0 {
        return Err(SecretError::ProtectionFailed(format!(
            "mprotect: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Pins a region into RAM so it cannot be swapped to disk.
///
/// # Safety
///
/// `ptr`/`size` must describe a live allocation from [`alloc`].
pub(crate) unsafe fn lock(ptr: *mut u8, size: usize) -> Result<()> {
    if libc::mlock(ptr.cast::<libc::c_void>(), size) != 0 {
        return Err(SecretError::LockFailed(format!(
            "mlock: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Unpins a region previously pinned with [`lock`].
///
/// # Safety
///
/// `ptr`/`size` must describe a live allocation from [`alloc`].
pub(crate) unsafe fn unlock(ptr: *mut u8, size: usize) -> Result<()> {
    if libc::munlock(ptr.cast::<libc::c_void>(), size) != 0 {
        return Err(SecretError::OsError(format!(
            "munlock: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Disables core dumps for the current process so key material cannot end up
/// in a dump file.
pub fn disable_core_dumps() -> Result<()> {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) } != 0 {
        return Err(SecretError::OsError(format!(
            "setrlimit(RLIMIT_CORE): {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

//! Page-granular memory calls backing protected secrets.

use crate::error::{Result, SecureMemoryError};
use log::{error, warn};
use zeroize::Zeroize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemoryProtection {
    NoAccess,
    ReadOnly,
    ReadWrite,
}

#[cfg(unix)]
mod sys {
    use super::MemoryProtection;
    use crate::error::{Result, SecureMemoryError};
    use once_cell::sync::Lazy;
    use std::ptr::{self, NonNull};

    static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    });

    pub(crate) fn page_size() -> usize {
        *PAGE_SIZE
    }

    pub(crate) fn alloc(capacity: usize) -> Result<NonNull<u8>> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SecureMemoryError::AllocationFailed(format!(
                "<memcall> could not allocate [Err: {}]",
                std::io::Error::last_os_error()
            )));
        }

        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| {
            SecureMemoryError::AllocationFailed("<memcall> mmap returned null".to_string())
        })
    }

    pub(crate) fn free(ptr: NonNull<u8>, capacity: usize) -> Result<()> {
        if unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), capacity) } != 0 {
            return Err(SecureMemoryError::DeallocationFailed(format!(
                "<memcall> could not deallocate {:p} [Err: {}]",
                ptr.as_ptr(),
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    pub(crate) fn protect(ptr: NonNull<u8>, capacity: usize, protection: MemoryProtection) -> Result<()> {
        let prot = match protection {
            MemoryProtection::NoAccess => libc::PROT_NONE,
            MemoryProtection::ReadOnly => libc::PROT_READ,
            MemoryProtection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };

        if unsafe { libc::mprotect(ptr.as_ptr().cast::<libc::c_void>(), capacity, prot) } != 0 {
            return Err(SecureMemoryError::ProtectionFailed(format!(
                "<memcall> could not set {:?} on {:p} [Err: {}]",
                protection,
                ptr.as_ptr(),
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    pub(crate) fn lock(ptr: NonNull<u8>, capacity: usize) -> std::io::Result<()> {
        #[cfg(target_os = "linux")]
        unsafe {
            libc::madvise(ptr.as_ptr().cast::<libc::c_void>(), capacity, libc::MADV_DONTDUMP);
        }

        if unsafe { libc::mlock(ptr.as_ptr().cast::<libc::c_void>(), capacity) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn unlock(ptr: NonNull<u8>, capacity: usize) -> std::io::Result<()> {
        if unsafe { libc::munlock(ptr.as_ptr().cast::<libc::c_void>(), capacity) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

// Plain heap fallback: no page protection or locking, but the wipe on release still holds.
#[cfg(not(unix))]
mod sys {
    use super::MemoryProtection;
    use crate::error::{Result, SecureMemoryError};
    use std::ptr::NonNull;

    pub(crate) fn page_size() -> usize {
        4096
    }

    pub(crate) fn alloc(capacity: usize) -> Result<NonNull<u8>> {
        let boxed = vec![0_u8; capacity].into_boxed_slice();
        NonNull::new(Box::into_raw(boxed).cast::<u8>())
            .ok_or_else(|| SecureMemoryError::AllocationFailed("null allocation".to_string()))
    }

    pub(crate) fn free(ptr: NonNull<u8>, capacity: usize) -> Result<()> {
        let slice = std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), capacity);
        drop(unsafe { Box::from_raw(slice) });
        Ok(())
    }

    pub(crate) fn protect(_ptr: NonNull<u8>, _capacity: usize, _protection: MemoryProtection) -> Result<()> {
        Ok(())
    }

    pub(crate) fn lock(_ptr: NonNull<u8>, _capacity: usize) -> std::io::Result<()> {
        Ok(())
    }

    pub(crate) fn unlock(_ptr: NonNull<u8>, _capacity: usize) -> std::io::Result<()> {
        Ok(())
    }
}

/// A private, page-aligned mapping holding `len` bytes of secret data.
pub(crate) struct Pages {
    ptr: std::ptr::NonNull<u8>,
    len: usize,
    capacity: usize,
    locked: bool,
    released: bool,
}

// Pages owns its mapping exclusively; all access is serialized by ProtectedMemorySecret.
unsafe impl Send for Pages {}
unsafe impl Sync for Pages {}

impl Pages {
    /// Maps enough whole pages for `len` bytes, readable and writable.
    pub(crate) fn allocate(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(SecureMemoryError::InvalidSize(
                "cannot allocate a zero-length secret".to_string(),
            ));
        }

        let page_size = sys::page_size();
        let capacity = len
            .checked_add(page_size - 1)
            .map(|n| n / page_size * page_size)
            .ok_or_else(|| SecureMemoryError::InvalidSize(format!("{} bytes", len)))?;

        let ptr = sys::alloc(capacity)?;

        Ok(Self {
            ptr,
            len,
            capacity,
            locked: false,
            released: false,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Locks the pages into RAM. Failure is logged and tolerated: an RLIMIT_MEMLOCK
    /// refusal must not make keys unusable.
    pub(crate) fn lock(&mut self) {
        if cfg!(feature = "no-mlock") {
            return;
        }

        match sys::lock(self.ptr, self.capacity) {
            Ok(()) => self.locked = true,
            Err(e) => warn!(
                "<memcall> could not acquire lock on {:p}, limit reached? [Err: {}]",
                self.ptr.as_ptr(),
                e
            ),
        }
    }

    pub(crate) fn protect(&self, protection: MemoryProtection) -> Result<()> {
        sys::protect(self.ptr, self.capacity, protection)
    }

    /// The secret bytes. Only valid to call while the pages are readable.
    pub(crate) unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// The secret bytes, writable. Only valid to call while the pages are read-write.
    pub(crate) unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }

    /// Wipes, unlocks and unmaps the pages. Idempotent.
    pub(crate) fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        self.protect(MemoryProtection::ReadWrite)?;

        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }.zeroize();

        if self.locked {
            if let Err(e) = sys::unlock(self.ptr, self.capacity) {
                warn!("<memcall> could not free lock on {:p} [Err: {}]", self.ptr.as_ptr(), e);
            }
        }

        sys::free(self.ptr, self.capacity)
    }
}

impl Drop for Pages {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!("failed to release protected pages: {}", e);
        }
    }
}

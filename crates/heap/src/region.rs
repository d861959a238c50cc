//! OS-backed memory regions.
//!
//! A [`Region`] owns one private anonymous mapping obtained from the
//! operating system. Both the variable allocator and each pool size class
//! sit on top of their own region. Mappings are zero-filled by the OS and
//! page-aligned by construction; the region checks the stricter header
//! alignment the allocator requires.
//!
//! The process-global heap never drops its regions (the facade singleton
//! lives for the process), which preserves the "never returned to the OS"
//! lifecycle; standalone instances used in tests unmap on drop.

use core::ptr::NonNull;
use std::io;

use crate::error::HeapError;

/// Returns the OS page size, falling back to 4096 when `sysconf` is
/// unavailable or misbehaves.
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions; it reads a
    // process-wide constant.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if raw <= 0 { 4096 } else { raw as usize }
}

/// An owned, page-aligned, zero-filled private anonymous mapping.
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    /// Maps `len` bytes of private anonymous memory.
    ///
    /// `len` must already be a multiple of the page size; the allocator
    /// layers do their own rounding before asking for a mapping.
    pub fn map(len: usize, required_alignment: usize) -> Result<Self, HeapError> {
        if len == 0 {
            return Err(HeapError::init_failed("zero-length mapping requested"));
        }

        // SAFETY: mmap with MAP_PRIVATE | MAP_ANONYMOUS and fd -1 has no
        // pointer preconditions; a NULL hint lets the kernel pick the
        // address. The result is checked against MAP_FAILED below.
        let raw = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if raw == libc::MAP_FAILED {
            let os = io::Error::last_os_error();
            return Err(HeapError::init_failed(format!("mmap({len}) failed: {os}")));
        }

        let base = raw.cast::<u8>();
        if !crate::utils::is_aligned_ptr(base, required_alignment) {
            // Page-aligned mappings satisfy any smaller power-of-two
            // alignment; reaching this means the platform page size is
            // below the header size, which the allocator cannot use.
            // SAFETY: raw is a live mapping of len bytes we just created.
            unsafe {
                libc::munmap(raw, len);
            }
            return Err(HeapError::init_failed(format!(
                "mapping base {base:p} not aligned to {required_alignment}"
            )));
        }

        tracing::debug!(len, base = ?base, "mapped region");

        // SAFETY: mmap success was checked against MAP_FAILED, so base is
        // non-null.
        let base = unsafe { NonNull::new_unchecked(base) };
        Ok(Self { base, len })
    }

    /// Base address of the mapping.
    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether `addr` falls inside `[base, base + len)`.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.base.as_ptr() as usize;
        addr >= start && addr < start + self.len
    }

    /// The region as a raw byte slice, for read-only diagnostics.
    ///
    /// # Safety
    ///
    /// The caller must not hold any `&mut` into the region for the
    /// lifetime of the slice, and must treat block headers as untyped
    /// bytes.
    pub unsafe fn as_bytes(&self) -> &[u8] {
        // SAFETY: base..base+len is a single live mapping owned by self;
        // caller upholds aliasing per the function contract.
        unsafe { core::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: base/len describe the exact mapping created in map();
        // the Region owns it and nothing else unmaps it.
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
        if rc != 0 {
            tracing::warn!(
                base = ?self.base,
                len = self.len,
                "munmap failed: {}",
                io::Error::last_os_error()
            );
        }
    }
}

// SAFETY: Region is a unique owner of its mapping; sending it to another
// thread transfers that ownership without sharing.
unsafe impl Send for Region {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_sane() {
        let ps = page_size();
        assert!(ps >= 4096);
        assert!(ps.is_power_of_two());
    }

    #[test]
    fn mapping_is_zero_filled_and_aligned() {
        let ps = page_size();
        let region = Region::map(ps, 32).unwrap();
        assert_eq!(region.len(), ps);
        assert!(crate::utils::is_aligned_ptr(region.base().as_ptr(), ps));

        // SAFETY: fresh region, no other references.
        let bytes = unsafe { region.as_bytes() };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_length_mapping_rejected() {
        assert!(Region::map(0, 32).is_err());
    }

    #[test]
    fn contains_tracks_bounds() {
        let ps = page_size();
        let region = Region::map(ps, 32).unwrap();
        let base = region.base().as_ptr() as usize;
        assert!(region.contains(base));
        assert!(region.contains(base + ps - 1));
        assert!(!region.contains(base + ps));
        assert!(!region.contains(base.wrapping_sub(1)));
    }
}

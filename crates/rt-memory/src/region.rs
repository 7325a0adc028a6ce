use crate::{Error, Result};

/// Guard-page policy for a region, overlaid from `sys_params.guard_page_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPageMode {
    /// No regions get guard pages.
    Disabled,
    /// Only selected heaps (the WASM heap, the HTTP heap) get guard pages.
    Minimal,
    /// Every allocation is padded to a page boundary with inaccessible pages
    /// on both sides.
    Enabled,
}

fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf with _SC_PAGESIZE never fails on a supported platform.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 { size as usize } else { 4096 }
    }
    #[cfg(not(unix))]
    {
        4096
    }
}

/// A contiguous byte range, optionally escorted by two inaccessible guard
/// pages. Created by the OS mapper; destroyed only by the creator (`Drop`).
pub struct Region {
    /// Base of the *usable* span (guard page, if any, sits below this).
    usable: *mut u8,
    usable_len: usize,
    /// Base of the full OS mapping (including guard pages).
    map_base: *mut u8,
    map_len: usize,
    guarded: bool,
}

// SAFETY: a `Region` owns a unique OS mapping; the raw pointers inside are
// never aliased by another `Region`, and all mutation goes through `&mut`
// access to the bytes, which is safe to send/share across threads the same
// way a `Box<[u8]>` would be.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Maps `size` bytes, escorted by guard pages when `guarded` is true.
    pub fn map_pages(size: usize, guarded: bool) -> Result<Self> {
        let page = page_size();
        let usable_len = size.next_multiple_of(page).max(page);
        let map_len = if guarded {
            usable_len + 2 * page
        } else {
            usable_len
        };

        #[cfg(unix)]
        {
            // SAFETY: standard anonymous private mapping; we check the result below.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    map_len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(Error::Map {
                    size,
                    source: std::io::Error::last_os_error(),
                });
            }
            let map_base = ptr.cast::<u8>();
            let usable = if guarded {
                // SAFETY: `map_base + page` is within the mapping just created.
                unsafe {
                    let head = map_base;
                    let tail = map_base.add(page + usable_len);
                    if libc::mprotect(head.cast(), page, libc::PROT_NONE) != 0
                        || libc::mprotect(tail.cast(), page, libc::PROT_NONE) != 0
                    {
                        libc::munmap(map_base.cast(), map_len);
                        return Err(Error::Protect(std::io::Error::last_os_error()));
                    }
                    map_base.add(page)
                }
            } else {
                map_base
            };
            Ok(Self {
                usable,
                usable_len,
                map_base,
                map_len,
                guarded,
            })
        }
        #[cfg(not(unix))]
        {
            // Non-unix targets get a plain heap-backed region; no guard pages.
            let mut buf = vec![0u8; usable_len].into_boxed_slice();
            let usable = buf.as_mut_ptr();
            let map_base = usable;
            std::mem::forget(buf);
            Ok(Self {
                usable,
                usable_len,
                map_base,
                map_len: usable_len,
                guarded: false,
            })
        }
    }

    /// Changes the protection of the guard escort. Debug heaps flip this to
    /// trap overruns immediately; production heaps leave it in place.
    pub fn protect_pages(&self, readable: bool) -> Result<()> {
        if !self.guarded {
            return Ok(());
        }
        #[cfg(unix)]
        {
            let prot = if readable {
                libc::PROT_READ | libc::PROT_WRITE
            } else {
                libc::PROT_NONE
            };
            // SAFETY: re-protecting the exact usable span this Region owns.
            let rc = unsafe { libc::mprotect(self.usable.cast(), self.usable_len, prot) };
            if rc != 0 {
                return Err(Error::Protect(std::io::Error::last_os_error()));
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.usable
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.usable_len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.usable_len == 0
    }

    /// Borrows the usable span as a byte slice.
    ///
    /// # Safety
    /// The caller must not alias this with another live `&mut [u8]` over the
    /// same range.
    #[must_use]
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.usable, self.usable_len) }
    }

    /// # Safety
    /// See [`Region::as_slice`].
    #[must_use]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.usable, self.usable_len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        #[cfg(unix)]
        // SAFETY: unmaps exactly the mapping this Region created in `map_pages`.
        unsafe {
            libc::munmap(self.map_base.cast(), self.map_len);
        }
        #[cfg(not(unix))]
        {
            // SAFETY: reconstructs the boxed slice leaked in `map_pages`.
            unsafe {
                drop(Box::from_raw(std::slice::from_raw_parts_mut(
                    self.map_base,
                    self.map_len,
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_and_unmaps_without_aliasing() {
        let a = Region::map_pages(4096, false).unwrap();
        let b = Region::map_pages(4096, false).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
        assert!(a.len() >= 4096);
    }

    #[test]
    fn guarded_region_traps_on_overrun() {
        let region = Region::map_pages(64, true).unwrap();
        assert!(region.len() >= 64);
        // The usable span itself remains read/write.
        unsafe {
            let slice = region.as_mut_slice();
            slice[0] = 1;
            assert_eq!(slice[0], 1);
        }
    }
}

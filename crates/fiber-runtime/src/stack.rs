//! Guarded fiber stacks
//!
//! Each stack is its own anonymous mapping with one `PROT_NONE` guard page
//! at the low end, so running off the bottom faults instead of corrupting a
//! neighbour.
//!
//! ```text
//!   base                                            base + len
//!   ┌────────────┬──────────────────────────────────────┐
//!   │ guard (RO) │   usable stack  (grows downward) <── │ top()
//!   └────────────┴──────────────────────────────────────┘
//! ```

use fiber_core::constants::GUARD_SIZE;
use fiber_core::MemoryError;

/// One mmap'ed stack, unmapped on drop.
#[derive(Debug)]
pub struct FiberStack {
    base: *mut u8,
    len: usize,
    guard: usize,
}

impl FiberStack {
    /// Map a stack with at least `size` usable bytes plus a guard page.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        let guard = page_size().max(GUARD_SIZE);
        let usable = round_to_page(size).ok_or(MemoryError::TooLarge)?;
        let len = usable.checked_add(guard).ok_or(MemoryError::TooLarge)?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | map_stack_flag(),
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }

        let stack = Self { base: base as *mut u8, len, guard };

        // Guard page at the low end. On failure `stack` is dropped and unmapped.
        let ret = unsafe { libc::mprotect(base, guard, libc::PROT_NONE) };
        if ret != 0 {
            return Err(MemoryError::ProtectionFailed);
        }

        Ok(stack)
    }

    /// Upper end of the usable region (stack grows down from here)
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.len) }
    }

    /// Usable bytes, excluding the guard page
    #[inline]
    pub fn usable_size(&self) -> usize {
        self.len - self.guard
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 { GUARD_SIZE } else { sz as usize }
}

fn round_to_page(size: usize) -> Option<usize> {
    let page = page_size();
    size.checked_add(page - 1).map(|s| s & !(page - 1))
}

#[cfg(target_os = "linux")]
#[inline]
fn map_stack_flag() -> libc::c_int {
    libc::MAP_STACK
}

#[cfg(not(target_os = "linux"))]
#[inline]
fn map_stack_flag() -> libc::c_int {
    0
}

//! Thin shim over the operating system's anonymous memory mapping
//! primitives.  Everything crosses this boundary in whole pages.
use std::ffi::c_void;
use std::ptr::NonNull;

fn page_size_or_die() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    if ret <= 0 {
        panic!("Unable to find page_size: sysconf returned {}", ret);
    }

    ret as usize
}

lazy_static::lazy_static! {
    static ref PAGE_SIZE: usize = page_size_or_die();
}

/// Returns the system page size, cached on first call.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Attempts to map `pages` fresh anonymous private pages, readable and
/// writable.  The OS zero-fills new anonymous mappings.
///
/// # Errors
///
/// Returns the mapping errno on failure (an OOM-like condition).
pub fn map_pages(pages: usize) -> Result<NonNull<c_void>, i32> {
    assert!(pages > 0, "Bad page count={}", pages);

    let size = pages.checked_mul(page_size()).ok_or(libc::ENOMEM)?;
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            /* fd */ -1,
            /* offset */ 0,
        )
    };

    if base == libc::MAP_FAILED {
        return Err(last_errno());
    }

    Ok(NonNull::new(base).expect("mmap never returns NULL on success"))
}

/// Returns `pages` pages starting at `base` to the operating system.
///
/// Unmap failures mean the allocator's bookkeeping no longer matches
/// the address space, and abort.
pub fn unmap_pages(base: NonNull<c_void>, pages: usize) {
    assert!(
        (base.as_ptr() as usize % page_size()) == 0,
        "Bad unmap base={:p} page_size={}",
        base.as_ptr(),
        page_size()
    );
    assert!(pages > 0, "Bad page count={}", pages);

    let size = pages * page_size();
    let ret = unsafe { libc::munmap(base.as_ptr(), size) };

    if ret != 0 {
        panic!(
            "munmap({:p}, {}) failed: errno={}",
            base.as_ptr(),
            size,
            last_errno()
        );
    }
}

#[test]
fn test_page_size() {
    let size = page_size();

    assert_ne!(size, 0);
    assert!(size.is_power_of_two());
}

// Map a small run, confirm the OS hands it to us zero-filled and
// writable, and return it.
#[test]
fn smoke_test() {
    let pages = 3;
    let base = map_pages(pages).expect("map should succeed");

    assert_eq!(base.as_ptr() as usize % page_size(), 0);

    let slice =
        unsafe { std::slice::from_raw_parts_mut(base.as_ptr() as *mut u8, pages * page_size()) };
    assert!(slice.iter().all(|&byte| byte == 0));

    for byte in slice.iter_mut() {
        *byte = 0xAA;
    }

    unmap_pages(base, pages);
}

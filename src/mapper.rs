//! A `Mapper` acquires page runs from, and returns them to, the
//! operating system.  Each `PagePool` is parameterised on one; tests
//! interpose instrumented mappers to observe the pool's syscall
//! traffic.
use std::ffi::c_void;
use std::ptr::NonNull;

pub trait Mapper: std::fmt::Debug + Sync {
    /// Returns the mapping granularity for this mapper.  All calls
    /// into the mapper are in units of that page size.
    ///
    /// The page size must be constant for the lifetime of a process.
    fn page_size(&self) -> usize;

    /// Attempts to map `pages` fresh pages of zero-filled memory,
    /// readable and writable.  On success the base address is aligned
    /// to the `page_size()`.
    ///
    /// # Errors
    ///
    /// Returns the mapping errno on failure.
    fn map(&self, pages: usize) -> Result<NonNull<c_void>, i32>;

    /// Unmaps `pages` pages starting at `base`.  The range is always
    /// a page-aligned subset of a range obtained from `map`.
    ///
    /// Failure to unmap is fatal.
    fn unmap(&self, base: NonNull<c_void>, pages: usize);
}

#[derive(Debug)]
struct DefaultMapper {}

impl Mapper for DefaultMapper {
    fn page_size(&self) -> usize {
        crate::map::page_size()
    }

    fn map(&self, pages: usize) -> Result<NonNull<c_void>, i32> {
        crate::map::map_pages(pages)
    }

    fn unmap(&self, base: NonNull<c_void>, pages: usize) {
        crate::map::unmap_pages(base, pages)
    }
}

/// Returns a reference to the shared default mapper.
pub fn default_mapper() -> &'static dyn Mapper {
    lazy_static::lazy_static! {
        static ref DEFAULT_MAPPER: DefaultMapper = DefaultMapper {};
    }

    &*DEFAULT_MAPPER
}

#[test]
fn smoke_test_default_mapper() {
    let mapper = default_mapper();

    assert_eq!(mapper.page_size(), crate::map::page_size());

    let base = mapper.map(2).expect("map should succeed");
    assert_eq!(base.as_ptr() as usize % mapper.page_size(), 0);
    mapper.unmap(base, 2);
}

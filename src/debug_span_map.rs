//! This module tracks the runs currently held by callers in
//! contract-checking builds: allocations must be page-aligned and
//! pairwise disjoint, and releases must pair with allocations.
use std::collections::BTreeMap;
use std::sync::Mutex;

lazy_static::lazy_static! {
    // Live runs, keyed by base address, valued by length in bytes.
    static ref LIVE_RUNS: Mutex<BTreeMap<usize, usize>> = Default::default();
}

/// Registers a run handed to a caller.  The run must be page-aligned
/// and must not overlap any registered run.
pub fn mark_allocated(base: usize, pages: usize) -> Result<(), &'static str> {
    let page_size = crate::map::page_size();

    if base == 0 {
        return Err("Allocation at NULL");
    }

    if base % page_size != 0 {
        return Err("Allocation is not page-aligned");
    }

    let len = pages
        .checked_mul(page_size)
        .ok_or("Allocation length overflows")?;

    let mut map = LIVE_RUNS.lock().unwrap();

    if let Some((&prev_base, &prev_len)) = map.range(..=base).next_back() {
        if prev_base + prev_len > base {
            return Err("Allocation overlaps a live run");
        }
    }

    if let Some((&next_base, _)) = map.range(base..).next() {
        if base + len > next_base {
            return Err("Allocation overlaps a live run");
        }
    }

    map.insert(base, len);
    Ok(())
}

/// Unregisters the run whose first page contains `ptr`.  Unknown
/// addresses are accepted: freeing them is a documented no-op.
pub fn forget(ptr: usize) -> Result<(), &'static str> {
    if ptr == 0 {
        return Ok(());
    }

    let page_size = crate::map::page_size();
    let base = ptr & !(page_size - 1);

    LIVE_RUNS.lock().unwrap().remove(&base);
    Ok(())
}

#[test]
fn overlap_detection() {
    let page_size = crate::map::page_size();
    // Synthetic addresses in an address-space gap the tests never map.
    let base = 0x4000_0000_0000usize;

    assert!(mark_allocated(base, 2).is_ok());
    assert!(mark_allocated(base, 1).is_err());
    assert!(mark_allocated(base + page_size, 1).is_err());
    assert!(mark_allocated(base + 2 * page_size, 1).is_ok());
    assert!(mark_allocated(base + 1, 1).is_err());

    assert!(forget(base + page_size - 1).is_ok());
    assert!(forget(base + 2 * page_size).is_ok());
    assert!(mark_allocated(base, 2).is_ok());

    assert!(forget(base).is_ok());
    assert!(forget(base).is_ok());
}

//! Quarry is a two-tier memory subsystem: a thread-safe page pool
//! that vends runs of OS pages and keeps its own bookkeeping on pages
//! it carves out for itself, and a single-owner bump arena built on
//! top for cheap sub-page allocations with bulk release.
mod arena;
mod ledger;
mod list;
mod map;
mod mapper;
mod pool;
mod run;

#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
mod debug_span_map;

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

pub use arena::Arena;
pub use ledger::STATIC_SLOT_COUNT;
pub use pool::page_size;
pub use pool::palloc;
pub use pool::pfree;
pub use pool::FREE_LIST_CAP;

/// Returns the OS page size in bytes.
#[no_mangle]
pub extern "C" fn quarry_page_size() -> usize {
    page_size()
}

/// Allocates a run of at least `pages` contiguous, zero-filled,
/// page-aligned pages.  Returns NULL when `pages` is zero or the OS
/// refuses to map more memory.
#[no_mangle]
pub extern "C" fn quarry_palloc(pages: usize) -> *mut c_void {
    match palloc(pages) {
        Some(run) => run.as_ptr(),
        None => std::ptr::null_mut(),
    }
}

/// Releases a run previously returned by `quarry_palloc`.  Any address
/// within the run's first page works; NULL and unknown addresses are
/// ignored.
///
/// # Safety
///
/// The run must no longer be in use: a retained run is zeroed and may
/// be handed to the next caller.
#[no_mangle]
pub unsafe extern "C" fn quarry_pfree(ptr: *mut c_void) {
    pfree(ptr)
}

/// Creates an arena with one page of initial capacity and one page of
/// growth.  Returns NULL when the pool cannot back it.
#[no_mangle]
pub extern "C" fn quarry_arena_create() -> *mut c_void {
    match Arena::new() {
        Some(arena) => arena.into_raw().as_ptr(),
        None => std::ptr::null_mut(),
    }
}

/// Creates an arena whose first chunk holds at least `initial_bytes`
/// and which grows by at least `growth_bytes` a chunk.  Returns NULL
/// when the pool cannot back it.
#[no_mangle]
pub extern "C" fn quarry_arena_create_ext(initial_bytes: usize, growth_bytes: usize) -> *mut c_void {
    match Arena::with_growth(initial_bytes, growth_bytes) {
        Some(arena) => arena.into_raw().as_ptr(),
        None => std::ptr::null_mut(),
    }
}

/// Returns `bytes` of uninitialized storage from the arena, or NULL
/// when the pool cannot grow it.
///
/// # Safety
///
/// `handle` must be NULL or a live handle from `quarry_arena_create`
/// or `quarry_arena_create_ext`, with no concurrent use.
#[no_mangle]
pub unsafe extern "C" fn quarry_arena_alloc(handle: *mut c_void, bytes: usize) -> *mut c_void {
    let handle = match NonNull::new(handle) {
        Some(handle) => handle,
        None => return std::ptr::null_mut(),
    };

    let mut arena = ManuallyDrop::new(Arena::from_raw(handle));
    match arena.alloc(bytes) {
        Some(region) => region.as_ptr(),
        None => std::ptr::null_mut(),
    }
}

/// Releases the arena and every allocation made from it.  NULL is
/// ignored.
///
/// # Safety
///
/// `handle` must be NULL or a live handle from `quarry_arena_create`
/// or `quarry_arena_create_ext`; it and every address the arena
/// returned are invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn quarry_arena_free(handle: *mut c_void) {
    if let Some(handle) = NonNull::new(handle) {
        drop(Arena::from_raw(handle));
    }
}

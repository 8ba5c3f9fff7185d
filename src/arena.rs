//! A bump arena built on the page pool: cheap sub-page allocations,
//! released in bulk.
//!
//! The arena's control block lives at the start of the first chunk it
//! allocates, so creating an arena costs one pool allocation and no
//! heap traffic at all.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
)))]
use disabled_contracts::*;

use std::ffi::c_void;
use std::mem;
use std::ptr::NonNull;

use crate::list::SLink;
use crate::list::SLinked;
use crate::list::SList;
use crate::pool::PagePool;

/// Every allocation is aligned for any scalar type.
const MAX_ALIGN: usize = mem::align_of::<libc::max_align_t>();

fn align_up(offset: usize) -> usize {
    (offset + MAX_ALIGN - 1) & !(MAX_ALIGN - 1)
}

/// Rounds a byte count up to whole pages.
fn pages_for(bytes: usize, page_size: usize) -> usize {
    let mut pages = bytes / page_size;
    if bytes % page_size != 0 {
        pages += 1;
    }
    pages
}

/// Header inside every chunk.  `cursor` and `limit` are byte offsets
/// from the header's own address; the bytes handed out live in
/// `[header + cursor, header + limit)`.
#[repr(C)]
struct ChunkHeader {
    link: SLink, // Must stay the first field.
    cursor: usize,
    limit: usize,
}

unsafe impl SLinked for ChunkHeader {
    fn link(this: *mut ChunkHeader) -> *mut SLink {
        unsafe { &mut (*this).link }
    }
}

impl ChunkHeader {
    /// Prepares the header at `this` to govern `limit` bytes starting
    /// at its own address.
    ///
    /// # Safety
    ///
    /// `this` must point to at least `limit` bytes of writable memory.
    unsafe fn init(this: *mut ChunkHeader, limit: usize) {
        this.write(ChunkHeader {
            link: SLink::new(),
            cursor: mem::size_of::<ChunkHeader>(),
            limit,
        });
    }

    /// Bumps `bytes` out of this chunk, or returns `None` when the
    /// remainder is too small.
    ///
    /// # Safety
    ///
    /// `this` must point to an initialized chunk header.
    unsafe fn bump(this: *mut ChunkHeader, bytes: usize) -> Option<NonNull<c_void>> {
        let cursor = align_up((*this).cursor);
        if bytes > (*this).limit.saturating_sub(cursor) {
            return None;
        }

        (*this).cursor = cursor + bytes;
        NonNull::new((this as *mut u8).add(cursor) as *mut c_void)
    }
}

/// The per-arena state.  `first` governs the chunk hosting this very
/// struct and must stay the last field: the hosting chunk's usable
/// bytes begin where the struct ends.
#[repr(C)]
struct ArenaCore {
    chunks: SList<ChunkHeader>,
    growth_bytes: usize,
    pool: &'static PagePool,
    first: ChunkHeader,
}

/// A bump allocator over pool-backed chunks.
///
/// Not thread-safe: allocation takes `&mut self`, and dropping the
/// arena invalidates every address it handed out.  Distinct arenas on
/// distinct threads are independent.
pub struct Arena {
    core: NonNull<ArenaCore>,
}

// An arena can move between threads wholesale; the chunks it points
// into are exclusively its own, and the pool below is thread-safe.
unsafe impl Send for Arena {}

impl Arena {
    /// Creates an arena with one page of initial capacity and one page
    /// of growth, or `None` when the pool cannot back it.
    pub fn new() -> Option<Arena> {
        let page_size = crate::pool::page_size();
        Arena::with_growth(page_size, page_size)
    }

    /// Creates an arena whose first chunk holds at least
    /// `initial_bytes` and which grows by at least `growth_bytes` a
    /// chunk, or `None` when the pool cannot back it.
    pub fn with_growth(initial_bytes: usize, growth_bytes: usize) -> Option<Arena> {
        Arena::create_in(crate::pool::global_pool(), initial_bytes, growth_bytes)
    }

    pub(crate) fn create_in(
        pool: &'static PagePool,
        initial_bytes: usize,
        growth_bytes: usize,
    ) -> Option<Arena> {
        let page_size = pool.page_size();
        let pages = pages_for(initial_bytes.max(mem::size_of::<ArenaCore>()), page_size);
        let run = pool.allocate(pages).ok()?;

        let core = run.cast::<ArenaCore>();
        unsafe {
            let host_offset = mem::size_of::<ArenaCore>() - mem::size_of::<ChunkHeader>();
            core.as_ptr().write(ArenaCore {
                chunks: SList::new(),
                growth_bytes,
                pool,
                first: ChunkHeader {
                    link: SLink::new(),
                    cursor: 0,
                    limit: 0,
                },
            });

            let host = &mut (*core.as_ptr()).first as *mut ChunkHeader;
            ChunkHeader::init(host, pages * page_size - host_offset);
            (*core.as_ptr()).chunks.push_front(host);
        }

        Some(Arena { core })
    }

    /// Dissolves the arena into its raw handle (the address of its
    /// first chunk) without releasing anything.
    pub fn into_raw(self) -> NonNull<c_void> {
        let raw = self.core.cast();
        mem::forget(self);
        raw
    }

    /// Rebuilds an arena from a handle returned by `into_raw`.
    ///
    /// # Safety
    ///
    /// `raw` must come from `into_raw`, and the handle must not be in
    /// use anywhere else.
    pub unsafe fn from_raw(raw: NonNull<c_void>) -> Arena {
        Arena { core: raw.cast() }
    }

    /// Returns `bytes` of uninitialized storage, aligned for any
    /// scalar type, or `None` when the pool cannot grow the arena.
    /// The region lives until the arena is dropped.
    #[ensures(ret.is_some() ->
              ret.as_ref().unwrap().as_ptr() as usize % MAX_ALIGN == 0,
              "Allocations are aligned for any scalar type.")]
    pub fn alloc(&mut self, bytes: usize) -> Option<NonNull<c_void>> {
        unsafe {
            let core = self.core.as_ptr();
            let current = (*core)
                .chunks
                .front()
                .expect("an arena always has a chunk");
            if let Some(region) = ChunkHeader::bump(current, bytes) {
                return Some(region);
            }

            // The current chunk is full.  Chunks are never revisited:
            // a fresh one becomes current even if older chunks have
            // room, so no allocation ever spans two chunks and no
            // scan is needed.
            let page_size = (*core).pool.page_size();
            let overhead = align_up(mem::size_of::<ChunkHeader>());
            let want = (bytes.checked_add(overhead)?).max((*core).growth_bytes);
            let run = (*core).pool.allocate(pages_for(want, page_size)).ok()?;

            let chunk = run.cast::<ChunkHeader>().as_ptr();
            ChunkHeader::init(chunk, pages_for(want, page_size) * page_size);
            (*core).chunks.push_front(chunk);

            ChunkHeader::bump(chunk, bytes)
        }
    }
}

impl Drop for Arena {
    /// Hands every chunk back to the pool.  The chunk hosting the
    /// control block goes last; the list iterator reads each link
    /// before its chunk is released, and chunk headers sit within the
    /// first page of their runs, which is all `pfree` needs.
    fn drop(&mut self) {
        unsafe {
            let core = self.core.as_ptr();
            let pool = (*core).pool;
            let host = &mut (*core).first as *mut ChunkHeader;

            for chunk in (*core).chunks.iter() {
                if chunk != host {
                    pool.release(chunk as *mut c_void);
                }
            }
            pool.release(host as *mut c_void);
        }
    }
}

//! The page pool vends and reclaims runs of contiguous OS pages.
//!
//! All bookkeeping lives in descriptor slots on ledger pages the pool
//! carves out for itself; a statically reserved block seeds the first
//! slots.  Freed runs are retained on a capped free list and otherwise
//! returned to the OS, with a second-chance sweep deciding when an
//! emptied ledger page follows them.
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
use std::ptr::NonNull;
use std::sync::Mutex;

#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use crate::debug_span_map;

use crate::ledger::BootstrapCell;
use crate::ledger::LedgerHeader;
use crate::list::DList;
use crate::mapper::Mapper;
use crate::run::RunDesc;

/// Most pages the pool keeps mapped but idle.  The comparison below is
/// inclusive, so the retained total can exceed the cap by the length
/// of the last run accepted; once past the cap, freed runs go back to
/// the OS.
#[cfg(not(feature = "test_only_small_constants"))]
pub const FREE_LIST_CAP: usize = 16;

/// Most pages the pool keeps mapped but idle.  The comparison below is
/// inclusive, so the retained total can exceed the cap by the length
/// of the last run accepted; once past the cap, freed runs go back to
/// the OS.
#[cfg(feature = "test_only_small_constants")]
pub const FREE_LIST_CAP: usize = 2;

struct PoolState {
    /// Ledger pages, bootstrap block included once inserted.
    ledgers: DList<LedgerHeader>,
    /// Mapped-but-idle runs retained for reuse.
    free: DList<RunDesc>,
    /// Runs currently held by callers.
    used: DList<RunDesc>,
    /// Cached sum of `pages` over the free list.
    free_pages: usize,
    bootstrapped: bool,
}

// The raw pointers in `PoolState` all target memory the pool owns and
// only touches under the pool's mutex.
unsafe impl Send for PoolState {}

pub struct PagePool {
    mapper: &'static dyn Mapper,
    bootstrap: &'static BootstrapCell,
    state: Mutex<PoolState>,
}

lazy_static::lazy_static! {
    static ref GLOBAL_POOL: PagePool = {
        static BOOTSTRAP: BootstrapCell = BootstrapCell::new();

        PagePool::new(crate::mapper::default_mapper(), &BOOTSTRAP)
    };
}

/// Returns the process-wide page pool.
pub fn global_pool() -> &'static PagePool {
    &GLOBAL_POOL
}

/// Returns the OS page size in bytes, cached on first call.
#[inline]
pub fn page_size() -> usize {
    crate::map::page_size()
}

/// Allocates a run of at least `pages` contiguous, zero-filled,
/// page-aligned pages from the process-wide pool.
///
/// Returns `None` when `pages` is zero or the OS refuses to map more
/// memory.
pub fn palloc(pages: usize) -> Option<NonNull<c_void>> {
    global_pool().allocate(pages).ok()
}

/// Releases a run previously returned by `palloc`.  Any address within
/// the run's first page works; NULL and addresses the pool does not
/// own are ignored.
pub fn pfree(ptr: *mut c_void) {
    global_pool().release(ptr)
}

impl PagePool {
    pub fn new(mapper: &'static dyn Mapper, bootstrap: &'static BootstrapCell) -> PagePool {
        PagePool {
            mapper,
            bootstrap,
            state: Mutex::new(PoolState {
                ledgers: DList::new(),
                free: DList::new(),
                used: DList::new(),
                free_pages: 0,
                bootstrapped: false,
            }),
        }
    }

    pub fn page_size(&self) -> usize {
        self.mapper.page_size()
    }

    /// Allocates a run of at least `pages` contiguous, zero-filled,
    /// page-aligned pages.
    ///
    /// # Errors
    ///
    /// `EINVAL` for a zero page count; the mapping errno when the OS
    /// fails to map and no retained run fits.
    #[ensures(ret.is_ok() ->
              ret.as_ref().unwrap().as_ptr() as usize % self.page_size() == 0,
              "Successful allocations are page-aligned.")]
    #[ensures(ret.is_ok() ->
              debug_span_map::mark_allocated(ret.as_ref().unwrap().as_ptr() as usize, pages).is_ok(),
              "Successful allocations are disjoint from every live run.")]
    pub fn allocate(&self, pages: usize) -> Result<NonNull<c_void>, i32> {
        if pages == 0 {
            return Err(libc::EINVAL);
        }

        let mut state = self.state.lock().unwrap();

        self.ensure_bootstrapped(&mut state);
        let base = self.allocate_locked(&mut state, pages)?;
        Ok(NonNull::new(base as *mut c_void).expect("runs never start at NULL"))
    }

    /// Releases the run whose first page contains `ptr`.  NULL and
    /// unknown addresses are ignored.
    #[requires(debug_span_map::forget(ptr as usize).is_ok(),
               "Released runs leave the live-run map.")]
    pub fn release(&self, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }

        let page_size = self.page_size();
        let base = (ptr as usize) & !(page_size - 1);

        let mut run_unmap = None;
        let mut dead_ledgers: DList<LedgerHeader> = DList::new();
        {
            let mut state = self.state.lock().unwrap();

            let desc = match Self::find_used(&state, base) {
                Some(desc) => desc,
                None => return,
            };

            unsafe {
                state.used.unlink(desc);
                let pages = (*desc).pages();
                let ledger = Self::containing_ledger(&state, desc)
                    .unwrap_or_else(|| panic!("no ledger page contains descriptor {:p}", desc));

                LedgerHeader::clear_mark(ledger);

                if state.free_pages <= FREE_LIST_CAP {
                    state.free.push_front(desc);
                    state.free_pages += pages;
                    // Reused runs are handed out zero-filled, like
                    // fresh maps.
                    std::ptr::write_bytes(base as *mut u8, 0, pages * page_size);
                    return;
                }

                (*desc).vacate();
                run_unmap = Some((base, pages));
                self.sweep_idle_ledgers(&mut state, &mut dead_ledgers);
            }
        }

        // Syscalls happen with the lock dropped.
        if let Some((base, pages)) = run_unmap {
            let base = NonNull::new(base as *mut c_void).expect("runs never start at NULL");
            self.mapper.unmap(base, pages);
        }
        for ledger in dead_ledgers.iter() {
            let base = NonNull::new(ledger as *mut c_void).expect("ledger pages are never at NULL");
            self.mapper.unmap(base, 1);
        }
    }

    /// Links the statically reserved block into the ledger list on the
    /// pool's first allocation.
    fn ensure_bootstrapped(&self, state: &mut PoolState) {
        if state.bootstrapped {
            return;
        }

        unsafe { state.ledgers.push_front(self.bootstrap.header()) };
        state.bootstrapped = true;
    }

    fn allocate_locked(&self, state: &mut PoolState, pages: usize) -> Result<usize, i32> {
        // A descriptor slot first: every path below needs at most one.
        let (slot, ledger) = match Self::find_vacant_slot(state) {
            Some(found) => found,
            None => self.install_ledger(state)?,
        };

        // First fit over the free list, in list order.
        let mut fit = std::ptr::null_mut();
        for desc in state.free.iter() {
            if unsafe { (*desc).pages() } >= pages {
                fit = desc;
                break;
            }
        }

        let base;
        unsafe {
            if fit.is_null() {
                // Nothing retained is big enough; map fresh pages.
                base = self.mapper.map(pages)?.as_ptr() as usize;
                (*slot).occupy(base, pages);
                state.used.push_front(slot);
            } else if (*fit).pages() == pages {
                // Exact fit: the descriptor moves wholesale.
                base = (*fit).base();
                state.free.unlink(fit);
                state.used.push_front(fit);
                state.free_pages -= pages;
            } else {
                // Oversized: take the prefix, leave the tail on the
                // free list under its existing descriptor.
                base = (*fit).base();
                (*fit).trim_front(pages, self.page_size());
                (*slot).occupy(base, pages);
                state.used.push_front(slot);
                state.free_pages -= pages;
            }

            // The ledger that supplied the slot was just used.
            LedgerHeader::clear_mark(ledger);
        }

        Ok(base)
    }

    /// First vacant slot across ledger pages, in list order.
    fn find_vacant_slot(state: &mut PoolState) -> Option<(*mut RunDesc, *mut LedgerHeader)> {
        for ledger in state.ledgers.iter() {
            if let Some(slot) = unsafe { LedgerHeader::find_vacant(ledger) } {
                return Some((slot, ledger));
            }
        }

        None
    }

    /// Installs a fresh ledger page and returns its first slot.
    ///
    /// Ledger pages are never tracked by descriptors, so the page is
    /// carved out without creating bookkeeping of its own.
    fn install_ledger(
        &self,
        state: &mut PoolState,
    ) -> Result<(*mut RunDesc, *mut LedgerHeader), i32> {
        let base = match self.carve_untracked_page(state) {
            Some(base) => base,
            None => self.mapper.map(1)?.as_ptr() as usize,
        };

        let ledger = base as *mut LedgerHeader;
        unsafe {
            LedgerHeader::init_page(ledger, self.page_size());
            state.ledgers.push_front(ledger);
            let slot = LedgerHeader::find_vacant(ledger).expect("a fresh ledger has vacant slots");
            Ok((slot, ledger))
        }
    }

    /// Takes one page off the free list without leaving a descriptor
    /// behind: an exact single-page run vacates its slot, a longer run
    /// shrinks in place.
    fn carve_untracked_page(&self, state: &mut PoolState) -> Option<usize> {
        let desc = state.free.front()?;

        unsafe {
            let base = (*desc).base();
            if (*desc).pages() == 1 {
                state.free.unlink(desc);
                (*desc).vacate();
            } else {
                (*desc).trim_front(1, self.page_size());
            }
            state.free_pages -= 1;
            Some(base)
        }
    }

    fn find_used(state: &PoolState, base: usize) -> Option<*mut RunDesc> {
        state
            .used
            .iter()
            .find(|&desc| unsafe { (*desc).base() } == base)
    }

    /// The ledger page whose slot array holds `desc`.
    fn containing_ledger(state: &PoolState, desc: *mut RunDesc) -> Option<*mut LedgerHeader> {
        state
            .ledgers
            .iter()
            .find(|&ledger| unsafe { LedgerHeader::contains(ledger, desc) })
    }

    /// One pass of the second-chance policy: empty ledger pages seen
    /// for the first time are marked; pages still empty and marked
    /// from an earlier pass are unlinked onto `dead` for unmapping.
    /// The bootstrap block never leaves the list.
    unsafe fn sweep_idle_ledgers(&self, state: &mut PoolState, dead: &mut DList<LedgerHeader>) {
        let bootstrap = self.bootstrap.header();

        for ledger in state.ledgers.iter() {
            if ledger == bootstrap || !LedgerHeader::all_vacant(ledger) {
                continue;
            }

            if LedgerHeader::is_marked(ledger) {
                state.ledgers.unlink(ledger);
                dead.push_front(ledger);
            } else {
                LedgerHeader::mark(ledger);
            }
        }
    }
}

#[cfg(test)]
impl PagePool {
    pub(crate) fn free_page_total(&self) -> usize {
        self.state.lock().unwrap().free_pages
    }

    /// Free runs as `(base, pages)`, front to back.
    pub(crate) fn free_runs(&self) -> Vec<(usize, usize)> {
        let state = self.state.lock().unwrap();
        state
            .free
            .iter()
            .map(|desc| unsafe { ((*desc).base(), (*desc).pages()) })
            .collect()
    }

    pub(crate) fn used_run_count(&self) -> usize {
        self.state.lock().unwrap().used.iter().count()
    }

    pub(crate) fn ledger_count(&self) -> usize {
        self.state.lock().unwrap().ledgers.iter().count()
    }

    /// Asserts against the pool's internal invariants.
    pub(crate) fn check_rep(&self) {
        let page_size = self.page_size();
        let state = self.state.lock().unwrap();

        let ledgers: Vec<_> = state.ledgers.iter().collect();
        if state.bootstrapped {
            assert!(
                ledgers.contains(&self.bootstrap.header()),
                "bootstrap block must stay on the ledger list"
            );
        }

        let mut ranges = Vec::new();
        let mut free_sum = 0;
        for desc in state.free.iter() {
            unsafe {
                assert!(!(*desc).is_vacant());
                free_sum += (*desc).pages();
            }
            ranges.push(desc);
        }
        assert_eq!(
            free_sum, state.free_pages,
            "free_pages must match the free list"
        );

        for desc in state.used.iter() {
            unsafe { assert!(!(*desc).is_vacant()) };
            ranges.push(desc);
        }

        // Every descriptor lives in exactly one ledger; no two runs
        // overlap; no run covers a ledger page.
        let mut spans: Vec<(usize, usize)> = Vec::new();
        for &desc in &ranges {
            unsafe {
                let homes = ledgers
                    .iter()
                    .filter(|&&ledger| LedgerHeader::contains(ledger, desc))
                    .count();
                assert_eq!(homes, 1, "descriptor {:p} must have one home", desc);

                let base = (*desc).base();
                assert_eq!(base % page_size, 0, "runs are page-aligned");
                spans.push((base, (*desc).pages() * page_size));
            }
        }

        spans.sort_unstable();
        for pair in spans.windows(2) {
            assert!(
                pair[0].0 + pair[0].1 <= pair[1].0,
                "live runs must not overlap"
            );
        }

        for &(base, len) in &spans {
            for &ledger in &ledgers {
                if ledger == self.bootstrap.header() {
                    continue;
                }
                let ledger_base = ledger as usize;
                assert!(
                    base + len <= ledger_base || base >= ledger_base + page_size,
                    "runs must not cover ledger pages"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;
    use std::ptr::NonNull;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use proptest::collection::vec;
    use proptest::prelude::*;

    use super::*;
    use crate::ledger::STATIC_SLOT_COUNT;

    /// Counts mapper traffic so tests can observe the eviction and
    /// second-chance policies.
    #[derive(Debug)]
    struct CountingMapper {
        maps: AtomicUsize,
        unmaps: AtomicUsize,
    }

    impl CountingMapper {
        fn new() -> CountingMapper {
            CountingMapper {
                maps: AtomicUsize::new(0),
                unmaps: AtomicUsize::new(0),
            }
        }

        fn maps(&self) -> usize {
            self.maps.load(Ordering::Relaxed)
        }

        fn unmaps(&self) -> usize {
            self.unmaps.load(Ordering::Relaxed)
        }
    }

    impl Mapper for CountingMapper {
        fn page_size(&self) -> usize {
            crate::map::page_size()
        }

        fn map(&self, pages: usize) -> Result<NonNull<c_void>, i32> {
            self.maps.fetch_add(1, Ordering::Relaxed);
            crate::map::map_pages(pages)
        }

        fn unmap(&self, base: NonNull<c_void>, pages: usize) {
            self.unmaps.fetch_add(1, Ordering::Relaxed);
            crate::map::unmap_pages(base, pages)
        }
    }

    fn test_pool() -> &'static PagePool {
        let bootstrap = Box::leak(Box::new(BootstrapCell::new()));
        Box::leak(Box::new(PagePool::new(
            crate::mapper::default_mapper(),
            bootstrap,
        )))
    }

    fn counting_pool() -> (&'static PagePool, &'static CountingMapper) {
        let mapper = Box::leak(Box::new(CountingMapper::new()));
        let bootstrap = Box::leak(Box::new(BootstrapCell::new()));
        let pool = Box::leak(Box::new(PagePool::new(mapper, bootstrap)));
        (pool, mapper)
    }

    fn fill(base: usize, pages: usize, byte: u8) {
        unsafe {
            std::ptr::write_bytes(base as *mut u8, byte, pages * crate::map::page_size());
        }
    }

    #[test]
    fn zero_page_count_is_rejected() {
        let pool = test_pool();

        assert_eq!(pool.allocate(0).unwrap_err(), libc::EINVAL);
        assert_eq!(pool.free_page_total(), 0);
        assert_eq!(pool.ledger_count(), 0, "a rejected call must not bootstrap");
    }

    #[test]
    fn single_alloc_free_cycle() {
        let pool = test_pool();

        let run = pool.allocate(1).expect("allocation should succeed");
        let base = run.as_ptr() as usize;
        assert_eq!(base % pool.page_size(), 0);
        fill(base, 1, 0xAB);

        pool.release(run.as_ptr());
        assert_eq!(pool.free_page_total(), 1);
        assert_eq!(pool.free_runs(), vec![(base, 1)]);
        assert_eq!(pool.used_run_count(), 0);
        pool.check_rep();
    }

    #[test]
    fn split_reuses_the_prefix() {
        let pool = test_pool();
        let page_size = pool.page_size();

        let a = pool.allocate(4).expect("allocation should succeed");
        let a_base = a.as_ptr() as usize;
        pool.release(a.as_ptr());
        assert_eq!(pool.free_page_total(), 4);

        let b = pool.allocate(1).expect("allocation should succeed");
        assert_eq!(b.as_ptr() as usize, a_base, "the prefix is reused");
        assert_eq!(pool.free_page_total(), 3);
        assert_eq!(pool.free_runs(), vec![(a_base + page_size, 3)]);
        pool.check_rep();

        pool.release(b.as_ptr());
        pool.check_rep();
    }

    #[test]
    fn zeroed_on_reuse() {
        let pool = test_pool();

        let run = pool.allocate(2).expect("allocation should succeed");
        let base = run.as_ptr() as usize;
        fill(base, 2, 0xFF);
        pool.release(run.as_ptr());

        let again = pool.allocate(2).expect("allocation should succeed");
        assert_eq!(again.as_ptr() as usize, base, "the retained run is reused");

        let bytes = unsafe {
            std::slice::from_raw_parts(base as *const u8, 2 * pool.page_size())
        };
        assert!(bytes.iter().all(|&byte| byte == 0));

        pool.release(again.as_ptr());
    }

    #[test]
    fn unknown_frees_are_ignored() {
        let pool = test_pool();

        pool.release(std::ptr::null_mut());

        let run = pool.allocate(1).expect("allocation should succeed");
        let base = run.as_ptr() as usize;

        // A stranger address, aligned or not, is a no-op.
        pool.release((base + 7 * pool.page_size()) as *mut c_void);
        pool.release(0x1 as *mut c_void);
        assert_eq!(pool.used_run_count(), 1);

        // Any address within the first page releases the run.
        pool.release((base + pool.page_size() / 2) as *mut c_void);
        assert_eq!(pool.used_run_count(), 0);
        assert_eq!(pool.free_page_total(), 1);

        // Freeing it again is a no-op.
        pool.release(base as *mut c_void);
        assert_eq!(pool.free_page_total(), 1);
        pool.check_rep();
    }

    #[test]
    fn free_list_caps_and_evicts() {
        let (pool, mapper) = counting_pool();
        let count = FREE_LIST_CAP + 4;

        let runs: Vec<_> = (0..count)
            .map(|_| pool.allocate(1).expect("allocation should succeed"))
            .collect();
        assert_eq!(mapper.maps(), count);

        for run in &runs {
            pool.release(run.as_ptr());
        }

        // The comparison against the cap is inclusive, so one more
        // page than the cap sticks around; the rest went back.
        assert_eq!(pool.free_page_total(), FREE_LIST_CAP + 1);
        assert_eq!(mapper.unmaps(), count - (FREE_LIST_CAP + 1));
        pool.check_rep();
    }

    #[test]
    fn slot_exhaustion_births_one_ledger() {
        let (pool, mapper) = counting_pool();

        let runs: Vec<_> = (0..STATIC_SLOT_COUNT + 1)
            .map(|_| pool.allocate(1).expect("allocation should succeed"))
            .collect();

        // One map per run, plus exactly one for the new ledger page.
        assert_eq!(mapper.maps(), STATIC_SLOT_COUNT + 2);
        assert_eq!(pool.ledger_count(), 2);

        let mut bases: Vec<_> = runs.iter().map(|run| run.as_ptr() as usize).collect();
        bases.sort_unstable();
        bases.dedup();
        assert_eq!(bases.len(), STATIC_SLOT_COUNT + 1, "runs are distinct");
        assert!(bases.iter().all(|base| base % pool.page_size() == 0));
        pool.check_rep();

        for run in &runs {
            pool.release(run.as_ptr());
        }
        pool.check_rep();
    }

    // Walk a non-static ledger page through the second-chance states:
    // emptied once it survives, touched it loses the mark, emptied
    // and swept again it goes back to the OS.
    #[test]
    fn ledger_second_chance() {
        let (pool, mapper) = counting_pool();

        // `filler` runs pin the free list above its cap; `keepers`
        // fill the rest of the bootstrap block and stay live so later
        // frees have bootstrap descriptors to work with.
        let filler_count = FREE_LIST_CAP + 2;
        let keeper_count = STATIC_SLOT_COUNT - filler_count;
        assert!(keeper_count >= 1);

        let fillers: Vec<_> = (0..filler_count)
            .map(|_| pool.allocate(1).expect("allocation should succeed"))
            .collect();
        let keepers: Vec<_> = (0..keeper_count)
            .map(|_| pool.allocate(1).expect("allocation should succeed"))
            .collect();

        // Retains up to the cap, then starts unmapping and vacating
        // bootstrap slots.
        for run in &fillers {
            pool.release(run.as_ptr());
        }
        assert_eq!(pool.free_page_total(), FREE_LIST_CAP + 1);

        // Refill the vacated bootstrap slots so the next allocations
        // must go to a fresh ledger.  Two-page requests never fit the
        // retained single-page runs.
        let plug = pool.allocate(2).expect("allocation should succeed");
        assert_eq!(pool.ledger_count(), 1);

        let first = pool.allocate(2).expect("allocation should succeed");
        assert_eq!(pool.ledger_count(), 2, "slot exhaustion births a ledger");
        let second = pool.allocate(2).expect("allocation should succeed");

        // Push the free list back over its cap, then free the new
        // ledger's runs: the page empties but survives with a mark.
        pool.release(plug.as_ptr());
        assert!(pool.free_page_total() > FREE_LIST_CAP);
        pool.release(first.as_ptr());
        assert_eq!(pool.ledger_count(), 2);
        pool.release(second.as_ptr());
        assert_eq!(pool.ledger_count(), 2, "an emptied ledger gets a second chance");

        // An allocation touches the empty ledger (its slot array is
        // scanned first) and clears the mark.
        let touch = pool.allocate(3).expect("allocation should succeed");
        assert_eq!(pool.ledger_count(), 2, "a marked ledger is still usable");

        // Empty it again: first sweep re-marks, the next sweep (from
        // a bootstrap-descriptor free) finally unmaps it.
        pool.release(touch.as_ptr());
        assert_eq!(pool.ledger_count(), 2);

        let unmaps_before = mapper.unmaps();
        pool.release(keepers[0].as_ptr());
        assert_eq!(pool.ledger_count(), 1, "the ledger page is reclaimed");
        assert_eq!(
            mapper.unmaps(),
            unmaps_before + 2,
            "the freed run and the ledger page both go back"
        );
        pool.check_rep();

        for run in &keepers[1..] {
            pool.release(run.as_ptr());
        }
        assert_eq!(pool.used_run_count(), 0);
        pool.check_rep();
    }

    #[test]
    fn concurrent_alloc_free() {
        let pool = test_pool();

        let threads: Vec<_> = (0..4usize)
            .map(|seed| {
                std::thread::spawn(move || {
                    let mut held = Vec::new();
                    for iteration in 0..50usize {
                        let pages = 1 + (iteration + seed) % 3;
                        let run = pool.allocate(pages).expect("allocation should succeed");
                        fill(run.as_ptr() as usize, pages, seed as u8 + 1);
                        held.push(run);

                        if iteration % 2 == 1 {
                            let victim = held.remove(0);
                            pool.release(victim.as_ptr());
                        }
                    }
                    for run in held {
                        pool.release(run.as_ptr());
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().expect("worker should not panic");
        }

        assert_eq!(pool.used_run_count(), 0);
        pool.check_rep();
    }

    #[test]
    fn global_pool_smoke() {
        assert!(palloc(0).is_none());
        pfree(std::ptr::null_mut());

        let run = palloc(1).expect("allocation should succeed");
        assert_eq!(run.as_ptr() as usize % page_size(), 0);
        fill(run.as_ptr() as usize, 1, 0xAB);
        pfree(run.as_ptr());
    }

    fn overlaps(a: (usize, usize), b: (usize, usize)) -> bool {
        let page_size = crate::map::page_size();
        a.0 < b.0 + b.1 * page_size && b.0 < a.0 + a.1 * page_size
    }

    proptest! {
        // Allocate and free runs of a few pages in random-ish order;
        // every live run must stay disjoint from the others.
        #[test]
        fn random_order(ops in vec((0..12usize, 1..4usize), 1..40)) {
            let pool = test_pool();
            let mut slots: Vec<Option<(usize, usize)>> = vec![None; 12];

            for (index, pages) in ops {
                match slots[index].take() {
                    Some((base, _)) => pool.release(base as *mut c_void),
                    None => {
                        let run = pool.allocate(pages).expect("allocation should succeed");
                        let base = run.as_ptr() as usize;

                        prop_assert_eq!(base % pool.page_size(), 0);
                        for live in slots.iter().flatten() {
                            prop_assert!(!overlaps((base, pages), *live));
                        }

                        fill(base, pages, 0x5A);
                        slots[index] = Some((base, pages));
                    }
                }
            }

            for slot in slots.iter_mut() {
                if let Some((base, _)) = slot.take() {
                    pool.release(base as *mut c_void);
                }
            }

            prop_assert_eq!(pool.used_run_count(), 0);
            pool.check_rep();
        }
    }
}

//! Ledger pages: page-sized stores for run descriptors.
//!
//! Every descriptor lives in the slot array of exactly one ledger
//! page.  Ledger pages themselves are single pages carved out by the
//! pool, except for the statically reserved bootstrap block, which
//! shares their layout and breaks the cycle between "metadata lives on
//! allocated pages" and "allocating needs a metadata slot".
use std::cell::UnsafeCell;
use std::mem;

use static_assertions::const_assert;
use static_assertions::const_assert_eq;

use crate::list::DLink;
use crate::list::DLinked;
use crate::run::RunDesc;

/// Number of descriptor slots in the statically reserved bootstrap
/// block.
#[cfg(not(feature = "test_only_small_constants"))]
pub const STATIC_SLOT_COUNT: usize = 32;

/// Number of descriptor slots in the statically reserved bootstrap
/// block.
#[cfg(feature = "test_only_small_constants")]
pub const STATIC_SLOT_COUNT: usize = 6;

/// Header at the base of every ledger page, directly followed by
/// `capacity` descriptor slots.
#[repr(C)]
pub struct LedgerHeader {
    pub link: DLink, // Must stay the first field.
    capacity: usize,
    /// Second-chance flag: set when an empty scan saw every slot
    /// vacant, cleared when a slot is allocated or freed.  A page seen
    /// empty twice in a row with no touch in between is unmapped.
    marked: bool,
}

unsafe impl DLinked for LedgerHeader {
    fn link(this: *mut LedgerHeader) -> *mut DLink {
        unsafe { &mut (*this).link }
    }
}

// The slot array begins immediately after the header and must be
// aligned for descriptors.
const_assert_eq!(
    mem::size_of::<LedgerHeader>() % mem::align_of::<RunDesc>(),
    0
);

impl LedgerHeader {
    /// Descriptor slots that fit in one `page_bytes`-sized ledger page
    /// after the header.
    pub fn capacity_for(page_bytes: usize) -> usize {
        (page_bytes - mem::size_of::<LedgerHeader>()) / mem::size_of::<RunDesc>()
    }

    /// Initializes a fresh ledger page at `this`, spanning `page_bytes`
    /// bytes: header plus all-vacant slots.
    ///
    /// # Safety
    ///
    /// `this` must point to `page_bytes` of writable, page-aligned
    /// memory owned by the caller.
    pub unsafe fn init_page(this: *mut LedgerHeader, page_bytes: usize) {
        let capacity = Self::capacity_for(page_bytes);
        assert!(capacity > 0, "Bad ledger page size={}", page_bytes);

        this.write(LedgerHeader {
            link: DLink::new(),
            capacity,
            marked: false,
        });

        let slots = Self::slots(this);
        for index in 0..capacity {
            slots.add(index).write(RunDesc::vacant());
        }
    }

    /// First slot of the embedded descriptor array.
    ///
    /// # Safety
    ///
    /// `this` must point to an initialized ledger.
    pub unsafe fn slots(this: *mut LedgerHeader) -> *mut RunDesc {
        this.add(1) as *mut RunDesc
    }

    /// First vacant slot, if any.
    ///
    /// # Safety
    ///
    /// `this` must point to an initialized ledger.
    pub unsafe fn find_vacant(this: *mut LedgerHeader) -> Option<*mut RunDesc> {
        let slots = Self::slots(this);

        for index in 0..(*this).capacity {
            let slot = slots.add(index);
            if (*slot).is_vacant() {
                return Some(slot);
            }
        }

        None
    }

    /// True when every slot is vacant.
    ///
    /// # Safety
    ///
    /// `this` must point to an initialized ledger.
    pub unsafe fn all_vacant(this: *mut LedgerHeader) -> bool {
        let slots = Self::slots(this);

        (0..(*this).capacity).all(|index| (*slots.add(index)).is_vacant())
    }

    /// Does `desc` live in this ledger's slot array?
    ///
    /// # Safety
    ///
    /// `this` must point to an initialized ledger.
    pub unsafe fn contains(this: *mut LedgerHeader, desc: *mut RunDesc) -> bool {
        let first = Self::slots(this) as usize;
        let end = first + (*this).capacity * mem::size_of::<RunDesc>();
        let addr = desc as usize;

        addr >= first && addr < end
    }

    /// # Safety
    ///
    /// `this` must point to an initialized ledger.
    pub unsafe fn is_marked(this: *mut LedgerHeader) -> bool {
        (*this).marked
    }

    /// # Safety
    ///
    /// `this` must point to an initialized ledger.
    pub unsafe fn mark(this: *mut LedgerHeader) {
        (*this).marked = true;
    }

    /// # Safety
    ///
    /// `this` must point to an initialized ledger.
    pub unsafe fn clear_mark(this: *mut LedgerHeader) {
        (*this).marked = false;
    }
}

/// The statically reserved descriptor store.  Same layout as a ledger
/// page, sized by `STATIC_SLOT_COUNT` instead of the page size.
#[repr(C)]
struct BootstrapBlock {
    header: LedgerHeader,
    // Reached through the header's slot array, never by name.
    #[allow(dead_code)]
    slots: [RunDesc; STATIC_SLOT_COUNT],
}

// The bootstrap block must stay small enough that linking it into the
// ledger list never surprises anyone who sized buffers by the page.
const_assert!(mem::size_of::<BootstrapBlock>() <= 4096);

const VACANT_SLOT: RunDesc = RunDesc::vacant();

/// Interior-mutable holder for a `BootstrapBlock` in static storage.
/// The block is only ever touched under its owning pool's lock.
pub struct BootstrapCell(UnsafeCell<BootstrapBlock>);

unsafe impl Sync for BootstrapCell {}

impl BootstrapCell {
    pub const fn new() -> BootstrapCell {
        BootstrapCell(UnsafeCell::new(BootstrapBlock {
            header: LedgerHeader {
                link: DLink::new(),
                capacity: STATIC_SLOT_COUNT,
                marked: false,
            },
            slots: [VACANT_SLOT; STATIC_SLOT_COUNT],
        }))
    }

    /// The block's ledger header, ready to link into a pool's ledger
    /// list.
    pub fn header(&self) -> *mut LedgerHeader {
        unsafe { &mut (*self.0.get()).header }
    }
}

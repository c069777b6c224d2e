//! # Kernel virtual address space layout
//!
//! The layout is fixed per paging mode; only the start of the non-paged pool
//! moves, since it begins right after the PFN database.
//!
//! | Region          | 4-level                   | 5-level                   | x86 (2-/3-level)          |
//! |-----------------|---------------------------|---------------------------|---------------------------|
//! | User space end  | `0x0000_07FF_FFFE_FFFF`   | `0x00FF_FFFF_FFFE_FFFF`   | `0x7FFE_FFFF`             |
//! | Self-map        | `0xFFFF_F680_0000_0000`   | `0xFFED_0000_0000_0000`   | `0xC000_0000`             |
//! | Hyperspace      | `0xFFFF_F700_0000_0000`   | `0xFFFE_F700_0000_0000`   | `0xC040_0000` / `0xC080_0000` |
//! | Paged pool      | `0xFFFF_F8A0_0000_0000`   | `0xFFFE_F8A0_0000_0000`   | `0xE200_0000`             |
//! | PFN database    | `0xFFFF_FA80_0000_0000`   | `0xFFFE_FA80_0000_0000`   | `0xB000_0000`             |
//! | Non-paged pool  | after the PFN database    | after the PFN database    | after the PFN database    |

use crate::error::MmError;
use crate::paging::PagingMode;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_sync::BootOnceCell;
use log::info;

/// Fixed addresses of one paging mode.
struct Regions {
    user_space_end: u64,
    hyper_space_start: u64,
    hyper_space_end: u64,
    paged_pool_start: u64,
    paged_pool_end: u64,
    pfn_database: u64,
    non_paged_pool_end: u64,
}

const FOUR_LEVEL: Regions = Regions {
    user_space_end: 0x0000_07FF_FFFE_FFFF,
    hyper_space_start: 0xFFFF_F700_0000_0000,
    hyper_space_end: 0xFFFF_F77F_FFFF_FFFF,
    paged_pool_start: 0xFFFF_F8A0_0000_0000,
    paged_pool_end: 0xFFFF_F8BF_FFFF_FFFF,
    pfn_database: 0xFFFF_FA80_0000_0000,
    non_paged_pool_end: 0xFFFF_FFFF_FFBF_FFFF,
};

const FIVE_LEVEL: Regions = Regions {
    user_space_end: 0x00FF_FFFF_FFFE_FFFF,
    hyper_space_start: 0xFFFE_F700_0000_0000,
    hyper_space_end: 0xFFFE_F77F_FFFF_FFFF,
    paged_pool_start: 0xFFFE_F8A0_0000_0000,
    paged_pool_end: 0xFFFE_F8BF_FFFF_FFFF,
    pfn_database: 0xFFFE_FA80_0000_0000,
    non_paged_pool_end: 0xFFFE_FFFF_FFFF_FFFF,
};

const TWO_LEVEL: Regions = Regions {
    user_space_end: 0x7FFE_FFFF,
    hyper_space_start: 0xC040_0000,
    hyper_space_end: 0xC07F_FFFF,
    paged_pool_start: 0xE200_0000,
    paged_pool_end: 0xEFFF_FFFF,
    pfn_database: 0xB000_0000,
    non_paged_pool_end: 0xBFFF_FFFF,
};

const THREE_LEVEL: Regions = Regions {
    hyper_space_start: 0xC080_0000,
    hyper_space_end: 0xC0BF_FFFF,
    ..TWO_LEVEL
};

/// The computed kernel address space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryLayout {
    pub pfn_database: VirtualAddress,
    pub pfn_database_pages: u64,
    pub non_paged_pool_start: VirtualAddress,
    pub non_paged_pool_end: VirtualAddress,
    pub paged_pool_start: VirtualAddress,
    pub paged_pool_end: VirtualAddress,
    pub hyper_space_start: VirtualAddress,
    pub hyper_space_end: VirtualAddress,
    pub user_space_end: VirtualAddress,
}

impl MemoryLayout {
    /// Lays out the kernel address space for `mode` with a PFN database of
    /// `pfn_database_pages` pages.
    ///
    /// # Errors
    /// [`MmError::PfnDatabaseTooLarge`] if the database would run past the
    /// end of the non-paged pool.
    pub fn compute(mode: PagingMode, pfn_database_pages: u64) -> Result<Self, MmError> {
        let regions = match mode {
            PagingMode::TwoLevel => &TWO_LEVEL,
            PagingMode::ThreeLevel => &THREE_LEVEL,
            PagingMode::FourLevel => &FOUR_LEVEL,
            PagingMode::FiveLevel => &FIVE_LEVEL,
        };

        let too_large = MmError::PfnDatabaseTooLarge {
            pages: pfn_database_pages,
        };
        let non_paged_pool_start = pfn_database_pages
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| regions.pfn_database.checked_add(bytes))
            .ok_or(too_large)?;
        if non_paged_pool_start >= regions.non_paged_pool_end {
            return Err(too_large);
        }

        Ok(Self {
            pfn_database: VirtualAddress::new(regions.pfn_database),
            pfn_database_pages,
            non_paged_pool_start: VirtualAddress::new(non_paged_pool_start),
            non_paged_pool_end: VirtualAddress::new(regions.non_paged_pool_end),
            paged_pool_start: VirtualAddress::new(regions.paged_pool_start),
            paged_pool_end: VirtualAddress::new(regions.paged_pool_end),
            hyper_space_start: VirtualAddress::new(regions.hyper_space_start),
            hyper_space_end: VirtualAddress::new(regions.hyper_space_end),
            user_space_end: VirtualAddress::new(regions.user_space_end),
        })
    }

    /// Last byte of the PFN database.
    #[must_use]
    pub fn pfn_database_end(&self) -> VirtualAddress {
        VirtualAddress::new(self.non_paged_pool_start.as_u64() - 1)
    }
}

static MEMORY_LAYOUT: BootOnceCell<MemoryLayout> = BootOnceCell::new();

/// Makes `layout` the system memory layout.
///
/// # Errors
/// [`MmError::LayoutAlreadyPublished`] on a second call.
pub fn publish_memory_layout(layout: MemoryLayout) -> Result<&'static MemoryLayout, MmError> {
    let layout = MEMORY_LAYOUT
        .set(layout)
        .map_err(|_| MmError::LayoutAlreadyPublished)?;
    info!(
        "memory layout: PFN database {} ({} pages), non-paged pool {}..={}, paged pool {}..={}, hyperspace {}..={}, user space ..={}",
        layout.pfn_database,
        layout.pfn_database_pages,
        layout.non_paged_pool_start,
        layout.non_paged_pool_end,
        layout.paged_pool_start,
        layout.paged_pool_end,
        layout.hyper_space_start,
        layout.hyper_space_end,
        layout.user_space_end,
    );
    Ok(layout)
}

/// The published system memory layout.
#[must_use]
pub fn memory_layout() -> Option<&'static MemoryLayout> {
    MEMORY_LAYOUT.get()
}

//! # Physical page accounting
//!
//! [`PfnAccounting::scan_memory_descriptors`] folds the loader's memory map
//! into the physical range the PFN database has to cover and picks the largest
//! free run as the source of bootstrap pages. Until the PFN database exists,
//! every page the memory manager needs for its own page tables comes from
//! that run through [`PfnAccounting::allocate_bootstrap_pages`].

use crate::error::BootstrapAllocError;
use kernel_info::descriptor::LoaderMemoryDescriptor;
use kernel_info::memory::MINIMUM_PHYSICAL_PAGES;
use kernel_memory_addresses::{PAGE_SIZE, PageFrameNumber};
use log::{debug, trace, warn};

/// One record of the PFN database.
///
/// Only its size matters during bootstrap; the database itself is filled in
/// once the memory manager can allocate from it.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct MmPfn {
    /// Next page on the list this page belongs to.
    pub flink: usize,
    /// Address of the PTE mapping this page.
    pub pte_address: usize,
    /// Previous page on the list, or the share count once the page is active.
    pub blink: usize,
    pub reference_count: u16,
    pub page_location: u8,
    pub flags: u8,
    pub original_pte: u64,
    /// Page color, or the parent table frame once the page is active.
    pub parent: usize,
}

#[cfg(target_pointer_width = "64")]
const _: () = assert!(size_of::<MmPfn>() == 48);

/// Physical memory as reported by the loader.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PfnAccounting {
    lowest_physical_page: PageFrameNumber,
    highest_physical_page: PageFrameNumber,
    number_of_physical_pages: u64,
    /// The bootstrap run; shrinks from the front as pages are handed out.
    free_descriptor: Option<LoaderMemoryDescriptor>,
    /// The bootstrap run as the loader reported it.
    original_free_descriptor: Option<LoaderMemoryDescriptor>,
}

impl PfnAccounting {
    /// Scans the loader memory map.
    ///
    /// Invisible and hardware-cached runs are skipped entirely. Bad runs
    /// extend the physical range but add no usable pages. Among free runs the
    /// largest becomes the bootstrap run; on a tie, the later one wins.
    #[must_use]
    pub fn scan_memory_descriptors(descriptors: &[LoaderMemoryDescriptor]) -> Self {
        let mut lowest = u64::MAX;
        let mut highest = 0;
        let mut pages: u64 = 0;
        let mut free: Option<LoaderMemoryDescriptor> = None;

        for descriptor in descriptors {
            let ty = descriptor.memory_type;
            if ty.is_invisible() || ty.is_hardware_cached() {
                continue;
            }
            let Some(last) = descriptor.last_page() else {
                if descriptor.page_count != 0 {
                    warn!(
                        "skipping memory descriptor at frame {:#x}: {:#x} pages wrap the frame space",
                        descriptor.base_page, descriptor.page_count
                    );
                }
                continue;
            };

            if !ty.is_bad() {
                let Some(total) = pages.checked_add(descriptor.page_count) else {
                    warn!(
                        "skipping memory descriptor at frame {:#x}: page total overflows",
                        descriptor.base_page
                    );
                    continue;
                };
                pages = total;
            }
            lowest = lowest.min(descriptor.base_page);
            highest = highest.max(last);

            if ty.is_free() && free.is_none_or(|f| descriptor.page_count >= f.page_count) {
                free = Some(*descriptor);
            }
        }

        if lowest == u64::MAX {
            lowest = 0;
        }

        debug!(
            "physical memory: {pages} pages, frames {lowest:#x}..={highest:#x}, bootstrap run {:?}",
            free.map(|f| (f.base_page, f.page_count))
        );

        Self {
            lowest_physical_page: PageFrameNumber::new(lowest),
            highest_physical_page: PageFrameNumber::new(highest),
            number_of_physical_pages: pages,
            free_descriptor: free,
            original_free_descriptor: free,
        }
    }

    /// Takes `count` contiguous pages from the front of the bootstrap run.
    ///
    /// # Errors
    /// * [`BootstrapAllocError::ZeroPages`] for `count == 0`.
    /// * [`BootstrapAllocError::NoFreeDescriptor`] if the loader reported no free run.
    /// * [`BootstrapAllocError::Exhausted`] if fewer than `count` pages remain.
    pub fn allocate_bootstrap_pages(&mut self, count: u64) -> Result<PageFrameNumber, BootstrapAllocError> {
        if count == 0 {
            return Err(BootstrapAllocError::ZeroPages);
        }
        let run = self
            .free_descriptor
            .as_mut()
            .ok_or(BootstrapAllocError::NoFreeDescriptor)?;
        if count > run.page_count {
            return Err(BootstrapAllocError::Exhausted {
                requested: count,
                remaining: run.page_count,
            });
        }

        let pfn = PageFrameNumber::new(run.base_page);
        run.base_page += count;
        run.page_count -= count;
        trace!("bootstrap: {count} page(s) at {pfn}");
        Ok(pfn)
    }

    #[must_use]
    pub const fn lowest_physical_page(&self) -> PageFrameNumber {
        self.lowest_physical_page
    }

    #[must_use]
    pub const fn highest_physical_page(&self) -> PageFrameNumber {
        self.highest_physical_page
    }

    /// Usable pages: every visible page that is not bad.
    #[must_use]
    pub const fn number_of_physical_pages(&self) -> u64 {
        self.number_of_physical_pages
    }

    #[must_use]
    pub const fn remaining_bootstrap_pages(&self) -> u64 {
        match self.free_descriptor {
            Some(run) => run.page_count,
            None => 0,
        }
    }

    /// The bootstrap run before any page was taken from it.
    #[must_use]
    pub const fn original_free_descriptor(&self) -> Option<LoaderMemoryDescriptor> {
        self.original_free_descriptor
    }

    /// Pages taken from the bootstrap run so far.
    #[must_use]
    pub const fn bootstrap_pages_used(&self) -> u64 {
        match self.original_free_descriptor {
            Some(run) => run.page_count - self.remaining_bootstrap_pages(),
            None => 0,
        }
    }

    /// Pages needed to hold one [`MmPfn`] for every frame up to the highest.
    ///
    /// Saturates for a frame range no database could cover; the memory
    /// layout rejects such a size.
    #[must_use]
    pub const fn pfn_database_size(&self) -> u64 {
        let bytes = self
            .highest_physical_page
            .as_u64()
            .saturating_add(1)
            .saturating_mul(size_of::<MmPfn>() as u64);
        bytes.div_ceil(PAGE_SIZE)
    }

    /// Whether enough memory was reported to run the kernel.
    #[must_use]
    pub const fn has_minimum_memory(&self) -> bool {
        self.number_of_physical_pages >= MINIMUM_PHYSICAL_PAGES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::descriptor::LoaderMemoryType as T;

    fn d(ty: T, base: u64, count: u64) -> LoaderMemoryDescriptor {
        LoaderMemoryDescriptor::new(ty, base, count)
    }

    #[test]
    fn scan_folds_range_and_counts() {
        let pfn = PfnAccounting::scan_memory_descriptors(&[
            d(T::FIRMWARE_TEMPORARY, 0x10, 0x20),
            d(T::BAD, 0x5000, 0x10),
            d(T::SYSTEM_CODE, 0x100, 0x80),
            d(T::FREE, 0x200, 0x400),
        ]);
        assert_eq!(pfn.lowest_physical_page(), PageFrameNumber::new(0x10));
        assert_eq!(pfn.highest_physical_page(), PageFrameNumber::new(0x500F));
        assert_eq!(pfn.number_of_physical_pages(), 0x20 + 0x80 + 0x400);
        assert_eq!(pfn.original_free_descriptor(), Some(d(T::FREE, 0x200, 0x400)));
    }

    #[test]
    fn invisible_and_cached_runs_are_ignored() {
        let pfn = PfnAccounting::scan_memory_descriptors(&[
            d(T::FREE, 0x100, 0x10),
            d(T::FIRMWARE_PERMANENT, 0x0, 0x100_0000),
            d(T::HAL_CACHED_MEMORY, 0x9_0000, 0x10),
        ]);
        assert_eq!(pfn.lowest_physical_page(), PageFrameNumber::new(0x100));
        assert_eq!(pfn.highest_physical_page(), PageFrameNumber::new(0x10F));
        assert_eq!(pfn.number_of_physical_pages(), 0x10);
    }

    #[test]
    fn largest_free_run_wins_and_ties_go_to_the_later_one() {
        let pfn = PfnAccounting::scan_memory_descriptors(&[
            d(T::FREE, 0x100, 0x40),
            d(T::LOADED_PROGRAM, 0x400, 0x80),
            d(T::FREE, 0x800, 0x80),
            d(T::FREE, 0x1000, 0x20),
        ]);
        assert_eq!(pfn.original_free_descriptor(), Some(d(T::FREE, 0x800, 0x80)));
    }

    #[test]
    fn bootstrap_pages_come_from_the_front() {
        let mut pfn = PfnAccounting::scan_memory_descriptors(&[d(T::FREE, 0x200, 10)]);
        assert_eq!(pfn.allocate_bootstrap_pages(3), Ok(PageFrameNumber::new(0x200)));
        assert_eq!(pfn.allocate_bootstrap_pages(1), Ok(PageFrameNumber::new(0x203)));
        assert_eq!(pfn.remaining_bootstrap_pages(), 6);
        assert_eq!(pfn.bootstrap_pages_used(), 4);
        assert_eq!(pfn.original_free_descriptor(), Some(d(T::FREE, 0x200, 10)));
    }

    #[test]
    fn bootstrap_allocations_until_exhaustion() {
        for n in 1..=7 {
            let total = 20;
            let mut pfn = PfnAccounting::scan_memory_descriptors(&[d(T::FREE, 0x1000, total)]);
            let mut successes = 0;
            let mut previous = None;
            while let Ok(page) = pfn.allocate_bootstrap_pages(n) {
                if let Some(prev) = previous {
                    assert_eq!(page - prev, n);
                }
                previous = Some(page);
                successes += 1;
            }
            assert_eq!(successes, total / n, "n = {n}");
            assert_eq!(
                pfn.allocate_bootstrap_pages(n),
                Err(BootstrapAllocError::Exhausted {
                    requested: n,
                    remaining: total % n
                })
            );
        }
    }

    #[test]
    fn bootstrap_without_free_memory() {
        let mut pfn = PfnAccounting::scan_memory_descriptors(&[d(T::SYSTEM_CODE, 0x100, 0x10)]);
        assert_eq!(pfn.allocate_bootstrap_pages(1), Err(BootstrapAllocError::NoFreeDescriptor));
        assert_eq!(pfn.allocate_bootstrap_pages(0), Err(BootstrapAllocError::ZeroPages));
        assert_eq!(pfn.remaining_bootstrap_pages(), 0);
    }

    #[test]
    fn empty_map_yields_no_pages() {
        let pfn = PfnAccounting::scan_memory_descriptors(&[d(T::BAD, 0x100, 0x800), d(T::SPECIAL_MEMORY, 0, 0x800)]);
        assert_eq!(pfn.number_of_physical_pages(), 0);
        assert!(!pfn.has_minimum_memory());
        assert!(pfn.lowest_physical_page() <= pfn.highest_physical_page());

        let none = PfnAccounting::scan_memory_descriptors(&[]);
        assert_eq!(none.lowest_physical_page(), PageFrameNumber::ZERO);
        assert_eq!(none.highest_physical_page(), PageFrameNumber::ZERO);
    }

    #[test]
    fn wrapping_descriptor_is_skipped() {
        let pfn = PfnAccounting::scan_memory_descriptors(&[
            d(T::FREE, u64::MAX - 4, 0x10),
            d(T::FREE, 0x100, 0x20),
        ]);
        assert_eq!(pfn.number_of_physical_pages(), 0x20);
        assert_eq!(pfn.highest_physical_page(), PageFrameNumber::new(0x11F));
        assert_eq!(pfn.original_free_descriptor(), Some(d(T::FREE, 0x100, 0x20)));
    }

    #[test]
    fn page_total_never_wraps() {
        let pfn = PfnAccounting::scan_memory_descriptors(&[
            d(T::FREE, 0, u64::MAX - 1),
            d(T::LOADED_PROGRAM, 0, 0x10),
        ]);
        assert_eq!(pfn.number_of_physical_pages(), u64::MAX - 1);
    }

    #[test]
    fn oversized_frame_range_is_rejected_by_the_layout() {
        let pfn = PfnAccounting::scan_memory_descriptors(&[d(T::FREE, u64::MAX - 0xF, 0x10)]);
        assert_eq!(pfn.highest_physical_page(), PageFrameNumber::new(u64::MAX));
        assert_eq!(pfn.pfn_database_size(), u64::MAX.div_ceil(PAGE_SIZE));
        let layout = crate::layout::MemoryLayout::compute(
            crate::paging::PagingMode::FourLevel,
            pfn.pfn_database_size(),
        );
        assert!(layout.is_err());
    }

    #[test]
    fn database_size_covers_highest_frame() {
        let pfn = PfnAccounting::scan_memory_descriptors(&[d(T::FREE, 0, 0x10_0000)]);
        let bytes = 0x10_0000 * size_of::<MmPfn>() as u64;
        assert_eq!(pfn.pfn_database_size(), bytes.div_ceil(4096));
        assert!(pfn.has_minimum_memory());
    }
}

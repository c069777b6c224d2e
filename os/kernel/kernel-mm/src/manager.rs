use crate::colors::PageColoring;
use crate::error::MmError;
use crate::layout::MemoryLayout;
use crate::map::PageTableBuilder;
use crate::paging::{PageMap, initialize_page_map_support};
use crate::pfn::PfnAccounting;
use crate::pte::HardwarePte;
use crate::table::TableMemory;
use kernel_hal::Platform;
use kernel_info::descriptor::LoaderMemoryDescriptor;
use kernel_info::memory::MINIMUM_PHYSICAL_PAGES;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use log::{error, info};

/// Non-paged pool pages whose page tables exist from the start.
pub const INITIAL_NON_PAGED_POOL_PAGES: u64 = 1024;

/// Hyperspace pages whose page table exists from the start.
pub const HYPER_SPACE_PAGES: u64 = 512;

/// Boot-time memory manager state, owned by the init sequence.
#[derive(Debug)]
pub struct MemoryManager {
    page_map: PageMap,
    pfn: PfnAccounting,
    coloring: PageColoring,
    layout: MemoryLayout,
}

impl MemoryManager {
    /// Binds the page map, accounts physical memory, and lays out the kernel
    /// address space, in that order.
    ///
    /// # Errors
    /// * [`MmError::AmbiguousPagingMode`] if CR4 cannot be trusted.
    /// * [`MmError::InsufficientMemory`] below [`MINIMUM_PHYSICAL_PAGES`]; the
    ///   layout is not computed in that case.
    /// * [`MmError::PfnDatabaseTooLarge`] if the database does not fit.
    pub fn initialize<P: Platform + ?Sized>(
        platform: &P,
        descriptors: &[LoaderMemoryDescriptor],
    ) -> Result<Self, MmError> {
        let page_map = initialize_page_map_support(platform)?;

        let pfn = PfnAccounting::scan_memory_descriptors(descriptors);
        if !pfn.has_minimum_memory() {
            error!(
                "{} usable pages reported, {MINIMUM_PHYSICAL_PAGES} required",
                pfn.number_of_physical_pages()
            );
            return Err(MmError::InsufficientMemory {
                available: pfn.number_of_physical_pages(),
                required: MINIMUM_PHYSICAL_PAGES,
            });
        }

        let mut coloring = PageColoring::new();
        coloring.compute_page_coloring();

        let layout = MemoryLayout::compute(page_map.mode(), pfn.pfn_database_size())?;
        info!(
            "memory manager: {} pages ({} MiB), PFN database {} pages",
            pfn.number_of_physical_pages(),
            (pfn.number_of_physical_pages() * PAGE_SIZE) >> 20,
            layout.pfn_database_pages
        );

        Ok(Self {
            page_map,
            pfn,
            coloring,
            layout,
        })
    }

    /// Installs the upper table levels of the kernel's own regions: all
    /// levels down to page tables for the PFN database, the initial non-paged
    /// pool, and the first hyperspace pages; the levels above the page
    /// directory for the paged pool.
    ///
    /// Returns the number of bootstrap pages consumed.
    ///
    /// # Errors
    /// Propagates bootstrap exhaustion.
    pub fn initialize_page_tables(&mut self, tables: &mut dyn TableMemory) -> Result<u64, MmError> {
        let template = HardwarePte::kernel_table();
        let layout = self.layout;
        let non_paged_end = last_byte(layout.non_paged_pool_start, INITIAL_NON_PAGED_POOL_PAGES)
            .min(layout.non_paged_pool_end);
        let hyper_end = last_byte(layout.hyper_space_start, HYPER_SPACE_PAGES).min(layout.hyper_space_end);

        let mut builder = PageTableBuilder::new(self.page_map, tables, &mut self.pfn);
        let mut installed = builder.map_tables(layout.pfn_database, non_paged_end, template)?;
        installed += builder.map_tables(layout.hyper_space_start, hyper_end, template)?;
        installed += builder.map_p5e(layout.paged_pool_start, layout.paged_pool_end, template)?;
        installed += builder.map_pxe(layout.paged_pool_start, layout.paged_pool_end, template)?;
        installed += builder.map_ppe(layout.paged_pool_start, layout.paged_pool_end, template)?;

        info!(
            "page tables: {installed} pages installed, {} bootstrap pages left",
            self.pfn.remaining_bootstrap_pages()
        );
        Ok(installed)
    }

    #[must_use]
    pub const fn page_map(&self) -> PageMap {
        self.page_map
    }

    #[must_use]
    pub const fn pfn(&self) -> &PfnAccounting {
        &self.pfn
    }

    pub const fn pfn_mut(&mut self) -> &mut PfnAccounting {
        &mut self.pfn
    }

    #[must_use]
    pub const fn coloring(&self) -> &PageColoring {
        &self.coloring
    }

    pub const fn coloring_mut(&mut self) -> &mut PageColoring {
        &mut self.coloring
    }

    #[must_use]
    pub const fn memory_layout(&self) -> &MemoryLayout {
        &self.layout
    }
}

fn last_byte(start: VirtualAddress, pages: u64) -> VirtualAddress {
    VirtualAddress::new(start.as_u64().saturating_add(pages * PAGE_SIZE - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::{PageMapVariant, PagingMode};
    use crate::table::InMemoryTables;
    use kernel_hal::Cr4;
    use kernel_hal::mock::{MockPlatform, PlatformEvent};
    use kernel_info::descriptor::LoaderMemoryType as T;

    fn memory_map() -> [LoaderMemoryDescriptor; 4] {
        [
            LoaderMemoryDescriptor::new(T::FIRMWARE_TEMPORARY, 0x1, 0x9F),
            LoaderMemoryDescriptor::new(T::SYSTEM_CODE, 0x100, 0x100),
            LoaderMemoryDescriptor::new(T::FREE, 0x200, 0x3E00),
            LoaderMemoryDescriptor::new(T::FIRMWARE_PERMANENT, 0xF_0000, 0x10),
        ]
    }

    #[cfg(not(target_arch = "x86"))]
    #[test]
    fn initialization_reads_cr4_once() {
        let platform = MockPlatform::new().with_cr4(Cr4::new().with_pae(true));
        let mut mm = MemoryManager::initialize(&platform, &memory_map()).unwrap();
        assert_eq!(mm.page_map().mode(), PagingMode::FourLevel);
        assert_eq!(mm.page_map().variant(), PageMapVariant::Basic);
        assert_eq!(mm.coloring().paging_colors(), 64);

        let mut tables = InMemoryTables::new();
        let installed = mm.initialize_page_tables(&mut tables).unwrap();
        assert!(installed > 0);
        assert_eq!(mm.pfn().bootstrap_pages_used(), installed);
        assert_eq!(mm.initialize_page_tables(&mut tables).unwrap(), 0);

        let probes = platform
            .events()
            .iter()
            .filter(|e| **e == PlatformEvent::ReadCr4)
            .count();
        assert_eq!(probes, 1);
    }

    #[cfg(not(target_arch = "x86"))]
    #[test]
    fn extended_addressing_moves_the_layout() {
        let platform = MockPlatform::new().with_cr4(Cr4::new().with_pae(true).with_la57(true));
        let mm = MemoryManager::initialize(&platform, &memory_map()).unwrap();
        assert_eq!(mm.page_map().mode(), PagingMode::FiveLevel);
        assert_eq!(
            *mm.memory_layout(),
            MemoryLayout::compute(PagingMode::FiveLevel, mm.pfn().pfn_database_size()).unwrap()
        );
    }

    #[test]
    fn too_little_memory_stops_before_the_layout() {
        let platform = MockPlatform::new().with_cr4(Cr4::new().with_pae(true));
        let map = [
            LoaderMemoryDescriptor::new(T::FREE, 0x100, 0x400),
            LoaderMemoryDescriptor::new(T::BAD, 0x500, 0x1000),
        ];
        assert_eq!(
            MemoryManager::initialize(&platform, &map).unwrap_err(),
            MmError::InsufficientMemory {
                available: 0x400,
                required: MINIMUM_PHYSICAL_PAGES
            }
        );
    }
}

//! # Pre-populating paging structures
//!
//! Before the PFN database exists, the memory manager installs the upper table
//! levels of its own regions with pages from the bootstrap run. Each `map_*`
//! call walks the entries of one level covering an inclusive address range;
//! every entry that is not yet present gets a fresh page, the caller's
//! template attributes, and a zeroed table behind it. Present entries are
//! left alone, so the calls can be repeated over overlapping ranges.

use crate::error::MmError;
use crate::paging::{PageMap, PageTableLevel};
use crate::pfn::PfnAccounting;
use crate::pte::HardwarePte;
use crate::table::TableMemory;
use kernel_memory_addresses::VirtualAddress;
use log::trace;

/// Installs missing paging structures through a bound [`PageMap`].
pub struct PageTableBuilder<'a> {
    page_map: PageMap,
    tables: &'a mut dyn TableMemory,
    pfn: &'a mut PfnAccounting,
}

impl<'a> PageTableBuilder<'a> {
    pub fn new(page_map: PageMap, tables: &'a mut dyn TableMemory, pfn: &'a mut PfnAccounting) -> Self {
        Self { page_map, tables, pfn }
    }

    /// Returns the number of pages installed.
    ///
    /// # Errors
    /// Propagates bootstrap exhaustion and entry encoding failures.
    pub fn map_p5e(&mut self, start: VirtualAddress, end: VirtualAddress, template: HardwarePte) -> Result<u64, MmError> {
        self.map_level(PageTableLevel::P5e, start, end, template)
    }

    /// Returns the number of pages installed.
    ///
    /// # Errors
    /// Propagates bootstrap exhaustion and entry encoding failures.
    pub fn map_pxe(&mut self, start: VirtualAddress, end: VirtualAddress, template: HardwarePte) -> Result<u64, MmError> {
        self.map_level(PageTableLevel::Pxe, start, end, template)
    }

    /// Returns the number of pages installed.
    ///
    /// # Errors
    /// Propagates bootstrap exhaustion and entry encoding failures.
    pub fn map_ppe(&mut self, start: VirtualAddress, end: VirtualAddress, template: HardwarePte) -> Result<u64, MmError> {
        self.map_level(PageTableLevel::Ppe, start, end, template)
    }

    /// Returns the number of pages installed.
    ///
    /// # Errors
    /// Propagates bootstrap exhaustion and entry encoding failures.
    pub fn map_pde(&mut self, start: VirtualAddress, end: VirtualAddress, template: HardwarePte) -> Result<u64, MmError> {
        self.map_level(PageTableLevel::Pde, start, end, template)
    }

    /// Backs every page of the range with a zeroed bootstrap page.
    ///
    /// # Errors
    /// Propagates bootstrap exhaustion and entry encoding failures.
    pub fn map_pte(&mut self, start: VirtualAddress, end: VirtualAddress, template: HardwarePte) -> Result<u64, MmError> {
        self.map_level(PageTableLevel::Pte, start, end, template)
    }

    /// Installs every upper level of the range, down to the page directory.
    ///
    /// # Errors
    /// Propagates bootstrap exhaustion and entry encoding failures.
    pub fn map_tables(&mut self, start: VirtualAddress, end: VirtualAddress, template: HardwarePte) -> Result<u64, MmError> {
        Ok(self.map_p5e(start, end, template)?
            + self.map_pxe(start, end, template)?
            + self.map_ppe(start, end, template)?
            + self.map_pde(start, end, template)?)
    }

    fn map_level(
        &mut self,
        level: PageTableLevel,
        start: VirtualAddress,
        end: VirtualAddress,
        template: HardwarePte,
    ) -> Result<u64, MmError> {
        if start > end {
            return Ok(0);
        }
        let (Some(first), Some(last)) = (
            self.page_map.entry_address(level, start),
            self.page_map.entry_address(level, end),
        ) else {
            // The scheme folds this level away.
            return Ok(0);
        };

        let step = self.page_map.entry_size();
        let mut installed = 0;
        let mut entry = first;
        while entry <= last {
            if !self.page_map.is_present(self.tables, entry) {
                let frame = self.pfn.allocate_bootstrap_pages(1)?;
                self.page_map
                    .write_entry(self.tables, entry, template.with_frame(frame))?;
                self.tables.zero_page(self.page_map.pte_virtual_address(entry));
                trace!("{level:?} {entry} -> {frame}");
                installed += 1;
            }
            entry += step;
        }
        Ok(installed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::PagingMode;
    use crate::table::InMemoryTables;
    use kernel_info::descriptor::{LoaderMemoryDescriptor, LoaderMemoryType};
    use kernel_memory_addresses::PageFrameNumber;

    fn accounting(pages: u64) -> PfnAccounting {
        PfnAccounting::scan_memory_descriptors(&[LoaderMemoryDescriptor::new(LoaderMemoryType::FREE, 0x100, pages)])
    }

    #[test]
    fn installs_missing_entries_once() {
        let map = PageMap::for_mode(PagingMode::FourLevel);
        let mut tables = InMemoryTables::new();
        let mut pfn = accounting(64);
        let start = VirtualAddress::new(0xFFFF_FA80_0000_0000);
        let end = VirtualAddress::new(0xFFFF_FA80_005F_FFFF);

        let mut builder = PageTableBuilder::new(map, &mut tables, &mut pfn);
        // One PML4 entry, one PDPT entry, three page tables.
        assert_eq!(builder.map_tables(start, end, HardwarePte::kernel_table()).unwrap(), 5);
        assert_eq!(builder.map_tables(start, end, HardwarePte::kernel_table()).unwrap(), 0);

        assert_eq!(pfn.bootstrap_pages_used(), 5);
        let pxe = map.pxe_address(start).unwrap();
        let installed = map.read_entry(&tables, pxe);
        assert!(installed.valid() && installed.writable());
        assert_eq!(installed.frame(), PageFrameNumber::new(0x100));
        assert_eq!(tables.zeroed_pages()[0], map.pte_virtual_address(pxe));
    }

    #[test]
    fn present_entries_are_skipped() {
        let map = PageMap::for_mode(PagingMode::FourLevel);
        let mut tables = InMemoryTables::new();
        let mut pfn = accounting(8);
        let va = VirtualAddress::new(0xFFFF_F700_0000_0000);
        let pde = map.pde_address(va);
        let existing = HardwarePte::kernel_table().with_frame(PageFrameNumber::new(0x9999));
        map.write_entry(&mut tables, pde, existing).unwrap();

        let mut builder = PageTableBuilder::new(map, &mut tables, &mut pfn);
        assert_eq!(builder.map_pde(va, va, HardwarePte::kernel_table()).unwrap(), 0);
        assert_eq!(map.read_entry(&tables, pde), existing);
        assert_eq!(pfn.bootstrap_pages_used(), 0);
    }

    #[test]
    fn folded_levels_are_no_ops() {
        let map = PageMap::for_mode(PagingMode::TwoLevel);
        let mut tables = InMemoryTables::new();
        let mut pfn = accounting(8);
        let va = VirtualAddress::new(0xB000_0000);

        let mut builder = PageTableBuilder::new(map, &mut tables, &mut pfn);
        assert_eq!(builder.map_p5e(va, va, HardwarePte::kernel_table()).unwrap(), 0);
        assert_eq!(builder.map_pxe(va, va, HardwarePte::kernel_table()).unwrap(), 0);
        assert_eq!(builder.map_ppe(va, va, HardwarePte::kernel_table()).unwrap(), 0);
        assert_eq!(builder.map_pde(va, va + 0x3F_FFFF, HardwarePte::kernel_table()).unwrap(), 1);
        assert_eq!(tables.read_u32(map.pde_address(va)), 0x0010_0003);
    }

    #[test]
    fn leaf_mapping_backs_each_page() {
        let map = PageMap::for_mode(PagingMode::ThreeLevel);
        let mut tables = InMemoryTables::new();
        let mut pfn = accounting(8);
        let start = VirtualAddress::new(0xC080_0000);

        let mut builder = PageTableBuilder::new(map, &mut tables, &mut pfn);
        assert_eq!(builder.map_pte(start, start + 0x2FFF, HardwarePte::kernel_table()).unwrap(), 3);
        assert_eq!(tables.zeroed_pages(), &[start, start + 0x1000, start + 0x2000]);
    }

    #[test]
    fn exhaustion_is_reported() {
        let map = PageMap::for_mode(PagingMode::FourLevel);
        let mut tables = InMemoryTables::new();
        let mut pfn = accounting(2);
        let start = VirtualAddress::new(0xFFFF_F8A0_0000_0000);

        let mut builder = PageTableBuilder::new(map, &mut tables, &mut pfn);
        let result = builder.map_pde(start, start + 0x7F_FFFF, HardwarePte::kernel_table());
        assert!(matches!(result, Err(MmError::Bootstrap(_))));
    }
}

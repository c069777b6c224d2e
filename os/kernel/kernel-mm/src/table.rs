//! # Access to paging structures
//!
//! The page map computes *where* an entry lives; [`TableMemory`] performs the
//! actual loads and stores. On hardware that is [`SelfMapTables`], which goes
//! through the self-mapped window with volatile accesses. Host tests use
//! [`InMemoryTables`], a sparse byte store.

use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};

/// Loads and stores of page table entries at self-map addresses.
pub trait TableMemory {
    fn read_u32(&self, address: VirtualAddress) -> u32;
    fn read_u64(&self, address: VirtualAddress) -> u64;
    fn write_u32(&mut self, address: VirtualAddress, value: u32);
    fn write_u64(&mut self, address: VirtualAddress, value: u64);

    /// Clears the page containing `address`.
    fn zero_page(&mut self, address: VirtualAddress);
}

/// The live paging structures, reached through the self-map.
pub struct SelfMapTables {
    _private: (),
}

impl SelfMapTables {
    /// # Safety
    /// The active top-level table must contain the self-map slot, and every
    /// address handed to the accessors must come from the bound page map.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl TableMemory for SelfMapTables {
    fn read_u32(&self, address: VirtualAddress) -> u32 {
        // SAFETY: see `SelfMapTables::new`.
        unsafe { core::ptr::read_volatile(address.as_mut_ptr::<u32>()) }
    }

    fn read_u64(&self, address: VirtualAddress) -> u64 {
        // SAFETY: see `SelfMapTables::new`.
        unsafe { core::ptr::read_volatile(address.as_mut_ptr::<u64>()) }
    }

    fn write_u32(&mut self, address: VirtualAddress, value: u32) {
        // SAFETY: see `SelfMapTables::new`.
        unsafe { core::ptr::write_volatile(address.as_mut_ptr::<u32>(), value) }
    }

    fn write_u64(&mut self, address: VirtualAddress, value: u64) {
        // SAFETY: see `SelfMapTables::new`.
        unsafe { core::ptr::write_volatile(address.as_mut_ptr::<u64>(), value) }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn zero_page(&mut self, address: VirtualAddress) {
        // SAFETY: the page was mapped by the entry just installed.
        unsafe { core::ptr::write_bytes(address.align_down().as_mut_ptr::<u8>(), 0, PAGE_SIZE as usize) }
    }
}

#[cfg(any(test, feature = "mock"))]
pub use in_memory::InMemoryTables;

#[cfg(any(test, feature = "mock"))]
mod in_memory {
    use super::TableMemory;
    use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
    use std::collections::BTreeMap;
    use std::vec::Vec;

    /// Sparse little-endian byte store standing in for the self-map window.
    ///
    /// Unwritten bytes read as zero, like freshly cleared tables.
    #[derive(Default, Debug)]
    pub struct InMemoryTables {
        bytes: BTreeMap<u64, u8>,
        zeroed: Vec<VirtualAddress>,
    }

    impl InMemoryTables {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Pages passed to [`TableMemory::zero_page`], in call order.
        #[must_use]
        pub fn zeroed_pages(&self) -> &[VirtualAddress] {
            &self.zeroed
        }

        fn read<const N: usize>(&self, address: VirtualAddress) -> [u8; N] {
            core::array::from_fn(|i| {
                self.bytes
                    .get(&(address.as_u64() + i as u64))
                    .copied()
                    .unwrap_or_default()
            })
        }

        fn write(&mut self, address: VirtualAddress, data: &[u8]) {
            for (i, byte) in data.iter().enumerate() {
                self.bytes.insert(address.as_u64() + i as u64, *byte);
            }
        }
    }

    impl TableMemory for InMemoryTables {
        fn read_u32(&self, address: VirtualAddress) -> u32 {
            u32::from_le_bytes(self.read(address))
        }

        fn read_u64(&self, address: VirtualAddress) -> u64 {
            u64::from_le_bytes(self.read(address))
        }

        fn write_u32(&mut self, address: VirtualAddress, value: u32) {
            self.write(address, &value.to_le_bytes());
        }

        fn write_u64(&mut self, address: VirtualAddress, value: u64) {
            self.write(address, &value.to_le_bytes());
        }

        fn zero_page(&mut self, address: VirtualAddress) {
            let start = address.align_down().as_u64();
            let end = start + (PAGE_SIZE - 1);
            self.bytes.retain(|offset, _| !(start..=end).contains(offset));
            self.zeroed.push(address.align_down());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_tables_are_little_endian_and_sparse() {
        let mut tables = InMemoryTables::new();
        let at = VirtualAddress::new(0xFFFF_F6FB_7DBE_D000);
        assert_eq!(tables.read_u64(at), 0);

        tables.write_u64(at, 0x1122_3344_5566_7788);
        assert_eq!(tables.read_u32(at), 0x5566_7788);
        assert_eq!(tables.read_u32(at + 4), 0x1122_3344);

        tables.write_u32(at + 0x1000, 7);
        tables.zero_page(at + 0x10);
        assert_eq!(tables.read_u64(at), 0);
        assert_eq!(tables.read_u32(at + 0x1000), 7);
        assert_eq!(tables.zeroed_pages(), &[at]);
    }
}

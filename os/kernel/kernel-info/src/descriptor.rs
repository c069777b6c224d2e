//! # Loader Memory Descriptors
//!
//! The loader describes physical memory as an array of
//! [`LoaderMemoryDescriptor`] entries, each covering `page_count` 4 KiB frames
//! starting at `base_page`, tagged with a [`LoaderMemoryType`].

/// Memory type tag of a [`LoaderMemoryDescriptor`].
///
/// Transparent over `u32` so that unknown values from a newer loader remain
/// representable; they are treated as in-use memory.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LoaderMemoryType(pub u32);

impl LoaderMemoryType {
    pub const EXCEPTION_BLOCK: Self = Self(0);
    pub const SYSTEM_BLOCK: Self = Self(1);
    pub const FREE: Self = Self(2);
    pub const BAD: Self = Self(3);
    pub const LOADED_PROGRAM: Self = Self(4);
    pub const FIRMWARE_TEMPORARY: Self = Self(5);
    pub const FIRMWARE_PERMANENT: Self = Self(6);
    pub const OSLOADER_HEAP: Self = Self(7);
    pub const OSLOADER_STACK: Self = Self(8);
    pub const SYSTEM_CODE: Self = Self(9);
    pub const HAL_CODE: Self = Self(10);
    pub const BOOT_DRIVER: Self = Self(11);
    pub const CONSOLE_IN_DRIVER: Self = Self(12);
    pub const CONSOLE_OUT_DRIVER: Self = Self(13);
    pub const STARTUP_DPC_STACK: Self = Self(14);
    pub const STARTUP_KERNEL_STACK: Self = Self(15);
    pub const STARTUP_PANIC_STACK: Self = Self(16);
    pub const STARTUP_PCR_PAGE: Self = Self(17);
    pub const STARTUP_PDR_PAGE: Self = Self(18);
    pub const REGISTRY_DATA: Self = Self(19);
    pub const MEMORY_DATA: Self = Self(20);
    pub const NLS_DATA: Self = Self(21);
    pub const SPECIAL_MEMORY: Self = Self(22);
    pub const BBT_MEMORY: Self = Self(23);
    pub const RESERVE: Self = Self(24);
    pub const XIP_ROM: Self = Self(25);
    pub const HAL_CACHED_MEMORY: Self = Self(26);
    pub const LARGE_PAGE_FILLER: Self = Self(27);
    pub const ERROR_LOG_MEMORY: Self = Self(28);

    /// Memory the kernel must not see at all (not part of the PFN range).
    #[must_use]
    pub const fn is_invisible(self) -> bool {
        matches!(
            self,
            Self::FIRMWARE_PERMANENT | Self::SPECIAL_MEMORY | Self::BBT_MEMORY
        )
    }

    /// Memory reserved for the hardware layer's cached mappings.
    #[must_use]
    pub const fn is_hardware_cached(self) -> bool {
        matches!(self, Self::HAL_CACHED_MEMORY)
    }

    /// Defective memory; part of the PFN range but never usable.
    #[must_use]
    pub const fn is_bad(self) -> bool {
        matches!(self, Self::BAD)
    }

    /// Memory the kernel may hand out once boot is complete.
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(
            self,
            Self::FREE | Self::FIRMWARE_TEMPORARY | Self::LOADED_PROGRAM | Self::OSLOADER_STACK
        )
    }
}

/// One physically contiguous run of pages of a single memory type.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LoaderMemoryDescriptor {
    pub memory_type: LoaderMemoryType,
    /// First page frame of the run.
    pub base_page: u64,
    /// Number of 4 KiB pages in the run.
    pub page_count: u64,
}

impl LoaderMemoryDescriptor {
    #[must_use]
    pub const fn new(memory_type: LoaderMemoryType, base_page: u64, page_count: u64) -> Self {
        Self {
            memory_type,
            base_page,
            page_count,
        }
    }

    /// Last page frame covered by the run, or `None` for an empty run and
    /// for one that runs past the end of the frame space.
    #[must_use]
    pub const fn last_page(&self) -> Option<u64> {
        if self.page_count == 0 {
            return None;
        }
        self.base_page.checked_add(self.page_count - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_classes_are_disjoint() {
        for raw in 0..=28 {
            let ty = LoaderMemoryType(raw);
            let classes = [ty.is_invisible(), ty.is_hardware_cached(), ty.is_bad(), ty.is_free()];
            assert!(classes.iter().filter(|c| **c).count() <= 1, "{ty:?}");
        }
    }

    #[test]
    fn free_equivalent_types() {
        assert!(LoaderMemoryType::FREE.is_free());
        assert!(LoaderMemoryType::FIRMWARE_TEMPORARY.is_free());
        assert!(LoaderMemoryType::LOADED_PROGRAM.is_free());
        assert!(LoaderMemoryType::OSLOADER_STACK.is_free());
        assert!(!LoaderMemoryType::OSLOADER_HEAP.is_free());
        assert!(!LoaderMemoryType(999).is_free());
    }

    #[test]
    fn last_page_of_run() {
        let d = LoaderMemoryDescriptor::new(LoaderMemoryType::FREE, 0x100, 0x10);
        assert_eq!(d.last_page(), Some(0x10F));
        let empty = LoaderMemoryDescriptor::new(LoaderMemoryType::FREE, 0x100, 0);
        assert_eq!(empty.last_page(), None);
    }

    #[test]
    fn wrapping_run_has_no_last_page() {
        let wraps = LoaderMemoryDescriptor::new(LoaderMemoryType::FREE, u64::MAX - 4, 0x10);
        assert_eq!(wraps.last_page(), None);
        let top = LoaderMemoryDescriptor::new(LoaderMemoryType::FREE, u64::MAX - 0xF, 0x10);
        assert_eq!(top.last_page(), Some(u64::MAX));
    }
}

//! # Hardware page table entries
//!
//! One bit layout serves every paging scheme. The low twelve bits and the
//! frame field starting at bit 12 sit in the same place in the legacy 32-bit
//! format and in the 64-bit format used by PAE, 4-level, and 5-level paging;
//! the 32-bit format simply ends after bit 31. [`HardwarePte::to_narrow`]
//! checks that an entry fits before it is stored into a 4-byte slot.
//!
//! | Bit(s) | Name             | Meaning |
//! |--------|------------------|---------|
//! | 0      | `valid`          | Entry is present. |
//! | 1      | `writable`       | Writes allowed. |
//! | 2      | `owner`          | User-mode access allowed. |
//! | 3      | `write_through`  | PWT. |
//! | 4      | `cache_disable`  | PCD. |
//! | 5      | `accessed`       | Set by the CPU on access. |
//! | 6      | `dirty`          | Set by the CPU on write (leaf only). |
//! | 7      | `large_page`     | PS on directory entries, PAT on leaves. |
//! | 8      | `global`         | Survives CR3 reloads (leaf only). |
//! | 9..=11 | `software`       | Ignored by hardware. |
//! | 12..=51| `page_frame_number` | Physical frame of the next table or page. |
//! | 52..=62| `available`      | Ignored by hardware (64-bit format only). |
//! | 63     | `no_execute`     | NX (64-bit format only, needs EFER.NXE). |

use bitfield_struct::bitfield;
use kernel_memory_addresses::PageFrameNumber;

#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct HardwarePte {
    pub valid: bool,
    pub writable: bool,
    pub owner: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub large_page: bool,
    pub global: bool,
    #[bits(3)]
    pub software: u8,
    #[bits(40)]
    pub page_frame_number: u64,
    #[bits(11)]
    pub available: u16,
    pub no_execute: bool,
}

/// Cache policy selected through the PWT/PCD pair of an entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CachingType {
    /// Write-back.
    Cached,
    /// Strong uncacheable.
    NotCached,
    /// Uncacheable minus; write-combining where an MTRR asks for it.
    WriteCombined,
}

impl HardwarePte {
    /// Template for kernel paging structures: present and writable.
    #[must_use]
    pub const fn kernel_table() -> Self {
        Self::new().with_valid(true).with_writable(true)
    }

    #[must_use]
    pub const fn frame(self) -> PageFrameNumber {
        PageFrameNumber::new(self.page_frame_number())
    }

    /// Returns this entry pointing at `frame` and marked present.
    #[must_use]
    pub const fn with_frame(self, frame: PageFrameNumber) -> Self {
        self.with_page_frame_number(frame.as_u64()).with_valid(true)
    }

    #[must_use]
    pub const fn caching(self) -> CachingType {
        match (self.cache_disable(), self.write_through()) {
            (false, _) => CachingType::Cached,
            (true, true) => CachingType::NotCached,
            (true, false) => CachingType::WriteCombined,
        }
    }

    #[must_use]
    pub const fn with_caching(self, caching: CachingType) -> Self {
        let (cache_disable, write_through) = match caching {
            CachingType::Cached => (false, false),
            CachingType::NotCached => (true, true),
            CachingType::WriteCombined => (true, false),
        };
        self.with_cache_disable(cache_disable)
            .with_write_through(write_through)
    }

    /// The entry in legacy 4-byte format, if it fits there.
    ///
    /// Frames above 4 GiB, the high software bits, and NX have no
    /// representation without PAE.
    #[must_use]
    pub const fn to_narrow(self) -> Option<u32> {
        let bits = self.into_bits();
        if bits > u32::MAX as u64 {
            None
        } else {
            #[allow(clippy::cast_possible_truncation)]
            Some(bits as u32)
        }
    }
}

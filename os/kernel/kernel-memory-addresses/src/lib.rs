//! # Physical and Virtual Address Types
//!
//! Strongly typed wrappers for the raw addresses and page frame numbers that
//! the memory manager passes around during early boot.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`VirtualAddress`] | A byte address in the (translated) virtual address space. |
//! | [`PageFrameNumber`] | The index of one 4 KiB physical page, i.e. `address >> PAGE_SHIFT`. |
//!
//! All types are `#[repr(transparent)]` over `u64` on every target, so a
//! 32-bit kernel stores PAE physical addresses without truncation.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_2042);
//! let pfn = pa.page_frame();
//! assert_eq!(pfn, PageFrameNumber::new(0x102));
//! assert_eq!(pfn.base_address().as_u64(), 0x0010_2000);
//! assert_eq!(pa.page_offset(), 0x42);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod page_frame_number;
mod physical_address;
mod virtual_address;

pub use page_frame_number::PageFrameNumber;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// log2 of the base page size.
pub const PAGE_SHIFT: u32 = 12;

/// Size of a base page in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Mask selecting the in-page offset bits.
pub const PAGE_OFFSET_MASK: u64 = PAGE_SIZE - 1;

/// Number of whole pages needed to hold `bytes` bytes.
#[inline]
#[must_use]
pub const fn pages_for_bytes(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}

/// Rounds `value` up to the next page boundary.
#[inline]
#[must_use]
pub const fn round_up_to_page(value: u64) -> u64 {
    (value + PAGE_OFFSET_MASK) & !PAGE_OFFSET_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        assert_eq!(pages_for_bytes(0), 0);
        assert_eq!(pages_for_bytes(1), 1);
        assert_eq!(pages_for_bytes(PAGE_SIZE), 1);
        assert_eq!(pages_for_bytes(PAGE_SIZE + 1), 2);
        assert_eq!(round_up_to_page(0x1001), 0x2000);
        assert_eq!(round_up_to_page(0x2000), 0x2000);
    }
}

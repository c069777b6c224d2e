use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PageFrameNumber, PhysicalAddress};

/// CR3: Page-Directory Base Register (PCID disabled).
///
/// Holds the physical frame of the top-level paging structure: the PML5 or
/// PML4 on x86-64, the page directory on 32-bit non-PAE paging. For 32-bit PAE
/// paging the PDPT only needs 32-byte alignment; the kernel always places it
/// page aligned, so the frame field covers all modes used here.
#[bitfield(u64)]
pub struct Cr3 {
    /// Bits 0..=2: Reserved (must be 0).
    #[bits(3)]
    pub reserved0: u8,

    /// Bit 3: PWT: Page-level Write-Through for the top-level table.
    pub pwt: bool,

    /// Bit 4: PCD: Page-level Cache Disable for the top-level table.
    pub pcd: bool,

    /// Bits 5..=11: Reserved (must be 0 when written).
    #[bits(7)]
    pub reserved1: u8,

    /// Bits 12..=51: Top-level table physical frame.
    #[bits(40)]
    pub table_frame: u64,

    /// Bits 52..=63: Reserved.
    #[bits(12)]
    pub reserved2: u16,
}

impl Cr3 {
    /// Create a `Cr3` value pointing at the given top-level table frame.
    #[must_use]
    pub const fn from_table_frame(frame: PageFrameNumber) -> Self {
        Self::new().with_table_frame(frame.as_u64())
    }

    /// Physical frame of the top-level paging structure.
    #[must_use]
    pub const fn frame(&self) -> PageFrameNumber {
        PageFrameNumber::new(self.table_frame())
    }

    /// Physical address of the top-level paging structure.
    #[must_use]
    pub const fn table_address(&self) -> PhysicalAddress {
        self.frame().base_address()
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(crate::read_control_register!("cr3"))
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        crate::write_control_register!("cr3", self.into_bits());
    }
}

//! # Model-Specific Registers (MSR)
//!
//! Low-level access to the MSRs the processor bootstrap needs:
//!
//! - `IA32_APIC_BASE` (`0x1B`): local APIC enable and MMIO base.
//! - `IA32_FS_BASE` (`0xC000_0100`) / `IA32_GS_BASE` (`0xC000_0101`): segment
//!   bases used for the processor block lookup in 64-bit mode.
//! - `IA32_KERNEL_GS_BASE` (`0xC000_0102`): value exchanged by `swapgs`.
//!
//! ## References
//! - Intel SDM Vol. 3, §2.5.4 "FS and GS Base Address Registers"
//! - Intel SDM Vol. 3, §11.4.4 "Local APIC Status and Location"

use bitfield_struct::bitfield;

/// Identifies a **Model-Specific Register (MSR)** by its architectural index.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msr(pub u32);

impl Msr {
    pub const IA32_APIC_BASE: Self = Self(0x1B);
    pub const IA32_FS_BASE: Self = Self(0xC000_0100);
    pub const IA32_GS_BASE: Self = Self(0xC000_0101);
    pub const IA32_KERNEL_GS_BASE: Self = Self(0xC000_0102);

    /// Returns the underlying raw MSR index.
    #[inline(always)]
    #[allow(clippy::inline_always)]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Write a 64-bit value to this MSR.
    ///
    /// # Safety
    /// - Executes the privileged `WRMSR` instruction (CPL 0 only, #GP otherwise).
    /// - The MSR must exist and accept the written value on the current CPU.
    #[cfg(feature = "asm")]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn store_raw(self, val: u64) {
        let lo = (val & 0xFFFF_FFFF) as u32;
        let hi = (val >> 32) as u32;
        unsafe {
            core::arch::asm!(
                "wrmsr",
                in("ecx") self.raw(),
                in("eax") lo,
                in("edx") hi,
                options(nostack, preserves_flags)
            );
        }
    }

    /// Reads the 64-bit value of this MSR.
    ///
    /// # Safety
    /// Executes the privileged `RDMSR` instruction; the MSR must exist.
    #[cfg(feature = "asm")]
    #[inline]
    pub unsafe fn load_raw(self) -> u64 {
        let lo: u32;
        let hi: u32;
        unsafe {
            core::arch::asm!(
                "rdmsr",
                in("ecx") self.raw(),
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        (u64::from(hi) << 32) | u64::from(lo)
    }
}

/// `IA32_APIC_BASE` (MSR `0x1B`).
#[bitfield(u64, order = Lsb)]
pub struct ApicBaseMsr {
    /// Bits 0..=7: Reserved.
    #[bits(8)]
    pub reserved0: u8,

    /// Bit 8: BSP: this processor is the bootstrap processor.
    pub bsp: bool,

    /// Bit 9: Reserved.
    pub reserved1: bool,

    /// Bit 10: EXTD: x2APIC mode enable.
    pub x2apic_enable: bool,

    /// Bit 11: EN: xAPIC global enable.
    pub global_enable: bool,

    /// Bits 12..=51: APIC MMIO base frame.
    #[bits(40)]
    pub base_frame: u64,

    /// Bits 52..=63: Reserved.
    #[bits(12)]
    pub reserved2: u16,
}

impl ApicBaseMsr {
    pub const MSR: Msr = Msr::IA32_APIC_BASE;

    /// Physical address of the local APIC register page.
    #[must_use]
    pub const fn base_address(&self) -> u64 {
        self.base_frame() << 12
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apic_base_decoding() {
        // Typical firmware value: enabled BSP at 0xFEE0_0000.
        let msr = ApicBaseMsr::from_bits(0xFEE0_0900);
        assert!(msr.bsp());
        assert!(msr.global_enable());
        assert!(!msr.x2apic_enable());
        assert_eq!(msr.base_address(), 0xFEE0_0000);
    }
}

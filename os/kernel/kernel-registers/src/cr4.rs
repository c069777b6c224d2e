use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// Control register 4.
///
/// The kernel core consults the paging-mode bits once while binding the page
/// map. Everything else is carried through unchanged on a read-modify-write.
#[bitfield(u64, order = Lsb)]
pub struct Cr4 {
    /// VME, PVI, TSD, DE.
    #[bits(4, access = RO)]
    pub legacy: u8,

    /// Large (4 MiB) pages in two-level paging.
    pub pse: bool,

    /// Physical address extension; required for long mode.
    pub pae: bool,

    pub mce: bool,

    /// Global pages survive a CR3 reload.
    pub pge: bool,

    /// PCE, OSFXSR, OSXMMEXCPT, UMIP.
    #[bits(4, access = RO)]
    pub os_support: u8,

    /// Five-level paging (57-bit linear addresses).
    pub la57: bool,

    #[bits(51, access = RO)]
    pub upper: u64,
}

impl Cr4 {
    /// Whether an addressing extension that adds a paging level is active:
    /// LA57 on x86-64, PAE on 32-bit x86.
    #[must_use]
    pub const fn extended_addressing(&self) -> bool {
        if cfg!(target_arch = "x86_64") {
            self.la57()
        } else {
            self.pae()
        }
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Cr4 {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(crate::read_control_register!("cr4"))
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Cr4 {
    unsafe fn store_unsafe(self) {
        crate::write_control_register!("cr4", self.into_bits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrelated_bits_survive() {
        let cr4 = Cr4::from_bits(0x0030_06F8).with_la57(true);
        assert_eq!(cr4.into_bits(), 0x0030_16F8);
        assert!(cr4.pge());
        assert_eq!(cr4.os_support(), 0x6);
        assert_eq!(cr4.upper(), 0x180);
    }

    #[test]
    fn paging_extension_bits() {
        let cr4 = Cr4::from_bits(1 << 12);
        assert!(cr4.la57());
        assert!(!cr4.pae());

        let cr4 = Cr4::from_bits(1 << 5);
        assert!(cr4.pae());
        assert!(!cr4.la57());
    }
}

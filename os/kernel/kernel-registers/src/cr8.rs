use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// CR8: Task Priority Register (x86-64 only).
///
/// Architectural alias of the local APIC's TPR bits 7:4. Interrupts whose
/// priority class is less than or equal to `tpr` are held pending.
#[bitfield(u64, order = Lsb)]
pub struct Cr8 {
    /// Bits 0..=3: Task priority class.
    #[bits(4)]
    pub tpr: u8,

    /// Bits 4..=63: Reserved.
    #[bits(60, access = RO)]
    pub reserved0: u64,
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr8 {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(crate::read_control_register!("cr8"))
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl StoreRegisterUnsafe for Cr8 {
    unsafe fn store_unsafe(self) {
        crate::write_control_register!("cr8", self.into_bits());
    }
}

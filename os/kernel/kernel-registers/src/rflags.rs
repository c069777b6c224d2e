use bitfield_struct::bitfield;

/// RFLAGS (EFLAGS on x86), as far as the kernel core inspects it.
#[bitfield(u64, order = Lsb)]
pub struct Rflags {
    /// Arithmetic status flags and TF.
    #[bits(9, access = RO)]
    pub status: u16,

    /// Maskable interrupts are delivered.
    pub interrupt_enable: bool,

    pub direction: bool,

    #[bits(access = RO)]
    pub overflow: bool,

    #[bits(2)]
    pub iopl: u8,

    #[bits(50, access = RO)]
    pub system: u64,
}

#[cfg(feature = "asm")]
impl crate::LoadRegister for Rflags {
    fn load() -> Self {
        #[cfg(target_arch = "x86_64")]
        let bits: u64 = {
            let v: u64;
            unsafe {
                core::arch::asm!("pushfq", "pop {}", out(reg) v, options(nomem, preserves_flags));
            }
            v
        };
        #[cfg(target_arch = "x86")]
        let bits: u64 = {
            let v: u32;
            unsafe {
                core::arch::asm!("pushfd", "pop {}", out(reg) v, options(nomem, preserves_flags));
            }
            u64::from(v)
        };
        Self::from_bits(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_flag_bit() {
        let flags = Rflags::from_bits(0x202);
        assert!(flags.interrupt_enable());
        assert!(!Rflags::from_bits(0x002).interrupt_enable());
        assert_eq!(flags.with_interrupt_enable(false).into_bits(), 0x002);
    }
}

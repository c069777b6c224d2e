//! # Typed x86 Control Registers
//!
//! Bitfield models of the control registers and model-specific registers the
//! kernel core touches while bootstrapping a processor. Every register type is
//! a `u64` bitfield on both `x86` and `x86_64`; the `asm` feature adds the
//! privileged load/store instructions for the compiling target.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "cr4")]
pub mod cr4;

#[cfg(feature = "cr8")]
pub mod cr8;

#[cfg(feature = "msr")]
pub mod msr;

#[cfg(feature = "rflags")]
pub mod rflags;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    /// It is generally safe to load this register even from user mode.
    fn load() -> Self;
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}

/// Reads a control register into a `u64` on either x86 flavor.
#[cfg(feature = "asm")]
macro_rules! read_control_register {
    ($reg:literal) => {{
        #[cfg(target_arch = "x86_64")]
        let value: u64 = {
            let v: u64;
            unsafe {
                core::arch::asm!(concat!("mov {}, ", $reg), out(reg) v, options(nomem, nostack, preserves_flags));
            }
            v
        };
        #[cfg(target_arch = "x86")]
        let value: u64 = {
            let v: u32;
            unsafe {
                core::arch::asm!(concat!("mov {}, ", $reg), out(reg) v, options(nomem, nostack, preserves_flags));
            }
            u64::from(v)
        };
        value
    }};
}

/// Writes a `u64` into a control register, truncating to 32 bits on x86.
#[cfg(feature = "asm")]
macro_rules! write_control_register {
    ($reg:literal, $value:expr) => {{
        #[cfg(target_arch = "x86_64")]
        {
            let v: u64 = $value;
            unsafe {
                core::arch::asm!(concat!("mov ", $reg, ", {}"), in(reg) v, options(nostack, preserves_flags));
            }
        }
        #[cfg(target_arch = "x86")]
        {
            #[allow(clippy::cast_possible_truncation)]
            let v = $value as u32;
            unsafe {
                core::arch::asm!(concat!("mov ", $reg, ", {}"), in(reg) v, options(nostack, preserves_flags));
            }
        }
    }};
}

#[cfg(feature = "asm")]
pub(crate) use {read_control_register, write_control_register};

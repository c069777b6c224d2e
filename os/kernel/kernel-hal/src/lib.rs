//! # Hardware Abstraction Boundary
//!
//! Every privileged instruction the kernel core executes goes through the
//! [`Platform`] trait: control registers, descriptor-table loads, segment
//! reloads, model-specific registers, port I/O, the task priority, and `hlt`.
//! Everything above this boundary is ordinary portable logic that runs
//! unchanged in host unit tests.
//!
//! ## Implementations
//!
//! | Type | Feature | Purpose |
//! |------|---------|---------|
//! | [`x86::X86Platform`] | `asm` | Executes the real instructions on `x86`/`x86_64`. |
//! | [`mock::MockPlatform`] | `mock` / `cfg(test)` | Records every call for host tests; `halt` panics. |
//!
//! ## Also here
//!
//! * [`RunLevel`]: the kernel's interrupt-priority abstraction and its mapping
//!   onto the task priority register.
//! * [`apic`]: local APIC bring-up for the current processor.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "mock"))]
extern crate std;

pub mod apic;
mod platform;
mod run_level;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(all(feature = "asm", any(target_arch = "x86", target_arch = "x86_64")))]
pub mod x86;

pub use platform::{CpuidResult, DescriptorTablePointer, KernelSelectors, Platform, StackEntry};
pub use run_level::RunLevel;

pub use kernel_registers::cr3::Cr3;
pub use kernel_registers::cr4::Cr4;
pub use kernel_registers::msr::Msr;

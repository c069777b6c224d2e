//! # Kernel Boot Interface
//!
//! The data structures and constants shared between the boot loader and the
//! kernel. Everything in here is part of the loader/kernel ABI: the layouts are
//! `#[repr(C)]`, use fixed-size integers, and are versioned through
//! [`boot::INITIALIZATION_BLOCK_VERSION`] and [`boot::BOOT_PROTOCOL_VERSION`].
//!
//! ## Modules
//!
//! ### Boot Information ([`boot`])
//! * **Kernel Entry Point**: function signature and calling convention
//! * **Initialization Block**: versions, firmware type, parameters, memory map
//! * **Debug Print Callback**: optional early output routine owned by the loader
//!
//! ### Memory Descriptors ([`descriptor`])
//! * **Descriptor Format**: base frame, page count, memory type
//! * **Type Classes**: invisible, hardware-cached, bad, and free-equivalent types
//!
//! ### Kernel Constants ([`memory`])
//! * **Image Placement**: link and load addresses consumed by `build.rs`
//! * **Stacks**: boot, fault, and interrupt stack sizes
//! * **Limits**: minimum physical memory required to boot
//!
//! ## Entry Point Convention
//! ```rust
//! # use kernel_info::boot::KernelInitializationBlock;
//! pub type KernelEntryFn = extern "efiapi" fn(*const KernelInitializationBlock) -> !;
//! ```
//!
//! The loader is a UEFI application, so the kernel is entered with the UEFI
//! calling convention of the target (`win64` on x86-64, `cdecl` on x86).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod descriptor;
pub mod memory;

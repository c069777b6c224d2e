//! # Kernel Executive Core
//!
//! Processor bring-up and the boot-time initialization sequence.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`arch`] | Bit-exact GDT, IDT, and TSS formats for x86-64 and x86. |
//! | [`trap`] | Trap trampolines and the bring-up trap dispatcher. |
//! | [`processor`] | Processor block and control block, processor bootstrap, run levels. |
//! | [`boot_info`] | Loader handoff validation, kernel parameters. |
//! | [`resources`] | The system resource list. |
//! | [`crash`] | Stop codes and the halt path. |
//! | [`init`] | The [`init::start_xt_system`] state machine. |
//!
//! ## Boot context
//!
//! State produced during boot lives in one [`BootContext`] passed through the
//! sequence explicitly. The only ambient lookups are the ones the hardware
//! offers: the current processor block through its segment register, and the
//! platform registered for trap and panic reporting.
//!
//! ## Example
//! ```rust,ignore
//! static PLATFORM: X86Platform = X86Platform;
//! static mut CONTEXT: BootContext = BootContext::new();
//!
//! unsafe {
//!     let mut tables = SelfMapTables::new();
//!     start_xt_system(
//!         &PLATFORM,
//!         &mut *(&raw mut CONTEXT),
//!         block,
//!         &mut tables,
//!         StartOptions::default(),
//!         TrapTrampolines::native(),
//!         kernel_main,
//!     )
//! }
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod arch;
pub mod boot_info;
mod context;
pub mod crash;
mod error;
pub mod init;
pub mod processor;
pub mod resources;
pub mod trap;

pub use context::{BOOT_PROCESSOR, BootContext};
pub use error::{AbiError, BootInfoError, KernelFault, ProcessorError, ResourceError};
pub use init::{InitState, KernelInitSequence, StartOptions, start_xt_system};

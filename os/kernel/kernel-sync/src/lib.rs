//! # Kernel synchronization primitives
//!
//! The two primitives the boot path needs before any scheduler exists:
//!
//! * [`SpinLock`]: busy-wait mutual exclusion, used for the system resource list.
//! * [`BootOnceCell`]: a value published exactly once during initialization and
//!   read-only afterwards (page map binding, memory layout).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod boot_once_cell;
mod spin_lock;

pub use boot_once_cell::BootOnceCell;
pub use spin_lock::{SpinLock, SpinLockGuard};

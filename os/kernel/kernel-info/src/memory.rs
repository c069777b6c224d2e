//! # Kernel Image and Stack Constants

/// Where the kernel executes (VMA): the base of the kernel's static system
/// region.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
#[cfg(target_arch = "x86_64")]
pub const KERNEL_BASE: u64 = 0xFFFF_F800_0000_0000;

/// Where the kernel executes (VMA): the base of the kernel's static system
/// region.
#[cfg(not(target_arch = "x86_64"))]
pub const KERNEL_BASE: u64 = 0x8000_0000;

/// Where the loader places the image bytes in *physical* memory (LMA).
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Size of the permanent kernel boot stack the init sequence switches to.
pub const KERNEL_STACK_SIZE: usize = 32 * 1024;

/// Size of each dedicated fault stack (double fault, NMI, machine check).
pub const KERNEL_FAULT_STACK_SIZE: usize = 16 * 1024;

/// Fewest usable physical pages the memory manager accepts.
pub const MINIMUM_PHYSICAL_PAGES: u64 = 1100;

/// Highest number of logical processors tracked in affinity masks.
pub const MAXIMUM_PROCESSORS: usize = 64;

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(KERNEL_FAULT_STACK_SIZE.is_multiple_of(4096));
    assert!(PHYS_LOAD.is_multiple_of(4096));
    assert!(KERNEL_BASE > PHYS_LOAD);
};

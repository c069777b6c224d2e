//! # Kernel Entry Point
//!
//! The loader jumps to [`_start`] with the initialization block. The entry
//! stub moves onto a small entry stack and hands over to the executive's
//! initialization sequence, which continues in [`kernel_main`] on the
//! permanent boot stack.

#![no_std]
#![no_main]
#![allow(unsafe_code)]

use core::hint::spin_loop;
use kernel_debug::DebugPort;
use kernel_hal::x86::X86Platform;
use kernel_info::boot::KernelInitializationBlock;
use kernel_ke::arch::native::TrapTrampolines;
use kernel_ke::crash::{crash_platform, halt_system};
use kernel_ke::{BootContext, StartOptions, start_xt_system};
use kernel_mm::table::SelfMapTables;
use log::{error, info};

/// Stack used between the loader handoff and the boot stack switch.
const ENTRY_STACK_SIZE: usize = 16 * 1024;

/// 16-byte aligned stack
#[repr(align(16))]
struct Aligned<const N: usize>([u8; N]);

#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut ENTRY_STACK: Aligned<ENTRY_STACK_SIZE> = Aligned([0; ENTRY_STACK_SIZE]);

static PLATFORM: X86Platform = X86Platform::new();

static mut CONTEXT: BootContext = BootContext::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("kernel panic: {info}");
    match crash_platform() {
        Some(platform) => halt_system(platform),
        None => loop {
            spin_loop();
        },
    }
}

/// The kernel entry point
///
/// # ABI
/// `efiapi` since the loader is a UEFI (PE/COFF) application: the block
/// arrives in `RCX` on x86-64 and on the stack on x86.
///
/// # Naked function & Stack
/// Naked so that nothing touches the loader's stack before we leave it.
#[cfg(target_arch = "x86_64")]
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub extern "efiapi" fn _start(_block: *const KernelInitializationBlock) -> ! {
    core::arch::naked_asm!(
        "cli",
        "mov r12, rcx",
        "lea rax, [rip + {stack_sym}]",
        "add rax, {stack_size}",
        "and rax, -16",
        "mov rsp, rax",
        // Emulate a CALL so that RSP % 16 == 8 at entry.
        "push 0",
        "xor rbp, rbp",
        "mov rdi, r12",
        "jmp {rust_entry}",
        stack_sym = sym ENTRY_STACK,
        stack_size = const ENTRY_STACK_SIZE,
        rust_entry = sym kernel_entry,
    );
}

/// The kernel entry point, see the x86-64 variant.
#[cfg(target_arch = "x86")]
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub extern "efiapi" fn _start(_block: *const KernelInitializationBlock) -> ! {
    core::arch::naked_asm!(
        "cli",
        "mov esi, [esp + 4]",
        "lea eax, [{stack_sym}]",
        "add eax, {stack_size}",
        "and eax, -16",
        "mov esp, eax",
        // Argument slot, then a fake return address.
        "sub esp, 12",
        "push esi",
        "push 0",
        "xor ebp, ebp",
        "jmp {rust_entry}",
        stack_sym = sym ENTRY_STACK,
        stack_size = const ENTRY_STACK_SIZE,
        rust_entry = sym kernel_entry,
    );
}

extern "C" fn kernel_entry(block: *const KernelInitializationBlock) -> ! {
    let options = StartOptions {
        debug_io: cfg!(debug_assertions) || cfg!(feature = "debug-io"),
        default_debug_port: if cfg!(feature = "qemu") {
            Some(DebugPort::Qemu)
        } else {
            None
        },
    };

    // SAFETY: runs once on the boot processor, before anything else could
    // reference the context; the loader left the self-map in place.
    unsafe {
        let context = &mut *(&raw mut CONTEXT);
        let mut tables = SelfMapTables::new();
        start_xt_system(
            &PLATFORM,
            context,
            block,
            &mut tables,
            options,
            TrapTrampolines::native(),
            kernel_main,
        )
    }
}

/// First code on the permanent boot stack.
extern "C" fn kernel_main(argument: usize) -> ! {
    // SAFETY: the argument is the context address passed across the switch.
    let context = unsafe { BootContext::from_handoff(argument) };
    if let Some(manager) = context.memory_manager() {
        info!(
            "kernel core up: {} processor(s), {} physical pages, {} resources",
            context.active_processors.count(),
            manager.pfn().number_of_physical_pages(),
            context.resources.len()
        );
    }

    // The executive's later phases start here.
    halt_system(&PLATFORM)
}

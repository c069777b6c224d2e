//! A memory map with nothing usable stops the boot with INSTALL_MORE_MEMORY
//! before the memory layout exists.

use kernel_hal::Cr4;
use kernel_hal::mock::{MockPlatform, PlatformEvent, is_halt_panic};
use kernel_info::boot::{KernelInitializationBlock, MemoryDescriptorList};
use kernel_info::descriptor::{LoaderMemoryDescriptor, LoaderMemoryType};
use kernel_ke::arch::native::TrapTrampolines;
use kernel_ke::{BootContext, StartOptions, start_xt_system};
use kernel_mm::table::InMemoryTables;
use std::panic::{AssertUnwindSafe, catch_unwind};

extern "C" fn next_stage(_context: usize) -> ! {
    unreachable!("boot must stop before the stack switch")
}

#[test]
fn only_invisible_and_bad_memory_halts() {
    let platform: &'static MockPlatform =
        Box::leak(Box::new(MockPlatform::new().with_cr4(Cr4::new().with_pae(true))));
    let descriptors = vec![
        LoaderMemoryDescriptor::new(LoaderMemoryType::FIRMWARE_PERMANENT, 0x0, 0x1000),
        LoaderMemoryDescriptor::new(LoaderMemoryType::BAD, 0x1000, 0x2000),
        LoaderMemoryDescriptor::new(LoaderMemoryType::SPECIAL_MEMORY, 0x3000, 0x100),
    ]
    .leak();
    let block = Box::leak(Box::new(KernelInitializationBlock {
        memory_descriptors: MemoryDescriptorList::from_slice(descriptors),
        ..KernelInitializationBlock::new()
    }));
    let context = Box::leak(Box::new(BootContext::new()));
    let trampolines = TrapTrampolines {
        exceptions: [0x1000; 32],
        unexpected: 0x2000,
    };
    let options = StartOptions {
        debug_io: true,
        default_debug_port: Some(kernel_debug::DebugPort::Qemu),
    };

    let block = core::ptr::from_ref(block);
    let mut slot = Some(context);
    let payload = catch_unwind(AssertUnwindSafe(move || {
        let context = slot.take().unwrap();
        let mut tables = InMemoryTables::new();
        unsafe { start_xt_system(platform, context, block, &mut tables, options, trampolines, next_stage) }
    }))
    .unwrap_err();
    assert!(is_halt_panic(payload.as_ref()));

    let events = platform.events();
    assert!(events.contains(&PlatformEvent::ReadCr4));
    assert_eq!(events[events.len() - 2..], [PlatformEvent::DisableInterrupts, PlatformEvent::Halt]);
    assert!(!events.contains(&PlatformEvent::SetTaskPriority(15)));
    assert!(!events.iter().any(|e| matches!(e, PlatformEvent::SwitchStack { .. })));
    assert!(kernel_mm::memory_layout().is_none());

    let console = String::from_utf8(platform.port_writes(kernel_debug::QEMU_DEBUG_PORT)).unwrap();
    assert!(console.contains("[ERROR]"), "{console}");
    assert!(console.contains("INSTALL_MORE_MEMORY"), "{console}");
}

//! A loader built for another block layout is refused before anything else
//! is read or touched.

use kernel_hal::mock::{MockPlatform, PlatformEvent, is_halt_panic};
use kernel_info::boot::{INITIALIZATION_BLOCK_VERSION, KernelInitializationBlock, MemoryDescriptorList};
use kernel_ke::arch::native::TrapTrampolines;
use kernel_ke::{BootContext, StartOptions, start_xt_system};
use kernel_mm::table::InMemoryTables;
use std::panic::{AssertUnwindSafe, catch_unwind};

extern "C" fn next_stage(_context: usize) -> ! {
    unreachable!("a mismatched loader never gets this far")
}

#[test]
fn older_block_version_halts_immediately() {
    let platform: &'static MockPlatform = Box::leak(Box::new(MockPlatform::new()));
    let context = Box::leak(Box::new(BootContext::new()));
    let block = Box::leak(Box::new(KernelInitializationBlock {
        block_version: INITIALIZATION_BLOCK_VERSION - 1,
        // Would fault if it were dereferenced.
        kernel_parameters: 0xDEAD_0000,
        memory_descriptors: MemoryDescriptorList {
            descriptors_ptr: 0xDEAD_1000,
            descriptor_count: 12,
        },
        ..KernelInitializationBlock::new()
    }));
    let trampolines = TrapTrampolines {
        exceptions: [0x1000; 32],
        unexpected: 0x2000,
    };

    let block = core::ptr::from_ref(block);
    let mut slot = Some(context);
    let payload = catch_unwind(AssertUnwindSafe(move || {
        let context = slot.take().unwrap();
        let mut tables = InMemoryTables::new();
        unsafe {
            start_xt_system(
                platform,
                context,
                block,
                &mut tables,
                StartOptions::default(),
                trampolines,
                next_stage,
            )
        }
    }))
    .unwrap_err();

    assert!(is_halt_panic(payload.as_ref()));
    assert_eq!(platform.events(), [PlatformEvent::DisableInterrupts, PlatformEvent::Halt]);
    assert!(kernel_mm::page_map().is_none());
    assert!(kernel_mm::memory_layout().is_none());
}

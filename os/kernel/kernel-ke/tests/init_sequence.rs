//! The whole boot path up to the stack switch, against the recording platform.

use kernel_hal::mock::{MockPlatform, PlatformEvent, is_stack_switch_panic};
use kernel_hal::{Cr4, RunLevel};
use kernel_info::boot::{FirmwareType, KernelInitializationBlock, MemoryDescriptorList};
use kernel_info::descriptor::{LoaderMemoryDescriptor, LoaderMemoryType};
use kernel_ke::arch::native::TrapTrampolines;
use kernel_ke::processor::current_processor_block;
use kernel_ke::resources::{SystemResource, SystemResourceType};
use kernel_ke::{BootContext, StartOptions, start_xt_system};
use kernel_memory_addresses::PhysicalAddress;
use kernel_mm::table::InMemoryTables;
use std::panic::{AssertUnwindSafe, catch_unwind};

extern "C" fn next_stage(_context: usize) -> ! {
    unreachable!("the recording platform never enters the next stage")
}

fn leak<T>(value: T) -> &'static mut T {
    Box::leak(Box::new(value))
}

fn wide(text: &str) -> u64 {
    let units: Vec<u16> = text.encode_utf16().chain([0]).collect();
    units.leak().as_ptr() as usize as u64
}

fn trampolines() -> TrapTrampolines {
    TrapTrampolines {
        exceptions: core::array::from_fn(|v| 0xFFFF_F800_0010_0000 + 0x20 * v as u64),
        unexpected: 0xFFFF_F800_0010_1000,
    }
}

#[test]
fn boot_reaches_the_kernel_stack() {
    let platform: &'static MockPlatform = leak(MockPlatform::new().with_cr4(Cr4::new().with_pae(true)));
    let descriptors = vec![
        LoaderMemoryDescriptor::new(LoaderMemoryType::FIRMWARE_PERMANENT, 0x0, 0x100),
        LoaderMemoryDescriptor::new(LoaderMemoryType::LOADED_PROGRAM, 0x100, 0x200),
        LoaderMemoryDescriptor::new(LoaderMemoryType::FREE, 0x300, 0x4000),
        LoaderMemoryDescriptor::new(LoaderMemoryType::BAD, 0x4300, 0x10),
    ]
    .leak();
    let block = leak(KernelInitializationBlock {
        firmware_type: FirmwareType::EFI,
        kernel_parameters: wide("DEBUG=QEMU LOGLEVEL=info"),
        memory_descriptors: MemoryDescriptorList::from_slice(descriptors),
        ..KernelInitializationBlock::new()
    });

    let context = leak(BootContext::new());
    let context_address = core::ptr::from_ref(&*context).addr();
    let stack_top = context.processor.kernel_stack_top();
    let options = StartOptions {
        debug_io: true,
        default_debug_port: None,
    };

    let block = core::ptr::from_ref(block);
    let mut slot = Some(context);
    let payload = catch_unwind(AssertUnwindSafe(move || {
        let context = slot.take().unwrap();
        let mut tables = InMemoryTables::new();
        unsafe { start_xt_system(platform, context, block, &mut tables, options, trampolines(), next_stage) }
    }))
    .unwrap_err();
    assert!(is_stack_switch_panic(payload.as_ref()));

    let events = platform.events();
    let position = |wanted: &PlatformEvent| events.iter().position(|e| e == wanted).unwrap();
    let load_gdt = events
        .iter()
        .position(|e| matches!(e, PlatformEvent::LoadGdt { .. }))
        .unwrap();
    let read_cr4 = position(&PlatformEvent::ReadCr4);
    let mask = position(&PlatformEvent::SetTaskPriority(RunLevel::HIGH.priority_class()));
    assert!(load_gdt < read_cr4, "processor bootstrap precedes machine initialization");
    assert!(read_cr4 < mask);
    // The stack switch is the final act; its log line may land between it and the mask.
    let switch = events.len() - 1;
    assert_eq!(
        events[switch],
        PlatformEvent::SwitchStack {
            stack_top,
            argument: context_address,
        }
    );
    assert_eq!(RunLevel::HIGH.priority_class(), 15);
    assert!(mask < switch);
    assert!(
        !events[mask..]
            .iter()
            .any(|e| matches!(e, PlatformEvent::SetTaskPriority(priority) if *priority < 15)),
        "interrupts stay masked up to the stack switch"
    );
    assert!(!platform.halted());

    // The next stage picks the context up from the handoff argument.
    let context = unsafe { BootContext::from_handoff(context_address) };
    let info = context.boot_information().unwrap();
    assert_eq!(info.firmware_type, FirmwareType::EFI);
    assert_eq!(info.memory_descriptors.len(), 4);

    let block = current_processor_block(platform).unwrap();
    assert!(core::ptr::eq(block, &context.processor.block));
    assert_eq!(block.run_level(), RunLevel::HIGH);
    assert!(context.active_processors.contains(0));

    let manager = context.memory_manager().unwrap();
    assert_eq!(manager.pfn().number_of_physical_pages(), 0x4200);
    assert_eq!(kernel_mm::memory_layout(), Some(manager.memory_layout()));
    let bound = kernel_mm::page_map().unwrap();
    assert_eq!(bound.mode(), manager.page_map().mode());
    #[cfg(target_arch = "x86_64")]
    assert_eq!(bound.mode(), kernel_mm::PagingMode::FourLevel);

    let fb = SystemResource::new(SystemResourceType::FrameBuffer, PhysicalAddress::new(0x8000_0000), 0x1000);
    context.resources.register_resource(fb).unwrap();

    let console = String::from_utf8(platform.port_writes(kernel_debug::QEMU_DEBUG_PORT)).unwrap();
    assert!(console.contains("memory layout:"), "{console}");
    assert!(console.contains("switching to the kernel boot stack"), "{console}");
}

//! # x86 / x86-64 platform
//!
//! The only place in the kernel core that executes privileged instructions.

use crate::{CpuidResult, DescriptorTablePointer, KernelSelectors, Platform, StackEntry};
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::cr3::Cr3;
use kernel_registers::cr4::Cr4;
use kernel_registers::msr::Msr;
use kernel_registers::rflags::Rflags;
use kernel_registers::{LoadRegister, LoadRegisterUnsafe, StoreRegisterUnsafe};

/// Identity-mapped xAPIC register page (TPR lives at offset `0x80`).
#[cfg(target_arch = "x86")]
const LOCAL_APIC_TPR: usize = 0xFEE0_0080;

/// The processor the code is running on.
#[derive(Copy, Clone, Debug, Default)]
pub struct X86Platform;

impl X86Platform {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Platform for X86Platform {
    #[inline]
    fn read_cr3(&self) -> Cr3 {
        // SAFETY: the kernel runs at CPL 0.
        unsafe { Cr3::load_unsafe() }
    }

    #[inline]
    unsafe fn write_cr3(&self, value: Cr3) {
        unsafe { value.store_unsafe() }
    }

    #[inline]
    fn read_cr4(&self) -> Cr4 {
        // SAFETY: the kernel runs at CPL 0.
        unsafe { Cr4::load_unsafe() }
    }

    #[inline]
    unsafe fn load_gdt(&self, gdtr: &DescriptorTablePointer) {
        unsafe {
            core::arch::asm!(
                "lgdt [{}]",
                in(reg) core::ptr::from_ref(gdtr),
                options(readonly, nostack, preserves_flags)
            );
        }
    }

    #[inline]
    unsafe fn load_idt(&self, idtr: &DescriptorTablePointer) {
        unsafe {
            core::arch::asm!(
                "lidt [{}]",
                in(reg) core::ptr::from_ref(idtr),
                options(readonly, nostack, preserves_flags)
            );
        }
    }

    #[cfg(target_arch = "x86_64")]
    unsafe fn load_segments(&self, selectors: KernelSelectors) {
        unsafe {
            core::arch::asm!(
                "mov ds, {data:x}",
                "mov es, {data:x}",
                "mov ss, {data:x}",
                data = in(reg) selectors.data,
                options(nostack, preserves_flags)
            );

            // Far return reloads CS in long mode.
            core::arch::asm!(
                "push {cs}",
                "lea {tmp}, [rip + 2f]",
                "push {tmp}",
                "retfq",
                "2:",
                cs = in(reg) u64::from(selectors.code),
                tmp = lateout(reg) _,
                options(preserves_flags)
            );
        }
    }

    #[cfg(target_arch = "x86")]
    unsafe fn load_segments(&self, selectors: KernelSelectors) {
        unsafe {
            core::arch::asm!(
                "mov ds, {data:x}",
                "mov es, {data:x}",
                "mov ss, {data:x}",
                "mov fs, {pcr:x}",
                "xor {zero:e}, {zero:e}",
                "mov gs, {zero:x}",
                data = in(reg) selectors.data,
                pcr = in(reg) selectors.processor_block,
                zero = out(reg) _,
                options(nostack, preserves_flags)
            );

            core::arch::asm!(
                "push {cs}",
                "lea {tmp}, [2f]",
                "push {tmp}",
                "retf",
                "2:",
                cs = in(reg) u32::from(selectors.code),
                tmp = lateout(reg) _,
                options(preserves_flags)
            );
        }
    }

    #[inline]
    unsafe fn load_task_register(&self, selector: u16) {
        unsafe {
            core::arch::asm!("ltr {0:x}", in(reg) selector, options(nostack, preserves_flags));
        }
    }

    #[cfg(target_arch = "x86_64")]
    unsafe fn set_processor_block_base(&self, base: usize) {
        unsafe {
            Msr::IA32_GS_BASE.store_raw(base as u64);
            Msr::IA32_KERNEL_GS_BASE.store_raw(base as u64);
        }
    }

    #[cfg(target_arch = "x86")]
    unsafe fn set_processor_block_base(&self, base: usize) {
        // The base is part of the FS descriptor; verify it landed there.
        debug_assert_eq!(self.processor_block_self(), base);
    }

    #[cfg(target_arch = "x86_64")]
    #[inline]
    fn processor_block_self(&self) -> usize {
        let value: usize;
        unsafe {
            core::arch::asm!("mov {}, gs:[0]", out(reg) value, options(readonly, nostack, preserves_flags));
        }
        value
    }

    #[cfg(target_arch = "x86")]
    #[inline]
    fn processor_block_self(&self) -> usize {
        let value: usize;
        unsafe {
            core::arch::asm!("mov {}, fs:[0]", out(reg) value, options(readonly, nostack, preserves_flags));
        }
        value
    }

    #[inline]
    unsafe fn read_msr(&self, msr: Msr) -> u64 {
        unsafe { msr.load_raw() }
    }

    #[inline]
    unsafe fn write_msr(&self, msr: Msr, value: u64) {
        unsafe { msr.store_raw(value) }
    }

    #[inline]
    fn cpuid(&self, leaf: u32) -> CpuidResult {
        #[cfg(target_arch = "x86_64")]
        let r = unsafe { core::arch::x86_64::__cpuid_count(leaf, 0) };
        #[cfg(target_arch = "x86")]
        let r = unsafe { core::arch::x86::__cpuid_count(leaf, 0) };
        CpuidResult {
            eax: r.eax,
            ebx: r.ebx,
            ecx: r.ecx,
            edx: r.edx,
        }
    }

    #[inline]
    fn disable_interrupts(&self) {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
    }

    #[inline]
    fn enable_interrupts(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
    }

    #[inline]
    fn interrupts_enabled(&self) -> bool {
        Rflags::load().interrupt_enable()
    }

    #[inline]
    fn halt(&self) {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    unsafe fn read_port_u8(&self, port: u16) -> u8 {
        let value: u8;
        unsafe {
            core::arch::asm!("in al, dx", in("dx") port, out("al") value, options(nomem, nostack, preserves_flags));
        }
        value
    }

    #[inline]
    unsafe fn write_port_u8(&self, port: u16, value: u8) {
        unsafe {
            core::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn task_priority(&self) -> u8 {
        use kernel_registers::cr8::Cr8;
        // SAFETY: CR8 is readable at CPL 0.
        unsafe { Cr8::load_unsafe() }.tpr()
    }

    #[cfg(target_arch = "x86")]
    fn task_priority(&self) -> u8 {
        // SAFETY: the APIC page is identity mapped during boot.
        let tpr = unsafe { core::ptr::read_volatile(LOCAL_APIC_TPR as *const u32) };
        ((tpr >> 4) & 0xF) as u8
    }

    #[cfg(target_arch = "x86_64")]
    unsafe fn set_task_priority(&self, class: u8) {
        use kernel_registers::cr8::Cr8;
        unsafe { Cr8::new().with_tpr(class & 0xF).store_unsafe() }
    }

    #[cfg(target_arch = "x86")]
    unsafe fn set_task_priority(&self, class: u8) {
        unsafe { core::ptr::write_volatile(LOCAL_APIC_TPR as *mut u32, u32::from(class & 0xF) << 4) }
    }

    #[cfg(target_arch = "x86_64")]
    unsafe fn switch_stack(&self, stack_top: usize, entry: StackEntry, argument: usize) -> ! {
        unsafe {
            core::arch::asm!(
                "mov rsp, {top}",
                "xor ebp, ebp",
                // Fake return address keeps RSP % 16 == 8 at entry.
                "push 0",
                "jmp {entry}",
                top = in(reg) stack_top,
                entry = in(reg) entry,
                in("rdi") argument,
                options(noreturn)
            )
        }
    }

    #[cfg(target_arch = "x86")]
    unsafe fn switch_stack(&self, stack_top: usize, entry: StackEntry, argument: usize) -> ! {
        unsafe {
            core::arch::asm!(
                "mov esp, {top}",
                "xor ebp, ebp",
                "push {arg}",
                "push 0",
                "jmp {entry}",
                top = in(reg) stack_top,
                arg = in(reg) argument,
                entry = in(reg) entry,
                options(noreturn)
            )
        }
    }

    #[inline]
    unsafe fn write_mmio_u32(&self, address: VirtualAddress, value: u32) {
        unsafe { core::ptr::write_volatile(address.as_mut_ptr::<u32>(), value) }
    }
}

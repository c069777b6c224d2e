use kernel_memory_addresses::VirtualAddress;
use kernel_registers::cr3::Cr3;
use kernel_registers::cr4::Cr4;
use kernel_registers::msr::Msr;

/// Pointer format required by `lgdt` / `lidt`.
///
/// The CPU reads exactly `limit + 1` bytes starting at `base`.
#[repr(C, packed(2))]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DescriptorTablePointer {
    /// Size of the table **minus one** in bytes.
    pub limit: u16,
    /// Linear address of the table.
    pub base: usize,
}

impl DescriptorTablePointer {
    /// Describes the table `table` lives in.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn for_table<T>(table: &T) -> Self {
        Self {
            limit: (size_of::<T>() - 1) as u16,
            base: core::ptr::from_ref(table) as usize,
        }
    }
}

/// Entry point reached through [`Platform::switch_stack`].
pub type StackEntry = extern "C" fn(argument: usize) -> !;

/// Selectors loaded after a new GDT becomes active.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KernelSelectors {
    /// Ring-0 code segment (CS).
    pub code: u16,
    /// Ring-0 data segment (DS, ES, SS).
    pub data: u16,
    /// Segment whose base is the processor block (FS on x86). Zero when the
    /// block is addressed through the GS base MSR instead.
    pub processor_block: u16,
}

/// Register output of one `cpuid` leaf.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// The narrow set of processor intrinsics the kernel core is built on.
///
/// Methods that can break the machine state (descriptor loads, MSR and port
/// writes, segment reloads) are `unsafe`; reads and `hlt` are not.
pub trait Platform: Sync {
    /// Reads CR3 (top-level paging structure).
    fn read_cr3(&self) -> Cr3;

    /// Writes CR3, flushing non-global TLB entries.
    ///
    /// # Safety
    /// The new paging structure must map the executing code and stack.
    unsafe fn write_cr3(&self, value: Cr3);

    /// Reads CR4. Only the paging-mode probe consumes this.
    fn read_cr4(&self) -> Cr4;

    /// Executes `lgdt`.
    ///
    /// # Safety
    /// The table must be valid and stay mapped for the lifetime of the CPU.
    unsafe fn load_gdt(&self, gdtr: &DescriptorTablePointer);

    /// Executes `lidt`.
    ///
    /// # Safety
    /// The table must be valid and stay mapped for the lifetime of the CPU.
    unsafe fn load_idt(&self, idtr: &DescriptorTablePointer);

    /// Reloads CS, DS, ES, SS (and FS on x86) from the active GDT.
    ///
    /// # Safety
    /// The selectors must reference present descriptors of the active GDT.
    unsafe fn load_segments(&self, selectors: KernelSelectors);

    /// Executes `ltr`.
    ///
    /// # Safety
    /// `selector` must reference an available TSS descriptor in the active GDT.
    unsafe fn load_task_register(&self, selector: u16);

    /// Makes `base` the address reached through the processor-block segment.
    ///
    /// Writes the GS base MSRs on x86-64. On x86 the base lives in the GDT
    /// descriptor loaded into FS, so this only has to agree with it.
    ///
    /// # Safety
    /// `base` must point at a processor block that outlives the CPU.
    unsafe fn set_processor_block_base(&self, base: usize);

    /// Reads the processor block's self pointer through the segment register
    /// (`gs:[0]` on x86-64, `fs:[0]` on x86).
    fn processor_block_self(&self) -> usize;

    /// Executes `rdmsr`.
    ///
    /// # Safety
    /// The MSR must exist on this CPU.
    unsafe fn read_msr(&self, msr: Msr) -> u64;

    /// Executes `wrmsr`.
    ///
    /// # Safety
    /// The MSR must exist and accept `value`.
    unsafe fn write_msr(&self, msr: Msr, value: u64);

    /// Executes `cpuid` for `leaf` (sub-leaf 0).
    fn cpuid(&self, leaf: u32) -> CpuidResult;

    /// `cli`
    fn disable_interrupts(&self);

    /// `sti`
    fn enable_interrupts(&self);

    /// Whether RFLAGS.IF is set.
    fn interrupts_enabled(&self) -> bool;

    /// Executes a single `hlt`.
    fn halt(&self);

    /// Reads one byte from an I/O port.
    ///
    /// # Safety
    /// The port must belong to a device in a state that tolerates the read.
    unsafe fn read_port_u8(&self, port: u16) -> u8;

    /// Writes one byte to an I/O port.
    ///
    /// # Safety
    /// The port must belong to the intended device.
    unsafe fn write_port_u8(&self, port: u16, value: u8);

    /// Current task priority class (0–15).
    fn task_priority(&self) -> u8;

    /// Sets the task priority class (0–15): CR8 on x86-64, the local APIC TPR
    /// on x86.
    ///
    /// # Safety
    /// Lowering the priority may deliver pending interrupts immediately.
    unsafe fn set_task_priority(&self, class: u8);

    /// Loads `stack_top` into the stack pointer and jumps to `entry` with
    /// `argument`. The current stack frame is abandoned.
    ///
    /// # Safety
    /// `stack_top` must be the 16-byte aligned top of a mapped stack that
    /// nothing else uses, and every borrow living on the old stack ends here.
    unsafe fn switch_stack(&self, stack_top: usize, entry: StackEntry, argument: usize) -> !;

    /// Volatile 32-bit MMIO write.
    ///
    /// # Safety
    /// `address` must be mapped to the device register.
    unsafe fn write_mmio_u32(&self, address: VirtualAddress, value: u32);
}

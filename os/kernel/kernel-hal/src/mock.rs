//! # Recording platform for host tests
//!
//! [`MockPlatform`] implements [`Platform`] on plain memory and appends a
//! [`PlatformEvent`] for every call, so tests can assert on ordering and on
//! the *absence* of side effects. [`Platform::halt`] records the event and
//! then panics with [`HALT_MESSAGE`]; wrap non-returning paths in
//! `std::panic::catch_unwind` to observe them.

use crate::{CpuidResult, DescriptorTablePointer, KernelSelectors, Platform, StackEntry};
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::cr3::Cr3;
use kernel_registers::cr4::Cr4;
use kernel_registers::msr::Msr;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::vec::Vec;

/// Panic payload raised by [`MockPlatform::halt`].
pub const HALT_MESSAGE: &str = "mock platform: processor halted";

/// Panic payload raised by [`MockPlatform::switch_stack`].
pub const STACK_SWITCH_MESSAGE: &str = "mock platform: boot stack switched";

/// Whether a caught panic payload came from [`MockPlatform::halt`].
pub fn is_halt_panic(payload: &(dyn Any + Send)) -> bool {
    payload.downcast_ref::<&str>() == Some(&HALT_MESSAGE)
}

/// Whether a caught panic payload came from [`MockPlatform::switch_stack`].
pub fn is_stack_switch_panic(payload: &(dyn Any + Send)) -> bool {
    payload.downcast_ref::<&str>() == Some(&STACK_SWITCH_MESSAGE)
}

/// One recorded platform call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlatformEvent {
    ReadCr3,
    WriteCr3(u64),
    ReadCr4,
    LoadGdt { base: usize, limit: u16 },
    LoadIdt { base: usize, limit: u16 },
    LoadSegments(KernelSelectors),
    LoadTaskRegister(u16),
    SetProcessorBlockBase(usize),
    ReadProcessorBlockSelf,
    ReadMsr(u32),
    WriteMsr(u32, u64),
    Cpuid(u32),
    DisableInterrupts,
    EnableInterrupts,
    Halt,
    ReadPort(u16),
    WritePort(u16, u8),
    SetTaskPriority(u8),
    WriteMmio(u64, u32),
    SwitchStack { stack_top: usize, argument: usize },
}

#[derive(Default)]
struct State {
    events: Vec<PlatformEvent>,
    cr3: u64,
    cr4: u64,
    msrs: HashMap<u32, u64>,
    cpuid: HashMap<u32, CpuidResult>,
    /// Fixed values returned by port reads (device status registers).
    port_inputs: HashMap<u16, u8>,
    /// Last value written per port; read back when no fixed input exists.
    port_latches: HashMap<u16, u8>,
    task_priority: u8,
    interrupts_enabled: bool,
    processor_block_base: usize,
}

/// A [`Platform`] backed by plain memory that records every call.
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<State>,
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cr3(self, cr3: Cr3) -> Self {
        self.lock().cr3 = cr3.into_bits();
        self
    }

    #[must_use]
    pub fn with_cr4(self, cr4: Cr4) -> Self {
        self.lock().cr4 = cr4.into_bits();
        self
    }

    #[must_use]
    pub fn with_msr(self, msr: Msr, value: u64) -> Self {
        self.lock().msrs.insert(msr.raw(), value);
        self
    }

    #[must_use]
    pub fn with_cpuid(self, leaf: u32, result: CpuidResult) -> Self {
        self.lock().cpuid.insert(leaf, result);
        self
    }

    /// Makes every read of `port` return `value`, regardless of writes.
    #[must_use]
    pub fn with_port_input(self, port: u16, value: u8) -> Self {
        self.lock().port_inputs.insert(port, value);
        self
    }

    #[must_use]
    pub fn with_interrupts_enabled(self, enabled: bool) -> Self {
        self.lock().interrupts_enabled = enabled;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A test that panicked while recording leaves consistent data behind.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, event: PlatformEvent) {
        self.lock().events.push(event);
    }

    /// All calls recorded so far, oldest first.
    pub fn events(&self) -> Vec<PlatformEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// Bytes written to `port`, in order.
    pub fn port_writes(&self, port: u16) -> Vec<u8> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                PlatformEvent::WritePort(p, v) if *p == port => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Current value of an MSR (0 if never written).
    pub fn msr(&self, msr: Msr) -> u64 {
        self.lock().msrs.get(&msr.raw()).copied().unwrap_or_default()
    }

    pub fn current_task_priority(&self) -> u8 {
        self.lock().task_priority
    }

    pub fn current_processor_block_base(&self) -> usize {
        self.lock().processor_block_base
    }

    pub fn halted(&self) -> bool {
        self.lock().events.contains(&PlatformEvent::Halt)
    }
}

impl Platform for MockPlatform {
    fn read_cr3(&self) -> Cr3 {
        let mut state = self.lock();
        state.events.push(PlatformEvent::ReadCr3);
        Cr3::from_bits(state.cr3)
    }

    unsafe fn write_cr3(&self, value: Cr3) {
        let mut state = self.lock();
        state.events.push(PlatformEvent::WriteCr3(value.into_bits()));
        state.cr3 = value.into_bits();
    }

    fn read_cr4(&self) -> Cr4 {
        let mut state = self.lock();
        state.events.push(PlatformEvent::ReadCr4);
        Cr4::from_bits(state.cr4)
    }

    unsafe fn load_gdt(&self, gdtr: &DescriptorTablePointer) {
        let (base, limit) = (gdtr.base, gdtr.limit);
        self.record(PlatformEvent::LoadGdt { base, limit });
    }

    unsafe fn load_idt(&self, idtr: &DescriptorTablePointer) {
        let (base, limit) = (idtr.base, idtr.limit);
        self.record(PlatformEvent::LoadIdt { base, limit });
    }

    unsafe fn load_segments(&self, selectors: KernelSelectors) {
        self.record(PlatformEvent::LoadSegments(selectors));
    }

    unsafe fn load_task_register(&self, selector: u16) {
        self.record(PlatformEvent::LoadTaskRegister(selector));
    }

    unsafe fn set_processor_block_base(&self, base: usize) {
        let mut state = self.lock();
        state.events.push(PlatformEvent::SetProcessorBlockBase(base));
        state.processor_block_base = base;
    }

    fn processor_block_self(&self) -> usize {
        let base = {
            let mut state = self.lock();
            state.events.push(PlatformEvent::ReadProcessorBlockSelf);
            state.processor_block_base
        };
        if base == 0 {
            return 0;
        }
        // SAFETY: tests only install bases that point at a live processor
        // block whose first field is its self pointer.
        unsafe { core::ptr::read_volatile(base as *const usize) }
    }

    unsafe fn read_msr(&self, msr: Msr) -> u64 {
        let mut state = self.lock();
        state.events.push(PlatformEvent::ReadMsr(msr.raw()));
        state.msrs.get(&msr.raw()).copied().unwrap_or_default()
    }

    unsafe fn write_msr(&self, msr: Msr, value: u64) {
        let mut state = self.lock();
        state.events.push(PlatformEvent::WriteMsr(msr.raw(), value));
        state.msrs.insert(msr.raw(), value);
    }

    fn cpuid(&self, leaf: u32) -> CpuidResult {
        let mut state = self.lock();
        state.events.push(PlatformEvent::Cpuid(leaf));
        state.cpuid.get(&leaf).copied().unwrap_or_default()
    }

    fn disable_interrupts(&self) {
        let mut state = self.lock();
        state.events.push(PlatformEvent::DisableInterrupts);
        state.interrupts_enabled = false;
    }

    fn enable_interrupts(&self) {
        let mut state = self.lock();
        state.events.push(PlatformEvent::EnableInterrupts);
        state.interrupts_enabled = true;
    }

    fn interrupts_enabled(&self) -> bool {
        self.lock().interrupts_enabled
    }

    fn halt(&self) {
        self.record(PlatformEvent::Halt);
        std::panic::panic_any(HALT_MESSAGE);
    }

    unsafe fn read_port_u8(&self, port: u16) -> u8 {
        let mut state = self.lock();
        state.events.push(PlatformEvent::ReadPort(port));
        if let Some(value) = state.port_inputs.get(&port) {
            return *value;
        }
        // Unclaimed ports float high.
        state.port_latches.get(&port).copied().unwrap_or(0xFF)
    }

    unsafe fn write_port_u8(&self, port: u16, value: u8) {
        let mut state = self.lock();
        state.events.push(PlatformEvent::WritePort(port, value));
        state.port_latches.insert(port, value);
    }

    fn task_priority(&self) -> u8 {
        self.lock().task_priority
    }

    unsafe fn set_task_priority(&self, class: u8) {
        let mut state = self.lock();
        state.events.push(PlatformEvent::SetTaskPriority(class));
        state.task_priority = class;
    }

    /// Records the switch and unwinds instead of entering `entry`, which
    /// would never return control to the test.
    unsafe fn switch_stack(&self, stack_top: usize, _entry: StackEntry, argument: usize) -> ! {
        self.record(PlatformEvent::SwitchStack { stack_top, argument });
        std::panic::panic_any(STACK_SWITCH_MESSAGE);
    }

    unsafe fn write_mmio_u32(&self, address: VirtualAddress, value: u32) {
        self.record(PlatformEvent::WriteMmio(address.as_u64(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_records_then_panics() {
        let platform = MockPlatform::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| platform.halt()));
        let payload = result.expect_err("halt must not return");
        assert!(is_halt_panic(payload.as_ref()));
        assert!(platform.halted());
    }

    #[test]
    fn ports_latch_unless_input_is_fixed() {
        let platform = MockPlatform::new().with_port_input(0x3FD, 0x20);
        unsafe {
            assert_eq!(platform.read_port_u8(0x3FF), 0xFF);
            platform.write_port_u8(0x3FF, 0x55);
            assert_eq!(platform.read_port_u8(0x3FF), 0x55);
            platform.write_port_u8(0x3FD, 0x00);
            assert_eq!(platform.read_port_u8(0x3FD), 0x20);
        }
        assert_eq!(platform.port_writes(0x3FF), vec![0x55]);
    }
}

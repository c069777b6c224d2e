//! # Processor bootstrap
//!
//! Brings one logical processor from the loader's state to one where kernel
//! code can address "the current processor" and take traps:
//!
//! ```text
//! prepare_processor ─▶ load_processor_tables ─▶ verify_processor_block ─▶ initialize_processor
//! (build GDT/IDT/TSS)   (lgdt, segments, ltr,    (segment-relative         (stall factor, active set,
//!                         lidt, block base)        self pointer)             APIC, run level)
//! ```
//!
//! The boot processor runs this on its static [`ProcessorStorage`]. For an
//! application processor the boot processor prepares a separate storage and
//! the AP loads it itself; no two processors ever write the same block.

use crate::arch::native::{self, ProcessorTables, StackTops, TrapTrampolines};
use crate::error::ProcessorError;
use core::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use kernel_hal::{DescriptorTablePointer, Platform, RunLevel, apic};
use kernel_info::memory::{KERNEL_FAULT_STACK_SIZE, KERNEL_STACK_SIZE, MAXIMUM_PROCESSORS};
use kernel_memory_addresses::VirtualAddress;
use log::{debug, info};

/// Stall scale factor a processor starts with until it is calibrated.
pub const INITIAL_STALL_FACTOR: u32 = 100;

/// Queued spin lock slots per processor.
pub const LOCK_QUEUE_COUNT: usize = 16;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ProcessorPowerState {
    #[default]
    Running,
    Idle,
}

/// A processor's entry in a queued spin lock.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LockQueueEntry {
    /// Next waiter, 0 for none.
    pub next: usize,
    /// The lock this entry waits on, 0 when unused.
    pub lock: usize,
}

/// Per-processor scheduling and power data embedded in the [`ProcessorBlock`].
#[repr(C)]
#[derive(Debug)]
pub struct ProcessorControlBlock {
    pub number: u32,
    pub set_member: u64,
    pub power_state: ProcessorPowerState,
    pub lock_queues: [LockQueueEntry; LOCK_QUEUE_COUNT],
    /// Head of the deferred procedure call queue, 0 when empty.
    pub dpc_queue: usize,
}

impl ProcessorControlBlock {
    const fn new(number: u32) -> Self {
        Self {
            number,
            set_member: set_member(number),
            power_state: ProcessorPowerState::Running,
            lock_queues: [LockQueueEntry { next: 0, lock: 0 }; LOCK_QUEUE_COUNT],
            dpc_queue: 0,
        }
    }
}

/// The per-processor block reached through the processor-block segment.
///
/// `self_address` sits at offset 0 so that a single segment-relative load
/// yields the block's linear address.
#[repr(C, align(64))]
#[derive(Debug)]
pub struct ProcessorBlock {
    self_address: usize,
    prcb_address: usize,
    pub gdt: VirtualAddress,
    pub idt: VirtualAddress,
    pub tss: VirtualAddress,
    run_level: AtomicU8,
    pub stall_scale_factor: u32,
    pub set_member: u64,
    pub number: u32,
    pub prcb: ProcessorControlBlock,
}

const _: () = assert!(core::mem::offset_of!(ProcessorBlock, self_address) == 0);

const fn set_member(number: u32) -> u64 {
    if (number as usize) < MAXIMUM_PROCESSORS {
        1 << number
    } else {
        0
    }
}

impl ProcessorBlock {
    /// An unbound block for processor `number`, starting at
    /// [`RunLevel::PASSIVE`].
    #[must_use]
    pub const fn new_for(number: u32) -> Self {
        Self {
            self_address: 0,
            prcb_address: 0,
            gdt: VirtualAddress::zero(),
            idt: VirtualAddress::zero(),
            tss: VirtualAddress::zero(),
            run_level: AtomicU8::new(RunLevel::PASSIVE.as_u8()),
            stall_scale_factor: 0,
            set_member: set_member(number),
            number,
            prcb: ProcessorControlBlock::new(number),
        }
    }

    /// Records the block's own address and that of its control block. The
    /// block must not move afterwards.
    pub fn bind(&mut self) {
        self.self_address = core::ptr::from_ref(self).expose_provenance();
        self.prcb_address = core::ptr::from_ref(&self.prcb).addr();
    }

    #[must_use]
    pub const fn self_address(&self) -> usize {
        self.self_address
    }

    /// Address of the embedded control block, 0 until bound.
    #[must_use]
    pub const fn control_block_address(&self) -> usize {
        self.prcb_address
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.self_address == core::ptr::from_ref(self).addr()
    }

    #[must_use]
    pub fn run_level(&self) -> RunLevel {
        RunLevel::from_priority_class(self.run_level.load(Ordering::Relaxed))
    }

    /// Sets the level recorded in the block without touching the hardware.
    pub fn set_run_level(&self, level: RunLevel) {
        self.run_level.store(level.as_u8(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn control_block(&self) -> &ProcessorControlBlock {
        &self.prcb
    }
}

/// Stack memory; the top is 16-byte aligned.
#[repr(C, align(16))]
pub struct Stack<const N: usize>([u8; N]);

impl<const N: usize> Stack<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self([0; N])
    }

    /// One past the highest byte.
    #[must_use]
    pub fn top(&self) -> usize {
        core::ptr::from_ref(self).addr() + N
    }
}

impl<const N: usize> Default for Stack<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one processor needs that must outlive it.
#[repr(C)]
pub struct ProcessorStorage {
    pub block: ProcessorBlock,
    pub tables: ProcessorTables,
    pub kernel_stack: Stack<KERNEL_STACK_SIZE>,
    pub double_fault_stack: Stack<KERNEL_FAULT_STACK_SIZE>,
    pub nmi_stack: Stack<KERNEL_FAULT_STACK_SIZE>,
    pub machine_check_stack: Stack<KERNEL_FAULT_STACK_SIZE>,
}

impl ProcessorStorage {
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self {
            block: ProcessorBlock::new_for(number),
            tables: ProcessorTables::new(),
            kernel_stack: Stack::new(),
            double_fault_stack: Stack::new(),
            nmi_stack: Stack::new(),
            machine_check_stack: Stack::new(),
        }
    }

    /// Top of the permanent kernel stack.
    #[must_use]
    pub fn kernel_stack_top(&self) -> usize {
        self.kernel_stack.top()
    }

    fn stack_tops(&self) -> StackTops {
        StackTops::new(
            self.kernel_stack.top(),
            self.double_fault_stack.top(),
            self.nmi_stack.top(),
            self.machine_check_stack.top(),
        )
    }
}

/// Processors that completed [`initialize_processor`], one bit each.
#[derive(Debug, Default)]
pub struct ProcessorSet(AtomicU64);

impl ProcessorSet {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Adds processor `number`; safe to race with other processors.
    ///
    /// # Errors
    /// [`ProcessorError::NumberOutOfRange`] past the supported processor count.
    pub fn insert(&self, number: u32) -> Result<(), ProcessorError> {
        let member = set_member(number);
        if member == 0 {
            return Err(ProcessorError::NumberOutOfRange(number));
        }
        self.0.fetch_or(member, Ordering::AcqRel);
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, number: u32) -> bool {
        self.bits() & set_member(number) != 0
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.bits().count_ones()
    }

    #[must_use]
    pub fn bits(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Builds the processor's descriptor tables and binds the block's pointers.
pub fn prepare_processor(storage: &mut ProcessorStorage, trampolines: &TrapTrampolines, cr3: u64) {
    let stacks = storage.stack_tops();
    storage.block.bind();
    let block = core::ptr::from_ref(&storage.block).addr();
    storage
        .tables
        .prepare(block, size_of::<ProcessorBlock>(), &stacks, trampolines, cr3);

    let tables = &storage.tables;
    storage.block.gdt = VirtualAddress::from_ptr(&raw const tables.gdt);
    storage.block.idt = VirtualAddress::from_ptr(&raw const tables.idt);
    storage.block.tss = VirtualAddress::from_ptr(&raw const tables.tss);
}

/// Activates the prepared tables on the executing processor.
///
/// # Safety
/// `storage` must have gone through [`prepare_processor`], must not move, and
/// must outlive the processor.
pub unsafe fn load_processor_tables<P: Platform + ?Sized>(platform: &P, storage: &ProcessorStorage) {
    let gdtr = DescriptorTablePointer::for_table(&storage.tables.gdt);
    let idtr = DescriptorTablePointer::for_table(&storage.tables.idt);

    // SAFETY: the caller guarantees the tables are built and static.
    unsafe {
        platform.load_gdt(&gdtr);
        platform.load_segments(native::SELECTORS);
        platform.load_task_register(native::TSS);
        platform.load_idt(&idtr);
        platform.set_processor_block_base(storage.block.self_address());
    }
    debug!(
        "processor {}: GDT at {}, IDT at {}, TSS at {}",
        storage.block.number, storage.block.gdt, storage.block.idt, storage.block.tss
    );
}

/// Checks that the processor-block segment resolves to `block`.
///
/// # Errors
/// [`ProcessorError::ProcessorBlockMismatch`] if the self pointer read
/// through the segment is not the block's address.
pub fn verify_processor_block<P: Platform + ?Sized>(
    platform: &P,
    block: &ProcessorBlock,
) -> Result<(), ProcessorError> {
    let expected = core::ptr::from_ref(block).addr();
    let found = platform.processor_block_self();
    if found == expected && block.is_bound() {
        Ok(())
    } else {
        Err(ProcessorError::ProcessorBlockMismatch { expected, found })
    }
}

/// Per-processor initialization once the block is reachable: stall factor,
/// active set, interrupt controller, and finally the run level the block
/// asks for (the task priority only means something once the APIC is up).
///
/// # Errors
/// [`ProcessorError::NumberOutOfRange`] if the block's number has no bit in
/// the active set.
pub fn initialize_processor<P: Platform + ?Sized>(
    platform: &P,
    block: &mut ProcessorBlock,
    active: &ProcessorSet,
) -> Result<(), ProcessorError> {
    block.stall_scale_factor = INITIAL_STALL_FACTOR;
    active.insert(block.number)?;

    let mode = apic::initialize_local_apic(platform);

    let level = block.run_level();
    // SAFETY: the level comes from the block; with the APIC just enabled
    // nothing is pending that the previous priority held back.
    unsafe { platform.set_task_priority(level.priority_class()) };

    info!(
        "processor {} online ({mode:?}, run level {level:?}, {} active)",
        block.number,
        active.count()
    );
    Ok(())
}

/// Runs the whole bootstrap for the executing processor.
///
/// # Errors
/// See [`verify_processor_block`] and [`initialize_processor`].
///
/// # Safety
/// Same as [`load_processor_tables`]; `storage` must belong to the executing
/// processor only.
pub unsafe fn bootstrap_processor<P: Platform + ?Sized>(
    platform: &P,
    storage: &mut ProcessorStorage,
    active: &ProcessorSet,
    trampolines: &TrapTrampolines,
) -> Result<(), ProcessorError> {
    prepare_processor(storage, trampolines, platform.read_cr3().into_bits());
    // SAFETY: prepared above; forwarded from the caller.
    unsafe { load_processor_tables(platform, storage) };
    verify_processor_block(platform, &storage.block)?;
    initialize_processor(platform, &mut storage.block, active)
}

/// The executing processor's block.
///
/// `None` until [`load_processor_tables`] ran on this processor.
#[must_use]
pub fn current_processor_block<P: Platform + ?Sized>(platform: &P) -> Option<&'static ProcessorBlock> {
    let address = platform.processor_block_self();
    if address == 0 {
        return None;
    }
    // SAFETY: the segment base is only ever set by `load_processor_tables`,
    // whose contract keeps the block alive and in place.
    Some(unsafe { &*core::ptr::with_exposed_provenance::<ProcessorBlock>(address) })
}

/// The executing processor's control block.
#[must_use]
pub fn current_processor_control_block<P: Platform + ?Sized>(
    platform: &P,
) -> Option<&'static ProcessorControlBlock> {
    current_processor_block(platform).map(ProcessorBlock::control_block)
}

#[must_use]
pub fn current_processor_number<P: Platform + ?Sized>(platform: &P) -> Option<u32> {
    current_processor_block(platform).map(|block| block.number)
}

/// Raises the run level of `block`'s processor and returns the previous one.
///
/// # Errors
/// [`ProcessorError::RunLevelLowered`] if `level` is below the current level.
pub fn raise_run_level<P: Platform + ?Sized>(
    platform: &P,
    block: &ProcessorBlock,
    level: RunLevel,
) -> Result<RunLevel, ProcessorError> {
    let current = block.run_level();
    if level < current {
        return Err(ProcessorError::RunLevelLowered {
            current,
            requested: level,
        });
    }
    // SAFETY: raising the priority never delivers an interrupt.
    unsafe { platform.set_task_priority(level.priority_class()) };
    block.set_run_level(level);
    Ok(current)
}

/// Returns to a level at or below the current one, typically the value
/// [`raise_run_level`] returned.
///
/// # Errors
/// [`ProcessorError::RunLevelRaised`] if `level` is above the current level.
pub fn lower_run_level<P: Platform + ?Sized>(
    platform: &P,
    block: &ProcessorBlock,
    level: RunLevel,
) -> Result<(), ProcessorError> {
    let current = block.run_level();
    if level > current {
        return Err(ProcessorError::RunLevelRaised {
            current,
            requested: level,
        });
    }
    block.set_run_level(level);
    // SAFETY: the caller restores a level it was running at before.
    unsafe { platform.set_task_priority(level.priority_class()) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_hal::mock::{MockPlatform, PlatformEvent};

    fn trampolines() -> TrapTrampolines {
        TrapTrampolines {
            exceptions: core::array::from_fn(|v| 0xFFFF_F800_0010_0000 + 0x20 * v as u64),
            unexpected: 0xFFFF_F800_0010_1000,
        }
    }

    fn storage(number: u32) -> &'static mut ProcessorStorage {
        // Leaked so the block keeps its address like the static one does.
        Box::leak(Box::<ProcessorStorage>::new_uninit()).write(ProcessorStorage::new(number))
    }

    #[test]
    fn set_membership() {
        let set = ProcessorSet::new();
        set.insert(0).unwrap();
        set.insert(5).unwrap();
        set.insert(5).unwrap();
        assert_eq!(set.bits(), 0b10_0001);
        assert_eq!(set.count(), 2);
        assert!(set.contains(5));
        assert!(!set.contains(1));
        assert_eq!(set.insert(64), Err(ProcessorError::NumberOutOfRange(64)));
    }

    #[test]
    fn new_blocks_start_passive() {
        let block = ProcessorBlock::new_for(3);
        assert_eq!(block.run_level(), RunLevel::PASSIVE);
        assert_eq!(block.set_member, 0b1000);
        assert_eq!(block.prcb.number, 3);
        assert!(!block.is_bound());
    }

    #[test]
    fn stacks_are_aligned() {
        let storage = storage(0);
        assert_eq!(storage.kernel_stack_top() % 16, 0);
        assert_eq!(storage.double_fault_stack.top() % 16, 0);
        assert!(storage.kernel_stack_top() > core::ptr::from_ref(&storage.kernel_stack).addr());
    }

    #[test]
    fn bootstrap_loads_tables_in_order() {
        let platform = MockPlatform::new();
        let storage = storage(0);
        let active = ProcessorSet::new();

        unsafe { bootstrap_processor(&platform, storage, &active, &trampolines()) }.unwrap();

        let block = &storage.block;
        let base = core::ptr::from_ref(block).addr();
        let events = platform.events();
        let loads: Vec<_> = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    PlatformEvent::LoadGdt { .. }
                        | PlatformEvent::LoadSegments(_)
                        | PlatformEvent::LoadTaskRegister(_)
                        | PlatformEvent::LoadIdt { .. }
                        | PlatformEvent::SetProcessorBlockBase(_)
                        | PlatformEvent::SetTaskPriority(_)
                )
            })
            .copied()
            .collect();
        assert_eq!(
            loads,
            [
                PlatformEvent::LoadGdt {
                    base: block.gdt.as_u64() as usize,
                    limit: (size_of::<native::Gdt>() - 1) as u16,
                },
                PlatformEvent::LoadSegments(native::SELECTORS),
                PlatformEvent::LoadTaskRegister(native::TSS),
                PlatformEvent::LoadIdt {
                    base: block.idt.as_u64() as usize,
                    limit: 4095,
                },
                PlatformEvent::SetProcessorBlockBase(base),
                PlatformEvent::SetTaskPriority(0),
            ]
        );

        assert!(active.contains(0));
        assert_eq!(block.stall_scale_factor, INITIAL_STALL_FACTOR);
        assert_eq!(storage.tables.tss.rsp0(), storage.kernel_stack_top() as u64);
        assert_eq!(storage.tables.gdt.tss.base(), block.tss.as_u64());
    }

    #[test]
    fn current_block_through_the_segment() {
        let platform = MockPlatform::new();
        assert!(current_processor_block(&platform).is_none());

        let storage = storage(2);
        prepare_processor(storage, &trampolines(), 0);
        unsafe { load_processor_tables(&platform, storage) };

        let current = current_processor_block(&platform).unwrap();
        assert!(core::ptr::eq(current, &storage.block));
        assert_eq!(current_processor_number(&platform), Some(2));
        assert_eq!(current_processor_control_block(&platform).unwrap().number, 2);
        verify_processor_block(&platform, &storage.block).unwrap();
    }

    #[test]
    fn mismatched_self_pointer_is_reported() {
        let platform = MockPlatform::new();
        let first = storage(0);
        let second = storage(1);
        prepare_processor(first, &trampolines(), 0);
        prepare_processor(second, &trampolines(), 0);
        unsafe { load_processor_tables(&platform, first) };

        let err = verify_processor_block(&platform, &second.block).unwrap_err();
        assert_eq!(
            err,
            ProcessorError::ProcessorBlockMismatch {
                expected: core::ptr::from_ref(&second.block).addr(),
                found: core::ptr::from_ref(&first.block).addr(),
            }
        );
    }

    #[test]
    fn run_level_only_goes_up() {
        let platform = MockPlatform::new();
        let block = ProcessorBlock::new_for(0);

        assert_eq!(raise_run_level(&platform, &block, RunLevel::DISPATCH), Ok(RunLevel::PASSIVE));
        assert_eq!(raise_run_level(&platform, &block, RunLevel::HIGH), Ok(RunLevel::DISPATCH));
        assert_eq!(platform.current_task_priority(), 15);
        assert_eq!(
            raise_run_level(&platform, &block, RunLevel::APC),
            Err(ProcessorError::RunLevelLowered {
                current: RunLevel::HIGH,
                requested: RunLevel::APC,
            })
        );

        lower_run_level(&platform, &block, RunLevel::DISPATCH).unwrap();
        assert_eq!(block.run_level(), RunLevel::DISPATCH);
        assert_eq!(platform.current_task_priority(), 2);
        assert!(lower_run_level(&platform, &block, RunLevel::CLOCK).is_err());
    }
}

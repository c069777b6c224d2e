//! # x86-64 descriptor tables
//!
//! ## GDT layout
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (64-bit, DPL=0; [`KERNEL_CODE`])
//! 2     | 0x10     | Kernel data (DPL=0; [`KERNEL_DATA`])
//! 3     | 0x18     | Kernel compatibility-mode code (32-bit; [`COMPATIBILITY_CODE`])
//! 4/5   | 0x20     | TSS (16-byte system descriptor; [`TSS`])
//!
//! The processor block is reached through the GS base MSR, so no segment
//! describes it. Faults that must not run on a possibly broken stack switch
//! through the interrupt stack table instead of separate tasks: double fault
//! on IST 1, NMI on IST 2, machine check on IST 3.

use super::descriptor::{GateAttributes, SegmentDescriptor, selector, types};
use core::ops::{Index, IndexMut};
use kernel_hal::KernelSelectors;

pub const KERNEL_CODE: u16 = selector(1, 0);
pub const KERNEL_DATA: u16 = selector(2, 0);
pub const COMPATIBILITY_CODE: u16 = selector(3, 0);
pub const TSS: u16 = selector(4, 0);

/// IST slot used by the double fault handler.
pub const DOUBLE_FAULT_IST: u8 = 1;
/// IST slot used by the NMI handler.
pub const NMI_IST: u8 = 2;
/// IST slot used by the machine check handler.
pub const MACHINE_CHECK_IST: u8 = 3;

/// Selectors loaded once the GDT is active.
pub const SELECTORS: KernelSelectors = KernelSelectors {
    code: KERNEL_CODE,
    data: KERNEL_DATA,
    processor_block: 0,
};

/// 16-byte TSS system descriptor (two consecutive GDT entries).
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TssDescriptor {
    pub low: SegmentDescriptor,
    /// Base bits 63:32; the upper half is reserved.
    pub high: u64,
}

impl TssDescriptor {
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn new(base: u64, limit: u32) -> Self {
        Self {
            low: SegmentDescriptor::tss(base as u32, limit),
            high: base >> 32,
        }
    }

    #[must_use]
    pub const fn base(&self) -> u64 {
        (self.low.base() as u64) | (self.high << 32)
    }
}

#[repr(C, align(16))]
#[derive(Copy, Clone, Debug)]
pub struct Gdt {
    pub null: SegmentDescriptor,
    pub kernel_code: SegmentDescriptor,
    pub kernel_data: SegmentDescriptor,
    pub compatibility_code: SegmentDescriptor,
    pub tss: TssDescriptor,
}

impl Gdt {
    /// Table with the TSS descriptor pointing at `tss_base`.
    #[must_use]
    pub const fn new(tss_base: u64) -> Self {
        Self {
            null: SegmentDescriptor::NULL,
            kernel_code: SegmentDescriptor::long_mode_code(),
            kernel_data: SegmentDescriptor::flat_data(),
            compatibility_code: SegmentDescriptor::flat_code(),
            tss: TssDescriptor::new(tss_base, TSS_LIMIT),
        }
    }
}

/// 64-bit task state segment.
///
/// Long mode does no hardware task switching; the CPU only reads `rsp[0]` on
/// a privilege change and `ist[n - 1]` for gates with a non-zero IST index.
#[repr(C, packed(4))]
#[derive(Copy, Clone)]
pub struct Tss {
    reserved0: u32,
    rsp: [u64; 3],
    reserved1: u64,
    ist: [u64; 7],
    reserved2: u64,
    reserved3: u16,
    /// Offset of the I/O permission bitmap; the TSS size disables it.
    io_map_base: u16,
}

#[allow(clippy::cast_possible_truncation)]
const TSS_LIMIT: u32 = (size_of::<Tss>() - 1) as u32;

impl Tss {
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reserved0: 0,
            rsp: [0; 3],
            reserved1: 0,
            ist: [0; 7],
            reserved2: 0,
            reserved3: 0,
            io_map_base: size_of::<Self>() as u16,
        }
    }

    /// Ring-0 stack and the three fault stacks.
    #[must_use]
    pub const fn with_stacks(stacks: &StackTops) -> Self {
        let mut tss = Self::new();
        tss.rsp = [stacks.kernel, 0, 0];
        let mut ist = [0; 7];
        ist[(DOUBLE_FAULT_IST - 1) as usize] = stacks.double_fault;
        ist[(NMI_IST - 1) as usize] = stacks.nmi;
        ist[(MACHINE_CHECK_IST - 1) as usize] = stacks.machine_check;
        tss.ist = ist;
        tss
    }

    #[must_use]
    pub const fn rsp0(&self) -> u64 {
        let rsp = self.rsp;
        rsp[0]
    }

    /// Stack top of IST slot `index` (1-based).
    #[must_use]
    pub const fn ist(&self, index: u8) -> Option<u64> {
        let ist = self.ist;
        if index == 0 || index as usize > ist.len() {
            return None;
        }
        Some(ist[index as usize - 1])
    }

    #[must_use]
    pub const fn io_map_base(&self) -> u16 {
        self.io_map_base
    }
}

impl Default for Tss {
    fn default() -> Self {
        Self::new()
    }
}

/// 16-byte interrupt gate.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InterruptGate {
    offset_low: u16,
    selector: u16,
    attributes: GateAttributes,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl InterruptGate {
    pub const MISSING: Self = Self {
        offset_low: 0,
        selector: 0,
        attributes: GateAttributes::new(),
        offset_mid: 0,
        offset_high: 0,
        reserved: 0,
    };

    /// Present ring-0 interrupt gate into the kernel code segment.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn new(handler: u64, ist: u8) -> Self {
        Self {
            offset_low: handler as u16,
            selector: KERNEL_CODE,
            attributes: GateAttributes::kernel(types::INTERRUPT_GATE).with_ist(ist),
            offset_mid: (handler >> 16) as u16,
            offset_high: (handler >> 32) as u32,
            reserved: 0,
        }
    }

    #[must_use]
    pub const fn handler(&self) -> u64 {
        (self.offset_low as u64) | ((self.offset_mid as u64) << 16) | ((self.offset_high as u64) << 32)
    }

    #[must_use]
    pub const fn selector(&self) -> u16 {
        self.selector
    }

    #[must_use]
    pub const fn attributes(&self) -> GateAttributes {
        self.attributes
    }

    /// The gate as the CPU reads it.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        let low = (self.offset_low as u64)
            | ((self.selector as u64) << 16)
            | ((self.attributes.into_bits() as u64) << 32)
            | ((self.offset_mid as u64) << 48);
        let high = self.offset_high as u64;
        let (l, h) = (low.to_le_bytes(), high.to_le_bytes());
        [
            l[0], l[1], l[2], l[3], l[4], l[5], l[6], l[7], h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7],
        ]
    }
}

#[repr(C, align(16))]
#[derive(Copy, Clone)]
pub struct Idt {
    entries: [InterruptGate; 256],
}

impl Idt {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [InterruptGate::MISSING; 256],
        }
    }

    /// Points every vector at a trampoline: exceptions at their own, the rest
    /// at the shared unexpected-interrupt entry.
    pub fn populate(&mut self, trampolines: &TrapTrampolines) {
        for (vector, gate) in self.entries.iter_mut().enumerate() {
            let handler = trampolines
                .exceptions
                .get(vector)
                .copied()
                .unwrap_or(trampolines.unexpected);
            *gate = InterruptGate::new(handler, ist_for_vector(vector));
        }
    }
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for Idt {
    type Output = InterruptGate;

    fn index(&self, vector: usize) -> &Self::Output {
        &self.entries[vector]
    }
}

impl IndexMut<usize> for Idt {
    fn index_mut(&mut self, vector: usize) -> &mut Self::Output {
        &mut self.entries[vector]
    }
}

const fn ist_for_vector(vector: usize) -> u8 {
    match vector {
        super::vectors::DOUBLE_FAULT => DOUBLE_FAULT_IST,
        super::vectors::NMI => NMI_IST,
        super::vectors::MACHINE_CHECK => MACHINE_CHECK_IST,
        _ => 0,
    }
}

/// Entry addresses of the trap trampolines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrapTrampolines {
    /// Vectors 0..32.
    pub exceptions: [u64; 32],
    /// Every other vector.
    pub unexpected: u64,
}

/// Stack tops wired into the TSS.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StackTops {
    pub kernel: u64,
    pub double_fault: u64,
    pub nmi: u64,
    pub machine_check: u64,
}

impl StackTops {
    #[must_use]
    pub const fn new(kernel: usize, double_fault: usize, nmi: usize, machine_check: usize) -> Self {
        Self {
            kernel: kernel as u64,
            double_fault: double_fault as u64,
            nmi: nmi as u64,
            machine_check: machine_check as u64,
        }
    }
}

/// One processor's descriptor tables.
#[repr(C)]
pub struct ProcessorTables {
    pub gdt: Gdt,
    pub idt: Idt,
    pub tss: Tss,
}

impl Default for ProcessorTables {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorTables {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gdt: Gdt::new(0),
            idt: Idt::new(),
            tss: Tss::new(),
        }
    }

    /// Linear address of the TSS as stored in the GDT.
    #[must_use]
    pub fn tss_address(&self) -> u64 {
        core::ptr::from_ref(&self.tss).addr() as u64
    }

    /// Fills the tables in place. The processor block is reached through the
    /// GS base, so neither its address nor CR3 ends up in a descriptor.
    pub fn prepare(
        &mut self,
        _processor_block: usize,
        _processor_block_size: usize,
        stacks: &StackTops,
        trampolines: &TrapTrampolines,
        _cr3: u64,
    ) {
        let tss = self.tss_address();
        self.build(tss, stacks, trampolines);
    }

    /// Fills all three tables; `tss_address` is where `self.tss` lives.
    pub fn build(&mut self, tss_address: u64, stacks: &StackTops, trampolines: &TrapTrampolines) {
        self.tss = Tss::with_stacks(stacks);
        self.gdt = Gdt::new(tss_address);
        self.idt.populate(trampolines);
    }
}

const _: () = {
    assert!(size_of::<TssDescriptor>() == 16);
    assert!(size_of::<Gdt>() == 48);
    assert!(size_of::<Tss>() == 104);
    assert!(size_of::<InterruptGate>() == 16);
    assert!(size_of::<Idt>() == 4096);
    assert!(align_of::<Idt>() == 16);
    assert!(core::mem::offset_of!(Gdt, tss) == TSS as usize);
    assert!(core::mem::offset_of!(Gdt, compatibility_code) == COMPATIBILITY_CODE as usize);
};

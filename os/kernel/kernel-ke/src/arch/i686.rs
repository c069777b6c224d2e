//! # x86 descriptor tables
//!
//! ## GDT layout
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (flat 4 GiB; [`KERNEL_CODE`])
//! 2     | 0x10     | Kernel data (flat 4 GiB; [`KERNEL_DATA`])
//! 3     | 0x18     | Main TSS ([`TSS`])
//! 4     | 0x20     | Processor block, loaded into FS ([`PROCESSOR_BLOCK`])
//! 5     | 0x28     | Double fault TSS ([`DOUBLE_FAULT_TSS`])
//! 6     | 0x30     | NMI TSS ([`NMI_TSS`])
//!
//! Double faults and NMIs enter through task gates, so the CPU switches to a
//! separate task with its own stack and register image. Every other vector
//! uses a plain interrupt gate on the current kernel stack.

use super::descriptor::{GateAttributes, SegmentDescriptor, selector, types};
use super::vectors;
use core::ops::{Index, IndexMut};
use kernel_hal::KernelSelectors;

pub const KERNEL_CODE: u16 = selector(1, 0);
pub const KERNEL_DATA: u16 = selector(2, 0);
pub const TSS: u16 = selector(3, 0);
pub const PROCESSOR_BLOCK: u16 = selector(4, 0);
pub const DOUBLE_FAULT_TSS: u16 = selector(5, 0);
pub const NMI_TSS: u16 = selector(6, 0);

/// Selectors loaded once the GDT is active.
pub const SELECTORS: KernelSelectors = KernelSelectors {
    code: KERNEL_CODE,
    data: KERNEL_DATA,
    processor_block: PROCESSOR_BLOCK,
};

/// EFLAGS with only the always-one bit set (interrupts off).
const EFLAGS_RESERVED: u32 = 0x2;

#[repr(C, align(8))]
#[derive(Copy, Clone, Debug)]
pub struct Gdt {
    pub null: SegmentDescriptor,
    pub kernel_code: SegmentDescriptor,
    pub kernel_data: SegmentDescriptor,
    pub tss: SegmentDescriptor,
    pub processor_block: SegmentDescriptor,
    pub double_fault_tss: SegmentDescriptor,
    pub nmi_tss: SegmentDescriptor,
}

impl Gdt {
    #[must_use]
    pub const fn new(addresses: &TableAddresses) -> Self {
        Self {
            null: SegmentDescriptor::NULL,
            kernel_code: SegmentDescriptor::flat_code(),
            kernel_data: SegmentDescriptor::flat_data(),
            tss: SegmentDescriptor::tss(addresses.tss, TSS_LIMIT),
            processor_block: SegmentDescriptor::data(
                addresses.processor_block,
                addresses.processor_block_size.saturating_sub(1),
            ),
            double_fault_tss: SegmentDescriptor::tss(addresses.double_fault_tss, TSS_LIMIT),
            nmi_tss: SegmentDescriptor::tss(addresses.nmi_tss, TSS_LIMIT),
        }
    }
}

/// 32-bit task state segment.
///
/// Selector slots are 32 bits wide; the upper halves are reserved and stay
/// zero.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Tss {
    pub link: u32,
    pub esp0: u32,
    pub ss0: u32,
    pub esp1: u32,
    pub ss1: u32,
    pub esp2: u32,
    pub ss2: u32,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u32,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub fs: u32,
    pub gs: u32,
    pub ldt: u32,
    pub trap: u16,
    /// Offset of the I/O permission bitmap; the TSS size disables it.
    pub io_map_base: u16,
}

#[allow(clippy::cast_possible_truncation)]
const TSS_LIMIT: u32 = (size_of::<Tss>() - 1) as u32;

impl Tss {
    /// The main TSS: only the ring-0 stack is consulted.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn kernel(esp0: u32) -> Self {
        Self {
            esp0,
            ss0: KERNEL_DATA as u32,
            io_map_base: size_of::<Self>() as u16,
            ..Self::ZERO
        }
    }

    /// A task entered through a task gate: starts at `eip` on `esp` with
    /// interrupts off, kernel segments, and the current address space.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn for_task(eip: u32, esp: u32, cr3: u32) -> Self {
        Self {
            esp0: esp,
            ss0: KERNEL_DATA as u32,
            cr3,
            eip,
            eflags: EFLAGS_RESERVED,
            esp,
            es: KERNEL_DATA as u32,
            cs: KERNEL_CODE as u32,
            ss: KERNEL_DATA as u32,
            ds: KERNEL_DATA as u32,
            fs: PROCESSOR_BLOCK as u32,
            io_map_base: size_of::<Self>() as u16,
            ..Self::ZERO
        }
    }

    const ZERO: Self = Self {
        link: 0,
        esp0: 0,
        ss0: 0,
        esp1: 0,
        ss1: 0,
        esp2: 0,
        ss2: 0,
        cr3: 0,
        eip: 0,
        eflags: 0,
        eax: 0,
        ecx: 0,
        edx: 0,
        ebx: 0,
        esp: 0,
        ebp: 0,
        esi: 0,
        edi: 0,
        es: 0,
        cs: 0,
        ss: 0,
        ds: 0,
        fs: 0,
        gs: 0,
        ldt: 0,
        trap: 0,
        io_map_base: 0,
    };
}

/// 8-byte interrupt or task gate.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Gate {
    offset_low: u16,
    selector: u16,
    attributes: GateAttributes,
    offset_high: u16,
}

impl Gate {
    pub const MISSING: Self = Self {
        offset_low: 0,
        selector: 0,
        attributes: GateAttributes::new(),
        offset_high: 0,
    };

    /// Present ring-0 interrupt gate into the kernel code segment.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn interrupt(handler: u32) -> Self {
        Self {
            offset_low: handler as u16,
            selector: KERNEL_CODE,
            attributes: GateAttributes::kernel(types::INTERRUPT_GATE),
            offset_high: (handler >> 16) as u16,
        }
    }

    /// Present task gate switching to the TSS behind `tss_selector`.
    #[must_use]
    pub const fn task(tss_selector: u16) -> Self {
        Self {
            offset_low: 0,
            selector: tss_selector,
            attributes: GateAttributes::kernel(types::TASK_GATE),
            offset_high: 0,
        }
    }

    #[must_use]
    pub const fn handler(&self) -> u32 {
        (self.offset_low as u32) | ((self.offset_high as u32) << 16)
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
    pub const fn into_bits(self) -> u64 {
        (self.offset_low as u64)
            | ((self.selector as u64) << 16)
            | ((self.attributes.into_bits() as u64) << 32)
            | ((self.offset_high as u64) << 48)
    }
}

#[repr(C, align(8))]
#[derive(Copy, Clone)]
pub struct Idt {
    entries: [Gate; 256],
}

impl Idt {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [Gate::MISSING; 256],
        }
    }

    /// Task gates for double fault and NMI, interrupt gates elsewhere.
    pub fn populate(&mut self, trampolines: &TrapTrampolines) {
        for (vector, gate) in self.entries.iter_mut().enumerate() {
            *gate = match vector {
                vectors::DOUBLE_FAULT => Gate::task(DOUBLE_FAULT_TSS),
                vectors::NMI => Gate::task(NMI_TSS),
                _ => Gate::interrupt(
                    trampolines
                        .exceptions
                        .get(vector)
                        .copied()
                        .unwrap_or(trampolines.unexpected),
                ),
            };
        }
    }
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for Idt {
    type Output = Gate;

    fn index(&self, vector: usize) -> &Self::Output {
        &self.entries[vector]
    }
}

impl IndexMut<usize> for Idt {
    fn index_mut(&mut self, vector: usize) -> &mut Self::Output {
        &mut self.entries[vector]
    }
}

/// Entry addresses of the trap trampolines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrapTrampolines {
    /// Vectors 0..32. Double fault and NMI run as tasks starting here.
    pub exceptions: [u32; 32],
    /// Every other vector.
    pub unexpected: u32,
}

/// Stack tops of the kernel and the two fault tasks.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StackTops {
    pub kernel: u32,
    pub double_fault: u32,
    pub nmi: u32,
}

impl StackTops {
    /// Machine checks run on the kernel stack here, so that stack is unused.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn new(kernel: usize, double_fault: usize, nmi: usize, _machine_check: usize) -> Self {
        Self {
            kernel: kernel as u32,
            double_fault: double_fault as u32,
            nmi: nmi as u32,
        }
    }
}

/// Where the structures referenced from the GDT live.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TableAddresses {
    pub processor_block: u32,
    pub processor_block_size: u32,
    pub tss: u32,
    pub double_fault_tss: u32,
    pub nmi_tss: u32,
    /// Address space the fault tasks run in.
    pub cr3: u32,
}

/// One processor's descriptor tables and fault tasks.
#[repr(C)]
pub struct ProcessorTables {
    pub gdt: Gdt,
    pub idt: Idt,
    pub tss: Tss,
    pub double_fault_tss: Tss,
    pub nmi_tss: Tss,
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
            gdt: Gdt::new(&TableAddresses {
                processor_block: 0,
                processor_block_size: 0,
                tss: 0,
                double_fault_tss: 0,
                nmi_tss: 0,
                cr3: 0,
            }),
            idt: Idt::new(),
            tss: Tss::ZERO,
            double_fault_tss: Tss::ZERO,
            nmi_tss: Tss::ZERO,
        }
    }

    /// Fills the tables in place, pointing the TSS descriptors at the TSSs
    /// inside `self`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn prepare(
        &mut self,
        processor_block: usize,
        processor_block_size: usize,
        stacks: &StackTops,
        trampolines: &TrapTrampolines,
        cr3: u64,
    ) {
        let addresses = TableAddresses {
            processor_block: processor_block as u32,
            processor_block_size: processor_block_size as u32,
            tss: core::ptr::from_ref(&self.tss).addr() as u32,
            double_fault_tss: core::ptr::from_ref(&self.double_fault_tss).addr() as u32,
            nmi_tss: core::ptr::from_ref(&self.nmi_tss).addr() as u32,
            cr3: cr3 as u32,
        };
        self.build(&addresses, stacks, trampolines);
    }

    pub fn build(&mut self, addresses: &TableAddresses, stacks: &StackTops, trampolines: &TrapTrampolines) {
        self.tss = Tss::kernel(stacks.kernel);
        self.double_fault_tss = Tss::for_task(
            trampolines.exceptions[vectors::DOUBLE_FAULT],
            stacks.double_fault,
            addresses.cr3,
        );
        self.nmi_tss = Tss::for_task(trampolines.exceptions[vectors::NMI], stacks.nmi, addresses.cr3);
        self.gdt = Gdt::new(addresses);
        self.idt.populate(trampolines);
    }
}

const _: () = {
    assert!(size_of::<Gdt>() == 56);
    assert!(size_of::<Tss>() == 104);
    assert!(size_of::<Gate>() == 8);
    assert!(size_of::<Idt>() == 2048);
    assert!(core::mem::offset_of!(Tss, cr3) == 28);
    assert!(core::mem::offset_of!(Tss, es) == 72);
    assert!(core::mem::offset_of!(Tss, io_map_base) == 102);
    assert!(core::mem::offset_of!(Gdt, tss) == TSS as usize);
    assert!(core::mem::offset_of!(Gdt, processor_block) == PROCESSOR_BLOCK as usize);
    assert!(core::mem::offset_of!(Gdt, double_fault_tss) == DOUBLE_FAULT_TSS as usize);
    assert!(core::mem::offset_of!(Gdt, nmi_tss) == NMI_TSS as usize);
};

#[cfg(test)]
mod tests {
    use super::*;

    fn trampolines() -> TrapTrampolines {
        TrapTrampolines {
            exceptions: core::array::from_fn(|v| 0x8010_0000 + 0x10 * v as u32),
            unexpected: 0x8010_1000,
        }
    }

    fn addresses() -> TableAddresses {
        TableAddresses {
            processor_block: 0x8001_0000,
            processor_block_size: 0x400,
            tss: 0x8012_3450,
            double_fault_tss: 0x8012_3500,
            nmi_tss: 0x8012_3580,
            cr3: 0x0030_0000,
        }
    }

    #[test]
    fn gate_encodings() {
        assert_eq!(Gate::interrupt(0x8010_2030).into_bits(), 0x8010_8E00_0008_2030);
        assert_eq!(Gate::task(DOUBLE_FAULT_TSS).into_bits(), 0x0000_8500_0028_0000);
        assert_eq!(Gate::MISSING.into_bits(), 0);
    }

    #[test]
    fn gdt_entries() {
        let gdt = Gdt::new(&addresses());
        assert_eq!(gdt.null.into_bits(), 0);
        assert_eq!(gdt.kernel_code.into_bits(), 0x00CF_9A00_0000_FFFF);
        assert_eq!(gdt.kernel_data.into_bits(), 0x00CF_9200_0000_FFFF);
        assert_eq!(gdt.tss.into_bits(), 0x8000_8912_3450_0067);
        assert_eq!(gdt.processor_block.into_bits(), 0x8040_9201_0000_03FF);
        assert_eq!(gdt.double_fault_tss.base(), 0x8012_3500);
        assert_eq!(gdt.nmi_tss.base(), 0x8012_3580);
    }

    #[test]
    fn fault_tasks() {
        let mut tables = ProcessorTables::new();
        let stacks = StackTops {
            kernel: 0x8020_8000,
            double_fault: 0x8020_C000,
            nmi: 0x8021_0000,
        };
        tables.build(&addresses(), &stacks, &trampolines());

        assert_eq!(tables.tss.esp0, 0x8020_8000);
        assert_eq!(tables.tss.ss0, u32::from(KERNEL_DATA));
        assert_eq!(tables.tss.io_map_base, 104);

        let df = tables.double_fault_tss;
        assert_eq!(df.eip, 0x8010_0080);
        assert_eq!(df.esp, 0x8020_C000);
        assert_eq!(df.cr3, 0x0030_0000);
        assert_eq!(df.eflags, 0x2);
        assert_eq!(df.cs, u32::from(KERNEL_CODE));
        assert_eq!(df.fs, u32::from(PROCESSOR_BLOCK));
        assert_eq!(tables.nmi_tss.eip, 0x8010_0020);
        assert_eq!(tables.nmi_tss.esp, 0x8021_0000);
    }

    #[test]
    fn vectors_point_at_trampolines() {
        let mut idt = Idt::new();
        idt.populate(&trampolines());

        assert_eq!(idt[vectors::DOUBLE_FAULT].selector(), DOUBLE_FAULT_TSS);
        assert_eq!(idt[vectors::DOUBLE_FAULT].attributes().typ(), types::TASK_GATE);
        assert_eq!(idt[vectors::NMI].selector(), NMI_TSS);
        assert_eq!(idt[vectors::PAGE_FAULT].handler(), 0x8010_00E0);
        assert_eq!(idt[vectors::MACHINE_CHECK].handler(), 0x8010_0120);
        assert_eq!(idt[0x30].handler(), 0x8010_1000);
        for vector in 0..256 {
            assert!(idt[vector].attributes().present(), "vector {vector}");
            assert_eq!(idt[vector].attributes().ist(), 0);
        }
    }
}

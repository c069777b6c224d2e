//! # x86 segment and gate descriptor encodings
//!
//! The 8-byte code/data/system descriptor format is shared by both
//! architectures; in long mode the CPU ignores base and limit of code and data
//! segments but still checks type, DPL, present, and the L/D bits. The 16-bit
//! gate attribute word is shared as well; only the IST field is x86-64 specific
//! and stays zero on x86.

use bitfield_struct::bitfield;

/// Segment and gate type codes (descriptor bits 43:40).
pub mod types {
    /// Data, read/write.
    pub const DATA_READ_WRITE: u8 = 0x2;
    /// Task gate (x86 only).
    pub const TASK_GATE: u8 = 0x5;
    /// Available TSS (32-bit on x86, 64-bit in long mode).
    pub const TSS_AVAILABLE: u8 = 0x9;
    /// Code, execute/read.
    pub const CODE_EXECUTE_READ: u8 = 0xA;
    /// Busy TSS; set by the CPU on `ltr`.
    pub const TSS_BUSY: u8 = 0xB;
    /// Interrupt gate (clears IF on entry).
    pub const INTERRUPT_GATE: u8 = 0xE;
    /// Trap gate (leaves IF alone).
    pub const TRAP_GATE: u8 = 0xF;
}

/// Largest limit a descriptor can hold (20 bits).
pub const MAXIMUM_LIMIT: u32 = 0xF_FFFF;

/// One 8-byte GDT entry.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Limit bits 15:0.
    pub limit_low: u16,
    /// Base bits 15:0.
    pub base_low: u16,
    /// Base bits 23:16.
    pub base_mid: u8,
    /// Segment or system type, see [`types`].
    #[bits(4)]
    pub typ: u8,
    /// 1 for code/data, 0 for system descriptors.
    pub s: bool,
    #[bits(2)]
    pub dpl: u8,
    pub present: bool,
    /// Limit bits 19:16.
    #[bits(4)]
    pub limit_high: u8,
    pub avl: bool,
    /// L: 64-bit code segment. Must be 0 when `default_big` is set.
    pub long_mode: bool,
    /// D/B: 32-bit default operand size.
    pub default_big: bool,
    /// G: limit counts 4 KiB units.
    pub granularity: bool,
    /// Base bits 31:24.
    pub base_high: u8,
}

impl SegmentDescriptor {
    pub const NULL: Self = Self::new();

    /// Ring-0 64-bit code segment.
    #[must_use]
    pub const fn long_mode_code() -> Self {
        Self::new()
            .with_typ(types::CODE_EXECUTE_READ)
            .with_s(true)
            .with_present(true)
            .with_long_mode(true)
    }

    /// Ring-0 32-bit code segment covering 4 GiB.
    #[must_use]
    pub const fn flat_code() -> Self {
        Self::new()
            .with_typ(types::CODE_EXECUTE_READ)
            .with_s(true)
            .with_present(true)
            .with_default_big(true)
            .with_limit(MAXIMUM_LIMIT)
            .with_granularity(true)
    }

    /// Ring-0 read/write data segment covering 4 GiB.
    #[must_use]
    pub const fn flat_data() -> Self {
        Self::new()
            .with_typ(types::DATA_READ_WRITE)
            .with_s(true)
            .with_present(true)
            .with_default_big(true)
            .with_limit(MAXIMUM_LIMIT)
            .with_granularity(true)
    }

    /// Ring-0 byte-granular data segment over `[base, base + limit]`.
    #[must_use]
    pub const fn data(base: u32, limit: u32) -> Self {
        Self::new()
            .with_typ(types::DATA_READ_WRITE)
            .with_s(true)
            .with_present(true)
            .with_default_big(true)
            .with_base(base)
            .with_limit(limit)
    }

    /// Available TSS over `[base, base + limit]`. In long mode this is the
    /// low half of a 16-byte descriptor.
    #[must_use]
    pub const fn tss(base: u32, limit: u32) -> Self {
        Self::new()
            .with_typ(types::TSS_AVAILABLE)
            .with_present(true)
            .with_base(base)
            .with_limit(limit)
    }

    /// Sets the 32 base bits spread over the descriptor.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_base(self, base: u32) -> Self {
        self.with_base_low(base as u16)
            .with_base_mid((base >> 16) as u8)
            .with_base_high((base >> 24) as u8)
    }

    /// Sets the 20 limit bits; higher bits are dropped.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_limit(self, limit: u32) -> Self {
        self.with_limit_low(limit as u16)
            .with_limit_high(((limit >> 16) & 0xF) as u8)
    }

    #[must_use]
    pub const fn base(&self) -> u32 {
        (self.base_low() as u32) | ((self.base_mid() as u32) << 16) | ((self.base_high() as u32) << 24)
    }

    #[must_use]
    pub const fn limit(&self) -> u32 {
        (self.limit_low() as u32) | ((self.limit_high() as u32) << 16)
    }
}

/// The attribute word of an IDT gate.
///
/// Low byte: IST index (x86-64) and reserved zeros.
/// High byte: `| P | DPL(2) | S(0) | Type(4) |`.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct GateAttributes {
    /// Interrupt stack table slot, 0 for none. Always 0 on x86.
    #[bits(3)]
    pub ist: u8,
    #[bits(5)]
    __zero0: u8,
    #[bits(4)]
    pub typ: u8,
    /// Must be 0 for gates.
    pub s: bool,
    #[bits(2)]
    pub dpl: u8,
    pub present: bool,
}

impl GateAttributes {
    /// Present ring-0 gate of `typ`.
    #[must_use]
    pub const fn kernel(typ: u8) -> Self {
        Self::new().with_typ(typ).with_present(true)
    }
}

/// Encodes a GDT selector: `(index << 3) | TI=0 | RPL`.
#[must_use]
pub const fn selector(index: u16, rpl: u16) -> u16 {
    (index << 3) | (rpl & 0x3)
}

const _: () = {
    assert!(size_of::<SegmentDescriptor>() == 8);
    assert!(size_of::<GateAttributes>() == 2);
};

//! # Architecture descriptor formats
//!
//! Both encodings compile on every host so their bit layouts can be tested
//! anywhere; [`native`] names the one the kernel runs with.

pub mod amd64;
mod descriptor;
pub mod i686;

pub use descriptor::{GateAttributes, MAXIMUM_LIMIT, SegmentDescriptor, selector, types};

#[cfg(target_arch = "x86")]
pub use i686 as native;

#[cfg(not(target_arch = "x86"))]
pub use amd64 as native;

/// Architectural exception vectors.
pub mod vectors {
    pub const DIVIDE_ERROR: usize = 0;
    pub const DEBUG: usize = 1;
    pub const NMI: usize = 2;
    pub const BREAKPOINT: usize = 3;
    pub const OVERFLOW: usize = 4;
    pub const BOUND_RANGE: usize = 5;
    pub const INVALID_OPCODE: usize = 6;
    pub const DEVICE_NOT_AVAILABLE: usize = 7;
    pub const DOUBLE_FAULT: usize = 8;
    pub const INVALID_TSS: usize = 10;
    pub const SEGMENT_NOT_PRESENT: usize = 11;
    pub const STACK_FAULT: usize = 12;
    pub const GENERAL_PROTECTION: usize = 13;
    pub const PAGE_FAULT: usize = 14;
    pub const X87_FLOATING_POINT: usize = 16;
    pub const ALIGNMENT_CHECK: usize = 17;
    pub const MACHINE_CHECK: usize = 18;
    pub const SIMD_FLOATING_POINT: usize = 19;
    pub const VIRTUALIZATION: usize = 20;
    pub const CONTROL_PROTECTION: usize = 21;
    pub const VMM_COMMUNICATION: usize = 29;
    pub const SECURITY: usize = 30;

    /// Vectors reserved for exceptions.
    pub const EXCEPTION_COUNT: usize = 32;

    /// Whether the CPU pushes an error code for `vector`.
    #[must_use]
    pub const fn has_error_code(vector: usize) -> bool {
        matches!(
            vector,
            DOUBLE_FAULT
                | INVALID_TSS
                | SEGMENT_NOT_PRESENT
                | STACK_FAULT
                | GENERAL_PROTECTION
                | PAGE_FAULT
                | ALIGNMENT_CHECK
                | CONTROL_PROTECTION
                | VMM_COMMUNICATION
                | SECURITY
        )
    }

    /// Short name for diagnostics.
    #[must_use]
    pub const fn name(vector: usize) -> &'static str {
        match vector {
            DIVIDE_ERROR => "#DE",
            DEBUG => "#DB",
            NMI => "NMI",
            BREAKPOINT => "#BP",
            OVERFLOW => "#OF",
            BOUND_RANGE => "#BR",
            INVALID_OPCODE => "#UD",
            DEVICE_NOT_AVAILABLE => "#NM",
            DOUBLE_FAULT => "#DF",
            INVALID_TSS => "#TS",
            SEGMENT_NOT_PRESENT => "#NP",
            STACK_FAULT => "#SS",
            GENERAL_PROTECTION => "#GP",
            PAGE_FAULT => "#PF",
            X87_FLOATING_POINT => "#MF",
            ALIGNMENT_CHECK => "#AC",
            MACHINE_CHECK => "#MC",
            SIMD_FLOATING_POINT => "#XM",
            VIRTUALIZATION => "#VE",
            CONTROL_PROTECTION => "#CP",
            VMM_COMMUNICATION => "#VC",
            SECURITY => "#SX",
            0..EXCEPTION_COUNT => "reserved",
            _ => "interrupt",
        }
    }
}

//! # Trap entry
//!
//! Every IDT vector enters through a small assembly trampoline that pushes a
//! uniform frame (a zero error code where the CPU supplies none, then the
//! vector number) and jumps to a common path. The common path saves the
//! general-purpose registers and calls [`dispatch_trap`]. During bring-up no
//! trap is expected, so dispatch reports the frame and crashes the system.
//!
//! The trampolines are only assembled with the `asm` feature; host tests build
//! tables from synthetic addresses instead.

use crate::arch::vectors;
use crate::crash::{BugCheck, crash_system};
use core::fmt;
use kernel_hal::Platform;

/// Vector number pushed by the shared unexpected-interrupt trampoline.
pub const UNEXPECTED_VECTOR: usize = 256;

/// Register image saved by the common trap path (lowest address first).
#[cfg(not(target_arch = "x86"))]
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Register image saved by the common trap path (lowest address first).
#[cfg(target_arch = "x86")]
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// ESP as saved by `pushad`; not the interrupted stack pointer.
    pub saved_esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

impl TrapFrame {
    #[cfg(not(target_arch = "x86"))]
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn vector(&self) -> usize {
        self.vector as usize
    }

    #[cfg(target_arch = "x86")]
    #[must_use]
    pub const fn vector(&self) -> usize {
        self.vector as usize
    }

    /// The faulting instruction pointer.
    #[cfg(not(target_arch = "x86"))]
    #[must_use]
    pub const fn instruction_pointer(&self) -> u64 {
        self.rip
    }

    /// The faulting instruction pointer.
    #[cfg(target_arch = "x86")]
    #[must_use]
    pub const fn instruction_pointer(&self) -> u64 {
        self.eip as u64
    }

    #[cfg(not(target_arch = "x86"))]
    #[must_use]
    pub const fn error_code(&self) -> u64 {
        self.error_code
    }

    #[cfg(target_arch = "x86")]
    #[must_use]
    pub const fn error_code(&self) -> u64 {
        self.error_code as u64
    }
}

/// One-line trap summary for the crash report.
pub struct TrapSummary<'a>(pub &'a TrapFrame);

impl fmt::Display for TrapSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.0;
        let vector = frame.vector();
        if vector == UNEXPECTED_VECTOR {
            write!(f, "unexpected interrupt")?;
        } else {
            write!(f, "{} (vector {vector:#x})", vectors::name(vector))?;
        }
        write!(f, " at {:#x}", frame.instruction_pointer())?;
        if vectors::has_error_code(vector) {
            write!(f, ", error code {:#x}", frame.error_code())?;
        }
        Ok(())
    }
}

/// Handles a trap taken during bring-up: there is no handler to run yet.
pub fn dispatch_trap<P: Platform + ?Sized>(platform: &P, frame: &TrapFrame) -> ! {
    crash_system(
        platform,
        BugCheck::UNEXPECTED_KERNEL_MODE_TRAP,
        format_args!("{}", TrapSummary(frame)),
    )
}

#[cfg(all(feature = "asm", any(target_arch = "x86", target_arch = "x86_64")))]
mod entry {
    use super::TrapFrame;
    use crate::arch::native::TrapTrampolines;
    use crate::crash::crash_platform;

    #[cfg(target_arch = "x86_64")]
    core::arch::global_asm!(
        r#"
        .macro TRAP_STUB vector, error_code
        .balign 16
        ke_trap_\vector:
        .if \error_code == 0
            push 0
        .endif
            push \vector
            jmp ke_trap_common
        .endm

        .section .text.ke_trap, "ax"
        TRAP_STUB 0, 0
        TRAP_STUB 1, 0
        TRAP_STUB 2, 0
        TRAP_STUB 3, 0
        TRAP_STUB 4, 0
        TRAP_STUB 5, 0
        TRAP_STUB 6, 0
        TRAP_STUB 7, 0
        TRAP_STUB 8, 1
        TRAP_STUB 9, 0
        TRAP_STUB 10, 1
        TRAP_STUB 11, 1
        TRAP_STUB 12, 1
        TRAP_STUB 13, 1
        TRAP_STUB 14, 1
        TRAP_STUB 15, 0
        TRAP_STUB 16, 0
        TRAP_STUB 17, 1
        TRAP_STUB 18, 0
        TRAP_STUB 19, 0
        TRAP_STUB 20, 0
        TRAP_STUB 21, 1
        TRAP_STUB 22, 0
        TRAP_STUB 23, 0
        TRAP_STUB 24, 0
        TRAP_STUB 25, 0
        TRAP_STUB 26, 0
        TRAP_STUB 27, 0
        TRAP_STUB 28, 0
        TRAP_STUB 29, 1
        TRAP_STUB 30, 1
        TRAP_STUB 31, 0

        .balign 16
        ke_trap_unexpected:
            push 0
            push 256
            jmp ke_trap_common

        ke_trap_common:
            push rax
            push rcx
            push rdx
            push rbx
            push rbp
            push rsi
            push rdi
            push r8
            push r9
            push r10
            push r11
            push r12
            push r13
            push r14
            push r15
            mov rdi, rsp
            and rsp, -16
            cld
            call ke_dispatch_trap
            ud2

        .section .rodata.ke_trap, "a"
        .balign 8
        .global ke_trap_trampolines
        ke_trap_trampolines:
            .quad ke_trap_0, ke_trap_1, ke_trap_2, ke_trap_3
            .quad ke_trap_4, ke_trap_5, ke_trap_6, ke_trap_7
            .quad ke_trap_8, ke_trap_9, ke_trap_10, ke_trap_11
            .quad ke_trap_12, ke_trap_13, ke_trap_14, ke_trap_15
            .quad ke_trap_16, ke_trap_17, ke_trap_18, ke_trap_19
            .quad ke_trap_20, ke_trap_21, ke_trap_22, ke_trap_23
            .quad ke_trap_24, ke_trap_25, ke_trap_26, ke_trap_27
            .quad ke_trap_28, ke_trap_29, ke_trap_30, ke_trap_31
            .quad ke_trap_unexpected
        .text
        "#
    );

    #[cfg(target_arch = "x86")]
    core::arch::global_asm!(
        r#"
        .macro TRAP_STUB vector, error_code
        .balign 16
        ke_trap_\vector:
        .if \error_code == 0
            push 0
        .endif
            push \vector
            jmp ke_trap_common
        .endm

        .section .text.ke_trap, "ax"
        TRAP_STUB 0, 0
        TRAP_STUB 1, 0
        TRAP_STUB 2, 0
        TRAP_STUB 3, 0
        TRAP_STUB 4, 0
        TRAP_STUB 5, 0
        TRAP_STUB 6, 0
        TRAP_STUB 7, 0
        TRAP_STUB 8, 1
        TRAP_STUB 9, 0
        TRAP_STUB 10, 1
        TRAP_STUB 11, 1
        TRAP_STUB 12, 1
        TRAP_STUB 13, 1
        TRAP_STUB 14, 1
        TRAP_STUB 15, 0
        TRAP_STUB 16, 0
        TRAP_STUB 17, 1
        TRAP_STUB 18, 0
        TRAP_STUB 19, 0
        TRAP_STUB 20, 0
        TRAP_STUB 21, 1
        TRAP_STUB 22, 0
        TRAP_STUB 23, 0
        TRAP_STUB 24, 0
        TRAP_STUB 25, 0
        TRAP_STUB 26, 0
        TRAP_STUB 27, 0
        TRAP_STUB 28, 0
        TRAP_STUB 29, 1
        TRAP_STUB 30, 1
        TRAP_STUB 31, 0

        .balign 16
        ke_trap_unexpected:
            push 0
            push 256
            jmp ke_trap_common

        ke_trap_common:
            pushad
            mov eax, esp
            and esp, -16
            sub esp, 12
            push eax
            cld
            call ke_dispatch_trap
            ud2

        .section .rodata.ke_trap, "a"
        .balign 4
        .global ke_trap_trampolines
        ke_trap_trampolines:
            .long ke_trap_0, ke_trap_1, ke_trap_2, ke_trap_3
            .long ke_trap_4, ke_trap_5, ke_trap_6, ke_trap_7
            .long ke_trap_8, ke_trap_9, ke_trap_10, ke_trap_11
            .long ke_trap_12, ke_trap_13, ke_trap_14, ke_trap_15
            .long ke_trap_16, ke_trap_17, ke_trap_18, ke_trap_19
            .long ke_trap_20, ke_trap_21, ke_trap_22, ke_trap_23
            .long ke_trap_24, ke_trap_25, ke_trap_26, ke_trap_27
            .long ke_trap_28, ke_trap_29, ke_trap_30, ke_trap_31
            .long ke_trap_unexpected
        .text
        "#
    );

    unsafe extern "C" {
        static ke_trap_trampolines: [usize; 33];
    }

    /// Reached from `ke_trap_common` with the saved frame.
    #[unsafe(no_mangle)]
    extern "C" fn ke_dispatch_trap(frame: &TrapFrame) -> ! {
        match crash_platform() {
            Some(platform) => super::dispatch_trap(platform, frame),
            // No platform registered yet: nothing to log through, park here.
            None => loop {
                core::hint::spin_loop();
            },
        }
    }

    impl TrapTrampolines {
        /// Addresses of the assembled trampolines.
        #[must_use]
        #[allow(clippy::cast_possible_truncation)]
        pub fn native() -> Self {
            // SAFETY: the table is immutable data emitted above.
            let table = unsafe { &*core::ptr::addr_of!(ke_trap_trampolines) };
            Self {
                exceptions: core::array::from_fn(|vector| table[vector] as _),
                unexpected: table[32] as _,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_hal::mock::{MockPlatform, is_halt_panic};
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn summary_names_the_exception() {
        let frame = TrapFrame {
            vector: 14,
            error_code: 0x2,
            rip: 0xFFFF_F800_0010_2345,
            ..TrapFrame::default()
        };
        assert_eq!(
            TrapSummary(&frame).to_string(),
            "#PF (vector 0xe) at 0xfffff80000102345, error code 0x2"
        );

        let frame = TrapFrame {
            vector: 3,
            rip: 0x1000,
            ..TrapFrame::default()
        };
        assert_eq!(TrapSummary(&frame).to_string(), "#BP (vector 0x3) at 0x1000");

        let frame = TrapFrame {
            vector: UNEXPECTED_VECTOR as u64,
            rip: 0x2000,
            ..TrapFrame::default()
        };
        assert_eq!(TrapSummary(&frame).to_string(), "unexpected interrupt at 0x2000");
    }

    #[test]
    fn traps_crash_the_system() {
        let platform = MockPlatform::new();
        let frame = TrapFrame {
            vector: 13,
            ..TrapFrame::default()
        };
        let payload = catch_unwind(AssertUnwindSafe(|| dispatch_trap(&platform, &frame))).unwrap_err();
        assert!(is_halt_panic(payload.as_ref()));
    }
}

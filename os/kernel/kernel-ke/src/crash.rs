//! # Fatal errors
//!
//! Nothing in the boot path can be retried: every failure ends here with a
//! diagnostic line and a processor parked with interrupts masked.

use core::fmt;
use kernel_hal::Platform;
use kernel_sync::BootOnceCell;
use log::error;

/// Stop code reported with a system crash.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct BugCheck(pub u32);

impl BugCheck {
    pub const PHASE0_INITIALIZATION_FAILED: Self = Self(0x31);
    pub const UNSUPPORTED_PROCESSOR: Self = Self(0x5D);
    pub const INSTALL_MORE_MEMORY: Self = Self(0x7D);
    pub const UNEXPECTED_KERNEL_MODE_TRAP: Self = Self(0x7F);
    pub const LOADER_BLOCK_MISMATCH: Self = Self(0x100);

    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            0x31 => "PHASE0_INITIALIZATION_FAILED",
            0x5D => "UNSUPPORTED_PROCESSOR",
            0x7D => "INSTALL_MORE_MEMORY",
            0x7F => "UNEXPECTED_KERNEL_MODE_TRAP",
            0x100 => "LOADER_BLOCK_MISMATCH",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Debug for BugCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} ({})", self.0, self.name())
    }
}

impl fmt::Display for BugCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Masks interrupts and parks the processor for good.
pub fn halt_system<P: Platform + ?Sized>(platform: &P) -> ! {
    platform.disable_interrupts();
    loop {
        platform.halt();
    }
}

/// Logs `code` with `reason` and halts.
pub fn crash_system<P: Platform + ?Sized>(platform: &P, code: BugCheck, reason: fmt::Arguments<'_>) -> ! {
    error!("*** STOP {code}: {reason}");
    halt_system(platform)
}

static CRASH_PLATFORM: BootOnceCell<&'static dyn Platform> = BootOnceCell::new();

/// Makes `platform` reachable from paths that have no context argument
/// (trap handlers, the panic handler). Later calls are ignored.
pub fn register_crash_platform(platform: &'static dyn Platform) {
    let _ = CRASH_PLATFORM.set(platform);
}

/// The platform registered for context-free crash paths.
#[must_use]
pub fn crash_platform() -> Option<&'static dyn Platform> {
    CRASH_PLATFORM.get().copied()
}

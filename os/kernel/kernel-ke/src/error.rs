use crate::crash::BugCheck;
use kernel_hal::RunLevel;
use kernel_mm::{BootstrapAllocError, MmError};
use thiserror::Error;

/// The loader and the kernel disagree about the initialization block.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum AbiError {
    #[error("no initialization block was passed")]
    MissingBlock,
    #[error("initialization block is {found} bytes, kernel expects {expected}")]
    SizeMismatch { found: u32, expected: u32 },
    #[error("initialization block version {found}, kernel expects {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("boot protocol version {found}, kernel expects {expected}")]
    ProtocolMismatch { found: u32, expected: u32 },
}

/// The initialization block passed the header check but its payload is unusable.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum BootInfoError {
    #[error("{count} memory descriptors at a null address")]
    NullDescriptors { count: u64 },
    #[error("{0} memory descriptors do not fit the address space")]
    DescriptorCountOverflow(u64),
    #[error("the boot information was already bound")]
    AlreadyBound,
    #[error("the boot information is not bound yet")]
    NotBound,
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ProcessorError {
    #[error("processor block self pointer is {found:#x}, block lives at {expected:#x}")]
    ProcessorBlockMismatch { expected: usize, found: usize },
    #[error("processor number {0} exceeds the supported processor count")]
    NumberOutOfRange(u32),
    #[error("cannot raise the run level from {current:?} to {requested:?}")]
    RunLevelLowered { current: RunLevel, requested: RunLevel },
    #[error("cannot lower the run level from {current:?} to {requested:?}")]
    RunLevelRaised { current: RunLevel, requested: RunLevel },
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ResourceError {
    #[error("the system resource list is not initialized")]
    NotInitialized,
    #[error("the system resource list is full")]
    ListFull,
    #[error("no free resource of the requested type")]
    NotFound,
}

/// Any failure of the kernel initialization sequence. Each one stops the
/// system with [`KernelFault::bugcheck_code`].
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum KernelFault {
    #[error(transparent)]
    Abi(#[from] AbiError),
    #[error(transparent)]
    BootInfo(#[from] BootInfoError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Memory(#[from] MmError),
}

impl KernelFault {
    #[must_use]
    pub const fn bugcheck_code(&self) -> BugCheck {
        match self {
            Self::Abi(_) => BugCheck::LOADER_BLOCK_MISMATCH,
            Self::Memory(
                MmError::InsufficientMemory { .. }
                | MmError::Bootstrap(BootstrapAllocError::Exhausted { .. } | BootstrapAllocError::NoFreeDescriptor),
            ) => BugCheck::INSTALL_MORE_MEMORY,
            Self::Memory(MmError::AmbiguousPagingMode(_)) => BugCheck::UNSUPPORTED_PROCESSOR,
            _ => BugCheck::PHASE0_INITIALIZATION_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_codes_by_cause() {
        let fault = KernelFault::from(AbiError::VersionMismatch { found: 0, expected: 1 });
        assert_eq!(fault.bugcheck_code(), BugCheck::LOADER_BLOCK_MISMATCH);

        let fault = KernelFault::from(MmError::InsufficientMemory {
            available: 0,
            required: 1100,
        });
        assert_eq!(fault.bugcheck_code(), BugCheck::INSTALL_MORE_MEMORY);

        let fault = KernelFault::from(MmError::Bootstrap(BootstrapAllocError::Exhausted {
            requested: 1,
            remaining: 0,
        }));
        assert_eq!(fault.bugcheck_code(), BugCheck::INSTALL_MORE_MEMORY);

        let fault = KernelFault::from(MmError::AmbiguousPagingMode(0x1020));
        assert_eq!(fault.bugcheck_code(), BugCheck::UNSUPPORTED_PROCESSOR);

        let fault = KernelFault::from(ResourceError::ListFull);
        assert_eq!(fault.bugcheck_code(), BugCheck::PHASE0_INITIALIZATION_FAILED);
    }

    #[test]
    fn messages_come_from_the_cause() {
        let fault = KernelFault::from(AbiError::SizeMismatch { found: 40, expected: 48 });
        assert_eq!(fault.to_string(), "initialization block is 40 bytes, kernel expects 48");
    }
}

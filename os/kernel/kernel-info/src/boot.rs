//! # Kernel Boot Information

use crate::descriptor::LoaderMemoryDescriptor;

/// Kernel entry point as called by the boot loader.
///
/// # ABI
/// `efiapi` since the loader is a UEFI (PE/COFF) application.
pub type KernelEntryFn = extern "efiapi" fn(*const KernelInitializationBlock) -> !;

/// Early diagnostic output routine provided by the loader.
///
/// Receives a UTF-8 buffer that is not NUL-terminated. Only valid until the
/// loader's boot services are gone; the kernel stops using it once its own
/// debug sinks are up.
pub type DebugPrintFn = extern "efiapi" fn(message: *const u8, length: usize);

/// Version of the [`KernelInitializationBlock`] layout the kernel is built for.
pub const INITIALIZATION_BLOCK_VERSION: u32 = 1;

/// Version of the boot protocol (entry conditions and handoff semantics).
pub const BOOT_PROTOCOL_VERSION: u32 = 1;

/// Size of the [`KernelInitializationBlock`] the kernel is built for.
#[allow(clippy::cast_possible_truncation)]
pub const INITIALIZATION_BLOCK_SIZE: u32 = size_of::<KernelInitializationBlock>() as u32;

/// Firmware the loader ran on.
///
/// Newtype rather than an enum: the value comes from a foreign binary and may
/// be anything.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FirmwareType(pub u32);

impl FirmwareType {
    pub const UNKNOWN: Self = Self(0);
    pub const BIOS: Self = Self(1);
    pub const EFI: Self = Self(2);

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self.0 {
            1 => "BIOS",
            2 => "EFI",
            _ => "unknown",
        }
    }
}

/// Location of the loader-produced memory descriptor array.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct MemoryDescriptorList {
    /// Address of the first [`LoaderMemoryDescriptor`], or 0 when empty.
    pub descriptors_ptr: u64,

    /// Number of descriptors in the array.
    pub descriptor_count: u64,
}

impl MemoryDescriptorList {
    /// Describes a descriptor array living in the current address space.
    #[must_use]
    pub fn from_slice(descriptors: &[LoaderMemoryDescriptor]) -> Self {
        Self {
            descriptors_ptr: descriptors.as_ptr() as usize as u64,
            descriptor_count: descriptors.len() as u64,
        }
    }
}

/// The compatibility header at the start of every [`KernelInitializationBlock`].
///
/// The kernel reads only this much of a block until the header matches its
/// own constants; a loader built against another layout may hand over fewer
/// bytes than the kernel's block has.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct InitializationBlockHeader {
    pub block_size: u32,
    pub block_version: u32,
    pub protocol_version: u32,
}

impl InitializationBlockHeader {
    /// The header this kernel was built for.
    pub const CURRENT: Self = Self {
        block_size: INITIALIZATION_BLOCK_SIZE,
        block_version: INITIALIZATION_BLOCK_VERSION,
        protocol_version: BOOT_PROTOCOL_VERSION,
    };
}

/// Information handed from the boot loader to the kernel entry point.
///
/// The first three fields form the compatibility header: the kernel checks
/// them before reading anything else.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct KernelInitializationBlock {
    /// Size of this structure as compiled into the loader.
    pub block_size: u32,

    /// Layout version, see [`INITIALIZATION_BLOCK_VERSION`].
    pub block_version: u32,

    /// Boot protocol version, see [`BOOT_PROTOCOL_VERSION`].
    pub protocol_version: u32,

    /// Firmware the loader ran on.
    pub firmware_type: FirmwareType,

    /// Address of a NUL-terminated UTF-16 kernel parameter string, or 0.
    pub kernel_parameters: u64,

    /// Physical memory map.
    pub memory_descriptors: MemoryDescriptorList,

    /// Optional early print routine.
    pub debug_print: Option<DebugPrintFn>,
}

impl KernelInitializationBlock {
    /// A block with a valid compatibility header and no payload.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            block_size: INITIALIZATION_BLOCK_SIZE,
            block_version: INITIALIZATION_BLOCK_VERSION,
            protocol_version: BOOT_PROTOCOL_VERSION,
            firmware_type: FirmwareType::UNKNOWN,
            kernel_parameters: 0,
            memory_descriptors: MemoryDescriptorList {
                descriptors_ptr: 0,
                descriptor_count: 0,
            },
            debug_print: None,
        }
    }
}

impl Default for KernelInitializationBlock {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = {
    assert!(core::mem::offset_of!(KernelInitializationBlock, block_size) == 0);
    assert!(core::mem::offset_of!(KernelInitializationBlock, block_version) == 4);
    assert!(core::mem::offset_of!(KernelInitializationBlock, protocol_version) == 8);
    assert!(core::mem::offset_of!(KernelInitializationBlock, kernel_parameters) == 16);
    assert!(core::mem::offset_of!(KernelInitializationBlock, memory_descriptors) == 24);
    assert!(size_of::<InitializationBlockHeader>() == 12);
};

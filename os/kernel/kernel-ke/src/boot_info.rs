//! # Boot information
//!
//! Validation and binding of the [`KernelInitializationBlock`] the loader
//! passes to the kernel entry point. Only the compatibility header is read
//! until it matches the kernel's constants; after that the payload is copied
//! into a [`BootInformation`] that borrows the loader's parameter string and
//! memory map for the rest of boot.

use crate::error::{AbiError, BootInfoError};
use core::fmt;
use kernel_debug::{DebugConfig, DebugPort, parse_level};
use kernel_info::boot::{DebugPrintFn, FirmwareType, InitializationBlockHeader, KernelInitializationBlock};
use kernel_info::descriptor::LoaderMemoryDescriptor;
use log::warn;

const SPACE: u16 = b' ' as u16;
const EQUALS: u16 = b'=' as u16;
const COMMA: u16 = b',' as u16;

/// Longest parameter value decoded for matching.
const MAX_VALUE_LENGTH: usize = 32;

/// Checks the compatibility header of `block` and nothing else.
///
/// # Errors
/// [`AbiError::MissingBlock`] for a null pointer; otherwise the first of size,
/// block version, and protocol version that differs from the kernel's.
///
/// # Safety
/// A non-null `block` must point at readable memory of at least
/// `size_of::<InitializationBlockHeader>()` bytes.
pub unsafe fn verify_abi_compatibility(block: *const KernelInitializationBlock) -> Result<(), AbiError> {
    if block.is_null() {
        return Err(AbiError::MissingBlock);
    }
    // SAFETY: the caller guarantees the header is readable.
    let header = unsafe { block.cast::<InitializationBlockHeader>().read_unaligned() };
    let expected = InitializationBlockHeader::CURRENT;

    if header.block_size != expected.block_size {
        return Err(AbiError::SizeMismatch {
            found: header.block_size,
            expected: expected.block_size,
        });
    }
    if header.block_version != expected.block_version {
        return Err(AbiError::VersionMismatch {
            found: header.block_version,
            expected: expected.block_version,
        });
    }
    if header.protocol_version != expected.protocol_version {
        return Err(AbiError::ProtocolMismatch {
            found: header.protocol_version,
            expected: expected.protocol_version,
        });
    }
    Ok(())
}

/// The loader's handoff, bound for the rest of boot.
#[derive(Copy, Clone)]
pub struct BootInformation {
    pub firmware_type: FirmwareType,
    pub parameters: KernelParameters<'static>,
    pub memory_descriptors: &'static [LoaderMemoryDescriptor],
    pub debug_print: Option<DebugPrintFn>,
}

impl BootInformation {
    /// Copies the payload of an already verified block.
    ///
    /// # Errors
    /// [`BootInfoError::NullDescriptors`] for a non-empty memory map at
    /// address 0, [`BootInfoError::DescriptorCountOverflow`] if the count does
    /// not fit a `usize`.
    ///
    /// # Safety
    /// `block` must have passed [`verify_abi_compatibility`]; the parameter
    /// string and the descriptor array it points to must stay mapped and
    /// unchanged for the rest of boot.
    pub unsafe fn from_block(block: *const KernelInitializationBlock) -> Result<Self, BootInfoError> {
        // SAFETY: the header matched, so the full block is there.
        let block = unsafe { block.read_unaligned() };

        let list = block.memory_descriptors;
        let count = usize::try_from(list.descriptor_count)
            .map_err(|_| BootInfoError::DescriptorCountOverflow(list.descriptor_count))?;
        let memory_descriptors: &'static [LoaderMemoryDescriptor] = if count == 0 {
            &[]
        } else if list.descriptors_ptr == 0 {
            return Err(BootInfoError::NullDescriptors {
                count: list.descriptor_count,
            });
        } else {
            let ptr = usize::try_from(list.descriptors_ptr)
                .map_err(|_| BootInfoError::DescriptorCountOverflow(list.descriptor_count))?;
            // SAFETY: the loader describes `count` descriptors at `ptr`.
            unsafe { core::slice::from_raw_parts(core::ptr::with_exposed_provenance(ptr), count) }
        };

        // SAFETY: forwarded from the caller.
        let parameters = unsafe { KernelParameters::from_wide_ptr(block.kernel_parameters) };

        Ok(Self {
            firmware_type: block.firmware_type,
            parameters,
            memory_descriptors,
            debug_print: block.debug_print,
        })
    }

    /// Debug outputs and log level requested on the command line.
    #[must_use]
    pub fn debug_config(&self, default_port: Option<DebugPort>) -> DebugConfig {
        self.parameters.debug_config(default_port)
    }
}

impl fmt::Debug for BootInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootInformation")
            .field("firmware_type", &self.firmware_type)
            .field("parameters", &self.parameters)
            .field("memory_descriptors", &self.memory_descriptors.len())
            .field("debug_print", &self.debug_print.is_some())
            .finish()
    }
}

/// The kernel command line: space-separated `NAME` switches and `NAME=value`
/// pairs, UTF-16 as the loader passes it.
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct KernelParameters<'a>(&'a [u16]);

impl<'a> KernelParameters<'a> {
    #[must_use]
    pub const fn new(text: &'a [u16]) -> Self {
        Self(text)
    }

    /// Borrows a NUL-terminated UTF-16 string; address 0 is an empty line.
    ///
    /// # Safety
    /// A non-zero `address` must point at a NUL-terminated UTF-16 string that
    /// lives and stays unchanged for `'a`.
    pub unsafe fn from_wide_ptr(address: u64) -> Self {
        let Ok(address) = usize::try_from(address) else {
            return Self::default();
        };
        if address == 0 {
            return Self::default();
        }
        let start: *const u16 = core::ptr::with_exposed_provenance(address);
        let mut len = 0;
        // SAFETY: the string is NUL-terminated.
        while unsafe { start.add(len).read_unaligned() } != 0 {
            len += 1;
        }
        // SAFETY: `len` units were just read.
        Self(unsafe { core::slice::from_raw_parts(start, len) })
    }

    /// Value of parameter `name`, matched ignoring ASCII case. A bare switch
    /// yields an empty value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ParameterValue<'a>> {
        let units: &'a [u16] = self.0;
        units
            .split(|unit| *unit == SPACE)
            .filter(|token| !token.is_empty())
            .find_map(|token| {
                let (key, value) = match token.iter().position(|unit| *unit == EQUALS) {
                    Some(at) => (&token[..at], &token[at + 1..]),
                    None => (token, &token[token.len()..]),
                };
                wide_eq_ignore_ascii_case(key, name).then_some(ParameterValue(value))
            })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `DEBUG=` and `LOGLEVEL=`; `default_port` applies when `DEBUG` is absent.
    #[must_use]
    pub fn debug_config(&self, default_port: Option<DebugPort>) -> DebugConfig {
        let mut config = DebugConfig::default();

        match self.get("DEBUG") {
            Some(ports) => {
                for port in ports.split(COMMA) {
                    let parsed = port.decode::<MAX_VALUE_LENGTH>().and_then(|name| DebugPort::parse(&name));
                    match parsed {
                        Some(port) => {
                            config.add_port(port);
                        }
                        None => warn!("ignoring unknown debug port {port}"),
                    }
                }
            }
            None => {
                if let Some(port) = default_port {
                    config.add_port(port);
                }
            }
        }

        if let Some(level) = self.get("LOGLEVEL") {
            match level.decode::<MAX_VALUE_LENGTH>().and_then(|name| parse_level(&name)) {
                Some(level) => config.level = level,
                None => warn!("ignoring log level {level}"),
            }
        }
        config
    }
}

impl fmt::Debug for KernelParameters<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", ParameterValue(self.0))
    }
}

/// One parameter value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ParameterValue<'a>(&'a [u16]);

impl<'a> ParameterValue<'a> {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn eq_ignore_ascii_case(&self, other: &str) -> bool {
        wide_eq_ignore_ascii_case(self.0, other)
    }

    /// Sub-values separated by `separator`.
    pub fn split(&self, separator: u16) -> impl Iterator<Item = ParameterValue<'a>> + use<'a> {
        let units: &'a [u16] = self.0;
        units
            .split(move |unit| *unit == separator)
            .filter(|part| !part.is_empty())
            .map(ParameterValue)
    }

    /// The value as UTF-8, if it is valid and fits `N` bytes.
    #[must_use]
    pub fn decode<const N: usize>(&self) -> Option<heapless::String<N>> {
        let mut out = heapless::String::new();
        for c in char::decode_utf16(self.0.iter().copied()) {
            out.push(c.ok()?).ok()?;
        }
        Some(out)
    }
}

impl fmt::Display for ParameterValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use fmt::Write as _;
        for c in char::decode_utf16(self.0.iter().copied()) {
            f.write_char(c.unwrap_or(char::REPLACEMENT_CHARACTER))?;
        }
        Ok(())
    }
}

fn wide_eq_ignore_ascii_case(wide: &[u16], text: &str) -> bool {
    wide.len() == text.len()
        && wide.iter().zip(text.bytes()).all(|(w, b)| {
            u8::try_from(*w).is_ok_and(|w| w.eq_ignore_ascii_case(&b))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::boot::{BOOT_PROTOCOL_VERSION, INITIALIZATION_BLOCK_VERSION, MemoryDescriptorList};
    use kernel_info::descriptor::LoaderMemoryType;
    use log::LevelFilter;

    fn wide(text: &str) -> Vec<u16> {
        text.encode_utf16().collect()
    }

    fn leak_wide_nul(text: &str) -> u64 {
        let mut units = wide(text);
        units.push(0);
        units.leak().as_ptr() as usize as u64
    }

    #[test]
    fn header_is_checked_field_by_field() {
        let mut block = KernelInitializationBlock::new();
        unsafe { verify_abi_compatibility(&block) }.unwrap();

        block.block_version = INITIALIZATION_BLOCK_VERSION - 1;
        assert_eq!(
            unsafe { verify_abi_compatibility(&block) },
            Err(AbiError::VersionMismatch {
                found: INITIALIZATION_BLOCK_VERSION - 1,
                expected: INITIALIZATION_BLOCK_VERSION,
            })
        );

        let mut block = KernelInitializationBlock::new();
        block.protocol_version = BOOT_PROTOCOL_VERSION + 1;
        assert!(matches!(
            unsafe { verify_abi_compatibility(&block) },
            Err(AbiError::ProtocolMismatch { .. })
        ));

        let mut block = KernelInitializationBlock::new();
        block.block_size -= 8;
        assert!(matches!(
            unsafe { verify_abi_compatibility(&block) },
            Err(AbiError::SizeMismatch { .. })
        ));

        assert_eq!(
            unsafe { verify_abi_compatibility(core::ptr::null()) },
            Err(AbiError::MissingBlock)
        );
    }

    #[test]
    fn payload_is_bound() {
        let descriptors = vec![
            LoaderMemoryDescriptor::new(LoaderMemoryType::FREE, 0x100, 0x800),
            LoaderMemoryDescriptor::new(LoaderMemoryType::BAD, 0x900, 0x10),
        ]
        .leak();
        let block = KernelInitializationBlock {
            firmware_type: FirmwareType::EFI,
            kernel_parameters: leak_wide_nul("DEBUG=COM1 NOXPA"),
            memory_descriptors: MemoryDescriptorList::from_slice(descriptors),
            ..KernelInitializationBlock::new()
        };

        let info = unsafe { BootInformation::from_block(&block) }.unwrap();
        assert_eq!(info.firmware_type, FirmwareType::EFI);
        assert_eq!(info.memory_descriptors, &descriptors[..]);
        assert!(info.parameters.contains("noxpa"));
        assert!(info.debug_print.is_none());
    }

    #[test]
    fn empty_payload() {
        let block = KernelInitializationBlock::new();
        let info = unsafe { BootInformation::from_block(&block) }.unwrap();
        assert!(info.memory_descriptors.is_empty());
        assert!(info.parameters.is_empty());
    }

    #[test]
    fn null_memory_map_with_entries_is_rejected() {
        let block = KernelInitializationBlock {
            memory_descriptors: MemoryDescriptorList {
                descriptors_ptr: 0,
                descriptor_count: 3,
            },
            ..KernelInitializationBlock::new()
        };
        assert_eq!(
            unsafe { BootInformation::from_block(&block) }.unwrap_err(),
            BootInfoError::NullDescriptors { count: 3 }
        );
    }

    #[test]
    fn parameter_lookup() {
        let text = wide("  debug=COM1,qemu LOGLEVEL=trace NOXPA  ");
        let parameters = KernelParameters::new(&text);

        let debug = parameters.get("DEBUG").unwrap();
        let ports: Vec<_> = debug.split(COMMA).map(|p| p.to_string()).collect();
        assert_eq!(ports, ["COM1", "qemu"]);
        assert!(parameters.get("LogLevel").unwrap().eq_ignore_ascii_case("TRACE"));
        assert!(parameters.get("NOXPA").unwrap().is_empty());
        assert!(parameters.get("NOX").is_none());
        assert!(parameters.get("COM1").is_none());
    }

    #[test]
    fn debug_configuration() {
        let text = wide("DEBUG=COM2,QEMU,LPT1 LOGLEVEL=debug");
        let config = KernelParameters::new(&text).debug_config(None);
        assert_eq!(config.ports.as_slice(), [DebugPort::Com(2), DebugPort::Qemu]);
        assert_eq!(config.level, LevelFilter::Debug);

        let config = KernelParameters::default().debug_config(Some(DebugPort::Qemu));
        assert_eq!(config.ports.as_slice(), [DebugPort::Qemu]);
        assert_eq!(config.level, LevelFilter::Info);

        let text = wide("LOGLEVEL=9");
        assert_eq!(KernelParameters::new(&text).debug_config(None).level, LevelFilter::Info);
    }

    #[test]
    fn wide_pointer_is_read_to_the_terminator() {
        let parameters = unsafe { KernelParameters::from_wide_ptr(leak_wide_nul("A=1 B")) };
        assert_eq!(format!("{parameters:?}"), "\"A=1 B\"");
        assert!(unsafe { KernelParameters::from_wide_ptr(0) }.is_empty());
    }
}

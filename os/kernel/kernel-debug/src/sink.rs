use core::fmt;
use kernel_hal::Platform;
use kernel_info::boot::DebugPrintFn;

/// The port number for QEMU's debug console (`-debugcon`).
pub const QEMU_DEBUG_PORT: u16 = 0x402;

/// A byte-oriented diagnostic output.
pub trait DebugSink: Sync {
    fn name(&self) -> &'static str;

    /// Writes `bytes` without buffering. Output is best effort.
    fn write_bytes(&self, bytes: &[u8]);
}

/// `core::fmt::Write` adapter over a sink.
pub struct SinkWriter<'a>(pub &'a dyn DebugSink);

impl fmt::Write for SinkWriter<'_> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_bytes(s.as_bytes());
        Ok(())
    }
}

/// QEMU's debug port: every byte written to port `0x402` shows up on the
/// host side.
pub struct QemuDebugPort {
    platform: &'static dyn Platform,
}

impl QemuDebugPort {
    #[must_use]
    pub const fn new(platform: &'static dyn Platform) -> Self {
        Self { platform }
    }
}

impl DebugSink for QemuDebugPort {
    fn name(&self) -> &'static str {
        "QEMU"
    }

    fn write_bytes(&self, bytes: &[u8]) {
        for b in bytes {
            // SAFETY: the debug port has no side effects beyond output.
            unsafe { self.platform.write_port_u8(QEMU_DEBUG_PORT, *b) }
        }
    }
}

/// The loader's print routine from the initialization block.
pub struct LoaderPrintSink {
    print: DebugPrintFn,
}

impl LoaderPrintSink {
    #[must_use]
    pub const fn new(print: DebugPrintFn) -> Self {
        Self { print }
    }
}

impl DebugSink for LoaderPrintSink {
    fn name(&self) -> &'static str {
        "loader"
    }

    fn write_bytes(&self, bytes: &[u8]) {
        (self.print)(bytes.as_ptr(), bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;
    use kernel_hal::mock::MockPlatform;
    use std::sync::Mutex;
    use std::vec::Vec;

    static PRINTED: Mutex<Vec<u8>> = Mutex::new(Vec::new());

    extern "efiapi" fn print(message: *const u8, length: usize) {
        let bytes = unsafe { core::slice::from_raw_parts(message, length) };
        PRINTED.lock().unwrap().extend_from_slice(bytes);
    }

    #[test]
    fn qemu_port_writes_every_byte() {
        let platform: &'static MockPlatform = Box::leak(Box::new(MockPlatform::new()));
        let port = QemuDebugPort::new(platform);
        write!(SinkWriter(&port), "µ{}", 7).unwrap();
        assert_eq!(platform.port_writes(QEMU_DEBUG_PORT), "µ7".as_bytes());
    }

    #[test]
    fn loader_print_receives_the_buffer() {
        let sink = LoaderPrintSink::new(print);
        sink.write_bytes(b"XTLDR handoff\n");
        assert_eq!(PRINTED.lock().unwrap().as_slice(), b"XTLDR handoff\n");
    }
}

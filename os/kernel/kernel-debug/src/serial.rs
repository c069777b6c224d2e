//! # 16550 UART
//!
//! Polled, interrupt-free output at 115200 baud, 8N1. A port is only used
//! after its scratch register proved that something answers at the base.

use crate::sink::DebugSink;
use core::hint::spin_loop;
use kernel_hal::Platform;

/// Legacy base ports of COM1 through COM4.
pub const COM_PORT_BASES: [u16; 4] = [0x3F8, 0x2F8, 0x3E8, 0x2E8];

const DATA: u16 = 0;
const INTERRUPT_ENABLE: u16 = 1;
const DIVISOR_LOW: u16 = 0;
const DIVISOR_HIGH: u16 = 1;
const FIFO_CONTROL: u16 = 2;
const LINE_CONTROL: u16 = 3;
const MODEM_CONTROL: u16 = 4;
const LINE_STATUS: u16 = 5;
const SCRATCH: u16 = 7;

/// LCR bit 7: divisor latch access.
const LCR_DLAB: u8 = 0x80;
/// LCR: 8 data bits, no parity, one stop bit.
const LCR_8N1: u8 = 0x03;
/// FCR: enable and clear both FIFOs, 14-byte trigger level.
const FCR_ENABLE_CLEAR_14: u8 = 0xC7;
/// MCR: DTR, RTS, OUT2.
const MCR_DTR_RTS_OUT2: u8 = 0x0B;
/// LSR bit 5: transmit holding register empty.
const LSR_TX_EMPTY: u8 = 0x20;

/// Polls of the line status before a byte is dropped.
const TX_SPIN_LIMIT: u32 = 0x1_0000;

/// Scratch register test patterns.
const PROBE_PATTERNS: [u8; 2] = [0x55, 0xAA];

pub struct SerialPort {
    platform: &'static dyn Platform,
    base: u16,
}

impl SerialPort {
    #[must_use]
    pub const fn new(platform: &'static dyn Platform, base: u16) -> Self {
        Self { platform, base }
    }

    /// COM port number `n` (1-based), if it has a legacy base.
    #[must_use]
    pub fn com(platform: &'static dyn Platform, n: usize) -> Option<Self> {
        let base = *COM_PORT_BASES.get(n.checked_sub(1)?)?;
        Some(Self::new(platform, base))
    }

    #[must_use]
    pub const fn base(&self) -> u16 {
        self.base
    }

    fn read(&self, register: u16) -> u8 {
        // SAFETY: UART registers tolerate reads.
        unsafe { self.platform.read_port_u8(self.base + register) }
    }

    fn write(&self, register: u16, value: u8) {
        // SAFETY: the base belongs to a UART (probed before use).
        unsafe { self.platform.write_port_u8(self.base + register, value) }
    }

    /// Whether a UART answers at the base: the scratch register must hold
    /// what was written to it.
    #[must_use]
    pub fn probe(&self) -> bool {
        PROBE_PATTERNS.iter().all(|pattern| {
            self.write(SCRATCH, *pattern);
            self.read(SCRATCH) == *pattern
        })
    }

    /// Programs 115200 baud 8N1 with FIFOs and interrupts off.
    pub fn initialize(&self) {
        self.write(INTERRUPT_ENABLE, 0x00);
        self.write(LINE_CONTROL, LCR_DLAB);
        self.write(DIVISOR_LOW, 0x01);
        self.write(DIVISOR_HIGH, 0x00);
        self.write(LINE_CONTROL, LCR_8N1);
        self.write(FIFO_CONTROL, FCR_ENABLE_CLEAR_14);
        self.write(MODEM_CONTROL, MCR_DTR_RTS_OUT2);
    }

    /// Sends one byte once the transmitter is free. Gives up silently after
    /// a bounded wait so a dead line cannot stall the boot.
    pub fn write_byte(&self, byte: u8) {
        for _ in 0..TX_SPIN_LIMIT {
            if self.read(LINE_STATUS) & LSR_TX_EMPTY != 0 {
                self.write(DATA, byte);
                return;
            }
            spin_loop();
        }
    }
}

impl DebugSink for SerialPort {
    fn name(&self) -> &'static str {
        match self.base {
            0x3F8 => "COM1",
            0x2F8 => "COM2",
            0x3E8 => "COM3",
            0x2E8 => "COM4",
            _ => "serial",
        }
    }

    fn write_bytes(&self, bytes: &[u8]) {
        for b in bytes {
            if *b == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(*b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_hal::mock::{MockPlatform, PlatformEvent};

    fn leak(platform: MockPlatform) -> &'static MockPlatform {
        Box::leak(Box::new(platform))
    }

    #[test]
    fn initialization_sequence() {
        let platform = leak(MockPlatform::new());
        let port = SerialPort::com(platform, 1).unwrap();
        port.initialize();
        let writes: Vec<_> = platform
            .events()
            .into_iter()
            .filter_map(|e| match e {
                PlatformEvent::WritePort(p, v) => Some((p - 0x3F8, v)),
                _ => None,
            })
            .collect();
        assert_eq!(
            writes,
            [(1, 0x00), (3, 0x80), (0, 0x01), (1, 0x00), (3, 0x03), (2, 0xC7), (4, 0x0B)]
        );
    }

    #[test]
    fn probe_needs_a_working_scratch_register() {
        // Latching ports behave like a UART scratch register.
        let present = leak(MockPlatform::new());
        assert!(SerialPort::com(present, 2).unwrap().probe());

        let absent = leak(MockPlatform::new().with_port_input(0x2F8 + SCRATCH, 0xFF));
        assert!(!SerialPort::com(absent, 2).unwrap().probe());
    }

    #[test]
    fn newlines_are_expanded() {
        let platform = leak(MockPlatform::new().with_port_input(0x3F8 + LINE_STATUS, LSR_TX_EMPTY));
        let port = SerialPort::com(platform, 1).unwrap();
        port.write_bytes(b"ok\n");
        assert_eq!(platform.port_writes(0x3F8), b"ok\r\n");
        assert_eq!(port.name(), "COM1");
    }

    #[test]
    fn busy_transmitter_drops_the_byte() {
        let platform = leak(MockPlatform::new().with_port_input(0x3F8 + LINE_STATUS, 0));
        SerialPort::com(platform, 1).unwrap().write_byte(b'x');
        assert!(platform.port_writes(0x3F8).is_empty());
    }

    #[test]
    fn only_four_legacy_ports() {
        let platform = leak(MockPlatform::new());
        assert!(SerialPort::com(platform, 0).is_none());
        assert!(SerialPort::com(platform, 5).is_none());
        assert_eq!(SerialPort::com(platform, 4).unwrap().base(), 0x2E8);
    }
}

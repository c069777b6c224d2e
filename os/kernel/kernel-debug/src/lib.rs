//! # Kernel Debug Output
//!
//! Routes the `log` facade to whatever diagnostic outputs the machine has
//! during bring-up. Nothing here allocates: records are formatted straight
//! into each sink.
//!
//! ## Sinks
//!
//! | Sink | Selected by | Notes |
//! |------|-------------|-------|
//! | [`QemuDebugPort`] | `DEBUG=QEMU` | Port `0x402`, captured with `-debugcon`. |
//! | [`SerialPort`] | `DEBUG=COM1`..`COM4` | 16550, 115200 8N1, probed first. |
//! | [`LoaderPrintSink`] | loader callback present | Until the loader's services are gone. |
//!
//! ## Output format
//! ```text
//! [LEVEL] target: message
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let config = DebugConfig { ports, level: LevelFilter::Debug };
//! let sinks = kernel_debug::initialize_debug_io(&PLATFORM, &config, block.debug_print);
//! log::info!("{sinks} debug sinks up");
//! ```
//!
//! Debug I/O is optional. A port that does not answer is skipped with a
//! warning on the sinks that did come up; zero sinks is not an error.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod config;
mod logger;
mod serial;
mod sink;

pub use config::{DebugConfig, DebugPort, MAX_DEBUG_PORTS, parse_level};
pub use logger::{DebugLogger, MAX_DEBUG_SINKS};
pub use serial::{COM_PORT_BASES, SerialPort};
pub use sink::{DebugSink, LoaderPrintSink, QEMU_DEBUG_PORT, QemuDebugPort, SinkWriter};

use kernel_hal::Platform;
use kernel_info::boot::DebugPrintFn;
use kernel_sync::BootOnceCell;
use log::{debug, warn};

/// The system logger.
pub static LOGGER: DebugLogger = DebugLogger::new();

static QEMU_PORT: BootOnceCell<QemuDebugPort> = BootOnceCell::new();
static SERIAL_PORTS: [BootOnceCell<SerialPort>; COM_PORT_BASES.len()] =
    [const { BootOnceCell::new() }; COM_PORT_BASES.len()];
static LOADER_PRINT: BootOnceCell<LoaderPrintSink> = BootOnceCell::new();

/// Brings up the configured debug sinks and installs [`LOGGER`].
///
/// Returns the number of sinks registered by this call. Sinks already
/// published by an earlier call are not registered twice.
pub fn initialize_debug_io(
    platform: &'static dyn Platform,
    config: &DebugConfig,
    loader_print: Option<DebugPrintFn>,
) -> usize {
    let mut registered = 0;
    let mut missing: heapless::Vec<DebugPort, MAX_DEBUG_PORTS> = heapless::Vec::new();

    if let Some(print) = loader_print
        && let Ok(sink) = LOADER_PRINT.set(LoaderPrintSink::new(print))
    {
        registered += usize::from(LOGGER.register(sink).is_ok());
    }

    for port in &config.ports {
        let sink: Option<&'static dyn DebugSink> = match *port {
            DebugPort::Qemu if QEMU_PORT.is_set() => continue,
            DebugPort::Qemu => QEMU_PORT
                .set(QemuDebugPort::new(platform))
                .ok()
                .map(|sink| sink as &'static dyn DebugSink),
            DebugPort::Com(n) => match serial_cell(n) {
                Some(cell) if cell.is_set() => continue,
                Some(cell) => bring_up_serial(platform, cell, n),
                None => None,
            },
        };
        match sink {
            Some(sink) if LOGGER.register(sink).is_ok() => registered += 1,
            Some(_) => {}
            None => {
                let _ = missing.push(*port);
            }
        }
    }

    // Fails when a logger is already installed; records still flow to the
    // sinks registered above if that logger is this one.
    let _ = LOGGER.install(config.level);

    for port in &missing {
        warn!("debug port {port} not available");
    }
    debug!("debug I/O: {registered} sinks, level {}", config.level);
    registered
}

fn serial_cell(n: u8) -> Option<&'static BootOnceCell<SerialPort>> {
    SERIAL_PORTS.get(usize::from(n).checked_sub(1)?)
}

fn bring_up_serial(
    platform: &'static dyn Platform,
    cell: &'static BootOnceCell<SerialPort>,
    n: u8,
) -> Option<&'static dyn DebugSink> {
    let port = SerialPort::com(platform, usize::from(n))?;
    if !port.probe() {
        return None;
    }
    port.initialize();
    cell.set(port).ok().map(|sink| sink as &'static dyn DebugSink)
}

use crate::sink::{DebugSink, SinkWriter};
use core::fmt::Write as _;
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_sync::SpinLock;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Most sinks a logger fans out to.
pub const MAX_DEBUG_SINKS: usize = 6;

/// A `log::Log` that writes every record to all registered sinks.
pub struct DebugLogger {
    sinks: SpinLock<heapless::Vec<&'static dyn DebugSink, MAX_DEBUG_SINKS>>,
    max_level: AtomicUsize,
}

impl Default for DebugLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugLogger {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sinks: SpinLock::new(heapless::Vec::new()),
            max_level: AtomicUsize::new(LevelFilter::Info as usize),
        }
    }

    /// Adds `sink` to the fan-out.
    ///
    /// # Errors
    /// Hands the sink back when [`MAX_DEBUG_SINKS`] are already registered.
    pub fn register(&self, sink: &'static dyn DebugSink) -> Result<(), &'static dyn DebugSink> {
        self.sinks.lock().push(sink)
    }

    /// Number of registered sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn set_level(&self, level: LevelFilter) {
        self.max_level.store(level as usize, Ordering::Relaxed);
    }

    #[must_use]
    pub fn level(&self) -> LevelFilter {
        match self.max_level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Makes `self` the global logger.
    ///
    /// # Errors
    /// Fails if another logger was installed first; the level is still applied.
    pub fn install(&'static self, level: LevelFilter) -> Result<(), SetLoggerError> {
        self.set_level(level);
        log::set_max_level(level);
        log::set_logger(self)
    }
}

impl Log for DebugLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message\n"
        let sinks = self.sinks.lock();
        for sink in sinks.iter() {
            // Best effort; a sink that fails mid-line is not retried.
            let _ = writeln!(
                SinkWriter(*sink),
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::sync::Mutex;
    use std::vec::Vec;

    struct Capture(Mutex<Vec<u8>>);

    impl DebugSink for Capture {
        fn name(&self) -> &'static str {
            "capture"
        }

        fn write_bytes(&self, bytes: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(bytes);
        }
    }

    fn capture() -> &'static Capture {
        Box::leak(Box::new(Capture(Mutex::new(Vec::new()))))
    }

    fn emit(logger: &DebugLogger, level: Level, message: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("kernel_mm::pfn")
                .args(format_args!("{message}"))
                .build(),
        );
    }

    #[test]
    fn records_reach_every_sink() {
        let logger = DebugLogger::new();
        let (a, b) = (capture(), capture());
        logger.register(a).ok().unwrap();
        logger.register(b).ok().unwrap();

        emit(&logger, Level::Info, "4096 pages");
        let expected = b"[INFO] kernel_mm::pfn: 4096 pages\n";
        assert_eq!(a.0.lock().unwrap().as_slice(), expected);
        assert_eq!(b.0.lock().unwrap().as_slice(), expected);
    }

    #[test]
    fn records_above_the_level_are_dropped() {
        let logger = DebugLogger::new();
        let sink = capture();
        logger.register(sink).ok().unwrap();
        logger.set_level(LevelFilter::Warn);

        emit(&logger, Level::Debug, "noise");
        emit(&logger, Level::Error, "fatal");
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"[ERROR] kernel_mm::pfn: fatal\n");
        assert_eq!(logger.level(), LevelFilter::Warn);
    }

    #[test]
    fn sink_table_is_bounded() {
        let logger = DebugLogger::new();
        for _ in 0..MAX_DEBUG_SINKS {
            assert!(logger.register(capture()).is_ok());
        }
        assert!(logger.register(capture()).is_err());
        assert_eq!(logger.sink_count(), MAX_DEBUG_SINKS);
    }
}

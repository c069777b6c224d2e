use core::fmt;
use log::LevelFilter;

/// Most ports one configuration can name.
pub const MAX_DEBUG_PORTS: usize = 5;

/// A debug output selected on the kernel command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DebugPort {
    /// QEMU's debug console.
    Qemu,
    /// Legacy serial port `COM1`..`COM4`.
    Com(u8),
}

impl DebugPort {
    /// Parses `QEMU` or `COM1`..`COM4`, ignoring ASCII case.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("QEMU") {
            return Some(Self::Qemu);
        }
        let prefix = name.get(..3)?;
        if !prefix.eq_ignore_ascii_case("COM") {
            return None;
        }
        match name[3..].parse::<u8>() {
            Ok(n @ 1..=4) => Some(Self::Com(n)),
            _ => None,
        }
    }
}

impl fmt::Display for DebugPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Qemu => f.write_str("QEMU"),
            Self::Com(n) => write!(f, "COM{n}"),
        }
    }
}

/// What debug I/O initialization should bring up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DebugConfig {
    pub ports: heapless::Vec<DebugPort, MAX_DEBUG_PORTS>,
    pub level: LevelFilter,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            ports: heapless::Vec::new(),
            level: LevelFilter::Info,
        }
    }
}

impl DebugConfig {
    /// Adds `port` unless it is already listed or the list is full.
    pub fn add_port(&mut self, port: DebugPort) -> bool {
        !self.ports.contains(&port) && self.ports.push(port).is_ok()
    }
}

/// Parses a `LOGLEVEL=` value: a level name or its number (0 = off).
#[must_use]
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    const LEVELS: [LevelFilter; 6] = [
        LevelFilter::Off,
        LevelFilter::Error,
        LevelFilter::Warn,
        LevelFilter::Info,
        LevelFilter::Debug,
        LevelFilter::Trace,
    ];
    if let Ok(n) = value.parse::<usize>() {
        return LEVELS.get(n).copied();
    }
    LEVELS
        .into_iter()
        .find(|level| level.as_str().eq_ignore_ascii_case(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_names() {
        assert_eq!(DebugPort::parse("qemu"), Some(DebugPort::Qemu));
        assert_eq!(DebugPort::parse("COM2"), Some(DebugPort::Com(2)));
        assert_eq!(DebugPort::parse("com4"), Some(DebugPort::Com(4)));
        assert_eq!(DebugPort::parse("COM5"), None);
        assert_eq!(DebugPort::parse("COM"), None);
        assert_eq!(DebugPort::parse("LPT1"), None);
        assert_eq!(DebugPort::Com(3).to_string(), "COM3");
    }

    #[test]
    fn levels_by_name_or_number() {
        assert_eq!(parse_level("trace"), Some(LevelFilter::Trace));
        assert_eq!(parse_level("WARN"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("0"), Some(LevelFilter::Off));
        assert_eq!(parse_level("4"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("9"), None);
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn ports_are_not_duplicated() {
        let mut config = DebugConfig::default();
        assert!(config.add_port(DebugPort::Com(1)));
        assert!(!config.add_port(DebugPort::Com(1)));
        assert!(config.add_port(DebugPort::Qemu));
        assert_eq!(config.ports.as_slice(), [DebugPort::Com(1), DebugPort::Qemu]);
    }
}

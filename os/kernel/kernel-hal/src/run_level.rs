use core::fmt;

/// The kernel's interrupt-priority level.
///
/// A processor running at level `N` only accepts interrupts whose priority
/// class is above `N`. The level maps one-to-one onto the 4-bit task priority
/// class (CR8 on x86-64, APIC TPR bits 7:4 on x86), so [`RunLevel::HIGH`]
/// masks every maskable vector.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RunLevel(u8);

impl RunLevel {
    pub const PASSIVE: Self = Self(0);
    pub const APC: Self = Self(1);
    pub const DISPATCH: Self = Self(2);
    pub const CMCI: Self = Self(5);
    pub const DEVICE: Self = Self(6);
    pub const CLOCK: Self = Self(13);
    pub const IPI: Self = Self(14);
    pub const POWER: Self = Self(14);
    pub const PROFILE: Self = Self(15);
    pub const HIGH: Self = Self(15);

    /// Builds a level from a raw task priority class; values above 15 clamp
    /// to [`RunLevel::HIGH`].
    #[must_use]
    pub const fn from_priority_class(class: u8) -> Self {
        if class > Self::HIGH.0 {
            Self::HIGH
        } else {
            Self(class)
        }
    }

    /// The 4-bit task priority class programmed for this level.
    #[must_use]
    pub const fn priority_class(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for RunLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::PASSIVE => "PASSIVE",
            Self::APC => "APC",
            Self::DISPATCH => "DISPATCH",
            Self::CMCI => "CMCI",
            Self::DEVICE => "DEVICE",
            Self::CLOCK => "CLOCK",
            Self::IPI => "IPI",
            Self::HIGH => "HIGH",
            _ => return write!(f, "RunLevel({})", self.0),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(RunLevel::PASSIVE < RunLevel::APC);
        assert!(RunLevel::APC < RunLevel::DISPATCH);
        assert!(RunLevel::DISPATCH < RunLevel::CLOCK);
        assert!(RunLevel::CLOCK < RunLevel::HIGH);
    }

    #[test]
    fn priority_class_clamps() {
        assert_eq!(RunLevel::from_priority_class(3).priority_class(), 3);
        assert_eq!(RunLevel::from_priority_class(200), RunLevel::HIGH);
        assert_eq!(format!("{:?}", RunLevel::HIGH), "HIGH");
        assert_eq!(format!("{:?}", RunLevel::from_priority_class(9)), "RunLevel(9)");
    }
}

use crate::{PAGE_OFFSET_MASK, PAGE_SHIFT};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};
use core::ptr::NonNull;

/// Virtual memory address.
///
/// Does not validate canonical form on construction. Use
/// [`VirtualAddress::sign_extend`] when composing addresses from table
/// indices, and [`VirtualAddress::is_canonical`] to check a value against the
/// active linear-address width (48 or 57 bits on x86-64).
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let raw = VirtualAddress::new(0x0000_8000_0000_0000);
/// assert!(!raw.is_canonical(48));
/// assert!(raw.is_canonical(57));
/// assert_eq!(raw.sign_extend(48).as_u64(), 0xFFFF_8000_0000_0000);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    #[inline]
    #[must_use]
    pub fn from_nonnull<T>(ptr: NonNull<T>) -> Self {
        Self::from_ptr(ptr.as_ptr())
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Reinterprets the address as a raw pointer.
    ///
    /// On 32-bit targets only the low 32 bits are kept.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }

    /// Virtual page number (`address >> PAGE_SHIFT`).
    #[inline]
    #[must_use]
    pub const fn page_number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & PAGE_OFFSET_MASK
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_OFFSET_MASK)
    }

    /// Replicates bit `bits - 1` into all higher bits.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub const fn sign_extend(self, bits: u32) -> Self {
        let shift = 64 - bits;
        Self((((self.0 << shift) as i64) >> shift) as u64)
    }

    /// Whether bits `63..bits` are all copies of bit `bits - 1`.
    #[inline]
    #[must_use]
    pub const fn is_canonical(self, bits: u32) -> bool {
        self.sign_extend(bits).0 == self.0
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub for VirtualAddress {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<VirtualAddress> for u64 {
    #[inline]
    fn from(a: VirtualAddress) -> Self {
        a.as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extension_48_and_57() {
        let low = VirtualAddress::new(0x0000_7FFF_FFFF_F000);
        assert_eq!(low.sign_extend(48), low);
        assert!(low.is_canonical(48));

        let high = VirtualAddress::new(0x00FF_8000_0000_0000);
        assert_eq!(high.sign_extend(48).as_u64(), 0xFFFF_8000_0000_0000);
        assert!(!high.is_canonical(48));

        let la57 = VirtualAddress::new(0x0100_0000_0000_0000);
        assert_eq!(la57.sign_extend(57).as_u64(), 0xFF00_0000_0000_0000);
    }

    #[test]
    fn page_number_and_offset() {
        let va = VirtualAddress::new(0xFFFF_F680_0000_1234);
        assert_eq!(va.page_offset(), 0x234);
        assert_eq!(va.align_down().as_u64(), 0xFFFF_F680_0000_1000);
        assert_eq!(va.page_number(), 0x000F_FFFF_F680_0001);
    }
}

//! # Paging schemes and the bound page map
//!
//! Every scheme reaches its own page tables through a self-map: one slot of
//! the top-level table points back at the top-level table, which turns the
//! whole paging hierarchy into a linear array of entries at a fixed virtual
//! window. Entry addresses then follow from shifting and masking alone:
//!
//! ```text
//!   entry_address(level, va) = base(level) + ((va & mask) >> shift(level)) * entry_size
//!   shift(level)             = 12 + level * index_bits
//!   base(0)                  = PTE_BASE
//!   base(level + 1)          = entry_address(0, base(level))
//! ```
//!
//! | Scheme        | Variant on its arch | Levels | Entry | `PTE_BASE`              |
//! |---------------|---------------------|--------|-------|-------------------------|
//! | [`TwoLevel`]  | x86 basic           | 2      | 4     | `0xC000_0000`           |
//! | [`ThreeLevel`]| x86 extended (PAE)  | 3      | 8     | `0xC000_0000`           |
//! | [`FourLevel`] | x86-64 basic        | 4      | 8     | `0xFFFF_F680_0000_0000` |
//! | [`FiveLevel`] | x86-64 extended (LA57) | 5   | 8     | `0xFFED_0000_0000_0000` |
//!
//! All four schemes are plain arithmetic and compile on every target. The
//! target architecture only decides which pair backs [`PageMap::basic`] and
//! [`PageMap::extended`]; [`initialize_page_map_support`] picks one of the two
//! from CR4 and the resulting [`PageMap`] never changes afterwards.

use crate::error::MmError;
use crate::pte::{CachingType, HardwarePte};
use crate::table::TableMemory;
use core::fmt;
use kernel_hal::{Cr4, Platform};
use kernel_memory_addresses::{PAGE_SHIFT, VirtualAddress};
use kernel_sync::BootOnceCell;
use log::info;

/// Number of table levels above a page, counting the page table itself.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum PageTableLevel {
    /// Page table entry (maps 4 KiB).
    Pte = 0,
    /// Page directory entry.
    Pde = 1,
    /// Page directory pointer entry.
    Ppe = 2,
    /// PML4 entry.
    Pxe = 3,
    /// PML5 entry.
    P5e = 4,
}

impl PageTableLevel {
    #[must_use]
    pub const fn index(self) -> u32 {
        self as u32
    }
}

/// Hardware translation scheme in use.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PagingMode {
    /// Legacy 32-bit paging with 4-byte entries.
    TwoLevel,
    /// 32-bit PAE paging.
    ThreeLevel,
    /// 48-bit long-mode paging.
    FourLevel,
    /// 57-bit long-mode paging (LA57).
    FiveLevel,
}

impl PagingMode {
    #[must_use]
    pub const fn levels(self) -> u32 {
        match self {
            Self::TwoLevel => 2,
            Self::ThreeLevel => 3,
            Self::FourLevel => 4,
            Self::FiveLevel => 5,
        }
    }
}

impl fmt::Display for PagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TwoLevel => "2-level",
            Self::ThreeLevel => "3-level (PAE)",
            Self::FourLevel => "4-level",
            Self::FiveLevel => "5-level (LA57)",
        })
    }
}

/// Which of the two page map implementations of the architecture is bound.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageMapVariant {
    /// No addressing extension.
    Basic,
    /// PAE on x86, LA57 on x86-64.
    Extended,
}

/// Compile-time description of one paging scheme.
pub trait PagingScheme {
    const MODE: PagingMode;
    const VARIANT: PageMapVariant;
    /// Bytes per table entry (4 or 8).
    const ENTRY_SIZE: u64;
    /// Index bits consumed per level (10 or 9).
    const INDEX_BITS: u32;
    /// Width of a linear address.
    const ADDRESS_BITS: u32;
    /// Whether addresses above the low half are sign-extended.
    const SIGN_EXTENDED: bool;
    /// Start of the self-mapped window of leaf entries.
    const PTE_BASE: u64;
}

/// Legacy x86 paging.
pub struct TwoLevel;
/// x86 PAE paging.
pub struct ThreeLevel;
/// x86-64 4-level paging.
pub struct FourLevel;
/// x86-64 5-level paging.
pub struct FiveLevel;

impl PagingScheme for TwoLevel {
    const MODE: PagingMode = PagingMode::TwoLevel;
    const VARIANT: PageMapVariant = PageMapVariant::Basic;
    const ENTRY_SIZE: u64 = 4;
    const INDEX_BITS: u32 = 10;
    const ADDRESS_BITS: u32 = 32;
    const SIGN_EXTENDED: bool = false;
    const PTE_BASE: u64 = 0xC000_0000;
}

impl PagingScheme for ThreeLevel {
    const MODE: PagingMode = PagingMode::ThreeLevel;
    const VARIANT: PageMapVariant = PageMapVariant::Extended;
    const ENTRY_SIZE: u64 = 8;
    const INDEX_BITS: u32 = 9;
    const ADDRESS_BITS: u32 = 32;
    const SIGN_EXTENDED: bool = false;
    const PTE_BASE: u64 = 0xC000_0000;
}

impl PagingScheme for FourLevel {
    const MODE: PagingMode = PagingMode::FourLevel;
    const VARIANT: PageMapVariant = PageMapVariant::Basic;
    const ENTRY_SIZE: u64 = 8;
    const INDEX_BITS: u32 = 9;
    const ADDRESS_BITS: u32 = 48;
    const SIGN_EXTENDED: bool = true;
    const PTE_BASE: u64 = self_map_window(SELF_MAP_INDEX, 48);
}

impl PagingScheme for FiveLevel {
    const MODE: PagingMode = PagingMode::FiveLevel;
    const VARIANT: PageMapVariant = PageMapVariant::Extended;
    const ENTRY_SIZE: u64 = 8;
    const INDEX_BITS: u32 = 9;
    const ADDRESS_BITS: u32 = 57;
    const SIGN_EXTENDED: bool = true;
    const PTE_BASE: u64 = self_map_window(SELF_MAP_INDEX, 57);
}

/// Top-level slot holding the self-map on x86-64.
pub const SELF_MAP_INDEX: u64 = 0x1ED;

/// Virtual window covered by top-level slot `index` in an `bits`-wide space.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
const fn self_map_window(index: u64, bits: u32) -> u64 {
    let raw = index << (bits - 9);
    let shift = 64 - bits;
    (((raw << shift) as i64) >> shift) as u64
}

const fn address_mask<S: PagingScheme>() -> u64 {
    (1u64 << S::ADDRESS_BITS) - 1
}

const fn level_shift<S: PagingScheme>(level: u32) -> u32 {
    PAGE_SHIFT + level * S::INDEX_BITS
}

/// Base of the self-mapped window holding `level` entries.
const fn level_base<S: PagingScheme>(level: u32) -> u64 {
    let mut base = S::PTE_BASE;
    let mut i = 0;
    while i < level {
        base = S::PTE_BASE + ((base & address_mask::<S>()) >> PAGE_SHIFT) * S::ENTRY_SIZE;
        i += 1;
    }
    base
}

const fn raw_entry_address<S: PagingScheme>(level: u32, va: u64) -> u64 {
    level_base::<S>(level) + ((va & address_mask::<S>()) >> level_shift::<S>(level)) * S::ENTRY_SIZE
}

fn entry_address<S: PagingScheme>(level: PageTableLevel, va: VirtualAddress) -> Option<VirtualAddress> {
    if level.index() >= S::MODE.levels() {
        return None;
    }
    Some(VirtualAddress::new(raw_entry_address::<S>(level.index(), va.as_u64())))
}

fn p5e_address<S: PagingScheme>(va: VirtualAddress) -> Option<VirtualAddress> {
    entry_address::<S>(PageTableLevel::P5e, va)
}

fn pxe_address<S: PagingScheme>(va: VirtualAddress) -> Option<VirtualAddress> {
    entry_address::<S>(PageTableLevel::Pxe, va)
}

fn ppe_address<S: PagingScheme>(va: VirtualAddress) -> Option<VirtualAddress> {
    entry_address::<S>(PageTableLevel::Ppe, va)
}

fn pde_address<S: PagingScheme>(va: VirtualAddress) -> VirtualAddress {
    VirtualAddress::new(raw_entry_address::<S>(1, va.as_u64()))
}

fn pte_address<S: PagingScheme>(va: VirtualAddress) -> VirtualAddress {
    VirtualAddress::new(raw_entry_address::<S>(0, va.as_u64()))
}

/// Virtual address mapped by the entry at `entry`, for any level.
///
/// For a PDE this is the page table it points at, inside the PTE window.
fn pte_virtual_address<S: PagingScheme>(entry: VirtualAddress) -> VirtualAddress {
    let index = (entry.as_u64().wrapping_sub(S::PTE_BASE) & address_mask::<S>()) / S::ENTRY_SIZE;
    let va = VirtualAddress::new(index << PAGE_SHIFT);
    if S::SIGN_EXTENDED {
        va.sign_extend(S::ADDRESS_BITS)
    } else {
        VirtualAddress::new(va.as_u64() & address_mask::<S>())
    }
}

fn read_entry<S: PagingScheme>(tables: &dyn TableMemory, entry: VirtualAddress) -> HardwarePte {
    if S::ENTRY_SIZE == 4 {
        HardwarePte::from_bits(u64::from(tables.read_u32(entry)))
    } else {
        HardwarePte::from_bits(tables.read_u64(entry))
    }
}

fn write_entry<S: PagingScheme>(
    tables: &mut dyn TableMemory,
    entry: VirtualAddress,
    value: HardwarePte,
) -> Result<(), MmError> {
    if S::ENTRY_SIZE == 4 {
        let narrow = value.to_narrow().ok_or(MmError::EntryTooWide(value.into_bits()))?;
        tables.write_u32(entry, narrow);
    } else {
        tables.write_u64(entry, value.into_bits());
    }
    Ok(())
}

/// The function set of one paging scheme.
pub struct PageMapOps {
    variant: PageMapVariant,
    mode: PagingMode,
    entry_size: u64,
    address_bits: u32,
    p5e_address: fn(VirtualAddress) -> Option<VirtualAddress>,
    pxe_address: fn(VirtualAddress) -> Option<VirtualAddress>,
    ppe_address: fn(VirtualAddress) -> Option<VirtualAddress>,
    pde_address: fn(VirtualAddress) -> VirtualAddress,
    pte_address: fn(VirtualAddress) -> VirtualAddress,
    pte_virtual_address: fn(VirtualAddress) -> VirtualAddress,
    read_entry: fn(&dyn TableMemory, VirtualAddress) -> HardwarePte,
    write_entry: fn(&mut dyn TableMemory, VirtualAddress, HardwarePte) -> Result<(), MmError>,
}

impl PageMapOps {
    const fn of<S: PagingScheme>() -> Self {
        Self {
            variant: S::VARIANT,
            mode: S::MODE,
            entry_size: S::ENTRY_SIZE,
            address_bits: S::ADDRESS_BITS,
            p5e_address: p5e_address::<S>,
            pxe_address: pxe_address::<S>,
            ppe_address: ppe_address::<S>,
            pde_address: pde_address::<S>,
            pte_address: pte_address::<S>,
            pte_virtual_address: pte_virtual_address::<S>,
            read_entry: read_entry::<S>,
            write_entry: write_entry::<S>,
        }
    }
}

static TWO_LEVEL_OPS: PageMapOps = PageMapOps::of::<TwoLevel>();
static THREE_LEVEL_OPS: PageMapOps = PageMapOps::of::<ThreeLevel>();
static FOUR_LEVEL_OPS: PageMapOps = PageMapOps::of::<FourLevel>();
static FIVE_LEVEL_OPS: PageMapOps = PageMapOps::of::<FiveLevel>();

#[cfg(target_arch = "x86")]
static BASIC_OPS: &PageMapOps = &TWO_LEVEL_OPS;
#[cfg(target_arch = "x86")]
static EXTENDED_OPS: &PageMapOps = &THREE_LEVEL_OPS;

#[cfg(not(target_arch = "x86"))]
static BASIC_OPS: &PageMapOps = &FOUR_LEVEL_OPS;
#[cfg(not(target_arch = "x86"))]
static EXTENDED_OPS: &PageMapOps = &FIVE_LEVEL_OPS;

const _: () = {
    assert!(level_base::<FourLevel>(0) == 0xFFFF_F680_0000_0000);
    assert!(level_base::<FourLevel>(1) == 0xFFFF_F6FB_4000_0000);
    assert!(level_base::<FourLevel>(2) == 0xFFFF_F6FB_7DA0_0000);
    assert!(level_base::<FourLevel>(3) == 0xFFFF_F6FB_7DBE_D000);
    assert!(level_base::<FiveLevel>(0) == 0xFFED_0000_0000_0000);
    assert!(level_base::<FiveLevel>(1) == 0xFFED_F680_0000_0000);
    assert!(level_base::<FiveLevel>(2) == 0xFFED_F6FB_4000_0000);
    assert!(level_base::<FiveLevel>(3) == 0xFFED_F6FB_7DA0_0000);
    assert!(level_base::<FiveLevel>(4) == 0xFFED_F6FB_7DBE_D000);
    assert!(level_base::<TwoLevel>(1) == 0xC030_0000);
    assert!(level_base::<ThreeLevel>(1) == 0xC060_0000);
    assert!(level_base::<ThreeLevel>(2) == 0xC060_3000);
};

/// Handle to one scheme's function set.
///
/// Copies are cheap and all refer to the same static table, so every query
/// made through a bound map uses the same scheme.
#[derive(Copy, Clone)]
pub struct PageMap {
    ops: &'static PageMapOps,
}

impl PageMap {
    /// The architecture's scheme without addressing extensions.
    #[must_use]
    pub fn basic() -> Self {
        Self { ops: BASIC_OPS }
    }

    /// The architecture's scheme with PAE (x86) or LA57 (x86-64).
    #[must_use]
    pub fn extended() -> Self {
        Self { ops: EXTENDED_OPS }
    }

    /// A specific scheme, regardless of the target architecture.
    #[must_use]
    pub fn for_mode(mode: PagingMode) -> Self {
        let ops = match mode {
            PagingMode::TwoLevel => &TWO_LEVEL_OPS,
            PagingMode::ThreeLevel => &THREE_LEVEL_OPS,
            PagingMode::FourLevel => &FOUR_LEVEL_OPS,
            PagingMode::FiveLevel => &FIVE_LEVEL_OPS,
        };
        Self { ops }
    }

    #[must_use]
    pub fn variant(&self) -> PageMapVariant {
        self.ops.variant
    }

    #[must_use]
    pub fn mode(&self) -> PagingMode {
        self.ops.mode
    }

    #[must_use]
    pub fn levels(&self) -> u32 {
        self.ops.mode.levels()
    }

    #[must_use]
    pub fn entry_size(&self) -> u64 {
        self.ops.entry_size
    }

    #[must_use]
    pub fn address_bits(&self) -> u32 {
        self.ops.address_bits
    }

    /// PML5 entry for `va`; `None` below five levels.
    #[inline]
    #[must_use]
    pub fn p5e_address(&self, va: VirtualAddress) -> Option<VirtualAddress> {
        (self.ops.p5e_address)(va)
    }

    /// PML4 entry for `va`; `None` below four levels.
    #[inline]
    #[must_use]
    pub fn pxe_address(&self, va: VirtualAddress) -> Option<VirtualAddress> {
        (self.ops.pxe_address)(va)
    }

    /// Page directory pointer entry for `va`; `None` for 2-level paging.
    #[inline]
    #[must_use]
    pub fn ppe_address(&self, va: VirtualAddress) -> Option<VirtualAddress> {
        (self.ops.ppe_address)(va)
    }

    #[inline]
    #[must_use]
    pub fn pde_address(&self, va: VirtualAddress) -> VirtualAddress {
        (self.ops.pde_address)(va)
    }

    #[inline]
    #[must_use]
    pub fn pte_address(&self, va: VirtualAddress) -> VirtualAddress {
        (self.ops.pte_address)(va)
    }

    /// Entry of `level` for `va`; `None` when the scheme has no such level.
    #[must_use]
    pub fn entry_address(&self, level: PageTableLevel, va: VirtualAddress) -> Option<VirtualAddress> {
        match level {
            PageTableLevel::P5e => self.p5e_address(va),
            PageTableLevel::Pxe => self.pxe_address(va),
            PageTableLevel::Ppe => self.ppe_address(va),
            PageTableLevel::Pde => Some(self.pde_address(va)),
            PageTableLevel::Pte => Some(self.pte_address(va)),
        }
    }

    /// Address mapped by the entry at `entry` (inverse of the lookups above).
    #[inline]
    #[must_use]
    pub fn pte_virtual_address(&self, entry: VirtualAddress) -> VirtualAddress {
        (self.ops.pte_virtual_address)(entry)
    }

    #[inline]
    #[must_use]
    pub fn read_entry(&self, tables: &dyn TableMemory, entry: VirtualAddress) -> HardwarePte {
        (self.ops.read_entry)(tables, entry)
    }

    /// Stores `value` at `entry` in the scheme's entry width.
    ///
    /// # Errors
    /// [`MmError::EntryTooWide`] when a 4-byte scheme cannot hold `value`.
    #[inline]
    pub fn write_entry(
        &self,
        tables: &mut dyn TableMemory,
        entry: VirtualAddress,
        value: HardwarePte,
    ) -> Result<(), MmError> {
        (self.ops.write_entry)(tables, entry, value)
    }

    #[must_use]
    pub fn is_present(&self, tables: &dyn TableMemory, entry: VirtualAddress) -> bool {
        self.read_entry(tables, entry).valid()
    }

    /// Sets or clears the present bit of the entry at `entry`.
    ///
    /// # Errors
    /// See [`PageMap::write_entry`].
    pub fn set_present(
        &self,
        tables: &mut dyn TableMemory,
        entry: VirtualAddress,
        present: bool,
    ) -> Result<(), MmError> {
        let value = self.read_entry(tables, entry).with_valid(present);
        self.write_entry(tables, entry, value)
    }

    /// Applies `caching` to the entry at `entry`.
    ///
    /// # Errors
    /// See [`PageMap::write_entry`].
    pub fn set_caching(
        &self,
        tables: &mut dyn TableMemory,
        entry: VirtualAddress,
        caching: CachingType,
    ) -> Result<(), MmError> {
        let value = self.read_entry(tables, entry).with_caching(caching);
        self.write_entry(tables, entry, value)
    }
}

impl fmt::Debug for PageMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageMap")
            .field("variant", &self.ops.variant)
            .field("mode", &self.ops.mode)
            .finish()
    }
}

impl PartialEq for PageMap {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.ops, other.ops)
    }
}

impl Eq for PageMap {}

/// Picks the page map matching the paging mode CR4 reports.
///
/// Long mode always runs with PAE; a clear PAE bit on x86-64, or LA57 on
/// x86, means the probe cannot be trusted.
///
/// # Errors
/// [`MmError::AmbiguousPagingMode`] for the contradictory CR4 states above.
pub fn select_page_map(cr4: Cr4) -> Result<PageMap, MmError> {
    #[cfg(not(target_arch = "x86"))]
    if !cr4.pae() {
        return Err(MmError::AmbiguousPagingMode(cr4.into_bits()));
    }
    #[cfg(target_arch = "x86")]
    if cr4.la57() {
        return Err(MmError::AmbiguousPagingMode(cr4.into_bits()));
    }

    Ok(if cr4.extended_addressing() {
        PageMap::extended()
    } else {
        PageMap::basic()
    })
}

/// Probes CR4 once and returns the page map for the rest of execution.
///
/// # Errors
/// See [`select_page_map`].
pub fn initialize_page_map_support<P: Platform + ?Sized>(platform: &P) -> Result<PageMap, MmError> {
    let map = select_page_map(platform.read_cr4())?;
    info!("paging: {} ({:?} page map)", map.mode(), map.variant());
    Ok(map)
}

static BOUND_PAGE_MAP: BootOnceCell<PageMap> = BootOnceCell::new();

/// Publishes `map` as the system page map.
///
/// # Errors
/// [`MmError::PageMapAlreadyBound`] if a map was published before.
pub fn bind_page_map(map: PageMap) -> Result<&'static PageMap, MmError> {
    BOUND_PAGE_MAP.set(map).map_err(|_| MmError::PageMapAlreadyBound)
}

/// The published system page map.
#[must_use]
pub fn page_map() -> Option<&'static PageMap> {
    BOUND_PAGE_MAP.get()
}

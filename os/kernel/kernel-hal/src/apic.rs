//! # Local APIC bring-up
//!
//! Enables the current processor's local APIC so that the task priority (and
//! therefore the run level) takes effect. x2APIC mode is used when `cpuid`
//! advertises it; otherwise the xAPIC is software-enabled through its MMIO page,
//! which the loader leaves identity mapped.

use crate::Platform;
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::msr::{ApicBaseMsr, Msr};
use log::debug;

/// Vector delivered for spurious interrupts.
pub const SPURIOUS_VECTOR: u8 = 0xFF;

/// `CPUID.01H:ECX[21]`: x2APIC supported.
const CPUID_X2APIC: u32 = 1 << 21;

/// x2APIC spurious interrupt vector register.
const IA32_X2APIC_SVR: Msr = Msr(0x80F);

/// xAPIC spurious interrupt vector register offset.
const XAPIC_SVR_OFFSET: u64 = 0xF0;

/// SVR bit 8: APIC software enable.
const SVR_ENABLE: u32 = 1 << 8;

/// Register interface the local APIC was brought up in.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ApicMode {
    XApic,
    X2Apic,
}

/// Enables the local APIC of the executing processor and programs the
/// spurious vector.
pub fn initialize_local_apic<P: Platform + ?Sized>(platform: &P) -> ApicMode {
    let features = platform.cpuid(1);
    let x2apic = features.ecx & CPUID_X2APIC != 0;

    // SAFETY: IA32_APIC_BASE exists on every processor with a local APIC.
    let mut base = ApicBaseMsr::from_bits(unsafe { platform.read_msr(ApicBaseMsr::MSR) });
    base.set_global_enable(true);
    base.set_x2apic_enable(x2apic);

    // SAFETY: only the enable bits change; the MMIO base stays where firmware put it.
    unsafe { platform.write_msr(ApicBaseMsr::MSR, base.into_bits()) };

    let svr = SVR_ENABLE | u32::from(SPURIOUS_VECTOR);
    let mode = if x2apic {
        // SAFETY: x2APIC mode was just enabled.
        unsafe { platform.write_msr(IA32_X2APIC_SVR, u64::from(svr)) };
        ApicMode::X2Apic
    } else {
        let svr_address = VirtualAddress::new(base.base_address() + XAPIC_SVR_OFFSET);
        // SAFETY: the APIC register page is identity mapped during boot.
        unsafe { platform.write_mmio_u32(svr_address, svr) };
        ApicMode::XApic
    };

    debug!(
        "local APIC enabled in {mode:?} mode (BSP: {}, base {:#x})",
        base.bsp(),
        base.base_address()
    );
    mode
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuidResult;
    use crate::mock::{MockPlatform, PlatformEvent};

    #[test]
    fn x2apic_is_preferred_when_advertised() {
        let platform = MockPlatform::new()
            .with_msr(ApicBaseMsr::MSR, 0xFEE0_0100)
            .with_cpuid(1, CpuidResult { ecx: CPUID_X2APIC, ..CpuidResult::default() });

        assert_eq!(initialize_local_apic(&platform), ApicMode::X2Apic);
        let base = ApicBaseMsr::from_bits(platform.msr(ApicBaseMsr::MSR));
        assert!(base.global_enable());
        assert!(base.x2apic_enable());
        assert_eq!(platform.msr(IA32_X2APIC_SVR), 0x1FF);
    }

    #[test]
    fn xapic_svr_is_written_through_mmio() {
        let platform = MockPlatform::new().with_msr(ApicBaseMsr::MSR, 0xFEE0_0100);

        assert_eq!(initialize_local_apic(&platform), ApicMode::XApic);
        assert!(platform.events().contains(&PlatformEvent::WriteMmio(0xFEE0_00F0, 0x1FF)));
        assert!(!ApicBaseMsr::from_bits(platform.msr(ApicBaseMsr::MSR)).x2apic_enable());
    }
}

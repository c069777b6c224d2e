//! # Kernel initialization sequence
//!
//! The boot path from the loader handoff to the permanent kernel stack, as a
//! strictly forward state machine:
//!
//! ```text
//! VerifyAbiCompatibility ─▶ BindInitializationBlock ─▶ BootstrapProcessor
//!   ─▶ InitializeSystemResources ─▶ InitializeDebugIo ─▶ InitializeMachine
//!   ─▶ RaiseRunLevel ─▶ SwitchBootStack
//! ```
//!
//! Every state either completes or fails the whole sequence; a failure is
//! reported with its stop code and the processor halts. There is no retry.

use crate::arch::native::TrapTrampolines;
use crate::boot_info::{BootInformation, verify_abi_compatibility};
use crate::context::BootContext;
use crate::crash::{crash_system, register_crash_platform};
use crate::error::{BootInfoError, KernelFault};
use crate::processor::{bootstrap_processor, raise_run_level};
use kernel_debug::DebugPort;
use kernel_hal::{Platform, RunLevel, StackEntry};
use kernel_info::boot::KernelInitializationBlock;
use kernel_mm::{MemoryManager, TableMemory, bind_page_map, publish_memory_layout};
use log::{debug, info};

/// One step of the initialization sequence, in execution order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum InitState {
    VerifyAbiCompatibility,
    BindInitializationBlock,
    BootstrapProcessor,
    InitializeSystemResources,
    InitializeDebugIo,
    InitializeMachine,
    RaiseRunLevel,
    SwitchBootStack,
}

impl InitState {
    pub const FIRST: Self = Self::VerifyAbiCompatibility;

    /// The state after `self`; `None` after the stack switch.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        Some(match self {
            Self::VerifyAbiCompatibility => Self::BindInitializationBlock,
            Self::BindInitializationBlock => Self::BootstrapProcessor,
            Self::BootstrapProcessor => Self::InitializeSystemResources,
            Self::InitializeSystemResources => Self::InitializeDebugIo,
            Self::InitializeDebugIo => Self::InitializeMachine,
            Self::InitializeMachine => Self::RaiseRunLevel,
            Self::RaiseRunLevel => Self::SwitchBootStack,
            Self::SwitchBootStack => return None,
        })
    }
}

/// Build-dependent choices of the sequence.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StartOptions {
    /// Run [`InitState::InitializeDebugIo`]; skipped otherwise.
    pub debug_io: bool,
    /// Debug port used when the command line names none.
    pub default_debug_port: Option<DebugPort>,
}

/// The running initialization sequence of the boot processor.
pub struct KernelInitSequence<'t, P: Platform + 'static> {
    platform: &'static P,
    context: &'static mut BootContext,
    block: *const KernelInitializationBlock,
    tables: &'t mut dyn TableMemory,
    options: StartOptions,
    trampolines: TrapTrampolines,
    state: InitState,
}

impl<'t, P: Platform + 'static> KernelInitSequence<'t, P> {
    pub fn new(
        platform: &'static P,
        context: &'static mut BootContext,
        block: *const KernelInitializationBlock,
        tables: &'t mut dyn TableMemory,
        options: StartOptions,
        trampolines: TrapTrampolines,
    ) -> Self {
        Self {
            platform,
            context,
            block,
            tables,
            options,
            trampolines,
            state: InitState::FIRST,
        }
    }

    /// The state that runs next.
    #[must_use]
    pub const fn state(&self) -> InitState {
        self.state
    }

    #[must_use]
    pub fn context(&self) -> &BootContext {
        self.context
    }

    /// Runs every state up to, not including, the stack switch.
    ///
    /// # Errors
    /// The first failing state's fault; later states do not run.
    ///
    /// # Safety
    /// `block` must be null or point at a loader block whose header is
    /// readable; see [`verify_abi_compatibility`] and
    /// [`BootInformation::from_block`]. The tables handed in must be the live
    /// ones for the platform.
    pub unsafe fn run_to_handoff(&mut self) -> Result<(), KernelFault> {
        while self.state != InitState::SwitchBootStack {
            debug!("init: {:?}", self.state);
            // SAFETY: forwarded from the caller.
            unsafe { self.step()? };
            if let Some(next) = self.state.next() {
                self.state = next;
            }
        }
        Ok(())
    }

    /// # Safety
    /// See [`KernelInitSequence::run_to_handoff`].
    unsafe fn step(&mut self) -> Result<(), KernelFault> {
        let platform = self.platform;
        match self.state {
            InitState::VerifyAbiCompatibility => {
                // SAFETY: the caller guarantees the header is readable.
                unsafe { verify_abi_compatibility(self.block)? };
            }
            InitState::BindInitializationBlock => {
                // SAFETY: the header was verified in the previous state.
                let info = unsafe { BootInformation::from_block(self.block)? };
                self.context.bind_boot_information(info)?;
            }
            InitState::BootstrapProcessor => {
                let context = &mut *self.context;
                // SAFETY: the boot processor's storage lives in the static
                // context and belongs to this processor.
                unsafe {
                    bootstrap_processor(
                        platform,
                        &mut context.processor,
                        &context.active_processors,
                        &self.trampolines,
                    )?;
                }
            }
            InitState::InitializeSystemResources => self.context.resources.initialize(),
            InitState::InitializeDebugIo => {
                if self.options.debug_io {
                    let info = self.boot_information()?;
                    let config = info.debug_config(self.options.default_debug_port);
                    kernel_debug::initialize_debug_io(platform, &config, info.debug_print);
                }
            }
            InitState::InitializeMachine => {
                let descriptors = self.boot_information()?.memory_descriptors;
                let manager = self.context.set_memory_manager(MemoryManager::initialize(platform, descriptors)?);
                bind_page_map(manager.page_map())?;
                manager.initialize_page_tables(self.tables)?;
                publish_memory_layout(*manager.memory_layout())?;
            }
            InitState::RaiseRunLevel => {
                raise_run_level(platform, &self.context.processor.block, RunLevel::HIGH)?;
            }
            InitState::SwitchBootStack => {}
        }
        Ok(())
    }

    fn boot_information(&self) -> Result<BootInformation, KernelFault> {
        self.context
            .boot_information()
            .copied()
            .ok_or(KernelFault::BootInfo(BootInfoError::NotBound))
    }

    /// Leaves the loader's stack for the permanent kernel stack and enters
    /// `entry` with the address of the boot context.
    ///
    /// # Safety
    /// [`KernelInitSequence::run_to_handoff`] must have succeeded, and nothing
    /// on the current stack may be used afterwards.
    pub unsafe fn switch_boot_stack(self, entry: StackEntry) -> ! {
        let platform = self.platform;
        let stack_top = self.context.processor.kernel_stack_top();
        let argument = core::ptr::from_mut(self.context).expose_provenance();
        info!("switching to the kernel boot stack at {stack_top:#x}");
        // SAFETY: the stack is static, 16-byte aligned, and unused so far;
        // interrupts are masked at HIGH.
        unsafe { platform.switch_stack(stack_top, entry, argument) }
    }
}

/// Kernel entry after the loader: runs the initialization sequence and
/// continues in `entry` on the kernel boot stack. Halts on any failure.
///
/// # Safety
/// Called once, on the boot processor, with the loader's block pointer and
/// the live page tables. See [`KernelInitSequence::run_to_handoff`].
pub unsafe fn start_xt_system<P: Platform + 'static>(
    platform: &'static P,
    context: &'static mut BootContext,
    block: *const KernelInitializationBlock,
    tables: &mut dyn TableMemory,
    options: StartOptions,
    trampolines: TrapTrampolines,
    entry: StackEntry,
) -> ! {
    register_crash_platform(platform);

    let mut sequence = KernelInitSequence::new(platform, context, block, tables, options, trampolines);
    // SAFETY: forwarded from the caller.
    match unsafe { sequence.run_to_handoff() } {
        // SAFETY: every state before the switch completed.
        Ok(()) => unsafe { sequence.switch_boot_stack(entry) },
        Err(fault) => crash_system(
            platform,
            fault.bugcheck_code(),
            format_args!("{:?} failed: {fault}", sequence.state()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_run_forward_once() {
        let mut state = InitState::FIRST;
        let mut order = vec![state];
        while let Some(next) = state.next() {
            assert!(next > state);
            order.push(next);
            state = next;
        }
        assert_eq!(order.len(), 8);
        assert_eq!(order.last(), Some(&InitState::SwitchBootStack));
    }
}

use crate::boot_info::BootInformation;
use crate::error::BootInfoError;
use crate::processor::{ProcessorSet, ProcessorStorage};
use crate::resources::ResourceList;
use kernel_mm::MemoryManager;

/// Boot processor number.
pub const BOOT_PROCESSOR: u32 = 0;

/// All state the initialization sequence produces, threaded through it
/// explicitly. The kernel keeps exactly one, in a static, and hands it to the
/// next stage across the boot stack switch.
pub struct BootContext {
    /// The boot processor's block, tables, and stacks.
    pub processor: ProcessorStorage,
    pub active_processors: ProcessorSet,
    pub resources: ResourceList,
    boot_information: Option<BootInformation>,
    memory_manager: Option<MemoryManager>,
}

impl Default for BootContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BootContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            processor: ProcessorStorage::new(BOOT_PROCESSOR),
            active_processors: ProcessorSet::new(),
            resources: ResourceList::new(),
            boot_information: None,
            memory_manager: None,
        }
    }

    /// Stores the loader's handoff.
    ///
    /// # Errors
    /// [`BootInfoError::AlreadyBound`] on a second call.
    pub fn bind_boot_information(&mut self, info: BootInformation) -> Result<&BootInformation, BootInfoError> {
        if self.boot_information.is_some() {
            return Err(BootInfoError::AlreadyBound);
        }
        Ok(self.boot_information.insert(info))
    }

    #[must_use]
    pub const fn boot_information(&self) -> Option<&BootInformation> {
        self.boot_information.as_ref()
    }

    pub(crate) fn set_memory_manager(&mut self, manager: MemoryManager) -> &mut MemoryManager {
        self.memory_manager.insert(manager)
    }

    #[must_use]
    pub const fn memory_manager(&self) -> Option<&MemoryManager> {
        self.memory_manager.as_ref()
    }

    pub const fn memory_manager_mut(&mut self) -> Option<&mut MemoryManager> {
        self.memory_manager.as_mut()
    }

    /// Recovers the context from the argument the next stage received.
    ///
    /// # Safety
    /// `argument` must be the value the init sequence passed across the stack
    /// switch, and nothing else may hold a reference to the context.
    #[must_use]
    pub unsafe fn from_handoff(argument: usize) -> &'static mut Self {
        // SAFETY: the address was exposed by the init sequence and the
        // context is static.
        unsafe { &mut *core::ptr::with_exposed_provenance_mut(argument) }
    }
}

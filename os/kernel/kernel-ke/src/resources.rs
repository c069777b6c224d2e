//! # System resources
//!
//! Firmware-described resources (ACPI tables, the boot frame buffer) that
//! drivers claim later in boot. The init sequence only sets up the empty
//! list; loaders and early drivers register entries, consumers acquire them
//! exclusively and release them again.

use crate::error::ResourceError;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::SpinLock;
use log::debug;

/// Entries the list holds.
pub const MAX_SYSTEM_RESOURCES: usize = 16;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SystemResourceType {
    AcpiTable,
    FrameBuffer,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SystemResource {
    pub resource_type: SystemResourceType,
    pub physical_address: PhysicalAddress,
    pub size: u64,
    acquired: bool,
}

impl SystemResource {
    #[must_use]
    pub const fn new(resource_type: SystemResourceType, physical_address: PhysicalAddress, size: u64) -> Self {
        Self {
            resource_type,
            physical_address,
            size,
            acquired: false,
        }
    }

    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        self.acquired
    }
}

/// The lock-protected list of boot resources.
pub struct ResourceList {
    entries: SpinLock<heapless::Vec<SystemResource, MAX_SYSTEM_RESOURCES>>,
    initialized: AtomicBool,
}

impl Default for ResourceList {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: SpinLock::new(heapless::Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Empties the list and makes it usable.
    pub fn initialize(&self) {
        self.entries.with_lock(heapless::Vec::clear);
        self.initialized.store(true, Ordering::Release);
        debug!("system resource list ready ({MAX_SYSTEM_RESOURCES} entries)");
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Appends `resource`.
    ///
    /// # Errors
    /// [`ResourceError::NotInitialized`] before [`ResourceList::initialize`],
    /// [`ResourceError::ListFull`] past [`MAX_SYSTEM_RESOURCES`].
    pub fn register_resource(&self, resource: SystemResource) -> Result<(), ResourceError> {
        self.ensure_initialized()?;
        self.entries
            .with_lock(|entries| entries.push(resource))
            .map_err(|_| ResourceError::ListFull)
    }

    /// The first resource of `resource_type`, acquired or not.
    #[must_use]
    pub fn find_resource(&self, resource_type: SystemResourceType) -> Option<SystemResource> {
        if !self.is_initialized() {
            return None;
        }
        self.entries.with_lock(|entries| {
            entries
                .iter()
                .find(|entry| entry.resource_type == resource_type)
                .copied()
        })
    }

    /// Claims the first free resource of `resource_type`.
    ///
    /// # Errors
    /// [`ResourceError::NotInitialized`], or [`ResourceError::NotFound`] if
    /// every such resource is taken or none was registered.
    pub fn acquire_resource(&self, resource_type: SystemResourceType) -> Result<SystemResource, ResourceError> {
        self.ensure_initialized()?;
        self.entries.with_lock(|entries| {
            let entry = entries
                .iter_mut()
                .find(|entry| entry.resource_type == resource_type && !entry.acquired)
                .ok_or(ResourceError::NotFound)?;
            entry.acquired = true;
            Ok(*entry)
        })
    }

    /// Returns a resource taken with [`ResourceList::acquire_resource`].
    ///
    /// # Errors
    /// [`ResourceError::NotInitialized`], or [`ResourceError::NotFound`] if
    /// no acquired entry matches.
    pub fn release_resource(&self, resource: &SystemResource) -> Result<(), ResourceError> {
        self.ensure_initialized()?;
        self.entries.with_lock(|entries| {
            let entry = entries
                .iter_mut()
                .find(|entry| {
                    entry.acquired
                        && entry.resource_type == resource.resource_type
                        && entry.physical_address == resource.physical_address
                })
                .ok_or(ResourceError::NotFound)?;
            entry.acquired = false;
            Ok(())
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.with_lock(|entries| entries.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_initialized(&self) -> Result<(), ResourceError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ResourceError::NotInitialized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acpi(address: u64) -> SystemResource {
        SystemResource::new(SystemResourceType::AcpiTable, PhysicalAddress::new(address), 0x24)
    }

    #[test]
    fn unusable_before_initialization() {
        let list = ResourceList::new();
        assert_eq!(list.register_resource(acpi(0xE0000)), Err(ResourceError::NotInitialized));
        assert_eq!(list.find_resource(SystemResourceType::AcpiTable), None);
        list.initialize();
        assert!(list.is_empty());
        list.register_resource(acpi(0xE0000)).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn bounded() {
        let list = ResourceList::new();
        list.initialize();
        for i in 0..MAX_SYSTEM_RESOURCES as u64 {
            list.register_resource(acpi(0x1000 * i)).unwrap();
        }
        assert_eq!(list.register_resource(acpi(0)), Err(ResourceError::ListFull));
    }

    #[test]
    fn acquisition_is_exclusive() {
        let list = ResourceList::new();
        list.initialize();
        let fb = SystemResource::new(SystemResourceType::FrameBuffer, PhysicalAddress::new(0x8000_0000), 0x30_0000);
        list.register_resource(fb).unwrap();

        let taken = list.acquire_resource(SystemResourceType::FrameBuffer).unwrap();
        assert!(taken.is_acquired());
        assert_eq!(
            list.acquire_resource(SystemResourceType::FrameBuffer),
            Err(ResourceError::NotFound)
        );
        assert_eq!(
            list.acquire_resource(SystemResourceType::AcpiTable),
            Err(ResourceError::NotFound)
        );

        list.release_resource(&taken).unwrap();
        assert_eq!(list.release_resource(&taken), Err(ResourceError::NotFound));
        assert!(list.acquire_resource(SystemResourceType::FrameBuffer).is_ok());
    }
}

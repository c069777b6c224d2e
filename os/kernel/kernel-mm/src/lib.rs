//! # Boot-Time Memory Manager
//!
//! Everything the kernel needs to know about memory before it has an
//! allocator: which paging scheme the processor runs, what physical memory
//! the loader reported, where the kernel's regions live in the virtual
//! address space, and how to install the first paging structures for them.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`paging`] | 2-, 3-, 4-, and 5-level self-map arithmetic and the bound [`PageMap`]. |
//! | [`pte`] | The hardware entry format shared by all schemes. |
//! | [`table`] | Loads and stores of entries ([`TableMemory`]). |
//! | [`pfn`] | Scanning the loader memory map and the bootstrap page allocator. |
//! | [`colors`] | Per-color free/zeroed page lists. |
//! | [`layout`] | The kernel virtual address space per paging mode. |
//! | [`map`] | Pre-populating upper table levels from bootstrap pages. |
//!
//! [`MemoryManager`] ties them together in boot order:
//!
//! ```text
//! initialize_page_map_support ─▶ scan_memory_descriptors ─▶ minimum check
//!        ─▶ compute_page_coloring ─▶ MemoryLayout::compute ─▶ initialize_page_tables
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "mock"))]
extern crate std;

pub mod colors;
mod error;
pub mod layout;
mod manager;
pub mod map;
pub mod paging;
pub mod pfn;
pub mod pte;
pub mod table;

pub use error::{BootstrapAllocError, MmError};
pub use layout::{MemoryLayout, memory_layout, publish_memory_layout};
pub use manager::{HYPER_SPACE_PAGES, INITIAL_NON_PAGED_POOL_PAGES, MemoryManager};
pub use paging::{
    PageMap, PageMapVariant, PageTableLevel, PagingMode, bind_page_map, initialize_page_map_support, page_map,
};
pub use table::TableMemory;

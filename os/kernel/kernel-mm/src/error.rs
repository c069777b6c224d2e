use thiserror::Error;

/// Failure of the bootstrap page allocator.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum BootstrapAllocError {
    #[error("the loader reported no free memory")]
    NoFreeDescriptor,
    #[error("requested {requested} bootstrap pages, {remaining} left")]
    Exhausted { requested: u64, remaining: u64 },
    #[error("zero-page bootstrap allocation")]
    ZeroPages,
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum MmError {
    #[error("CR4 {0:#x} does not describe a usable paging mode")]
    AmbiguousPagingMode(u64),
    #[error("{available} physical pages available, at least {required} required")]
    InsufficientMemory { available: u64, required: u64 },
    #[error("bootstrap allocation failed: {0}")]
    Bootstrap(#[from] BootstrapAllocError),
    #[error("page table entry {0:#x} does not fit a 4-byte entry")]
    EntryTooWide(u64),
    #[error("a page map is already bound")]
    PageMapAlreadyBound,
    #[error("a {pages}-page PFN database does not fit below the non-paged pool end")]
    PfnDatabaseTooLarge { pages: u64 },
    #[error("the memory layout was already published")]
    LayoutAlreadyPublished,
}

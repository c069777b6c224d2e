//! The system page map and memory layout are published exactly once.

use kernel_memory_addresses::VirtualAddress;
use kernel_mm::{MemoryLayout, MmError, PageMap, PageMapVariant, PagingMode};

#[test]
fn page_map_binding_is_exclusive() {
    assert!(kernel_mm::page_map().is_none());

    let bound = kernel_mm::bind_page_map(PageMap::extended()).unwrap();
    assert_eq!(bound.variant(), PageMapVariant::Extended);
    assert_eq!(
        kernel_mm::bind_page_map(PageMap::basic()).unwrap_err(),
        MmError::PageMapAlreadyBound
    );

    let va = VirtualAddress::new(0x1000);
    for _ in 0..4 {
        let current = kernel_mm::page_map().unwrap();
        assert_eq!(*current, PageMap::extended());
        assert_eq!(current.pte_address(va), PageMap::extended().pte_address(va));
    }
}

#[test]
fn layout_is_published_once() {
    let layout = MemoryLayout::compute(PagingMode::FourLevel, 0x40).unwrap();
    assert_eq!(kernel_mm::publish_memory_layout(layout).unwrap(), &layout);
    assert_eq!(kernel_mm::memory_layout(), Some(&layout));

    let other = MemoryLayout::compute(PagingMode::FourLevel, 0x80).unwrap();
    assert_eq!(
        kernel_mm::publish_memory_layout(other).unwrap_err(),
        MmError::LayoutAlreadyPublished
    );
    assert_eq!(kernel_mm::memory_layout(), Some(&layout));
}

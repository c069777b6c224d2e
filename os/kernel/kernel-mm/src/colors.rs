//! # Page coloring
//!
//! Free and zeroed pages are kept on one list per cache color so that
//! consecutive allocations spread over the cache instead of piling onto the
//! same sets. The color count is a power of two; a page's color is its frame
//! number masked with [`PageColoring::paging_colors_mask`].

use kernel_memory_addresses::PageFrameNumber;
use log::debug;

/// Default (and maximum) number of page colors.
pub const PAGING_COLORS: usize = 64;

const _: () = assert!(PAGING_COLORS.is_power_of_two());

/// Which per-color list family a page sits on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageListType {
    Zeroed = 0,
    Free = 1,
}

/// Head of one colored page list.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ColoredPageList {
    pub first: Option<PageFrameNumber>,
    pub last: Option<PageFrameNumber>,
    pub count: u64,
}

#[derive(Clone, Debug)]
pub struct PageColoring {
    colors: usize,
    next_color: usize,
    lists: [[ColoredPageList; PAGING_COLORS]; 2],
}

impl Default for PageColoring {
    fn default() -> Self {
        Self::new()
    }
}

impl PageColoring {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            colors: PAGING_COLORS,
            next_color: 0,
            lists: [[ColoredPageList {
                first: None,
                last: None,
                count: 0,
            }; PAGING_COLORS]; 2],
        }
    }

    /// Sets up the color count and empties every list.
    pub fn compute_page_coloring(&mut self) {
        *self = Self::new();
        debug!("page coloring: {} colors", self.colors);
    }

    #[must_use]
    pub const fn paging_colors(&self) -> usize {
        self.colors
    }

    #[must_use]
    pub const fn paging_colors_mask(&self) -> usize {
        self.colors - 1
    }

    /// Color of the page at `pfn`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn page_color(&self, pfn: PageFrameNumber) -> usize {
        (pfn.as_u64() as usize) & self.paging_colors_mask()
    }

    /// Advances the round-robin cursor and returns the new color.
    pub fn get_next_color(&mut self) -> usize {
        self.next_color = (self.next_color + 1) & self.paging_colors_mask();
        self.next_color
    }

    /// The `list` head for `color`; the color wraps at the color count.
    #[must_use]
    pub fn get_free_pages(&self, list: PageListType, color: usize) -> &ColoredPageList {
        &self.lists[list as usize][color & self.paging_colors_mask()]
    }

    pub fn get_free_pages_mut(&mut self, list: PageListType, color: usize) -> &mut ColoredPageList {
        let mask = self.paging_colors_mask();
        &mut self.lists[list as usize][color & mask]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_color_cycles_every_color_once() {
        let mut coloring = PageColoring::new();
        coloring.compute_page_coloring();
        let mut seen = [false; PAGING_COLORS];
        for _ in 0..coloring.paging_colors() {
            let color = coloring.get_next_color();
            assert!(!seen[color], "color {color} repeated");
            seen[color] = true;
        }
        assert!(seen.iter().all(|s| *s));
        assert_eq!(coloring.get_next_color(), 1);
    }

    #[test]
    fn color_lookups_wrap() {
        let mut coloring = PageColoring::new();
        coloring.get_free_pages_mut(PageListType::Free, 3).count = 5;
        assert_eq!(coloring.get_free_pages(PageListType::Free, 3 + PAGING_COLORS).count, 5);
        assert_eq!(coloring.get_free_pages(PageListType::Zeroed, 3).count, 0);
        assert_eq!(coloring.page_color(PageFrameNumber::new(0x1_0043)), 3);

        coloring.compute_page_coloring();
        assert_eq!(coloring.get_free_pages(PageListType::Free, 3), &ColoredPageList::default());
    }
}

//! The single-entry page cache.
//!
//! Opening a NAND page is expensive relative to reading a sector inside it, and most
//! operations touch more than one sector of the same page (a sector's spare plus its data,
//! or two halves of an inode entry pair). [`PageCache`] remembers which page is currently
//! open so repeated `open_sector` calls against the same page are a no-op.

use crate::flash::FlashDriver;
use crate::geometry::Geometry;

/// Tracks which `(block, page)` is currently open on the underlying [`FlashDriver`].
#[derive(Default)]
pub struct PageCache {
    open: Option<(u32, u16)>,
}

impl PageCache {
    pub const fn new() -> Self {
        Self { open: None }
    }

    /// Opens the page containing `sector` of `block`, unless it is already open.
    ///
    /// Returns whether the page could be opened (mirrors [`FlashDriver::open_page`]).
    pub fn open_sector<F: FlashDriver>(
        &mut self,
        flash: &mut F,
        geometry: &Geometry,
        block: u32,
        sector: u32,
    ) -> bool {
        let page = geometry.sector_to_page(sector);
        if self.open == Some((block, page)) {
            return true;
        }
        let ok = flash.open_page(block, page);
        self.open = if ok { Some((block, page)) } else { None };
        ok
    }

    /// Invalidates the cache, e.g. after a write commit or an erase.
    pub fn invalidate<F: FlashDriver>(&mut self, flash: &mut F) {
        flash.close_page();
        self.open = None;
    }
}

//! An in-memory [`crate::flash::FlashDriver`], used by this crate's own test suite and
//! available to downstream users (under the `sim` feature) who want to drive `flogfs`
//! against a simulated part before bringing up real hardware.
//!
//! [`RamFlash`] models the constraints SPEC_FULL.md §1 cares about: programming a byte
//! clears bits and can never set them back until the enclosing block is erased (enforced
//! here as a bitwise AND, exactly as real NAND behaves), a page must be open before any
//! sector within it is touched, and blocks can be marked bad up front. [`RamFlash::crash_after`]
//! additionally supports the power-loss scenarios of SPEC_FULL.md §8: once the configured
//! number of durable operations (a `commit()` or an `erase_block()`, whichever the medium
//! would have been busy with) has elapsed, every later commit's staged writes are silently
//! dropped and every later erase is a no-op, the way power loss mid-operation would leave
//! that operation's target exactly as it was before the call.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::flash::{FlashDriver, Spare};
use crate::geometry::Geometry;

#[derive(Clone)]
struct RawPage {
    data: Vec<u8>,
    spares: Vec<Spare>,
}

impl RawPage {
    fn erased(sectors_per_page: u16, sector_size: u16) -> Self {
        Self {
            data: vec![0xFFu8; sectors_per_page as usize * sector_size as usize],
            spares: vec![[0xFFu8; 16]; sectors_per_page as usize],
        }
    }
}

/// A pending program operation against the currently open page, not yet durable.
enum Staged {
    Data { sector: u32, offset: u16, bytes: Vec<u8> },
    Spare { sector: u32, bytes: Spare },
}

/// A RAM-backed [`FlashDriver`] simulator.
pub struct RamFlash {
    geometry: Geometry,
    pages: Vec<RawPage>,
    bad: Vec<bool>,
    open: Option<(u32, u16)>,
    staged: Vec<Staged>,
    /// Number of durable operations (commits or erases) still allowed to take effect;
    /// `None` means unlimited.
    ops_remaining: Option<u32>,
    /// Set once the operation budget is exhausted; every later commit/erase is a no-op.
    tripped: bool,
    log: Vec<String>,
}

impl RamFlash {
    /// Creates a fully erased simulated part of the given geometry.
    pub fn new(geometry: Geometry) -> Self {
        let num_pages = geometry.num_blocks as usize * geometry.pages_per_block as usize;
        Self {
            pages: vec![RawPage::erased(geometry.sectors_per_page, geometry.sector_size); num_pages],
            bad: vec![false; geometry.num_blocks as usize],
            geometry,
            open: None,
            staged: Vec::new(),
            ops_remaining: None,
            tripped: false,
            log: Vec::new(),
        }
    }

    /// Marks `block` as a manufacturer/runtime bad block; [`FlashDriver::open_page`] will
    /// always fail against it from now on.
    pub fn mark_bad(&mut self, block: u32) {
        self.bad[block as usize] = true;
    }

    /// Arranges for power loss after the next `n` durable operations (each `commit()` or
    /// `erase_block()` counts as one): the `n`-th one still takes effect, and every one after
    /// it is silently dropped, simulating a crash exactly between two flash operations
    /// (SPEC_FULL.md §8, scenarios 3–4).
    pub fn crash_after(&mut self, n: u32) {
        self.ops_remaining = Some(n);
        self.tripped = false;
    }

    /// Debug/warning messages the driver has been asked to report, most recent last.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Reads the wear-leveling age stamped at the front of `block`'s sector-0 header,
    /// bypassing the `FlashDriver` page-open protocol entirely. Every block header (inode
    /// or file) leads with its `age: u32`, so this works uniformly across both. Test-only
    /// introspection, not something a real driver needs to expose.
    pub fn block_age_peek(&self, block: u32) -> u32 {
        let idx = self.page_index(block, 0);
        u32::from_ne_bytes(self.pages[idx].data[0..4].try_into().unwrap())
    }

    fn page_index(&self, block: u32, page: u16) -> usize {
        block as usize * self.geometry.pages_per_block as usize + page as usize
    }

    /// Returns whether the caller's operation should actually take effect, advancing the
    /// crash countdown. Once tripped, stays tripped for every later operation.
    fn consume_op(&mut self) -> bool {
        if self.tripped {
            return false;
        }
        match self.ops_remaining {
            None => true,
            Some(0) => {
                self.tripped = true;
                false
            }
            Some(n) => {
                self.ops_remaining = Some(n - 1);
                true
            }
        }
    }
}

impl FlashDriver for RamFlash {
    type Error = SimError;

    fn init(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn lock(&mut self) {}

    fn unlock(&mut self) {}

    fn open_page(&mut self, block: u32, page: u16) -> bool {
        if block >= self.geometry.num_blocks || self.bad[block as usize] {
            return false;
        }
        self.staged.clear();
        self.open = Some((block, page));
        true
    }

    fn close_page(&mut self) {
        self.staged.clear();
        self.open = None;
    }

    fn read_sector(
        &mut self,
        dst: &mut [u8],
        sector: u32,
        offset: u16,
        len: u16,
    ) -> Result<(), Self::Error> {
        let (block, page) = self.open.ok_or(SimError::NoPageOpen)?;
        if self.geometry.sector_to_page(sector) != page {
            return Err(SimError::WrongPage);
        }
        let local_sector = sector % self.geometry.sectors_per_page as u32;
        let base = local_sector as usize * self.geometry.sector_size as usize + offset as usize;
        let idx = self.page_index(block, page);
        dst.copy_from_slice(&self.pages[idx].data[base..base + len as usize]);
        Ok(())
    }

    fn read_spare(&mut self, dst: &mut Spare, sector: u32) -> Result<(), Self::Error> {
        let (block, page) = self.open.ok_or(SimError::NoPageOpen)?;
        if self.geometry.sector_to_page(sector) != page {
            return Err(SimError::WrongPage);
        }
        let local_sector = (sector % self.geometry.sectors_per_page as u32) as usize;
        let idx = self.page_index(block, page);
        *dst = self.pages[idx].spares[local_sector];
        Ok(())
    }

    fn write_sector(
        &mut self,
        src: &[u8],
        sector: u32,
        offset: u16,
        len: u16,
    ) -> Result<(), Self::Error> {
        let (_, page) = self.open.ok_or(SimError::NoPageOpen)?;
        if self.geometry.sector_to_page(sector) != page {
            return Err(SimError::WrongPage);
        }
        self.staged.push(Staged::Data {
            sector,
            offset,
            bytes: src[..len as usize].to_vec(),
        });
        Ok(())
    }

    fn write_spare(&mut self, src: &Spare, sector: u32) -> Result<(), Self::Error> {
        let (_, page) = self.open.ok_or(SimError::NoPageOpen)?;
        if self.geometry.sector_to_page(sector) != page {
            return Err(SimError::WrongPage);
        }
        self.staged.push(Staged::Spare {
            sector,
            bytes: *src,
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        let (block, page) = self.open.ok_or(SimError::NoPageOpen)?;

        if !self.consume_op() {
            self.staged.clear();
            return Ok(());
        }

        let idx = self.page_index(block, page);
        for op in self.staged.drain(..) {
            match op {
                Staged::Data { sector, offset, bytes } => {
                    let local_sector = (sector % self.geometry.sectors_per_page as u32) as usize;
                    let base = local_sector * self.geometry.sector_size as usize + offset as usize;
                    let slice = &mut self.pages[idx].data[base..base + bytes.len()];
                    for (dst, src) in slice.iter_mut().zip(bytes.iter()) {
                        *dst &= *src;
                    }
                }
                Staged::Spare { sector, bytes } => {
                    let local_sector = (sector % self.geometry.sectors_per_page as u32) as usize;
                    let spare = &mut self.pages[idx].spares[local_sector];
                    for (dst, src) in spare.iter_mut().zip(bytes.iter()) {
                        *dst &= *src;
                    }
                }
            }
        }
        Ok(())
    }

    fn erase_block(&mut self, block: u32) -> Result<(), Self::Error> {
        if block >= self.geometry.num_blocks {
            return Err(SimError::OutOfRange);
        }
        if self.bad[block as usize] {
            return Err(SimError::BadBlock);
        }
        if !self.consume_op() {
            return Ok(());
        }
        for page in 0..self.geometry.pages_per_block {
            let idx = self.page_index(block, page);
            self.pages[idx] = RawPage::erased(self.geometry.sectors_per_page, self.geometry.sector_size);
        }
        Ok(())
    }

    fn block_is_bad(&mut self, block: u32) -> bool {
        self.bad.get(block as usize).copied().unwrap_or(true)
    }

    fn debug_warn(&mut self, msg: &str) {
        self.log.push(format!("warn: {msg}"));
    }

    fn debug_error(&mut self, msg: &str) {
        self.log.push(format!("error: {msg}"));
    }
}

/// Failure modes [`RamFlash`] itself can report (distinct from bugs in `flogfs` proper).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// A sector operation was attempted with no page open.
    NoPageOpen,
    /// A sector operation targeted a sector outside the currently open page.
    WrongPage,
    /// A block index was out of range for this part's geometry.
    OutOfRange,
    /// An erase was attempted against a block marked bad.
    BadBlock,
}

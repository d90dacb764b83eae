//! Format: erases the medium and lays down a fresh `inode0`.
//!
//! Per SPEC_FULL.md §4.8, every non-bad block is erased and left `UNALLOCATED`; only block 0
//! is then given a body, becoming the chain's head inode block at age 0, inode index 0.

use crate::cache::PageCache;
use crate::error::{Error, Result};
use crate::flash::FlashDriver;
use crate::geometry::Geometry;
use crate::inode;

/// Erases every non-bad block and writes `inode0` at block 0.
pub fn run<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
) -> Result<(), F::Error> {
    for block in 0..geometry.num_blocks {
        if flash.block_is_bad(block) {
            continue;
        }
        cache.invalidate(flash);
        flash.erase_block(block).map_err(Error::Flash)?;
        cache.invalidate(flash);
    }

    if flash.block_is_bad(0) {
        flash.debug_error("block 0 is bad; cannot host inode0");
        return Err(Error::BadBlock);
    }
    inode::init_block(flash, geometry, cache, 0, 0, 0)?;
    Ok(())
}

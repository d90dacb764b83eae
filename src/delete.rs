//! `rm`: invalidate a file's inode entry, then reclaim its chain.
//!
//! SPEC_FULL.md §4.7's three steps (mark the chain's tail, mark the inode, erase the chain)
//! are ordered so the operation is idempotent and crash-safe: a crash before step 2 leaves the
//! file fully live, and a crash after step 2 is exactly the condition [`crate::mount`]'s
//! deletion-recovery pass repairs.

use crate::alloc_block::Allocator;
use crate::cache::PageCache;
use crate::error::{Error, Result};
use crate::file;
use crate::flash::FlashDriver;
use crate::geometry::Geometry;
use crate::inode;
use crate::records::{
    FileInvalidationRecord, InodeInvalidationRecord, BLOCK_IDX_INVALID,
};

/// Deletes the file whose inode allocation record lives at `(inode_block, inode_sector)` and
/// whose chain begins at `first_block`.
pub fn run<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    allocator: &mut Allocator,
    t: &mut u32,
    inode_block: u32,
    inode_sector: u32,
    first_block: u32,
) -> Result<(), F::Error> {
    let last_block = file::write::find_tail(flash, geometry, cache, first_block)?;

    file::write_invalidation(
        flash,
        geometry,
        cache,
        last_block,
        &FileInvalidationRecord { timestamp: *t },
    )?;

    inode::write_invalidation(
        flash,
        geometry,
        cache,
        inode_block,
        inode_sector,
        &InodeInvalidationRecord {
            last_block,
            timestamp: *t,
        },
    )?;
    *t += 1;

    let mut block = first_block;
    loop {
        let header = file::read_header(flash, geometry, cache, block)?;
        let age = header.age;
        let tail = file::read_tail(flash, geometry, cache, block)?;
        let next = tail.next_block;

        cache.invalidate(flash);
        flash.erase_block(block).map_err(Error::Flash)?;
        cache.invalidate(flash);
        allocator.mark_free(block, age);

        if block == last_block || next == BLOCK_IDX_INVALID {
            break;
        }
        block = next;
    }

    Ok(())
}

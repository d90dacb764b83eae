//! The append-only file write state machine.
//!
//! A [`WriteFile`] cursor is owned entirely by the caller; `flogfs` tracks no open-file list
//! of its own (see `DESIGN.md`). Extending a file across a block boundary follows the
//! tail-first sequence of SPEC_FULL.md §4.5: the predecessor's tail sector names the
//! successor before the successor's own header is written, so a crash between those two
//! steps leaves a repairable pending allocation, never a dangling reference, for mount's
//! allocation recovery to finish.

use crate::alloc_block::Allocator;
use crate::cache::PageCache;
use crate::error::Result;
use crate::flash::FlashDriver;
use crate::geometry::Geometry;
use crate::records::FileTailSector;

use super::{
    finalize_sector, init_block, next_data_sector, read_tail, sector_capacity, write_sector_bytes,
    write_tail,
};

/// A cursor over an open-for-append file.
pub struct WriteFile {
    pub(crate) file_id: u32,
    block: u32,
    age: u32,
    sector: u32,
    offset: u16,
}

/// Opens a new file for writing: allocates its first block and initializes it.
pub fn open<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    allocator: &mut Allocator,
    file_id: u32,
) -> Result<(WriteFile, u32, u32), F::Error> {
    let (block, age) = allocator.allocate_block()?;
    init_block(flash, geometry, cache, block, file_id, age)?;
    Ok((
        WriteFile {
            file_id,
            block,
            age,
            sector: 0,
            offset: 0,
        },
        block,
        age,
    ))
}

/// Appends as much of `src` as fits before the file system clock needs to tick for a new
/// block allocation; returns the number of bytes written (may be short of `src.len()` only
/// if the allocator runs out of space).
pub fn write<F: FlashDriver>(
    cursor: &mut WriteFile,
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    allocator: &mut Allocator,
    t: &mut u32,
    src: &[u8],
) -> Result<usize, F::Error> {
    let mut written = 0;
    while written < src.len() {
        let capacity = sector_capacity(geometry, cursor.sector);
        let remaining_in_sector = capacity - cursor.offset;
        if remaining_in_sector == 0 {
            advance_block_or_sector(cursor, flash, geometry, cache, allocator, t)?;
            continue;
        }
        let n = core::cmp::min(remaining_in_sector as usize, src.len() - written);
        let new_offset = cursor.offset + n as u16;
        write_sector_bytes(
            flash,
            geometry,
            cache,
            cursor.block,
            cursor.sector,
            cursor.offset,
            &src[written..written + n],
        )?;
        cursor.offset = new_offset;
        written += n;
        if cursor.offset == capacity {
            finalize_sector(flash, geometry, cache, cursor.block, cursor.sector, cursor.offset)?;
            advance_block_or_sector(cursor, flash, geometry, cache, allocator, t)?;
        }
    }
    Ok(written)
}

fn advance_block_or_sector<F: FlashDriver>(
    cursor: &mut WriteFile,
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    allocator: &mut Allocator,
    t: &mut u32,
) -> Result<(), F::Error> {
    match next_data_sector(geometry, cursor.sector) {
        Some(next) => {
            cursor.sector = next;
            cursor.offset = 0;
            Ok(())
        }
        None => {
            // Tail-first (SPEC_FULL.md §4.5): the successor index is only an in-memory
            // choice until the tail sector below commits it to flash.
            let (successor, successor_age) = allocator.allocate_block()?;
            write_tail(
                flash,
                geometry,
                cache,
                cursor.block,
                &FileTailSector {
                    next_block: successor,
                    next_age: successor_age,
                    timestamp: *t,
                },
            )?;
            *t += 1;
            init_block(flash, geometry, cache, successor, cursor.file_id, successor_age)?;
            cursor.block = successor;
            cursor.age = successor_age;
            cursor.sector = 0;
            cursor.offset = 0;
            Ok(())
        }
    }
}

/// Flushes the cursor: commits the current sector's final `nbytes` if it holds any
/// unfinalized bytes. Overall length is implicit from the per-sector `nbytes` chain, so
/// there is no inode record to update.
pub fn close<F: FlashDriver>(
    cursor: WriteFile,
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
) -> Result<(), F::Error> {
    if cursor.offset > 0 {
        finalize_sector(flash, geometry, cache, cursor.block, cursor.sector, cursor.offset)?;
    }
    Ok(())
}

/// Reads back the tail block of a chain starting at `first_block`, following `next_block`
/// links until one is `INVALID`. Used by `rm` to find the chain's current tail.
pub fn find_tail<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    first_block: u32,
) -> Result<u32, F::Error> {
    let mut block = first_block;
    loop {
        let tail = read_tail(flash, geometry, cache, block)?;
        if tail.next_block == crate::records::BLOCK_IDX_INVALID {
            return Ok(block);
        }
        block = tail.next_block;
    }
}

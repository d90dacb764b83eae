//! File chains: shared block accessors plus the read and write state machines.
//!
//! A file chain is a singly-linked list of `FILE`-role blocks. This module holds the
//! accessors common to both directions of travel (header, tail link, invalidation sector,
//! per-sector spare); [`read`] and [`write`] hold the cursors and the sequencing rules
//! specific to each direction.

pub mod read;
pub mod write;

pub use read::ReadFile;
pub use write::WriteFile;

use bytemuck::{bytes_of, bytes_of_mut, Zeroable};

use crate::cache::PageCache;
use crate::error::{Error, Result};
use crate::flash::FlashDriver;
use crate::geometry::{Geometry, FILE_INVALIDATION_SECTOR};
use crate::records::{
    BlockRole, FileInvalidationRecord, FileSector0Header, FileSectorSpare, FileTailSector,
    NBYTES_UNWRITTEN,
};

/// Interprets a spare's raw `nbytes` field, mapping the unwritten (all-ones) sentinel to
/// zero valid bytes rather than to a literal, committed zero.
pub(crate) fn effective_nbytes(raw: u32) -> u16 {
    if raw == NBYTES_UNWRITTEN {
        0
    } else {
        raw as u16
    }
}

/// Capacity in bytes of `sector`'s data region: the header eats into sector 0's, the
/// invalidation and tail sectors hold no file data at all.
pub(crate) fn sector_capacity(geometry: &Geometry, sector: u32) -> u16 {
    if sector == 0 {
        geometry.sector_size - core::mem::size_of::<FileSector0Header>() as u16
    } else if sector == FILE_INVALIDATION_SECTOR || sector == geometry.file_tail_sector() {
        0
    } else {
        geometry.sector_size
    }
}

/// The next data sector after `sector`, skipping the reserved invalidation sector. Returns
/// `None` if `sector` was the last usable data sector of the block (the next one is the
/// tail sector and a new block is needed).
pub(crate) fn next_data_sector(geometry: &Geometry, sector: u32) -> Option<u32> {
    let mut next = sector + 1;
    if next == FILE_INVALIDATION_SECTOR {
        next += 1;
    }
    if next >= geometry.file_tail_sector() {
        None
    } else {
        Some(next)
    }
}

/// Reads a file block's sector-0 header (`file_id`, `age`).
pub(crate) fn read_header<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    block: u32,
) -> Result<FileSector0Header, F::Error> {
    if !cache.open_sector(flash, geometry, block, 0) {
        return Err(Error::BadBlock);
    }
    let mut hdr = FileSector0Header::zeroed();
    flash
        .read_sector(bytes_of_mut(&mut hdr), 0, 0, core::mem::size_of_val(&hdr) as u16)
        .map_err(Error::Flash)?;
    Ok(hdr)
}

/// Reads a sector's spare area, interpreted as a file-block spare.
pub(crate) fn read_spare<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    block: u32,
    sector: u32,
) -> Result<FileSectorSpare, F::Error> {
    if !cache.open_sector(flash, geometry, block, sector) {
        return Err(Error::BadBlock);
    }
    let mut spare = [0u8; 16];
    flash.read_spare(&mut spare, sector).map_err(Error::Flash)?;
    let mut out = FileSectorSpare::zeroed();
    let n = core::mem::size_of::<FileSectorSpare>();
    bytes_of_mut(&mut out).copy_from_slice(&spare[..n]);
    Ok(out)
}

/// Reads a file block's tail sector.
pub(crate) fn read_tail<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    block: u32,
) -> Result<FileTailSector, F::Error> {
    let sector = geometry.file_tail_sector();
    if !cache.open_sector(flash, geometry, block, sector) {
        return Err(Error::BadBlock);
    }
    let mut rec = FileTailSector::zeroed();
    flash
        .read_sector(bytes_of_mut(&mut rec), sector, 0, core::mem::size_of_val(&rec) as u16)
        .map_err(Error::Flash)?;
    Ok(rec)
}

/// Programs a file block's tail sector; called exactly once, when the successor is chosen.
pub(crate) fn write_tail<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    block: u32,
    record: &FileTailSector,
) -> Result<(), F::Error> {
    let sector = geometry.file_tail_sector();
    if !cache.open_sector(flash, geometry, block, sector) {
        return Err(Error::BadBlock);
    }
    flash
        .write_sector(bytes_of(record), sector, 0, core::mem::size_of_val(record) as u16)
        .map_err(Error::Flash)?;
    flash.commit().map_err(Error::Flash)?;
    cache.invalidate(flash);
    Ok(())
}

/// Reads a file block's reserved invalidation sector.
pub(crate) fn read_invalidation<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    block: u32,
) -> Result<FileInvalidationRecord, F::Error> {
    if !cache.open_sector(flash, geometry, block, FILE_INVALIDATION_SECTOR) {
        return Err(Error::BadBlock);
    }
    let mut rec = FileInvalidationRecord::zeroed();
    flash
        .read_sector(
            bytes_of_mut(&mut rec),
            FILE_INVALIDATION_SECTOR,
            0,
            core::mem::size_of_val(&rec) as u16,
        )
        .map_err(Error::Flash)?;
    Ok(rec)
}

/// Programs a file block's reserved invalidation sector, unless it is already programmed
/// (idempotent retry of an interrupted `rm`; NAND cannot reprogram a sector with a new value
/// without an intervening erase).
pub(crate) fn write_invalidation<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    block: u32,
    record: &FileInvalidationRecord,
) -> Result<(), F::Error> {
    let existing = read_invalidation(flash, geometry, cache, block)?;
    if existing.timestamp != crate::records::TIMESTAMP_INVALID {
        return Ok(());
    }
    if !cache.open_sector(flash, geometry, block, FILE_INVALIDATION_SECTOR) {
        return Err(Error::BadBlock);
    }
    flash
        .write_sector(
            bytes_of(record),
            FILE_INVALIDATION_SECTOR,
            0,
            core::mem::size_of_val(record) as u16,
        )
        .map_err(Error::Flash)?;
    flash.commit().map_err(Error::Flash)?;
    cache.invalidate(flash);
    Ok(())
}

/// Initializes a freshly-allocated file block's header and role tag.
///
/// Only the spare's `role` byte range is programmed here; its `nbytes` bytes are left
/// virgin (all-ones) because the block has just been allocated (erased) and whether sector
/// 0 ever receives data, and how much, is not yet known. [`finalize_sector`] programs
/// `nbytes` once, when sector 0's content is settled; writing it here instead would
/// commit to a value (typically 0) that a later append could never legally overwrite.
pub(crate) fn init_block<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    block: u32,
    file_id: u32,
    age: u32,
) -> Result<(), F::Error> {
    if !cache.open_sector(flash, geometry, block, 0) {
        return Err(Error::BadBlock);
    }
    let hdr = FileSector0Header { file_id, age };
    flash
        .write_sector(bytes_of(&hdr), 0, 0, core::mem::size_of_val(&hdr) as u16)
        .map_err(Error::Flash)?;
    let role_only = role_spare_buf(BlockRole::File);
    flash.write_spare(&role_only, 0).map_err(Error::Flash)?;
    flash.commit().map_err(Error::Flash)?;
    cache.invalidate(flash);
    Ok(())
}

/// A spare buffer programming only the `role` field, leaving `nbytes` untouched (relies on
/// [`crate::flash::FlashDriver::write_spare`]'s bitwise-AND merge semantics).
fn role_spare_buf(role: BlockRole) -> [u8; 16] {
    let spare = FileSectorSpare {
        nbytes: NBYTES_UNWRITTEN,
        role,
    };
    let mut buf = [0xFFu8; 16];
    let n = core::mem::size_of_val(&spare);
    buf[..n].copy_from_slice(bytes_of(&spare));
    buf
}

/// Programs `data` into `sector`'s data area. May be called more than once per sector, as
/// long as each call targets a disjoint byte range (successive appends); the spare's
/// `nbytes` is written separately, once, by [`finalize_sector`].
pub(crate) fn write_sector_bytes<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    block: u32,
    sector: u32,
    offset: u16,
    data: &[u8],
) -> Result<(), F::Error> {
    if !cache.open_sector(flash, geometry, block, sector) {
        return Err(Error::BadBlock);
    }
    flash
        .write_sector(data, sector, offset, data.len() as u16)
        .map_err(Error::Flash)?;
    flash.commit().map_err(Error::Flash)?;
    cache.invalidate(flash);
    Ok(())
}

/// Commits `sector`'s final `nbytes` once its content is settled (full, or the write session
/// closed with it partially filled). For sector 0, only `nbytes` is programmed (`role` was
/// already committed by [`init_block`]); every other sector gets `nbytes` and `role` together
/// in this one, first and only, spare write.
pub(crate) fn finalize_sector<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    block: u32,
    sector: u32,
    nbytes: u16,
) -> Result<(), F::Error> {
    if !cache.open_sector(flash, geometry, block, sector) {
        return Err(Error::BadBlock);
    }
    let spare = FileSectorSpare {
        nbytes: nbytes as u32,
        role: BlockRole::File,
    };
    let mut buf = [0xFFu8; 16];
    let n = core::mem::size_of_val(&spare);
    if sector == 0 {
        // Only the leading `nbytes` bytes differ from the all-ones already committed for
        // `role`; leave the rest of the buffer untouched (0xFF) so the merge is a no-op there.
        let nbytes_len = core::mem::size_of::<u32>();
        buf[..nbytes_len].copy_from_slice(&bytes_of(&spare)[..nbytes_len]);
    } else {
        buf[..n].copy_from_slice(bytes_of(&spare));
    }
    flash.write_spare(&buf, sector).map_err(Error::Flash)?;
    flash.commit().map_err(Error::Flash)?;
    cache.invalidate(flash);
    Ok(())
}

/// Reads `len` bytes at `offset` within `sector`'s data area.
pub(crate) fn read_sector_data<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    block: u32,
    sector: u32,
    offset: u16,
    dst: &mut [u8],
) -> Result<(), F::Error> {
    if !cache.open_sector(flash, geometry, block, sector) {
        return Err(Error::BadBlock);
    }
    flash
        .read_sector(dst, sector, offset, dst.len() as u16)
        .map_err(Error::Flash)?;
    Ok(())
}

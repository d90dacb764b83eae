//! The sequential file read state machine.

use crate::cache::PageCache;
use crate::error::Result;
use crate::flash::FlashDriver;
use crate::geometry::Geometry;
use crate::records::BLOCK_IDX_INVALID;

use super::{effective_nbytes, next_data_sector, read_sector_data, read_spare, read_tail, sector_capacity};

/// A cursor over an open-for-read file.
pub struct ReadFile {
    block: u32,
    sector: u32,
    /// Bytes already consumed from the current sector's data region.
    consumed: u16,
    /// Total valid bytes in the current sector's data region, per its spare `nbytes`.
    len: u16,
    eof: bool,
}

fn sector_base_offset(sector: u32) -> u16 {
    if sector == 0 {
        core::mem::size_of::<crate::records::FileSector0Header>() as u16
    } else {
        0
    }
}

/// Positions a freshly-opened cursor at the first byte of `first_block`.
pub fn open<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    first_block: u32,
) -> Result<ReadFile, F::Error> {
    let spare0 = read_spare(flash, geometry, cache, first_block, 0)?;
    let len0 = effective_nbytes(spare0.nbytes);
    if len0 > 0 {
        Ok(ReadFile {
            block: first_block,
            sector: 0,
            consumed: 0,
            len: len0,
            eof: false,
        })
    } else {
        let sector = geometry.first_file_data_sector();
        let spare = read_spare(flash, geometry, cache, first_block, sector)?;
        let len = effective_nbytes(spare.nbytes);
        Ok(ReadFile {
            block: first_block,
            sector,
            consumed: 0,
            len,
            eof: len == 0,
        })
    }
}

/// Reads up to `dst.len()` bytes, returning how many were actually read (0 means EOF).
pub fn read<F: FlashDriver>(
    cursor: &mut ReadFile,
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    dst: &mut [u8],
) -> Result<usize, F::Error> {
    let mut written = 0;
    while written < dst.len() && !cursor.eof {
        let remaining = cursor.len - cursor.consumed;
        if remaining > 0 {
            let n = core::cmp::min(remaining as usize, dst.len() - written);
            let offset = sector_base_offset(cursor.sector) + cursor.consumed;
            read_sector_data(
                flash,
                geometry,
                cache,
                cursor.block,
                cursor.sector,
                offset,
                &mut dst[written..written + n],
            )?;
            cursor.consumed += n as u16;
            written += n;
            continue;
        }

        if cursor.len < sector_capacity(geometry, cursor.sector) {
            cursor.eof = true;
            break;
        }

        advance(cursor, flash, geometry, cache)?;
    }
    Ok(written)
}

fn advance<F: FlashDriver>(
    cursor: &mut ReadFile,
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
) -> Result<(), F::Error> {
    match next_data_sector(geometry, cursor.sector) {
        Some(next) => {
            let spare = read_spare(flash, geometry, cache, cursor.block, next)?;
            cursor.sector = next;
            cursor.consumed = 0;
            cursor.len = effective_nbytes(spare.nbytes);
            if cursor.len == 0 {
                cursor.eof = true;
            }
            Ok(())
        }
        None => {
            let tail = read_tail(flash, geometry, cache, cursor.block)?;
            if tail.next_block == BLOCK_IDX_INVALID {
                cursor.eof = true;
                return Ok(());
            }
            let spare0 = read_spare(flash, geometry, cache, tail.next_block, 0)?;
            cursor.block = tail.next_block;
            let len0 = effective_nbytes(spare0.nbytes);
            if len0 > 0 {
                cursor.sector = 0;
                cursor.consumed = 0;
                cursor.len = len0;
            } else {
                let sector = geometry.first_file_data_sector();
                let spare = read_spare(flash, geometry, cache, cursor.block, sector)?;
                cursor.sector = sector;
                cursor.consumed = 0;
                cursor.len = effective_nbytes(spare.nbytes);
            }
            if cursor.len == 0 {
                cursor.eof = true;
            }
            Ok(())
        }
    }
}

/// Closes a read cursor. Nothing to flush; retained for API symmetry with [`super::write::close`].
pub fn close<F: FlashDriver>(_cursor: ReadFile) -> Result<(), F::Error> {
    Ok(())
}

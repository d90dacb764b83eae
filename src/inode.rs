//! The inode chain: iteration cursor and entry/header accessors.
//!
//! An inode block's page 0 is reserved in full for its own bookkeeping (header, the
//! invalidation sector kept for future whole-block reclamation, and the tail sector); inode
//! entry pairs start at [`Geometry::first_inode_entry_sector`] and continue to the end of the
//! block.

use bytemuck::{bytes_of, bytes_of_mut, Zeroable};

use crate::error::{Error, Result};
use crate::flash::FlashDriver;
use crate::geometry::{Geometry, INODE_INVALIDATION_SECTOR, INODE_TAIL_SECTOR};
use crate::records::{
    InodeAllocationRecord, InodeBlockHeader, InodeInvalidationRecord, InodeSpare0,
    InodeTailSector, FILE_ID_INVALID,
};

/// A position within the inode chain, advancing entry pair by entry pair.
#[derive(Clone, Copy, Debug)]
pub struct InodeCursor {
    /// Inode block currently being walked.
    pub block: u32,
    /// That block's successor, or `BLOCK_IDX_INVALID` if it is the chain's tail.
    pub next_block: u32,
    /// Index of the entry the cursor currently names, counting from 0 at `inode0`.
    pub inode_idx: u32,
    /// Sector holding the current entry's allocation record (its invalidation record is
    /// the following sector).
    pub sector: u32,
}

impl InodeCursor {
    /// Positions a cursor at the first entry of `inode0`.
    pub fn at_inode0<F: FlashDriver>(
        flash: &mut F,
        geometry: &Geometry,
        cache: &mut crate::cache::PageCache,
    ) -> Result<Self, F::Error> {
        let next_block = read_tail(flash, geometry, cache, 0)?;
        Ok(Self {
            block: 0,
            next_block,
            inode_idx: 0,
            sector: geometry.first_inode_entry_sector(),
        })
    }

    /// Advances the cursor to the next entry pair, crossing into the successor inode block
    /// if the current one is exhausted.
    pub fn advance<F: FlashDriver>(
        &mut self,
        flash: &mut F,
        geometry: &Geometry,
        cache: &mut crate::cache::PageCache,
    ) -> Result<(), F::Error> {
        self.sector += 2;
        self.inode_idx += 1;
        if self.sector + 1 < geometry.sectors_per_block() {
            return Ok(());
        }
        if self.next_block == crate::records::BLOCK_IDX_INVALID {
            // Caller must allocate a new inode block before advancing further; leave the
            // cursor parked at the last valid position of the exhausted block.
            self.sector -= 2;
            self.inode_idx -= 1;
            return Ok(());
        }
        self.block = self.next_block;
        self.next_block = read_tail(flash, geometry, cache, self.block)?;
        self.sector = geometry.first_inode_entry_sector();
        Ok(())
    }
}

/// Reads the `next_block` link of the inode block at `block`.
pub fn read_tail<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    block: u32,
) -> Result<u32, F::Error> {
    if !cache.open_sector(flash, geometry, block, INODE_TAIL_SECTOR) {
        return Err(Error::BadBlock);
    }
    let mut rec = InodeTailSector::zeroed();
    flash
        .read_sector(bytes_of_mut(&mut rec), INODE_TAIL_SECTOR, 0, core::mem::size_of_val(&rec) as u16)
        .map_err(Error::Flash)?;
    Ok(rec.next_block)
}

/// Writes the `next_block` link of the inode block at `block`; called exactly once, when
/// the successor block is allocated.
pub fn write_tail<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    block: u32,
    next_block: u32,
) -> Result<(), F::Error> {
    if !cache.open_sector(flash, geometry, block, INODE_TAIL_SECTOR) {
        return Err(Error::BadBlock);
    }
    let rec = InodeTailSector { next_block };
    flash
        .write_sector(bytes_of(&rec), INODE_TAIL_SECTOR, 0, core::mem::size_of_val(&rec) as u16)
        .map_err(Error::Flash)?;
    flash.commit().map_err(Error::Flash)?;
    cache.invalidate(flash);
    Ok(())
}

/// Reads the allocation record at `sector`.
pub fn read_allocation<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    block: u32,
    sector: u32,
) -> Result<InodeAllocationRecord, F::Error> {
    if !cache.open_sector(flash, geometry, block, sector) {
        return Err(Error::BadBlock);
    }
    let mut rec = InodeAllocationRecord::zeroed();
    flash
        .read_sector(bytes_of_mut(&mut rec), sector, 0, core::mem::size_of_val(&rec) as u16)
        .map_err(Error::Flash)?;
    Ok(rec)
}

/// Reads the invalidation record at `sector + 1`.
pub fn read_invalidation<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    block: u32,
    sector: u32,
) -> Result<InodeInvalidationRecord, F::Error> {
    let inval_sector = sector + 1;
    if !cache.open_sector(flash, geometry, block, inval_sector) {
        return Err(Error::BadBlock);
    }
    let mut rec = InodeInvalidationRecord::zeroed();
    flash
        .read_sector(bytes_of_mut(&mut rec), inval_sector, 0, core::mem::size_of_val(&rec) as u16)
        .map_err(Error::Flash)?;
    Ok(rec)
}

/// Programs a fresh allocation record at `sector`, leaving its invalidation sector untouched
/// (all-ones, meaning the file is live).
pub fn write_allocation<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    block: u32,
    sector: u32,
    record: &InodeAllocationRecord,
) -> Result<(), F::Error> {
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

/// Programs the invalidation record for the entry at `sector`, marking the file deleted.
pub fn write_invalidation<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    block: u32,
    sector: u32,
    record: &InodeInvalidationRecord,
) -> Result<(), F::Error> {
    let inval_sector = sector + 1;
    if !cache.open_sector(flash, geometry, block, inval_sector) {
        return Err(Error::BadBlock);
    }
    flash
        .write_sector(bytes_of(record), inval_sector, 0, core::mem::size_of_val(record) as u16)
        .map_err(Error::Flash)?;
    flash.commit().map_err(Error::Flash)?;
    cache.invalidate(flash);
    Ok(())
}

/// Reads the wear-leveling age stamped into an inode block's own header (sector 0).
pub fn read_block_age<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    block: u32,
) -> Result<u32, F::Error> {
    if !cache.open_sector(flash, geometry, block, 0) {
        return Err(Error::BadBlock);
    }
    let mut hdr = InodeBlockHeader::zeroed();
    flash
        .read_sector(bytes_of_mut(&mut hdr), 0, 0, core::mem::size_of_val(&hdr) as u16)
        .map_err(Error::Flash)?;
    Ok(hdr.age)
}

/// Reads the spare area of an inode block's sector 0 (role + `inode_index`).
pub fn read_spare0<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    block: u32,
) -> Result<InodeSpare0, F::Error> {
    if !cache.open_sector(flash, geometry, block, 0) {
        return Err(Error::BadBlock);
    }
    let mut spare = [0u8; 16];
    flash.read_spare(&mut spare, 0).map_err(Error::Flash)?;
    let mut out = InodeSpare0::zeroed();
    let n = core::mem::size_of::<InodeSpare0>();
    bytes_of_mut(&mut out).copy_from_slice(&spare[..n]);
    Ok(out)
}

/// Initializes a freshly-allocated inode block: header, sector-0 spare, and the reserved
/// invalidation sector, left all-ones (never written; see `DESIGN.md`).
pub fn init_block<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    block: u32,
    inode_index: u32,
    age: u32,
) -> Result<(), F::Error> {
    if !cache.open_sector(flash, geometry, block, 0) {
        return Err(Error::BadBlock);
    }
    let hdr = InodeBlockHeader { age };
    flash
        .write_sector(bytes_of(&hdr), 0, 0, core::mem::size_of_val(&hdr) as u16)
        .map_err(Error::Flash)?;
    let spare = InodeSpare0 {
        inode_index,
        role: crate::records::BlockRole::Inode,
    };
    let mut spare_buf = [0xFFu8; 16];
    let n = core::mem::size_of_val(&spare);
    spare_buf[..n].copy_from_slice(bytes_of(&spare));
    flash.write_spare(&spare_buf, 0).map_err(Error::Flash)?;
    flash.commit().map_err(Error::Flash)?;
    cache.invalidate(flash);
    Ok(())
}

/// Reads the invalidation timestamp used during the mount census to recognize `inode0`.
pub fn read_block_invalidation<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    block: u32,
) -> Result<u32, F::Error> {
    if !cache.open_sector(flash, geometry, block, INODE_INVALIDATION_SECTOR) {
        return Err(Error::BadBlock);
    }
    let mut buf = [0u8; 4];
    flash
        .read_sector(&mut buf, INODE_INVALIDATION_SECTOR, 0, 4)
        .map_err(Error::Flash)?;
    Ok(u32::from_ne_bytes(buf))
}

/// Returns whether `record` marks the end of the live inode chain.
pub fn is_end_of_chain(record: &InodeAllocationRecord) -> bool {
    record.file_id == FILE_ID_INVALID
}

/// Walks the inode chain looking for a live entry (invalidation record all-ones) named
/// `name`. Used by both `open_read` and `rm`, which otherwise share nothing about how a
/// filename resolves to a chain.
pub fn find_live_by_name<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut crate::cache::PageCache,
    name: &[u8],
) -> Result<Option<(u32, u32, InodeAllocationRecord)>, F::Error> {
    let mut cursor = InodeCursor::at_inode0(flash, geometry, cache)?;
    loop {
        let record = read_allocation(flash, geometry, cache, cursor.block, cursor.sector)?;
        if is_end_of_chain(&record) {
            return Ok(None);
        }
        if record.name() == name {
            let invalidation =
                read_invalidation(flash, geometry, cache, cursor.block, cursor.sector)?;
            if invalidation.timestamp == crate::records::TIMESTAMP_INVALID {
                return Ok(Some((cursor.block, cursor.sector, record)));
            }
        }
        cursor.advance(flash, geometry, cache)?;
    }
}

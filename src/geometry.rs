//! Medium geometry: the per-device parameters of the on-disk ABI.
//!
//! Unlike the original design, which fixes `FS_NUM_BLOCKS` et al. as crate-wide constants,
//! [`Geometry`] is an ordinary runtime value, checked once at [`crate::fs::FileSystem::new`].
//! A single build of this crate can then serve whichever NAND part the host board carries,
//! the same way a mountable filesystem reads its block size from media instead of baking it
//! into the binary. The bit layout of every record in [`crate::records`] is still a fixed
//! ABI; only the block/page/sector counts and the sector size are configurable.

use crate::error::{Error, Result};
use crate::records::InodeAllocationRecord;

/// Length in bytes of the longest filename the inode allocation record can hold.
pub const MAX_FNAME_LEN: usize = 16;

/// Reserved sector inside every inode block, checked by the mount scan to recognize
/// `inode0`. Always all-ones in this implementation; see `DESIGN.md` for the reclamation
/// scheme it is reserved for.
pub const INODE_INVALIDATION_SECTOR: u32 = 1;

/// Reserved sector inside every inode block holding the chain's `next_block` link.
pub const INODE_TAIL_SECTOR: u32 = 2;

/// Reserved sector inside every file block, written once by `rm` for the file's current
/// tail block.
pub const FILE_INVALIDATION_SECTOR: u32 = 1;

/// On-disk format version carried by `inode0` (not currently interpreted; reserved for a
/// future incompatible format change).
pub const VSN_MAJOR: u8 = 1;
pub const VSN_MINOR: u8 = 0;

/// Describes the physical layout of a flash part: how many erase blocks it has, how many
/// pages make up a block, and how many sectors make up a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Total number of erase blocks on the medium.
    pub num_blocks: u32,
    /// Number of pages per erase block.
    pub pages_per_block: u16,
    /// Number of sectors per page.
    pub sectors_per_page: u16,
    /// Size in bytes of a single sector's data area (excluding spare).
    pub sector_size: u16,
}

impl Geometry {
    /// Validates the geometry and returns it, or an error if it cannot host a filesystem.
    ///
    /// A medium needs at least two blocks (one for `inode0`, one to ever allocate a file
    /// into) and at least one reserved sector pair plus the tail sector inside each inode
    /// block, which in turn requires at least two pages per block.
    pub fn validated<E>(self) -> Result<Self, E> {
        if self.num_blocks < 2 {
            return Err(Error::BadGeometry("need at least two blocks"));
        }
        if self.pages_per_block < 2 {
            return Err(Error::BadGeometry("need at least two pages per block"));
        }
        if self.sectors_per_page == 0 {
            return Err(Error::BadGeometry("need at least one sector per page"));
        }
        if self.sector_size == 0 {
            return Err(Error::BadGeometry("sector size must be non-zero"));
        }
        if self.sectors_per_page as u32 <= INODE_TAIL_SECTOR {
            return Err(Error::BadGeometry(
                "need enough sectors per page to clear the reserved inode sectors",
            ));
        }
        if self.sectors_per_block() <= INODE_TAIL_SECTOR + 2 {
            return Err(Error::BadGeometry(
                "block too small to hold the reserved inode sectors",
            ));
        }
        if (self.sector_size as usize) < core::mem::size_of::<InodeAllocationRecord>() {
            // An inode allocation record (the widest record this format ever writes, thanks
            // to its embedded filename) must fit inside one sector's data area with nothing
            // left to spill into the following sector's own region.
            return Err(Error::BadGeometry(
                "sector too small to hold an inode allocation record",
            ));
        }
        Ok(self)
    }

    /// Total number of sectors in one erase block.
    pub const fn sectors_per_block(&self) -> u32 {
        self.pages_per_block as u32 * self.sectors_per_page as u32
    }

    /// Index of a file block's reserved tail sector: its last sector.
    pub const fn file_tail_sector(&self) -> u32 {
        self.sectors_per_block() - 1
    }

    /// Converts a sector index to the page that contains it.
    pub const fn sector_to_page(&self, sector: u32) -> u16 {
        (sector / self.sectors_per_page as u32) as u16
    }

    /// First sector of the first inode entry pair: just past all of page 0, which is
    /// reserved in full for the block's own header, invalidation sector and tail sector.
    pub const fn first_inode_entry_sector(&self) -> u32 {
        self.sectors_per_page as u32
    }

    /// First ordinary data sector of a file block (after the header sector and the
    /// reserved invalidation sector).
    pub const fn first_file_data_sector(&self) -> u32 {
        FILE_INVALIDATION_SECTOR + 1
    }
}

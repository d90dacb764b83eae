//! On-disk record layouts.
//!
//! Every record a sector's data or spare area can hold is a `#[repr(C)]`,
//! `bytemuck::Pod` type, read and written as raw bytes rather than overlaid on a shared
//! buffer the way the C source's unions do. [`BlockRole`] uses the [`pod_enum::pod_enum`]
//! pattern so that an erased (all-ones) spare reads back as a valid, known
//! [`BlockRole::Unallocated`] rather than an invalid enum discriminant.

use bytemuck::{Pod, Zeroable};
use pod_enum::pod_enum;

/// Sentinel meaning "never written" for timestamp fields.
pub const TIMESTAMP_INVALID: u32 = u32::MAX;
/// Sentinel meaning "never written" for file id fields.
pub const FILE_ID_INVALID: u32 = u32::MAX;
/// Sentinel meaning "never written" for block index fields.
pub const BLOCK_IDX_INVALID: u32 = u32::MAX;
/// Sentinel meaning "not yet finalized" for a sector's spare `nbytes` field. A sector's
/// `nbytes` bytes are programmed exactly once, when the sector's content is finalized (full,
/// or flushed at close), so they read back as all-ones until then; interpret as zero valid
/// bytes, not as a literal 0 committed to flash.
pub const NBYTES_UNWRITTEN: u32 = u32::MAX;

/// The role an allocated block plays, carried in the spare area of its first page.
///
/// Stored as a full `u32` (rather than a single byte) so the surrounding spare structs
/// need no manual padding to satisfy [`bytemuck::Pod`]'s no-uninitialized-bytes rule.
#[pod_enum]
#[repr(u32)]
pub enum BlockRole {
    /// A node of the inode chain.
    Inode = 0,
    /// A data block belonging to a file chain.
    File = 1,
    /// Erased and available; this is also the all-ones pattern left by an erase, so a
    /// never-programmed block reads as `Unallocated` with no write required.
    Unallocated = 0xFFFF_FFFF,
}

/// Spare area of an inode block's sector 0.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct InodeSpare0 {
    /// Position of this block within the inode chain; 0 for `inode0`.
    pub inode_index: u32,
    pub role: BlockRole,
}

/// Payload of an inode block's sector 0: the block's own wear-leveling header.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct InodeBlockHeader {
    pub age: u32,
}

/// Payload of [`crate::geometry::INODE_INVALIDATION_SECTOR`]: reserved for future whole
/// inode-block reclamation (see `DESIGN.md`); never written by this implementation.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct InodeBlockInvalidation {
    pub timestamp: u32,
}

/// Payload of [`crate::geometry::INODE_TAIL_SECTOR`].
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct InodeTailSector {
    pub next_block: u32,
}

/// Allocation record: the even sector of an inode entry pair.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct InodeAllocationRecord {
    pub file_id: u32,
    pub first_block: u32,
    pub first_block_age: u32,
    pub timestamp: u32,
    pub filename: [u8; crate::geometry::MAX_FNAME_LEN],
}

impl InodeAllocationRecord {
    /// Returns the filename up to (but not including) the first NUL byte.
    pub fn name(&self) -> &[u8] {
        let len = self
            .filename
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.filename.len());
        &self.filename[..len]
    }
}

/// Invalidation record: the odd sector of an inode entry pair.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct InodeInvalidationRecord {
    pub last_block: u32,
    pub timestamp: u32,
}

/// Spare area of every sector within a file block.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FileSectorSpare {
    pub nbytes: u32,
    pub role: BlockRole,
}

/// Payload of a file block's sector 0.
///
/// `age` leads so that a block's wear-leveling age sits at the same byte offset regardless
/// of whether the block turns out to hold an [`InodeBlockHeader`] or a `FileSector0Header`;
/// the mount census's `UNALLOCATED` branch reads that common offset without knowing which
/// kind of header, if any, a block held in its previous life.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FileSector0Header {
    pub age: u32,
    pub file_id: u32,
}

/// Payload of [`crate::geometry::FILE_INVALIDATION_SECTOR`].
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FileInvalidationRecord {
    pub timestamp: u32,
}

/// Payload of a file block's tail sector (its last sector).
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FileTailSector {
    pub next_block: u32,
    pub next_age: u32,
    pub timestamp: u32,
}

//! The flash driver interface.
//!
//! `flogfs` never touches hardware directly. A host provides a type implementing
//! [`FlashDriver`] that knows how to open pages, read and write sectors and their spare
//! area, erase blocks, and report bad blocks on the physical part in use. This mirrors the
//! split between filesystem logic and block-device access that `ext4`/`fat` take against
//! a `DiskDevice` in disk-backed filesystems; here the "device" is raw NAND instead of a
//! sector-addressable disk, so the interface additionally exposes spare-area I/O, explicit
//! page open/commit, and a bad-block query.

/// Fixed-size spare area attached to every page, carried alongside its data.
///
/// Real NAND spare areas vary in size by part; 16 bytes is enough to hold any record this
/// crate defines (see [`crate::records`]) and keeps spare buffers `Copy` and stack-allocated.
pub type Spare = [u8; 16];

/// Operations a NAND flash driver must expose for `flogfs` to run on top of it.
///
/// A page must be opened before any sector within it can be read or written, and stays
/// "open" (observable by [`crate::cache::PageCache`]) until another page is opened or the
/// page is explicitly closed. Writes are buffered by the driver and only become durable at
/// [`FlashDriver::commit`], so a filesystem operation can issue several `write_sector`/
/// `write_spare` calls against the same page before committing it once.
pub trait FlashDriver {
    /// The error type this driver can fail with.
    type Error: core::fmt::Debug;

    /// One-time driver initialization, called before any other method.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Acquires the driver-level lock excluding other users of the flash bus.
    fn lock(&mut self);

    /// Releases the driver-level lock.
    fn unlock(&mut self);

    /// Opens the given page of the given block for reading and/or writing.
    ///
    /// Returns `false` if the page could not be opened (e.g. the block is bad).
    fn open_page(&mut self, block: u32, page: u16) -> bool;

    /// Closes whichever page is currently open, if any.
    fn close_page(&mut self);

    /// Reads `len` bytes at `offset` within `sector`'s data area into `dst`.
    fn read_sector(
        &mut self,
        dst: &mut [u8],
        sector: u32,
        offset: u16,
        len: u16,
    ) -> Result<(), Self::Error>;

    /// Reads `sector`'s spare area into `dst`.
    fn read_spare(&mut self, dst: &mut Spare, sector: u32) -> Result<(), Self::Error>;

    /// Programs `len` bytes at `offset` within `sector`'s data area from `src`.
    ///
    /// Must only be called on a sector region that has not yet been programmed since the
    /// enclosing block's last erase (NAND one-shot-program rule); a driver that cannot
    /// detect a violation relies on the filesystem never attempting one.
    fn write_sector(
        &mut self,
        src: &[u8],
        sector: u32,
        offset: u16,
        len: u16,
    ) -> Result<(), Self::Error>;

    /// Programs `sector`'s spare area from `src`.
    ///
    /// Like sector data, the spare area is only ever cleared bit by bit: the result is the
    /// bitwise AND of the existing spare content and `src`. Callers exploit this to program
    /// disjoint fields of the spare at different times (e.g. a block's role at allocation,
    /// a sector's `nbytes` once its content is finalized) by passing `0xFF` for the bytes of
    /// any field they do not intend to touch in that call.
    fn write_spare(&mut self, src: &Spare, sector: u32) -> Result<(), Self::Error>;

    /// Commits buffered writes against the currently open page, making them durable.
    fn commit(&mut self) -> Result<(), Self::Error>;

    /// Erases the given block, returning it to the all-ones state.
    fn erase_block(&mut self, block: u32) -> Result<(), Self::Error>;

    /// Returns whether the given block is a manufacturer- or runtime-marked bad block.
    fn block_is_bad(&mut self, block: u32) -> bool;

    /// Reports a recoverable anomaly (e.g. an allocation repaired at mount).
    fn debug_warn(&mut self, msg: &str);

    /// Reports an unrecoverable problem about to be surfaced as an [`crate::Error`].
    fn debug_error(&mut self, msg: &str);
}

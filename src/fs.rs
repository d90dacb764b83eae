//! The public `FileSystem` value: owns the flash driver, the FS lock, and every piece of
//! in-memory state mount reconstructs, and dispatches the public API of SPEC_FULL.md §6.
//!
//! Unlike the original design's process-wide statics (see `DESIGN.md`), every field here
//! belongs to one `FileSystem<F, L>` value the caller owns; thread-safety is a property of
//! its embedded `L: FsLock`, not of hidden module state.

use crate::alloc_block::Allocator;
use crate::cache::PageCache;
use crate::delete;
use crate::error::{Error, Result};
use crate::file::{read as file_read, write as file_write, ReadFile, WriteFile};
use crate::flash::FlashDriver;
use crate::format;
use crate::geometry::{Geometry, MAX_FNAME_LEN};
use crate::inode;
use crate::lock::FsLock;
use crate::mount;
use crate::records::InodeAllocationRecord;

/// State only available once [`FileSystem::mount`] (or [`FileSystem::format`]) has run.
struct Mounted {
    inode0: u32,
    max_file_id: u32,
    t: u32,
    allocator: Allocator,
}

/// A mounted (or mountable) flogfs instance over one flash part.
///
/// Every public method here acquires the FS-wide lock `L` first and the flash driver's own
/// lock second, for the duration of the call (SPEC_FULL.md §5); both are released through
/// RAII guards, so an early `?` return on a flash failure never leaves either locked.
pub struct FileSystem<F: FlashDriver, L: FsLock> {
    flash: F,
    lock: L,
    geometry: Geometry,
    cache: PageCache,
    state: Option<Mounted>,
}

/// Releases the FS lock when dropped, regardless of how the critical section exits.
struct FsLockGuard<'a, L: FsLock>(&'a mut L);

impl<'a, L: FsLock> FsLockGuard<'a, L> {
    fn acquire(lock: &'a mut L) -> Self {
        lock.lock();
        Self(lock)
    }
}

impl<'a, L: FsLock> Drop for FsLockGuard<'a, L> {
    fn drop(&mut self) {
        self.0.unlock();
    }
}

/// Releases the flash driver's own bus lock when dropped.
struct FlashLockGuard<'a, F: FlashDriver>(&'a mut F);

impl<'a, F: FlashDriver> FlashLockGuard<'a, F> {
    fn acquire(flash: &'a mut F) -> Self {
        flash.lock();
        Self(flash)
    }
}

impl<'a, F: FlashDriver> Drop for FlashLockGuard<'a, F> {
    fn drop(&mut self) {
        self.0.unlock();
    }
}

impl<F: FlashDriver, L: FsLock> FileSystem<F, L> {
    /// Initializes the driver and validates `geometry`, but does not touch the medium's
    /// content; call [`Self::format`] or [`Self::mount`] next.
    pub fn new(mut flash: F, lock: L, geometry: Geometry) -> Result<Self, F::Error> {
        let geometry = geometry.validated()?;
        flash.init().map_err(Error::Flash)?;
        Ok(Self {
            flash,
            lock,
            geometry,
            cache: PageCache::new(),
            state: None,
        })
    }

    /// Erases the medium and writes a fresh `inode0`. The filesystem is mounted in-memory
    /// immediately afterward (an empty, freshly-formatted medium needs no scan to describe).
    pub fn format(&mut self) -> Result<(), F::Error> {
        let _fs_guard = FsLockGuard::acquire(&mut self.lock);
        let _flash_guard = FlashLockGuard::acquire(&mut self.flash);
        self.state = None;
        format::run(&mut self.flash, &self.geometry, &mut self.cache)?;
        let mut allocator = Allocator::new(self.geometry.num_blocks);
        for block in 1..self.geometry.num_blocks {
            if !self.flash.block_is_bad(block) {
                allocator.mark_free(block, 0);
            }
        }
        self.state = Some(Mounted {
            inode0: 0,
            max_file_id: 0,
            t: 0,
            allocator,
        });
        Ok(())
    }

    /// Reconstructs filesystem state from a full scan of the flash (SPEC_FULL.md §4.3).
    pub fn mount(&mut self) -> Result<(), F::Error> {
        let _fs_guard = FsLockGuard::acquire(&mut self.lock);
        let _flash_guard = FlashLockGuard::acquire(&mut self.flash);
        self.cache.invalidate(&mut self.flash);
        let scanned = mount::scan(&mut self.flash, &self.geometry, &mut self.cache)?;
        self.state = Some(Mounted {
            inode0: scanned.inode0,
            max_file_id: scanned.num_files,
            t: scanned.t,
            allocator: scanned.allocator,
        });
        Ok(())
    }

    /// Opens `name` for sequential append; fails if `name` is already too long to have ever
    /// been recorded.
    pub fn open_write(&mut self, name: &[u8]) -> Result<WriteFile, F::Error> {
        if name.len() > MAX_FNAME_LEN {
            return Err(Error::NameTooLong);
        }
        let _fs_guard = FsLockGuard::acquire(&mut self.lock);
        let _flash_guard = FlashLockGuard::acquire(&mut self.flash);
        let state = self.state.as_mut().ok_or(Error::NotMounted)?;

        let slot = locate_write_slot(
            &mut self.flash,
            &self.geometry,
            &mut self.cache,
            &mut state.allocator,
        )?;

        let file_id = state.max_file_id + 1;
        let timestamp = state.t;
        state.t += 1;

        let (cursor, first_block, first_block_age) = file_write::open(
            &mut self.flash,
            &self.geometry,
            &mut self.cache,
            &mut state.allocator,
            file_id,
        )?;

        let mut filename = [0u8; MAX_FNAME_LEN];
        filename[..name.len()].copy_from_slice(name);
        let record = InodeAllocationRecord {
            file_id,
            first_block,
            first_block_age,
            timestamp,
            filename,
        };
        inode::write_allocation(
            &mut self.flash,
            &self.geometry,
            &mut self.cache,
            slot.block,
            slot.sector,
            &record,
        )?;

        state.max_file_id = file_id;

        Ok(cursor)
    }

    /// Appends `src` to the file held by `cursor`, returning the number of bytes written.
    pub fn write(&mut self, cursor: &mut WriteFile, src: &[u8]) -> Result<usize, F::Error> {
        let _fs_guard = FsLockGuard::acquire(&mut self.lock);
        let _flash_guard = FlashLockGuard::acquire(&mut self.flash);
        let state = self.state.as_mut().ok_or(Error::NotMounted)?;
        file_write::write(
            cursor,
            &mut self.flash,
            &self.geometry,
            &mut self.cache,
            &mut state.allocator,
            &mut state.t,
            src,
        )
    }

    /// Flushes and discards a write cursor.
    pub fn close_write(&mut self, cursor: WriteFile) -> Result<(), F::Error> {
        let _fs_guard = FsLockGuard::acquire(&mut self.lock);
        let _flash_guard = FlashLockGuard::acquire(&mut self.flash);
        if self.state.is_none() {
            return Err(Error::NotMounted);
        }
        file_write::close(cursor, &mut self.flash, &self.geometry, &mut self.cache)
    }

    /// Opens `name` for sequential reading from the start of the file.
    pub fn open_read(&mut self, name: &[u8]) -> Result<ReadFile, F::Error> {
        let _fs_guard = FsLockGuard::acquire(&mut self.lock);
        let _flash_guard = FlashLockGuard::acquire(&mut self.flash);
        if self.state.is_none() {
            return Err(Error::NotMounted);
        }
        let found = inode::find_live_by_name(&mut self.flash, &self.geometry, &mut self.cache, name)?;
        let (_, _, record) = found.ok_or(Error::NotFound)?;
        file_read::open(&mut self.flash, &self.geometry, &mut self.cache, record.first_block)
    }

    /// Reads up to `dst.len()` bytes from `cursor`, returning how many were read (0 = EOF).
    pub fn read(&mut self, cursor: &mut ReadFile, dst: &mut [u8]) -> Result<usize, F::Error> {
        let _fs_guard = FsLockGuard::acquire(&mut self.lock);
        let _flash_guard = FlashLockGuard::acquire(&mut self.flash);
        if self.state.is_none() {
            return Err(Error::NotMounted);
        }
        file_read::read(cursor, &mut self.flash, &self.geometry, &mut self.cache, dst)
    }

    /// Discards a read cursor. Nothing is flushed.
    pub fn close_read(&mut self, cursor: ReadFile) -> Result<(), F::Error> {
        let _fs_guard = FsLockGuard::acquire(&mut self.lock);
        let _flash_guard = FlashLockGuard::acquire(&mut self.flash);
        if self.state.is_none() {
            return Err(Error::NotMounted);
        }
        file_read::close::<F>(cursor)
    }

    /// Deletes `name`: invalidates its inode entry, then reclaims its chain (SPEC_FULL.md §4.7).
    pub fn rm(&mut self, name: &[u8]) -> Result<(), F::Error> {
        let _fs_guard = FsLockGuard::acquire(&mut self.lock);
        let _flash_guard = FlashLockGuard::acquire(&mut self.flash);
        let state = self.state.as_mut().ok_or(Error::NotMounted)?;

        let found = inode::find_live_by_name(&mut self.flash, &self.geometry, &mut self.cache, name)?;
        let (inode_block, inode_sector, record) = found.ok_or(Error::NotFound)?;

        delete::run(
            &mut self.flash,
            &self.geometry,
            &mut self.cache,
            &mut state.allocator,
            &mut state.t,
            inode_block,
            inode_sector,
            record.first_block,
        )
    }

    /// The geometry this filesystem was constructed with.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Number of currently `UNALLOCATED` blocks, or `None` before the first `format`/`mount`.
    pub fn free_blocks(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.allocator.num_free_blocks())
    }

    /// The largest `file_id` ever allocated, or `None` before the first `format`/`mount`.
    pub fn max_file_id(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.max_file_id)
    }

    /// Block index of the inode chain's head, or `None` before the first `format`/`mount`.
    pub fn inode0(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.inode0)
    }

    /// Highest per-block erase count observed so far, or `None` before the first
    /// `format`/`mount`. Derived from the allocator's own age table rather than cached
    /// separately, so it stays current as `write` grows a file across block boundaries.
    pub fn max_block_age(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.allocator.max_age())
    }

    /// The filesystem clock's next timestamp, or `None` before the first `format`/`mount`.
    pub fn clock(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.t)
    }

    /// Direct access to the underlying driver, e.g. to inject a bad block or a power-loss
    /// point on a test simulator between two public calls.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Reclaims the underlying driver, discarding all in-memory filesystem state. Used by
    /// tests to simulate a reboot: the medium survives, everything this value held in memory
    /// does not.
    pub fn into_flash(self) -> F {
        self.flash
    }
}

/// A position in the inode chain known to hold a not-yet-written entry.
struct WriteSlot {
    block: u32,
    sector: u32,
}

/// Walks the inode chain from `inode0` to its first free entry, allocating and linking a new
/// inode block if the chain's current tail block is full (SPEC_FULL.md §4.5).
fn locate_write_slot<F: FlashDriver>(
    flash: &mut F,
    geometry: &Geometry,
    cache: &mut PageCache,
    allocator: &mut Allocator,
) -> Result<WriteSlot, F::Error> {
    let mut cursor = inode::InodeCursor::at_inode0(flash, geometry, cache)?;
    let mut block_pos = 0u32;
    loop {
        let record = inode::read_allocation(flash, geometry, cache, cursor.block, cursor.sector)?;
        if inode::is_end_of_chain(&record) {
            return Ok(WriteSlot {
                block: cursor.block,
                sector: cursor.sector,
            });
        }

        let prev_block = cursor.block;
        let prev_sector = cursor.sector;
        cursor.advance(flash, geometry, cache)?;

        if cursor.block == prev_block && cursor.sector == prev_sector {
            // The current inode block is full and chainless: allocate and link a successor.
            block_pos += 1;
            let (new_block, age) = allocator.allocate_block()?;
            inode::init_block(flash, geometry, cache, new_block, block_pos, age)?;
            inode::write_tail(flash, geometry, cache, prev_block, new_block)?;
            cursor.block = new_block;
            cursor.next_block = crate::records::BLOCK_IDX_INVALID;
            cursor.sector = geometry.first_inode_entry_sector();
        } else if cursor.block != prev_block {
            block_pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::SpinFsLock;
    use crate::sim::{RamFlash, SimError};

    /// A small geometry: one inode entry per inode block and room for a handful of ordinary
    /// file data sectors per block, enough to exercise block-boundary crossings without large
    /// buffers. `num_blocks` is left to the caller since tests vary in how many chained inode
    /// blocks they need room for.
    fn small_geometry(num_blocks: u32) -> Geometry {
        Geometry {
            num_blocks,
            pages_per_block: 2,
            sectors_per_page: 3,
            sector_size: 32,
        }
        .validated::<SimError>()
        .unwrap()
    }

    /// A geometry with six inode entries per inode block and an 888-byte file block
    /// capacity, used by tests that need several live files or multi-block chains without
    /// the inode chain growing on every single write.
    fn wide_geometry(num_blocks: u32) -> Geometry {
        Geometry {
            num_blocks,
            pages_per_block: 4,
            sectors_per_page: 4,
            sector_size: 64,
        }
        .validated::<SimError>()
        .unwrap()
    }

    fn new_fs(geometry: Geometry) -> FileSystem<RamFlash, SpinFsLock> {
        FileSystem::new(RamFlash::new(geometry), SpinFsLock::new(), geometry).unwrap()
    }

    #[test]
    fn format_then_mount_recovers_inode0() {
        let geometry = small_geometry(8);
        let mut fs = new_fs(geometry);
        fs.format().unwrap();
        assert_eq!(fs.inode0(), Some(0));
        assert_eq!(fs.max_file_id(), Some(0));

        let mut fs = FileSystem::new(fs.into_flash(), SpinFsLock::new(), geometry).unwrap();
        fs.mount().unwrap();
        assert_eq!(fs.inode0(), Some(0));
        assert_eq!(fs.max_file_id(), Some(0));
    }

    #[test]
    fn operations_before_mount_report_not_mounted() {
        let geometry = small_geometry(8);
        let mut fs = new_fs(geometry);
        assert!(matches!(fs.open_write(b"x"), Err(Error::NotMounted)));
        assert!(matches!(fs.open_read(b"x"), Err(Error::NotMounted)));
        assert!(matches!(fs.rm(b"x"), Err(Error::NotMounted)));
    }

    #[test]
    fn open_write_rejects_an_overlong_name() {
        let geometry = small_geometry(8);
        let mut fs = new_fs(geometry);
        fs.format().unwrap();
        let name = [b'a'; MAX_FNAME_LEN + 1];
        assert!(matches!(fs.open_write(&name), Err(Error::NameTooLong)));
    }

    #[test]
    fn write_then_read_roundtrip_across_a_remount() {
        let geometry = small_geometry(8);
        let mut fs = new_fs(geometry);
        fs.format().unwrap();

        let mut w = fs.open_write(b"log").unwrap();
        let n = fs.write(&mut w, &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(n, 3);
        fs.close_write(w).unwrap();

        let mut fs = FileSystem::new(fs.into_flash(), SpinFsLock::new(), geometry).unwrap();
        fs.mount().unwrap();

        let mut r = fs.open_read(b"log").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(fs.read(&mut r, &mut buf).unwrap(), 3);
        assert_eq!(buf, [0x01, 0x02, 0x03]);
        assert_eq!(fs.read(&mut r, &mut buf[..1]).unwrap(), 0);
        fs.close_read(r).unwrap();
    }

    #[test]
    fn rm_makes_the_file_unfindable() {
        let geometry = small_geometry(8);
        let mut fs = new_fs(geometry);
        fs.format().unwrap();

        let mut w = fs.open_write(b"log").unwrap();
        fs.write(&mut w, b"hi").unwrap();
        fs.close_write(w).unwrap();

        fs.rm(b"log").unwrap();
        assert!(matches!(fs.open_read(b"log"), Err(Error::NotFound)));
        assert!(matches!(fs.rm(b"log"), Err(Error::NotFound)));
    }

    #[test]
    fn multiblock_file_spans_exactly_two_blocks() {
        let geometry = wide_geometry(16);
        let mut fs = new_fs(geometry);
        fs.format().unwrap();
        let free_before = fs.free_blocks().unwrap();

        let payload: Vec<u8> = (0..900u32).map(|i| i as u8).collect();
        let mut w = fs.open_write(b"big").unwrap();
        let n = fs.write(&mut w, &payload).unwrap();
        assert_eq!(n, payload.len());
        fs.close_write(w).unwrap();

        assert_eq!(fs.free_blocks(), Some(free_before - 2));

        let mut r = fs.open_read(b"big").unwrap();
        let mut buf = vec![0u8; payload.len()];
        assert_eq!(fs.read(&mut r, &mut buf).unwrap(), payload.len());
        assert_eq!(buf, payload);
        assert_eq!(fs.read(&mut r, &mut [0u8; 1]).unwrap(), 0);
        fs.close_read(r).unwrap();
    }

    /// SPEC_FULL.md §8 scenario 3: power loss between a file's tail-sector write (announcing
    /// a successor block) and that successor's own header write. `small_geometry`'s 120-byte
    /// block capacity (24-byte sector 0 plus three 32-byte data sectors) makes a single
    /// 120-byte write cross exactly one block boundary, with a known commit count: four
    /// sector fills (2 commits each) plus the tail write, for 9 commits before the dropped
    /// successor header.
    #[test]
    fn crash_mid_allocation_is_repaired_on_remount() {
        let geometry = small_geometry(8);
        let mut fs = new_fs(geometry);
        fs.format().unwrap();

        let mut w = fs.open_write(b"f").unwrap();
        let payload = vec![0xABu8; 120];
        fs.flash_mut().crash_after(9);
        let n = fs.write(&mut w, &payload).unwrap();
        assert_eq!(n, payload.len());
        drop(w); // the write session never reaches `close_write`

        let mut fs = FileSystem::new(fs.into_flash(), SpinFsLock::new(), geometry).unwrap();
        fs.mount().unwrap();

        let mut r = fs.open_read(b"f").unwrap();
        let mut buf = vec![0u8; payload.len()];
        assert_eq!(fs.read(&mut r, &mut buf).unwrap(), payload.len());
        assert_eq!(buf, payload);
        assert_eq!(fs.read(&mut r, &mut [0u8; 1]).unwrap(), 0);
        fs.close_read(r).unwrap();

        // The repaired successor is a normal, usable block: the filesystem as a whole is healthy.
        let mut w2 = fs.open_write(b"g").unwrap();
        fs.write(&mut w2, b"hello").unwrap();
        fs.close_write(w2).unwrap();
        let mut r2 = fs.open_read(b"g").unwrap();
        let mut buf2 = [0u8; 5];
        assert_eq!(fs.read(&mut r2, &mut buf2).unwrap(), 5);
        assert_eq!(&buf2, b"hello");
    }

    /// SPEC_FULL.md §8 scenario 4: power loss between the two invalidation-record commits of
    /// `rm` and the chain erase that follows them.
    #[test]
    fn crash_mid_deletion_is_finished_on_remount() {
        let geometry = small_geometry(8);
        let mut fs = new_fs(geometry);
        fs.format().unwrap();
        let free_before = fs.free_blocks().unwrap();

        let mut w = fs.open_write(b"f").unwrap();
        fs.write(&mut w, b"hello").unwrap();
        fs.close_write(w).unwrap();
        assert_eq!(fs.free_blocks(), Some(free_before - 1));

        fs.flash_mut().crash_after(2);
        fs.rm(b"f").unwrap();

        let mut fs = FileSystem::new(fs.into_flash(), SpinFsLock::new(), geometry).unwrap();
        fs.mount().unwrap();

        assert!(matches!(fs.open_read(b"f"), Err(Error::NotFound)));
        assert_eq!(fs.free_blocks(), Some(free_before));
    }

    #[test]
    fn bad_blocks_are_never_allocated() {
        let geometry = small_geometry(20);
        let mut flash = RamFlash::new(geometry);
        flash.mark_bad(3);
        let mut fs = FileSystem::new(flash, SpinFsLock::new(), geometry).unwrap();
        fs.format().unwrap();
        assert_eq!(fs.free_blocks(), Some(geometry.num_blocks - 2));

        for i in 0..10u32 {
            let name = format!("n{i}");
            let mut w = fs.open_write(name.as_bytes()).unwrap();
            fs.write(&mut w, b"x").unwrap();
            fs.close_write(w).unwrap();
            fs.rm(name.as_bytes()).unwrap();
        }
    }

    /// SPEC_FULL.md §8 scenario 5 / P6: repeated allocate-then-free cycles of a multi-block
    /// file should spread erases across the medium rather than wearing a handful of blocks
    /// down. Only blocks reused more than once are checked: an inode block permanently
    /// grows the chain and is allocated exactly once, so it stays at age 1 and would otherwise
    /// read as artificially "unworn".
    #[test]
    fn wear_leveling_converges_across_repeated_cycles() {
        let geometry = wide_geometry(24);
        let mut fs = new_fs(geometry);
        fs.format().unwrap();

        let cycles = 20u32;
        let payload = vec![0x5Au8; 1777]; // just over two 888-byte blocks: a 3-block file
        for _ in 0..cycles {
            let mut w = fs.open_write(b"churn").unwrap();
            fs.write(&mut w, &payload).unwrap();
            fs.close_write(w).unwrap();
            fs.rm(b"churn").unwrap();
        }

        let inode_blocks_used = (cycles + 5) / 6; // 6 entries per inode block at this geometry
        let good_blocks = geometry.num_blocks - 1 - inode_blocks_used;

        let mut ages: Vec<u32> = (1..geometry.num_blocks)
            .map(|b| fs.flash_mut().block_age_peek(b))
            .filter(|&age| age >= 2) // excludes blocks the inode chain only ever grew into once
            .collect();
        assert!(!ages.is_empty(), "expected at least one reused data block");
        ages.sort_unstable();
        let spread = ages[ages.len() - 1] - ages[0];

        let avg_blocks_per_file = 3u32;
        let bound = (cycles * avg_blocks_per_file + good_blocks - 1) / good_blocks + 1;
        assert!(
            spread <= bound,
            "wear spread {spread} exceeds expected bound {bound} (ages: {ages:?})"
        );
    }
}

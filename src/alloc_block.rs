//! Block allocation and wear leveling.
//!
//! Mount builds an [`Allocator`] from its block census instead of re-scanning the medium on
//! every call: an in-memory free-block bitmap (a [`Vob`], the same bit-vector an `ext4`
//! block-group allocator would use for its own block/inode bitmaps) plus a per-block age
//! table. A set bit here means *free* rather than *in use*, since there is no on-disk bitmap
//! to stay byte-compatible with, so the polarity is whichever reads more naturally against
//! `BlockRole::Unallocated`.

use alloc::vec;
use alloc::vec::Vec;
use vob::Vob;

use crate::error::{Error, Result};

/// Tracks which blocks are free and how worn each physical block is.
pub struct Allocator {
    /// `free[b]` is set iff block `b` is currently `UNALLOCATED`.
    free: Vob,
    /// Erase/reuse count of each physical block, regardless of current role.
    ages: Vec<u32>,
    num_free_blocks: u32,
}

impl Allocator {
    /// Creates an allocator over `num_blocks` physical blocks, all initially marked in use;
    /// the mount census populates it block by block via [`Self::mark_free`]/[`Self::mark_used`].
    pub fn new(num_blocks: u32) -> Self {
        Self {
            free: Vob::from_elem(false, num_blocks as usize),
            ages: vec![0; num_blocks as usize],
            num_free_blocks: 0,
        }
    }

    /// Records that `block` was observed `UNALLOCATED` at age `age` during the census.
    pub fn mark_free(&mut self, block: u32, age: u32) {
        if !self.free.get(block as usize).unwrap_or(false) {
            self.num_free_blocks += 1;
        }
        self.free.set(block as usize, true);
        self.ages[block as usize] = age;
    }

    /// Records that `block` was observed allocated (`INODE` or `FILE`) at age `age`.
    pub fn mark_used(&mut self, block: u32, age: u32) {
        if self.free.get(block as usize).unwrap_or(false) {
            self.num_free_blocks -= 1;
        }
        self.free.set(block as usize, false);
        self.ages[block as usize] = age;
    }

    /// Number of blocks currently `UNALLOCATED`.
    pub fn num_free_blocks(&self) -> u32 {
        self.num_free_blocks
    }

    /// Highest age observed across every block, current as of the last `mark_free`/`mark_used`/
    /// `allocate_block` call (every one of those keeps `ages` current, so this never needs its
    /// own bookkeeping).
    pub fn max_age(&self) -> u32 {
        self.ages.iter().copied().max().unwrap_or(0)
    }

    /// Picks a block to allocate: the lowest-age free block, ties broken by ascending index.
    ///
    /// Returns the chosen block and the age it should be stamped with (its previous age plus
    /// one), and marks it in use. Skips blocks the driver reports bad at the moment of
    /// selection by never marking them free in the first place; a block discovered bad
    /// later is the caller's responsibility to evict via [`Self::mark_used`] with an
    /// unreachable age so it is never picked again.
    pub fn allocate_block<E>(&mut self) -> Result<(u32, u32), E> {
        let mut best: Option<(u32, u32)> = None;
        for block in self.free.iter_set_bits(..) {
            let age = self.ages[block];
            match best {
                Some((_, best_age)) if age >= best_age => {}
                _ => best = Some((block as u32, age)),
            }
        }
        let (block, age) = best.ok_or(Error::OutOfSpace)?;
        let new_age = age + 1;
        self.mark_used(block, new_age);
        Ok((block, new_age))
    }
}

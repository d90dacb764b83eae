//! `flogfs` is a log-structured filesystem for raw NAND flash on resource-constrained
//! embedded devices.
//!
//! It is built around three hardware constraints: pages are written once between erases,
//! erase is whole-block and slow, and blocks wear out unevenly and must be load-balanced.
//! There is no journal and no cached superblock; every mount reconstructs filesystem state
//! from a single pass over the raw flash, and every operation is designed so that a power
//! loss at any instant leaves the medium in a state the next mount can either accept as-is
//! or repair deterministically.
//!
//! The crate does not talk to hardware itself. Callers implement [`flash::FlashDriver`] for
//! their own NAND controller and [`lock::FsLock`] for their own mutual-exclusion primitive
//! (a [`lock::SpinFsLock`] is provided for hosts without a richer one), then drive everything
//! through a single [`fs::FileSystem`] value.
//!
//! The namespace is flat, files are append-only and read sequentially, and there is no
//! support for directories, random-access writes, concurrent writers to one file, encryption
//! or compression.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::too_many_arguments)]

extern crate alloc;

pub mod alloc_block;
pub mod cache;
pub mod delete;
pub mod error;
pub mod file;
pub mod flash;
pub mod format;
pub mod fs;
pub mod geometry;
pub mod inode;
pub mod lock;
pub mod mount;
pub mod records;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use error::{Error, Result};
pub use file::{ReadFile, WriteFile};
pub use fs::FileSystem;
pub use geometry::Geometry;

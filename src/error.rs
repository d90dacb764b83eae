//! Error types.
//!
//! `flogfs` never panics on a flash I/O problem or a corrupt structure it can detect;
//! every fallible operation returns a [`Result`]. Unlike the original design, which
//! collapses every failure into a single `FLOG_FAILURE`, [`Error`] keeps the failure
//! classes of the design's error model distinguishable so a caller can match on cause.

use core::fmt;

/// Everything that can go wrong inside `flogfs`, generic over the flash driver's own
/// error type `E` so a driver failure is never swallowed.
#[derive(Debug)]
pub enum Error<E> {
    /// The flash driver reported a failure performing I/O.
    Flash(E),
    /// A block that was required to be good (e.g. `inode0`, or an allocation target) was
    /// reported bad by the driver.
    BadBlock,
    /// A filename was longer than [`crate::geometry::MAX_FNAME_LEN`].
    NameTooLong,
    /// Mount could not find a live `inode0` candidate anywhere on the medium.
    NoInode0,
    /// The allocator found no `UNALLOCATED` block to satisfy a request.
    OutOfSpace,
    /// No live file with the requested name exists.
    NotFound,
    /// The supplied [`crate::geometry::Geometry`] cannot host a filesystem.
    BadGeometry(&'static str),
    /// A public operation other than `format`/`mount` was called before `mount` succeeded.
    NotMounted,
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Flash(e) => write!(f, "flash I/O error: {e:?}"),
            Error::BadBlock => write!(f, "required block is bad"),
            Error::NameTooLong => write!(f, "filename exceeds the maximum length"),
            Error::NoInode0 => write!(f, "no live inode0 found while mounting"),
            Error::OutOfSpace => write!(f, "no free block available"),
            Error::NotFound => write!(f, "no such file"),
            Error::BadGeometry(why) => write!(f, "invalid geometry: {why}"),
            Error::NotMounted => write!(f, "filesystem has not been mounted"),
        }
    }
}

/// Convenience alias for results produced by this crate.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

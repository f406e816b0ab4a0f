// SPDX-License-Identifier: GPL-3.0
// sector_source.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use block_dump_source::BlockDumpSectorSource;
use compressed_source::{CompressedIndexedSectorSource, CompressedSourceConfig};
use flat_source::FlatSectorSource;
use multipart_source::MultipartSectorSource;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// This module contains the plain single-file source, which performs its reads on
/// a dedicated I/O thread.
pub mod flat_source;

/// This module contains the LSN-tagged capture format (blockdump) reader and writer.
pub mod block_dump_source;

/// This module contains the source which stitches numbered part files together.
pub mod multipart_source;

/// This module contains the randomly seekable gzip source.
pub mod compressed_source;

#[cfg(test)]
mod tests;

/// Convenience alias for results produced by sector sources.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Every failure a sector source can report. Short reads are kept apart from hard
/// I/O failures, and a sector missing from a capture is kept apart from both.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("image file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("access denied opening image file: {}", .0.display())]
    AccessDenied(PathBuf),

    #[error("read out of range: blocks {first}..{end} requested, source holds {count}")]
    OutOfRange { first: u32, end: u64, count: u32 },

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("sector {0} was not captured in this blockdump")]
    SectorNotCaptured(u32),

    #[error("invalid image format: {0}")]
    InvalidFormat(String),

    #[error("destination buffer of {actual} bytes cannot hold {expected}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("a read is already outstanding on this source")]
    ReadPending,

    #[error("no read has been submitted")]
    NoReadPending,

    #[error("I/O worker thread has stopped")]
    WorkerGone,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SourceError {

    /// Maps an error from opening a file onto the open-time variants, so callers
    /// can tell a bad path apart from a permissions problem.
    pub fn from_open(error: io::Error, path: &Path) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => SourceError::AccessDenied(path.to_path_buf()),
            _ => SourceError::Io(error),
        }
    }
}

/// Identifies which concrete implementation sits behind a `SectorSource`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Flat,
    BlockDump,
    Multipart,
    CompressedIndexed,
}

/// This trait provides an implementation-opaque way of reading fixed-size blocks
/// from whatever representation a disc image is stored in.
///
/// Exactly one read may be outstanding at a time. `submit_read` never blocks, and
/// `await_read` blocks until the most recently submitted read has finished. Using
/// the two back to back is a synchronous read; doing other work in between lets the
/// backend overlap disk latency with emulation.
pub trait SectorSource: Send {

    /// Implementations must return which kind of source they are.
    fn kind(&self) -> SourceKind;

    /// Implementations must set the block size used for subsequent reads.
    fn set_block_size(&mut self, bytes: u32);

    /// Implementations must return the current block size.
    fn block_size(&self) -> u32;

    /// Implementations must set the signed byte offset of block 0. Negative offsets
    /// read as zeros until the start of the data.
    fn set_data_offset(&mut self, offset: i64);

    /// Implementations must return the number of whole blocks available.
    fn block_count(&self) -> u32;

    /// Implementations must queue a read of `count` blocks starting at `first_block`
    /// and return without waiting for it.
    fn submit_read(&mut self, first_block: u32, count: u32) -> Result<()>;

    /// Implementations must wait for the outstanding read and copy it into `dst`,
    /// returning the number of bytes delivered.
    fn await_read(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// Implementations must drop any outstanding read so its result is never
    /// delivered. This must not block and is a no-op with nothing outstanding.
    fn cancel_read(&mut self);

    /// Sources which record their own geometry return where a stored block sits
    /// inside a raw frame. Everything else leaves this to layout detection.
    fn recorded_block_offset(&self) -> Option<u32> {
        None
    }

    /// Submits a read and waits for it straight away.
    fn read_sync(&mut self, dst: &mut [u8], first_block: u32, count: u32) -> Result<usize> {
        self.submit_read(first_block, count)?;
        self.await_read(dst)
    }
}

/// Opens whatever representation lives at the supplied path. A blockdump is
/// recognised by its magic, a gzip image by its extension, and anything else is
/// treated as a flat image with any further parts picked up next to it.
pub fn open_sector_source(
    path: &Path,
    compressed_config: CompressedSourceConfig
) -> Result<Box<dyn SectorSource>> {

    let mut flat = FlatSectorSource::open(path)?;

    if BlockDumpSectorSource::detect(&mut flat)? {
        drop(flat);
        log::info!("Block dump detected: {}", path.display());
        return Ok(Box::new(BlockDumpSectorSource::open(path)?));
    }

    if CompressedIndexedSectorSource::can_handle(path) {
        drop(flat);
        log::info!("Compressed image detected: {}", path.display());
        return Ok(Box::new(CompressedIndexedSectorSource::open(path, compressed_config)?));
    }

    MultipartSectorSource::discover(flat)
}

/// Checks a block range against the block count before any OS call is made.
pub(crate) fn check_range(first_block: u32, count: u32, block_count: u32) -> Result<()> {

    let end = first_block as u64 + count as u64;
    if count == 0 || end > block_count as u64 {
        return Err(SourceError::OutOfRange {
            first: first_block,
            end,
            count: block_count,
        });
    }

    Ok(())
}

/// Checks the destination buffer can hold what a read will produce.
pub(crate) fn check_destination(dst: &[u8], expected: usize) -> Result<()> {

    if dst.len() < expected {
        return Err(SourceError::BufferTooSmall {
            expected,
            actual: dst.len(),
        });
    }

    Ok(())
}

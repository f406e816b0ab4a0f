// SPDX-License-Identifier: GPL-3.0
// compressed_source.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use super::{
    Result, SectorSource, SourceError, SourceKind, check_destination, check_range,
};
use index::CompressionIndex;
use inflate::Inflater;
use lru::LruCache;
use std::{
    fs::File,
    io::{BufReader, Seek, SeekFrom},
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

/// This module contains the resumable gzip decoder.
pub mod inflate;

/// This module contains the checkpoint index and its sidecar file.
pub mod index;

/// Size of the decompressed chunks kept in the cache.
pub const CHUNK_SIZE: u64 = 256 * 1024;

/// Default number of cached chunks.
pub const DEFAULT_CACHED_CHUNKS: usize = 64;

/// Tunables for the compressed source.
#[derive(Clone, Copy, Debug)]
pub struct CompressedSourceConfig {
    pub span: u64,
    pub cached_chunks: usize,
}

impl Default for CompressedSourceConfig {

    fn default() -> Self {
        CompressedSourceConfig {
            span: index::DEFAULT_SPAN,
            cached_chunks: DEFAULT_CACHED_CHUNKS,
        }
    }
}

/// This struct models a gzip compressed image. Gzip can only be decompressed
/// forwards, so random reads start from the nearest checkpoint of a sparse index
/// and decompress forwards from there. Each random read therefore costs at most
/// one checkpoint span of extra decompression.
pub struct CompressedIndexedSectorSource {

    // The image and its index.
    path: PathBuf,
    file: BufReader<File>,
    index: CompressionIndex,

    // Geometry over the uncompressed stream.
    block_size: u32,
    data_offset: i64,

    // Recently decompressed chunks, keyed by chunk number.
    chunks: LruCache<u64, Vec<u8>>,

    // The read handed over on await.
    completed: Option<Result<Vec<u8>>>,
}

/// Implementation functions for the compressed source itself.
impl CompressedIndexedSectorSource {

    /// Returns true if the path looks like something this source can open.
    pub fn can_handle(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
    }

    /// Opens a gzip image, loading its index from the sidecar or building it.
    pub fn open(path: &Path, config: CompressedSourceConfig) -> Result<Self> {

        let index = CompressionIndex::load_or_build(path, config.span)?;
        let file = File::open(path).map_err(|e| SourceError::from_open(e, path))?;
        let cached_chunks = NonZeroUsize::new(config.cached_chunks).unwrap_or(NonZeroUsize::MIN);

        Ok(CompressedIndexedSectorSource {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            index,
            block_size: 2048,
            data_offset: 0,
            chunks: LruCache::new(cached_chunks),
            completed: None,
        })
    }

    /// Returns the checkpoint index in use.
    pub fn index(&self) -> &CompressionIndex {
        &self.index
    }

    /// Returns the size of the uncompressed image.
    pub fn uncompressed_size(&self) -> u64 {
        self.index.uncompressed_size
    }

    /// Copies uncompressed bytes starting at `offset` into `dst`, going through
    /// the chunk cache. Returns how many bytes were available.
    pub fn read_bytes(&mut self, offset: u64, dst: &mut [u8]) -> Result<usize> {

        let end = (offset + dst.len() as u64).min(self.index.uncompressed_size);
        let mut position = offset;

        while position < end {
            let chunk_number = position / CHUNK_SIZE;
            let chunk_start = chunk_number * CHUNK_SIZE;
            let dst_offset = (position - offset) as usize;
            let wanted = (end - position) as usize;

            if let Some(chunk) = self.chunks.get(&chunk_number) {
                position += copy_from_chunk(chunk, position - chunk_start, &mut dst[dst_offset..dst_offset + wanted]);
                continue;
            }

            let length = CHUNK_SIZE.min(self.index.uncompressed_size - chunk_start) as usize;
            let mut chunk = vec![0u8; length];
            let produced = self.extract(chunk_start, &mut chunk)?;
            if produced != length {
                return Err(SourceError::ShortRead {
                    expected: length,
                    actual: produced,
                });
            }

            position += copy_from_chunk(&chunk, position - chunk_start, &mut dst[dst_offset..dst_offset + wanted]);
            self.chunks.put(chunk_number, chunk);
        }

        Ok((end.saturating_sub(offset)) as usize)
    }

    /// Decompresses `dst.len()` bytes at `offset` without the cache: seed a decoder
    /// from the nearest checkpoint, decompress and discard up to `offset`, then
    /// decompress into `dst`.
    pub fn extract(&mut self, offset: u64, dst: &mut [u8]) -> Result<usize> {

        let checkpoint = self
            .index
            .nearest(offset)
            .ok_or_else(|| SourceError::InvalidFormat("gzip index has no checkpoints".to_string()))?;

        self.file.seek(SeekFrom::Start(checkpoint.compressed_offset))?;
        let mut inflater = Inflater::resume(
            &mut self.file,
            checkpoint.compressed_offset,
            checkpoint.bit,
            &checkpoint.window,
            checkpoint.uncompressed_offset
        )?;

        let mut discard = vec![0u8; 64 * 1024];
        while inflater.total_out() < offset && !inflater.is_finished() {
            let wanted = ((offset - inflater.total_out()) as usize).min(discard.len());
            inflater.read(&mut discard[..wanted])?;
        }

        let mut produced = 0;
        while produced < dst.len() && !inflater.is_finished() {
            produced += inflater.read(&mut dst[produced..])?;
        }

        Ok(produced)
    }

    /// Reads whole blocks, zero filling anything before the start of the data.
    fn read_blocks(&mut self, first_block: u32, count: u32) -> Result<Vec<u8>> {

        let length = count as usize * self.block_size as usize;
        let mut data = vec![0u8; length];

        let mut position = first_block as i64 * self.block_size as i64 + self.data_offset;
        let mut dst_offset = 0;
        if position < 0 {
            dst_offset = ((-position) as usize).min(length);
            position = 0;
        }

        let wanted = length - dst_offset;
        let actual = self.read_bytes(position as u64, &mut data[dst_offset..])?;
        if actual != wanted {
            return Err(SourceError::ShortRead {
                expected: length,
                actual: dst_offset + actual,
            });
        }

        Ok(data)
    }
}

impl SectorSource for CompressedIndexedSectorSource {

    fn kind(&self) -> SourceKind {
        SourceKind::CompressedIndexed
    }

    fn set_block_size(&mut self, bytes: u32) {
        self.block_size = bytes.max(1);
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn set_data_offset(&mut self, offset: i64) {
        self.data_offset = offset;
    }

    fn block_count(&self) -> u32 {

        let usable = self.index.uncompressed_size as i64 - self.data_offset;
        if usable <= 0 {
            return 0;
        }

        (usable as u64 / self.block_size as u64).min(u32::MAX as u64) as u32
    }

    fn submit_read(&mut self, first_block: u32, count: u32) -> Result<()> {

        if self.completed.is_some() {
            return Err(SourceError::ReadPending);
        }
        check_range(first_block, count, self.block_count())?;

        let result = self.read_blocks(first_block, count);
        if let Err(error) = &result {
            log::warn!("Read from {} failed: {}", self.path.display(), error);
        }
        self.completed = Some(result);

        Ok(())
    }

    fn await_read(&mut self, dst: &mut [u8]) -> Result<usize> {

        let data = self.completed.take().ok_or(SourceError::NoReadPending)??;
        check_destination(dst, data.len())?;

        dst[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn cancel_read(&mut self) {
        self.completed = None;
    }
}

/// Copies from a decompressed chunk into `dst`, returning how many bytes moved.
fn copy_from_chunk(chunk: &[u8], within: u64, dst: &mut [u8]) -> u64 {

    let within = within as usize;
    let count = (chunk.len() - within).min(dst.len());
    dst[..count].copy_from_slice(&chunk[within..within + count]);
    count as u64
}

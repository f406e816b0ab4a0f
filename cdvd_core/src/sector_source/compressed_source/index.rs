// SPDX-License-Identifier: GPL-3.0
// index.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use super::inflate::{Inflater, WINDOW_SIZE};
use crate::sector_source::{Result, SourceError};
use cdvd_utility::{read_u32_le, read_u64_le};
use std::{
    ffi::OsString,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

/// The ASCII tag every sidecar starts with. Bump the version when the layout changes.
pub const SIDECAR_TAG: &[u8] = b"CDVD.index.gzip.v1|";

/// Suffix appended to the image path to name its sidecar.
pub const SIDECAR_SUFFIX: &str = ".pindex.tmp";

/// Default uncompressed distance between checkpoints.
pub const DEFAULT_SPAN: u64 = 4 * 1024 * 1024;

/// Size of the fixed metadata block: span, uncompressed size, compressed size
/// and checkpoint count.
const METADATA_SIZE: usize = 8 + 8 + 8 + 4;

/// Size of a checkpoint record before its window bytes.
const CHECKPOINT_HEADER_SIZE: usize = 8 + 8 + 1 + 4;

/// Scratch buffer size used while scanning.
const SCAN_BUFFER_SIZE: usize = 64 * 1024;

/// A saved decompressor state: enough to resume forward decompression at a
/// deflate block boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub uncompressed_offset: u64,
    pub compressed_offset: u64,
    pub bit: u8,
    pub window: Vec<u8>,
}

impl Checkpoint {

    /// Size of this checkpoint's record in the sidecar.
    fn record_size(&self) -> usize {
        CHECKPOINT_HEADER_SIZE + self.window.len()
    }
}

/// This struct is the sparse random-access index of a gzip image. Checkpoints
/// are strictly increasing in both compressed and uncompressed offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressionIndex {
    pub span: u64,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub checkpoints: Vec<Checkpoint>,
}

impl CompressionIndex {

    /// Returns the sidecar path used for an image.
    pub fn sidecar_path(image: &Path) -> PathBuf {

        let mut name = OsString::from(image.as_os_str());
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    /// Scans the whole image once, recording a checkpoint at the first block
    /// boundary at or after every `span` bytes of output.
    pub fn build(image: &Path, span: u64) -> Result<Self> {

        let span = span.max(1);
        let file = File::open(image).map_err(|e| SourceError::from_open(e, image))?;
        let compressed_size = file.metadata()?.len();
        let mut inflater = Inflater::new_gzip(BufReader::new(file));

        let mut checkpoints: Vec<Checkpoint> = Vec::new();
        let mut scratch = vec![0u8; SCAN_BUFFER_SIZE];

        loop {
            if inflater.at_block_boundary() {
                let out = inflater.total_out();
                let due = checkpoints
                    .last()
                    .is_none_or(|last| out >= last.uncompressed_offset + span);

                if due {
                    let (compressed_offset, bit) = inflater.position();
                    checkpoints.push(Checkpoint {
                        uncompressed_offset: out,
                        compressed_offset,
                        bit,
                        window: inflater.window_snapshot(),
                    });
                }
            }

            if inflater.is_finished() {
                break;
            }
            inflater.read(&mut scratch)?;
        }

        let index = CompressionIndex {
            span,
            uncompressed_size: inflater.total_out(),
            compressed_size,
            checkpoints,
        };

        log::info!(
            "Indexed {}: {} bytes uncompressed, {} checkpoints",
            image.display(),
            index.uncompressed_size,
            index.checkpoints.len()
        );

        Ok(index)
    }

    /// Loads the sidecar for an image if it exists and is valid, otherwise scans
    /// the image and writes a fresh sidecar. A rejected sidecar is only logged.
    pub fn load_or_build(image: &Path, span: u64) -> Result<Self> {

        let compressed_size = fs::metadata(image)
            .map_err(|e| SourceError::from_open(e, image))?
            .len();
        let sidecar = Self::sidecar_path(image);

        if sidecar.is_file() {
            match Self::load(&sidecar, compressed_size) {
                Ok(index) => {
                    log::debug!("Loaded gzip index from {}", sidecar.display());
                    return Ok(index);
                },
                Err(error) => {
                    log::warn!(
                        "Rejecting gzip index {} ({}); rebuilding",
                        sidecar.display(),
                        error
                    );
                },
            }
        }

        let index = Self::build(image, span)?;
        if let Err(error) = index.save(&sidecar) {
            log::warn!("Could not write gzip index {}: {}", sidecar.display(), error);
        }

        Ok(index)
    }

    /// Reads and validates a sidecar. The file length must match the tag,
    /// metadata and checkpoint records exactly, and the recorded compressed size
    /// must match the image.
    pub fn load(sidecar: &Path, compressed_size: u64) -> Result<Self> {

        let data = fs::read(sidecar)?;
        let invalid = |reason: &str| SourceError::InvalidFormat(format!("gzip index: {}", reason));

        let header_size = SIDECAR_TAG.len() + METADATA_SIZE;
        if data.len() < header_size || &data[..SIDECAR_TAG.len()] != SIDECAR_TAG {
            return Err(invalid("bad signature"));
        }

        let metadata = &data[SIDECAR_TAG.len()..header_size];
        let span = read_u64_le(metadata, 0);
        let uncompressed_size = read_u64_le(metadata, 8);
        let recorded_size = read_u64_le(metadata, 16);
        let count = read_u32_le(metadata, 24) as usize;

        if recorded_size != compressed_size {
            return Err(invalid("image size changed"));
        }

        let mut checkpoints: Vec<Checkpoint> = Vec::with_capacity(count.min(data.len()));
        let mut position = header_size;
        for _ in 0..count {
            if position + CHECKPOINT_HEADER_SIZE > data.len() {
                return Err(invalid("truncated"));
            }

            let record = &data[position..position + CHECKPOINT_HEADER_SIZE];
            let uncompressed_offset = read_u64_le(record, 0);
            let compressed_offset = read_u64_le(record, 8);
            let bit = record[16];
            let window_length = read_u32_le(record, 17) as usize;
            position += CHECKPOINT_HEADER_SIZE;

            if bit > 7 || window_length > WINDOW_SIZE || position + window_length > data.len() {
                return Err(invalid("bad checkpoint record"));
            }

            if let Some(last) = checkpoints.last() {
                if uncompressed_offset <= last.uncompressed_offset
                    || compressed_offset <= last.compressed_offset
                {
                    return Err(invalid("checkpoints out of order"));
                }
            }

            checkpoints.push(Checkpoint {
                uncompressed_offset,
                compressed_offset,
                bit,
                window: data[position..position + window_length].to_vec(),
            });
            position += window_length;
        }

        let index = CompressionIndex {
            span,
            uncompressed_size,
            compressed_size,
            checkpoints,
        };

        if data.len() != index.encoded_length() {
            return Err(invalid("length mismatch"));
        }

        Ok(index)
    }

    /// Writes the index to a sidecar.
    pub fn save(&self, sidecar: &Path) -> Result<()> {

        let mut file = BufWriter::new(File::create(sidecar)?);

        file.write_all(SIDECAR_TAG)?;
        file.write_all(&self.span.to_le_bytes())?;
        file.write_all(&self.uncompressed_size.to_le_bytes())?;
        file.write_all(&self.compressed_size.to_le_bytes())?;
        file.write_all(&(self.checkpoints.len() as u32).to_le_bytes())?;

        for checkpoint in &self.checkpoints {
            file.write_all(&checkpoint.uncompressed_offset.to_le_bytes())?;
            file.write_all(&checkpoint.compressed_offset.to_le_bytes())?;
            file.write_all(&[checkpoint.bit])?;
            file.write_all(&(checkpoint.window.len() as u32).to_le_bytes())?;
            file.write_all(&checkpoint.window)?;
        }

        file.flush()?;
        Ok(())
    }

    /// The exact length the sidecar for this index must have.
    pub fn encoded_length(&self) -> usize {
        SIDECAR_TAG.len()
            + METADATA_SIZE
            + self.checkpoints.iter().map(Checkpoint::record_size).sum::<usize>()
    }

    /// Returns the last checkpoint at or before the uncompressed offset.
    pub fn nearest(&self, offset: u64) -> Option<&Checkpoint> {

        let after = self
            .checkpoints
            .partition_point(|c| c.uncompressed_offset <= offset);
        after.checked_sub(1).map(|i| &self.checkpoints[i])
    }
}

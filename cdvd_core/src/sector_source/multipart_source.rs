// SPDX-License-Identifier: GPL-3.0
// multipart_source.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use super::{
    Result, SectorSource, SourceError, SourceKind, check_destination, check_range,
    flat_source::FlatSectorSource,
};
use std::path::{Path, PathBuf};

/// The most parts a single image may be split into, the first included.
pub const MAX_PARTS: usize = 8;

/// One part of the image and the block range it covers.
struct Part {
    start: u32,
    end: u32,
    path: PathBuf,
    source: Box<dyn SectorSource>,
}

/// The piece of an outstanding read that was handed to one part.
struct SubmittedSpan {
    part: usize,
    dst_offset: usize,
    length: usize,
}

/// This struct models an image that was split across numbered files, for example
/// `game.iso`, `game.i00`, `game.i01`. Each part covers a contiguous range of
/// blocks directly after the one before it.
pub struct MultipartSectorSource {
    parts: Vec<Part>,
    block_size: u32,
    submitted: Option<Vec<SubmittedSpan>>,
}

/// Implementation functions for the multipart source itself.
impl MultipartSectorSource {

    /// Looks for further parts next to an opened first part. If none are found the
    /// first part is handed back as-is, otherwise every part is opened and wrapped.
    ///
    /// Part names replace the extension with its first character plus a two digit
    /// index. Numbering starts at 00, or at 01 when the first part is itself `?00`.
    pub fn discover(first: FlatSectorSource) -> Result<Box<dyn SectorSource>> {

        let first_path = first.path().to_path_buf();
        let Some(extension) = first_path.extension().and_then(|e| e.to_str()) else {
            return Ok(Box::new(first));
        };
        let Some(prefix) = extension.chars().next() else {
            return Ok(Box::new(first));
        };

        let mut index = if extension.strip_prefix(prefix) == Some("00") { 1 } else { 0 };
        if find_part(&first_path, prefix, index).is_none() {
            return Ok(Box::new(first));
        }

        log::debug!("Multi-part image .{} detected", extension.to_uppercase());

        let block_size = first.block_size();
        let first_blocks = first.block_count();
        let mut parts = vec![Part {
            start: 0,
            end: first_blocks,
            path: first_path.clone(),
            source: Box::new(first),
        }];

        while parts.len() < MAX_PARTS {
            let Some(part_path) = find_part(&first_path, prefix, index) else {
                break;
            };

            let mut source = FlatSectorSource::open(&part_path)?;
            source.set_block_size(block_size);

            let start = parts[parts.len() - 1].end;
            let end = start + source.block_count();
            log::debug!("\tblocks {} - {} in: {}", start, end, part_path.display());

            parts.push(Part {
                start,
                end,
                path: part_path,
                source: Box::new(source),
            });
            index += 1;
        }

        Ok(Box::new(MultipartSectorSource {
            parts,
            block_size,
            submitted: None,
        }))
    }

    /// Builds a multipart source from already opened parts, in order.
    pub fn from_parts(sources: Vec<(PathBuf, Box<dyn SectorSource>)>) -> Result<Self> {

        let Some(block_size) = sources.first().map(|(_, s)| s.block_size()) else {
            return Err(SourceError::InvalidFormat("multipart image without parts".to_string()));
        };

        let mut source = MultipartSectorSource {
            parts: sources
                .into_iter()
                .map(|(path, source)| Part {
                    start: 0,
                    end: 0,
                    path,
                    source,
                })
                .collect(),
            block_size,
            submitted: None,
        };

        source.set_block_size(block_size);
        Ok(source)
    }

    /// Returns the number of parts.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Returns the block range and path of every part, in order.
    pub fn layout(&self) -> Vec<(u32, u32, &Path)> {
        self.parts
            .iter()
            .map(|p| (p.start, p.end, p.path.as_path()))
            .collect()
    }

    /// Chains the part ranges together again after a geometry change.
    fn recompute_ranges(&mut self) {

        let mut blocks = 0;
        for part in self.parts.iter_mut() {
            part.start = blocks;
            blocks += part.source.block_count();
            part.end = blocks;
        }
    }

    /// Cancels every part that had a piece of the outstanding read.
    fn cancel_spans(&mut self, spans: &[SubmittedSpan]) {

        for span in spans {
            self.parts[span.part].source.cancel_read();
        }
    }
}

impl SectorSource for MultipartSectorSource {

    fn kind(&self) -> SourceKind {
        SourceKind::Multipart
    }

    fn set_block_size(&mut self, bytes: u32) {

        self.block_size = bytes;
        for part in self.parts.iter_mut() {
            part.source.set_block_size(bytes);
        }
        self.recompute_ranges();
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn set_data_offset(&mut self, offset: i64) {

        // The offset describes where block 0 sits, which only concerns the first part.
        if let Some(first) = self.parts.first_mut() {
            first.source.set_data_offset(offset);
        }
        self.recompute_ranges();
    }

    fn block_count(&self) -> u32 {
        self.parts.last().map(|p| p.end).unwrap_or(0)
    }

    fn submit_read(&mut self, first_block: u32, count: u32) -> Result<()> {

        if self.submitted.is_some() {
            return Err(SourceError::ReadPending);
        }
        check_range(first_block, count, self.block_count())?;

        let mut spans = Vec::new();
        let mut block = first_block;
        let mut remaining = count;
        let mut dst_offset = 0;

        for i in 0..self.parts.len() {
            if remaining == 0 {
                break;
            }

            let (start, end) = (self.parts[i].start, self.parts[i].end);
            if block >= end {
                continue;
            }

            let blocks = remaining.min(end - block);
            if let Err(error) = self.parts[i].source.submit_read(block - start, blocks) {
                self.cancel_spans(&spans);
                return Err(error);
            }

            let length = blocks as usize * self.block_size as usize;
            spans.push(SubmittedSpan {
                part: i,
                dst_offset,
                length,
            });

            dst_offset += length;
            block += blocks;
            remaining -= blocks;
        }

        self.submitted = Some(spans);
        Ok(())
    }

    fn await_read(&mut self, dst: &mut [u8]) -> Result<usize> {

        let spans = self.submitted.take().ok_or(SourceError::NoReadPending)?;
        let total = spans.iter().map(|s| s.length).sum();
        if let Err(error) = check_destination(dst, total) {
            self.cancel_spans(&spans);
            return Err(error);
        }

        // Every spanned part gets awaited, in order, before we return.
        for (i, span) in spans.iter().enumerate() {
            let window = &mut dst[span.dst_offset..span.dst_offset + span.length];
            if let Err(error) = self.parts[span.part].source.await_read(window) {
                self.cancel_spans(&spans[i + 1..]);
                return Err(error);
            }
        }

        Ok(total)
    }

    fn cancel_read(&mut self) {

        if let Some(spans) = self.submitted.take() {
            self.cancel_spans(&spans);
        }
    }
}

/// Returns the path of part `index` if it exists, trying the lower and upper case
/// spelling of the extension prefix.
fn find_part(first_path: &Path, prefix: char, index: u32) -> Option<PathBuf> {

    let mut candidates = vec![prefix.to_ascii_lowercase(), prefix.to_ascii_uppercase()];
    candidates.dedup();

    candidates
        .into_iter()
        .map(|c| first_path.with_extension(format!("{}{:02}", c, index)))
        .find(|p| p.is_file())
}

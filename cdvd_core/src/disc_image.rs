// SPDX-License-Identifier: GPL-3.0
// disc_image.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use crate::sector_source::{
    self, SectorSource, SourceError, SourceKind,
    compressed_source::CompressedSourceConfig,
};
use cdvd_utility::{Msf, read_u16_le};
use std::path::{Path, PathBuf};
use thiserror::Error;


/// Size of a raw CD frame.
pub const RAW_FRAME_SIZE: usize = 2352;

/// Default number of sequential blocks fetched per source read.
pub const DEFAULT_READ_AHEAD: u32 = 128;

/// The sector holding the primary volume descriptor.
pub const VOLUME_DESCRIPTOR_LSN: u32 = 16;

/// Byte offset of the user data within a raw frame.
const FRAME_DATA_OFFSET: usize = 24;

/// Byte offset of the ISO9660 standard identifier within a raw frame.
const FRAME_IDENTIFIER_OFFSET: usize = FRAME_DATA_OFFSET + 1;

/// Largest frame buffer any layout needs: raw frame plus subchannel data.
const MAX_FRAME_SIZE: usize = 2448;

/// The byte offset the leadin-shifted layouts start at.
const LEADIN_OFFSET: i64 = 150 * 2048;

/// The sync pattern that opens every raw data frame.
const SYNC_PATTERN: [u8; 12] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

/// Convenience alias for results produced by disc images.
pub type Result<T> = std::result::Result<T, DiscError>;

/// Failures when mounting or reading a disc image.
#[derive(Debug, Error)]
pub enum DiscError {
    #[error("cannot open disc image {}: {source}", path.display())]
    Configuration {
        path: PathBuf,
        #[source]
        source: SourceError,
    },

    #[error("no usable sector layout found in {}", .0.display())]
    FormatDetection(PathBuf),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// The physical kind of medium an image holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscLayout {
    Cd,
    Dvd,
    Audio,
}

/// How blocks are stored in an image: block size, byte offset of block 0 in the
/// file, and where the block sits inside a raw frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorLayout {
    pub block_size: u32,
    pub file_offset: i64,
    pub block_offset: u32,
    pub name: &'static str,
}

/// Every layout we try, in the order we try them. Ambiguous real-world images
/// depend on this order, so it must not be shuffled.
pub const DETECTION_LAYOUTS: [SectorLayout; 10] = [
    SectorLayout { block_size: 2048, file_offset: 0, block_offset: 24, name: "ISO 2048" },
    SectorLayout { block_size: 2336, file_offset: 0, block_offset: 16, name: "RAW 2336" },
    SectorLayout { block_size: 2352, file_offset: 0, block_offset: 0, name: "RAW 2352" },
    SectorLayout { block_size: 2448, file_offset: 0, block_offset: 0, name: "RAWQ 2448" },
    SectorLayout { block_size: 2048, file_offset: LEADIN_OFFSET, block_offset: 24, name: "NERO ISO 2048" },
    SectorLayout { block_size: 2352, file_offset: LEADIN_OFFSET, block_offset: 0, name: "NERO RAW 2352" },
    SectorLayout { block_size: 2448, file_offset: LEADIN_OFFSET, block_offset: 0, name: "NERO RAWQ 2448" },
    SectorLayout { block_size: 2048, file_offset: -8, block_offset: 24, name: "ISO 2048 (leadout corrected)" },
    SectorLayout { block_size: 2352, file_offset: -8, block_offset: 0, name: "RAW 2352 (leadout corrected)" },
    SectorLayout { block_size: 2448, file_offset: -8, block_offset: 0, name: "RAWQ 2448 (leadout corrected)" },
];

/// The layout an image falls back to when nothing carries a filesystem.
pub const AUDIO_LAYOUT: SectorLayout = SectorLayout {
    block_size: 2352,
    file_offset: 0,
    block_offset: 0,
    name: "Audio",
};

/// The payload widths a sector can be read with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectorMode {
    Raw2352,
    Mode2340,
    Mode2328,
    Cooked2048,
}

impl SectorMode {

    /// Returns the mode for a hardware mode code (0 = 2352 through 3 = 2048).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SectorMode::Raw2352),
            1 => Some(SectorMode::Mode2340),
            2 => Some(SectorMode::Mode2328),
            3 => Some(SectorMode::Cooked2048),
            _ => None,
        }
    }

    /// Returns the mode delivering the given number of bytes.
    pub fn from_length(length: usize) -> Option<Self> {
        match length {
            2352 => Some(SectorMode::Raw2352),
            2340 => Some(SectorMode::Mode2340),
            2328 => Some(SectorMode::Mode2328),
            2048 => Some(SectorMode::Cooked2048),
            _ => None,
        }
    }

    /// Returns the hardware mode code.
    pub fn code(self) -> u8 {
        match self {
            SectorMode::Raw2352 => 0,
            SectorMode::Mode2340 => 1,
            SectorMode::Mode2328 => 2,
            SectorMode::Cooked2048 => 3,
        }
    }

    /// Number of bytes a read in this mode delivers.
    pub fn length(self) -> usize {
        match self {
            SectorMode::Raw2352 => 2352,
            SectorMode::Mode2340 => 2340,
            SectorMode::Mode2328 => 2328,
            SectorMode::Cooked2048 => 2048,
        }
    }

    /// Where within a raw frame the delivered bytes start.
    pub fn frame_offset(self) -> usize {
        match self {
            SectorMode::Raw2352 => 0,
            SectorMode::Mode2340 => 12,
            SectorMode::Mode2328 | SectorMode::Cooked2048 => FRAME_DATA_OFFSET,
        }
    }
}

/// Tunables for opening an image.
#[derive(Clone, Copy, Debug)]
pub struct DiscImageOptions {
    pub read_ahead: u32,
    pub compressed: CompressedSourceConfig,
}

impl Default for DiscImageOptions {

    fn default() -> Self {
        DiscImageOptions {
            read_ahead: DEFAULT_READ_AHEAD,
            compressed: CompressedSourceConfig::default(),
        }
    }
}

/// Where the next finished read will come from.
enum PendingRead {
    Buffered { lsn: u32 },
    Submitted { lsn: u32, first: u32, count: u32 },
}

/// This struct models a mounted disc: one sector source plus the layout that was
/// detected on it. It turns logical sector numbers into block reads, batches
/// sequential reads and cuts the stored blocks down to the requested mode.
pub struct DiscImage {

    // The image and its storage.
    path: PathBuf,
    source: Box<dyn SectorSource>,

    // Detected geometry.
    sector_layout: SectorLayout,
    layout: DiscLayout,
    sector_count: u32,

    // Read-ahead buffer: `buffered_count` blocks starting at `buffered_first`.
    read_ahead: u32,
    buffer: Vec<u8>,
    buffered_first: u32,
    buffered_count: u32,

    // The read begun but not yet finished, and the last sector handed out.
    pending: Option<PendingRead>,
    current_lsn: Option<u32>,
}

/// Implementation functions for the disc image.
impl DiscImage {

    /// Opens an image at the supplied path and detects its layout.
    pub fn open(path: &Path, options: DiscImageOptions) -> Result<Self> {

        let source = sector_source::open_sector_source(path, options.compressed).map_err(|source| {
            DiscError::Configuration {
                path: path.to_path_buf(),
                source,
            }
        })?;

        Self::from_source(path, source, options)
    }

    /// Mounts an already opened source and detects its layout.
    pub fn from_source(
        path: &Path,
        mut source: Box<dyn SectorSource>,
        options: DiscImageOptions
    ) -> Result<Self> {

        let (sector_layout, layout) = if source.kind() == SourceKind::BlockDump {
            layout_from_block_dump(source.as_mut())
        } else {
            detect_layout(source.as_mut())
        };

        source.set_block_size(sector_layout.block_size);
        source.set_data_offset(sector_layout.file_offset);
        let sector_count = source.block_count();

        if sector_count == 0 {
            return Err(DiscError::FormatDetection(path.to_path_buf()));
        }

        log::info!(
            "Mounted {}: {} layout, {:?}, {} sectors",
            path.display(),
            sector_layout.name,
            layout,
            sector_count
        );

        // A capture only holds the sectors that were actually read, so batching
        // would trip over the gaps between them.
        let read_ahead = if source.kind() == SourceKind::BlockDump {
            1
        } else {
            options.read_ahead.max(1)
        };
        Ok(DiscImage {
            path: path.to_path_buf(),
            source,
            sector_layout,
            layout,
            sector_count,
            read_ahead,
            buffer: vec![0u8; read_ahead as usize * sector_layout.block_size as usize],
            buffered_first: 0,
            buffered_count: 0,
            pending: None,
            current_lsn: None,
        })
    }

    /// Returns the path the image was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the physical medium kind.
    pub fn layout(&self) -> DiscLayout {
        self.layout
    }

    /// Returns the detected storage layout.
    pub fn sector_layout(&self) -> SectorLayout {
        self.sector_layout
    }

    /// Returns the size of a stored block.
    pub fn block_size(&self) -> u32 {
        self.sector_layout.block_size
    }

    /// Returns where a stored block sits inside a raw frame.
    pub fn block_offset(&self) -> u32 {
        self.sector_layout.block_offset
    }

    /// Returns the number of logical sectors.
    pub fn sector_count(&self) -> u32 {
        self.sector_count
    }

    /// Returns the kind of source the image is stored in.
    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// Reads one sector in the supplied mode, returning the number of bytes written.
    pub fn read_sector(&mut self, dst: &mut [u8], lsn: u32, mode: SectorMode) -> Result<usize> {

        self.begin_read(lsn)?;
        self.finish_read(dst, mode)
    }

    /// Starts reading a sector. If it already sits in the read-ahead buffer nothing
    /// is submitted; otherwise a batch of sequential blocks starting at the sector
    /// is requested from the source.
    pub fn begin_read(&mut self, lsn: u32) -> Result<()> {

        self.cancel_read();

        if lsn >= self.buffered_first && lsn < self.buffered_first + self.buffered_count {
            self.pending = Some(PendingRead::Buffered { lsn });
            return Ok(());
        }

        let count = self.read_ahead.min(self.sector_count.saturating_sub(lsn));
        self.source.submit_read(lsn, count)?;
        self.pending = Some(PendingRead::Submitted {
            lsn,
            first: lsn,
            count,
        });

        Ok(())
    }

    /// Waits for the read started by `begin_read` and copies the sector into `dst`
    /// in the supplied mode.
    pub fn finish_read(&mut self, dst: &mut [u8], mode: SectorMode) -> Result<usize> {

        let length = mode.length();
        if dst.len() < length {
            return Err(DiscError::Source(SourceError::BufferTooSmall {
                expected: length,
                actual: dst.len(),
            }));
        }

        let lsn = match self.pending.take().ok_or(SourceError::NoReadPending)? {
            PendingRead::Buffered { lsn } => lsn,
            PendingRead::Submitted { lsn, first, count } => {
                self.buffered_count = 0;
                let bytes = count as usize * self.block_size() as usize;
                self.source.await_read(&mut self.buffer[..bytes])?;
                self.buffered_first = first;
                self.buffered_count = count;
                lsn
            },
        };

        self.current_lsn = Some(lsn);
        let synthesize_header = self.layout == DiscLayout::Cd;
        let block = self.buffered_block(lsn);
        Ok(extract_sector(
            block,
            self.sector_layout.block_offset as usize,
            lsn,
            mode,
            synthesize_header,
            &mut dst[..length]
        ))
    }

    /// Drops any read that was begun but not finished.
    pub fn cancel_read(&mut self) {

        if let Some(PendingRead::Submitted { .. }) = self.pending {
            self.source.cancel_read();
        }
        self.pending = None;
    }

    /// Returns the stored block of the most recently finished read, exactly as it
    /// sits in the image.
    pub fn last_block(&self) -> Option<(u32, &[u8])> {

        let lsn = self.current_lsn?;
        if lsn < self.buffered_first || lsn >= self.buffered_first + self.buffered_count {
            return None;
        }
        Some((lsn, self.buffered_block(lsn)))
    }

    /// Returns the stored block for a sector held in the read-ahead buffer.
    fn buffered_block(&self, lsn: u32) -> &[u8] {

        let block_size = self.block_size() as usize;
        let start = (lsn - self.buffered_first) as usize * block_size;
        &self.buffer[start..start + block_size]
    }
}

/// Tries every layout in priority order and returns the first under which sector
/// 16 carries an ISO9660 volume descriptor, or the audio layout if none does.
pub fn detect_layout(source: &mut dyn SectorSource) -> (SectorLayout, DiscLayout) {

    for candidate in DETECTION_LAYOUTS.iter() {
        source.set_block_size(candidate.block_size);
        source.set_data_offset(candidate.file_offset);

        if let Some(layout) = probe_volume_descriptor(source, candidate) {
            log::debug!("Detected {} layout", candidate.name);
            return (*candidate, layout);
        }
    }

    log::debug!("No filesystem found; treating image as audio");
    (AUDIO_LAYOUT, DiscLayout::Audio)
}

/// A blockdump records its own geometry, so only the medium kind is probed.
fn layout_from_block_dump(source: &mut dyn SectorSource) -> (SectorLayout, DiscLayout) {

    let sector_layout = SectorLayout {
        block_size: source.block_size(),
        file_offset: 0,
        block_offset: source.recorded_block_offset().unwrap_or(0),
        name: "Block dump",
    };

    let layout = probe_volume_descriptor(source, &sector_layout).unwrap_or(DiscLayout::Audio);
    (sector_layout, layout)
}

/// Reads sector 16 under a layout and, if it holds a volume descriptor, tells a
/// CD from a DVD by the root directory record.
fn probe_volume_descriptor(source: &mut dyn SectorSource, candidate: &SectorLayout) -> Option<DiscLayout> {

    if source.block_count() <= VOLUME_DESCRIPTOR_LSN {
        return None;
    }

    let block_size = candidate.block_size as usize;
    let block_offset = candidate.block_offset as usize;
    let mut frame = [0u8; MAX_FRAME_SIZE + FRAME_DATA_OFFSET];
    let window = &mut frame[block_offset..block_offset + block_size];

    if let Err(error) = source.read_sync(window, VOLUME_DESCRIPTOR_LSN, 1) {
        log::debug!("Probe of {} layout failed: {}", candidate.name, error);
        return None;
    }

    if &frame[FRAME_IDENTIFIER_OFFSET..FRAME_IDENTIFIER_OFFSET + 5] != b"CD001" {
        return None;
    }

    Some(medium_from_descriptor(&frame[FRAME_DATA_OFFSET..]))
}

/// Tells a CD from a DVD by the root directory record of a primary volume
/// descriptor: on CDs the 16-bit value at byte 166 repeats at byte 171.
pub fn medium_from_descriptor(descriptor: &[u8]) -> DiscLayout {

    if read_u16_le(descriptor, 166) == read_u16_le(descriptor, 171) {
        DiscLayout::Cd
    } else {
        DiscLayout::Dvd
    }
}

/// Cuts the requested mode's window out of a stored block. Frame bytes the block
/// doesn't cover are zero. On CDs the sync pattern and the header (BCD time of
/// `lsn + 150` plus mode byte 2) are always synthesised where the window reaches
/// them, replacing whatever the image stored there. Returns the number of bytes
/// written.
pub fn extract_sector(
    block: &[u8],
    block_offset: usize,
    lsn: u32,
    mode: SectorMode,
    synthesize_header: bool,
    dst: &mut [u8]
) -> usize {

    let window_start = mode.frame_offset();
    let window_end = window_start + mode.length();
    let stored_start = block_offset;
    let stored_end = block_offset + block.len();

    let dst = &mut dst[..mode.length()];
    dst.fill(0);

    // Intersection of what was stored and what was asked for.
    let copy_start = window_start.max(stored_start);
    let copy_end = window_end.min(stored_end);
    if copy_start < copy_end {
        dst[copy_start - window_start..copy_end - window_start]
            .copy_from_slice(&block[copy_start - stored_start..copy_end - stored_start]);
    }

    if synthesize_header {
        let msf = Msf::from_lsn(lsn).to_bcd();
        let mut prefix = [0u8; 16];
        prefix[..12].copy_from_slice(&SYNC_PATTERN);
        prefix[12..15].copy_from_slice(&msf);
        prefix[15] = 2;

        let start = window_start.min(prefix.len());
        let end = window_end.min(prefix.len());
        dst[..end - start].copy_from_slice(&prefix[start..end]);
    }

    mode.length()
}

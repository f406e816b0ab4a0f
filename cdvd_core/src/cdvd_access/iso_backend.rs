// SPDX-License-Identifier: GPL-3.0
// iso_backend.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use super::{
    AUDIO_TRACK, AccessError, CdvdBackend, CdvdConfig, MODE1_TRACK, Result, TrackDescriptor,
    TrackNumbers, TrayStatus,
};
use crate::{
    disc_image::{DiscImage, DiscImageOptions, DiscLayout, SectorMode},
    sector_source::block_dump_source::{BlockDumpHeader, BlockDumpWriter},
};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

/// Records every distinct sector read into a blockdump.
struct BlockDumpRecorder {
    writer: BlockDumpWriter,
    recorded: HashSet<u32>,
}

/// This struct is the backend that serves reads from a disc image file.
pub struct IsoBackend {

    // Settings taken from the router's configuration.
    options: DiscImageOptions,
    block_dump_path: Option<PathBuf>,

    // The mounted image and the sector and mode of the read it has in flight.
    image: Option<DiscImage>,
    pending_read: Option<(u32, SectorMode)>,

    // Optional capture of everything read.
    recorder: Option<BlockDumpRecorder>,

    tray: TrayStatus,
}

/// Implementation functions for the image backend.
impl IsoBackend {

    /// Creates a new IsoBackend object with the correct initial state.
    pub fn new(config: &CdvdConfig) -> Self {
        IsoBackend {
            options: config.image_options(),
            block_dump_path: config.block_dump_path.clone(),
            image: None,
            pending_read: None,
            recorder: None,
            tray: TrayStatus::CLOSED,
        }
    }

    /// Returns the mounted image, if any.
    pub fn image(&self) -> Option<&DiscImage> {
        self.image.as_ref()
    }

    /// Returns the mounted image if the tray is closed.
    fn readable_image(&mut self) -> Result<&mut DiscImage> {

        if self.tray == TrayStatus::OPEN {
            return Err(AccessError::NoDisc);
        }
        self.image.as_mut().ok_or(AccessError::NoDisc)
    }

    /// Appends the sector just read to the blockdump, once per sector.
    fn record_last_block(&mut self) {

        let (Some(image), Some(recorder)) = (self.image.as_ref(), self.recorder.as_mut()) else {
            return;
        };
        let Some((lsn, block)) = image.last_block() else {
            return;
        };

        if !recorder.recorded.insert(lsn) {
            return;
        }

        if let Err(error) = recorder.writer.write_sector(lsn, block) {
            log::warn!("Blockdump recording stopped: {}", error);
            self.recorder = None;
        }
    }

    /// Starts the outstanding track read again after a synchronous read displaced it.
    fn resume_pending_read(&mut self) {

        let Some((lsn, _)) = self.pending_read else {
            return;
        };

        let resumed = match self.readable_image() {
            Ok(image) => image.begin_read(lsn).map_err(AccessError::from),
            Err(error) => Err(error),
        };
        if let Err(error) = resumed {
            log::warn!("Could not resume read of sector {}: {}", lsn, error);
            self.pending_read = None;
        }
    }

    /// Starts a blockdump for the freshly mounted image.
    fn start_recording(&mut self, path: &Path) {

        let Some(image) = self.image.as_ref() else {
            return;
        };

        let header = BlockDumpHeader {
            block_size: image.block_size(),
            block_count: image.sector_count(),
            block_offset: image.block_offset() as i32,
        };

        match BlockDumpWriter::create(path, header) {
            Ok(writer) => {
                self.recorder = Some(BlockDumpRecorder {
                    writer,
                    recorded: HashSet::new(),
                });
            },
            Err(error) => log::warn!("Could not start blockdump {}: {}", path.display(), error),
        }
    }

    /// Flushes and drops the blockdump, if one is being written.
    fn stop_recording(&mut self) {

        if let Some(recorder) = self.recorder.take() {
            let written = recorder.writer.written();
            match recorder.writer.finish() {
                Ok(()) => log::info!("Blockdump finished with {} sectors", written),
                Err(error) => log::warn!("Could not finish blockdump: {}", error),
            }
        }
    }
}

impl CdvdBackend for IsoBackend {

    fn name(&self) -> &str {
        "ISO"
    }

    fn open(&mut self, path: &Path) -> Result<()> {

        self.close();

        let image = DiscImage::open(path, self.options)?;
        self.image = Some(image);
        self.tray = TrayStatus::CLOSED;

        if let Some(dump_path) = self.block_dump_path.clone() {
            self.start_recording(&dump_path);
        }

        Ok(())
    }

    fn close(&mut self) {

        self.stop_recording();
        self.pending_read = None;
        self.image = None;
    }

    fn has_media(&self) -> bool {
        self.image.is_some() && self.tray == TrayStatus::CLOSED
    }

    fn read_sector(&mut self, dst: &mut [u8], lsn: u32, mode: SectorMode) -> Result<usize> {

        let result = match self.readable_image() {
            Ok(image) => image.read_sector(dst, lsn, mode).map_err(AccessError::from),
            Err(error) => Err(error),
        };
        if result.is_ok() {
            self.record_last_block();
        }

        self.resume_pending_read();
        result
    }

    fn read_track(&mut self, lsn: u32, mode: SectorMode) -> Result<()> {

        self.pending_read = None;
        self.readable_image()?.begin_read(lsn)?;
        self.pending_read = Some((lsn, mode));
        Ok(())
    }

    fn get_buffer(&mut self, dst: &mut [u8]) -> Result<usize> {

        let (_, mode) = self
            .pending_read
            .take()
            .ok_or_else(|| AccessError::Backend("no track read in progress".to_string()))?;
        let written = self.readable_image()?.finish_read(dst, mode)?;
        self.record_last_block();
        Ok(written)
    }

    fn get_tn(&self) -> Result<TrackNumbers> {

        if !self.has_media() {
            return Err(AccessError::NoDisc);
        }

        Ok(TrackNumbers {
            first: 1,
            last: 1,
        })
    }

    fn get_td(&self, track: u8) -> Result<TrackDescriptor> {

        let image = match (&self.image, self.tray) {
            (Some(image), TrayStatus::CLOSED) => image,
            _ => return Err(AccessError::NoDisc),
        };

        match track {
            0 => Ok(TrackDescriptor {
                lsn: image.sector_count(),
                track_type: 0,
            }),
            1 => Ok(TrackDescriptor {
                lsn: 0,
                track_type: if image.layout() == DiscLayout::Audio {
                    AUDIO_TRACK
                } else {
                    MODE1_TRACK
                },
            }),
            _ => Err(AccessError::InvalidTrack(track)),
        }
    }

    fn get_tray_status(&self) -> TrayStatus {
        self.tray
    }

    fn ctrl_tray_open(&mut self) -> Result<()> {

        if let Some(image) = self.image.as_mut() {
            image.cancel_read();
        }
        self.pending_read = None;
        self.tray = TrayStatus::OPEN;
        Ok(())
    }

    fn ctrl_tray_close(&mut self) -> Result<()> {

        self.tray = TrayStatus::CLOSED;
        Ok(())
    }
}

impl Drop for IsoBackend {

    fn drop(&mut self) {
        self.stop_recording();
    }
}

// SPDX-License-Identifier: GPL-3.0
// cdvd_access.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use crate::{
    disc_image::{DEFAULT_READ_AHEAD, DiscError, DiscImageOptions, SectorMode},
    disc_type::{DiscDetection, DiscType, DiscTypeDetector},
    sector_source::compressed_source::{CompressedSourceConfig, DEFAULT_CACHED_CHUNKS, index::DEFAULT_SPAN},
};
use no_disc_backend::NoDiscBackend;
use iso_backend::IsoBackend;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// This module contains the backend that reads disc images.
pub mod iso_backend;

/// This module contains the backend used when no disc is inserted.
pub mod no_disc_backend;


/// Track type reported for audio tracks.
pub const AUDIO_TRACK: u8 = 0x01;

/// Track type reported for mode 1 data tracks.
pub const MODE1_TRACK: u8 = 0x41;

/// Track type reported for mode 2 data tracks.
pub const MODE2_TRACK: u8 = 0x61;

/// Convenience alias for results produced by backends and the router.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Failures reported through the access router.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("no disc is inserted")]
    NoDisc,

    #[error("track {0} does not exist")]
    InvalidTrack(u8),

    #[error(transparent)]
    Disc(#[from] DiscError),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// First and last track number on the medium.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackNumbers {
    pub first: u8,
    pub last: u8,
}

/// Start and type of a track. Track 0 describes the lead-out, so its LSN is the
/// total sector count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub lsn: u32,
    pub track_type: u8,
}

impl TrackDescriptor {

    /// Returns true if this track holds audio rather than data.
    pub fn is_audio(&self) -> bool {
        self.track_type == AUDIO_TRACK
    }
}

/// Physical state of the disc tray.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TrayStatus {
    CLOSED = 0,
    OPEN = 1,
}

/// Settings shared by everything behind the router.
#[derive(Clone, Debug)]
pub struct CdvdConfig {

    // Image reading.
    pub read_ahead: u32,
    pub checkpoint_span: u64,
    pub cached_chunks: usize,

    // Where to record a blockdump of every sector read, if anywhere.
    pub block_dump_path: Option<PathBuf>,

    // Shortens the emulated sector read time.
    pub fast_cdvd: bool,
}

impl Default for CdvdConfig {

    fn default() -> Self {
        CdvdConfig {
            read_ahead: DEFAULT_READ_AHEAD,
            checkpoint_span: DEFAULT_SPAN,
            cached_chunks: DEFAULT_CACHED_CHUNKS,
            block_dump_path: None,
            fast_cdvd: false,
        }
    }
}

impl CdvdConfig {

    /// Returns the options used to open disc images.
    pub fn image_options(&self) -> DiscImageOptions {
        DiscImageOptions {
            read_ahead: self.read_ahead,
            compressed: CompressedSourceConfig {
                span: self.checkpoint_span,
                cached_chunks: self.cached_chunks,
            },
        }
    }
}

/// This trait provides an implementation-opaque way of reaching whatever is
/// standing in for the disc drive: an image reader, an empty drive, or an
/// external plugin. The same fixed set of operations serves all of them.
pub trait CdvdBackend: Send {

    /// Implementations must return a short name for logging.
    fn name(&self) -> &str;

    /// Implementations must make the medium at the supplied path available.
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Implementations must release the medium. Closing twice is harmless.
    fn close(&mut self);

    /// Implementations must return true if a readable medium is present.
    fn has_media(&self) -> bool;

    /// Implementations must read one sector in the supplied mode.
    fn read_sector(&mut self, dst: &mut [u8], lsn: u32, mode: SectorMode) -> Result<usize>;

    /// Implementations must start reading one sector without waiting for it.
    fn read_track(&mut self, lsn: u32, mode: SectorMode) -> Result<()>;

    /// Implementations must deliver the sector started by `read_track`.
    fn get_buffer(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// Implementations must return the first and last track numbers.
    fn get_tn(&self) -> Result<TrackNumbers>;

    /// Implementations must describe a track, with track 0 being the lead-out.
    fn get_td(&self, track: u8) -> Result<TrackDescriptor>;

    /// Implementations must return the tray position.
    fn get_tray_status(&self) -> TrayStatus;

    /// Implementations must open the tray.
    fn ctrl_tray_open(&mut self) -> Result<()>;

    /// Implementations must close the tray.
    fn ctrl_tray_close(&mut self) -> Result<()>;

    /// Backends that know their disc type without looking at the filesystem
    /// may report it here.
    fn disk_type_hint(&mut self) -> Option<DiscType> {
        None
    }
}

/// Which kind of backend the router should use.
pub enum CdvdSource {
    Iso,
    NoDisc,
    Plugin(Box<dyn CdvdBackend>),
}

/// Identifies the kind of backend in use without carrying it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CdvdSourceType {
    Iso,
    NoDisc,
    Plugin,
}

/// Callback fired whenever a new disc has been opened.
pub type NewDiskCallback = Box<dyn FnMut() + Send>;

/// This struct is the single entry point the rest of the emulator uses to reach
/// the disc. It owns the active backend, caches the detected disc type, and
/// lets the backend be swapped at runtime.
pub struct DiscAccessRouter {

    // Settings and the active backend.
    config: CdvdConfig,
    backend: Box<dyn CdvdBackend>,
    source_type: CdvdSourceType,

    // Cached result of disc type detection, cleared on media change.
    detection: Option<DiscDetection>,

    // Fired after every successful open.
    new_disk_callback: Option<NewDiskCallback>,
}

/// Implementation functions for the router.
impl DiscAccessRouter {

    /// Creates a new DiscAccessRouter object with the correct initial state: an
    /// empty drive.
    pub fn new(config: CdvdConfig) -> Self {
        DiscAccessRouter {
            config,
            backend: Box::new(NoDiscBackend::new()),
            source_type: CdvdSourceType::NoDisc,
            detection: None,
            new_disk_callback: None,
        }
    }

    /// Returns the active settings.
    pub fn config(&self) -> &CdvdConfig {
        &self.config
    }

    /// Returns which kind of backend is active.
    pub fn source_type(&self) -> CdvdSourceType {
        self.source_type
    }

    /// Returns the name of the active backend.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Closes the current backend and switches to another.
    pub fn change_source(&mut self, source: CdvdSource) {

        self.backend.close();
        self.detection = None;

        let (backend, source_type): (Box<dyn CdvdBackend>, CdvdSourceType) = match source {
            CdvdSource::Iso => (Box::new(IsoBackend::new(&self.config)), CdvdSourceType::Iso),
            CdvdSource::NoDisc => (Box::new(NoDiscBackend::new()), CdvdSourceType::NoDisc),
            CdvdSource::Plugin(plugin) => (plugin, CdvdSourceType::Plugin),
        };

        log::info!("CDVD source changed to {}", backend.name());
        self.backend = backend;
        self.source_type = source_type;
    }

    /// Opens a disc in the active backend and notifies the new disc callback.
    pub fn open(&mut self, path: &Path) -> Result<()> {

        self.detection = None;
        if let Err(error) = self.backend.open(path) {
            log::error!("Failed to open {} with {}: {}", path.display(), self.backend.name(), error);
            return Err(error);
        }

        if let Some(callback) = self.new_disk_callback.as_mut() {
            callback();
        }

        Ok(())
    }

    /// Closes the disc in the active backend.
    pub fn close(&mut self) {

        self.backend.close();
        self.detection = None;
    }

    /// Reads one sector synchronously.
    pub fn read_sector(&mut self, dst: &mut [u8], lsn: u32, mode: SectorMode) -> Result<usize> {
        self.backend.read_sector(dst, lsn, mode)
    }

    /// Starts reading one sector.
    pub fn read_track(&mut self, lsn: u32, mode: SectorMode) -> Result<()> {
        self.backend.read_track(lsn, mode)
    }

    /// Delivers the sector started by `read_track`.
    pub fn get_buffer(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.backend.get_buffer(dst)
    }

    /// Returns the first and last track numbers.
    pub fn get_tn(&self) -> Result<TrackNumbers> {
        self.backend.get_tn()
    }

    /// Describes a track.
    pub fn get_td(&self, track: u8) -> Result<TrackDescriptor> {
        self.backend.get_td(track)
    }

    /// Returns the disc type, detecting it on first use after a media change.
    pub fn get_disk_type(&mut self) -> DiscType {
        self.detect_disc().disc_type
    }

    /// Returns the full detection result, detecting it on first use after a
    /// media change.
    pub fn detect_disc(&mut self) -> &DiscDetection {

        let backend = self.backend.as_mut();
        self.detection.get_or_insert_with(|| {
            let detection = match backend.disk_type_hint() {
                Some(disc_type) => DiscDetection::from_type(disc_type),
                None => DiscTypeDetector::detect(backend),
            };
            log::info!("Disc type: {}", detection.disc_type);
            detection
        })
    }

    /// Returns the tray position.
    pub fn get_tray_status(&self) -> TrayStatus {
        self.backend.get_tray_status()
    }

    /// Opens the tray, which counts as a media change.
    pub fn ctrl_tray_open(&mut self) -> Result<()> {

        self.detection = None;
        self.backend.ctrl_tray_open()
    }

    /// Closes the tray, which counts as a media change.
    pub fn ctrl_tray_close(&mut self) -> Result<()> {

        self.detection = None;
        self.backend.ctrl_tray_close()
    }

    /// Sets the callback fired after a disc is opened.
    pub fn set_new_disk_callback(&mut self, callback: NewDiskCallback) {
        self.new_disk_callback = Some(callback);
    }
}

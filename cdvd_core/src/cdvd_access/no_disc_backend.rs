// SPDX-License-Identifier: GPL-3.0
// no_disc_backend.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use super::{AccessError, CdvdBackend, Result, TrackDescriptor, TrackNumbers, TrayStatus};
use crate::{disc_image::SectorMode, disc_type::DiscType};
use std::path::Path;

/// This struct models an empty drive. Every read fails and the disc type is
/// always "no disc".
pub struct NoDiscBackend {
    tray: TrayStatus,
}

impl NoDiscBackend {

    /// Creates a new NoDiscBackend object with the correct initial state.
    pub fn new() -> Self {
        NoDiscBackend {
            tray: TrayStatus::CLOSED,
        }
    }
}

impl CdvdBackend for NoDiscBackend {

    fn name(&self) -> &str {
        "No disc"
    }

    fn open(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn has_media(&self) -> bool {
        false
    }

    fn read_sector(&mut self, _dst: &mut [u8], _lsn: u32, _mode: SectorMode) -> Result<usize> {
        Err(AccessError::NoDisc)
    }

    fn read_track(&mut self, _lsn: u32, _mode: SectorMode) -> Result<()> {
        Err(AccessError::NoDisc)
    }

    fn get_buffer(&mut self, _dst: &mut [u8]) -> Result<usize> {
        Err(AccessError::NoDisc)
    }

    fn get_tn(&self) -> Result<TrackNumbers> {
        Err(AccessError::NoDisc)
    }

    fn get_td(&self, _track: u8) -> Result<TrackDescriptor> {
        Err(AccessError::NoDisc)
    }

    fn get_tray_status(&self) -> TrayStatus {
        self.tray
    }

    fn ctrl_tray_open(&mut self) -> Result<()> {

        self.tray = TrayStatus::OPEN;
        Ok(())
    }

    fn ctrl_tray_close(&mut self) -> Result<()> {

        self.tray = TrayStatus::CLOSED;
        Ok(())
    }

    fn disk_type_hint(&mut self) -> Option<DiscType> {
        Some(DiscType::NODISC)
    }
}

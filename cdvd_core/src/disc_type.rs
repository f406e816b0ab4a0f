// SPDX-License-Identifier: GPL-3.0
// disc_type.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use crate::{
    cdvd_access::CdvdBackend,
    disc_image::{DiscLayout, SectorMode, VOLUME_DESCRIPTOR_LSN, medium_from_descriptor},
};
use iso_fs::{IsoError, IsoFilesystem};
use std::fmt;

/// This module contains a minimal read-only ISO9660/Joliet walker.
pub mod iso_fs;


/// Single layer media whose lead-out lies beyond this LSN must be DVDs.
const MAX_CD_LSN: u32 = 452849;

/// Largest boot configuration file we are prepared to read.
const MAX_CONFIG_SIZE: usize = 64 * 1024;

/// This enum represents every disc type the drive can report.
/// Integer codes are the ones the hardware uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DiscType {
    NODISC = 0x00,
    DETCT = 0x01,
    DETCTCD = 0x02,
    DETCTDVDS = 0x03,
    DETCTDVDD = 0x04,
    UNKNOWN = 0x05,
    PSCD = 0x10,
    PSCDDA = 0x11,
    PS2CD = 0x12,
    PS2CDDA = 0x13,
    PS2DVD = 0x14,
    CDDA = 0xFD,
    DVDV = 0xFE,
    ILLEGAL = 0xFF,
}

impl DiscType {

    /// Returns the hardware code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns true for the PlayStation 1 types.
    pub fn is_ps1(self) -> bool {
        matches!(self, DiscType::PSCD | DiscType::PSCDDA)
    }

    /// Returns true for types which carry audio tracks.
    pub fn has_audio(self) -> bool {
        matches!(self, DiscType::PSCDDA | DiscType::PS2CDDA | DiscType::CDDA)
    }
}

impl fmt::Display for DiscType {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {

        let name = match self {
            DiscType::NODISC => "No Disc",
            DiscType::DETCT => "Detecting",
            DiscType::DETCTCD => "Detecting CD",
            DiscType::DETCTDVDS => "Detecting DVD single layer",
            DiscType::DETCTDVDD => "Detecting DVD dual layer",
            DiscType::UNKNOWN => "Unknown",
            DiscType::PSCD => "PS1 CD",
            DiscType::PSCDDA => "PS1 CD with audio",
            DiscType::PS2CD => "PS2 CD",
            DiscType::PS2CDDA => "PS2 CD with audio",
            DiscType::PS2DVD => "PS2 DVD",
            DiscType::CDDA => "Audio CD",
            DiscType::DVDV => "DVD Video",
            DiscType::ILLEGAL => "Illegal",
        };
        write!(f, "{}", name)
    }
}

/// What detection found out about a disc.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscDetection {
    pub disc_type: DiscType,
    pub boot_executable: Option<String>,
    pub serial: Option<String>,
}

impl DiscDetection {

    /// A detection result carrying only a type.
    pub fn from_type(disc_type: DiscType) -> Self {
        DiscDetection {
            disc_type,
            boot_executable: None,
            serial: None,
        }
    }

    /// A detection result for a disc that boots the supplied executable.
    fn booting(disc_type: DiscType, boot_executable: String) -> Self {

        let serial = serial_from_boot_path(&boot_executable);
        DiscDetection {
            disc_type,
            boot_executable: Some(boot_executable),
            serial,
        }
    }
}

/// This struct classifies the medium behind a backend, from its track table and
/// the marker files on its filesystem. Detection is best effort: anything it
/// cannot read or make sense of ends up as `ILLEGAL`.
pub struct DiscTypeDetector;

impl DiscTypeDetector {

    /// Classifies the medium.
    pub fn detect(medium: &mut dyn CdvdBackend) -> DiscDetection {

        if !medium.has_media() {
            return DiscDetection::from_type(DiscType::NODISC);
        }

        let Ok(tracks) = medium.get_tn() else {
            log::warn!("Disc has no readable track table");
            return DiscDetection::from_type(DiscType::ILLEGAL);
        };

        let is_dvd = if tracks.last > tracks.first {
            false
        } else {
            match medium.get_td(0) {
                Ok(lead_out) if lead_out.lsn > MAX_CD_LSN => true,
                Ok(_) => Self::descriptor_says_dvd(medium),
                Err(_) => return DiscDetection::from_type(DiscType::ILLEGAL),
            }
        };

        let mut audio_tracks = 0;
        let mut data_tracks = 0;
        for track in tracks.first..=tracks.last {
            match medium.get_td(track) {
                Ok(descriptor) if descriptor.is_audio() => audio_tracks += 1,
                Ok(_) => data_tracks += 1,
                Err(error) => log::debug!("Track {} unreadable: {}", track, error),
            }
        }

        let mut detection = DiscDetection::from_type(DiscType::ILLEGAL);
        if data_tracks > 0 {
            detection = Self::check_filesystem(medium, is_dvd);
        }

        if audio_tracks > 0 {
            detection.disc_type = match detection.disc_type {
                DiscType::PS2CD => DiscType::PS2CDDA,
                DiscType::PSCD => DiscType::PSCDDA,
                _ => DiscType::CDDA,
            };
        }

        detection
    }

    /// Classifies a data disc by its marker files.
    pub fn check_filesystem(medium: &mut dyn CdvdBackend, is_dvd: bool) -> DiscDetection {

        let mut filesystem = match IsoFilesystem::mount(medium) {
            Ok(filesystem) => filesystem,
            Err(error) => {
                log::debug!("No usable filesystem: {}", error);
                return DiscDetection::from_type(DiscType::ILLEGAL);
            },
        };

        match filesystem.find_file("SYSTEM.CNF") {
            Ok(record) => {
                let config = match filesystem.read_file(&record, MAX_CONFIG_SIZE) {
                    Ok(config) => config,
                    Err(error) => {
                        log::warn!("Could not read SYSTEM.CNF: {}", error);
                        return DiscDetection::from_type(DiscType::ILLEGAL);
                    },
                };
                return Self::classify_boot_config(&config, is_dvd);
            },
            Err(IsoError::NotFound(_)) => {},
            Err(error) => {
                log::warn!("Could not search for SYSTEM.CNF: {}", error);
                return DiscDetection::from_type(DiscType::ILLEGAL);
            },
        }

        let markers = [
            ("P2L_0100.02", DiscType::PS2DVD),
            ("PSX.EXE", DiscType::PSCD),
            ("VIDEO_TS/VIDEO_TS.IFO", DiscType::DVDV),
        ];

        for (path, disc_type) in markers {
            if filesystem.find_file(path).is_ok() {
                return DiscDetection::from_type(disc_type);
            }
        }

        DiscDetection::from_type(DiscType::ILLEGAL)
    }

    /// Classifies a disc by the contents of its SYSTEM.CNF.
    fn classify_boot_config(config: &[u8], is_dvd: bool) -> DiscDetection {

        let text = String::from_utf8_lossy(config);
        let entries = parse_boot_config(&text);

        let boot2 = entries.iter().find(|(key, _)| key.eq_ignore_ascii_case("BOOT2"));
        if let Some((_, path)) = boot2 {
            let disc_type = if is_dvd {
                DiscType::PS2DVD
            } else {
                DiscType::PS2CD
            };
            return DiscDetection::booting(disc_type, path.clone());
        }

        let boot = entries.iter().find(|(key, _)| key.eq_ignore_ascii_case("BOOT"));
        if let Some((_, path)) = boot {
            return DiscDetection::booting(DiscType::PSCD, path.clone());
        }

        DiscDetection::from_type(DiscType::ILLEGAL)
    }

    /// Checks the volume descriptor of a single track disc.
    fn descriptor_says_dvd(medium: &mut dyn CdvdBackend) -> bool {

        let mut descriptor = [0u8; 2048];
        match medium.read_sector(&mut descriptor, VOLUME_DESCRIPTOR_LSN, SectorMode::Cooked2048) {
            Ok(_) if &descriptor[1..6] == b"CD001" => {
                medium_from_descriptor(&descriptor) == DiscLayout::Dvd
            },
            _ => false,
        }
    }
}

/// Splits a boot configuration into `KEY = value` pairs.
pub fn parse_boot_config(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Derives a disc serial from a boot executable path, for example
/// `cdrom0:\SLUS_200.71;1` becomes `SLUS-20071`.
pub fn serial_from_boot_path(path: &str) -> Option<String> {

    let name = path.rsplit(['\\', '/', ':']).next()?;
    let name = name.split(';').next()?.trim();

    let (prefix, number) = name.split_once('_')?;
    let number: String = number.chars().filter(|c| *c != '.').collect();

    if prefix.is_empty() || number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    Some(format!("{}-{}", prefix.to_ascii_uppercase(), number))
}

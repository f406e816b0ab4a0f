// SPDX-License-Identifier: GPL-3.0
// test_support.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

// Shared fixtures for the unit tests: a tiny ISO9660 image builder and an
// in-memory backend which serves its sectors.

use crate::{
    cdvd_access::{
        AUDIO_TRACK, AccessError, CdvdBackend, MODE1_TRACK, Result, TrackDescriptor,
        TrackNumbers, TrayStatus,
    },
    disc_image::{SectorMode, extract_sector},
};
use std::{collections::HashSet, path::Path};

/// Size of a cooked sector.
pub const SECTOR: usize = 2048;

/// One file to place on the image.
struct BuilderFile {
    directory: Option<String>,
    iso_name: String,
    joliet_name: String,
    data: Vec<u8>,
}

/// Builds minimal ISO9660 images: a primary volume descriptor, an optional
/// Joliet descriptor, a root directory and at most one level of subdirectories.
pub struct IsoBuilder {
    files: Vec<BuilderFile>,
    joliet: bool,
    root_length_override: Option<u32>,
}

impl IsoBuilder {

    pub fn new() -> Self {
        IsoBuilder {
            files: Vec::new(),
            joliet: false,
            root_length_override: None,
        }
    }

    /// Adds a Joliet tree alongside the ISO9660 one.
    pub fn joliet(mut self) -> Self {
        self.joliet = true;
        self
    }

    /// Records a different root directory length in the primary descriptor.
    pub fn root_length(mut self, length: u32) -> Self {
        self.root_length_override = Some(length);
        self
    }

    /// Adds a file. `path` is `NAME` or `DIR/NAME`; the ISO9660 tree gets the
    /// name with a `;1` suffix.
    pub fn file(self, path: &str, data: &[u8]) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        self.file_with_joliet_name(path, &name, data)
    }

    /// Adds a file whose Joliet name differs from its ISO9660 name.
    pub fn file_with_joliet_name(mut self, path: &str, joliet_name: &str, data: &[u8]) -> Self {

        let (directory, name) = match path.split_once('/') {
            Some((directory, name)) => (Some(directory.to_string()), name),
            None => (None, path),
        };

        self.files.push(BuilderFile {
            directory,
            iso_name: format!("{};1", name),
            joliet_name: joliet_name.to_string(),
            data: data.to_vec(),
        });
        self
    }

    /// Produces the image as a run of 2048-byte sectors.
    pub fn build(self) -> Vec<u8> {

        let mut directories: Vec<String> = Vec::new();
        for file in &self.files {
            if let Some(directory) = &file.directory {
                if !directories.contains(directory) {
                    directories.push(directory.clone());
                }
            }
        }

        // Sector allocation.
        let mut next = 17u32;
        let joliet_descriptor = if self.joliet {
            next += 1;
            Some(next - 1)
        } else {
            None
        };
        let terminator = next;
        next += 1;

        let trees = if self.joliet { 2 } else { 1 };
        let mut directory_lsns = Vec::new();
        for tree in 0..trees {
            let root = next;
            next += match (tree, self.root_length_override) {
                (0, Some(length)) => (length as usize).div_ceil(SECTOR).max(1) as u32,
                _ => 1,
            };
            let subdirectories: Vec<u32> = directories.iter().map(|_| {
                next += 1;
                next - 1
            }).collect();
            directory_lsns.push((root, subdirectories));
        }

        let mut file_lsns = Vec::new();
        for file in &self.files {
            file_lsns.push(next);
            next += (file.data.len().div_ceil(SECTOR)).max(1) as u32;
        }

        let mut image = vec![0u8; next as usize * SECTOR];

        // Directory sectors for each tree.
        for (tree, (root, subdirectories)) in directory_lsns.iter().enumerate() {
            let joliet = tree == 1;

            let mut root_records = vec![
                directory_record(&[0], *root, SECTOR as u32, true),
                directory_record(&[1], *root, SECTOR as u32, true),
            ];
            for (i, directory) in directories.iter().enumerate() {
                root_records.push(directory_record(
                    &encode_name(directory, joliet),
                    subdirectories[i],
                    SECTOR as u32,
                    true,
                ));
            }

            for (i, directory) in directories.iter().enumerate() {
                let mut records = vec![
                    directory_record(&[0], subdirectories[i], SECTOR as u32, true),
                    directory_record(&[1], *root, SECTOR as u32, true),
                ];
                for (file, lsn) in self.files.iter().zip(&file_lsns) {
                    if file.directory.as_ref() == Some(directory) {
                        records.push(file_record(file, *lsn, joliet));
                    }
                }
                write_records(&mut image, subdirectories[i], &records);
            }

            for (file, lsn) in self.files.iter().zip(&file_lsns) {
                if file.directory.is_none() {
                    root_records.push(file_record(file, *lsn, joliet));
                }
            }
            write_records(&mut image, *root, &root_records);
        }

        // File contents.
        for (file, lsn) in self.files.iter().zip(&file_lsns) {
            let start = *lsn as usize * SECTOR;
            image[start..start + file.data.len()].copy_from_slice(&file.data);
        }

        // Volume descriptors.
        let primary_root = directory_lsns[0].0;
        let mut primary = descriptor(1, primary_root);
        if let Some(length) = self.root_length_override {
            primary[166..170].copy_from_slice(&length.to_le_bytes());
            primary[170..174].copy_from_slice(&length.to_be_bytes());
        }
        image[16 * SECTOR..17 * SECTOR].copy_from_slice(&primary);

        if let Some(lsn) = joliet_descriptor {
            let mut supplementary = descriptor(2, directory_lsns[1].0);
            supplementary[88..91].copy_from_slice(b"%/E");
            image[lsn as usize * SECTOR..(lsn as usize + 1) * SECTOR].copy_from_slice(&supplementary);
        }

        let start = terminator as usize * SECTOR;
        image[start] = 255;
        image[start + 1..start + 6].copy_from_slice(b"CD001");
        image[start + 6] = 1;

        image
    }
}

fn descriptor(kind: u8, root: u32) -> Vec<u8> {

    let mut sector = vec![0u8; SECTOR];
    sector[0] = kind;
    sector[1..6].copy_from_slice(b"CD001");
    sector[6] = 1;

    let record = directory_record(&[0], root, SECTOR as u32, true);
    sector[156..156 + record.len()].copy_from_slice(&record);
    sector
}

fn encode_name(name: &str, joliet: bool) -> Vec<u8> {
    if joliet {
        name.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
    } else {
        name.as_bytes().to_vec()
    }
}

fn file_record(file: &BuilderFile, lsn: u32, joliet: bool) -> Vec<u8> {

    let name = if joliet {
        encode_name(&file.joliet_name, true)
    } else {
        encode_name(&file.iso_name, false)
    };
    directory_record(&name, lsn, file.data.len() as u32, false)
}

fn directory_record(name: &[u8], extent: u32, size: u32, is_directory: bool) -> Vec<u8> {

    let mut length = 33 + name.len();
    if length % 2 == 1 {
        length += 1;
    }

    let mut record = vec![0u8; length];
    record[0] = length as u8;
    record[2..6].copy_from_slice(&extent.to_le_bytes());
    record[6..10].copy_from_slice(&extent.to_be_bytes());
    record[10..14].copy_from_slice(&size.to_le_bytes());
    record[14..18].copy_from_slice(&size.to_be_bytes());
    record[25] = if is_directory { 0x02 } else { 0x00 };
    record[32] = name.len() as u8;
    record[33..33 + name.len()].copy_from_slice(name);
    record
}

fn write_records(image: &mut [u8], lsn: u32, records: &[Vec<u8>]) {

    let mut offset = lsn as usize * SECTOR;
    for record in records {
        image[offset..offset + record.len()].copy_from_slice(record);
        offset += record.len();
    }
}

/// A backend serving cooked sectors from memory, with a configurable track
/// table and sectors that fail on purpose.
pub struct MemoryDisc {
    pub sectors: Vec<u8>,
    pub tracks: Vec<TrackDescriptor>,
    pub lead_out: u32,
    pub failing: HashSet<u32>,
    pub present: bool,
    pending: Option<(u32, SectorMode)>,
    tray: TrayStatus,
}

impl MemoryDisc {

    /// A single data track disc.
    pub fn data(sectors: Vec<u8>) -> Self {
        let count = (sectors.len() / SECTOR) as u32;
        MemoryDisc {
            sectors,
            tracks: vec![TrackDescriptor {
                lsn: 0,
                track_type: MODE1_TRACK,
            }],
            lead_out: count,
            failing: HashSet::new(),
            present: true,
            pending: None,
            tray: TrayStatus::CLOSED,
        }
    }

    /// Adds an audio track after the existing ones.
    pub fn with_audio_track(mut self) -> Self {
        self.tracks.push(TrackDescriptor {
            lsn: self.lead_out,
            track_type: AUDIO_TRACK,
        });
        self
    }

    fn sector_count(&self) -> u32 {
        (self.sectors.len() / SECTOR) as u32
    }
}

impl CdvdBackend for MemoryDisc {

    fn name(&self) -> &str {
        "Memory"
    }

    fn open(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.pending = None;
    }

    fn has_media(&self) -> bool {
        self.present
    }

    fn read_sector(&mut self, dst: &mut [u8], lsn: u32, mode: SectorMode) -> Result<usize> {

        if !self.present {
            return Err(AccessError::NoDisc);
        }
        if lsn >= self.sector_count() || self.failing.contains(&lsn) {
            return Err(AccessError::Backend(format!("sector {} unreadable", lsn)));
        }

        let block = &self.sectors[lsn as usize * SECTOR..(lsn as usize + 1) * SECTOR];
        Ok(extract_sector(block, 24, lsn, mode, true, dst))
    }

    fn read_track(&mut self, lsn: u32, mode: SectorMode) -> Result<()> {
        self.pending = Some((lsn, mode));
        Ok(())
    }

    fn get_buffer(&mut self, dst: &mut [u8]) -> Result<usize> {

        let (lsn, mode) = self
            .pending
            .take()
            .ok_or_else(|| AccessError::Backend("nothing pending".to_string()))?;
        self.read_sector(dst, lsn, mode)
    }

    fn get_tn(&self) -> Result<TrackNumbers> {

        if !self.present {
            return Err(AccessError::NoDisc);
        }
        Ok(TrackNumbers {
            first: 1,
            last: self.tracks.len() as u8,
        })
    }

    fn get_td(&self, track: u8) -> Result<TrackDescriptor> {

        if !self.present {
            return Err(AccessError::NoDisc);
        }
        if track == 0 {
            return Ok(TrackDescriptor {
                lsn: self.lead_out,
                track_type: 0,
            });
        }
        self.tracks
            .get(track as usize - 1)
            .copied()
            .ok_or(AccessError::InvalidTrack(track))
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
}

// SPDX-License-Identifier: GPL-3.0
// iso_fs.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use crate::{
    cdvd_access::{AccessError, CdvdBackend},
    disc_image::{SectorMode, VOLUME_DESCRIPTOR_LSN},
};
use cdvd_utility::read_u32_le;
use thiserror::Error;

/// Size of a logical ISO9660 sector.
pub const SECTOR_SIZE: usize = 2048;

/// How many volume descriptors we look through before giving up.
const MAX_DESCRIPTORS: u32 = 32;

/// Largest directory we are prepared to read.
const MAX_DIRECTORY_SIZE: u32 = 4 * 1024 * 1024;

/// Offset of the root directory record within a volume descriptor.
const ROOT_RECORD_OFFSET: usize = 156;

/// Offset of the escape sequences within a supplementary volume descriptor.
const ESCAPE_SEQUENCE_OFFSET: usize = 88;

/// Smallest possible directory record.
const MIN_RECORD_LENGTH: usize = 34;

/// Directory flag in a record's flags byte.
const FLAG_DIRECTORY: u8 = 0x02;

/// Volume descriptor type codes.
const DESCRIPTOR_PRIMARY: u8 = 1;
const DESCRIPTOR_SUPPLEMENTARY: u8 = 2;
const DESCRIPTOR_TERMINATOR: u8 = 255;

/// The escape sequences announcing Joliet UCS-2 levels 1 to 3.
const JOLIET_ESCAPES: [&[u8; 3]; 3] = [b"%/@", b"%/C", b"%/E"];

/// Convenience alias for filesystem results.
pub type Result<T> = std::result::Result<T, IsoError>;

/// Failures while walking a filesystem.
#[derive(Debug, Error)]
pub enum IsoError {
    #[error("no ISO9660 volume descriptor")]
    NoVolumeDescriptor,

    #[error("corrupt filesystem: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error(transparent)]
    Read(#[from] AccessError),
}

/// One entry of a directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub name: String,
    pub extent: u32,
    pub size: u32,
    pub is_directory: bool,
}

/// This struct walks the directory tree of an ISO9660 filesystem, using the
/// Joliet tree when the disc has one.
pub struct IsoFilesystem<'a> {
    medium: &'a mut dyn CdvdBackend,
    root: DirectoryRecord,
    joliet: bool,
}

impl<'a> IsoFilesystem<'a> {

    /// Reads the volume descriptors and picks the root directory to walk.
    pub fn mount(medium: &'a mut dyn CdvdBackend) -> Result<Self> {

        let mut sector = [0u8; SECTOR_SIZE];
        let mut primary = None;
        let mut joliet = None;

        for lsn in VOLUME_DESCRIPTOR_LSN..VOLUME_DESCRIPTOR_LSN + MAX_DESCRIPTORS {
            // Small images may end straight after the last descriptor.
            if let Err(error) = medium.read_sector(&mut sector, lsn, SectorMode::Cooked2048) {
                if lsn == VOLUME_DESCRIPTOR_LSN {
                    return Err(error.into());
                }
                break;
            }

            if &sector[1..6] != b"CD001" {
                break;
            }

            let root = &sector[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + MIN_RECORD_LENGTH];
            match sector[0] {
                DESCRIPTOR_PRIMARY if primary.is_none() => {
                    primary = parse_record(root, false);
                },
                DESCRIPTOR_SUPPLEMENTARY if joliet.is_none() => {
                    let escape = &sector[ESCAPE_SEQUENCE_OFFSET..ESCAPE_SEQUENCE_OFFSET + 3];
                    if JOLIET_ESCAPES.iter().any(|e| &e[..] == escape) {
                        joliet = parse_record(root, true);
                    }
                },
                DESCRIPTOR_TERMINATOR => break,
                _ => {},
            }
        }

        let (root, is_joliet) = match (joliet, primary) {
            (Some(root), _) => (root, true),
            (None, Some(root)) => (root, false),
            (None, None) => return Err(IsoError::NoVolumeDescriptor),
        };

        if !root.is_directory {
            return Err(IsoError::Corrupt("root record is not a directory".to_string()));
        }

        Ok(IsoFilesystem {
            medium,
            root,
            joliet: is_joliet,
        })
    }

    /// Returns true if the Joliet tree is being walked.
    pub fn is_joliet(&self) -> bool {
        self.joliet
    }

    /// Returns the root directory.
    pub fn root(&self) -> &DirectoryRecord {
        &self.root
    }

    /// Lists a directory, leaving out its `.` and `..` entries.
    pub fn read_directory(&mut self, directory: &DirectoryRecord) -> Result<Vec<DirectoryRecord>> {

        if !directory.is_directory {
            return Err(IsoError::NotADirectory(directory.name.clone()));
        }
        if directory.size > MAX_DIRECTORY_SIZE {
            return Err(IsoError::Corrupt(format!("directory of {} bytes", directory.size)));
        }

        let sectors = (directory.size as usize).div_ceil(SECTOR_SIZE) as u32;
        let mut entries = Vec::new();
        let mut sector = [0u8; SECTOR_SIZE];

        for i in 0..sectors {
            self.medium.read_sector(&mut sector, directory.extent + i, SectorMode::Cooked2048)?;

            // Records never straddle sectors; a zero length pads out the rest.
            let mut offset = 0;
            while offset < SECTOR_SIZE {
                let length = sector[offset] as usize;
                if length == 0 {
                    break;
                }
                if length < MIN_RECORD_LENGTH || offset + length > SECTOR_SIZE {
                    return Err(IsoError::Corrupt(format!(
                        "bad record length {} in sector {}",
                        length,
                        directory.extent + i
                    )));
                }

                let record = parse_record(&sector[offset..offset + length], self.joliet)
                    .ok_or_else(|| IsoError::Corrupt("unreadable directory record".to_string()))?;
                if !record.name.is_empty() {
                    entries.push(record);
                }
                offset += length;
            }
        }

        Ok(entries)
    }

    /// Finds a file or directory by a `/` separated path from the root. Matching
    /// ignores case and `;version` suffixes.
    pub fn find_file(&mut self, path: &str) -> Result<DirectoryRecord> {

        let mut current = self.root.clone();

        for component in path.split(['/', '\\']).filter(|c| !c.is_empty()) {
            let wanted = normalize_name(component);
            current = self
                .read_directory(&current)?
                .into_iter()
                .find(|entry| names_match(&entry.name, &wanted))
                .ok_or_else(|| IsoError::NotFound(path.to_string()))?;
        }

        Ok(current)
    }

    /// Reads a file's contents, up to `limit` bytes.
    pub fn read_file(&mut self, file: &DirectoryRecord, limit: usize) -> Result<Vec<u8>> {

        let length = (file.size as usize).min(limit);
        let mut contents = Vec::with_capacity(length);
        let mut sector = [0u8; SECTOR_SIZE];
        let mut lsn = file.extent;

        while contents.len() < length {
            self.medium.read_sector(&mut sector, lsn, SectorMode::Cooked2048)?;
            let wanted = (length - contents.len()).min(SECTOR_SIZE);
            contents.extend_from_slice(&sector[..wanted]);
            lsn += 1;
        }

        Ok(contents)
    }
}

/// Parses one directory record. `.` and `..` come back with an empty name.
fn parse_record(bytes: &[u8], joliet: bool) -> Option<DirectoryRecord> {

    if bytes.len() < MIN_RECORD_LENGTH {
        return None;
    }

    let name_length = bytes[32] as usize;
    let raw_name = bytes.get(33..33 + name_length)?;

    let name = if name_length == 1 && (raw_name[0] == 0 || raw_name[0] == 1) {
        String::new()
    } else if joliet {
        let units = raw_name
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    } else {
        String::from_utf8_lossy(raw_name).into_owned()
    };

    Some(DirectoryRecord {
        name: normalize_name(&name),
        extent: read_u32_le(bytes, 2),
        size: read_u32_le(bytes, 10),
        is_directory: bytes[25] & FLAG_DIRECTORY != 0,
    })
}

/// Strips the `;version` suffix and a trailing dot from a name.
fn normalize_name(name: &str) -> String {

    let base = name.split(';').next().unwrap_or(name);
    base.strip_suffix('.').unwrap_or(base).to_string()
}

/// Compares two normalised names without regard to case.
fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_uppercase() == b.to_uppercase()
}

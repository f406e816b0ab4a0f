// SPDX-License-Identifier: GPL-3.0
// lib.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

// Crate-wide lines to disable specific lints:

// Constructors with the correct initial state are spelled out as new(), and
// there will be no derived Default implementations unless needed.
#![allow(clippy::new_without_default)]

// We use upper-case acronyms for enums whose variants mirror hardware names.
#![allow(clippy::upper_case_acronyms)]

/// This module contains the sector sources that read disc images from storage.
pub mod sector_source;

/// This module contains the disc image layer: layout detection, read-ahead and
/// sector mode conversion.
pub mod disc_image;

/// This module contains disc type detection.
pub mod disc_type;

/// This module contains the backends and the router the rest of the emulator
/// uses to reach the disc.
pub mod cdvd_access;

/// This module contains PlayStation CD-ROM controller related functionality.
pub mod cdrom_drive;

#[cfg(test)]
mod test_support;

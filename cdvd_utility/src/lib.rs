// SPDX-License-Identifier: GPL-3.0
// lib.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

// This crate contains useful utility functions that can be used throughout the codebase,
// mainly conversions between logical sector numbers and the minute:second:frame
// addressing the disc hardware speaks.

/// Number of frames (sectors) per second of disc time.
pub const FRAMES_PER_SECOND: u32 = 75;

/// Number of seconds per minute of disc time.
pub const SECONDS_PER_MINUTE: u32 = 60;

/// Number of frames per minute of disc time.
pub const FRAMES_PER_MINUTE: u32 = FRAMES_PER_SECOND * SECONDS_PER_MINUTE;

/// The two second pregap which separates LSN 0 from MSF 00:00:00.
pub const LSN_TO_MSF_OFFSET: u32 = 150;

/// This trait exists to allow us to convert single bytes to and from binary coded
/// decimal, which is how the disc controller transfers all of its time values.
pub trait BcdByte {

    /// This function should return the BCD encoding of a binary value in the range 0-99.
    fn to_bcd(self) -> u8;

    /// This function should return the binary value of a BCD encoded byte.
    fn from_bcd(self) -> u8;
}

impl BcdByte for u8 {

    /// Converts to BCD, e.g. 59 becomes 0x59.
    #[inline(always)]
    fn to_bcd(self) -> u8 {
        ((self / 10) << 4) | (self % 10)
    }

    /// Converts from BCD, e.g. 0x59 becomes 59.
    #[inline(always)]
    fn from_bcd(self) -> u8 {
        (self >> 4) * 10 + (self & 0xF)
    }
}

/// A binary minute:second:frame disc position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Msf {
    pub minute: u8,
    pub second: u8,
    pub frame: u8,
}

impl Msf {

    /// Creates a new MSF position from binary values.
    pub fn new(minute: u8, second: u8, frame: u8) -> Self {
        Msf {
            minute,
            second,
            frame,
        }
    }

    /// Creates a new MSF position from three BCD encoded bytes.
    pub fn from_bcd(bytes: [u8; 3]) -> Self {
        Msf {
            minute: bytes[0].from_bcd(),
            second: bytes[1].from_bcd(),
            frame: bytes[2].from_bcd(),
        }
    }

    /// Returns this position as three BCD encoded bytes.
    pub fn to_bcd(self) -> [u8; 3] {
        [self.minute.to_bcd(), self.second.to_bcd(), self.frame.to_bcd()]
    }

    /// Returns true if every field is zero.
    pub fn is_zero(self) -> bool {
        self.minute == 0 && self.second == 0 && self.frame == 0
    }

    /// Advances the position by a single frame, carrying into seconds at 75
    /// frames and into minutes at 60 seconds.
    pub fn increment(&mut self) {

        self.frame += 1;
        if self.frame as u32 == FRAMES_PER_SECOND {
            self.frame = 0;
            self.second += 1;
            if self.second as u32 == SECONDS_PER_MINUTE {
                self.second = 0;
                self.minute = self.minute.wrapping_add(1);
            }
        }
    }

    /// Converts this position to a logical sector number. Positions inside the
    /// pregap saturate to LSN 0.
    pub fn to_lsn(self) -> u32 {
        let absolute = self.minute as u32 * FRAMES_PER_MINUTE
            + self.second as u32 * FRAMES_PER_SECOND
            + self.frame as u32;
        absolute.saturating_sub(LSN_TO_MSF_OFFSET)
    }

    /// Converts a logical sector number to its MSF position.
    pub fn from_lsn(lsn: u32) -> Self {
        let absolute = lsn + LSN_TO_MSF_OFFSET;
        Msf {
            minute: (absolute / FRAMES_PER_MINUTE) as u8,
            second: ((absolute % FRAMES_PER_MINUTE) / FRAMES_PER_SECOND) as u8,
            frame: (absolute % FRAMES_PER_SECOND) as u8,
        }
    }
}

/// Reads a little-endian `u16` at the given offset.
#[inline(always)]
pub fn read_u16_le(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

/// Reads a little-endian `u32` at the given offset.
#[inline(always)]
pub fn read_u32_le(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ])
}

/// Reads a little-endian `u64` at the given offset.
#[inline(always)]
pub fn read_u64_le(buffer: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buffer[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}


#[cfg(test)]
mod tests {

    use super::{BcdByte, Msf, read_u16_le, read_u32_le};

    #[test]
    fn to_bcd_should_encode_each_decimal_digit_in_a_nibble() {

        assert_eq!(59_u8.to_bcd(), 0x59);
        assert_eq!(0_u8.to_bcd(), 0x00);
        assert_eq!(99_u8.to_bcd(), 0x99);
    }

    #[test]
    fn from_bcd_should_decode_both_nibbles() {

        assert_eq!(0x74_u8.from_bcd(), 74);
        assert_eq!(0x09_u8.from_bcd(), 9);
    }

    #[test]
    fn lsn_0_should_sit_after_the_two_second_pregap() {

        let msf = Msf::from_lsn(0);

        assert_eq!(msf, Msf::new(0, 2, 0));
        assert_eq!(msf.to_lsn(), 0);
    }

    #[test]
    fn lsn_to_msf_should_round_trip_for_a_late_sector() {

        let msf = Msf::from_lsn(333_000);

        assert_eq!(msf.to_lsn(), 333_000);
        assert_eq!(msf.minute, 74);
    }

    #[test]
    fn pregap_positions_should_saturate_to_lsn_0() {

        assert_eq!(Msf::new(0, 1, 0).to_lsn(), 0);
    }

    #[test]
    fn increment_should_carry_frames_into_seconds() {

        let mut msf = Msf::new(0, 2, 74);
        msf.increment();

        assert_eq!(msf, Msf::new(0, 3, 0));
    }

    #[test]
    fn increment_should_carry_seconds_into_minutes() {

        let mut msf = Msf::new(3, 59, 74);
        msf.increment();

        assert_eq!(msf, Msf::new(4, 0, 0));
    }

    #[test]
    fn bcd_conversion_should_round_trip_through_msf() {

        let msf = Msf::from_bcd([0x12, 0x34, 0x56]);

        assert_eq!(msf, Msf::new(12, 34, 56));
        assert_eq!(msf.to_bcd(), [0x12, 0x34, 0x56]);
    }

    #[test]
    fn little_endian_readers_should_respect_offsets() {

        let buffer = [0xFF, 0x34, 0x12, 0x78, 0x56];

        assert_eq!(read_u16_le(&buffer, 1), 0x1234);
        assert_eq!(read_u32_le(&buffer, 1), 0x56781234);
    }
}

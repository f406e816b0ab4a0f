// SPDX-License-Identifier: GPL-3.0
// inflate.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use crate::sector_source::{Result, SourceError};
use std::io::{self, Read};

/// Size of the deflate history window.
pub const WINDOW_SIZE: usize = 32768;

/// Mask for positions within the circular window.
const WINDOW_MASK: usize = WINDOW_SIZE - 1;

/// Longest code length deflate allows.
const MAX_CODE_BITS: usize = 15;

/// Number of literal/length codes.
const MAX_LITERAL_CODES: usize = 288;

/// Number of distance codes.
const MAX_DISTANCE_CODES: usize = 30;

/// Base lengths for length codes 257..285.
const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];

/// Extra bits for length codes 257..285.
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// Base offsets for distance codes 0..29.
const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

/// Extra bits for distance codes 0..29.
const DISTANCE_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Order in which code length code lengths are transmitted.
const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// gzip header flag bits.
const FLAG_HEADER_CRC: u8 = 0x02;
const FLAG_EXTRA: u8 = 0x04;
const FLAG_NAME: u8 = 0x08;
const FLAG_COMMENT: u8 = 0x10;

/// Builds the error used for every malformed stream.
fn corrupt(reason: &str) -> SourceError {
    SourceError::InvalidFormat(format!("corrupt gzip stream: {}", reason))
}

/// A canonical Huffman code in counted form: how many codes exist of each
/// length, and the symbols sorted by code.
struct Huffman {
    count: [u16; MAX_CODE_BITS + 1],
    symbol: Vec<u16>,
}

impl Huffman {

    /// Builds a code from per-symbol code lengths. Incomplete codes are accepted,
    /// over-subscribed ones are not.
    fn new(lengths: &[u8]) -> Result<Self> {

        let mut count = [0u16; MAX_CODE_BITS + 1];
        for &length in lengths {
            count[length as usize] += 1;
        }

        let mut left: i32 = 1;
        for length in 1..=MAX_CODE_BITS {
            left <<= 1;
            left -= count[length] as i32;
            if left < 0 {
                return Err(corrupt("over-subscribed Huffman code"));
            }
        }

        let mut offsets = [0u16; MAX_CODE_BITS + 2];
        for length in 1..=MAX_CODE_BITS {
            offsets[length + 1] = offsets[length] + count[length];
        }

        let mut symbol = vec![0u16; lengths.len()];
        for (sym, &length) in lengths.iter().enumerate() {
            if length != 0 {
                symbol[offsets[length as usize] as usize] = sym as u16;
                offsets[length as usize] += 1;
            }
        }

        Ok(Huffman { count, symbol })
    }

    /// The fixed literal/length and distance codes of block type 1.
    fn fixed() -> (Self, Self) {

        let mut lengths = [0u8; MAX_LITERAL_CODES];
        lengths[..144].fill(8);
        lengths[144..256].fill(9);
        lengths[256..280].fill(7);
        lengths[280..].fill(8);

        let distances = [5u8; MAX_DISTANCE_CODES];

        // Both tables are well formed, so construction cannot fail.
        match (Huffman::new(&lengths), Huffman::new(&distances)) {
            (Ok(literal), Ok(distance)) => (literal, distance),
            _ => unreachable!("fixed Huffman tables are complete"),
        }
    }
}

/// LSB-first bit reader over a byte stream, tracking the absolute position of
/// the next unread bit.
struct BitReader<R: Read> {
    input: R,
    next_byte_offset: u64,
    bit_buffer: u64,
    bit_count: u32,
}

impl<R: Read> BitReader<R> {

    fn new(input: R, byte_offset: u64) -> Self {
        BitReader {
            input,
            next_byte_offset: byte_offset,
            bit_buffer: 0,
            bit_count: 0,
        }
    }

    /// Pulls one byte from the input, or None at the end.
    fn next_byte(&mut self) -> Result<Option<u8>> {

        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.next_byte_offset += 1;
                    return Ok(Some(byte[0]));
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SourceError::Io(e)),
            }
        }
    }

    /// Takes `count` bits (at most 32), least significant first.
    fn bits(&mut self, count: u32) -> Result<u32> {

        while self.bit_count < count {
            let byte = self.next_byte()?.ok_or_else(|| corrupt("unexpected end of data"))?;
            self.bit_buffer |= (byte as u64) << self.bit_count;
            self.bit_count += 8;
        }

        let value = (self.bit_buffer & ((1u64 << count) - 1)) as u32;
        self.bit_buffer >>= count;
        self.bit_count -= count;
        Ok(value)
    }

    /// Drops the bits left in the current byte.
    fn align_to_byte(&mut self) {

        let drop = self.bit_count % 8;
        self.bit_buffer >>= drop;
        self.bit_count -= drop;
    }

    /// Reads a whole byte at a byte boundary, returning None at the end of input.
    fn try_aligned_byte(&mut self) -> Result<Option<u8>> {

        if self.bit_count >= 8 {
            return self.bits(8).map(|b| Some(b as u8));
        }
        self.next_byte()
    }

    /// Absolute position of the next unread bit, as a byte offset and bit index.
    fn position(&self) -> (u64, u8) {

        let bit_position = self.next_byte_offset * 8 - self.bit_count as u64;
        (bit_position / 8, (bit_position % 8) as u8)
    }

    /// Decodes one symbol bit by bit.
    fn decode(&mut self, code: &Huffman) -> Result<u16> {

        let mut value: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;

        for length in 1..=MAX_CODE_BITS {
            value |= self.bits(1)? as i32;
            let count = code.count[length] as i32;
            if value - count < first {
                return Ok(code.symbol[(index + (value - first)) as usize]);
            }
            index += count;
            first += count;
            first <<= 1;
            value <<= 1;
        }

        Err(corrupt("invalid Huffman code"))
    }
}

/// Where the decoder is within the gzip stream.
enum State {
    MemberHeader,
    BlockHeader,
    Stored { remaining: u32 },
    Codes { literal: Huffman, distance: Huffman },
    Trailer,
    Finished,
}

/// This struct is a minimal gzip/deflate decoder which can be stopped at any
/// block boundary and later resumed from that exact bit with a seeded window.
/// `read` hands back control whenever a block ends, so callers can notice
/// boundaries and snapshot the decoder there.
pub struct Inflater<R: Read> {
    input: BitReader<R>,
    state: State,
    last_block: bool,

    // Circular history window and how much of it holds real data.
    window: Box<[u8]>,
    window_position: usize,
    history: usize,

    // A match that did not fit into the caller's buffer last time.
    pending_length: usize,
    pending_distance: usize,

    total_out: u64,
}

impl<R: Read> Inflater<R> {

    /// Creates a decoder at the very start of a gzip file.
    pub fn new_gzip(input: R) -> Self {
        Inflater {
            input: BitReader::new(input, 0),
            state: State::MemberHeader,
            last_block: false,
            window: vec![0u8; WINDOW_SIZE].into_boxed_slice(),
            window_position: 0,
            history: 0,
            pending_length: 0,
            pending_distance: 0,
            total_out: 0,
        }
    }

    /// Resumes decoding at a block header. `input` must already be positioned at
    /// `byte_offset`; the first `bit` bits of that byte belong to the previous
    /// block. `window` is the history preceding the resume point and `total_out`
    /// its uncompressed offset.
    pub fn resume(
        input: R,
        byte_offset: u64,
        bit: u8,
        window: &[u8],
        total_out: u64
    ) -> Result<Self> {

        let mut inflater = Inflater::new_gzip(input);
        inflater.input.next_byte_offset = byte_offset;
        inflater.state = State::BlockHeader;
        inflater.total_out = total_out;

        let seed = &window[window.len().saturating_sub(WINDOW_SIZE)..];
        inflater.window[..seed.len()].copy_from_slice(seed);
        inflater.window_position = seed.len() & WINDOW_MASK;
        inflater.history = seed.len();

        if bit > 0 {
            inflater.input.bits(bit as u32)?;
        }

        Ok(inflater)
    }

    /// Returns true once the end of the last member has been reached.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Finished)
    }

    /// Returns true if the next thing to decode is a deflate block header, which
    /// is the only place a checkpoint may be taken.
    pub fn at_block_boundary(&self) -> bool {
        matches!(self.state, State::BlockHeader) && self.pending_length == 0
    }

    /// Returns the compressed position of the next unread bit.
    pub fn position(&self) -> (u64, u8) {
        self.input.position()
    }

    /// Returns the number of bytes produced since the start of the stream.
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Returns the most recent history, oldest byte first, at most one window long.
    pub fn window_snapshot(&self) -> Vec<u8> {

        let length = self.history.min(WINDOW_SIZE);
        let start = (self.window_position + WINDOW_SIZE - length) & WINDOW_MASK;

        let mut snapshot = Vec::with_capacity(length);
        if start + length <= WINDOW_SIZE {
            snapshot.extend_from_slice(&self.window[start..start + length]);
        } else {
            snapshot.extend_from_slice(&self.window[start..]);
            snapshot.extend_from_slice(&self.window[..(start + length) & WINDOW_MASK]);
        }
        snapshot
    }

    /// Decodes into `out`, stopping when it is full, when a block ends, or at
    /// the end of the stream. Returns the number of bytes produced.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {

        let mut produced = 0;

        while produced < out.len() {

            if self.pending_length > 0 {
                produced += self.copy_match(&mut out[produced..]);
                continue;
            }

            match &mut self.state {
                State::Finished => break,

                State::MemberHeader => {
                    self.read_member_header()?;
                    self.state = State::BlockHeader;
                    break;
                },

                State::BlockHeader => self.read_block_header()?,

                State::Stored { remaining } => {
                    if *remaining == 0 {
                        self.end_block();
                        break;
                    }

                    let byte = self.input.bits(8)? as u8;
                    *remaining -= 1;
                    out[produced] = byte;
                    self.push_history(byte);
                    produced += 1;
                },

                State::Codes { .. } => {
                    let (done, count) = self.decode_codes(&mut out[produced..])?;
                    produced += count;
                    if done {
                        self.end_block();
                        break;
                    }
                },

                State::Trailer => {
                    self.read_trailer()?;
                    break;
                },
            }
        }

        self.total_out += produced as u64;
        Ok(produced)
    }

    /// Moves on after a block ends.
    fn end_block(&mut self) {

        self.state = if self.last_block {
            State::Trailer
        } else {
            State::BlockHeader
        };
    }

    /// Parses a gzip member header.
    fn read_member_header(&mut self) -> Result<()> {

        let magic = [self.input.bits(8)? as u8, self.input.bits(8)? as u8];
        if magic != [0x1F, 0x8B] {
            return Err(corrupt("missing gzip magic"));
        }

        self.read_member_tail()
    }

    /// Parses a block header and sets up the block's decoding state.
    fn read_block_header(&mut self) -> Result<()> {

        self.last_block = self.input.bits(1)? == 1;

        self.state = match self.input.bits(2)? {
            0 => {
                self.input.align_to_byte();
                let length = self.input.bits(16)?;
                let complement = self.input.bits(16)?;
                if length != !complement & 0xFFFF {
                    return Err(corrupt("stored block length mismatch"));
                }
                State::Stored { remaining: length }
            },
            1 => {
                let (literal, distance) = Huffman::fixed();
                State::Codes { literal, distance }
            },
            2 => {
                let (literal, distance) = self.read_dynamic_tables()?;
                State::Codes { literal, distance }
            },
            _ => return Err(corrupt("invalid block type")),
        };

        Ok(())
    }

    /// Reads the code tables of a dynamic Huffman block.
    fn read_dynamic_tables(&mut self) -> Result<(Huffman, Huffman)> {

        let literal_count = self.input.bits(5)? as usize + 257;
        let distance_count = self.input.bits(5)? as usize + 1;
        let code_length_count = self.input.bits(4)? as usize + 4;

        if literal_count > 286 || distance_count > MAX_DISTANCE_CODES {
            return Err(corrupt("bad dynamic table counts"));
        }

        let mut code_lengths = [0u8; 19];
        for &position in CODE_LENGTH_ORDER.iter().take(code_length_count) {
            code_lengths[position] = self.input.bits(3)? as u8;
        }
        let length_code = Huffman::new(&code_lengths)?;

        let mut lengths = vec![0u8; literal_count + distance_count];
        let mut index = 0;
        while index < lengths.len() {
            let symbol = self.input.decode(&length_code)?;
            match symbol {
                0..=15 => {
                    lengths[index] = symbol as u8;
                    index += 1;
                },
                16..=18 => {
                    let (value, repeat) = match symbol {
                        16 => {
                            if index == 0 {
                                return Err(corrupt("repeat with no previous length"));
                            }
                            (lengths[index - 1], 3 + self.input.bits(2)? as usize)
                        },
                        17 => (0, 3 + self.input.bits(3)? as usize),
                        _ => (0, 11 + self.input.bits(7)? as usize),
                    };
                    if index + repeat > lengths.len() {
                        return Err(corrupt("code lengths overflow table"));
                    }
                    lengths[index..index + repeat].fill(value);
                    index += repeat;
                },
                _ => return Err(corrupt("invalid code length symbol")),
            }
        }

        if lengths[256] == 0 {
            return Err(corrupt("no end-of-block code"));
        }

        let literal = Huffman::new(&lengths[..literal_count])?;
        let distance = Huffman::new(&lengths[literal_count..])?;
        Ok((literal, distance))
    }

    /// Decodes symbols of a Huffman block into `out`. Returns whether the block
    /// ended and how many bytes were written.
    fn decode_codes(&mut self, out: &mut [u8]) -> Result<(bool, usize)> {

        let State::Codes { literal, distance } = &self.state else {
            return Ok((true, 0));
        };

        let mut produced = 0;
        let mut literals = Vec::new();
        let mut matched = None;
        let mut ended = false;

        // Gather literals until a match, the block end, or a full buffer, so the
        // code tables stay borrowed only while decoding.
        while produced + literals.len() < out.len() {
            let symbol = self.input.decode(literal)?;
            if symbol < 256 {
                literals.push(symbol as u8);
                continue;
            }
            if symbol == 256 {
                ended = true;
                break;
            }

            let code = (symbol - 257) as usize;
            if code >= LENGTH_BASE.len() {
                return Err(corrupt("invalid length code"));
            }
            let length = LENGTH_BASE[code] as usize
                + self.input.bits(LENGTH_EXTRA[code] as u32)? as usize;

            let code = self.input.decode(distance)? as usize;
            if code >= DISTANCE_BASE.len() {
                return Err(corrupt("invalid distance code"));
            }
            let distance_value = DISTANCE_BASE[code] as usize
                + self.input.bits(DISTANCE_EXTRA[code] as u32)? as usize;

            matched = Some((length, distance_value));
            break;
        }

        for byte in literals {
            out[produced] = byte;
            self.push_history(byte);
            produced += 1;
        }

        if let Some((length, distance_value)) = matched {
            if distance_value > self.history.min(WINDOW_SIZE) {
                return Err(corrupt("distance too far back"));
            }
            self.pending_length = length;
            self.pending_distance = distance_value;
            produced += self.copy_match(&mut out[produced..]);
        }

        Ok((ended, produced))
    }

    /// Copies as much of the pending match as fits.
    fn copy_match(&mut self, out: &mut [u8]) -> usize {

        let count = self.pending_length.min(out.len());
        for slot in out.iter_mut().take(count) {
            let byte = self.window[(self.window_position + WINDOW_SIZE - self.pending_distance) & WINDOW_MASK];
            *slot = byte;
            self.push_history(byte);
        }

        self.pending_length -= count;
        count
    }

    /// Appends a byte to the history window.
    fn push_history(&mut self, byte: u8) {

        self.window[self.window_position] = byte;
        self.window_position = (self.window_position + 1) & WINDOW_MASK;
        self.history += 1;
    }

    /// Skips a member trailer and looks for a following member.
    fn read_trailer(&mut self) -> Result<()> {

        self.input.align_to_byte();

        // CRC-32 and input size.
        for _ in 0..8 {
            self.input.bits(8)?;
        }

        self.state = match self.input.try_aligned_byte()? {
            None => State::Finished,
            Some(0x1F) => {
                // Concatenated member: the magic's first byte is already consumed.
                if self.input.bits(8)? != 0x8B {
                    return Err(corrupt("garbage after gzip member"));
                }
                self.read_member_tail()?;
                State::BlockHeader
            },
            Some(_) => return Err(corrupt("garbage after gzip member")),
        };

        Ok(())
    }

    /// Parses the rest of a member header after its magic.
    fn read_member_tail(&mut self) -> Result<()> {

        if self.input.bits(8)? != 8 {
            return Err(corrupt("unsupported compression method"));
        }

        let flags = self.input.bits(8)? as u8;
        for _ in 0..6 {
            self.input.bits(8)?;
        }
        if flags & FLAG_EXTRA != 0 {
            let length = self.input.bits(16)?;
            for _ in 0..length {
                self.input.bits(8)?;
            }
        }
        if flags & FLAG_NAME != 0 {
            while self.input.bits(8)? != 0 {}
        }
        if flags & FLAG_COMMENT != 0 {
            while self.input.bits(8)? != 0 {}
        }
        if flags & FLAG_HEADER_CRC != 0 {
            self.input.bits(16)?;
        }

        self.last_block = false;
        Ok(())
    }
}

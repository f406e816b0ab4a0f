// SPDX-License-Identifier: GPL-3.0
// block_dump_source.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use super::{
    Result, SectorSource, SourceError, SourceKind, check_destination, check_range,
    flat_source::FlatSectorSource,
};
use cdvd_utility::read_u32_le;
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// The magic at the start of every blockdump.
pub const BLOCK_DUMP_MAGIC: &[u8; 4] = b"BDV2";

/// Size of the fixed header: magic, block size, block count and block offset.
pub const BLOCK_DUMP_HEADER_SIZE: u64 = 16;

/// Size of the LSN tag preceding each captured payload.
const RECORD_TAG_SIZE: u64 = 4;

/// The header of a blockdump file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockDumpHeader {
    pub block_size: u32,
    pub block_count: u32,
    pub block_offset: i32,
}

impl BlockDumpHeader {

    /// Serialises the header in its on-disk little-endian form.
    fn to_bytes(self) -> [u8; BLOCK_DUMP_HEADER_SIZE as usize] {

        let mut bytes = [0u8; BLOCK_DUMP_HEADER_SIZE as usize];
        bytes[0..4].copy_from_slice(BLOCK_DUMP_MAGIC);
        bytes[4..8].copy_from_slice(&self.block_size.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.block_count.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.block_offset.to_le_bytes());
        bytes
    }

    /// Parses a header, checking the magic.
    fn from_bytes(bytes: &[u8; BLOCK_DUMP_HEADER_SIZE as usize]) -> Result<Self> {

        if &bytes[0..4] != BLOCK_DUMP_MAGIC {
            return Err(SourceError::InvalidFormat("missing BDV2 magic".to_string()));
        }

        Ok(BlockDumpHeader {
            block_size: read_u32_le(bytes, 4),
            block_count: read_u32_le(bytes, 8),
            block_offset: read_u32_le(bytes, 12) as i32,
        })
    }
}

/// A completed read, held until the caller awaits it.
struct CompletedRead {
    result: Result<Vec<u8>>,
}

/// This struct models a blockdump: a capture of the sectors a previous session
/// actually read, each tagged with its LSN, in the order they were read. Reads are
/// carried out synchronously inside `submit_read` and handed over on await.
pub struct BlockDumpSectorSource {

    // The file and its location.
    file: BufReader<File>,
    path: PathBuf,

    // Header values.
    header: BlockDumpHeader,

    // LSN to payload file offset, built once at open and read-only afterwards.
    index: HashMap<u32, u64>,

    // The outstanding read, if any.
    completed: Option<CompletedRead>,
}

/// Implementation functions for the blockdump source itself.
impl BlockDumpSectorSource {

    /// Returns true if the supplied flat source starts with the blockdump magic. The
    /// probe reads with a block size of 1 and puts the old block size back if the
    /// magic doesn't match.
    pub fn detect(source: &mut FlatSectorSource) -> Result<bool> {

        let old_block_size = source.block_size();
        source.set_block_size(1);

        if source.block_count() < BLOCK_DUMP_MAGIC.len() as u32 {
            source.set_block_size(old_block_size);
            return Ok(false);
        }

        let mut magic = [0u8; 4];
        let result = source.read_sync(&mut magic, 0, BLOCK_DUMP_MAGIC.len() as u32);
        let is_block_dump = result.is_ok() && &magic == BLOCK_DUMP_MAGIC;

        if !is_block_dump {
            source.set_block_size(old_block_size);
        }
        result?;

        Ok(is_block_dump)
    }

    /// Opens a blockdump, validates its length and scans it once to build the
    /// LSN index.
    pub fn open(path: &Path) -> Result<Self> {

        let file = File::open(path).map_err(|e| SourceError::from_open(e, path))?;
        let file_length = file.metadata()?.len();
        let mut file = BufReader::new(file);

        let mut header_bytes = [0u8; BLOCK_DUMP_HEADER_SIZE as usize];
        file.read_exact(&mut header_bytes)?;
        let header = BlockDumpHeader::from_bytes(&header_bytes)?;

        if header.block_size == 0 {
            return Err(SourceError::InvalidFormat("blockdump with zero block size".to_string()));
        }

        let record_size = header.block_size as u64 + RECORD_TAG_SIZE;
        let body_length = file_length - BLOCK_DUMP_HEADER_SIZE;
        if body_length % record_size != 0 {
            return Err(SourceError::InvalidFormat(format!(
                "blockdump length {} is not 16 + n * {}",
                file_length, record_size
            )));
        }
        let record_count = body_length / record_size;

        // One linear pass over the LSN tags. When a sector was captured more than
        // once, the first capture wins.
        let mut index = HashMap::with_capacity(record_count as usize);
        let mut duplicates = 0;
        for record in 0..record_count {
            let tag_offset = BLOCK_DUMP_HEADER_SIZE + record * record_size;
            file.seek(SeekFrom::Start(tag_offset))?;

            let mut tag = [0u8; 4];
            file.read_exact(&mut tag)?;
            let lsn = u32::from_le_bytes(tag);
            if lsn >= header.block_count {
                return Err(SourceError::InvalidFormat(format!(
                    "blockdump record for sector {} beyond its {} blocks",
                    lsn, header.block_count
                )));
            }

            if index.contains_key(&lsn) {
                duplicates += 1;
            } else {
                index.insert(lsn, tag_offset + RECORD_TAG_SIZE);
            }
        }

        if duplicates > 0 {
            log::warn!(
                "Blockdump {} holds {} duplicate sector captures; keeping the first of each",
                path.display(),
                duplicates
            );
        }

        log::info!(
            "Opened blockdump {}: {} of {} sectors captured, block size {}, block offset {}",
            path.display(),
            index.len(),
            header.block_count,
            header.block_size,
            header.block_offset
        );

        Ok(BlockDumpSectorSource {
            file,
            path: path.to_path_buf(),
            header,
            index,
            completed: None,
        })
    }

    /// Returns the header read from the file.
    pub fn header(&self) -> BlockDumpHeader {
        self.header
    }

    /// Returns how many distinct sectors were captured.
    pub fn captured_count(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the given sector was captured.
    pub fn contains(&self, lsn: u32) -> bool {
        self.index.contains_key(&lsn)
    }

    /// Reads the payloads of a run of sectors straight from the file.
    fn read_blocks(&mut self, first_block: u32, count: u32) -> Result<Vec<u8>> {

        let block_size = self.header.block_size as usize;
        let mut data = vec![0u8; block_size * count as usize];

        for (i, lsn) in (first_block..first_block + count).enumerate() {
            let offset = *self.index.get(&lsn).ok_or(SourceError::SectorNotCaptured(lsn))?;
            self.file.seek(SeekFrom::Start(offset))?;

            let chunk = &mut data[i * block_size..(i + 1) * block_size];
            let mut filled = 0;
            while filled < block_size {
                match self.file.read(&mut chunk[filled..])? {
                    0 => {
                        return Err(SourceError::ShortRead {
                            expected: block_size,
                            actual: filled,
                        });
                    },
                    n => filled += n,
                }
            }
        }

        Ok(data)
    }
}

impl SectorSource for BlockDumpSectorSource {

    fn kind(&self) -> SourceKind {
        SourceKind::BlockDump
    }

    fn set_block_size(&mut self, bytes: u32) {

        // The header fixes the block size of a capture.
        if bytes != self.header.block_size {
            log::warn!(
                "Ignoring block size {} for blockdump {} (captured at {})",
                bytes,
                self.path.display(),
                self.header.block_size
            );
        }
    }

    fn block_size(&self) -> u32 {
        self.header.block_size
    }

    fn set_data_offset(&mut self, _offset: i64) {}

    fn recorded_block_offset(&self) -> Option<u32> {
        u32::try_from(self.header.block_offset).ok()
    }

    fn block_count(&self) -> u32 {
        self.header.block_count
    }

    fn submit_read(&mut self, first_block: u32, count: u32) -> Result<()> {

        if self.completed.is_some() {
            return Err(SourceError::ReadPending);
        }
        check_range(first_block, count, self.header.block_count)?;

        let result = self.read_blocks(first_block, count);
        self.completed = Some(CompletedRead { result });

        Ok(())
    }

    fn await_read(&mut self, dst: &mut [u8]) -> Result<usize> {

        let completed = self.completed.take().ok_or(SourceError::NoReadPending)?;
        let data = completed.result?;
        check_destination(dst, data.len())?;

        dst[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn cancel_read(&mut self) {
        self.completed = None;
    }
}

/// This struct writes blockdumps in store mode: a header followed by one tagged
/// record per sector, appended in the order they are written.
pub struct BlockDumpWriter {
    file: BufWriter<File>,
    header: BlockDumpHeader,
    written: u64,
}

impl BlockDumpWriter {

    /// Creates a blockdump at the supplied path and writes its header.
    pub fn create(path: &Path, header: BlockDumpHeader) -> Result<Self> {

        let file = File::create(path).map_err(|e| SourceError::from_open(e, path))?;
        let mut file = BufWriter::new(file);
        file.write_all(&header.to_bytes())?;

        log::info!(
            "Recording blockdump to {} (block size {}, {} blocks)",
            path.display(),
            header.block_size,
            header.block_count
        );

        Ok(BlockDumpWriter {
            file,
            header,
            written: 0,
        })
    }

    /// Appends one captured sector. The payload must be exactly one block, and the
    /// sector must lie inside the disc described by the header.
    pub fn write_sector(&mut self, lsn: u32, payload: &[u8]) -> Result<()> {

        if lsn >= self.header.block_count {
            return Err(SourceError::OutOfRange {
                first: lsn,
                end: lsn as u64 + 1,
                count: self.header.block_count,
            });
        }

        if payload.len() != self.header.block_size as usize {
            return Err(SourceError::InvalidFormat(format!(
                "blockdump payload of {} bytes, expected {}",
                payload.len(),
                self.header.block_size
            )));
        }

        self.file.write_all(&lsn.to_le_bytes())?;
        self.file.write_all(payload)?;
        self.written += 1;

        Ok(())
    }

    /// Returns the number of records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes everything to disk.
    pub fn finish(mut self) -> Result<()> {

        self.file.flush()?;
        Ok(())
    }
}

// SPDX-License-Identifier: GPL-3.0
// flat_source.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use super::{
    Result, SectorSource, SourceError, SourceKind, check_destination, check_range,
};
use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

/// The block size a freshly opened source uses until told otherwise.
const DEFAULT_BLOCK_SIZE: u32 = 2048;

/// A request sent to the I/O thread.
struct ReadRequest {
    generation: u64,
    position: i64,
    length: usize,
    buffer: Vec<u8>,
}

/// What the I/O thread sends back once a request has been serviced.
struct ReadCompletion {
    generation: u64,
    buffer: Vec<u8>,
    result: io::Result<usize>,
}

/// The read currently owed to the caller.
struct PendingRead {
    generation: u64,
    length: usize,
}

/// This struct models a disc image stored as one plain file. Reads are handed to
/// a dedicated I/O thread, so submitting never blocks the emulator while the
/// disc is busy.
pub struct FlatSectorSource {

    // Where the file lives, for logging and part discovery.
    path: PathBuf,

    // File geometry.
    file_length: u64,
    block_size: u32,
    data_offset: i64,

    // Channels to and from the I/O thread.
    requests: Option<Sender<ReadRequest>>,
    completions: Receiver<ReadCompletion>,
    worker: Option<JoinHandle<()>>,

    // Tracking for the single outstanding read. Completions carrying an older
    // generation belong to cancelled reads and are thrown away.
    generation: u64,
    pending: Option<PendingRead>,

    // A recycled buffer so steady-state reads don't allocate.
    spare_buffer: Vec<u8>,
}

/// Implementation functions for the flat source itself.
impl FlatSectorSource {

    /// Opens the file at the supplied path and starts its I/O thread.
    pub fn open(path: &Path) -> Result<Self> {

        let file = File::open(path).map_err(|e| SourceError::from_open(e, path))?;
        let file_length = file
            .metadata()
            .map_err(|e| SourceError::from_open(e, path))?
            .len();

        let (request_sender, request_receiver) = mpsc::channel::<ReadRequest>();
        let (completion_sender, completion_receiver) = mpsc::channel::<ReadCompletion>();

        let worker = thread::Builder::new()
            .name(format!("cdvd-io:{}", path.display()))
            .spawn(move || io_worker(file, request_receiver, completion_sender))?;

        log::debug!("Opened flat image {} ({} bytes)", path.display(), file_length);

        Ok(FlatSectorSource {
            path: path.to_path_buf(),
            file_length,
            block_size: DEFAULT_BLOCK_SIZE,
            data_offset: 0,
            requests: Some(request_sender),
            completions: completion_receiver,
            worker: Some(worker),
            generation: 0,
            pending: None,
            spare_buffer: Vec::new(),
        })
    }

    /// Returns the path this source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the length of the underlying file in bytes.
    pub fn file_length(&self) -> u64 {
        self.file_length
    }
}

impl SectorSource for FlatSectorSource {

    fn kind(&self) -> SourceKind {
        SourceKind::Flat
    }

    fn set_block_size(&mut self, bytes: u32) {
        self.block_size = bytes.max(1);
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn set_data_offset(&mut self, offset: i64) {
        self.data_offset = offset;
    }

    fn block_count(&self) -> u32 {

        let usable = self.file_length as i64 - self.data_offset;
        if usable <= 0 {
            return 0;
        }

        (usable as u64 / self.block_size as u64).min(u32::MAX as u64) as u32
    }

    fn submit_read(&mut self, first_block: u32, count: u32) -> Result<()> {

        if self.pending.is_some() {
            return Err(SourceError::ReadPending);
        }
        check_range(first_block, count, self.block_count())?;

        let length = count as usize * self.block_size as usize;
        let position = first_block as i64 * self.block_size as i64 + self.data_offset;

        // Hand the spare buffer over to the worker for this read.
        let mut buffer = std::mem::take(&mut self.spare_buffer);
        buffer.resize(length, 0);

        self.generation += 1;
        let request = ReadRequest {
            generation: self.generation,
            position,
            length,
            buffer,
        };

        self.requests
            .as_ref()
            .ok_or(SourceError::WorkerGone)?
            .send(request)
            .map_err(|_| SourceError::WorkerGone)?;

        self.pending = Some(PendingRead {
            generation: self.generation,
            length,
        });

        Ok(())
    }

    fn await_read(&mut self, dst: &mut [u8]) -> Result<usize> {

        let pending = self.pending.take().ok_or(SourceError::NoReadPending)?;
        check_destination(dst, pending.length)?;

        loop {
            let completion = self.completions.recv().map_err(|_| SourceError::WorkerGone)?;

            // Results of cancelled reads still arrive; skip past them.
            if completion.generation != pending.generation {
                self.spare_buffer = completion.buffer;
                continue;
            }

            let result = match completion.result {
                Ok(actual) if actual == pending.length => {
                    dst[..actual].copy_from_slice(&completion.buffer[..actual]);
                    Ok(actual)
                },
                Ok(actual) => Err(SourceError::ShortRead {
                    expected: pending.length,
                    actual,
                }),
                Err(error) => Err(SourceError::Io(error)),
            };

            self.spare_buffer = completion.buffer;
            return result;
        }
    }

    fn cancel_read(&mut self) {

        // The worker may still be busy with it, but the generation check in
        // await_read makes sure its bytes never reach anyone.
        self.pending = None;
    }
}

impl Drop for FlatSectorSource {

    fn drop(&mut self) {

        // Closing the request channel makes the worker loop end.
        self.requests = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("I/O thread for {} panicked", self.path.display());
            }
        }
    }
}

/// The body of the I/O thread: service requests one at a time until the
/// source is dropped.
fn io_worker(
    mut file: File,
    requests: Receiver<ReadRequest>,
    completions: Sender<ReadCompletion>
) {

    while let Ok(mut request) = requests.recv() {

        let result = read_at(&mut file, request.position, &mut request.buffer[..request.length]);
        let completion = ReadCompletion {
            generation: request.generation,
            buffer: request.buffer,
            result,
        };

        if completions.send(completion).is_err() {
            break;
        }
    }
}

/// Reads as much of `buffer` as the file allows from a signed position, zero
/// filling whatever lies before the start of the file. Returns the number of
/// bytes accounted for.
fn read_at(file: &mut File, position: i64, buffer: &mut [u8]) -> io::Result<usize> {

    let mut filled = 0;
    let mut position = position;

    if position < 0 {
        let leading = ((-position) as usize).min(buffer.len());
        buffer[..leading].fill(0);
        filled = leading;
        position = 0;
    }

    file.seek(SeekFrom::Start(position as u64))?;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}

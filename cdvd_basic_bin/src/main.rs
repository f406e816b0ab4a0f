// SPDX-License-Identifier: GPL-3.0
// main.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::{path::PathBuf, process::ExitCode};

// This file is the core of the basic client - it exists merely as a CLI-based
// program to mount a disc image, report what it found, and exercise the read
// path and the CD-ROM controller against it.

use cdvd_core::{
    cdrom_drive::{
        CdromDrive, CdromDriveBridge, CdromEvent,
        psx_cdrom_drive::{CdromCommand, IrqCause, PsxCdromDrive},
    },
    cdvd_access::{AccessError, CdvdConfig, CdvdSource, DiscAccessRouter},
    disc_image::{DEFAULT_READ_AHEAD, DiscImage, SectorMode},
};
use cdvd_utility::Msf;
use clap::Parser;

#[derive(Parser)]
#[command(
    version,
    about = "A basic barebones tool for inspecting and reading disc images",
    long_about = None
)]
struct CdvdArgs {
    #[arg(
        long = "image",
        help = "The disc image to mount",
        id = "Image file"
    )]
    image: PathBuf,

    #[arg(
        long = "dump-sector",
        help = "Hex dump the sector with this LSN",
        id = "LSN"
    )]
    dump_sector: Option<u32>,

    #[arg(
        long = "mode",
        help = "Sector size to dump: 2048, 2328, 2340 or 2352",
        default_value_t = 2048
    )]
    mode: usize,

    #[arg(
        long = "read",
        help = "Run a simulated ReadN of this many sectors through the controller",
        id = "Sector count"
    )]
    read: Option<u32>,

    #[arg(
        long = "start",
        help = "LSN the simulated ReadN starts from",
        default_value_t = 16
    )]
    start: u32,

    #[arg(
        long = "read-ahead",
        help = "Sectors fetched per read from the image",
        default_value_t = DEFAULT_READ_AHEAD
    )]
    read_ahead: u32,

    #[arg(
        long = "record",
        help = "Record every sector read into a blockdump at this path",
        id = "Blockdump file"
    )]
    record: Option<PathBuf>,

    #[arg(
        long = "fast",
        help = "Shorten the emulated sector read time"
    )]
    fast: bool,
}

/// Disc errors tolerated by the simulated read before it gives up.
const MAX_FAILURES: u32 = 8;

/// A two-slot event queue standing in for the emulator's scheduler.
struct EventQueue {
    now: u64,
    due: [Option<u64>; 2],
    interrupt_raised: bool,
}

impl EventQueue {

    fn new() -> Self {
        EventQueue {
            now: 0,
            due: [None; 2],
            interrupt_raised: false,
        }
    }

    fn slot(event: CdromEvent) -> usize {
        match event {
            CdromEvent::Command => 0,
            CdromEvent::Read => 1,
        }
    }

    /// Advances time to the earliest scheduled event and returns it.
    fn next(&mut self) -> Option<CdromEvent> {

        let (slot, due) = self
            .due
            .iter()
            .enumerate()
            .filter_map(|(slot, due)| due.map(|due| (slot, due)))
            .min_by_key(|(_, due)| *due)?;

        self.due[slot] = None;
        self.now = due;
        Some(if slot == 0 {
            CdromEvent::Command
        } else {
            CdromEvent::Read
        })
    }
}

impl CdromDriveBridge for EventQueue {

    fn schedule(&mut self, event: CdromEvent, delay: u32) {
        self.due[Self::slot(event)] = Some(self.now + delay as u64);
    }

    fn cancel(&mut self, event: CdromEvent) {
        self.due[Self::slot(event)] = None;
    }

    fn raise_interrupt(&mut self) {
        self.interrupt_raised = true;
    }
}

fn main() -> ExitCode {

    colog::init();
    let cdvd_args = CdvdArgs::parse();

    match run(&cdvd_args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("{}", error);
            ExitCode::FAILURE
        },
    }
}

fn run(cdvd_args: &CdvdArgs) -> Result<(), AccessError> {

    let config = CdvdConfig {
        read_ahead: cdvd_args.read_ahead,
        block_dump_path: cdvd_args.record.clone(),
        fast_cdvd: cdvd_args.fast,
        ..CdvdConfig::default()
    };

    // Report the image layout before handing the image to the router.
    {
        let image = DiscImage::open(&cdvd_args.image, config.image_options())?;
        let layout = image.sector_layout();
        println!("Image:       {}", image.path().display());
        println!("Source:      {:?}", image.source_kind());
        println!("Layout:      {} ({:?})", layout.name, image.layout());
        println!("Block size:  {} (data offset {}, frame offset {})",
            layout.block_size, layout.file_offset, layout.block_offset);
        println!("Sectors:     {}", image.sector_count());
    }

    let mut router = DiscAccessRouter::new(config);
    router.change_source(CdvdSource::Iso);
    router.open(&cdvd_args.image)?;

    let detection = router.detect_disc().clone();
    println!("Disc type:   {} (0x{:02X})", detection.disc_type, detection.disc_type.code());
    if let Some(boot) = &detection.boot_executable {
        println!("Boot file:   {}", boot);
    }
    if let Some(serial) = &detection.serial {
        println!("Serial:      {}", serial);
    }

    if let Some(lsn) = cdvd_args.dump_sector {
        let mode = SectorMode::from_length(cdvd_args.mode).ok_or_else(|| {
            AccessError::Backend(format!("unsupported sector size {}", cdvd_args.mode))
        })?;

        let mut sector = vec![0u8; mode.length()];
        let length = router.read_sector(&mut sector, lsn, mode)?;
        println!();
        println!("Sector {} ({} bytes):", lsn, length);
        hex_dump(&sector[..length]);
    }

    if let Some(count) = cdvd_args.read {
        println!();
        simulate_read(&mut router, cdvd_args.start, count);
    }

    router.close();
    Ok(())
}

/// Prints bytes sixteen to a line with their offset and printable characters.
fn hex_dump(bytes: &[u8]) {
    for (line, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        let text: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        println!("{:08X}  {:<47}  |{}|", line * 16, hex.join(" "), text);
    }
}

/// Writes a command and its parameters to the controller.
fn send_command(
    drive: &mut PsxCdromDrive,
    queue: &mut EventQueue,
    command: CdromCommand,
    parameters: &[u8]
) {
    drive.write_1800(0);
    for parameter in parameters {
        drive.write_1802(*parameter);
    }
    drive.write_1801(command as u8, queue);
}

/// Seeks to `start` and runs ReadN until `count` sectors have been delivered,
/// printing every interrupt along the way.
fn simulate_read(router: &mut DiscAccessRouter, start: u32, count: u32) {

    let mut drive = PsxCdromDrive::new();
    let mut queue = EventQueue::new();
    let mut read_started = false;
    let mut delivered = 0;
    let mut failures = 0;

    send_command(&mut drive, &mut queue, CdromCommand::SETLOC, &Msf::from_lsn(start).to_bcd());

    while delivered < count {
        let Some(event) = queue.next() else {
            break;
        };
        drive.on_event(event, router, &mut queue);

        if !queue.interrupt_raised {
            continue;
        }
        queue.interrupt_raised = false;

        let cause = drive.interrupt_cause();
        let mut result = Vec::new();
        while drive.read_1800() & 0x20 != 0 {
            result.push(drive.read_1801());
        }

        let mut first_bytes = String::new();
        if cause == IrqCause::DATAREADY {
            drive.write_1800(0);
            drive.write_1803(0x80, &mut queue);
            let mut data = [0u8; 2048];
            let copied = drive.chunk_copy(&mut data);
            let preview: Vec<String> = data[..copied.min(8)].iter().map(|b| format!("{:02X}", b)).collect();
            first_bytes = format!("  sector {} data {}", drive.position().to_lsn().saturating_sub(1), preview.join(" "));
            delivered += 1;
        }

        println!("{:>10}  {:<12} {:02X?}{}", queue.now, format!("{:?}", cause), result, first_bytes);

        drive.write_1800(1);
        drive.write_1803(0x07, &mut queue);

        if cause == IrqCause::DISKERROR {
            failures += 1;
            if failures > MAX_FAILURES {
                log::warn!("Giving up after {} failed reads", failures);
                break;
            }
        }

        if !read_started {
            read_started = true;
            send_command(&mut drive, &mut queue, CdromCommand::READN, &[]);
        }
    }

    println!("Delivered {} sectors in {} cycles", delivered, queue.now);
}

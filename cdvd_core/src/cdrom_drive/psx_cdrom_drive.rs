// SPDX-License-Identifier: GPL-3.0
// psx_cdrom_drive.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use super::{CdromDrive, CdromDriveBridge, CdromEvent, PSX_CLOCK};
use crate::{
    cdvd_access::{DiscAccessRouter, TrayStatus},
    disc_image::SectorMode,
    disc_type::DiscType,
};
use cdvd_utility::{BcdByte, FRAMES_PER_MINUTE, FRAMES_PER_SECOND, Msf};


/// Delay before a command's first response.
const ACK_DELAY: u32 = 0x800;

/// Delay before the second response of ID and ReadToc.
const SECOND_PHASE_DELAY: u32 = 0x800;

/// Pause and Init take far longer than anything else to complete.
const COMPLETE_DELAY: u32 = 0x40000;

/// Delay between a sector flagged as the end of a file and the automatic pause.
const AUTO_PAUSE_DELAY: u32 = 0x400;

/// Delay before an event held back by an unacknowledged interrupt runs again.
const DEFERRED_DELAY: u32 = 0x800;

/// Cycles taken to read one sector at single speed.
const READ_TIME: u32 = PSX_CLOCK / 75 / 2;

/// The fast read hack divides the read time by this.
const FAST_READ_DIVISOR: u32 = 4;

/// Size of a sector as held in the transfer buffer: a raw frame without its sync
/// pattern.
const TRANSFER_SIZE: usize = 2340;

/// Where the user data starts within the transfer buffer.
const TRANSFER_DATA_OFFSET: usize = 12;

/// Bytes handed out per sector unless whole sectors are requested.
const DATA_SIZE: usize = 2048;

/// Offset of the submode byte within the transfer buffer.
const SUBMODE_OFFSET: usize = 4 + 2;

/// Depth of the parameter and response FIFOs.
const FIFO_SIZE: usize = 16;

// Status byte bits.
const STAT_ERROR: u8 = 0x01;
const STAT_MOTOR: u8 = 0x02;
const STAT_SHELL_OPEN: u8 = 0x10;
const STAT_READ: u8 = 0x20;
const STAT_SEEK: u8 = 0x40;
const STAT_PLAY: u8 = 0x80;

// Mode register bits.
const MODE_AUTO_PAUSE: u8 = 0x02;
const MODE_SECTOR_SIZE: u8 = 0x30;
const MODE_DOUBLE_SPEED: u8 = 0x80;

/// Submode bit marking the last sector of a file.
const SUBMODE_EOF: u8 = 0x80;

// Error codes returned after the status byte.
const ERROR_INVALID_PARAMETER: u8 = 0x10;
const ERROR_INVALID_COMMAND: u8 = 0x40;

// Answers to the Test command's sub-functions.
const TEST_VERSION: [u8; 4] = [0x98, 0x06, 0x10, 0xC3];
const TEST_REGION: &[u8] = b"for Europe";
const TEST_CONTROLLER: &[u8] = b"CXD2940Q";
const TEST_DECODER: &[u8] = b"CXD1815Q";

/// This enum represents every command the controller accepts.
/// Integer codes are the ones written to port 0x1F801801.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CdromCommand {
    SYNC = 0,
    NOP = 1,
    SETLOC = 2,
    PLAY = 3,
    FORWARD = 4,
    BACKWARD = 5,
    READN = 6,
    STANDBY = 7,
    STOP = 8,
    PAUSE = 9,
    INIT = 10,
    MUTE = 11,
    DEMUTE = 12,
    SETFILTER = 13,
    SETMODE = 14,
    GETMODE = 15,
    GETLOCL = 16,
    GETLOCP = 17,
    GETTN = 19,
    GETTD = 20,
    SEEKL = 21,
    SEEKP = 22,
    TEST = 25,
    ID = 26,
    READS = 27,
    RESET = 28,
    READTOC = 30,
}

impl CdromCommand {

    /// Decodes a command byte.
    pub fn from_code(code: u8) -> Option<Self> {
        let command = match code {
            0 => CdromCommand::SYNC,
            1 => CdromCommand::NOP,
            2 => CdromCommand::SETLOC,
            3 => CdromCommand::PLAY,
            4 => CdromCommand::FORWARD,
            5 => CdromCommand::BACKWARD,
            6 => CdromCommand::READN,
            7 => CdromCommand::STANDBY,
            8 => CdromCommand::STOP,
            9 => CdromCommand::PAUSE,
            10 => CdromCommand::INIT,
            11 => CdromCommand::MUTE,
            12 => CdromCommand::DEMUTE,
            13 => CdromCommand::SETFILTER,
            14 => CdromCommand::SETMODE,
            15 => CdromCommand::GETMODE,
            16 => CdromCommand::GETLOCL,
            17 => CdromCommand::GETLOCP,
            19 => CdromCommand::GETTN,
            20 => CdromCommand::GETTD,
            21 => CdromCommand::SEEKL,
            22 => CdromCommand::SEEKP,
            25 => CdromCommand::TEST,
            26 => CdromCommand::ID,
            27 => CdromCommand::READS,
            28 => CdromCommand::RESET,
            30 => CdromCommand::READTOC,
            _ => return None,
        };
        Some(command)
    }
}

/// This enum represents the interrupt causes reported through port 0x1F801803.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum IrqCause {
    NOINTR = 0,
    DATAREADY = 1,
    COMPLETE = 2,
    ACKNOWLEDGE = 3,
    DATAEND = 4,
    DISKERROR = 5,
}

/// Coarse view of what the controller is doing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    CommandPending,
    AckPending,
    Executing,
    ResultReady,
    DataReady,
}

/// What the command timer does when it next fires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CommandPhase {
    Issue(CdromCommand),
    Invalid(u8),
    PauseComplete,
    InitComplete,
    IdComplete,
    ReadTocComplete,
    AutoPause,
    ReadAck,
}

/// This struct models the CD-ROM controller of the PlayStation.
pub struct PsxCdromDrive {

    // This controls what we are reading/writing.
    port_index: u8,

    // This stores parameters for the next command, and those latched by the
    // command being executed.
    parameter_fifo: [u8; FIFO_SIZE],
    parameter_count: usize,
    command_parameters: [u8; FIFO_SIZE],
    command_parameter_count: usize,

    // This stores command responses.
    response_fifo: [u8; FIFO_SIZE],
    response_count: usize,
    response_index: usize,

    // This stores the last sector read and the part of it being handed out.
    transfer: [u8; TRANSFER_SIZE],
    sector_available: bool,
    data_index: usize,
    data_end: usize,

    // Interrupt registers, and the events held back while an interrupt is owed.
    interrupt_enable: u8,
    interrupt_cause: IrqCause,
    deferred_command: bool,
    deferred_read: bool,

    // Busy flag, what the command timer will do next, and a command written
    // while an interrupt was still owed.
    busy: bool,
    phase: Option<CommandPhase>,
    held_command: Option<u8>,

    // Drive status byte and the registers set by Setmode, Setfilter and Mute.
    stat: u8,
    mode: u8,
    file: u8,
    channel: u8,
    muted: bool,

    // This stores the setloc target, and whether a read has started from it.
    seek_target: Msf,
    setloc_processed: bool,

    // Read loop position, the last sector it read, and whether it failed to start.
    position: Msf,
    last_read: Msf,
    reading: bool,
    seeked: bool,
    read_error: bool,
}

/// Implementation functions for the CD-ROM drive itself.
impl PsxCdromDrive {

    /// Creates a new CD-ROM drive object with the correct initial state.
    pub fn new() -> Self {
        PsxCdromDrive {
            port_index: 0,

            parameter_fifo: [0; FIFO_SIZE],
            parameter_count: 0,
            command_parameters: [0; FIFO_SIZE],
            command_parameter_count: 0,

            response_fifo: [0; FIFO_SIZE],
            response_count: 0,
            response_index: 0,

            transfer: [0; TRANSFER_SIZE],
            sector_available: false,
            data_index: 0,
            data_end: 0,

            interrupt_enable: 0x1F,
            interrupt_cause: IrqCause::NOINTR,
            deferred_command: false,
            deferred_read: false,

            busy: false,
            phase: None,
            held_command: None,

            stat: 0,
            mode: 0,
            file: 0,
            channel: 0,
            muted: false,

            seek_target: Msf::default(),
            setloc_processed: true,

            position: Msf::default(),
            last_read: Msf::default(),
            reading: false,
            seeked: false,
            read_error: false,
        }
    }

    /// Returns what the controller is currently doing.
    pub fn state(&self) -> ControllerState {
        if self.interrupt_cause == IrqCause::DATAREADY {
            ControllerState::DataReady
        } else if self.interrupt_cause != IrqCause::NOINTR {
            ControllerState::ResultReady
        } else if self.busy {
            ControllerState::AckPending
        } else if self.phase.is_some() || self.reading {
            ControllerState::Executing
        } else if self.parameter_count > 0 {
            ControllerState::CommandPending
        } else {
            ControllerState::Idle
        }
    }

    /// Returns the interrupt currently owed to the CPU.
    pub fn interrupt_cause(&self) -> IrqCause {
        self.interrupt_cause
    }

    /// Returns the drive status byte.
    pub fn stat(&self) -> u8 {
        self.stat
    }

    /// Returns the mode register.
    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Returns the target set by the last Setloc.
    pub fn seek_target(&self) -> Msf {
        self.seek_target
    }

    /// Returns the position the read loop will read next.
    pub fn position(&self) -> Msf {
        self.position
    }

    /// Returns true while the read loop is running.
    pub fn is_reading(&self) -> bool {
        self.reading
    }

    /// Returns true if the controller is muted.
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Latches the parameters for a new command and clears the parameter FIFO.
    fn latch_parameters(&mut self) {

        self.command_parameters = self.parameter_fifo;
        self.command_parameter_count = self.parameter_count;
        self.parameter_count = 0;
    }

    /// Returns a latched parameter, or 0 if the command was given too few.
    fn parameter(&self, index: usize) -> u8 {
        if index < self.command_parameter_count {
            self.command_parameters[index]
        } else {
            0
        }
    }

    /// Replaces the response FIFO contents.
    fn set_result(&mut self, bytes: &[u8]) {

        let count = bytes.len().min(FIFO_SIZE);
        self.response_fifo[..count].copy_from_slice(&bytes[..count]);
        self.response_count = count;
        self.response_index = 0;
    }

    /// Raises an interrupt with the supplied cause.
    fn deliver(&mut self, cause: IrqCause, bridge: &mut dyn CdromDriveBridge) {

        self.interrupt_cause = cause;
        if cause as u8 & self.interrupt_enable != 0 {
            bridge.raise_interrupt();
        }
    }

    /// Answers with the status byte and an Acknowledge interrupt.
    fn acknowledge_with_stat(&mut self, bridge: &mut dyn CdromDriveBridge) {

        let stat = self.stat;
        self.set_result(&[stat]);
        self.deliver(IrqCause::ACKNOWLEDGE, bridge);
    }

    /// Answers with the error bit set and an error code.
    fn error_response(&mut self, code: u8, bridge: &mut dyn CdromDriveBridge) {

        let stat = self.stat | STAT_ERROR;
        self.set_result(&[stat, code]);
        self.deliver(IrqCause::DISKERROR, bridge);
    }

    /// Arms the command timer.
    fn schedule_phase(
        &mut self,
        phase: CommandPhase,
        delay: u32,
        bridge: &mut dyn CdromDriveBridge
    ) {
        self.phase = Some(phase);
        self.deferred_command = false;
        bridge.schedule(CdromEvent::Command, delay);
    }

    /// Stops the read loop, dropping any sector it has in flight.
    fn stop_reading(&mut self, bridge: &mut dyn CdromDriveBridge) {

        if self.reading {
            self.reading = false;
            bridge.cancel(CdromEvent::Read);
        }
        self.deferred_read = false;
        self.stat &= !(STAT_READ | STAT_SEEK | STAT_PLAY);
    }

    /// Returns how long one sector takes to read in the current mode.
    fn read_time(&self, router: &DiscAccessRouter) -> u32 {

        let mut time = READ_TIME;
        if self.mode & MODE_DOUBLE_SPEED != 0 {
            time /= 2;
        }
        if router.config().fast_cdvd {
            time /= FAST_READ_DIVISOR;
        }
        time
    }

    /// Starts reading the sector at the current position and arms the read timer.
    fn arm_read(&mut self, router: &mut DiscAccessRouter, bridge: &mut dyn CdromDriveBridge) {

        let lsn = self.position.to_lsn();
        self.read_error = match router.read_track(lsn, SectorMode::Mode2340) {
            Ok(()) => false,
            Err(error) => {
                log::debug!("CD-ROM read of sector {} failed to start: {}", lsn, error);
                true
            },
        };
        bridge.schedule(CdromEvent::Read, self.read_time(router));
    }

    /// Mirrors the tray position into the status byte.
    fn update_shell(&mut self, router: &DiscAccessRouter) {
        if router.get_tray_status() == TrayStatus::OPEN {
            self.stat |= STAT_SHELL_OPEN;
        } else {
            self.stat &= !STAT_SHELL_OPEN;
        }
    }

    /// Carries out a command phase whose delay has elapsed.
    fn run_phase(
        &mut self,
        phase: CommandPhase,
        router: &mut DiscAccessRouter,
        bridge: &mut dyn CdromDriveBridge
    ) {
        log::debug!("CD-ROM phase {:?}", phase);

        self.busy = false;
        self.stat |= STAT_MOTOR;
        self.update_shell(router);

        match phase {
            CommandPhase::Issue(command) => self.issue(command, router, bridge),
            CommandPhase::Invalid(_) => self.error_response(ERROR_INVALID_COMMAND, bridge),
            CommandPhase::PauseComplete => {
                self.stat &= !STAT_READ;
                let stat = self.stat;
                self.set_result(&[stat]);
                self.deliver(IrqCause::COMPLETE, bridge);
            },
            CommandPhase::InitComplete => {
                self.mode = 0;
                let stat = self.stat;
                self.set_result(&[stat]);
                self.deliver(IrqCause::COMPLETE, bridge);
            },
            CommandPhase::IdComplete => {
                let mut result = [0u8; 8];
                if router.get_disk_type() == DiscType::CDDA {
                    result[0] = 0x08;
                    result[1] = 0x10;
                }
                result[1] |= 0x80;
                result[4..8].copy_from_slice(b"PCSX");
                self.set_result(&result);
                self.deliver(IrqCause::COMPLETE, bridge);
            },
            CommandPhase::ReadTocComplete => {
                let stat = self.stat;
                self.set_result(&[stat]);
                self.deliver(IrqCause::COMPLETE, bridge);
            },
            CommandPhase::AutoPause => {
                self.stat &= !STAT_READ;
                let stat = self.stat;
                self.set_result(&[stat]);
                self.deliver(IrqCause::DATAEND, bridge);
            },
            CommandPhase::ReadAck => {
                if !self.reading {
                    return;
                }

                // The response shows the status from before the read began.
                self.acknowledge_with_stat(bridge);
                if !self.seeked {
                    self.seeked = true;
                    self.stat |= STAT_SEEK;
                }
                self.stat |= STAT_READ;
                self.arm_read(router, bridge);
            },
        }
    }

    /// Produces the first response of a command.
    fn issue(
        &mut self,
        command: CdromCommand,
        router: &mut DiscAccessRouter,
        bridge: &mut dyn CdromDriveBridge
    ) {
        match command {
            CdromCommand::SYNC
            | CdromCommand::NOP
            | CdromCommand::SETLOC
            | CdromCommand::FORWARD
            | CdromCommand::BACKWARD
            | CdromCommand::STANDBY
            | CdromCommand::MUTE
            | CdromCommand::DEMUTE
            | CdromCommand::SETFILTER
            | CdromCommand::SETMODE
            | CdromCommand::SEEKL
            | CdromCommand::SEEKP
            | CdromCommand::READN
            | CdromCommand::READS => self.acknowledge_with_stat(bridge),
            CdromCommand::PLAY => {
                self.stat |= STAT_PLAY;
                self.acknowledge_with_stat(bridge);
            },
            CdromCommand::STOP => {
                self.stat &= !STAT_MOTOR;
                self.acknowledge_with_stat(bridge);
            },
            CdromCommand::PAUSE => {
                self.acknowledge_with_stat(bridge);
                self.schedule_phase(CommandPhase::PauseComplete, COMPLETE_DELAY, bridge);
            },
            CdromCommand::INIT => {
                self.acknowledge_with_stat(bridge);
                self.schedule_phase(CommandPhase::InitComplete, COMPLETE_DELAY, bridge);
            },
            CdromCommand::ID => {
                self.acknowledge_with_stat(bridge);
                self.schedule_phase(CommandPhase::IdComplete, SECOND_PHASE_DELAY, bridge);
            },
            CdromCommand::READTOC => {
                self.acknowledge_with_stat(bridge);
                self.schedule_phase(CommandPhase::ReadTocComplete, SECOND_PHASE_DELAY, bridge);
            },
            CdromCommand::RESET => {
                self.reset_state();
                self.stat = STAT_MOTOR;
                self.acknowledge_with_stat(bridge);
            },
            CdromCommand::GETMODE => {
                let result = [self.stat, self.mode, self.file, self.channel, 0, 0];
                self.set_result(&result);
                self.deliver(IrqCause::ACKNOWLEDGE, bridge);
            },
            CdromCommand::GETLOCL => {
                let mut result = [0u8; 8];
                result.copy_from_slice(&self.transfer[..8]);
                self.set_result(&result);
                self.deliver(IrqCause::ACKNOWLEDGE, bridge);
            },
            CdromCommand::GETLOCP => {
                let relative = relative_msf(self.last_read.to_lsn()).to_bcd();
                let absolute = self.last_read.to_bcd();
                let result = [
                    1, 1,
                    relative[0], relative[1], relative[2],
                    absolute[0], absolute[1], absolute[2],
                ];
                self.set_result(&result);
                self.deliver(IrqCause::ACKNOWLEDGE, bridge);
            },
            CdromCommand::GETTN => match router.get_tn() {
                Ok(tracks) => {
                    let result = [self.stat, tracks.first.to_bcd(), tracks.last.to_bcd()];
                    self.set_result(&result);
                    self.deliver(IrqCause::ACKNOWLEDGE, bridge);
                },
                Err(error) => {
                    log::debug!("GetTN failed: {}", error);
                    let stat = self.stat | STAT_ERROR;
                    self.set_result(&[stat]);
                    self.deliver(IrqCause::DISKERROR, bridge);
                },
            },
            CdromCommand::GETTD => {
                let track = self.parameter(0).from_bcd();
                match router.get_td(track) {
                    Ok(descriptor) => {
                        let start = Msf::from_lsn(descriptor.lsn).to_bcd();
                        let result = [self.stat, start[0], start[1]];
                        self.set_result(&result);
                        self.deliver(IrqCause::ACKNOWLEDGE, bridge);
                    },
                    Err(error) => {
                        log::debug!("GetTD of track {} failed: {}", track, error);
                        self.error_response(ERROR_INVALID_PARAMETER, bridge);
                    },
                }
            },
            CdromCommand::TEST => {
                let answer: &[u8] = match self.parameter(0) {
                    0x20 => &TEST_VERSION,
                    0x22 => TEST_REGION,
                    0x23 => TEST_CONTROLLER,
                    0x24 => TEST_DECODER,
                    _ => {
                        self.error_response(ERROR_INVALID_PARAMETER, bridge);
                        return;
                    },
                };
                self.set_result(answer);
                self.deliver(IrqCause::ACKNOWLEDGE, bridge);
            },
        }
    }

    /// Handles the read timer: delivers the sector that was in flight and moves on.
    fn complete_read(&mut self, router: &mut DiscAccessRouter, bridge: &mut dyn CdromDriveBridge) {

        self.stat |= STAT_READ | STAT_MOTOR;
        self.stat &= !STAT_SEEK;

        let delivered = if self.read_error {
            false
        } else {
            match router.get_buffer(&mut self.transfer) {
                Ok(_) => true,
                Err(error) => {
                    log::warn!("CD-ROM read of sector {} failed: {}", self.position.to_lsn(), error);
                    false
                },
            }
        };

        // A failed read reports a disc error and retries the same sector.
        if !delivered {
            self.transfer.fill(0);
            let stat = self.stat | STAT_ERROR;
            self.set_result(&[stat]);
            self.deliver(IrqCause::DISKERROR, bridge);
            self.arm_read(router, bridge);
            return;
        }

        self.last_read = self.position;
        self.position.increment();
        self.sector_available = true;

        let stat = self.stat;
        self.set_result(&[stat]);
        self.deliver(IrqCause::DATAREADY, bridge);

        if self.transfer[SUBMODE_OFFSET] & SUBMODE_EOF != 0 && self.mode & MODE_AUTO_PAUSE != 0 {
            self.reading = false;
            self.schedule_phase(CommandPhase::AutoPause, AUTO_PAUSE_DELAY, bridge);
        } else {
            self.arm_read(router, bridge);
        }
    }

    /// Moves the last sector read into the data FIFO.
    fn request_data(&mut self) {

        if !self.sector_available {
            return;
        }
        self.sector_available = false;

        let (start, end) = match self.mode & MODE_SECTOR_SIZE {
            0x00 | 0x10 => (TRANSFER_DATA_OFFSET, TRANSFER_DATA_OFFSET + DATA_SIZE),
            _ => (0, TRANSFER_SIZE),
        };
        self.data_index = start;
        self.data_end = end;
    }

    /// Clears the owed interrupt and lets held back events run again. A command
    /// written in the meantime is latched now and replaces any phase still waiting.
    fn acknowledge_interrupt(&mut self, bridge: &mut dyn CdromDriveBridge) {

        self.interrupt_cause = IrqCause::NOINTR;

        if let Some(value) = self.held_command.take() {
            self.deferred_command = false;
            self.latch_command(value, bridge);
        } else if self.deferred_command {
            self.deferred_command = false;
            bridge.schedule(CdromEvent::Command, DEFERRED_DELAY);
        }
        if self.deferred_read {
            self.deferred_read = false;
            bridge.schedule(CdromEvent::Read, DEFERRED_DELAY);
        }
    }

    /// Latches a command written to port 0x1F801801 along with its parameters,
    /// applies its immediate effects and arms its first response.
    fn latch_command(&mut self, value: u8, bridge: &mut dyn CdromDriveBridge) {

        self.latch_parameters();
        self.busy = true;
        self.response_count = 0;
        self.response_index = 0;

        let Some(command) = CdromCommand::from_code(value) else {
            log::warn!("Unknown CD-ROM command 0x{:02X}", value);
            self.schedule_phase(CommandPhase::Invalid(value), ACK_DELAY, bridge);
            return;
        };

        log::debug!(
            "CD-ROM command {:?} with parameters {:02X?}",
            command,
            &self.command_parameters[..self.command_parameter_count]
        );

        let mut phase = CommandPhase::Issue(command);

        match command {
            CdromCommand::SETLOC => {
                let target = Msf::from_bcd([self.parameter(0), self.parameter(1), self.parameter(2)]);
                if !target.is_zero() {
                    self.seek_target = target;
                }
                self.setloc_processed = false;
            },
            CdromCommand::READN | CdromCommand::READS => {
                self.stop_reading(bridge);
                if !self.setloc_processed {
                    self.position = self.seek_target;
                    self.setloc_processed = true;
                }
                self.reading = true;
                self.seeked = false;
                phase = CommandPhase::ReadAck;
            },
            CdromCommand::SEEKL | CdromCommand::SEEKP => {
                self.stop_reading(bridge);
                self.position = self.seek_target;
                self.setloc_processed = true;
            },
            CdromCommand::PLAY
            | CdromCommand::PAUSE
            | CdromCommand::INIT
            | CdromCommand::STOP
            | CdromCommand::STANDBY
            | CdromCommand::RESET => self.stop_reading(bridge),
            CdromCommand::SETMODE => self.mode = self.parameter(0),
            CdromCommand::SETFILTER => {
                self.file = self.parameter(0);
                self.channel = self.parameter(1);
            },
            CdromCommand::MUTE => self.muted = true,
            CdromCommand::DEMUTE => self.muted = false,
            _ => {},
        }

        self.schedule_phase(phase, ACK_DELAY, bridge);
    }

    /// Puts every register back to its power-on value.
    fn reset_state(&mut self) {
        *self = PsxCdromDrive::new();
    }
}

impl CdromDrive for PsxCdromDrive {

    fn chunk_copy(&mut self, dst: &mut [u8]) -> usize {

        let count = dst.len().min(self.data_end - self.data_index);
        dst[..count].copy_from_slice(&self.transfer[self.data_index..self.data_index + count]);
        self.data_index += count;
        count
    }

    fn read_1800(&self) -> u8 {

        let mut value = self.port_index;
        if self.parameter_count == 0 {
            value |= 0x08;
        }
        if self.parameter_count < FIFO_SIZE {
            value |= 0x10;
        }
        if self.response_index < self.response_count {
            value |= 0x20;
        }
        if self.data_index < self.data_end {
            value |= 0x40;
        }
        if self.busy {
            value |= 0x80;
        }
        value
    }

    fn read_1801(&mut self) -> u8 {

        if self.response_index >= self.response_count {
            return 0;
        }
        let value = self.response_fifo[self.response_index];
        self.response_index += 1;
        value
    }

    fn read_1802(&mut self) -> u8 {

        if self.data_index >= self.data_end {
            return 0;
        }
        let value = self.transfer[self.data_index];
        self.data_index += 1;
        value
    }

    fn read_1803(&self) -> u8 {
        match self.port_index & 1 {
            0 => self.interrupt_enable | 0xE0,
            _ => self.interrupt_cause as u8 | 0xE0,
        }
    }

    fn write_1800(&mut self, value: u8) {
        self.port_index = value & 0x3;
    }

    fn write_1801(&mut self, value: u8, bridge: &mut dyn CdromDriveBridge) {

        // Only index 0 holds the command register; the rest drive audio volume.
        if self.port_index != 0 {
            return;
        }

        // Nothing is latched until the host has acknowledged the last interrupt.
        if self.interrupt_cause != IrqCause::NOINTR {
            log::debug!("CD-ROM command 0x{:02X} held until acknowledge", value);
            self.held_command = Some(value);
            self.busy = true;
            return;
        }

        self.latch_command(value, bridge);
    }

    fn write_1802(&mut self, value: u8) {
        match self.port_index {
            0 => {
                if self.parameter_count < FIFO_SIZE {
                    self.parameter_fifo[self.parameter_count] = value;
                    self.parameter_count += 1;
                }
            },
            1 => self.interrupt_enable = value & 0x1F,
            _ => {},
        }
    }

    fn write_1803(&mut self, value: u8, bridge: &mut dyn CdromDriveBridge) {
        match self.port_index {
            0 => {
                if value & 0x80 != 0 {
                    self.request_data();
                } else {
                    self.data_index = 0;
                    self.data_end = 0;
                }
            },
            1 => {
                if value & 0x07 != 0 {
                    self.acknowledge_interrupt(bridge);
                }
                if value & 0x40 != 0 {
                    self.parameter_count = 0;
                }
            },
            _ => {},
        }
    }

    fn on_event(
        &mut self,
        event: CdromEvent,
        router: &mut DiscAccessRouter,
        bridge: &mut dyn CdromDriveBridge
    ) {
        match event {
            CdromEvent::Command => {
                let Some(phase) = self.phase else {
                    return;
                };
                if self.interrupt_cause != IrqCause::NOINTR {
                    self.deferred_command = true;
                    return;
                }
                self.phase = None;
                self.run_phase(phase, router, bridge);
            },
            CdromEvent::Read => {
                if !self.reading {
                    return;
                }
                if self.interrupt_cause != IrqCause::NOINTR {
                    self.deferred_read = true;
                    return;
                }
                self.complete_read(router, bridge);
            },
        }
    }

    fn reset(&mut self, bridge: &mut dyn CdromDriveBridge) {

        bridge.cancel(CdromEvent::Command);
        bridge.cancel(CdromEvent::Read);
        self.reset_state();
    }
}

/// Converts a sector number to a position relative to the start of track 1.
fn relative_msf(lsn: u32) -> Msf {
    Msf::new(
        (lsn / FRAMES_PER_MINUTE) as u8,
        ((lsn % FRAMES_PER_MINUTE) / FRAMES_PER_SECOND) as u8,
        (lsn % FRAMES_PER_SECOND) as u8,
    )
}

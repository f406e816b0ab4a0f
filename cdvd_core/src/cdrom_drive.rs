// SPDX-License-Identifier: GPL-3.0
// cdrom_drive.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use crate::cdvd_access::DiscAccessRouter;

/// This module contains the default CD-ROM controller implementation. There may be
/// others in future.
pub mod psx_cdrom_drive;

/// Cycles per second of the clock the controller is timed against.
pub const PSX_CLOCK: u32 = 36_864_000;

/// The two independent timers a controller can have running. Scheduling an event
/// which is already pending replaces it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CdromEvent {
    Command,
    Read,
}

/// This trait provides an implementation-opaque way of calling CD-ROM methods from
/// elsewhere in the system.
pub trait CdromDrive {

    /// Implementations must copy bytes from the data FIFO into the supplied buffer,
    /// as a DMA transfer would, and return how many were copied.
    fn chunk_copy(&mut self, dst: &mut [u8]) -> usize;

    /// Implementations must return a byte from the index/status register.
    fn read_1800(&self) -> u8;

    /// Implementations must return a byte from port 0x1F801801.
    fn read_1801(&mut self) -> u8;

    /// Implementations must return a byte from port 0x1F801802.
    fn read_1802(&mut self) -> u8;

    /// Implementations must return a byte from port 0x1F801803.
    fn read_1803(&self) -> u8;

    /// Implementations must write a byte to port 0x1F801800.
    fn write_1800(&mut self, value: u8);

    /// Implementations must write a byte to port 0x1F801801.
    fn write_1801(&mut self, value: u8, bridge: &mut dyn CdromDriveBridge);

    /// Implementations must write a byte to port 0x1F801802.
    fn write_1802(&mut self, value: u8);

    /// Implementations must write a byte to port 0x1F801803.
    fn write_1803(&mut self, value: u8, bridge: &mut dyn CdromDriveBridge);

    /// Implementations must carry out whatever was scheduled for the supplied
    /// event, once its delay has elapsed.
    fn on_event(
        &mut self,
        event: CdromEvent,
        router: &mut DiscAccessRouter,
        bridge: &mut dyn CdromDriveBridge
    );

    /// Implementations must return to their power-on state.
    fn reset(&mut self, bridge: &mut dyn CdromDriveBridge);
}

/// This trait provides an implementation-opaque way of the CD-ROM drive calling
/// methods from elsewhere in the system via a 'bridge'.
pub trait CdromDriveBridge {

    /// The CD-ROM drive must call this to have `event` delivered back to it after
    /// `delay` cycles.
    fn schedule(&mut self, event: CdromEvent, delay: u32);

    /// The CD-ROM drive must call this to drop a scheduled event.
    fn cancel(&mut self, event: CdromEvent);

    /// The CD-ROM drive must call this to signal its interrupt line.
    fn raise_interrupt(&mut self);
}

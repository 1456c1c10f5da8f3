/*
    Concept32
    https://github.com/dbalsom/concept32

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    devices::hsdp::controller.rs

    Implements the SEL 8064 High Speed Disk Processor.

    The controller runs up to eight drives. Each accepted channel command
    arms exactly one service event; the service routine makes one bounded
    step per tick and either re-arms itself or posts ending status and
    returns the unit to idle. Commands never transfer data at dispatch
    time.
*/

use crate::{
    channel::{
        ChannelIo, Chsa, STA_CHAN_END, STA_DEV_END, STA_UNIT_CHECK,
    },
    device_types::{
        chs::DiskChs,
        disk::{find_disk_type, DiskTypeDescriptor},
        geometry::DriveGeometry,
    },
    devices::hsdp::{
        format,
        labels,
        sense::{
            sense_payload, DriveStatus, SenseRegister, DSR_ONC, DSR_SEND, DSR_SKER, DSR_UNR,
            DSR_USEL, SNS_CMDREJ, SNS_DADE, SNS_EQUCHK, SNS_INTVENT,
        },
    },
    media::DiskMedia,
    scheduler::{ServiceResult, StartResult},
};

use std::{fmt::Display, path::Path};

use anyhow::{bail, Context};
use thiserror::Error;

/// Drives per controller. The INCH parameter block always carries eight
/// attribute words, so the count is fixed by the channel protocol.
pub const NUM_UNITS: usize = 8;

/// Largest sector any supported type uses, sizing the shared buffer.
pub const MAX_SECTOR_SIZE: usize = 1024;

/// Length of the INCH parameter block: a status buffer address word plus
/// one attribute word per drive.
pub const INCH_PARAM_LEN: usize = 36;

// Virtual-time delays, in the scheduler's units.
pub const START_DELAY: u32 = 20;
pub const SECTOR_DELAY: u32 = 10;

// Seek stepping: larger steps for larger remaining distances, with the
// re-arm delay modelling the longer arm travel.
const SEEK_STEP_LONG: u16 = 50;
const SEEK_STEP_SHORT: u16 = 20;
const SEEK_DELAY_LONG: u32 = 800;
const SEEK_DELAY_MED: u32 = 400;
const SEEK_DELAY_SHORT: u32 = 200;

/// Channel command opcodes for the class-F disk processor families.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Inch = 0x00,
    Write = 0x01,
    Read = 0x02,
    Nop = 0x03,
    Sense = 0x04,
    Seek = 0x07,
    LoadMode = 0x1F,
    WriteSectorLabel = 0x31,
    ReadSectorLabel = 0x32,
    Rezero = 0x37,
    IncHead = 0x47,
    WriteTrackLabel = 0x51,
    ReadTrackLabel = 0x52,
    ReadAngular = 0xA2,
}

impl Command {
    pub fn from_opcode(op: u8) -> Option<Command> {
        match op {
            0x00 => Some(Command::Inch),
            0x01 => Some(Command::Write),
            0x02 => Some(Command::Read),
            0x03 => Some(Command::Nop),
            0x04 => Some(Command::Sense),
            0x07 => Some(Command::Seek),
            0x1F => Some(Command::LoadMode),
            0x31 => Some(Command::WriteSectorLabel),
            0x32 => Some(Command::ReadSectorLabel),
            0x37 => Some(Command::Rezero),
            0x47 => Some(Command::IncHead),
            0x51 => Some(Command::WriteTrackLabel),
            0x52 => Some(Command::ReadTrackLabel),
            0xA2 => Some(Command::ReadAngular),
            _ => None,
        }
    }

    pub fn opcode(&self) -> u8 {
        *self as u8
    }

    /// Commands that move user data and therefore require attached media.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Command::Read | Command::Write)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Inch => write!(f, "Initialize Channel"),
            Command::Write => write!(f, "Write Data"),
            Command::Read => write!(f, "Read Data"),
            Command::Nop => write!(f, "No Operation"),
            Command::Sense => write!(f, "Sense"),
            Command::Seek => write!(f, "Seek"),
            Command::LoadMode => write!(f, "Load Mode Register"),
            Command::WriteSectorLabel => write!(f, "Write Sector Label"),
            Command::ReadSectorLabel => write!(f, "Read Sector Label"),
            Command::Rezero => write!(f, "Rezero"),
            Command::IncHead => write!(f, "Increment Head Address"),
            Command::WriteTrackLabel => write!(f, "Write Track Label"),
            Command::ReadTrackLabel => write!(f, "Read Track Label"),
            Command::ReadAngular => write!(f, "Read Angular Position"),
        }
    }
}

/// Execution phase of a unit's current command. A unit is in a non-idle
/// phase exactly when one service event is outstanding for it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    /// Command latched; the first service tick has not run yet.
    Pending,
    Seeking,
    ReadingData,
    WritingData,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("unit {0} does not exist")]
    InvalidUnit(usize),
    #[error("unknown disk type {0:?}")]
    UnknownDiskType(String),
    #[error("unit {0} is attached; detach it before changing type")]
    UnitAttached(usize),
    #[error("unit {0} is not attached")]
    NotAttached(usize),
    #[error("no disk type selected for unit {0}")]
    NoTypeSelected(usize),
}

/// Whether attach may initialize a blank volume.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FormatPolicy {
    #[default]
    FormatIfBlank,
    /// Refuse to touch a blank volume; attach fails and the unit stays
    /// detached.
    NeverFormat,
}

/// Result of a halt-I/O request from the channel layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HaltResult {
    /// Nothing was in flight.
    Idle,
    /// An operation was stopped; the caller must cancel the unit's
    /// pending service event.
    Stopped,
}

/// Where the channel layer should IPL from after a boot request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BootTarget {
    pub chsa: Chsa,
    /// Scratchpad device class word; class F for the disk processor.
    pub device_class: u16,
}

/// Per-drive register state.
pub struct UnitState {
    chsa: Chsa,
    model: Option<&'static DiskTypeDescriptor>,
    cmd: Option<Command>,
    phase: Phase,
    /// Requested position: the subchannel target address register.
    star: DiskChs,
    /// Physical position. Dispatch never writes this; only the service
    /// routine moves it.
    chs: DiskChs,
    sense: SenseRegister,
    status: DriveStatus,
    /// Drive attribute register, supplied by INCH.
    attr: u32,
    media: Option<DiskMedia>,
}

impl UnitState {
    fn new(chsa: Chsa) -> Self {
        UnitState {
            chsa,
            model: None,
            cmd: None,
            phase: Phase::Idle,
            star: DiskChs::default(),
            chs: DiskChs::default(),
            sense: SenseRegister::default(),
            status: DriveStatus::ready(),
            attr: 0,
            media: None,
        }
    }

    pub fn chsa(&self) -> Chsa {
        self.chsa
    }

    pub fn model(&self) -> Option<&'static DiskTypeDescriptor> {
        self.model
    }

    pub fn command(&self) -> Option<Command> {
        self.cmd
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn star(&self) -> DiskChs {
        self.star
    }

    pub fn position(&self) -> DiskChs {
        self.chs
    }

    pub fn sense(&self) -> SenseRegister {
        self.sense
    }

    pub fn drive_status(&self) -> DriveStatus {
        self.status
    }

    pub fn attributes(&self) -> u32 {
        self.attr
    }

    pub fn is_attached(&self) -> bool {
        self.media.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.cmd.is_some() || self.phase != Phase::Idle
    }

    pub fn media_mut(&mut self) -> Option<&mut DiskMedia> {
        self.media.as_mut()
    }

    fn geometry(&self) -> Option<DriveGeometry> {
        self.model.map(|m| m.geometry())
    }

    /// Return to idle with no command latched.
    fn finish(&mut self) {
        self.cmd = None;
        self.phase = Phase::Idle;
    }

    /// Abort the in-flight command with an error status.
    fn fail(&mut self, chan: &mut dyn ChannelIo, sense_bits: u32) {
        self.sense.set(sense_bits);
        self.finish();
        chan.chan_end(self.chsa, STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK);
    }
}

/// The disk processor: eight drives behind one subchannel, sharing a
/// single sector buffer. Only one unit is mid-transfer at a time.
pub struct DiskProcessor {
    units: Vec<UnitState>,
    buf: [u8; MAX_SECTOR_SIZE],
    /// Unit whose transfer currently owns the shared buffer.
    selected: usize,
    /// Status buffer address latched by INCH.
    inch_addr: Option<u32>,
}

impl DiskProcessor {
    /// Create a controller with its units at `base_chsa`, `base_chsa+2`,
    /// ... as the channel firmware addresses disk processor drives.
    pub fn new(base_chsa: Chsa) -> Self {
        let units = (0..NUM_UNITS)
            .map(|i| UnitState::new(base_chsa + (i as Chsa) * 2))
            .collect();
        DiskProcessor {
            units,
            buf: [0; MAX_SECTOR_SIZE],
            selected: 0,
            inch_addr: None,
        }
    }

    pub fn unit(&self, unit: usize) -> Option<&UnitState> {
        self.units.get(unit)
    }

    pub fn unit_mut(&mut self, unit: usize) -> Option<&mut UnitState> {
        self.units.get_mut(unit)
    }

    pub fn inch_addr(&self) -> Option<u32> {
        self.inch_addr
    }

    /// `SET <unit> TYPE=<name>`: select a drive model before attach.
    pub fn set_unit_type(&mut self, unit: usize, name: &str) -> Result<(), ControllerError> {
        let u = self
            .units
            .get_mut(unit)
            .ok_or(ControllerError::InvalidUnit(unit))?;
        if u.is_attached() {
            return Err(ControllerError::UnitAttached(unit));
        }
        let desc = find_disk_type(name).ok_or_else(|| ControllerError::UnknownDiskType(name.into()))?;
        u.model = Some(desc);
        log::debug!("unit {unit}: type set to {}", desc.name);
        Ok(())
    }

    /// Attach a backing file, formatting a blank volume.
    pub fn attach(
        &mut self,
        unit: usize,
        path: &Path,
        chan: &mut dyn ChannelIo,
    ) -> anyhow::Result<()> {
        self.attach_with(unit, path, FormatPolicy::FormatIfBlank, chan)
    }

    pub fn attach_with(
        &mut self,
        unit: usize,
        path: &Path,
        policy: FormatPolicy,
        chan: &mut dyn ChannelIo,
    ) -> anyhow::Result<()> {
        let desc = {
            let u = self
                .units
                .get(unit)
                .ok_or(ControllerError::InvalidUnit(unit))?;
            if u.is_attached() {
                bail!(ControllerError::UnitAttached(unit));
            }
            u.model.ok_or(ControllerError::NoTypeSelected(unit))?
        };
        let media = DiskMedia::open_file(path, desc.geometry())
            .with_context(|| format!("opening disk image {}", path.display()))?;
        self.attach_media(unit, media, policy, chan)
    }

    /// Attach already-open media. The attach path for in-memory volumes.
    pub fn attach_media(
        &mut self,
        unit: usize,
        mut media: DiskMedia,
        policy: FormatPolicy,
        chan: &mut dyn ChannelIo,
    ) -> anyhow::Result<()> {
        let u = self
            .units
            .get_mut(unit)
            .ok_or(ControllerError::InvalidUnit(unit))?;
        if u.is_attached() {
            bail!(ControllerError::UnitAttached(unit));
        }
        let desc = u.model.ok_or(ControllerError::NoTypeSelected(unit))?;

        if media
            .is_blank()
            .context("probing volume for a format sentinel")?
        {
            match policy {
                FormatPolicy::FormatIfBlank => {
                    log::info!("unit {unit}: blank volume, initializing as {}", desc.name);
                    format::format_volume(&mut media, desc)
                        .with_context(|| format!("initializing {} volume", desc.name))?;
                }
                FormatPolicy::NeverFormat => {
                    bail!("volume is uninitialized and formatting was declined");
                }
            }
        }

        u.media = Some(media);
        u.chs = DiskChs::default();
        u.star = DiskChs::default();
        u.status.reset_ready();

        log::debug!(
            "unit {unit}: attached {} cyl {} hds {} spt {} ({} sectors)",
            desc.name,
            desc.cylinders,
            desc.heads,
            desc.spt,
            desc.capacity()
        );
        chan.set_devattn(u.chsa, STA_DEV_END);
        Ok(())
    }

    /// Controller reset: every unit returns to idle with its transient
    /// sense state cleared. The caller must cancel all pending service
    /// events; this is the recovery path for a wedged unit.
    pub fn reset(&mut self) {
        for u in self.units.iter_mut() {
            u.finish();
            u.sense.clear_errors();
            u.status.reset_ready();
        }
        log::trace!("disk processor reset");
    }

    /// Detach the unit, resetting its command and sense state. Returns
    /// `true` when a service event was outstanding and must be cancelled
    /// by the caller.
    pub fn detach(&mut self, unit: usize) -> Result<bool, ControllerError> {
        let u = self
            .units
            .get_mut(unit)
            .ok_or(ControllerError::InvalidUnit(unit))?;
        let was_busy = u.is_busy();
        u.media = None;
        u.sense = SenseRegister::default();
        u.status.reset_ready();
        u.finish();
        log::debug!("unit {unit}: detached");
        Ok(was_busy)
    }

    /// Boot request. The channel layer owns the IPL sequence; we verify
    /// the unit and hand back the address to boot from.
    pub fn boot(&mut self, unit: usize) -> Result<BootTarget, ControllerError> {
        let u = self
            .units
            .get_mut(unit)
            .ok_or(ControllerError::InvalidUnit(unit))?;
        if !u.is_attached() {
            return Err(ControllerError::NotAttached(unit));
        }
        u.finish();
        Ok(BootTarget {
            chsa: u.chsa,
            device_class: 0xF000,
        })
    }

    /// Channel halt-I/O request: stop any in-flight operation.
    pub fn halt_io(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> HaltResult {
        let Some(u) = self.units.get_mut(unit) else {
            return HaltResult::Idle;
        };
        u.status.set(DSR_ONC | DSR_UNR);
        if u.is_busy() {
            log::trace!("unit {unit}: halt i/o stops {:?}", u.cmd);
            u.finish();
            chan.chan_end(u.chsa, STA_CHAN_END | STA_DEV_END);
            HaltResult::Stopped
        }
        else {
            HaltResult::Idle
        }
    }

    /// Entry point from the channel layer: validate and latch a command.
    pub fn start_cmd(&mut self, unit: usize, chan: &mut dyn ChannelIo, opcode: u8) -> StartResult {
        let Some(u) = self.units.get_mut(unit) else {
            log::error!("start_cmd: no such unit {unit}");
            return StartResult::Complete(STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK);
        };

        if u.is_busy() {
            log::trace!("unit {unit}: busy, rejecting opcode {opcode:02x}");
            return StartResult::Busy;
        }

        if !u.is_attached() {
            u.sense.set(SNS_INTVENT);
            if opcode != Command::Sense.opcode() {
                log::trace!("unit {unit}: not attached, unit check for opcode {opcode:02x}");
                return StartResult::Complete(STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK);
            }
        }

        let Some(cmd) = Command::from_opcode(opcode) else {
            log::warn!("unit {unit}: unrecognized opcode {opcode:02x}");
            u.sense.set(SNS_CMDREJ);
            return StartResult::Complete(STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK);
        };

        u.status.set(DSR_USEL);
        match cmd {
            Command::Inch => {
                // Not rejected yet; the parameter block is validated at
                // service time.
                u.sense.clear(SNS_CMDREJ);
            }
            Command::Sense => {}
            _ => {
                u.sense.clear_errors();
                let mut status = DriveStatus::ready();
                status.set(DSR_USEL);
                u.status = status;
            }
        }

        u.cmd = Some(cmd);
        u.phase = Phase::Pending;
        log::trace!("unit {unit}: {cmd} latched");
        StartResult::Initiated(START_DELAY)
    }

    /// One scheduled service tick for a unit.
    pub fn service(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let Some(u) = self.units.get_mut(unit) else {
            log::error!("service: no such unit {unit}");
            return ServiceResult::Done;
        };

        let Some(cmd) = u.cmd else {
            // A tick raced a detach or halt; nothing to do.
            return ServiceResult::Done;
        };

        // The backing file may have been detached after this command was
        // scheduled. Fail safely.
        if !u.is_attached() && cmd != Command::Sense {
            log::warn!("unit {unit}: media went away under {cmd}");
            u.fail(chan, SNS_INTVENT);
            return ServiceResult::Done;
        }

        match cmd {
            Command::Inch => self.service_inch(unit, chan),
            Command::Nop => self.service_nop(unit, chan),
            Command::Sense => self.service_sense(unit, chan),
            Command::Seek => self.service_seek(unit, chan, false),
            Command::Rezero => self.service_seek(unit, chan, true),
            Command::Read => self.service_read(unit, chan),
            Command::Write => self.service_write(unit, chan),
            Command::LoadMode => self.service_load_mode(unit, chan),
            Command::ReadSectorLabel => self.service_read_sector_label(unit, chan),
            Command::ReadTrackLabel => self.service_read_track_label(unit, chan),
            Command::WriteSectorLabel => self.service_write_label(unit, chan, usize::MAX),
            Command::WriteTrackLabel => self.service_write_label(unit, chan, labels::LABEL_LEN),
            Command::IncHead => self.service_inc_head(unit, chan),
            Command::ReadAngular => self.service_read_angular(unit, chan),
        }
    }

    fn service_nop(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let u = &mut self.units[unit];
        u.finish();
        chan.chan_end(u.chsa, STA_CHAN_END | STA_DEV_END);
        ServiceResult::Done
    }

    /// Read the INCH parameter block: one status buffer address word
    /// followed by one attribute word per drive on the controller.
    fn service_inch(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let chsa = self.units[unit].chsa;

        let mut params = [0u8; INCH_PARAM_LEN];
        for (i, slot) in params.iter_mut().enumerate() {
            match chan.read_byte(chsa) {
                Some(b) => *slot = b,
                None => {
                    log::warn!("unit {unit}: short INCH parameter block ({i} bytes)");
                    self.units[unit].fail(chan, SNS_CMDREJ);
                    return ServiceResult::Done;
                }
            }
        }
        if !chan.transfer_exhausted(chsa) {
            log::warn!("unit {unit}: oversized INCH parameter block");
            self.units[unit].fail(chan, SNS_CMDREJ);
            return ServiceResult::Done;
        }

        let mut words = [0u32; 9];
        for (i, word) in words.iter_mut().enumerate() {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&params[i * 4..i * 4 + 4]);
            *word = u32::from_be_bytes(bytes);
        }

        self.inch_addr = Some(words[0]);
        for (i, u) in self.units.iter_mut().enumerate().take(NUM_UNITS) {
            u.attr = words[i + 1];
            u.sense.clear_errors();
        }
        log::trace!(
            "unit {unit}: INCH status buffer {:06x}, attributes stored",
            words[0]
        );

        let u = &mut self.units[unit];
        u.finish();
        chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
        ServiceResult::Done
    }

    fn service_sense(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let u = &mut self.units[unit];
        let chsa = u.chsa;

        let payload = sense_payload(u.chs, u.sense, u.model);
        for b in payload {
            if !chan.write_byte(chsa, b) {
                break;
            }
        }

        // Bytes 12 and 13 are optional drive status.
        if !chan.transfer_exhausted(chsa) {
            u.status.set(DSR_SEND | DSR_USEL);
            if let Some(desc) = u.model {
                let pulse = ((u.chs.s() as u16 * 2) % desc.spt as u16) as u8;
                u.status.set_pulse_count(pulse);
            }
            chan.write_byte(chsa, u.status.bytes()[0]);
            u.status.set(DSR_ONC | DSR_UNR);
            chan.write_byte(chsa, u.status.bytes()[1]);
        }

        log::trace!(
            "unit {unit}: sense {:08x} at {} delivered",
            u.sense.bits(),
            u.chs
        );
        u.sense.clear_errors();
        u.status.reset_ready();
        u.finish();
        chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
        ServiceResult::Done
    }

    fn service_load_mode(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let u = &mut self.units[unit];
        let chsa = u.chsa;
        match chan.read_byte(chsa) {
            Some(mode) => {
                log::trace!(
                    "unit {unit}: load mode register {:02x} -> {:02x}",
                    u.sense.mode(),
                    mode
                );
                u.sense.set_mode(mode);
            }
            None => {
                u.sense.set(SNS_CMDREJ);
            }
        }
        u.finish();
        chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
        ServiceResult::Done
    }

    /// Shared seek path: Seek reads a 4-byte STAR from the channel,
    /// Rezero targets cylinder 0 directly.
    fn service_seek(&mut self, unit: usize, chan: &mut dyn ChannelIo, rezero: bool) -> ServiceResult {
        let u = &mut self.units[unit];
        let chsa = u.chsa;
        let Some(desc) = u.model else {
            u.fail(chan, SNS_EQUCHK);
            return ServiceResult::Done;
        };

        match u.phase {
            Phase::Pending => {
                let target = if rezero {
                    DiskChs::default()
                }
                else {
                    let mut bytes = [0u8; 4];
                    let mut got = 0;
                    for slot in bytes.iter_mut() {
                        match chan.read_byte(chsa) {
                            Some(b) => {
                                *slot = b;
                                got += 1;
                            }
                            None => break,
                        }
                    }
                    match got {
                        0 => {
                            log::warn!("unit {unit}: seek with no address payload");
                            u.fail(chan, SNS_DADE);
                            return ServiceResult::Done;
                        }
                        // A deliberately short seek payload rezeros the
                        // target address.
                        1..=3 => DiskChs::default(),
                        _ => DiskChs::from_star_bytes(bytes),
                    }
                };

                // Validate before committing to any movement.
                if target.c() >= desc.cylinders
                    || target.h() >= desc.heads
                    || target.s() >= desc.spt
                {
                    log::warn!(
                        "unit {unit}: seek target {} outside {} geometry",
                        target,
                        desc.name
                    );
                    u.status.set(DSR_SKER | DSR_SEND);
                    u.fail(chan, SNS_DADE);
                    return ServiceResult::Done;
                }

                u.star = target;
                // Head and sector settle immediately; only cylinder
                // travel takes time.
                u.chs.set_h(target.h());
                u.chs.set_s(target.s());

                if u.chs.c() == target.c() {
                    u.status.set(DSR_SEND | DSR_ONC);
                    u.finish();
                    chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
                    return ServiceResult::Done;
                }

                log::trace!("unit {unit}: seek {} -> cylinder {}", u.chs, target.c());
                u.phase = Phase::Seeking;
                // Channel side is done; device-end follows on arrival.
                chan.chan_end(chsa, STA_CHAN_END);
                ServiceResult::Continue(START_DELAY)
            }
            Phase::Seeking => {
                let current = u.chs.c();
                let target = u.star.c();
                let distance = current.abs_diff(target);
                let (step, delay) = seek_step(distance);

                let moved = step.min(distance);
                let next = if target > current {
                    current + moved
                }
                else {
                    current - moved
                };
                u.chs.set_c(next);

                if next == target {
                    log::trace!("unit {unit}: on cylinder {}", target);
                    u.status.set(DSR_SEND | DSR_ONC);
                    u.finish();
                    chan.set_devattn(chsa, STA_DEV_END);
                    ServiceResult::Done
                }
                else {
                    ServiceResult::Continue(delay)
                }
            }
            _ => {
                log::error!("unit {unit}: seek service in phase {:?}", u.phase);
                u.fail(chan, SNS_EQUCHK);
                ServiceResult::Done
            }
        }
    }

    /// One sector per tick: read it into the shared buffer, then stream
    /// bytes out until the channel is satisfied or the sector runs out.
    fn service_read(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let Self {
            units,
            buf,
            selected,
            ..
        } = self;
        let u = &mut units[unit];
        let chsa = u.chsa;
        let Some(desc) = u.model else {
            u.fail(chan, SNS_EQUCHK);
            return ServiceResult::Done;
        };
        let geom = desc.geometry();
        let ssize = desc.sector_size();

        if u.phase == Phase::Pending {
            u.phase = Phase::ReadingData;
            *selected = unit;
            log::trace!("unit {unit}: read starting at {}", u.chs);
        }

        let lba = u.chs.to_lba(&geom);
        let read_result = match u.media.as_mut() {
            Some(media) => media.read_sector(lba, &mut buf[..ssize]),
            None => {
                u.fail(chan, SNS_INTVENT);
                return ServiceResult::Done;
            }
        };
        if let Err(e) = read_result {
            log::error!("unit {unit}: sector read failed at {}: {e}", u.chs);
            u.fail(chan, SNS_EQUCHK);
            return ServiceResult::Done;
        }

        for i in 0..ssize {
            if !chan.write_byte(chsa, buf[i]) {
                // Transfer satisfied mid-sector.
                log::trace!("unit {unit}: read complete, {i} bytes of final sector");
                u.finish();
                chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
                return ServiceResult::Done;
            }
        }

        match u.chs.next_sector(&geom) {
            Some(next) => {
                u.chs = next;
                if chan.transfer_exhausted(chsa) {
                    u.finish();
                    chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
                    ServiceResult::Done
                }
                else {
                    ServiceResult::Continue(SECTOR_DELAY)
                }
            }
            None => {
                if chan.transfer_exhausted(chsa) {
                    u.finish();
                    chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
                }
                else {
                    // Rolled off the end of the volume with data still
                    // wanted.
                    log::warn!("unit {unit}: read ran off end of volume");
                    u.chs = DiskChs::default();
                    u.finish();
                    chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK);
                }
                ServiceResult::Done
            }
        }
    }

    /// One sector per tick: pull bytes from the channel into the shared
    /// buffer, zero-filling a short final sector, and write it out.
    fn service_write(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let Self {
            units,
            buf,
            selected,
            ..
        } = self;
        let u = &mut units[unit];
        let chsa = u.chsa;
        let Some(desc) = u.model else {
            u.fail(chan, SNS_EQUCHK);
            return ServiceResult::Done;
        };
        let geom = desc.geometry();
        let ssize = desc.sector_size();

        if u.phase == Phase::Pending {
            u.phase = Phase::WritingData;
            *selected = unit;
            log::trace!("unit {unit}: write starting at {}", u.chs);
        }

        let mut short = false;
        for i in 0..ssize {
            match chan.read_byte(chsa) {
                Some(b) => buf[i] = b,
                None => {
                    if i == 0 {
                        // The previous sector consumed the last byte; the
                        // command is complete.
                        u.finish();
                        chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
                        return ServiceResult::Done;
                    }
                    // A partial sector still writes in full.
                    buf[i..ssize].fill(0);
                    short = true;
                    break;
                }
            }
        }

        let lba = u.chs.to_lba(&geom);
        let write_result = match u.media.as_mut() {
            Some(media) => media.write_sector(lba, &buf[..ssize]),
            None => {
                u.fail(chan, SNS_INTVENT);
                return ServiceResult::Done;
            }
        };
        if let Err(e) = write_result {
            log::error!("unit {unit}: sector write failed at {}: {e}", u.chs);
            u.fail(chan, SNS_EQUCHK);
            return ServiceResult::Done;
        }

        if short {
            log::trace!("unit {unit}: write complete (zero-filled final sector)");
            u.finish();
            chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
            return ServiceResult::Done;
        }

        match u.chs.next_sector(&geom) {
            Some(next) => {
                u.chs = next;
                ServiceResult::Continue(SECTOR_DELAY)
            }
            None => {
                log::warn!("unit {unit}: write ran off end of volume");
                u.chs = DiskChs::default();
                u.finish();
                chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK);
                ServiceResult::Done
            }
        }
    }

    /// RSL: one synthesized 30-byte label per sector of the track.
    fn service_read_sector_label(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let u = &mut self.units[unit];
        let chsa = u.chsa;
        let Some(desc) = u.model else {
            u.fail(chan, SNS_EQUCHK);
            return ServiceResult::Done;
        };
        let geom = desc.geometry();

        for _ in 0..desc.spt {
            let label = labels::sector_label(u.chs, desc);
            for b in label {
                if !chan.write_byte(chsa, b) {
                    u.finish();
                    chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
                    return ServiceResult::Done;
                }
            }
            u.chs = u.chs.next_sector(&geom).unwrap_or_default();
            if chan.transfer_exhausted(chsa) {
                break;
            }
        }

        u.finish();
        chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
        ServiceResult::Done
    }

    /// RTL: one synthesized 30-byte track label.
    fn service_read_track_label(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let u = &mut self.units[unit];
        let chsa = u.chsa;
        let Some(desc) = u.model else {
            u.fail(chan, SNS_EQUCHK);
            return ServiceResult::Done;
        };

        let label = labels::track_label(u.chs, desc);
        for b in label {
            if !chan.write_byte(chsa, b) {
                break;
            }
        }

        // Advance to the next track for a chained RTL.
        let (mut c, mut h, _) = u.chs.get();
        h += 1;
        if h >= desc.heads {
            h = 0;
            c = (c + 1).min(desc.cylinders - 1);
        }
        u.chs = DiskChs::new(c, h, 0);

        u.finish();
        chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
        ServiceResult::Done
    }

    /// WSL and WTL accept label data and discard it; the simulated medium
    /// synthesizes labels rather than storing them. A WTL shorter than one
    /// record is a unit check.
    fn service_write_label(
        &mut self,
        unit: usize,
        chan: &mut dyn ChannelIo,
        expect: usize,
    ) -> ServiceResult {
        let u = &mut self.units[unit];
        let chsa = u.chsa;

        let mut count = 0usize;
        while count < expect {
            match chan.read_byte(chsa) {
                Some(_) => count += 1,
                None => break,
            }
        }
        log::trace!("unit {unit}: label write of {count} bytes discarded");

        if expect != usize::MAX && count < expect {
            u.finish();
            chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK);
            return ServiceResult::Done;
        }

        u.finish();
        chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
        ServiceResult::Done
    }

    /// IHA: step to the next track, erroring past the last cylinder.
    fn service_inc_head(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let u = &mut self.units[unit];
        let chsa = u.chsa;
        let Some(desc) = u.model else {
            u.fail(chan, SNS_EQUCHK);
            return ServiceResult::Done;
        };

        let (mut c, mut h, _) = u.chs.get();
        h += 1;
        if h >= desc.heads {
            h = 0;
            c += 1;
            if c >= desc.cylinders {
                u.chs = DiskChs::new(c, h, 0);
                u.status.set(DSR_SKER | DSR_SEND);
                u.fail(chan, SNS_DADE);
                return ServiceResult::Done;
            }
        }
        u.chs = DiskChs::new(c, h, 0);
        u.finish();
        chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
        ServiceResult::Done
    }

    /// RAP: report the sector pulse counter derived from the current
    /// angular position.
    fn service_read_angular(&mut self, unit: usize, chan: &mut dyn ChannelIo) -> ServiceResult {
        let u = &mut self.units[unit];
        let chsa = u.chsa;
        let Some(desc) = u.model else {
            u.fail(chan, SNS_EQUCHK);
            return ServiceResult::Done;
        };

        let pulse = (((u.chs.s() as u16 * 2) % desc.spt as u16) as u8) & 0x3f;
        u.status.set_pulse_count(pulse);
        let _ = chan.write_byte(chsa, pulse);

        u.finish();
        chan.chan_end(chsa, STA_CHAN_END | STA_DEV_END);
        ServiceResult::Done
    }
}

/// Seek stepping table: (cylinders moved, re-arm delay) by remaining
/// distance. Steps never exceed the remaining distance.
fn seek_step(distance: u16) -> (u16, u32) {
    if distance > SEEK_STEP_LONG {
        (SEEK_STEP_LONG, SEEK_DELAY_LONG)
    }
    else if distance > SEEK_STEP_SHORT {
        (SEEK_STEP_SHORT, SEEK_DELAY_MED)
    }
    else {
        (1, SEEK_DELAY_SHORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::mock::ScriptedChannel, scheduler::ServiceQueue};

    const UNIT: usize = 0;
    const CHSA: Chsa = 0x800;

    fn typed() -> DiskProcessor {
        let mut dp = DiskProcessor::new(CHSA);
        dp.set_unit_type(UNIT, "MH040").unwrap();
        dp
    }

    /// Media carrying a format sentinel so attach skips the full format
    /// pass. State-machine tests don't care about map contents.
    fn stamped_media(desc: &DiskTypeDescriptor) -> DiskMedia {
        let mut media = DiskMedia::in_memory(desc.geometry());
        let mut s0 = vec![0u8; desc.sector_size()];
        s0[..4].copy_from_slice(b"ZERO");
        media.write_sector(0, &s0).unwrap();
        media
    }

    fn attached() -> DiskProcessor {
        let mut dp = typed();
        let desc = find_disk_type("MH040").unwrap();
        let mut chan = ScriptedChannel::new();
        dp.attach_media(UNIT, stamped_media(desc), FormatPolicy::FormatIfBlank, &mut chan)
            .unwrap();
        dp
    }

    /// Drive a latched command to completion, returning the number of
    /// service ticks it took.
    fn run(dp: &mut DiskProcessor, chan: &mut ScriptedChannel) -> u32 {
        let mut queue = ServiceQueue::new();
        queue.schedule(UNIT, START_DELAY);
        let mut ticks = 0;
        while let Some(ev) = queue.pop_next() {
            ticks += 1;
            assert!(ticks < 10_000, "service loop did not terminate");
            if let ServiceResult::Continue(delay) = dp.service(ev.unit, chan) {
                queue.schedule(ev.unit, delay);
            }
        }
        ticks
    }

    fn seek_payload(c: u16, h: u8, s: u8) -> Vec<u8> {
        DiskChs::new(c, h, s).to_star_bytes().to_vec()
    }

    #[test]
    fn busy_dispatch_is_a_pure_short_circuit() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::supplying(&seek_payload(5, 0, 0));

        assert_eq!(dp.start_cmd(UNIT, &mut chan, 0x07), StartResult::Initiated(START_DELAY));
        let star = dp.unit(UNIT).unwrap().star();
        let chs = dp.unit(UNIT).unwrap().position();

        assert_eq!(dp.start_cmd(UNIT, &mut chan, 0x02), StartResult::Busy);
        let u = dp.unit(UNIT).unwrap();
        assert_eq!(u.command(), Some(Command::Seek));
        assert_eq!(u.star(), star);
        assert_eq!(u.position(), chs);
    }

    #[test]
    fn transfer_to_detached_unit_is_refused_synchronously() {
        let mut dp = typed();
        let mut chan = ScriptedChannel::new();

        let result = dp.start_cmd(UNIT, &mut chan, 0x02);
        assert_eq!(
            result,
            StartResult::Complete(STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK)
        );
        assert!(dp.unit(UNIT).unwrap().sense().contains(SNS_INTVENT));
        assert!(!dp.unit(UNIT).unwrap().is_busy());
    }

    #[test]
    fn sense_works_on_detached_unit() {
        let mut dp = typed();
        let mut chan = ScriptedChannel::with_accept(14);

        let _ = dp.start_cmd(UNIT, &mut chan, 0x02); // sets intervention required
        assert_eq!(dp.start_cmd(UNIT, &mut chan, 0x04), StartResult::Initiated(START_DELAY));
        run(&mut dp, &mut chan);

        assert_eq!(chan.inbound.len(), 14);
        assert_eq!(chan.inbound[5] & 0x40, 0x40); // intervention required
        assert_eq!(chan.last_ending(), Some(STA_CHAN_END | STA_DEV_END));
    }

    #[test]
    fn sense_reports_reject_and_position() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::new();

        // Unknown opcode: synchronous unit check with command reject.
        let result = dp.start_cmd(UNIT, &mut chan, 0xAB);
        assert_eq!(
            result,
            StartResult::Complete(STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK)
        );
        assert!(dp.unit(UNIT).unwrap().sense().command_reject());

        let mut chan = ScriptedChannel::with_accept(14);
        dp.start_cmd(UNIT, &mut chan, 0x04);
        run(&mut dp, &mut chan);

        // Position bytes reflect the position at the time of the error.
        assert_eq!(&chan.inbound[..4], &[0, 0, 0, 0]);
        // Command reject in error byte 1 (payload byte 5).
        assert_eq!(chan.inbound[5] & 0x80, 0x80);
        // Attribute bytes rebuilt from the descriptor.
        assert_eq!(&chan.inbound[8..12], &[0x40, 20, 5, 0]);
        // Drive status trailer present when the count allows.
        assert_ne!(chan.inbound[12] & 0x80, 0); // seek end
        assert_ne!(chan.inbound[13] & 0x30, 0); // ready, on cylinder

        // Transient bits cleared by the sense.
        assert!(!dp.unit(UNIT).unwrap().sense().command_reject());
    }

    #[test]
    fn seek_rejects_out_of_range_target_without_moving() {
        let mut dp = attached();
        // MH040 has 411 cylinders; 500 is out of range.
        let mut chan = ScriptedChannel::supplying(&seek_payload(500, 0, 0));

        dp.start_cmd(UNIT, &mut chan, 0x07);
        run(&mut dp, &mut chan);

        assert_eq!(
            chan.last_ending(),
            Some(STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK)
        );
        let u = dp.unit(UNIT).unwrap();
        assert!(u.sense().addressing_error());
        assert_eq!(u.position(), DiskChs::default());
        assert!(!u.is_busy());
    }

    #[test]
    fn short_seek_steps_one_cylinder_per_tick() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::supplying(&seek_payload(5, 2, 7));

        dp.start_cmd(UNIT, &mut chan, 0x07);

        // First tick reads the STAR and goes to the stepping phase,
        // posting channel-end only.
        assert_eq!(dp.service(UNIT, &mut chan), ServiceResult::Continue(START_DELAY));
        assert_eq!(chan.last_ending(), Some(STA_CHAN_END));
        assert_eq!(dp.unit(UNIT).unwrap().phase(), Phase::Seeking);
        // Head and sector settle immediately.
        assert_eq!(dp.unit(UNIT).unwrap().position().h(), 2);
        assert_eq!(dp.unit(UNIT).unwrap().position().s(), 7);

        // Five stepping ticks, one cylinder each; device-end on arrival.
        for expect in 1..=5u16 {
            let result = dp.service(UNIT, &mut chan);
            assert_eq!(dp.unit(UNIT).unwrap().position().c(), expect);
            if expect < 5 {
                assert_eq!(result, ServiceResult::Continue(SEEK_DELAY_SHORT));
            }
            else {
                assert_eq!(result, ServiceResult::Done);
            }
        }
        assert_eq!(chan.attentions, vec![(CHSA, STA_DEV_END)]);
        assert!(!dp.unit(UNIT).unwrap().is_busy());
    }

    #[test]
    fn long_seek_takes_distance_sized_steps() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::supplying(&seek_payload(300, 0, 0));

        dp.start_cmd(UNIT, &mut chan, 0x07);
        assert_eq!(dp.service(UNIT, &mut chan), ServiceResult::Continue(START_DELAY));

        assert_eq!(dp.service(UNIT, &mut chan), ServiceResult::Continue(SEEK_DELAY_LONG));
        assert_eq!(dp.unit(UNIT).unwrap().position().c(), 50);

        // Run to completion; the position never overshoots.
        let mut last = 50;
        loop {
            match dp.service(UNIT, &mut chan) {
                ServiceResult::Continue(_) => {
                    let c = dp.unit(UNIT).unwrap().position().c();
                    assert!(c > last && c <= 300);
                    last = c;
                }
                ServiceResult::Done => break,
            }
        }
        assert_eq!(dp.unit(UNIT).unwrap().position().c(), 300);
    }

    #[test]
    fn rezero_shares_the_seek_path_without_a_payload() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::supplying(&seek_payload(5, 0, 0));
        dp.start_cmd(UNIT, &mut chan, 0x07);
        run(&mut dp, &mut chan);
        assert_eq!(dp.unit(UNIT).unwrap().position().c(), 5);

        // No payload supplied: rezero must not read the channel.
        let mut chan = ScriptedChannel::new();
        dp.start_cmd(UNIT, &mut chan, 0x37);
        run(&mut dp, &mut chan);
        assert_eq!(dp.unit(UNIT).unwrap().position(), DiskChs::default());
        assert_eq!(chan.attentions, vec![(CHSA, STA_DEV_END)]);
    }

    #[test]
    fn read_streams_sequential_sectors() {
        let mut dp = attached();
        let ssize = 768;

        let sector0: Vec<u8> = (0..ssize).map(|i| i as u8).collect();
        let sector1 = vec![0xBBu8; ssize];
        {
            let media = dp.unit_mut(UNIT).unwrap().media_mut().unwrap();
            media.write_sector(0, &sector0).unwrap();
            media.write_sector(1, &sector1).unwrap();
        }

        let mut chan = ScriptedChannel::with_accept(2 * ssize);
        dp.start_cmd(UNIT, &mut chan, 0x02);
        run(&mut dp, &mut chan);

        assert_eq!(chan.inbound.len(), 2 * ssize);
        assert_eq!(&chan.inbound[..ssize], &sector0[..]);
        assert_eq!(&chan.inbound[ssize..], &sector1[..]);
        assert_eq!(chan.last_ending(), Some(STA_CHAN_END | STA_DEV_END));
        // Position advanced past the transferred sectors.
        assert_eq!(dp.unit(UNIT).unwrap().position(), DiskChs::new(0, 0, 2));
    }

    #[test]
    fn read_stops_when_channel_is_satisfied_mid_sector() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::with_accept(100);
        dp.start_cmd(UNIT, &mut chan, 0x02);
        let ticks = run(&mut dp, &mut chan);

        assert_eq!(ticks, 1);
        assert_eq!(chan.inbound.len(), 100);
        assert_eq!(chan.last_ending(), Some(STA_CHAN_END | STA_DEV_END));
    }

    #[test]
    fn write_then_read_round_trips_with_zero_padding() {
        let mut dp = attached();
        let ssize = 768;

        // A full sector plus ten bytes: the short final sector must be
        // zero-filled on disk.
        let mut payload: Vec<u8> = (0..ssize).map(|i| (i ^ 0x5a) as u8).collect();
        payload.extend_from_slice(&[0x11; 10]);

        let mut chan = ScriptedChannel::supplying(&payload);
        dp.start_cmd(UNIT, &mut chan, 0x01);
        run(&mut dp, &mut chan);
        assert_eq!(chan.last_ending(), Some(STA_CHAN_END | STA_DEV_END));

        // Rezero, then read both sectors back.
        let mut chan = ScriptedChannel::new();
        dp.start_cmd(UNIT, &mut chan, 0x37);
        run(&mut dp, &mut chan);

        let mut chan = ScriptedChannel::with_accept(2 * ssize);
        dp.start_cmd(UNIT, &mut chan, 0x02);
        run(&mut dp, &mut chan);

        assert_eq!(&chan.inbound[..ssize], &payload[..ssize]);
        assert_eq!(&chan.inbound[ssize..ssize + 10], &[0x11; 10]);
        assert!(chan.inbound[ssize + 10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn read_past_end_of_volume_is_a_unit_check() {
        let mut dp = attached();
        let desc = find_disk_type("MH040").unwrap();
        let ssize = desc.sector_size();
        let last = DiskChs::new(desc.cylinders - 1, desc.heads - 1, desc.spt - 1);

        {
            let media = dp.unit_mut(UNIT).unwrap().media_mut().unwrap();
            media
                .write_sector(desc.capacity() - 1, &vec![0u8; ssize])
                .unwrap();
        }

        // Seek to the last sector of the volume.
        let mut chan = ScriptedChannel::supplying(&seek_payload(last.c(), last.h(), last.s()));
        dp.start_cmd(UNIT, &mut chan, 0x07);
        run(&mut dp, &mut chan);

        // Ask for more data than remains.
        let mut chan = ScriptedChannel::with_accept(2 * ssize);
        dp.start_cmd(UNIT, &mut chan, 0x02);
        run(&mut dp, &mut chan);

        assert_eq!(
            chan.last_ending(),
            Some(STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK)
        );
        // Position resets to a safe value at end of medium.
        assert_eq!(dp.unit(UNIT).unwrap().position(), DiskChs::default());
    }

    #[test]
    fn inch_distributes_attribute_words() {
        let mut dp = attached();

        let mut params = Vec::with_capacity(INCH_PARAM_LEN);
        params.extend_from_slice(&0x0001_2340u32.to_be_bytes());
        for i in 0..8u32 {
            params.extend_from_slice(&(0x4114_0000 | i).to_be_bytes());
        }

        let mut chan = ScriptedChannel::supplying(&params);
        assert_eq!(dp.start_cmd(UNIT, &mut chan, 0x00), StartResult::Initiated(START_DELAY));
        run(&mut dp, &mut chan);

        assert_eq!(chan.last_ending(), Some(STA_CHAN_END | STA_DEV_END));
        assert_eq!(dp.inch_addr(), Some(0x0001_2340));
        for i in 0..NUM_UNITS {
            assert_eq!(dp.unit(i).unwrap().attributes(), 0x4114_0000 | i as u32);
        }
    }

    #[test]
    fn short_inch_block_is_rejected() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::supplying(&[0u8; 35]);
        dp.start_cmd(UNIT, &mut chan, 0x00);
        run(&mut dp, &mut chan);

        assert_eq!(
            chan.last_ending(),
            Some(STA_CHAN_END | STA_DEV_END | STA_UNIT_CHECK)
        );
        assert!(dp.unit(UNIT).unwrap().sense().command_reject());
    }

    #[test]
    fn formatted_volume_yields_good_first_sector_label() {
        // End-to-end: attach a blank volume, let attach format it, then
        // read the first sector label.
        let mut dp = typed();
        let desc = find_disk_type("MH040").unwrap();
        let mut chan = ScriptedChannel::new();
        dp.attach_media(
            UNIT,
            DiskMedia::in_memory(desc.geometry()),
            FormatPolicy::FormatIfBlank,
            &mut chan,
        )
        .unwrap();
        assert_eq!(chan.attentions, vec![(CHSA, STA_DEV_END)]);

        // Sector 0 now carries the format sentinel.
        {
            let media = dp.unit_mut(UNIT).unwrap().media_mut().unwrap();
            assert!(!media.is_blank().unwrap());
        }

        let mut chan = ScriptedChannel::with_accept(30);
        dp.start_cmd(UNIT, &mut chan, 0x32);
        run(&mut dp, &mut chan);

        assert_eq!(chan.inbound.len(), 30);
        assert_eq!(&chan.inbound[..4], &[0, 0, 0, 0]);
        assert_eq!(chan.inbound[4], 0x80);
        assert_eq!(chan.last_ending(), Some(STA_CHAN_END | STA_DEV_END));
    }

    #[test]
    fn read_returns_what_format_wrote() {
        let mut dp = typed();
        let desc = find_disk_type("MH040").unwrap();
        let ssize = desc.sector_size();
        let mut chan = ScriptedChannel::new();
        dp.attach_media(
            UNIT,
            DiskMedia::in_memory(desc.geometry()),
            FormatPolicy::FormatIfBlank,
            &mut chan,
        )
        .unwrap();

        // What format actually wrote at the first two sectors.
        let mut expect = vec![0u8; 2 * ssize];
        {
            let media = dp.unit_mut(UNIT).unwrap().media_mut().unwrap();
            media.read_sector(0, &mut expect[..ssize]).unwrap();
            media.read_sector(1, &mut expect[ssize..]).unwrap();
        }
        assert_eq!(&expect[..4], b"ZERO");

        let mut chan = ScriptedChannel::with_accept(2 * ssize);
        dp.start_cmd(UNIT, &mut chan, 0x02);
        run(&mut dp, &mut chan);

        assert_eq!(chan.inbound, expect);
        assert_eq!(chan.last_ending(), Some(STA_CHAN_END | STA_DEV_END));
    }

    #[test]
    fn declined_format_leaves_unit_detached() {
        let mut dp = typed();
        let desc = find_disk_type("MH040").unwrap();
        let mut chan = ScriptedChannel::new();

        let result = dp.attach_media(
            UNIT,
            DiskMedia::in_memory(desc.geometry()),
            FormatPolicy::NeverFormat,
            &mut chan,
        );
        assert!(result.is_err());
        assert!(!dp.unit(UNIT).unwrap().is_attached());
        assert!(chan.attentions.is_empty());
    }

    #[test]
    fn detach_cancels_pending_command() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::supplying(&seek_payload(5, 0, 0));

        dp.start_cmd(UNIT, &mut chan, 0x07);
        assert!(dp.detach(UNIT).unwrap());
        assert!(!dp.unit(UNIT).unwrap().is_busy());

        // A tick that raced the detach does nothing.
        assert_eq!(dp.service(UNIT, &mut chan), ServiceResult::Done);
        assert!(chan.endings.is_empty());
    }

    #[test]
    fn halt_io_stops_an_operation() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::with_accept(10_000);
        dp.start_cmd(UNIT, &mut chan, 0x02);

        assert_eq!(dp.halt_io(UNIT, &mut chan), HaltResult::Stopped);
        assert_eq!(chan.last_ending(), Some(STA_CHAN_END | STA_DEV_END));
        assert!(!dp.unit(UNIT).unwrap().is_busy());
        assert_eq!(dp.halt_io(UNIT, &mut chan), HaltResult::Idle);
    }

    #[test]
    fn controller_reset_unwedges_units() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::with_accept(10_000);
        dp.start_cmd(UNIT, &mut chan, 0x02);
        assert!(dp.unit(UNIT).unwrap().is_busy());

        dp.reset();
        assert!(!dp.unit(UNIT).unwrap().is_busy());
        // A tick that raced the reset does nothing.
        assert_eq!(dp.service(UNIT, &mut chan), ServiceResult::Done);
    }

    #[test]
    fn load_mode_register_updates_sense_mode_byte() {
        let mut dp = attached();
        let mut chan = ScriptedChannel::supplying(&[0x81]);
        dp.start_cmd(UNIT, &mut chan, 0x1F);
        run(&mut dp, &mut chan);

        assert_eq!(dp.unit(UNIT).unwrap().sense().mode(), 0x81);
        assert_eq!(chan.last_ending(), Some(STA_CHAN_END | STA_DEV_END));
    }

    #[test]
    fn boot_requires_attachment() {
        let mut dp = typed();
        assert!(matches!(dp.boot(UNIT), Err(ControllerError::NotAttached(0))));

        let mut dp = attached();
        let target = dp.boot(UNIT).unwrap();
        assert_eq!(target.chsa, CHSA);
        assert_eq!(target.device_class, 0xF000);
    }
}

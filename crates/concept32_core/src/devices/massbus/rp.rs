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

    devices::rp.rs

    Implements the RH11/Massbus RP04/05/06/07 disk controller.

    The register file is addressed by even offsets 000-046; the word
    count, bus address and unit-select registers belong to the controller,
    everything else to the selected drive. All drives run in 576
    byte/sector mode: 128 36-bit words, each stored right-justified in 8
    big-endian bytes of the backing file.
*/

use crate::{
    device_types::{
        chs::DiskChs,
        disk::{RpModel, RP_NUMWD},
        geometry::DriveGeometry,
    },
    media::DiskMedia,
    scheduler::ServiceResult,
};

use modular_bitfield::{bitfield, prelude::*};
use thiserror::Error;

pub const NUM_UNITS_RP: usize = 8;

/// Bytes per backing-file sector: 128 words of 8 bytes.
pub const RP_SECTOR_BYTES: usize = RP_NUMWD * 8;

// Register offsets (address & 076).
pub const REG_CS1: u8 = 0o00; /* control */
pub const REG_WC: u8 = 0o02; /* word count */
pub const REG_BA: u8 = 0o04; /* base address */
pub const REG_DA: u8 = 0o06; /* desired sector/track */
pub const REG_CS2: u8 = 0o10; /* control/status 2 */
pub const REG_DS: u8 = 0o12; /* drive status */
pub const REG_ER1: u8 = 0o14; /* error status 1 */
pub const REG_AS: u8 = 0o16; /* attention summary */
pub const REG_LA: u8 = 0o20; /* look ahead */
pub const REG_DB: u8 = 0o22; /* data buffer */
pub const REG_MR: u8 = 0o24; /* maintenance */
pub const REG_DT: u8 = 0o26; /* drive type */
pub const REG_SN: u8 = 0o30; /* serial number */
pub const REG_OF: u8 = 0o32; /* offset */
pub const REG_DC: u8 = 0o34; /* desired cylinder */
pub const REG_CC: u8 = 0o36; /* current cylinder */
pub const REG_ER2: u8 = 0o40; /* error status 2 */
pub const REG_ER3: u8 = 0o42; /* error status 3 */
pub const REG_EC1: u8 = 0o44; /* ECC status 1 - unimplemented */
pub const REG_EC2: u8 = 0o46; /* ECC status 2 - unimplemented */

// CS1 bits.
pub const CS1_GO: u16 = 0o000001;
pub const CS1_IE: u16 = 0o000100;
pub const CS1_RDY: u16 = 0o000200;
pub const CS1_DVA: u16 = 0o004000;
pub const CS1_TRE: u16 = 0o040000;
pub const CS1_SC: u16 = 0o100000;

// CS2 bits.
pub const CS2_UNIT: u16 = 0o000007;
pub const CS2_UAI: u16 = 0o000010; /* address increment inhibit */
pub const CS2_PAT: u16 = 0o000020; /* parity test NI */
pub const CS2_CLR: u16 = 0o000040; /* controller clear */
pub const CS2_IR: u16 = 0o000100; /* input ready */
pub const CS2_OR: u16 = 0o000200; /* output ready */
pub const CS2_NED: u16 = 0o010000; /* nonexistent drive */
pub const CS2_WCE: u16 = 0o040000; /* write check error */
pub const CS2_DLT: u16 = 0o100000; /* data late NI */

// Drive status bits.
pub const DS_VV: u16 = 0o000100; /* volume valid */
pub const DS_DRY: u16 = 0o000200; /* drive ready */
pub const DS_DPR: u16 = 0o000400; /* drive present */
pub const DS_LST: u16 = 0o002000; /* last sector */
pub const DS_WRL: u16 = 0o004000; /* write locked */
pub const DS_MOL: u16 = 0o010000; /* medium online */
pub const DS_PIP: u16 = 0o020000; /* positioning in progress */
pub const DS_ERR: u16 = 0o040000; /* composite error */
pub const DS_ATA: u16 = 0o100000; /* attention active */

// Error register 1 bits.
pub const ER1_ILF: u16 = 0o000001; /* illegal function */
pub const ER1_RMR: u16 = 0o000004; /* register modification refused */
pub const ER1_IAE: u16 = 0o002000; /* invalid address */
pub const ER1_WLE: u16 = 0o004000; /* write lock error */
pub const ER1_UNS: u16 = 0o040000; /* drive unsafe */

// Seek stepping, cylinders per tick by remaining distance.
const RP_SEEK_STEP_LONG: u16 = 50;
const RP_SEEK_STEP_SHORT: u16 = 10;
const RP_SEEK_DELAY_LONG: u32 = 500;
const RP_SEEK_DELAY_MED: u32 = 200;
const RP_SEEK_DELAY_SHORT: u32 = 100;

pub const RP_START_DELAY: u32 = 1000;
pub const RP_SECTOR_DELAY: u32 = 300;

/// Drive function codes, written to CS1 bits 1-5 with the GO bit.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Function {
    Nop = 0o00,
    Unload = 0o01,
    Seek = 0o02,
    Recalibrate = 0o03,
    DriveClear = 0o04,
    Release = 0o05,
    Offset = 0o06,
    Return = 0o07,
    ReadInPreset = 0o10,
    PackAck = 0o11,
    Search = 0o14,
    WriteCheck = 0o24,
    Write = 0o30,
    WriteHeaders = 0o31,
    Read = 0o34,
    ReadHeaders = 0o35,
}

impl Function {
    pub fn from_code(code: u8) -> Option<Function> {
        match code {
            0o00 => Some(Function::Nop),
            0o01 => Some(Function::Unload),
            0o02 => Some(Function::Seek),
            0o03 => Some(Function::Recalibrate),
            0o04 => Some(Function::DriveClear),
            0o05 => Some(Function::Release),
            0o06 => Some(Function::Offset),
            0o07 => Some(Function::Return),
            0o10 => Some(Function::ReadInPreset),
            0o11 => Some(Function::PackAck),
            0o14 => Some(Function::Search),
            0o24 => Some(Function::WriteCheck),
            0o30 => Some(Function::Write),
            0o31 => Some(Function::WriteHeaders),
            0o34 => Some(Function::Read),
            0o35 => Some(Function::ReadHeaders),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Data transfer functions occupy codes 024 and up.
    pub fn is_transfer(&self) -> bool {
        self.code() >= 0o24
    }
}

/// The CS1 control word as the program writes it.
#[bitfield]
#[derive(Copy, Clone)]
pub struct Cs1Word {
    pub go: bool,
    pub function: B5,
    pub ie: bool,
    pub rdy: bool,
    pub uba: B2,
    pub psel: bool,
    pub dva: bool,
    #[skip]
    unused: B1,
    pub mcpe: bool,
    pub tre: bool,
    pub sc: bool,
}

/// The desired sector/track register: six-bit fields with must-be-zero
/// padding.
#[bitfield]
#[derive(Copy, Clone)]
pub struct DaWord {
    pub sector: B6,
    #[skip]
    mbz1: B2,
    pub track: B6,
    #[skip]
    mbz2: B2,
}

/// Memory access and interrupt lines the controller sees. NPR transfers
/// move one 36-bit word at a time; a `false`/`None` means the bus adapter
/// refused the cycle.
pub trait Unibus {
    fn read_word(&mut self, addr: u32) -> Option<u64>;
    fn write_word(&mut self, addr: u32, data: u64) -> bool;
    fn set_irq(&mut self);
    fn clr_irq(&mut self);
}

/// Tell the caller to arm a service event for a unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Activation {
    pub unit: usize,
    pub delay: u32,
}

#[derive(Debug, Error)]
pub enum RpError {
    #[error("unit {0} does not exist")]
    InvalidUnit(usize),
    #[error("unit {0} is not attached")]
    NotAttached(usize),
    #[error("unit {0} is already attached")]
    AlreadyAttached(usize),
}

/// Per-drive registers.
pub struct RpUnit {
    model: RpModel,
    /// Latched function and its GO state. The function/GO bits are still
    /// reassembled for CS1 reads.
    fnc: Option<Function>,
    go: bool,
    /// Desired position: cylinder from the DC register, track/sector from
    /// the DA register.
    da: DiskChs,
    /// Current cylinder.
    ccyl: u16,
    offset: u16,
    er1: u16,
    status: u16,
    la: u32,
    write_locked: bool,
    media: Option<DiskMedia>,
}

impl RpUnit {
    fn new(model: RpModel) -> Self {
        RpUnit {
            model,
            fnc: None,
            go: false,
            da: DiskChs::default(),
            ccyl: 0,
            offset: 0,
            er1: 0,
            status: 0,
            la: 0,
            write_locked: false,
            media: None,
        }
    }

    pub fn model(&self) -> RpModel {
        self.model
    }

    pub fn function(&self) -> Option<Function> {
        self.fnc
    }

    pub fn current_cylinder(&self) -> u16 {
        self.ccyl
    }

    pub fn desired(&self) -> DiskChs {
        self.da
    }

    pub fn error1(&self) -> u16 {
        self.er1
    }

    pub fn is_attached(&self) -> bool {
        self.media.is_some()
    }

    pub fn attention(&self) -> bool {
        self.status & DS_ATA != 0
    }

    pub fn media_mut(&mut self) -> Option<&mut DiskMedia> {
        self.media.as_mut()
    }

    /// Backing-file geometry for this model: one "sector" is 128 words of
    /// 8 bytes.
    pub fn geometry(&self) -> DriveGeometry {
        let dt = self.model.drive_type();
        DriveGeometry::new(dt.cylinders, dt.surfaces as u8, dt.sectors as u8, RP_SECTOR_BYTES)
    }

    /// Advance the desired address one sector, rolling through track and
    /// cylinder; a cylinder bump starts an implied mid-transfer seek.
    fn advance_sector(&mut self) {
        let dt = self.model.drive_type();
        let (mut c, mut h, mut s) = self.da.get();
        s += 1;
        if s as u16 >= dt.sectors {
            s = 0;
            h += 1;
            if h as u16 >= dt.surfaces {
                h = 0;
                c += 1;
                self.status |= DS_PIP;
            }
        }
        self.da = DiskChs::new(c, h, s);
        self.la = (s as u32) << 10;
    }

    fn desired_lba(&self) -> usize {
        let dt = self.model.drive_type();
        ((self.da.c() as usize * dt.surfaces as usize) + self.da.h() as usize)
            * dt.sectors as usize
            + self.da.s() as usize
    }

    /// Desired sector/track outside the drive geometry. Cylinder overflow
    /// is handled separately by the positioning logic.
    fn sector_track_invalid(&self) -> bool {
        let dt = self.model.drive_type();
        self.da.s() as u16 >= dt.sectors || self.da.h() as u16 >= dt.surfaces
    }

    fn address_invalid(&self) -> bool {
        let dt = self.model.drive_type();
        self.sector_track_invalid() || self.da.c() >= dt.cylinders
    }
}

/// The RH11 adapter and its eight drives. Word count, bus address and the
/// shared sector buffer live here; there is one outstanding transfer per
/// controller.
pub struct RpController {
    units: Vec<RpUnit>,
    wc: u16,
    ba: u32,
    cs2: u16,
    ie: bool,
    /// A data transfer owns the adapter until it completes.
    busy: bool,
    err2: u16,
    err3: u16,
    buf: [u64; RP_NUMWD],
}

impl RpController {
    pub fn new() -> Self {
        RpController {
            units: (0..NUM_UNITS_RP).map(|_| RpUnit::new(RpModel::default())).collect(),
            wc: 0,
            ba: 0,
            cs2: CS2_IR,
            ie: false,
            busy: false,
            err2: 0,
            err3: 0,
            buf: [0; RP_NUMWD],
        }
    }

    pub fn unit(&self, unit: usize) -> Option<&RpUnit> {
        self.units.get(unit)
    }

    pub fn unit_mut(&mut self, unit: usize) -> Option<&mut RpUnit> {
        self.units.get_mut(unit)
    }

    fn selected(&self) -> usize {
        (self.cs2 & CS2_UNIT) as usize
    }

    pub fn set_type(&mut self, unit: usize, model: RpModel) -> Result<(), RpError> {
        let u = self.units.get_mut(unit).ok_or(RpError::InvalidUnit(unit))?;
        if u.is_attached() {
            return Err(RpError::AlreadyAttached(unit));
        }
        u.model = model;
        Ok(())
    }

    pub fn attach_media(
        &mut self,
        unit: usize,
        media: DiskMedia,
        bus: &mut dyn Unibus,
    ) -> Result<(), RpError> {
        let ie = self.ie;
        let busy = self.busy;
        let u = self.units.get_mut(unit).ok_or(RpError::InvalidUnit(unit))?;
        if u.is_attached() {
            return Err(RpError::AlreadyAttached(unit));
        }
        u.media = Some(media);
        u.da = DiskChs::default();
        u.status = DS_ATA | DS_VV;
        log::debug!("rp{unit}: attached {}", u.model);
        if !busy && ie {
            bus.set_irq();
        }
        Ok(())
    }

    pub fn detach(&mut self, unit: usize) -> Result<bool, RpError> {
        let u = self.units.get_mut(unit).ok_or(RpError::InvalidUnit(unit))?;
        let was_active = u.go;
        u.media = None;
        u.status = 0;
        u.go = false;
        u.fnc = None;
        log::debug!("rp{unit}: detached");
        Ok(was_active)
    }

    pub fn reset(&mut self, bus: &mut dyn Unibus) {
        self.ba = 0;
        self.wc = 0;
        self.ie = false;
        self.busy = false;
        self.err2 = 0;
        self.err3 = 0;
        self.cs2 = CS2_IR;
        for u in self.units.iter_mut() {
            u.status &= DS_VV;
            u.go = false;
            u.fnc = None;
            u.er1 = 0;
        }
        bus.clr_irq();
        log::trace!("rp: controller reset");
    }

    /// Raise attention for a drive whose non-transfer function completed.
    fn set_attention(&mut self, unit: usize, bus: &mut dyn Unibus) {
        let busy = self.busy;
        let ie = self.ie;
        let u = &mut self.units[unit];
        u.status |= DS_ATA;
        u.go = false;
        if !busy && ie {
            bus.set_irq();
        }
    }

    /// Finish a data transfer: release the adapter and interrupt.
    fn end_transfer(&mut self, unit: usize, bus: &mut dyn Unibus) {
        self.busy = false;
        self.units[unit].go = false;
        if self.ie {
            bus.set_irq();
        }
    }

    /// Program write to a device register. A returned [Activation] means
    /// the caller must arm a service event.
    pub fn write_reg(&mut self, offset: u8, data: u16, bus: &mut dyn Unibus) -> Option<Activation> {
        let unit = self.selected();
        match offset & 0o76 {
            REG_CS1 => return self.write_cs1(unit, data, bus),
            REG_WC => {
                if self.busy {
                    self.units[unit].er1 |= ER1_RMR;
                    log::trace!("rp{unit}: WC write refused while busy");
                    return None;
                }
                self.wc = data;
            }
            REG_BA => {
                if self.busy {
                    self.units[unit].er1 |= ER1_RMR;
                    return None;
                }
                self.ba = (self.ba & 0o600000) | (data & 0o177776) as u32;
            }
            REG_DA => {
                let da = DaWord::from_bytes(data.to_le_bytes());
                let u = &mut self.units[unit];
                u.da.set_h(da.track());
                u.da.set_s(da.sector());
            }
            REG_CS2 => {
                self.cs2 = (self.cs2 & (CS2_DLT | CS2_WCE | CS2_NED))
                    | (data & (CS2_UAI | CS2_PAT | CS2_UNIT));
                if data & CS2_CLR != 0 {
                    self.reset(bus);
                }
                self.cs2 |= CS2_IR;
            }
            REG_DS => {} /* read only */
            REG_ER1 => {
                self.units[unit].er1 = data;
            }
            REG_AS => {
                for (i, u) in self.units.iter_mut().enumerate() {
                    if data & (1 << i) != 0 {
                        u.status &= !DS_ATA;
                    }
                }
            }
            REG_OF => {
                self.units[unit].offset = data;
            }
            REG_DC => {
                let u = &mut self.units[unit];
                if u.go {
                    u.er1 |= ER1_RMR;
                    return None;
                }
                u.da.set_c(data & 0o1777);
            }
            REG_ER2 => self.err2 = data,
            REG_ER3 => self.err3 = data,
            REG_LA | REG_DB | REG_MR | REG_DT | REG_SN | REG_CC | REG_EC1 | REG_EC2 => {}
            _ => {
                self.units[unit].er1 |= ER1_ILF;
                log::warn!("rp: write to unimplemented register {offset:02o}");
            }
        }
        None
    }

    fn write_cs1(&mut self, unit: usize, data: u16, bus: &mut dyn Unibus) -> Option<Activation> {
        let word = Cs1Word::from_bytes(data.to_le_bytes());
        self.ie = word.ie();
        self.ba = (self.ba & 0o177777) | ((word.uba() as u32) << 16);

        if self.units[unit].go {
            self.units[unit].er1 |= ER1_RMR;
            log::trace!("rp{unit}: CS1 write refused, function in progress");
            return None;
        }
        if !word.go() {
            if word.tre() {
                self.cs2 &= CS2_IR | CS2_OR | CS2_UAI | CS2_PAT | CS2_UNIT;
            }
            return None;
        }
        if !self.units[unit].is_attached() {
            log::trace!("rp{unit}: function {:02o} to unattached drive", word.function());
            return None;
        }
        bus.clr_irq();

        let Some(fnc) = Function::from_code(word.function()) else {
            let u = &mut self.units[unit];
            u.status |= DS_ATA;
            u.er1 |= ER1_ILF;
            return None;
        };

        let dt = self.units[unit].model.drive_type();
        let mut go = false;
        match fnc {
            Function::Nop => {}
            Function::DriveClear => {
                let u = &mut self.units[unit];
                u.status &= DS_VV;
                u.er1 = 0;
                u.go = false;
            }
            Function::ReadInPreset | Function::PackAck => {
                let u = &mut self.units[unit];
                if fnc == Function::ReadInPreset {
                    u.da = DiskChs::default();
                    u.offset = 0;
                }
                u.status |= DS_VV;
            }
            Function::Release => {}
            Function::Seek
                if self.units[unit].da.c() == (self.units[unit].ccyl & 0o1777) =>
            {
                // Already on cylinder: no motion, just attention.
                self.set_attention(unit, bus);
                return None;
            }
            Function::Seek | Function::Search => {
                let u = &mut self.units[unit];
                if u.address_invalid() {
                    log::trace!("rp{unit}: invalid address {} for {}", u.da, u.model);
                    u.er1 |= ER1_IAE;
                    self.set_attention(unit, bus);
                    return None;
                }
                if u.da.c() != u.ccyl {
                    u.status |= DS_PIP;
                }
                go = true;
            }
            Function::Recalibrate => {
                let u = &mut self.units[unit];
                u.da.set_c(0);
                u.status |= DS_PIP;
                go = true;
            }
            Function::Unload
            | Function::Offset
            | Function::Return
            | Function::WriteCheck
            | Function::Write
            | Function::WriteHeaders
            | Function::Read
            | Function::ReadHeaders => {
                let u = &mut self.units[unit];
                if u.da.c() != u.ccyl {
                    u.status |= DS_PIP;
                }
                go = true;
            }
        }

        if go {
            let u = &mut self.units[unit];
            u.fnc = Some(fnc);
            u.go = true;
            if fnc.is_transfer() {
                self.busy = true;
                // Transfers clear the attention/error summary bits.
                self.units[unit].status &= DS_VV | DS_PIP;
            }
            // Cylinder overshoot is caught here for transfers too.
            if self.units[unit].da.c() >= dt.cylinders {
                self.units[unit].status |= DS_PIP;
            }
            log::trace!("rp{unit}: {fnc:?} go");
            return Some(Activation {
                unit,
                delay: RP_START_DELAY,
            });
        }
        None
    }

    /// Program read of a device register.
    pub fn read_reg(&mut self, offset: u8) -> u16 {
        let unit = self.selected();
        let u = &self.units[unit];
        match offset & 0o76 {
            REG_CS1 => {
                let mut temp =
                    ((u.fnc.map(|f| f.code()).unwrap_or(0) as u16) << 1) | u16::from(u.go);
                if self.ie {
                    temp |= CS1_IE;
                }
                temp |= ((self.ba >> 8) & 0o1400) as u16;
                if !self.busy {
                    temp |= CS1_RDY;
                }
                if u.is_attached() {
                    temp |= CS1_DVA;
                }
                if self.cs2 & (CS2_NED | CS2_WCE | CS2_DLT) != 0 {
                    temp |= CS1_TRE | CS1_SC;
                }
                if self.units.iter().any(|u| u.status & DS_ATA != 0) {
                    temp |= CS1_SC;
                }
                temp
            }
            REG_WC => self.wc,
            REG_BA => (self.ba & 0o177776) as u16,
            REG_DA => {
                let mut da = DaWord::new();
                da.set_sector(u.da.s());
                da.set_track(u.da.h());
                u16::from_le_bytes(da.into_bytes())
            }
            REG_CS2 => self.cs2,
            REG_DS => {
                let mut temp = u.status;
                if u.er1 != 0 || self.err2 != 0 || self.err3 != 0 {
                    temp |= DS_ERR;
                }
                temp |= DS_DPR;
                if u.is_attached() {
                    temp |= DS_MOL;
                }
                if u.write_locked {
                    temp |= DS_WRL;
                }
                if !u.go {
                    temp |= DS_DRY;
                }
                temp
            }
            REG_ER1 => u.er1,
            REG_AS => {
                let mut temp = 0;
                for (i, u) in self.units.iter().enumerate() {
                    if u.status & DS_ATA != 0 {
                        temp |= 1 << i;
                    }
                }
                temp
            }
            REG_LA => {
                let dt = u.model.drive_type();
                let unit_mut = &mut self.units[unit];
                if (unit_mut.la >> 10) >= dt.sectors as u32 {
                    unit_mut.la = 0;
                }
                let temp = ((unit_mut.da.s() as u16) << 6)
                    ^ (((unit_mut.la + 1) >> 4) as u16 & 0o7760);
                unit_mut.la += 1024;
                temp
            }
            REG_DT => u.model.drive_type().devtype,
            REG_SN => (unit + 1) as u16,
            REG_OF => u.offset,
            REG_DC => u.da.c(),
            REG_CC => u.ccyl,
            REG_ER2 => self.err2,
            REG_ER3 => self.err3,
            _ => 0,
        }
    }

    /// One scheduled service tick for a drive.
    pub fn service(&mut self, unit: usize, bus: &mut dyn Unibus) -> ServiceResult {
        let Some(u) = self.units.get(unit) else {
            log::error!("rp service: no such unit {unit}");
            return ServiceResult::Done;
        };
        let Some(fnc) = u.fnc else {
            return ServiceResult::Done;
        };

        // Detached under a scheduled function: drive unsafe.
        if !u.is_attached() {
            let is_transfer = fnc.is_transfer();
            let u = &mut self.units[unit];
            u.er1 |= ER1_UNS;
            u.status |= DS_ATA;
            u.go = false;
            self.busy = false;
            if is_transfer {
                if self.ie {
                    bus.set_irq();
                }
            }
            else {
                self.set_attention(unit, bus);
            }
            return ServiceResult::Done;
        }

        // Positioning first: step the carriage toward the desired
        // cylinder one bounded move per tick.
        if self.units[unit].status & DS_PIP != 0 {
            let dt = self.units[unit].model.drive_type();
            let target = self.units[unit].da.c();
            if target >= dt.cylinders {
                // Leave the invalid address for the function completion
                // to report.
                self.units[unit].status &= !DS_PIP;
                return ServiceResult::Continue(10);
            }
            let u = &mut self.units[unit];
            let distance = target.abs_diff(u.ccyl);
            if distance > 0 {
                let (step, delay) = rp_seek_step(distance);
                let moved = step.min(distance);
                if target > u.ccyl {
                    u.ccyl += moved;
                }
                else {
                    u.ccyl -= moved;
                }
                if u.ccyl != target {
                    return ServiceResult::Continue(delay);
                }
            }
            u.status &= !DS_PIP;
        }

        match fnc {
            Function::Nop | Function::DriveClear | Function::Release | Function::PackAck => {
                self.units[unit].go = false;
                ServiceResult::Done
            }
            Function::Unload => {
                let _ = self.detach(unit);
                self.units[unit].status |= DS_ATA;
                if self.ie {
                    bus.set_irq();
                }
                ServiceResult::Done
            }
            Function::Offset
            | Function::Return
            | Function::ReadInPreset
            | Function::Recalibrate
            | Function::Seek
            | Function::Search => {
                if self.units[unit].address_invalid() {
                    self.units[unit].er1 |= ER1_IAE;
                }
                self.set_attention(unit, bus);
                log::trace!(
                    "rp{unit}: {fnc:?} complete at cylinder {}",
                    self.units[unit].ccyl
                );
                ServiceResult::Done
            }
            Function::Read | Function::ReadHeaders | Function::WriteCheck => {
                self.service_read(unit, fnc, bus)
            }
            Function::Write | Function::WriteHeaders => self.service_write(unit, fnc, bus),
        }
    }

    fn service_read(&mut self, unit: usize, fnc: Function, bus: &mut dyn Unibus) -> ServiceResult {
        if self.units[unit].sector_track_invalid() {
            let u = &mut self.units[unit];
            u.er1 |= ER1_IAE;
            u.status |= DS_ATA;
            return self.finish_transfer(unit, bus);
        }

        let lba = self.units[unit].desired_lba();
        let header = self.transfer_header(unit);
        {
            let Self { units, buf, .. } = self;
            let u = &mut units[unit];
            if let Some(media) = u.media.as_mut() {
                if let Err(e) = read_sector_words(media, lba, buf) {
                    // An unwritten region of a sparse pack reads as zeros.
                    log::warn!("rp{unit}: sector {lba} read: {e}");
                    buf.fill(0);
                }
            }
        }

        log::trace!("rp{unit}: {fnc:?} sector at {}", self.units[unit].da);

        // Read-with-headers prefixes the sector with two header words.
        if fnc == Function::ReadHeaders {
            for word in header {
                if !self.push_word(word, bus) {
                    return self.finish_transfer(unit, bus);
                }
            }
        }

        for i in 0..RP_NUMWD {
            let word = self.buf[i];
            if !self.push_word(word, bus) {
                return self.finish_transfer(unit, bus);
            }
        }

        self.units[unit].advance_sector();
        if self.wc == 0 {
            self.finish_transfer(unit, bus)
        }
        else {
            ServiceResult::Continue(RP_SECTOR_DELAY)
        }
    }

    fn service_write(&mut self, unit: usize, fnc: Function, bus: &mut dyn Unibus) -> ServiceResult {
        if self.units[unit].sector_track_invalid() {
            let u = &mut self.units[unit];
            u.er1 |= ER1_IAE;
            u.status |= DS_ATA;
            return self.finish_transfer(unit, bus);
        }

        // Write-with-headers consumes two header words first.
        let mut exhausted = false;
        if fnc == Function::WriteHeaders {
            for _ in 0..2 {
                if self.pull_word(bus).is_none() || self.wc == 0 {
                    exhausted = true;
                    break;
                }
            }
        }

        let mut filled = 0;
        while !exhausted && filled < RP_NUMWD {
            match self.pull_word(bus) {
                Some(word) => {
                    self.buf[filled] = word;
                    filled += 1;
                    if self.wc == 0 {
                        exhausted = true;
                    }
                }
                None => exhausted = true,
            }
        }
        // A short final sector writes in full, zero-filled.
        self.buf[filled..].fill(0);

        let lba = self.units[unit].desired_lba();
        {
            let Self { units, buf, .. } = self;
            let u = &mut units[unit];
            if let Some(media) = u.media.as_mut() {
                if let Err(e) = write_sector_words(media, lba, buf) {
                    log::error!("rp{unit}: sector {lba} write failed: {e}");
                    u.er1 |= ER1_UNS;
                    u.status |= DS_ATA;
                    return self.finish_transfer(unit, bus);
                }
            }
        }
        log::trace!("rp{unit}: {fnc:?} sector at {}", self.units[unit].da);

        self.units[unit].advance_sector();
        if exhausted || self.wc == 0 {
            self.units[unit].status &= !DS_PIP;
            self.finish_transfer(unit, bus)
        }
        else {
            ServiceResult::Continue(RP_SECTOR_DELAY)
        }
    }

    /// The two header words READH/WRITEH exchange ahead of the data.
    fn transfer_header(&self, unit: usize) -> [u64; 2] {
        let u = &self.units[unit];
        let track = u.da.h() as u64;
        [
            ((u.da.c() as u64) << 18) | (track << 8) | track,
            (((unit as u64) + 1) << 18) | unit as u64,
        ]
    }

    /// Move one word to memory, accounting word count and bus address.
    /// Returns false when the transfer is over.
    fn push_word(&mut self, word: u64, bus: &mut dyn Unibus) -> bool {
        if !bus.write_word(self.ba, word) {
            return false;
        }
        if self.cs2 & CS2_UAI == 0 {
            self.ba += 4;
        }
        self.wc = self.wc.wrapping_add(2);
        self.wc != 0
    }

    /// Pull one word from memory, accounting word count and bus address.
    /// The word still transfers when the count runs out on it; the caller
    /// checks `wc` afterwards.
    fn pull_word(&mut self, bus: &mut dyn Unibus) -> Option<u64> {
        let word = bus.read_word(self.ba)?;
        if self.cs2 & CS2_UAI == 0 {
            self.ba += 4;
        }
        self.wc = self.wc.wrapping_add(2);
        Some(word)
    }

    fn finish_transfer(&mut self, unit: usize, bus: &mut dyn Unibus) -> ServiceResult {
        let sec = self.units[unit].da.s();
        self.units[unit].la = (sec as u32) << 10;
        self.end_transfer(unit, bus);
        log::trace!("rp{unit}: transfer complete, wc {:06o}", self.wc);
        ServiceResult::Done
    }
}

impl Default for RpController {
    fn default() -> Self {
        RpController::new()
    }
}

fn rp_seek_step(distance: u16) -> (u16, u32) {
    if distance > RP_SEEK_STEP_LONG {
        (RP_SEEK_STEP_LONG, RP_SEEK_DELAY_LONG)
    }
    else if distance > RP_SEEK_STEP_SHORT {
        (RP_SEEK_STEP_SHORT, RP_SEEK_DELAY_MED)
    }
    else {
        (1, RP_SEEK_DELAY_SHORT)
    }
}

/// Read one 128-word sector, each word right-justified in 8 big-endian
/// bytes.
pub(crate) fn read_sector_words(
    media: &mut DiskMedia,
    lba: usize,
    buf: &mut [u64; RP_NUMWD],
) -> Result<(), crate::media::MediaError> {
    let mut bytes = [0u8; RP_SECTOR_BYTES];
    media.read_sector(lba, &mut bytes)?;
    for (i, word) in buf.iter_mut().enumerate() {
        let mut chunk = [0u8; 8];
        chunk.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
        *word = u64::from_be_bytes(chunk);
    }
    Ok(())
}

/// Write one 128-word sector in the same layout.
pub(crate) fn write_sector_words(
    media: &mut DiskMedia,
    lba: usize,
    buf: &[u64; RP_NUMWD],
) -> Result<(), crate::media::MediaError> {
    let mut bytes = [0u8; RP_SECTOR_BYTES];
    for (i, word) in buf.iter().enumerate() {
        bytes[i * 8..i * 8 + 8].copy_from_slice(&word.to_be_bytes());
    }
    media.write_sector(lba, &bytes)
}

#[cfg(test)]
pub(crate) mod mock {
    //! A recording Unibus for the drive tests: a flat word memory plus
    //! interrupt lines.

    use super::*;

    pub struct TestBus {
        pub mem: Vec<u64>,
        pub irqs: usize,
        pub irq_active: bool,
    }

    impl TestBus {
        pub fn new(words: usize) -> Self {
            TestBus {
                mem: vec![0; words],
                irqs: 0,
                irq_active: false,
            }
        }
    }

    impl Unibus for TestBus {
        fn read_word(&mut self, addr: u32) -> Option<u64> {
            self.mem.get((addr / 4) as usize).copied()
        }

        fn write_word(&mut self, addr: u32, data: u64) -> bool {
            match self.mem.get_mut((addr / 4) as usize) {
                Some(slot) => {
                    *slot = data;
                    true
                }
                None => false,
            }
        }

        fn set_irq(&mut self) {
            self.irqs += 1;
            self.irq_active = true;
        }

        fn clr_irq(&mut self) {
            self.irq_active = false;
        }
    }
}

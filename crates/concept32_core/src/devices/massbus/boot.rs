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

    devices::massbus::boot.rs

    Boot from a disk pack.

    The monitor's home block lives in block 1 (or, on packs with a bad
    block 1, block 010 or 012) and starts with the sixbit HOM sentinel.
    Word 0103 of the home block points at the SMFILE block, whose words
    4 and 5 point at the secondary bootstrap and give its length. The
    bootstrap loads at location 01000, which is also the entry point.
*/

use crate::{
    device_types::{chs::DiskChs, disk::{RpDriveType, RP_NUMWD}},
    devices::massbus::rp::{read_sector_words, RpUnit},
    media::MediaError,
};

use thiserror::Error;

/// Sixbit `HOM` in the high half of a 36-bit word.
pub const HOM_MAGIC: u64 = 0o505755000000;

/// Candidate home block numbers, in search order.
pub const HOM_BLOCKS: [usize; 3] = [0o1, 0o10, 0o12];

/// Load address and entry point of the secondary bootstrap.
pub const BOOT_LOAD_ADDR: usize = 0o1000;

/// Home block word pointing at the SMFILE block.
const HOM_SMFILE_PTR: usize = 0o103;
/// SMFILE words pointing at the bootstrap and giving its length.
const SMFILE_BOOT_PTR: usize = 0o4;
const SMFILE_BOOT_LEN: usize = 0o5;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("unit is not attached")]
    NotAttached,
    #[error("no home block on pack")]
    NoHomeBlock,
    #[error("bootstrap of {0} blocks does not fit in memory")]
    ImageTooLarge(usize),
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Decode a disk address word: sector in bits 0-5, surface in bits 8-13,
/// cylinder in bits 24 and up.
fn decode_pointer(word: u64) -> DiskChs {
    DiskChs::new(
        (word >> 24) as u16,
        ((word >> 8) & 0o77) as u8,
        (word & 0o77) as u8,
    )
}

fn lba_for(chs: DiskChs, dt: &RpDriveType) -> usize {
    ((chs.c() as usize * dt.surfaces as usize) + chs.h() as usize) * dt.sectors as usize
        + chs.s() as usize
}

/// Advance one block with surface and cylinder rollover.
fn next_block(chs: DiskChs, dt: &RpDriveType) -> DiskChs {
    let (mut c, mut h, mut s) = chs.get();
    s += 1;
    if s as u16 >= dt.sectors {
        s = 0;
        h += 1;
        if h as u16 >= dt.surfaces {
            h = 0;
            c += 1;
        }
    }
    DiskChs::new(c, h, s)
}

/// Find the home block, follow its pointers, and load the secondary
/// bootstrap into `mem`. Returns the entry point.
pub fn boot(unit: &mut RpUnit, mem: &mut [u64]) -> Result<usize, BootError> {
    let dt = unit.model().drive_type();
    let media = unit.media_mut().ok_or(BootError::NotAttached)?;

    let mut buf = [0u64; RP_NUMWD];

    // Search the candidate blocks for the sentinel.
    let mut found = false;
    for &block in HOM_BLOCKS.iter() {
        read_sector_words(media, block, &mut buf)?;
        if buf[0] == HOM_MAGIC {
            log::debug!("home block found at block {block:o}");
            found = true;
            break;
        }
    }
    if !found {
        return Err(BootError::NoHomeBlock);
    }

    // The home block points at the SMFILE block.
    let smfile = decode_pointer(buf[HOM_SMFILE_PTR]);
    read_sector_words(media, lba_for(smfile, &dt), &mut buf)?;

    // SMFILE points at the bootstrap proper.
    let mut image = decode_pointer(buf[SMFILE_BOOT_PTR]);
    let blocks = ((buf[SMFILE_BOOT_LEN] & 0o77) * 4) as usize;
    log::debug!("bootstrap at {image}, {blocks} blocks");

    if BOOT_LOAD_ADDR + blocks * RP_NUMWD > mem.len() {
        return Err(BootError::ImageTooLarge(blocks));
    }

    let mut addr = BOOT_LOAD_ADDR;
    for _ in 0..blocks {
        read_sector_words(media, lba_for(image, &dt), &mut buf)?;
        mem[addr..addr + RP_NUMWD].copy_from_slice(&buf);
        addr += RP_NUMWD;
        image = next_block(image, &dt);
    }

    Ok(BOOT_LOAD_ADDR)
}

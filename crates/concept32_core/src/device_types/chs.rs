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
*/

//! Define a [DiskChs] that represents cylinder, head, sector addressing,
//! plus conversions to and from the packed 32-bit subchannel target address
//! register ("STAR") word the channel firmware trades in.
//!
//! Sector IDs on these drives start at 0.

use crate::device_types::geometry::DriveGeometry;
use std::fmt::Display;

/// A structure representing a cylinder, head, sector address
///  - Cylinder (c)
///  - Head (h)
///  - Sector ID (s)
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct DiskChs {
    pub(crate) c: u16,
    pub(crate) h: u8,
    pub(crate) s: u8,
}

impl From<(u16, u8, u8)> for DiskChs {
    fn from((c, h, s): (u16, u8, u8)) -> Self {
        Self { c, h, s }
    }
}

impl From<DiskChs> for (u16, u8, u8) {
    fn from(chs: DiskChs) -> Self {
        (chs.c, chs.h, chs.s)
    }
}

impl Display for DiskChs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:4} h:{:2} s:{:2}]", self.c, self.h, self.s)
    }
}

impl DiskChs {
    /// Create a new `DiskChs` structure from cylinder, head and sector id components.
    pub fn new(c: u16, h: u8, s: u8) -> Self {
        Self { c, h, s }
    }
    /// Return the cylinder, head and sector id components in a tuple.
    #[inline]
    pub fn get(&self) -> (u16, u8, u8) {
        (self.c, self.h, self.s)
    }
    /// Return the cylinder (c) field.
    #[inline]
    pub fn c(&self) -> u16 {
        self.c
    }
    /// Return the head (h) field.
    #[inline]
    pub fn h(&self) -> u8 {
        self.h
    }
    /// Return the sector id (s) field.
    #[inline]
    pub fn s(&self) -> u8 {
        self.s
    }
    /// Set the three components of a `DiskChs`.
    pub fn set(&mut self, c: u16, h: u8, s: u8) {
        self.c = c;
        self.h = h;
        self.s = s;
    }
    /// Set the cylinder (c) component of a `DiskChs`.
    #[inline]
    pub fn set_c(&mut self, c: u16) {
        self.c = c;
    }
    /// Set the head (h) component of a `DiskChs`.
    #[inline]
    pub fn set_h(&mut self, h: u8) {
        self.h = h;
    }
    /// Set the sector ID (s) component of a `DiskChs`.
    #[inline]
    pub fn set_s(&mut self, s: u8) {
        self.s = s;
    }

    /// Pack into a STAR word: cylinder in the high halfword, head in
    /// bits 8-15, sector in bits 0-7.
    pub fn to_star(&self) -> u32 {
        ((self.c as u32) << 16) | ((self.h as u32) << 8) | (self.s as u32)
    }

    /// Unpack a STAR word.
    pub fn from_star(star: u32) -> DiskChs {
        DiskChs {
            c: (star >> 16) as u16,
            h: (star >> 8) as u8,
            s: star as u8,
        }
    }

    /// Pack into the 4-byte big-endian form a seek channel program carries.
    pub fn to_star_bytes(&self) -> [u8; 4] {
        self.to_star().to_be_bytes()
    }

    /// Unpack the 4-byte big-endian seek payload.
    pub fn from_star_bytes(bytes: [u8; 4]) -> DiskChs {
        DiskChs::from_star(u32::from_be_bytes(bytes))
    }

    /// Convert a [DiskChs] struct to a linear sector address.
    /// A reference [DriveGeometry] is required to calculate the address.
    pub fn to_lba(&self, geom: &DriveGeometry) -> usize {
        let hpc = geom.h() as usize;
        let spt = geom.s() as usize;
        (self.c as usize * hpc + (self.h as usize)) * spt + (self.s as usize)
    }

    /// Convert a linear sector address into a [DiskChs] struct.
    /// A reference drive geometry is required to calculate the address.
    /// # Returns:
    /// * `Some(DiskChs)` representing the resulting CHS address.
    /// * `None` if the linear address is invalid for the specified geometry.
    pub fn from_lba(lba: usize, geom: &DriveGeometry) -> Option<DiskChs> {
        let hpc = geom.h() as usize;
        let spt = geom.s() as usize;
        let c = lba / (hpc * spt);
        let h = (lba / spt) % hpc;
        let s = lba % spt;

        if c >= geom.c() as usize {
            return None;
        }
        Some(DiskChs::from((c as u16, h as u8, s as u8)))
    }

    /// Convert a `DiskChs` into a raw byte offset into the backing file.
    /// Returns `None` when the address lies outside the geometry.
    pub fn to_raw_offset(&self, geom: &DriveGeometry) -> Option<u64> {
        geom.contains(*self)
            .then_some(self.to_lba(geom) as u64 * geom.size() as u64)
    }

    /// Return a new `DiskChs` that is the next sector on the disk,
    /// according to the specified geometry.
    /// Returns None if the current `DiskChs` represents the last sector of
    /// the specified geometry.
    pub fn next_sector(&self, geom: &DriveGeometry) -> Option<DiskChs> {
        if self.s + 1 < geom.s() {
            // Not at last sector, just return next sector
            Some(DiskChs::from((self.c, self.h, self.s + 1)))
        }
        else if self.h + 1 < geom.h() {
            // At last sector, but not at last head, go to next head, same cylinder, sector 0
            Some(DiskChs::from((self.c, self.h + 1, 0)))
        }
        else if self.c + 1 < geom.c() {
            // At last sector and last head, go to next cylinder, head 0, sector 0
            Some(DiskChs::from((self.c + 1, 0, 0)))
        }
        else {
            // At end of disk.
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom() -> DriveGeometry {
        // 8887 layout: 823 cylinders, 10 heads, 35 sectors of 1024 bytes.
        DriveGeometry::new(823, 10, 35, 1024)
    }

    #[test]
    fn lba_chs_round_trip_is_idempotent() {
        let geom = geom();
        for c in [0u16, 1, 10, 822] {
            for h in 0..geom.h() {
                for s in 0..geom.s() {
                    let chs = DiskChs::new(c, h, s);
                    let lba = chs.to_lba(&geom);
                    let back = DiskChs::from_lba(lba, &geom).unwrap();
                    assert_eq!(back, chs);
                    assert_eq!(back.to_lba(&geom), lba);
                }
            }
        }
    }

    #[test]
    fn from_lba_rejects_out_of_range() {
        let geom = geom();
        assert!(DiskChs::from_lba(geom.total_sectors(), &geom).is_none());
        assert!(DiskChs::from_lba(0, &geom).is_some());
    }

    #[test]
    fn star_packing_matches_wire_layout() {
        let chs = DiskChs::new(0x0147, 0x09, 0x22);
        assert_eq!(chs.to_star(), 0x0147_0922);
        assert_eq!(chs.to_star_bytes(), [0x01, 0x47, 0x09, 0x22]);
        assert_eq!(DiskChs::from_star_bytes([0x01, 0x47, 0x09, 0x22]), chs);
    }

    #[test]
    fn next_sector_rolls_heads_and_cylinders() {
        let geom = geom();
        let end_of_track = DiskChs::new(0, 0, geom.s() - 1);
        assert_eq!(end_of_track.next_sector(&geom), Some(DiskChs::new(0, 1, 0)));

        let end_of_cyl = DiskChs::new(0, geom.h() - 1, geom.s() - 1);
        assert_eq!(end_of_cyl.next_sector(&geom), Some(DiskChs::new(1, 0, 0)));

        let last = DiskChs::new(geom.c() - 1, geom.h() - 1, geom.s() - 1);
        assert_eq!(last.next_sector(&geom), None);
    }
}

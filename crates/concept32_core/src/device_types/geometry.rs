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

//! Define a [DriveGeometry] that represents cylinder, head, and sector based
//! drive geometry. Pure math; no bounds are enforced here beyond
//! [DriveGeometry::contains], which callers use before converting addresses.

use crate::device_types::chs::DiskChs;
use std::fmt::Display;

/// A structure representing how sectors are laid out on a disk
///  - Cylinder count (c)
///  - Head count (h)
///  - Sectors per track (s)
///
/// Plus the sector size in bytes. Sector IDs start at 0.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct DriveGeometry {
    pub(crate) c: u16,
    pub(crate) h: u8,
    pub(crate) s: u8,
    pub(crate) size: usize,
}

impl Display for DriveGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:4} h:{:2} s:{:2} {}B]", self.c, self.h, self.s, self.size)
    }
}

impl DriveGeometry {
    /// Create a new [DriveGeometry] structure from cylinder, head and sector count components.
    pub fn new(c: u16, h: u8, s: u8, size: usize) -> Self {
        Self { c, h, s, size }
    }
    /// Return the cylinder count (c) field.
    #[inline]
    pub fn c(&self) -> u16 {
        self.c
    }
    /// Return the head count (h) field.
    #[inline]
    pub fn h(&self) -> u8 {
        self.h
    }
    /// Return the sector count (s) field.
    #[inline]
    pub fn s(&self) -> u8 {
        self.s
    }
    /// Return the size of a sector in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
    /// Return the sectors-per-cylinder product used throughout the on-disk
    /// map address arithmetic.
    #[inline]
    pub fn spc(&self) -> usize {
        self.h as usize * self.s as usize
    }
    /// Return the number of sectors represented by a [DriveGeometry].
    pub fn total_sectors(&self) -> usize {
        (self.c as usize) * (self.h as usize) * (self.s as usize)
    }
    /// Return the drive capacity in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_sectors() as u64 * self.size as u64
    }
    /// Return a boolean indicating whether this [DriveGeometry] contains
    /// the specified [DiskChs] representing a sector id.
    pub fn contains(&self, chs: impl Into<DiskChs>) -> bool {
        let chs = chs.into();
        self.c > chs.c() && self.h > chs.h() && self.s > chs.s()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_matches_bounds() {
        let geom = DriveGeometry::new(823, 10, 35, 1024);
        assert!(geom.contains((0u16, 0u8, 0u8)));
        assert!(geom.contains((822u16, 9u8, 34u8)));
        assert!(!geom.contains((823u16, 0u8, 0u8)));
        assert!(!geom.contains((0u16, 10u8, 0u8)));
        assert!(!geom.contains((0u16, 0u8, 35u8)));
    }

    #[test]
    fn totals() {
        let geom = DriveGeometry::new(823, 10, 35, 1024);
        assert_eq!(geom.total_sectors(), 288_050);
        assert_eq!(geom.total_bytes(), 288_050 * 1024);
        assert_eq!(geom.spc(), 350);
    }
}

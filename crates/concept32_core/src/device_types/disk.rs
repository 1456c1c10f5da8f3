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

    device_types::disk.rs

    Static drive geometry tables for the supported disk families.

    The numbers here are part of the hardware compatibility contract; guest
    operating systems size their filesystems and locate on-disk maps from
    them, so they must not be "corrected".
*/

use crate::device_types::geometry::DriveGeometry;

use lazy_static::lazy_static;
use std::fmt::{Display, Formatter};
use strum_macros::{Display as StrumDisplay, EnumIter, EnumString};

/// Geometry and identity of one supported class-F disk drive model.
///
/// `sector_words` is the sector size in 32-bit words; the MPX-era models
/// use 192-word (768 byte) sectors, the UTX-era models 256-word (1024
/// byte) sectors. `usable_cylinders` is the portion available to the guest
/// before the vendor/diagnostic reserved cylinders at the end of the
/// volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiskTypeDescriptor {
    pub name: &'static str,
    pub heads: u8,
    pub sector_words: u16,
    pub spt: u8,
    pub usable_cylinders: u16,
    pub cylinders: u16,
    pub type_code: u8,
    pub desc: String,
}

impl DiskTypeDescriptor {
    /// Sector size in bytes.
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.sector_words as usize * 4
    }

    /// Sectors per cylinder.
    #[inline]
    pub fn spc(&self) -> usize {
        self.heads as usize * self.spt as usize
    }

    /// Total capacity in sectors.
    pub fn capacity(&self) -> usize {
        self.cylinders as usize * self.spc()
    }

    /// Total capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity() as u64 * self.sector_size() as u64
    }

    /// The pure-math view of this drive's layout.
    pub fn geometry(&self) -> DriveGeometry {
        DriveGeometry::new(self.cylinders, self.heads, self.spt, self.sector_size())
    }
}

impl Display for DiskTypeDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cyl {} hds {} sec {} blk {} ({})",
            self.name,
            self.cylinders,
            self.heads,
            self.spt,
            self.sector_size(),
            self.desc
        )
    }
}

macro_rules! disk_type {
    ($name:literal, $hds:expr, $words:expr, $spt:expr, $ucyl:expr, $cyl:expr, $code:expr, $desc:literal) => {
        DiskTypeDescriptor {
            name: $name,
            heads: $hds,
            sector_words: $words,
            spt: $spt,
            usable_cylinders: $ucyl,
            cylinders: $cyl,
            type_code: $code,
            desc: $desc.to_string(),
        }
    };
}

lazy_static! {
    /// Class F disc devices supported by the high speed disk processor.
    /// The 192-word models are the MPX set; the 256-word models are the
    /// UTX set.
    pub static ref SEL_DISK_TYPES: Vec<DiskTypeDescriptor> = vec![
        // For MPX
        disk_type!("MH040",  5, 192, 20, 407, 411, 0x40, "40 MB"),
        disk_type!("MH080",  5, 192, 20, 819, 823, 0x40, "80 MB 8138"),
        disk_type!("MH160", 10, 192, 20, 819, 823, 0x40, "160 MB 8148"),
        disk_type!("MH300", 19, 192, 20, 819, 823, 0x40, "300 MB 9346"),
        disk_type!("MH600", 40, 192, 20, 839, 843, 0x40, "600 MB 8155"),
        // For UTX
        disk_type!("9342",   5, 256, 16, 819, 823, 0x41, "80 MB MH080"),
        disk_type!("8148",  10, 256, 16, 819, 823, 0x41, "160 MB MH160"),
        disk_type!("9346",  19, 256, 16, 819, 823, 0x41, "300 MB MH300"),
        disk_type!("8858",  24, 256, 16, 707, 711, 0x41, "340 MB DC340"),
        disk_type!("8887",  10, 256, 35, 819, 823, 0x41, "337 MB DP337"),
        disk_type!("8155",  40, 256, 16, 839, 843, 0x41, "600 MB MH600"),
    ];
}

/// Look a drive model up by the name given to `SET <unit> TYPE=<name>`.
pub fn find_disk_type(name: &str) -> Option<&'static DiskTypeDescriptor> {
    SEL_DISK_TYPES.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

/// 36-bit words per Massbus disk sector.
pub const RP_NUMWD: usize = 128;

/// The Massbus disk pack models. These are operated in 576 byte/sector
/// (128 36-bit word) mode. The RP07, despite its name, uses an RM-style
/// controller.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, StrumDisplay, EnumIter, EnumString)]
pub enum RpModel {
    RP04,
    #[default]
    RP06,
    RP07,
    RM03,
    RM05,
}

/// Geometry and Massbus drive-type code for one [RpModel].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RpDriveType {
    pub sectors: u16,
    pub surfaces: u16,
    pub cylinders: u16,
    pub devtype: u16,
}

impl RpModel {
    pub fn drive_type(&self) -> RpDriveType {
        match self {
            RpModel::RP04 => RpDriveType { sectors: 20, surfaces: 19, cylinders: 411, devtype: 0o20020 },
            RpModel::RP06 => RpDriveType { sectors: 20, surfaces: 19, cylinders: 815, devtype: 0o20022 },
            RpModel::RP07 => RpDriveType { sectors: 43, surfaces: 32, cylinders: 630, devtype: 0o20042 },
            RpModel::RM03 => RpDriveType { sectors: 30, surfaces: 5, cylinders: 823, devtype: 0o20024 },
            RpModel::RM05 => RpDriveType { sectors: 30, surfaces: 19, cylinders: 823, devtype: 0o20027 },
        }
    }

    /// Capacity in 36-bit words.
    pub fn size_words(&self) -> usize {
        let dt = self.drive_type();
        dt.sectors as usize * dt.surfaces as usize * dt.cylinders as usize * RP_NUMWD
    }

    /// Capacity in sectors.
    pub fn capacity(&self) -> usize {
        let dt = self.drive_type();
        dt.sectors as usize * dt.surfaces as usize * dt.cylinders as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn sel_table_is_well_formed() {
        for t in SEL_DISK_TYPES.iter() {
            assert!(t.spt > 0, "{}: zero spt", t.name);
            assert!(t.heads > 0, "{}: zero heads", t.name);
            assert!(t.cylinders > 0, "{}: zero cylinders", t.name);
            assert!(t.usable_cylinders <= t.cylinders, "{}: ucyl > cyl", t.name);
            assert!(t.sector_size() == 768 || t.sector_size() == 1024);
        }
    }

    #[test]
    fn lookup_by_name() {
        let t = find_disk_type("8887").unwrap();
        assert_eq!(t.heads, 10);
        assert_eq!(t.spt, 35);
        assert_eq!(t.sector_size(), 1024);
        assert_eq!(t.capacity(), 823 * 350);
        assert_eq!(t.type_code, 0x41);

        assert!(find_disk_type("mh040").is_some());
        assert!(find_disk_type("NOSUCH").is_none());
    }

    #[test]
    fn rp_models_parse_and_size() {
        assert_eq!(RpModel::from_str("RP06").unwrap(), RpModel::RP06);
        assert_eq!(RpModel::RP06.to_string(), "RP06");
        assert_eq!(RpModel::RP04.size_words(), 20 * 19 * 411 * RP_NUMWD);
        for model in RpModel::iter() {
            let dt = model.drive_type();
            assert!(dt.sectors > 0 && dt.surfaces > 0 && dt.cylinders > 0);
        }
    }
}

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

    devices::hsdp::labels.rs

    Synthesized sector and track labels.

    The simulated medium stores no real labels; RSL and RTL rebuild them on
    the fly. UTX reads the geometry bytes and the defect/media map pointers
    out of these records at boot, so the field positions and the pointer
    arithmetic are load-bearing.

    Reserved area layout, from the end of the volume: the vendor keeps the
    last cylinder and the diagnostics keep the next two, so the vendor
    defect table (VDT) sits at (cyl-4, heads-1, 0), the diagnostic map
    (DMAP) one track below it, and the UTX media map (UMAP) one track below
    that. Sector label pointers are "logical" addresses: the physical
    sector number scaled by (spt-1)/spt.
*/

use crate::device_types::{chs::DiskChs, disk::DiskTypeDescriptor};

/// Labels are 30-byte records.
pub const LABEL_LEN: usize = 30;

/// Good-sector flag in the label status byte.
pub const LBL_GOOD_SECTOR: u8 = 0x80;

/// Physical sector number of the vendor defect table.
pub fn vendor_table_sector(desc: &DiskTypeDescriptor) -> usize {
    (desc.cylinders as usize - 4) * desc.spc() + (desc.heads as usize - 1) * desc.spt as usize
}

/// Physical sector number of the diagnostic defect map, one track below
/// the vendor table. Track-zero labels point here.
pub fn diag_map_sector(desc: &DiskTypeDescriptor) -> usize {
    vendor_table_sector(desc) - desc.spt as usize
}

/// Physical sector number of the UTX media map, one further track down.
/// Sector labels point here.
pub fn media_map_sector(desc: &DiskTypeDescriptor) -> usize {
    diag_map_sector(desc) - desc.spt as usize
}

/// Scale a physical sector number into the "logical" address space the
/// subchannel reports in sector labels.
pub fn to_logical(sector: usize, spt: u8) -> usize {
    sector * (spt as usize - 1) / spt as usize
}

fn put_pointer(buf: &mut [u8; LABEL_LEN], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_config_bytes(buf: &mut [u8; LABEL_LEN], desc: &DiskTypeDescriptor) {
    // The tech doc shows cyl/trk/sec only in the first 4 bytes, but UTX
    // reads the copies in the configuration area: byte 27 is
    // sectors/track, byte 28 head count, byte 25 a copy of 27. Bit 0 of
    // byte 26 distinguishes the HSDP from the UDP/DPII.
    buf[25] = desc.spt;
    buf[26] = desc.type_code | 1;
    buf[27] = desc.spt;
    buf[28] = desc.heads;
}

/// Build the 30-byte sector label for the sector at `chs`.
pub fn sector_label(chs: DiskChs, desc: &DiskTypeDescriptor) -> [u8; LABEL_LEN] {
    let mut buf = [0u8; LABEL_LEN];

    let cyl = chs.c().to_be_bytes();
    buf[0] = cyl[0];
    buf[1] = cyl[1];
    buf[2] = chs.h();
    buf[3] = chs.s();
    buf[4] = LBL_GOOD_SECTOR;

    // Every sector label carries the media map pointer; the copy in
    // bytes 16-19 must be zero everywhere except cylinder 0, track 0,
    // sector 1 or the diagnostics complain.
    let umap = to_logical(media_map_sector(desc), desc.spt) as u32;
    put_pointer(&mut buf, 12, umap);
    if chs == DiskChs::new(0, 0, 1) {
        put_pointer(&mut buf, 16, umap);
    }

    put_config_bytes(&mut buf, desc);
    buf
}

/// Build the 30-byte track label for the track holding `chs`.
pub fn track_label(chs: DiskChs, desc: &DiskTypeDescriptor) -> [u8; LABEL_LEN] {
    let mut buf = [0u8; LABEL_LEN];

    // Track zero identifies itself with the last addressable sector of
    // the volume; other tracks report their own position.
    let (cyl, trk, sec) = if chs == DiskChs::default() {
        (desc.cylinders - 1, desc.heads - 1, desc.spt - 1)
    }
    else {
        chs.get()
    };

    let cyl_bytes = cyl.to_be_bytes();
    buf[0] = cyl_bytes[0];
    buf[1] = cyl_bytes[1];
    buf[2] = trk;
    buf[3] = sec;
    buf[4] = LBL_GOOD_SECTOR;

    if chs == DiskChs::default() {
        // Only track zero carries the map pointers: the diagnostic map by
        // physical address, the media map below it by logical address.
        let dmap = diag_map_sector(desc);
        put_pointer(&mut buf, 12, dmap as u32);
        put_pointer(&mut buf, 16, to_logical(dmap - desc.spt as usize, desc.spt) as u32);
    }

    put_config_bytes(&mut buf, desc);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_types::disk::find_disk_type;

    // The 8887 (823 cylinders, 10 heads, 35 sectors) is the reference
    // drive for the pointer arithmetic.
    fn dp337() -> &'static DiskTypeDescriptor {
        find_disk_type("8887").unwrap()
    }

    #[test]
    fn reserved_area_addresses() {
        let desc = dp337();
        assert_eq!(vendor_table_sector(desc), 286_965); // 819/9/0
        assert_eq!(diag_map_sector(desc), 286_930); // 819/8/0
        assert_eq!(media_map_sector(desc), 286_895); // 819/7/0
        assert_eq!(to_logical(media_map_sector(desc), desc.spt), 278_698);
    }

    #[test]
    fn sector_label_self_identifies() {
        let desc = dp337();
        let label = sector_label(DiskChs::new(0x0147, 9, 34), desc);
        assert_eq!(&label[..5], &[0x01, 0x47, 9, 34, 0x80]);
        assert_eq!(&label[12..16], &278_698u32.to_be_bytes());
        // Copy pointer is zero away from sector 1.
        assert_eq!(&label[16..20], &[0, 0, 0, 0]);
        assert_eq!(label[25], 35);
        assert_eq!(label[26], 0x41);
        assert_eq!(label[27], 35);
        assert_eq!(label[28], 10);
    }

    #[test]
    fn sector_one_carries_pointer_copy() {
        let desc = dp337();
        let label = sector_label(DiskChs::new(0, 0, 1), desc);
        assert_eq!(&label[12..16], &278_698u32.to_be_bytes());
        assert_eq!(&label[16..20], &278_698u32.to_be_bytes());
    }

    #[test]
    fn track_zero_label_points_at_maps() {
        let desc = dp337();
        let label = track_label(DiskChs::default(), desc);
        // Track zero reports the last addressable sector of the volume.
        assert_eq!(&label[..5], &[0x03, 0x36, 9, 34, 0x80]);
        assert_eq!(&label[12..16], &286_930u32.to_be_bytes());
        assert_eq!(&label[16..20], &278_698u32.to_be_bytes());
        assert_eq!(label[28], 10);
    }

    #[test]
    fn other_track_labels_have_no_pointers() {
        let desc = dp337();
        let label = track_label(DiskChs::new(5, 2, 0), desc);
        assert_eq!(&label[..5], &[0, 5, 2, 0, 0x80]);
        assert_eq!(&label[12..20], &[0u8; 8]);
    }
}

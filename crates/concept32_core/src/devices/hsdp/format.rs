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

    devices::hsdp::format.rs

    First-attach volume initialization.

    Guest operating systems find the flaw and media maps by fixed
    offset-from-end arithmetic, never by scanning, so the same drive type
    must always produce byte-identical map contents at identical offsets.
    Everything here is computed from the type descriptor alone.
*/

use crate::{
    device_types::disk::DiskTypeDescriptor,
    devices::hsdp::labels,
    media::{DiskMedia, MediaError},
};

/// Format sentinel written to the first word of sector 0. Attach treats an
/// all-zero first word as an uninitialized volume.
pub const FORMAT_SENTINEL: [u8; 4] = *b"ZERO";

/// Words in the UTX media map block.
pub const UMAP_LEN: usize = 256;

/// Scale a physical sector number into the logical space used by the
/// map blocks. Unlike the label pointers this uses sectors-per-cylinder;
/// the discrepancy is the controller firmware's, not ours.
fn to_logical_spc(sector: usize, spc: usize) -> usize {
    sector * (spc - 1) / spc
}

/// The diagnostic flaw map in its logical form, written where the track
/// zero label points.
fn diag_map(logla: u32, logda: u32) -> [u32; 4] {
    [
        0xf000_0000 | logla,
        0x8a00_0000 | logda,
        0x9a00_0000 | logla,
        0xf400_0008,
    ]
}

/// The diagnostic flaw map in physical form, written to the volume's last
/// sector.
fn diag_map_physical(last: u32, daddr: u32) -> [u32; 4] {
    [
        0xf000_0000 | last,
        0x8a00_0000 | daddr,
        0x9a00_0000 | last,
        0xf400_0008,
    ]
}

/// The null vendor flaw map.
fn vendor_map() -> [u32; 2] {
    [0xf000_0004, 0xf400_0000]
}

/// The UTX media map. Only the first words carry meaning; the remainder
/// of the block is zero. The opaque constants are the partition record
/// UTX expects to find on a freshly initialized pack.
fn media_map(logla: u32, logua: u32) -> [u32; UMAP_LEN] {
    let mut umap = [0u32; UMAP_LEN];
    let head = [
        0x4e55_4d50, // 'NUMP'
        logla,
        logua - 1,
        0,
        0,
        0,
        0,
        0xe10,
        0,
        0x5258,
        0,
        0x4e5c,
        0x3e,
        logua,
        0,
        0xd32c,
        0x79,
        0x1_87cc,
        0x118,
        0x1_4410,
        0x23f,
        0,
        0,
        0,
        0,
        0x3821_a2d6,
        0,
        0x110_2000,
        0xf4,
        0,
        0,
        0,
    ];
    umap[..head.len()].copy_from_slice(&head);
    umap
}

/// Initialize the full volume: zeroed tracks, the format sentinel, and the
/// vendor/diagnostic/media maps at their fixed locations.
pub fn format_volume(media: &mut DiskMedia, desc: &DiskTypeDescriptor) -> Result<(), MediaError> {
    let ssize = desc.sector_size();
    let spc = desc.spc();
    let cap = desc.capacity();

    // Last sector of the disk and its logical form.
    let laddr = cap - 1;
    let logla = to_logical_spc(laddr, spc);

    // Vendor defect table, diagnostic map one track below it, media map
    // one further track down.
    let vaddr = labels::vendor_table_sector(desc);
    let daddr = vaddr - desc.spt as usize;
    let logda = to_logical_spc(daddr, spc);
    let uaddr = daddr - desc.spt as usize;

    // First block past the user area.
    let luaddr = (desc.cylinders as usize - 4) * spc;
    let logua = to_logical_spc(luaddr, spc);

    log::debug!(
        "formatting {}: cap {} vdt {} dmap {} umap {} (logical last {})",
        desc.name,
        cap,
        vaddr,
        daddr,
        uaddr,
        logla
    );

    // Write zeros to each cylinder of the disk, with the sentinel word at
    // the front of cylinder 0.
    let mut cyl_buf = vec![0u8; spc * ssize];
    cyl_buf[..4].copy_from_slice(&FORMAT_SENTINEL);
    for cyl in 0..desc.cylinders as usize {
        media.write_sectors(cyl * spc, &cyl_buf)?;
        if cyl == 0 {
            cyl_buf[..4].fill(0);
        }
    }

    media.write_words(laddr, &diag_map_physical(laddr as u32, daddr as u32))?;
    media.write_words(vaddr, &vendor_map())?;
    media.write_words(daddr, &diag_map(logla as u32, logda as u32))?;
    media.write_words(uaddr, &media_map(logla as u32, logua as u32))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_types::disk::find_disk_type;

    fn formatted(name: &str) -> (DiskMedia, &'static DiskTypeDescriptor) {
        let desc = find_disk_type(name).unwrap();
        let mut media = DiskMedia::in_memory(desc.geometry());
        format_volume(&mut media, desc).unwrap();
        (media, desc)
    }

    #[test]
    fn sentinel_lands_in_sector_zero() {
        let (mut media, desc) = formatted("MH040");
        let mut sector = vec![0u8; desc.sector_size()];
        media.read_sector(0, &mut sector).unwrap();
        assert_eq!(&sector[..4], b"ZERO");
        assert!(sector[4..].iter().all(|&b| b == 0));
        assert!(!media.is_blank().unwrap());
    }

    #[test]
    fn map_blocks_for_mh040() {
        // MH040: 411 cylinders, 5 heads, 20 spt; spc 100; cap 41100.
        let (mut media, _desc) = formatted("MH040");

        let laddr = 41_099;
        let logla = 41_099 * 99 / 100;
        let vaddr = 407 * 100 + 4 * 20;
        let daddr = vaddr - 20;
        let logda = daddr * 99 / 100;
        let uaddr = daddr - 20;
        let logua = (407 * 100) * 99 / 100;

        let mut words = [0u32; 4];
        media.read_words(daddr, &mut words).unwrap();
        assert_eq!(
            words,
            [
                0xf000_0000 | logla as u32,
                0x8a00_0000 | logda as u32,
                0x9a00_0000 | logla as u32,
                0xf400_0008
            ]
        );

        media.read_words(laddr, &mut words).unwrap();
        assert_eq!(words[0], 0xf000_0000 | laddr as u32);
        assert_eq!(words[1], 0x8a00_0000 | daddr as u32);

        let mut vmap = [0u32; 2];
        media.read_words(vaddr, &mut vmap).unwrap();
        assert_eq!(vmap, [0xf000_0004, 0xf400_0000]);

        let mut umap = [0u32; 14];
        media.read_words(uaddr, &mut umap).unwrap();
        assert_eq!(umap[0], 0x4e55_4d50);
        assert_eq!(umap[1], logla as u32);
        assert_eq!(umap[2], logua as u32 - 1);
        assert_eq!(umap[13], logua as u32);
    }

    #[test]
    fn format_is_deterministic() {
        let (mut a, desc) = formatted("MH040");
        let (mut b, _) = formatted("MH040");

        let probe = [
            0,
            1,
            labels::vendor_table_sector(desc),
            labels::diag_map_sector(desc),
            labels::media_map_sector(desc),
            desc.capacity() - 1,
        ];
        let mut sa = vec![0u8; desc.sector_size()];
        let mut sb = vec![0u8; desc.sector_size()];
        for lba in probe {
            a.read_sector(lba, &mut sa).unwrap();
            b.read_sector(lba, &mut sb).unwrap();
            assert_eq!(sa, sb, "sector {lba} differs between formats");
        }
    }
}

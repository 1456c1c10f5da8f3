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

    media.rs

    Sector-addressed access to the host file backing a disk unit.

    The container is a flat image: sector 0 at offset 0, sectors in
    cylinder-major order, no header or footer. Massbus packs store each
    36-bit word right-justified in 8 big-endian bytes, so they ride the
    same byte-level access with a 1024-byte sector.
*/

use crate::device_types::{chs::DiskChs, geometry::DriveGeometry};

use std::{
    fs::{File, OpenOptions},
    io::{Cursor, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Anything a disk image can live in. Files for normal operation,
/// `Cursor<Vec<u8>>` for tests.
pub trait Backing: Read + Write + Seek + Send {}
impl<T: Read + Write + Seek + Send> Backing for T {}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("i/o error on backing file: {0}")]
    Io(#[from] std::io::Error),
    #[error("sector {lba} outside volume of {capacity} sectors")]
    OutOfRange { lba: usize, capacity: usize },
    #[error("buffer length {got} does not match sector size {want}")]
    BadBufferSize { got: usize, want: usize },
}

/// An attached disk image plus the geometry it was attached under.
pub struct DiskMedia {
    backing: Box<dyn Backing>,
    geometry: DriveGeometry,
    path: Option<PathBuf>,
}

impl DiskMedia {
    /// Wrap an already-open backing store.
    pub fn from_backing(backing: Box<dyn Backing>, geometry: DriveGeometry) -> Self {
        DiskMedia {
            backing,
            geometry,
            path: None,
        }
    }

    /// A zero-length in-memory volume. Useful for tests and for the format
    /// routine, which writes the full capacity anyway.
    pub fn in_memory(geometry: DriveGeometry) -> Self {
        DiskMedia::from_backing(Box::new(Cursor::new(Vec::new())), geometry)
    }

    /// Open (creating if necessary) a disk image file.
    pub fn open_file(path: &Path, geometry: DriveGeometry) -> Result<Self, MediaError> {
        let file: File = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        Ok(DiskMedia {
            backing: Box::new(file),
            geometry,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn geometry(&self) -> DriveGeometry {
        self.geometry
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Capacity in sectors.
    pub fn capacity(&self) -> usize {
        self.geometry.total_sectors()
    }

    /// True when the image carries no format: zero length, or an all-zero
    /// first word where the format routine writes its sentinel.
    pub fn is_blank(&mut self) -> Result<bool, MediaError> {
        let len = self.backing.seek(SeekFrom::End(0))?;
        if len == 0 {
            return Ok(true);
        }
        let mut word = [0u8; 4];
        self.backing.seek(SeekFrom::Start(0))?;
        match self.backing.read_exact(&mut word) {
            Ok(()) => Ok(word.iter().all(|&b| b == 0)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn check(&self, lba: usize, buf_len: usize) -> Result<(), MediaError> {
        if lba >= self.capacity() {
            return Err(MediaError::OutOfRange {
                lba,
                capacity: self.capacity(),
            });
        }
        if buf_len != self.geometry.size() {
            return Err(MediaError::BadBufferSize {
                got: buf_len,
                want: self.geometry.size(),
            });
        }
        Ok(())
    }

    /// Read the sector at linear address `lba` into `buf` (one full sector).
    pub fn read_sector(&mut self, lba: usize, buf: &mut [u8]) -> Result<(), MediaError> {
        self.check(lba, buf.len())?;
        self.backing
            .seek(SeekFrom::Start(lba as u64 * self.geometry.size() as u64))?;
        self.backing.read_exact(buf)?;
        Ok(())
    }

    /// Write one full sector at linear address `lba`.
    pub fn write_sector(&mut self, lba: usize, buf: &[u8]) -> Result<(), MediaError> {
        self.check(lba, buf.len())?;
        self.backing
            .seek(SeekFrom::Start(lba as u64 * self.geometry.size() as u64))?;
        self.backing.write_all(buf)?;
        Ok(())
    }

    /// Read the sector at a CHS address. The caller is expected to have
    /// bounds-checked against the geometry already; an out-of-range address
    /// still fails cleanly here.
    pub fn read_sector_chs(&mut self, chs: DiskChs, buf: &mut [u8]) -> Result<(), MediaError> {
        self.read_sector(chs.to_lba(&self.geometry), buf)
    }

    pub fn write_sector_chs(&mut self, chs: DiskChs, buf: &[u8]) -> Result<(), MediaError> {
        self.write_sector(chs.to_lba(&self.geometry), buf)
    }

    /// Write a run of whole sectors starting at linear address `lba`.
    /// `buf` must be a multiple of the sector size. The format routine
    /// uses this to lay down cylinder-sized runs of zeros.
    pub fn write_sectors(&mut self, lba: usize, buf: &[u8]) -> Result<(), MediaError> {
        let size = self.geometry.size();
        if buf.len() % size != 0 {
            return Err(MediaError::BadBufferSize {
                got: buf.len(),
                want: size,
            });
        }
        let count = buf.len() / size;
        if lba + count > self.capacity() {
            return Err(MediaError::OutOfRange {
                lba: lba + count - 1,
                capacity: self.capacity(),
            });
        }
        self.backing
            .seek(SeekFrom::Start(lba as u64 * size as u64))?;
        self.backing.write_all(buf)?;
        Ok(())
    }

    /// Write raw big-endian 32-bit words starting at a sector boundary.
    /// Used by the format routine for the on-disk map structures, which
    /// are always smaller than one sector.
    pub fn write_words(&mut self, lba: usize, words: &[u32]) -> Result<(), MediaError> {
        if lba >= self.capacity() {
            return Err(MediaError::OutOfRange {
                lba,
                capacity: self.capacity(),
            });
        }
        self.backing
            .seek(SeekFrom::Start(lba as u64 * self.geometry.size() as u64))?;
        for w in words {
            self.backing.write_all(&w.to_be_bytes())?;
        }
        Ok(())
    }

    /// Read raw big-endian 32-bit words from a sector boundary.
    pub fn read_words(&mut self, lba: usize, words: &mut [u32]) -> Result<(), MediaError> {
        if lba >= self.capacity() {
            return Err(MediaError::OutOfRange {
                lba,
                capacity: self.capacity(),
            });
        }
        self.backing
            .seek(SeekFrom::Start(lba as u64 * self.geometry.size() as u64))?;
        let mut bytes = [0u8; 4];
        for w in words.iter_mut() {
            self.backing.read_exact(&mut bytes)?;
            *w = u32::from_be_bytes(bytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_geom() -> DriveGeometry {
        DriveGeometry::new(4, 2, 8, 256)
    }

    #[test]
    fn sector_write_read_round_trip() {
        let mut media = DiskMedia::in_memory(small_geom());
        let pattern: Vec<u8> = (0..256).map(|i| i as u8).collect();
        media.write_sector(5, &pattern).unwrap();

        let mut back = vec![0u8; 256];
        media.read_sector(5, &mut back).unwrap();
        assert_eq!(back, pattern);
    }

    #[test]
    fn bounds_and_buffer_size_are_enforced() {
        let mut media = DiskMedia::in_memory(small_geom());
        let buf = vec![0u8; 256];
        assert!(matches!(
            media.write_sector(64, &buf),
            Err(MediaError::OutOfRange { lba: 64, .. })
        ));
        assert!(matches!(
            media.write_sector(0, &buf[..100]),
            Err(MediaError::BadBufferSize { got: 100, .. })
        ));
    }

    #[test]
    fn blank_detection() {
        let mut media = DiskMedia::in_memory(small_geom());
        assert!(media.is_blank().unwrap());

        media.write_sector(0, &vec![0u8; 256]).unwrap();
        assert!(media.is_blank().unwrap());

        let mut sentinel = vec![0u8; 256];
        sentinel[..4].copy_from_slice(b"ZERO");
        media.write_sector(0, &sentinel).unwrap();
        assert!(!media.is_blank().unwrap());
    }

    #[test]
    fn words_round_trip_big_endian() {
        let mut media = DiskMedia::in_memory(small_geom());
        media.write_sector(0, &vec![0u8; 256]).unwrap();
        media.write_words(1, &[0xf000_0004, 0xf400_0000]).unwrap();

        let mut words = [0u32; 2];
        media.read_words(1, &mut words).unwrap();
        assert_eq!(words, [0xf000_0004, 0xf400_0000]);

        let mut raw = vec![0u8; 256];
        media.read_sector(1, &mut raw).unwrap();
        assert_eq!(&raw[..4], &[0xf0, 0x00, 0x00, 0x04]);
    }

    #[test]
    fn open_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.dsk");

        {
            let mut media = DiskMedia::open_file(&path, small_geom()).unwrap();
            assert!(media.is_blank().unwrap());
            let pattern = vec![0xA5u8; 256];
            media.write_sector(3, &pattern).unwrap();
        }

        let mut media = DiskMedia::open_file(&path, small_geom()).unwrap();
        let mut back = vec![0u8; 256];
        media.read_sector(3, &mut back).unwrap();
        assert_eq!(back, vec![0xA5u8; 256]);
    }
}

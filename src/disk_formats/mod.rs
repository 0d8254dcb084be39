// src/disk_formats/mod.rs

pub mod trdos;

pub use trdos::TRDOS_640K;

/// Represents a floppy disk format with its physical characteristics.
#[derive(Debug, Clone, Copy)]
pub struct DiskFormat {
    pub cylinders: u8,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub sector_size: u16,
    pub name: &'static str,
}

impl DiskFormat {
    /// Bytes held by one head track.
    pub fn track_size(&self) -> usize {
        self.sectors_per_track as usize * self.sector_size as usize
    }

    /// Calculates the total size in bytes for this disk format.
    pub fn total_size(&self) -> usize {
        self.cylinders as usize * self.heads as usize * self.track_size()
    }

    /// Size code written into address fields (128 << code == sector size).
    pub fn size_code(&self) -> u8 {
        (self.sector_size / 128).trailing_zeros() as u8
    }
}

// Double density MFM track layout.
pub const GAP_BYTE: u8 = 0x4E;
pub const PRE_INDEX_GAP: usize = 80;
pub const SYNC_GAP: usize = 12;
pub const POST_INDEX_GAP: usize = 50;
pub const POST_ID_GAP: usize = 22;
pub const POST_DATA_GAP: usize = 54;
/// 250 kbit/s at 300 RPM.
pub const NOMINAL_TRACK_LEN: usize = 6250;

pub const INDEX_MARK: u8 = 0xFC;
pub const ID_MARK: u8 = 0xFE;
pub const DATA_MARK: u8 = 0xFB;

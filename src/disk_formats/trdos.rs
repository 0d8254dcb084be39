// src/disk_formats/trdos.rs

use super::DiskFormat;

/// 640K double-sided TR-DOS disk, 16 x 256-byte sectors per track.
pub const TRDOS_640K: DiskFormat = DiskFormat {
    cylinders: 80,
    heads: 2,
    sectors_per_track: 16,
    sector_size: 256,
    name: "640K TR-DOS DS/DD",
};

/// Gap written after the last sector of a TR-DOS track.
pub const TRAILING_GAP: usize = 200;

/// Track 0 sector 9 holds the disk descriptor.
pub const SYSTEM_SECTOR_OFFSET: usize = 8 * 256;
pub const TRDOS_ID_OFFSET: usize = 0xE7;
pub const TRDOS_ID: u8 = 0x10;
pub const DISK_TYPE_OFFSET: usize = 0xE3;
pub const FILE_COUNT_OFFSET: usize = 0xE4;
pub const FREE_SECTORS_OFFSET: usize = 0xE5;
pub const LABEL_OFFSET: usize = 0xF5;
pub const LABEL_LEN: usize = 8;

/// Describes the geometry byte of the system sector.
pub fn disk_type_name(disk_type: u8) -> &'static str {
    match disk_type {
        0x16 => "80 tracks, double sided",
        0x17 => "40 tracks, double sided",
        0x18 => "80 tracks, single sided",
        0x19 => "40 tracks, single sided",
        _ => "unknown",
    }
}

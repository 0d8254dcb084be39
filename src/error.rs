// src/error.rs
use thiserror::Error;

/// Format violations found while decoding a source image or building the container.
#[derive(Debug, Error)]
pub enum ImageError {
    /// More than one sector size bit set in an FDI sector descriptor
    #[error("Unsupported sector flags 0x{flags:02X} at C{cylinder} H{head} S{sector}")]
    BadSectorFlags { cylinder: u8, head: u8, sector: u8, flags: u8 },

    /// No size bit set and the descriptor's own size code is out of range
    #[error("Cannot determine sector size (code {size_code}) at C{cylinder} H{head} S{sector}")]
    UnknownSectorSize { cylinder: u8, head: u8, sector: u8, size_code: u8 },

    /// Flag bit 7 is reserved
    #[error("Reserved flag bit 7 set (flags 0x{flags:02X}) at C{cylinder} H{head} S{sector}")]
    ReservedFlag { cylinder: u8, head: u8, sector: u8, flags: u8 },

    #[error("Truncated {what} at offset 0x{offset:X}")]
    Truncated { what: &'static str, offset: u64 },

    #[error("Too many tracks: {count} (max {max})")]
    TooManyTracks { count: usize, max: usize },

    #[error("Track {track} is {length} bytes after interleaving (max 65535)")]
    TrackTooLong { track: usize, length: usize },

    #[error("Invalid .{format} file: unexpected signature {found:?}")]
    BadSignature { format: &'static str, found: String },
}

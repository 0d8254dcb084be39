// src/image_types/hfe.rs
use crate::FormatHandler;
use crate::error::ImageError;
use crate::flux::{BitOrder, FluxTrack};
use anyhow::{Result, anyhow};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, trace};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

pub const HFE_SIGNATURE: [u8; 8] = *b"HXCPICFE";
const BLOCK_SIZE: usize = 512;
const PAGE_SIZE: usize = 256;
const FILLER: u8 = 0xFF;
const LUT_ENTRY_LEN: usize = 4;
/// Lookup table entries that fit in its single block.
pub const MAX_TRACKS: usize = BLOCK_SIZE / LUT_ENTRY_LEN;

const ENCODING_DD: u8 = 0xFF;
const BITRATE_KBPS: u16 = 250;
const INTERFACE_MODE: u8 = 0xFF;
/// Lookup table position, in blocks.
const LUT_BLOCK: u16 = 1;

/// Bitstreams of both heads of one cylinder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackImage {
    head0: Vec<u8>,
    head1: Vec<u8>,
}

impl TrackImage {
    pub fn new(head0: Vec<u8>, head1: Vec<u8>) -> Self {
        TrackImage { head0, head1 }
    }

    /// Alternates 256-byte pages of head 0 and head 1, padding short pages with
    /// 0xFF, until a round leaves both heads short.
    pub fn interleave(&self) -> Vec<u8> {
        fn page(data: &[u8], pos: usize) -> &[u8] {
            data.get(pos..).map_or(&[][..], |rest| &rest[..PAGE_SIZE.min(rest.len())])
        }

        let mut out = Vec::with_capacity(2 * self.head0.len().max(self.head1.len()) + BLOCK_SIZE);
        let mut pos = 0;
        loop {
            let p0 = page(&self.head0, pos);
            let p1 = page(&self.head1, pos);
            for p in [p0, p1] {
                out.extend_from_slice(p);
                out.resize(out.len() + PAGE_SIZE - p.len(), FILLER);
            }
            if p0.len() < PAGE_SIZE && p1.len() < PAGE_SIZE {
                return out;
            }
            pos += PAGE_SIZE;
        }
    }
}

/// Serializes head tracks two at a time, dropping pairs with an empty side.
pub struct SidePairs<I> {
    tracks: I,
    order: BitOrder,
}

pub fn pair_sides<I: IntoIterator<Item = FluxTrack>>(tracks: I, order: BitOrder) -> SidePairs<I::IntoIter> {
    SidePairs { tracks: tracks.into_iter(), order }
}

impl<I: Iterator<Item = FluxTrack>> Iterator for SidePairs<I> {
    type Item = TrackImage;

    fn next(&mut self) -> Option<TrackImage> {
        loop {
            let head0 = self.tracks.next()?;
            let head1 = self.tracks.next().unwrap_or_default();
            if head0.is_empty() || head1.is_empty() {
                debug!("Skipping incomplete cylinder ({} / {} bytes)", head0.len(), head1.len());
                continue;
            }
            return Some(TrackImage::new(head0.to_bitstream(self.order), head1.to_bitstream(self.order)));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HFEHeader {
    pub revision: u8,
    pub track_count: u8,
    pub sides: u8,
    pub encoding: u8,
    pub bitrate: u16,
    pub rpm: u16,
    pub interface_mode: u8,
    pub dnu: u8,
    pub lut_offset: u16,
}

impl HFEHeader {
    fn for_tracks(track_count: u8) -> Self {
        HFEHeader {
            revision: 0,
            track_count,
            sides: 2,
            encoding: ENCODING_DD,
            bitrate: BITRATE_KBPS,
            rpm: 0,
            interface_mode: INTERFACE_MODE,
            dnu: 1,
            lut_offset: LUT_BLOCK,
        }
    }

    fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&HFE_SIGNATURE)?;
        out.write_u8(self.revision)?;
        out.write_u8(self.track_count)?;
        out.write_u8(self.sides)?;
        out.write_u8(self.encoding)?;
        out.write_u16::<LittleEndian>(self.bitrate)?;
        out.write_u16::<LittleEndian>(self.rpm)?;
        out.write_u8(self.interface_mode)?;
        out.write_u8(self.dnu)?;
        out.write_u16::<LittleEndian>(self.lut_offset)
    }

    fn read<R: Read>(input: &mut R) -> Result<Self> {
        let mut signature = [0u8; 8];
        input.read_exact(&mut signature)?;
        if signature != HFE_SIGNATURE {
            return Err(ImageError::BadSignature {
                format: "hfe",
                found: String::from_utf8_lossy(&signature).into_owned(),
            }
            .into());
        }
        Ok(HFEHeader {
            revision: input.read_u8()?,
            track_count: input.read_u8()?,
            sides: input.read_u8()?,
            encoding: input.read_u8()?,
            bitrate: input.read_u16::<LittleEndian>()?,
            rpm: input.read_u16::<LittleEndian>()?,
            interface_mode: input.read_u8()?,
            dnu: input.read_u8()?,
            lut_offset: input.read_u16::<LittleEndian>()?,
        })
    }
}

/// Lookup table entry: start block and byte length of one cylinder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEntry {
    pub offset: u16,
    pub length: u16,
}

/// Pads with 0xFF up to the next block boundary, always writing at least one byte.
fn pad_block<W: Write + Seek>(out: &mut W) -> std::io::Result<()> {
    let pos = out.stream_position()? as usize;
    let tail = BLOCK_SIZE - pos % BLOCK_SIZE;
    out.write_all(&vec![FILLER; tail])
}

/// Writes the header, the track blobs and finally the lookup table.
pub fn write_hfe<W: Write + Seek>(out: &mut W, images: &[TrackImage]) -> Result<Vec<TrackEntry>> {
    if images.len() > MAX_TRACKS {
        return Err(ImageError::TooManyTracks { count: images.len(), max: MAX_TRACKS }.into());
    }

    HFEHeader::for_tracks(images.len() as u8).write(out)?;
    pad_block(out)?;
    // Lookup table block, filled in once the track positions are known.
    pad_block(out)?;

    let mut entries = Vec::with_capacity(images.len());
    for (track, image) in images.iter().enumerate() {
        let block = out.stream_position()? / BLOCK_SIZE as u64;
        let data = image.interleave();
        let length = u16::try_from(data.len()).map_err(|_| ImageError::TrackTooLong { track, length: data.len() })?;
        let offset = u16::try_from(block).map_err(|_| anyhow!("Track {} starts beyond block 65535", track))?;
        out.write_all(&data)?;
        trace!("Track {}: block {}, {} bytes", track, offset, length);
        entries.push(TrackEntry { offset, length });
    }

    out.seek(SeekFrom::Start(LUT_BLOCK as u64 * BLOCK_SIZE as u64))?;
    for entry in &entries {
        out.write_u16::<LittleEndian>(entry.offset)?;
        out.write_u16::<LittleEndian>(entry.length)?;
    }
    out.seek(SeekFrom::End(0))?;
    Ok(entries)
}

pub struct HFEHandler {
    data: Vec<u8>,
}

impl HFEHandler {
    pub fn new(data: Vec<u8>) -> Self {
        HFEHandler { data }
    }

    fn parse(&self) -> Result<(HFEHeader, Vec<TrackEntry>)> {
        if self.data.len() < BLOCK_SIZE {
            return Err(ImageError::Truncated { what: "HFE header", offset: self.data.len() as u64 }.into());
        }
        let mut cursor = Cursor::new(&self.data);
        let header = HFEHeader::read(&mut cursor)?;

        let lut_start = header.lut_offset as u64 * BLOCK_SIZE as u64;
        cursor.set_position(lut_start);
        let mut entries = Vec::with_capacity(header.track_count as usize);
        for _ in 0..header.track_count {
            let truncated = |_: std::io::Error| ImageError::Truncated { what: "HFE lookup table", offset: lut_start };
            let offset = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
            let length = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
            entries.push(TrackEntry { offset, length });
        }
        Ok((header, entries))
    }

    /// Checks that every lookup entry points at page-aligned data inside the
    /// file and that tracks follow each other without holes. Returns the track count.
    pub fn validate(&self) -> Result<usize> {
        let (header, entries) = self.parse()?;
        if header.sides != 2 {
            return Err(anyhow!("Validation failed: {} sides, expected 2", header.sides));
        }
        let mut expected_block = header.lut_offset as usize + 1;
        for (track, entry) in entries.iter().enumerate() {
            let start = entry.offset as usize * BLOCK_SIZE;
            let end = start + entry.length as usize;
            if end > self.data.len() {
                return Err(ImageError::Truncated { what: "HFE track", offset: start as u64 }.into());
            }
            if entry.offset as usize != expected_block {
                return Err(anyhow!(
                    "Validation failed: track {} starts at block {}, expected {}",
                    track, entry.offset, expected_block
                ));
            }
            if entry.length as usize % BLOCK_SIZE != 0 {
                return Err(anyhow!("Validation failed: track {} length {} is not block aligned", track, entry.length));
            }
            expected_block += entry.length as usize / BLOCK_SIZE;
        }
        Ok(entries.len())
    }
}

impl FormatHandler for HFEHandler {
    fn display(&self) -> Result<String> {
        let (header, entries) = self.parse()?;
        let mut output = vec![
            format!("HxC Floppy Emulator Image (.hfe): {} bytes", self.data.len()),
            format!("Revision: {}", header.revision),
            format!("Tracks: {}, Sides: {}", header.track_count, header.sides),
            format!(
                "Encoding: 0x{:02X}, Bitrate: {} kbit/s, RPM: {}",
                header.encoding,
                header.bitrate,
                if header.rpm == 0 { "unspecified".to_string() } else { header.rpm.to_string() }
            ),
            format!("Interface mode: 0x{:02X}", header.interface_mode),
            format!("Lookup table at block {}", header.lut_offset),
        ];
        for (track, entry) in entries.iter().enumerate() {
            output.push(format!("  Track {}: block {}, {} bytes", track, entry.offset, entry.length));
        }
        Ok(output.join("\n"))
    }

    fn tracks(&self) -> Result<Vec<FluxTrack>> {
        Err(anyhow!("Conversion from .hfe is not supported"))
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

// src/image_types/trd.rs
use crate::FormatHandler;
use crate::mfm::{SectorId, TrackBuilder};
use crate::disk_formats::trdos::{self, TRAILING_GAP};
use crate::disk_formats::{DiskFormat, GAP_BYTE, TRDOS_640K};
use crate::flux::FluxTrack;
use anyhow::Result;
use log::{debug, warn};

pub struct TRDHandler {
    data: Vec<u8>,
}

impl TRDHandler {
    pub fn new(data: Vec<u8>) -> Self {
        TRDHandler { data }
    }

    fn format(&self) -> &'static DiskFormat {
        &TRDOS_640K
    }

    /// Head tracks covered by the file, counting a partial last track.
    fn track_sides(&self) -> usize {
        let format = self.format();
        self.data.len().div_ceil(format.sector_size as usize).div_ceil(format.sectors_per_track as usize)
    }

    fn cylinders(&self) -> usize {
        self.track_sides().div_ceil(self.format().heads as usize)
    }

    /// Standard layout for one head track, sectors numbered from 1.
    fn build_track(&self, cylinder: u8, head: u8, data: &[u8]) -> FluxTrack {
        let format = self.format();
        let sector_size = format.sector_size as usize;
        let mut builder = TrackBuilder::new();
        builder.index_preamble();

        for sector in 1..=format.sectors_per_track {
            let start = (sector as usize - 1) * sector_size;
            let payload = data.get(start..).map_or(&[][..], |rest| &rest[..sector_size.min(rest.len())]);
            builder
                .id_field(SectorId { cylinder, head, sector, size_code: format.size_code() })
                .data_mark()
                .data_body(payload, true);
        }

        builder.gap(GAP_BYTE, TRAILING_GAP);
        builder.finish()
    }

    fn label(&self) -> Option<String> {
        let system = self.data.get(trdos::SYSTEM_SECTOR_OFFSET..trdos::SYSTEM_SECTOR_OFFSET + 256)?;
        if system[trdos::TRDOS_ID_OFFSET] != trdos::TRDOS_ID {
            return None;
        }
        let label = &system[trdos::LABEL_OFFSET..trdos::LABEL_OFFSET + trdos::LABEL_LEN];
        Some(String::from_utf8_lossy(label).trim_end().to_string())
    }
}

impl FormatHandler for TRDHandler {
    fn display(&self) -> Result<String> {
        let format = self.format();
        let mut output = vec![
            format!("TR-DOS Image (.trd): {} bytes", self.data.len()),
            format!(
                "Assumed Geometry: {} ({} heads, {} sectors/track, {} bytes/sector)",
                format.name, format.heads, format.sectors_per_track, format.sector_size
            ),
            format!("Cylinders: {} ({} head tracks)", self.cylinders(), self.track_sides()),
            format!("Nominal capacity: {} bytes", format.total_size()),
        ];
        if let Some(label) = self.label() {
            let system = &self.data[trdos::SYSTEM_SECTOR_OFFSET..];
            let free = u16::from_le_bytes([system[trdos::FREE_SECTORS_OFFSET], system[trdos::FREE_SECTORS_OFFSET + 1]]);
            let disk_type = system[trdos::DISK_TYPE_OFFSET];
            output.push(format!("Label: {}", label));
            output.push(format!("Disk Type: {} (0x{:02X})", trdos::disk_type_name(disk_type), disk_type));
            output.push(format!("Files: {}, Free sectors: {}", system[trdos::FILE_COUNT_OFFSET], free));
        }
        Ok(output.join("\n"))
    }

    fn tracks(&self) -> Result<Vec<FluxTrack>> {
        let format = self.format();
        let track_size = format.track_size();
        if self.data.len() % format.sector_size as usize != 0 {
            warn!("File size {} is not a multiple of {} bytes", self.data.len(), format.sector_size);
        }

        let mut tracks = Vec::with_capacity(self.cylinders() * format.heads as usize);
        let mut pos = 0;
        for cyl in 0..self.cylinders() {
            for head in 0..format.heads {
                // Nothing left to read: the cylinder is incomplete.
                if pos >= self.data.len() {
                    debug!("Cyl {}, Head {}: no data", cyl, head);
                    tracks.push(FluxTrack::default());
                    continue;
                }
                let end = (pos + track_size).min(self.data.len());
                let track = self.build_track(cyl as u8, head, &self.data[pos..end]);
                debug!("Cyl {}, Head {}: {} bytes of sector data, {} bytes", cyl, head, end - pos, track.len());
                tracks.push(track);
                pos = end;
            }
        }
        Ok(tracks)
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

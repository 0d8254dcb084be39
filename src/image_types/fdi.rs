// src/image_types/fdi.rs
use crate::FormatHandler;
use crate::mfm::{SectorId, TrackBuilder};
use crate::disk_formats::NOMINAL_TRACK_LEN;
use crate::error::ImageError;
use crate::flux::FluxTrack;
use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace, warn};
use std::io::{Cursor, Read};

const FDI_HEADER_LEN: u64 = 0x0E;

const FLAG_SIZE_MASK: u8 = 0x3F;
const FLAG_NO_DATA: u8 = 0x40;
const FLAG_RESERVED: u8 = 0x80;

/// Size class for each value of the six CRC-valid bits; only one-hot values map.
static SIZE_CLASS: [Option<u8>; 64] = {
    let mut table = [None; 64];
    let mut class: usize = 0;
    while class < 6 {
        table[1 << class] = Some(class as u8);
        class += 1;
    }
    table
};

pub struct FDIHandler {
    data: Vec<u8>,
}

struct FDIHeader {
    signature: [u8; 3],
    write_protect: bool,
    cylinders: u16,
    heads: u16,
    description_offset: u16,
    data_offset: u16,
    additional_data_offset: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub offset: u32,
    pub sectors: Vec<SectorDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorDescriptor {
    pub cylinder: u8,
    pub head: u8,
    pub sector: u8,
    pub size_code: u8,
    pub flags: u8,
    pub offset: u16,
}

impl SectorDescriptor {
    fn id(&self) -> SectorId {
        SectorId { cylinder: self.cylinder, head: self.head, sector: self.sector, size_code: self.size_code }
    }

    fn has_data(&self) -> bool {
        self.flags & FLAG_NO_DATA == 0
    }

    /// Returns the payload size class and whether the data CRC is marked good.
    pub fn size_class(&self) -> Result<(u8, bool), ImageError> {
        let size_flags = self.flags & FLAG_SIZE_MASK;
        let (class, crc_valid) = if size_flags == 0 {
            if self.size_code >= 5 {
                return Err(ImageError::UnknownSectorSize {
                    cylinder: self.cylinder,
                    head: self.head,
                    sector: self.sector,
                    size_code: self.size_code,
                });
            }
            (self.size_code, false)
        } else {
            match SIZE_CLASS[size_flags as usize] {
                Some(class) => (class, true),
                None => {
                    return Err(ImageError::BadSectorFlags {
                        cylinder: self.cylinder,
                        head: self.head,
                        sector: self.sector,
                        flags: self.flags,
                    })
                }
            }
        };
        if self.flags & FLAG_RESERVED != 0 {
            return Err(ImageError::ReservedFlag {
                cylinder: self.cylinder,
                head: self.head,
                sector: self.sector,
                flags: self.flags,
            });
        }
        Ok((class, crc_valid))
    }
}

impl FDIHandler {
    pub fn new(data: Vec<u8>) -> Self {
        FDIHandler { data }
    }

    fn parse_header(&self) -> Result<FDIHeader> {
        if (self.data.len() as u64) < FDI_HEADER_LEN {
            return Err(ImageError::Truncated { what: "FDI header", offset: self.data.len() as u64 }.into());
        }
        let mut cursor = Cursor::new(&self.data);
        let mut signature = [0u8; 3];
        cursor.read_exact(&mut signature)?;
        let write_protect = cursor.read_u8()? != 0;
        let cylinders = cursor.read_u16::<LittleEndian>()?;
        let heads = cursor.read_u16::<LittleEndian>()?;
        let description_offset = cursor.read_u16::<LittleEndian>()?;
        let data_offset = cursor.read_u16::<LittleEndian>()?;
        let additional_data_offset = cursor.read_u16::<LittleEndian>()?;

        if signature != *b"FDI" {
            warn!("FDI signature is {:?}, reading anyway", String::from_utf8_lossy(&signature));
        }

        Ok(FDIHeader { signature, write_protect, cylinders, heads, description_offset, data_offset, additional_data_offset })
    }

    fn parse_descriptors(&self, header: &FDIHeader) -> Result<Vec<TrackDescriptor>> {
        let mut cursor = Cursor::new(&self.data);
        cursor.set_position(FDI_HEADER_LEN + header.additional_data_offset as u64);

        let count = header.cylinders as usize * header.heads as usize;
        let mut descriptors = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = cursor.position();
            let truncated = |_: std::io::Error| ImageError::Truncated { what: "FDI track descriptor", offset };
            let track_offset = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
            let _reserved = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
            let sector_count = cursor.read_u8().map_err(truncated)?;

            let mut sectors = Vec::with_capacity(sector_count as usize);
            for _ in 0..sector_count {
                sectors.push(SectorDescriptor {
                    cylinder: cursor.read_u8().map_err(truncated)?,
                    head: cursor.read_u8().map_err(truncated)?,
                    sector: cursor.read_u8().map_err(truncated)?,
                    size_code: cursor.read_u8().map_err(truncated)?,
                    flags: cursor.read_u8().map_err(truncated)?,
                    offset: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
                });
            }
            descriptors.push(TrackDescriptor { offset: track_offset, sectors });
        }
        Ok(descriptors)
    }

    /// Lays out a full MFM track around the sectors a descriptor lists.
    fn build_track(&self, data_offset: usize, track: &TrackDescriptor) -> Result<FluxTrack> {
        let mut builder = TrackBuilder::new();
        builder.index_preamble();

        for sector in &track.sectors {
            let (class, crc_valid) = sector.size_class()?;
            builder.id_field(sector.id()).data_mark();
            if !sector.has_data() {
                trace!("C{} H{} S{}: no data", sector.cylinder, sector.head, sector.sector);
                continue;
            }

            let size = 128usize << class;
            let start = data_offset + track.offset as usize + sector.offset as usize;
            let payload = self.data.get(start..).map_or(&[][..], |rest| &rest[..size.min(rest.len())]);
            if payload.len() < size {
                warn!(
                    "C{} H{} S{}: payload at 0x{:X} is {} of {} bytes",
                    sector.cylinder, sector.head, sector.sector, start, payload.len(), size
                );
            }
            trace!(
                "C{} H{} S{}: {} bytes, crc {}",
                sector.cylinder, sector.head, sector.sector, size, if crc_valid { "good" } else { "bad" }
            );
            builder.data_body(payload, crc_valid);
        }

        if builder.len() > NOMINAL_TRACK_LEN {
            debug!("Track layout is {} bytes, longer than nominal {}", builder.len(), NOMINAL_TRACK_LEN);
        }
        builder.pad_to(NOMINAL_TRACK_LEN);
        Ok(builder.finish())
    }
}

impl FormatHandler for FDIHandler {
    fn display(&self) -> Result<String> {
        let header = self.parse_header()?;
        let descriptors = self.parse_descriptors(&header)?;
        let mut output = vec![
            format!("Signature: {}", String::from_utf8_lossy(&header.signature)),
            format!("Write protected: {}", header.write_protect),
            format!("Geometry: {} cylinders, {} heads", header.cylinders, header.heads),
            format!(
                "Offsets: description 0x{:04X}, data 0x{:04X}, additional data 0x{:04X}",
                header.description_offset, header.data_offset, header.additional_data_offset
            ),
        ];
        for (i, track) in descriptors.iter().enumerate() {
            let heads = (header.heads as usize).max(1);
            let ids: Vec<String> = track.sectors.iter().map(|s| s.sector.to_string()).collect();
            output.push(format!(
                "Cyl {}, Head {}: {} sectors at 0x{:X} [{}]",
                i / heads, i % heads, track.sectors.len(), track.offset, ids.join(",")
            ));
        }
        output.push(format!("Full Disk Image (.fdi): {} bytes", self.data.len()));
        Ok(output.join("\n"))
    }

    fn tracks(&self) -> Result<Vec<FluxTrack>> {
        let header = self.parse_header()?;
        let descriptors = self.parse_descriptors(&header)?;
        let mut tracks = Vec::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            let track = self.build_track(header.data_offset as usize, descriptor)?;
            debug!("Track {}: {} sectors, {} bytes", i, descriptor.sectors.len(), track.len());
            tracks.push(track);
        }
        Ok(tracks)
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mfm::crc16;

    fn sector(sector: u8, size_code: u8, flags: u8, offset: u16) -> SectorDescriptor {
        SectorDescriptor { cylinder: 0, head: 0, sector, size_code, flags, offset }
    }

    /// One cylinder, one head, sectors given as (descriptor, payload).
    fn fdi_image(sectors: &[SectorDescriptor], payload: &[u8]) -> Vec<u8> {
        let table_len = 7 + 7 * sectors.len();
        let data_offset = (FDI_HEADER_LEN as usize + table_len) as u16;
        let mut data = b"FDI".to_vec();
        data.push(0);
        data.extend(1u16.to_le_bytes());
        data.extend(1u16.to_le_bytes());
        data.extend(0u16.to_le_bytes());
        data.extend(data_offset.to_le_bytes());
        data.extend(0u16.to_le_bytes());
        data.extend(0u32.to_le_bytes());
        data.extend(0u16.to_le_bytes());
        data.push(sectors.len() as u8);
        for s in sectors {
            data.extend([s.cylinder, s.head, s.sector, s.size_code, s.flags]);
            data.extend(s.offset.to_le_bytes());
        }
        data.extend(payload);
        data
    }

    fn track_bytes(track: &FluxTrack) -> Vec<u8> {
        track.bytes().iter().map(|b| b.data).collect()
    }

    #[test]
    fn test_size_class_table() {
        for class in 0..6u8 {
            assert_eq!(sector(1, 0, 1 << class, 0).size_class().unwrap(), (class, true));
        }
        assert_eq!(sector(1, 2, 0, 0).size_class().unwrap(), (2, false));
    }

    #[test]
    fn test_size_class_rejects_multiple_bits() {
        let err = sector(1, 1, 0x03, 0).size_class().unwrap_err();
        assert!(matches!(err, ImageError::BadSectorFlags { flags: 0x03, .. }));
        let err = sector(1, 1, 0x22, 0).size_class().unwrap_err();
        assert!(matches!(err, ImageError::BadSectorFlags { .. }));
    }

    #[test]
    fn test_size_class_rejects_reserved_bit() {
        let err = sector(1, 1, 0x82, 0).size_class().unwrap_err();
        assert!(matches!(err, ImageError::ReservedFlag { flags: 0x82, .. }));
    }

    #[test]
    fn test_size_class_unknown_size_code() {
        let err = sector(1, 5, 0x00, 0).size_class().unwrap_err();
        assert!(matches!(err, ImageError::UnknownSectorSize { size_code: 5, .. }));
    }

    #[test]
    fn test_track_layout() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let image = fdi_image(&[sector(1, 1, 0x02, 0)], &payload);
        let tracks = FDIHandler::new(image).tracks().unwrap();
        assert_eq!(tracks.len(), 1);
        let bytes = track_bytes(&tracks[0]);
        assert_eq!(bytes.len(), NOMINAL_TRACK_LEN);

        let id = 146;
        assert_eq!(&bytes[id..id + 12], &[0u8; 12]);
        assert_eq!(&bytes[id + 12..id + 20], &[0xA1, 0xA1, 0xA1, 0xFE, 0, 0, 1, 1]);
        assert_eq!(&bytes[id + 20..id + 22], &[0xFA, 0x0C]);

        let mark = id + 22 + 22 + 12;
        assert_eq!(&bytes[mark..mark + 4], &[0xA1, 0xA1, 0xA1, 0xFB]);
        assert!(tracks[0].bytes()[mark..mark + 3].iter().all(|b| b.sync));
        let body = mark + 4;
        assert_eq!(&bytes[body..body + 256], &payload[..]);
        let crc = crc16(&bytes[mark..body + 256]);
        assert_eq!(&bytes[body + 256..body + 258], &crc.to_be_bytes());
        assert!(bytes[body + 258..].iter().all(|&b| b == 0x4E));
    }

    #[test]
    fn test_bad_crc_is_inverted() {
        let payload = [0u8; 128];
        let image = fdi_image(&[sector(1, 0, 0x00, 0)], &payload);
        let bytes = track_bytes(&FDIHandler::new(image).tracks().unwrap()[0]);
        let body = 146 + 22 + 22 + 12 + 4;
        let mut crc_input = vec![0xA1, 0xA1, 0xA1, 0xFB];
        crc_input.extend(payload);
        assert_eq!(&bytes[body + 128..body + 130], &(!crc16(&crc_input)).to_be_bytes());
    }

    #[test]
    fn test_no_data_sector_stops_at_data_mark() {
        let image = fdi_image(&[sector(1, 1, 0x42, 0), sector(2, 1, 0x02, 0)], &[0xE5; 256]);
        let bytes = track_bytes(&FDIHandler::new(image).tracks().unwrap()[0]);
        // The second ID field follows the first data mark directly.
        let second_id = 146 + 22 + 22 + 12 + 4;
        assert_eq!(&bytes[second_id + 12..second_id + 20], &[0xA1, 0xA1, 0xA1, 0xFE, 0, 0, 2, 1]);
    }

    #[test]
    fn test_short_payload_at_end_of_file() {
        let image = fdi_image(&[sector(1, 1, 0x02, 0)], &[0x11; 100]);
        let bytes = track_bytes(&FDIHandler::new(image).tracks().unwrap()[0]);
        let body = 146 + 22 + 22 + 12 + 4;
        assert_eq!(&bytes[body..body + 100], &[0x11; 100]);
        assert_eq!(bytes.len(), NOMINAL_TRACK_LEN);
    }

    #[test]
    fn test_bad_flags_abort_conversion() {
        let image = fdi_image(&[sector(1, 1, 0x06, 0)], &[0; 256]);
        let err = FDIHandler::new(image).tracks().unwrap_err();
        assert!(matches!(err.downcast_ref::<ImageError>(), Some(ImageError::BadSectorFlags { .. })));
    }

    #[test]
    fn test_offsets_across_tracks() {
        // One cylinder, two heads, 4 bytes of additional data before the table.
        let table_len = 2 * (7 + 7);
        let data_offset = (FDI_HEADER_LEN as usize + 4 + table_len) as u16;
        let mut image = b"FDI".to_vec();
        image.push(0);
        for field in [1u16, 2, 0, data_offset, 4] {
            image.extend(field.to_le_bytes());
        }
        image.extend([0xEE; 4]);
        for (head, track_offset) in [(0u8, 0u32), (1, 256)] {
            image.extend(track_offset.to_le_bytes());
            image.extend(0u16.to_le_bytes());
            image.push(1);
            image.extend([0, head, 1, 0, 0x01]);
            image.extend(128u16.to_le_bytes());
        }
        for block in 0x10..=0x13u8 {
            image.extend([block; 128]);
        }

        let tracks = FDIHandler::new(image).tracks().unwrap();
        assert_eq!(tracks.len(), 2);
        let body = 146 + 22 + 22 + 12 + 4;
        for (track, (head, block)) in tracks.iter().zip([(0u8, 0x11u8), (1, 0x13)]) {
            let bytes = track_bytes(track);
            assert_eq!(&bytes[146 + 12..146 + 20], &[0xA1, 0xA1, 0xA1, 0xFE, 0, head, 1, 0]);
            assert!(bytes[body..body + 128].iter().all(|&b| b == block));
        }
    }

    #[test]
    fn test_truncated_descriptor_table() {
        let mut image = fdi_image(&[sector(1, 1, 0x02, 0)], &[]);
        image.truncate(image.len() - 3);
        let err = FDIHandler::new(image).tracks().unwrap_err();
        assert!(matches!(err.downcast_ref::<ImageError>(), Some(ImageError::Truncated { .. })));
    }
}

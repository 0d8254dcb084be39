// src/image_types/udi.rs
use crate::FormatHandler;
use crate::error::ImageError;
use crate::flux::FluxTrack;
use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use std::io::{Cursor, Read};

const UDI_HEADER_LEN: u64 = 0x10;

pub struct UDIHandler {
    data: Vec<u8>,
}

struct UDIHeader {
    signature: [u8; 4],
    file_size: u32,
    version: u8,
    cylinders: u8,
    /// Stored as sides - 1.
    sides: u8,
    ext_header_len: u32,
}

impl UDIHeader {
    fn heads(&self) -> usize {
        self.sides as usize + 1
    }
}

impl UDIHandler {
    pub fn new(data: Vec<u8>) -> Self {
        UDIHandler { data }
    }

    fn parse_header(&self) -> Result<UDIHeader> {
        if (self.data.len() as u64) < UDI_HEADER_LEN {
            return Err(ImageError::Truncated { what: "UDI header", offset: self.data.len() as u64 }.into());
        }
        let mut cursor = Cursor::new(&self.data);
        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature)?;
        let file_size = cursor.read_u32::<LittleEndian>()?;
        let version = cursor.read_u8()?;
        let cylinders = cursor.read_u8()?;
        let sides = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let ext_header_len = cursor.read_u32::<LittleEndian>()?;

        if signature != *b"UDI!" {
            warn!("UDI signature is {:?}, reading anyway", String::from_utf8_lossy(&signature));
        }

        Ok(UDIHeader { signature, file_size, version, cylinders, sides, ext_header_len })
    }
}

impl FormatHandler for UDIHandler {
    fn display(&self) -> Result<String> {
        let header = self.parse_header()?;
        let tracks = self.tracks()?;
        let mut output = vec![
            format!("Signature: {}", String::from_utf8_lossy(&header.signature)),
            format!("Version: {}", header.version),
            format!("Size (without checksum): {} bytes", header.file_size),
            format!("Geometry: {} cylinders, {} heads", header.cylinders, header.heads()),
            format!("Extended header: {} bytes", header.ext_header_len),
        ];
        output.push(crate::mfm::display("Ultra Disk Image (.udi)", self.data.len(), &tracks, header.heads())?);
        Ok(output.join("\n"))
    }

    fn tracks(&self) -> Result<Vec<FluxTrack>> {
        let header = self.parse_header()?;
        let mut cursor = Cursor::new(&self.data);
        cursor.set_position(UDI_HEADER_LEN + header.ext_header_len as u64);

        let mut tracks = Vec::with_capacity(header.cylinders as usize * header.heads());
        for cyl in 0..header.cylinders as usize {
            for head in 0..header.heads() {
                let offset = cursor.position();
                let truncated = |_: std::io::Error| ImageError::Truncated { what: "UDI track", offset };
                let track_type = cursor.read_u8().map_err(truncated)?;
                let length = cursor.read_u16::<LittleEndian>().map_err(truncated)? as usize;
                if track_type != 0 {
                    warn!("Cyl {}, Head {}: track type {} ignored", cyl, head, track_type);
                }

                let mut raw = vec![0u8; length];
                cursor.read_exact(&mut raw).map_err(truncated)?;
                let mut flags = vec![0u8; length.div_ceil(8)];
                cursor.read_exact(&mut flags).map_err(truncated)?;

                let track = FluxTrack::from_data_and_flags(&raw, &flags);
                debug!(
                    "Cyl {}, Head {}: {} bytes, {} sync marks",
                    cyl, head, length, track.bytes().iter().filter(|b| b.sync).count()
                );
                tracks.push(track);
            }
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
    use crate::flux::ByteFlux;

    fn udi_image(cylinders: u8, sides: u8, ext: &[u8], tracks: &[(&[u8], &[u8])]) -> Vec<u8> {
        let mut data = b"UDI!".to_vec();
        data.extend(0u32.to_le_bytes());
        data.extend([0, cylinders, sides, 0]);
        data.extend((ext.len() as u32).to_le_bytes());
        data.extend(ext);
        for (raw, flags) in tracks {
            data.push(0);
            data.extend((raw.len() as u16).to_le_bytes());
            data.extend(*raw);
            data.extend(*flags);
        }
        let size = data.len() as u32;
        data[4..8].copy_from_slice(&size.to_le_bytes());
        data
    }

    #[test]
    fn test_reads_tracks_with_sync_bitmap() {
        let raw = [0x4E, 0xA1, 0xA1, 0xA1, 0xFE, 0, 0, 1, 1];
        let image = udi_image(1, 1, &[0xAA, 0xBB], &[(&raw[..], &[0x0E, 0x00][..]), (&[0x4E, 0x4E][..], &[0x00][..])]);
        let tracks = UDIHandler::new(image).tracks().unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].len(), 9);
        assert_eq!(tracks[0].bytes()[1], ByteFlux::sync(0xA1));
        assert_eq!(tracks[0].bytes()[4], ByteFlux::new(0xFE));
        assert_eq!(tracks[1].bytes(), &[ByteFlux::new(0x4E); 2]);
    }

    #[test]
    fn test_side_count_is_stored_minus_one() {
        let image = udi_image(2, 0, &[], &[(&[1][..], &[0][..]), (&[2][..], &[0][..])]);
        let tracks = UDIHandler::new(image).tracks().unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].bytes()[0].data, 2);
    }

    #[test]
    fn test_truncated_track() {
        let mut image = udi_image(1, 0, &[], &[(&[1, 2, 3, 4][..], &[0][..])]);
        image.truncate(image.len() - 2);
        let err = UDIHandler::new(image).tracks().unwrap_err();
        assert!(matches!(err.downcast_ref::<ImageError>(), Some(ImageError::Truncated { offset: 0x10, .. })));
    }

    #[test]
    fn test_nonzero_track_type_is_read() {
        let mut image = udi_image(1, 0, &[], &[(&[0x4E, 0xA1][..], &[0x02][..])]);
        image[0x10] = 1;
        let tracks = UDIHandler::new(image).tracks().unwrap();
        assert_eq!(tracks[0].bytes(), &[ByteFlux::new(0x4E), ByteFlux::sync(0xA1)]);
    }

    #[test]
    fn test_bad_signature_is_tolerated() {
        let mut image = udi_image(1, 0, &[], &[(&[7][..], &[1][..])]);
        image[..4].copy_from_slice(b"XXXX");
        let tracks = UDIHandler::new(image).tracks().unwrap();
        assert_eq!(tracks[0].bytes(), &[ByteFlux::sync(7)]);
    }
}

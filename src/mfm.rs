// src/mfm.rs
use crate::disk_formats::{
    DATA_MARK, GAP_BYTE, ID_MARK, INDEX_MARK, POST_DATA_GAP, POST_ID_GAP, POST_INDEX_GAP, PRE_INDEX_GAP,
    SYNC_GAP,
};
use crate::flux::{ByteFlux, FluxTrack};
use anyhow::Result;

/// CRC-16/CCITT: polynomial 0x1021, register preset to 0xFFFF, no final XOR.
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(0xFFFF, data)
}

pub fn crc16_update(mut crc: u16, data: &[u8]) -> u16 {
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Address field contents: cylinder, head, sector number and size code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorId {
    pub cylinder: u8,
    pub head: u8,
    pub sector: u8,
    pub size_code: u8,
}

/// Assembles an MFM track byte by byte in write order.
#[derive(Debug, Default)]
pub struct TrackBuilder {
    flux: Vec<ByteFlux>,
}

impl TrackBuilder {
    pub fn new() -> Self {
        TrackBuilder { flux: Vec::with_capacity(crate::disk_formats::NOMINAL_TRACK_LEN) }
    }

    pub fn len(&self) -> usize {
        self.flux.len()
    }

    pub fn gap(&mut self, value: u8, count: usize) -> &mut Self {
        self.flux.extend(std::iter::repeat(ByteFlux::new(value)).take(count));
        self
    }

    pub fn sync(&mut self, value: u8, count: usize) -> &mut Self {
        self.flux.extend(std::iter::repeat(ByteFlux::sync(value)).take(count));
        self
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.flux.extend(data.iter().map(|&b| ByteFlux::new(b)));
        self
    }

    fn crc(&mut self, crc: u16) -> &mut Self {
        self.bytes(&crc.to_be_bytes())
    }

    /// Pre-index gap, index address mark and post-index gap.
    pub fn index_preamble(&mut self) -> &mut Self {
        self.gap(GAP_BYTE, PRE_INDEX_GAP)
            .gap(0x00, SYNC_GAP)
            .sync(0xC2, 3)
            .bytes(&[INDEX_MARK])
            .gap(GAP_BYTE, POST_INDEX_GAP)
    }

    /// Sync gap, three 0xA1 marks, ID mark, CHSN and the address CRC.
    pub fn id_field(&mut self, id: SectorId) -> &mut Self {
        let header = [0xA1, 0xA1, 0xA1, ID_MARK, id.cylinder, id.head, id.sector, id.size_code];
        self.gap(0x00, SYNC_GAP)
            .sync(0xA1, 3)
            .bytes(&header[3..])
            .crc(crc16(&header))
    }

    /// Gap after the address field up to and including the data mark.
    pub fn data_mark(&mut self) -> &mut Self {
        self.gap(GAP_BYTE, POST_ID_GAP)
            .gap(0x00, SYNC_GAP)
            .sync(0xA1, 3)
            .bytes(&[DATA_MARK])
    }

    /// Sector payload, its CRC (inverted when `crc_valid` is false) and the trailing gap.
    pub fn data_body(&mut self, payload: &[u8], crc_valid: bool) -> &mut Self {
        let crc = crc16_update(crc16(&[0xA1, 0xA1, 0xA1, DATA_MARK]), payload);
        self.bytes(payload)
            .crc(if crc_valid { crc } else { !crc })
            .gap(GAP_BYTE, POST_DATA_GAP)
    }

    pub fn pad_to(&mut self, length: usize) -> &mut Self {
        let missing = length.saturating_sub(self.flux.len());
        self.gap(GAP_BYTE, missing)
    }

    pub fn finish(&mut self) -> FluxTrack {
        FluxTrack::new(std::mem::take(&mut self.flux))
    }
}

/// Per-track listing shared by the `info` output of the source formats.
pub fn display(name: &str, file_size: usize, tracks: &[FluxTrack], heads: usize) -> Result<String> {
    let mut output = Vec::new();
    output.push(format!("{}: {} bytes", name, file_size));
    output.push(format!("Tracks: {} ({} heads)", tracks.len(), heads));
    for (i, track) in tracks.iter().enumerate() {
        let syncs = track.bytes().iter().filter(|b| b.sync).count();
        output.push(format!(
            "Cyl {}, Head {}: {} bytes, {} sync marks",
            i / heads.max(1), i % heads.max(1), track.len(), syncs
        ));
    }
    Ok(output.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_of(track: &FluxTrack) -> Vec<u8> {
        track.bytes().iter().map(|b| b.data).collect()
    }

    #[test]
    fn test_crc16_vectors() {
        assert_eq!(crc16(&[]), 0xFFFF);
        assert_eq!(crc16(b"123456789"), 0x29B1);
        assert_eq!(crc16(&[0xA1, 0xA1, 0xA1]), 0xCDB4);
        assert_eq!(crc16(&[0xA1, 0xA1, 0xA1, 0xFE, 0, 0, 1, 1]), 0xFA0C);
    }

    #[test]
    fn test_crc16_update_chains() {
        let mut payload = vec![0xA1, 0xA1, 0xA1, 0xFB];
        payload.extend([0u8; 256]);
        assert_eq!(crc16(&payload), 0xE122);
        assert_eq!(crc16_update(crc16(&payload[..4]), &payload[4..]), 0xE122);
    }

    #[test]
    fn test_index_preamble() {
        let track = TrackBuilder::new().index_preamble().finish();
        assert_eq!(track.len(), 80 + 12 + 3 + 1 + 50);
        let bytes = track.bytes();
        assert!(bytes[..80].iter().all(|b| *b == ByteFlux::new(0x4E)));
        assert!(bytes[80..92].iter().all(|b| *b == ByteFlux::new(0x00)));
        assert!(bytes[92..95].iter().all(|b| *b == ByteFlux::sync(0xC2)));
        assert_eq!(bytes[95], ByteFlux::new(0xFC));
        assert!(bytes[96..].iter().all(|b| *b == ByteFlux::new(0x4E)));
    }

    #[test]
    fn test_id_field() {
        let id = SectorId { cylinder: 0, head: 0, sector: 1, size_code: 1 };
        let track = TrackBuilder::new().id_field(id).finish();
        let data = data_of(&track);
        assert_eq!(data.len(), 12 + 3 + 7);
        assert_eq!(&data[12..], &[0xA1, 0xA1, 0xA1, 0xFE, 0, 0, 1, 1, 0xFA, 0x0C]);
        assert!(track.bytes()[12..15].iter().all(|b| b.sync));
        assert!(!track.bytes()[15].sync);
    }

    #[test]
    fn test_data_body_crc_inversion() {
        let payload = [0u8; 256];
        let good = data_of(&TrackBuilder::new().data_body(&payload, true).finish());
        let bad = data_of(&TrackBuilder::new().data_body(&payload, false).finish());
        assert_eq!(good.len(), 256 + 2 + 54);
        assert_eq!(&good[256..258], &[0xE1, 0x22]);
        assert_eq!(&bad[256..258], &[0x1E, 0xDD]);
    }

    #[test]
    fn test_pad_to() {
        let mut builder = TrackBuilder::new();
        builder.bytes(&[1, 2, 3]).pad_to(10);
        assert_eq!(builder.len(), 10);
        builder.pad_to(4);
        assert_eq!(builder.len(), 10);
    }
}

// src/flux.rs
//! In-memory flux track model and the MFM bit serializer.

/// One byte of track data plus whether it is written as a sync mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteFlux {
    pub data: u8,
    pub sync: bool,
}

impl ByteFlux {
    pub const fn new(data: u8) -> Self {
        ByteFlux { data, sync: false }
    }

    pub const fn sync(data: u8) -> Self {
        ByteFlux { data, sync: true }
    }
}

/// Order in which emitted bits fill an output byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BitOrder {
    /// First emitted bit lands in bit 7
    #[default]
    Msb,
    /// First emitted bit lands in bit 0
    Lsb,
}

/// Anything that accepts a serial stream of bits.
pub trait BitSink {
    fn push_bit(&mut self, bit: bool);
}

/// Packs bits into bytes. A trailing partial byte is never emitted.
#[derive(Debug, Default)]
pub struct BitAccumulator {
    order: BitOrder,
    acc: u8,
    count: u8,
    bytes: Vec<u8>,
}

impl BitAccumulator {
    pub fn new(order: BitOrder) -> Self {
        BitAccumulator { order, ..Default::default() }
    }

    /// Hands over the bytes completed so far; a partial byte stays pending.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

impl BitSink for BitAccumulator {
    fn push_bit(&mut self, bit: bool) {
        if bit {
            self.acc |= match self.order {
                BitOrder::Msb => 0x80 >> self.count,
                BitOrder::Lsb => 1 << self.count,
            };
        }
        self.count += 1;
        if self.count == 8 {
            self.bytes.push(self.acc);
            self.acc = 0;
            self.count = 0;
        }
    }
}

/// One head's worth of track data in physical write order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FluxTrack {
    bytes: Vec<ByteFlux>,
}

impl FluxTrack {
    pub fn new(bytes: Vec<ByteFlux>) -> Self {
        FluxTrack { bytes }
    }

    /// Builds a track from raw bytes and a sync bitmap where bit `i % 8` of
    /// `flags[i / 8]` marks byte `i`. Missing bitmap bytes mean no sync.
    pub fn from_data_and_flags(data: &[u8], flags: &[u8]) -> Self {
        let bytes = data
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                let sync = flags.get(i / 8).is_some_and(|f| f & (1 << (i % 8)) != 0);
                ByteFlux { data: b, sync }
            })
            .collect();
        FluxTrack { bytes }
    }

    pub fn bytes(&self) -> &[ByteFlux] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Emits a clock bit then a data bit for every data bit, MSB of each byte first.
    ///
    /// The clock is `!(previous data | current data)`. Sync bytes drop the clock
    /// at data bit 2, and 0xC2 sync bytes also at bit 3, so a reader can tell
    /// 0xA1 and 0xC2 marks apart from ordinary data.
    pub fn encode<S: BitSink>(&self, sink: &mut S) {
        let mut prev = false;
        for flux in &self.bytes {
            for i in (0..8).rev() {
                let data = flux.data & (1 << i) != 0;
                let mut clock = !(prev || data);
                if flux.sync && (i == 2 || (i == 3 && flux.data == 0xC2)) {
                    clock = false;
                }
                sink.push_bit(clock);
                sink.push_bit(data);
                prev = data;
            }
        }
    }

    pub fn to_bitstream(&self, order: BitOrder) -> Vec<u8> {
        let mut acc = BitAccumulator::new(order);
        self.encode(&mut acc);
        acc.take_bytes()
    }
}

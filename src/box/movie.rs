use std::io::Write;

use derivative::Derivative;
use fixed::types::{U16F16, U8F8};
use fixed_macro::types::{U16F16, U8F8};

use crate::{
    marshal::{decode_remaining, Decode, Encode, FullBoxHeader, Matrix},
    Result,
};

/// Version needed to hold the given time fields, never lower than `version`.
pub(crate) fn time_version(version: u8, times: &[u64]) -> u8 {
    if version >= 1 || times.iter().any(|&time| time > u32::MAX as u64) {
        1
    } else {
        0
    }
}

pub(crate) fn encode_time(version: u8, time: u64, output: &mut impl Write) -> Result<()> {
    match version {
        0 => (time as u32).encode(output),
        _ => time.encode(output),
    }
}

pub(crate) fn decode_time(version: u8, input: &mut &[u8]) -> Result<u64> {
    Ok(match version {
        0 => u32::decode(input)? as u64,
        _ => Decode::decode(input)?,
    })
}

// 8.2.2
#[derive(Debug, Clone, PartialEq)]
pub struct MovieHeaderBox {
    pub header: FullBoxHeader,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub rate: U16F16,
    pub volume: U8F8,
    pub matrix: Matrix,
    pub next_track_id: u32,
}

impl MovieHeaderBox {
    pub fn version(&self) -> u8 {
        time_version(
            self.header.version,
            &[self.creation_time, self.modification_time, self.duration],
        )
    }
}

impl Default for MovieHeaderBox {
    fn default() -> Self {
        Self {
            header: Default::default(),
            creation_time: 0,
            modification_time: 0,
            timescale: 1000,
            duration: 0,
            rate: U16F16!(1),
            volume: U8F8!(1),
            matrix: Matrix::identity(),
            next_track_id: 1,
        }
    }
}

impl Encode for MovieHeaderBox {
    fn size(&self) -> u64 {
        let times = match self.version() {
            0 => 4 + 4 + 4 + 4,
            _ => 8 + 8 + 4 + 8,
        };
        4 + times + 4 + 2 + 2 + 4 * 2 + self.matrix.size() + 6 * 4 + 4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        let version = self.version();
        FullBoxHeader::new(version, self.header.flags).encode(output)?;

        encode_time(version, self.creation_time, output)?;
        encode_time(version, self.modification_time, output)?;
        self.timescale.encode(output)?;
        encode_time(version, self.duration, output)?;
        self.rate.encode(output)?;
        self.volume.encode(output)?;
        0u16.encode(output)?; // reserved
        0u32.encode(output)?; // reserved
        0u32.encode(output)?; // reserved
        self.matrix.encode(output)?;
        for _ in 0..6 {
            0u32.encode(output)?; // pre_defined
        }
        self.next_track_id.encode(output)
    }
}

impl Decode for MovieHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;

        let creation_time = decode_time(header.version, input)?;
        let modification_time = decode_time(header.version, input)?;
        let timescale = Decode::decode(input)?;
        let duration = decode_time(header.version, input)?;
        let rate = Decode::decode(input)?;
        let volume = Decode::decode(input)?;
        u16::decode(input)?; // reserved
        u32::decode(input)?; // reserved
        u32::decode(input)?; // reserved
        let matrix = Decode::decode(input)?;
        for _ in 0..6 {
            u32::decode(input)?; // pre_defined
        }
        let next_track_id = Decode::decode(input)?;

        Ok(Self {
            header,
            creation_time,
            modification_time,
            timescale,
            duration,
            rate,
            volume,
            matrix,
            next_track_id,
        })
    }
}

// ISO/IEC 14496-14:2003 5.1
#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct ObjectDescriptorBox {
    pub header: FullBoxHeader,
    #[derivative(Debug = "ignore")]
    pub descriptor: Vec<u8>,
}

impl Encode for ObjectDescriptorBox {
    fn size(&self) -> u64 {
        4 + self.descriptor.len() as u64
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        output.write_all(&self.descriptor)?;
        Ok(())
    }
}

impl Decode for ObjectDescriptorBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;
        let descriptor = decode_remaining(input);

        Ok(Self { header, descriptor })
    }
}

// 8.8.2
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MovieExtendsHeaderBox {
    pub header: FullBoxHeader,
    pub fragment_duration: u64,
}

impl Encode for MovieExtendsHeaderBox {
    fn size(&self) -> u64 {
        4 + match time_version(self.header.version, &[self.fragment_duration]) {
            0 => 4,
            _ => 8,
        }
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        let version = time_version(self.header.version, &[self.fragment_duration]);
        FullBoxHeader::new(version, self.header.flags).encode(output)?;
        encode_time(version, self.fragment_duration, output)
    }
}

impl Decode for MovieExtendsHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;
        let fragment_duration = decode_time(header.version, input)?;

        Ok(Self {
            header,
            fragment_duration,
        })
    }
}

// 8.8.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackExtendsBox {
    pub header: FullBoxHeader,
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl Default for TrackExtendsBox {
    fn default() -> Self {
        Self {
            header: Default::default(),
            track_id: 1,
            default_sample_description_index: 1,
            default_sample_duration: 0,
            default_sample_size: 0,
            default_sample_flags: 0,
        }
    }
}

impl Encode for TrackExtendsBox {
    fn size(&self) -> u64 {
        4 + 4 * 5
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        self.track_id.encode(output)?;
        self.default_sample_description_index.encode(output)?;
        self.default_sample_duration.encode(output)?;
        self.default_sample_size.encode(output)?;
        self.default_sample_flags.encode(output)
    }
}

impl Decode for TrackExtendsBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
            track_id: Decode::decode(input)?,
            default_sample_description_index: Decode::decode(input)?,
            default_sample_duration: Decode::decode(input)?,
            default_sample_size: Decode::decode(input)?,
            default_sample_flags: Decode::decode(input)?,
        })
    }
}

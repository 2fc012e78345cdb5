use std::io::{Read, Write};

use crate::{
    marshal::{decode_remaining, Decode, Encode, FourCC, FullBoxHeader, Language},
    r#box::{
        movie::{decode_time, encode_time, time_version},
        read_prefix, ReadFields,
    },
    Result,
};

// 8.4.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHeaderBox {
    pub header: FullBoxHeader,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub language: Language,
}

impl MediaHeaderBox {
    pub fn version(&self) -> u8 {
        time_version(
            self.header.version,
            &[self.creation_time, self.modification_time, self.duration],
        )
    }
}

impl Default for MediaHeaderBox {
    fn default() -> Self {
        Self {
            header: Default::default(),
            creation_time: 0,
            modification_time: 0,
            timescale: 1000,
            duration: 0,
            language: Language(0x55C4), // und
        }
    }
}

impl Encode for MediaHeaderBox {
    fn size(&self) -> u64 {
        let times = match self.version() {
            0 => 4 + 4 + 4 + 4,
            _ => 8 + 8 + 4 + 8,
        };
        4 + times + 2 + 2
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        let version = self.version();
        FullBoxHeader::new(version, self.header.flags).encode(output)?;

        encode_time(version, self.creation_time, output)?;
        encode_time(version, self.modification_time, output)?;
        self.timescale.encode(output)?;
        encode_time(version, self.duration, output)?;
        self.language.encode(output)?;
        0u16.encode(output) // pre_defined
    }
}

impl Decode for MediaHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;

        let creation_time = decode_time(header.version, input)?;
        let modification_time = decode_time(header.version, input)?;
        let timescale = Decode::decode(input)?;
        let duration = decode_time(header.version, input)?;
        let language = Decode::decode(input)?;
        u16::decode(input)?; // pre_defined

        Ok(Self {
            header,
            creation_time,
            modification_time,
            timescale,
            duration,
            language,
        })
    }
}

// 8.4.3
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HandlerBox {
    pub header: FullBoxHeader,
    pub pre_defined: u32,
    pub handler_type: FourCC,
    pub reserved: [u32; 3],
    /// Null-terminated UTF-8, kept as stored.
    pub name: Vec<u8>,
}

impl HandlerBox {
    pub fn new(handler_type: FourCC, name: &str) -> Self {
        let mut name = name.as_bytes().to_vec();
        name.push(0);
        Self {
            handler_type,
            name,
            ..Default::default()
        }
    }

    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

impl Encode for HandlerBox {
    fn size(&self) -> u64 {
        4 + 4 + 4 + 3 * 4 + self.name.len() as u64
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        self.pre_defined.encode(output)?;
        self.handler_type.encode(output)?;
        for reserved in self.reserved {
            reserved.encode(output)?;
        }
        output.write_all(&self.name)?;
        Ok(())
    }
}

impl Decode for HandlerBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
            pre_defined: Decode::decode(input)?,
            handler_type: Decode::decode(input)?,
            reserved: [
                Decode::decode(input)?,
                Decode::decode(input)?,
                Decode::decode(input)?,
            ],
            name: decode_remaining(input),
        })
    }
}

// 12.1.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMediaHeaderBox {
    pub header: FullBoxHeader,
    pub graphicsmode: u16,
    pub opcolor: [u16; 3],
}

impl Default for VideoMediaHeaderBox {
    fn default() -> Self {
        Self {
            header: FullBoxHeader::new(0, 1),
            graphicsmode: 0,
            opcolor: [0; 3],
        }
    }
}

impl Encode for VideoMediaHeaderBox {
    fn size(&self) -> u64 {
        4 + 2 + 3 * 2
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        self.graphicsmode.encode(output)?;
        for opcolor in self.opcolor {
            opcolor.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for VideoMediaHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
            graphicsmode: Decode::decode(input)?,
            opcolor: [
                Decode::decode(input)?,
                Decode::decode(input)?,
                Decode::decode(input)?,
            ],
        })
    }
}

// 12.2.2
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SoundMediaHeaderBox {
    pub header: FullBoxHeader,
    pub balance: i16,
}

impl Encode for SoundMediaHeaderBox {
    fn size(&self) -> u64 {
        4 + 2 + 2
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        self.balance.encode(output)?;
        0u16.encode(output) // reserved
    }
}

impl Decode for SoundMediaHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;
        let balance = Decode::decode(input)?;
        u16::decode(input)?; // reserved

        Ok(Self { header, balance })
    }
}

// 12.4.2
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HintMediaHeaderBox {
    pub header: FullBoxHeader,
    pub max_pdu_size: u16,
    pub avg_pdu_size: u16,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
}

impl Encode for HintMediaHeaderBox {
    fn size(&self) -> u64 {
        4 + 2 + 2 + 4 + 4 + 4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        self.max_pdu_size.encode(output)?;
        self.avg_pdu_size.encode(output)?;
        self.max_bitrate.encode(output)?;
        self.avg_bitrate.encode(output)?;
        0u32.encode(output) // reserved
    }
}

impl Decode for HintMediaHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;
        let max_pdu_size = Decode::decode(input)?;
        let avg_pdu_size = Decode::decode(input)?;
        let max_bitrate = Decode::decode(input)?;
        let avg_bitrate = Decode::decode(input)?;
        u32::decode(input)?; // reserved

        Ok(Self {
            header,
            max_pdu_size,
            avg_pdu_size,
            max_bitrate,
            avg_bitrate,
        })
    }
}

// 8.4.5.2
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NullMediaHeaderBox {
    pub header: FullBoxHeader,
}

impl Encode for NullMediaHeaderBox {
    fn size(&self) -> u64 {
        4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)
    }
}

impl Decode for NullMediaHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
        })
    }
}

// 8.7.2
/// Data reference table; the entries follow as child boxes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DataReferenceBox {
    pub header: FullBoxHeader,
    pub entry_count: u32,
}

impl ReadFields for DataReferenceBox {
    fn read(
        &mut self,
        box_type: FourCC,
        input: &mut dyn Read,
        len: u64,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        *self = read_prefix(box_type, input, len, 8, buf)?;
        Ok(())
    }
}

impl Encode for DataReferenceBox {
    fn size(&self) -> u64 {
        4 + 4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        self.entry_count.encode(output)
    }
}

impl Decode for DataReferenceBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
            entry_count: Decode::decode(input)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntryUrlBox {
    pub header: FullBoxHeader,
    /// Empty when the media data is in the same file.
    pub location: Vec<u8>,
}

impl DataEntryUrlBox {
    pub const SELF_CONTAINED: u32 = 0x000001;
}

impl Default for DataEntryUrlBox {
    fn default() -> Self {
        Self {
            header: FullBoxHeader::new(0, Self::SELF_CONTAINED),
            location: vec![],
        }
    }
}

impl Encode for DataEntryUrlBox {
    fn size(&self) -> u64 {
        4 + self.location.len() as u64
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        output.write_all(&self.location)?;
        Ok(())
    }
}

impl Decode for DataEntryUrlBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
            location: decode_remaining(input),
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DataEntryUrnBox {
    pub header: FullBoxHeader,
    /// Null-terminated name followed by the null-terminated location.
    pub name_and_location: Vec<u8>,
}

impl Encode for DataEntryUrnBox {
    fn size(&self) -> u64 {
        4 + self.name_and_location.len() as u64
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        output.write_all(&self.name_and_location)?;
        Ok(())
    }
}

impl Decode for DataEntryUrnBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
            name_and_location: decode_remaining(input),
        })
    }
}

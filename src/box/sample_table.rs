use std::io::{Read, Write};

use derivative::Derivative;
use fixed::types::U16F16;
use fixed_macro::types::U16F16;

use crate::{
    io,
    marshal::{decode_remaining, Decode, Encode, FourCC, FullBoxHeader},
    r#box::{read_prefix, ReadFields},
    Error, Result,
};

/// Fails unless exactly `entry_count` entries of `entry_size` bytes remain.
pub(crate) fn check_entries(
    box_type: FourCC,
    entry_count: u32,
    entry_size: u64,
    input: &[u8],
) -> Result<()> {
    if entry_count as u64 * entry_size != input.len() as u64 {
        return Err(Error::malformed(
            box_type,
            format!("{entry_count} entries in {} bytes", input.len()),
        ));
    }
    Ok(())
}

// 8.5.2
/// Sample description table; the sample entries follow as child boxes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SampleDescriptionBox {
    pub header: FullBoxHeader,
    pub entry_count: u32,
}

impl ReadFields for SampleDescriptionBox {
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

impl Encode for SampleDescriptionBox {
    fn size(&self) -> u64 {
        4 + 4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        self.entry_count.encode(output)
    }
}

impl Decode for SampleDescriptionBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
            entry_count: Decode::decode(input)?,
        })
    }
}

// 12.1.3
#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct VisualSampleEntry {
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    pub horizresolution: U16F16,
    pub vertresolution: U16F16,
    pub frame_count: u16,
    #[derivative(Debug = "ignore")]
    pub compressorname: [u8; 32],
    pub depth: u16,
}

impl Default for VisualSampleEntry {
    fn default() -> Self {
        Self {
            data_reference_index: 1,
            width: 0,
            height: 0,
            horizresolution: U16F16!(72),
            vertresolution: U16F16!(72),
            frame_count: 1,
            compressorname: [0; 32],
            depth: 0x0018,
        }
    }
}

impl ReadFields for VisualSampleEntry {
    fn read(
        &mut self,
        box_type: FourCC,
        input: &mut dyn Read,
        len: u64,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        *self = read_prefix(box_type, input, len, 78, buf)?;
        Ok(())
    }
}

impl Encode for VisualSampleEntry {
    fn size(&self) -> u64 {
        6 + 2 + 2 + 2 + 3 * 4 + 2 + 2 + 4 + 4 + 4 + 2 + 32 + 2 + 2
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        [0u8; 6].encode(output)?; // reserved
        self.data_reference_index.encode(output)?;

        0u16.encode(output)?; // pre_defined
        0u16.encode(output)?; // reserved
        0u32.encode(output)?; // pre_defined
        0u32.encode(output)?; // pre_defined
        0u32.encode(output)?; // pre_defined
        self.width.encode(output)?;
        self.height.encode(output)?;
        self.horizresolution.encode(output)?;
        self.vertresolution.encode(output)?;
        0u32.encode(output)?; // reserved
        self.frame_count.encode(output)?;
        self.compressorname.encode(output)?;
        self.depth.encode(output)?;
        (-1i16).encode(output) // pre_defined
    }
}

impl Decode for VisualSampleEntry {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        <[u8; 6]>::decode(input)?; // reserved
        let data_reference_index = Decode::decode(input)?;

        u16::decode(input)?; // pre_defined
        u16::decode(input)?; // reserved
        u32::decode(input)?; // pre_defined
        u32::decode(input)?; // pre_defined
        u32::decode(input)?; // pre_defined
        let width = Decode::decode(input)?;
        let height = Decode::decode(input)?;
        let horizresolution = Decode::decode(input)?;
        let vertresolution = Decode::decode(input)?;
        u32::decode(input)?; // reserved
        let frame_count = Decode::decode(input)?;
        let compressorname = Decode::decode(input)?;
        let depth = Decode::decode(input)?;
        i16::decode(input)?; // pre_defined

        Ok(Self {
            data_reference_index,
            width,
            height,
            horizresolution,
            vertresolution,
            frame_count,
            compressorname,
            depth,
        })
    }
}

// 12.2.3
/// Audio sample entry, including the QuickTime sound description versions 1 and 2 whose extra
/// fields are kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSampleEntry {
    pub data_reference_index: u16,
    pub version: u16,
    pub revision_level: u16,
    pub vendor: u32,
    pub channelcount: u16,
    pub samplesize: u16,
    pub compression_id: u16,
    pub packet_size: u16,
    pub samplerate: U16F16,
    pub extension: Vec<u8>,
}

impl AudioSampleEntry {
    fn extension_len(version: u16) -> u64 {
        match version {
            1 => 16,
            2 => 36,
            _ => 0,
        }
    }
}

impl Default for AudioSampleEntry {
    fn default() -> Self {
        Self {
            data_reference_index: 1,
            version: 0,
            revision_level: 0,
            vendor: 0,
            channelcount: 2,
            samplesize: 16,
            compression_id: 0,
            packet_size: 0,
            samplerate: U16F16!(0),
            extension: vec![],
        }
    }
}

impl ReadFields for AudioSampleEntry {
    fn read(
        &mut self,
        box_type: FourCC,
        input: &mut dyn Read,
        len: u64,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        let mut entry: Self = read_prefix(box_type, input, len, 28, buf)?;
        let extension_len = Self::extension_len(entry.version);
        if len < 28 + extension_len {
            return Err(Error::malformed(
                box_type,
                format!("sound description version {} in {len} bytes", entry.version),
            ));
        }
        io::read(input, extension_len, buf)?;
        entry.extension = buf.clone();
        *self = entry;
        Ok(())
    }
}

impl Encode for AudioSampleEntry {
    fn size(&self) -> u64 {
        6 + 2 + 2 + 2 + 4 + 2 + 2 + 2 + 2 + 4 + self.extension.len() as u64
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        [0u8; 6].encode(output)?; // reserved
        self.data_reference_index.encode(output)?;

        self.version.encode(output)?;
        self.revision_level.encode(output)?;
        self.vendor.encode(output)?;
        self.channelcount.encode(output)?;
        self.samplesize.encode(output)?;
        self.compression_id.encode(output)?;
        self.packet_size.encode(output)?;
        self.samplerate.encode(output)?;
        output.write_all(&self.extension)?;
        Ok(())
    }
}

impl Decode for AudioSampleEntry {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        <[u8; 6]>::decode(input)?; // reserved
        Ok(Self {
            data_reference_index: Decode::decode(input)?,
            version: Decode::decode(input)?,
            revision_level: Decode::decode(input)?,
            vendor: Decode::decode(input)?,
            channelcount: Decode::decode(input)?,
            samplesize: Decode::decode(input)?,
            compression_id: Decode::decode(input)?,
            packet_size: Decode::decode(input)?,
            samplerate: Decode::decode(input)?,
            extension: vec![],
        })
    }
}

// ISO/IEC 14496-14:2003 5.6
#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct EsdBox {
    pub header: FullBoxHeader,
    #[derivative(Debug = "ignore")]
    pub descriptor: Vec<u8>,
}

impl Encode for EsdBox {
    fn size(&self) -> u64 {
        4 + self.descriptor.len() as u64
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        output.write_all(&self.descriptor)?;
        Ok(())
    }
}

impl Decode for EsdBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
            descriptor: decode_remaining(input),
        })
    }
}

// 8.6.1.2
#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct TimeToSampleBox {
    pub header: FullBoxHeader,
    #[derivative(Debug = "ignore")]
    pub entries: Vec<TimeToSampleEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeToSampleEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

impl TimeToSampleBox {
    /// Sum of all sample durations.
    pub fn duration(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| entry.sample_count as u64 * entry.sample_delta as u64)
            .sum()
    }
}

impl Encode for TimeToSampleBox {
    fn size(&self) -> u64 {
        4 + 4 + self.entries.len() as u64 * (4 + 4)
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        (self.entries.len() as u32).encode(output)?;
        for entry in &self.entries {
            entry.sample_count.encode(output)?;
            entry.sample_delta.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for TimeToSampleBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;

        let entry_count = u32::decode(input)?;
        check_entries(FourCC::stts, entry_count, 8, input)?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            entries.push(TimeToSampleEntry {
                sample_count: Decode::decode(input)?,
                sample_delta: Decode::decode(input)?,
            });
        }

        Ok(Self { header, entries })
    }
}

// 8.6.1.3
#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct CompositionOffsetBox {
    pub header: FullBoxHeader,
    #[derivative(Debug = "ignore")]
    pub entries: Vec<CompositionOffsetEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionOffsetEntry {
    pub sample_count: u32,
    pub sample_offset: i64,
}

impl CompositionOffsetBox {
    fn version(&self) -> u8 {
        if self.header.version >= 1 || self.entries.iter().any(|entry| entry.sample_offset < 0) {
            1
        } else {
            0
        }
    }
}

impl Encode for CompositionOffsetBox {
    fn size(&self) -> u64 {
        4 + 4 + self.entries.len() as u64 * (4 + 4)
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        let version = self.version();
        FullBoxHeader::new(version, self.header.flags).encode(output)?;

        (self.entries.len() as u32).encode(output)?;
        for entry in &self.entries {
            entry.sample_count.encode(output)?;
            match version {
                0 => (entry.sample_offset as u32).encode(output)?,
                _ => (entry.sample_offset as i32).encode(output)?,
            }
        }
        Ok(())
    }
}

impl Decode for CompositionOffsetBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;

        let entry_count = u32::decode(input)?;
        check_entries(FourCC::ctts, entry_count, 8, input)?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let sample_count = Decode::decode(input)?;
            let sample_offset = match header.version {
                0 => u32::decode(input)? as i64,
                _ => i32::decode(input)? as i64,
            };
            entries.push(CompositionOffsetEntry {
                sample_count,
                sample_offset,
            });
        }

        Ok(Self { header, entries })
    }
}

// 8.6.2
#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct SyncSampleBox {
    pub header: FullBoxHeader,
    /// 1-based sample numbers, strictly increasing.
    #[derivative(Debug = "ignore")]
    pub sample_numbers: Vec<u32>,
}

impl Encode for SyncSampleBox {
    fn size(&self) -> u64 {
        4 + 4 + self.sample_numbers.len() as u64 * 4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        (self.sample_numbers.len() as u32).encode(output)?;
        for sample_number in &self.sample_numbers {
            sample_number.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for SyncSampleBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;

        let entry_count = u32::decode(input)?;
        check_entries(FourCC::stss, entry_count, 4, input)?;
        let mut sample_numbers = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            sample_numbers.push(Decode::decode(input)?);
        }

        Ok(Self {
            header,
            sample_numbers,
        })
    }
}

// 8.6.3
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShadowSyncSampleBox {
    pub header: FullBoxHeader,
    pub entries: Vec<ShadowSyncSampleEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowSyncSampleEntry {
    pub shadowed_sample_number: u32,
    pub sync_sample_number: u32,
}

impl Encode for ShadowSyncSampleBox {
    fn size(&self) -> u64 {
        4 + 4 + self.entries.len() as u64 * (4 + 4)
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        (self.entries.len() as u32).encode(output)?;
        for entry in &self.entries {
            entry.shadowed_sample_number.encode(output)?;
            entry.sync_sample_number.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for ShadowSyncSampleBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;

        let entry_count = u32::decode(input)?;
        check_entries(FourCC::stsh, entry_count, 8, input)?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            entries.push(ShadowSyncSampleEntry {
                shadowed_sample_number: Decode::decode(input)?,
                sync_sample_number: Decode::decode(input)?,
            });
        }

        Ok(Self { header, entries })
    }
}

// 8.7.4
#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct SampleToChunkBox {
    pub header: FullBoxHeader,
    #[derivative(Debug = "ignore")]
    pub entries: Vec<SampleToChunkEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleToChunkEntry {
    /// 1-based index of the first chunk of this run.
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

impl SampleToChunkBox {
    /// Samples per chunk for each of `chunk_count` chunks, the last run extending to the end.
    pub fn samples_per_chunk(&self, chunk_count: u32) -> Result<Vec<u32>> {
        let mut samples_per_chunk = Vec::with_capacity(chunk_count as usize);
        for (i, entry) in self.entries.iter().enumerate() {
            let end = self
                .entries
                .get(i + 1)
                .map_or(chunk_count + 1, |next| next.first_chunk);
            if entry.first_chunk == 0
                || entry.first_chunk as usize != samples_per_chunk.len() + 1
                || end < entry.first_chunk
                || end > chunk_count + 1
            {
                return Err(Error::malformed(
                    FourCC::stsc,
                    format!("run at chunk {} does not fit {chunk_count} chunks", entry.first_chunk),
                ));
            }
            let run_len = (end - entry.first_chunk) as usize;
            samples_per_chunk.extend(std::iter::repeat(entry.samples_per_chunk).take(run_len));
        }
        if samples_per_chunk.len() != chunk_count as usize {
            return Err(Error::malformed(
                FourCC::stsc,
                format!("runs cover {} of {chunk_count} chunks", samples_per_chunk.len()),
            ));
        }
        Ok(samples_per_chunk)
    }
}

impl Encode for SampleToChunkBox {
    fn size(&self) -> u64 {
        4 + 4 + self.entries.len() as u64 * (4 + 4 + 4)
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        (self.entries.len() as u32).encode(output)?;
        for entry in &self.entries {
            entry.first_chunk.encode(output)?;
            entry.samples_per_chunk.encode(output)?;
            entry.sample_description_index.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for SampleToChunkBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;

        let entry_count = u32::decode(input)?;
        check_entries(FourCC::stsc, entry_count, 12, input)?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            entries.push(SampleToChunkEntry {
                first_chunk: Decode::decode(input)?,
                samples_per_chunk: Decode::decode(input)?,
                sample_description_index: Decode::decode(input)?,
            });
        }

        Ok(Self { header, entries })
    }
}

// 8.7.3.2
/// Sample sizes, either one constant `sample_size` for `sample_count` samples, or one entry per
/// sample when `sample_size` is zero.
#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct SampleSizeBox {
    pub header: FullBoxHeader,
    pub sample_size: u32,
    pub sample_count: u32,
    #[derivative(Debug = "ignore")]
    pub entry_sizes: Vec<u32>,
}

impl SampleSizeBox {
    pub fn sample_count(&self) -> u32 {
        if self.sample_size == 0 {
            self.entry_sizes.len() as u32
        } else {
            self.sample_count
        }
    }

    /// Size of the 0-based `sample`.
    pub fn get(&self, sample: u32) -> Option<u32> {
        if self.sample_size == 0 {
            self.entry_sizes.get(sample as usize).copied()
        } else {
            (sample < self.sample_count).then_some(self.sample_size)
        }
    }
}

impl Encode for SampleSizeBox {
    fn size(&self) -> u64 {
        4 + 4 + 4
            + if self.sample_size == 0 {
                self.entry_sizes.len() as u64 * 4
            } else {
                0
            }
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        self.sample_size.encode(output)?;
        self.sample_count().encode(output)?;
        if self.sample_size == 0 {
            for entry_size in &self.entry_sizes {
                entry_size.encode(output)?;
            }
        }
        Ok(())
    }
}

impl Decode for SampleSizeBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;
        let sample_size = Decode::decode(input)?;
        let sample_count = Decode::decode(input)?;

        let mut entry_sizes = vec![];
        if sample_size == 0 {
            check_entries(FourCC::stsz, sample_count, 4, input)?;
            entry_sizes.reserve(sample_count as usize);
            for _ in 0..sample_count {
                entry_sizes.push(Decode::decode(input)?);
            }
        }

        Ok(Self {
            header,
            sample_size,
            sample_count,
            entry_sizes,
        })
    }
}

// 8.7.3.3
#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct CompactSampleSizeBox {
    pub header: FullBoxHeader,
    /// 8 or 16, 4-bit fields are not supported.
    pub field_size: u8,
    #[derivative(Debug = "ignore")]
    pub entry_sizes: Vec<u16>,
}

impl Default for CompactSampleSizeBox {
    fn default() -> Self {
        Self {
            header: Default::default(),
            field_size: 16,
            entry_sizes: vec![],
        }
    }
}

impl Encode for CompactSampleSizeBox {
    fn size(&self) -> u64 {
        4 + 4 + 4 + self.entry_sizes.len() as u64 * (self.field_size as u64 / 8)
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        [0u8; 3].encode(output)?; // reserved
        self.field_size.encode(output)?;
        (self.entry_sizes.len() as u32).encode(output)?;
        for &entry_size in &self.entry_sizes {
            match self.field_size {
                8 => (entry_size as u8).encode(output)?,
                16 => entry_size.encode(output)?,
                _ => return Err(Error::unsupported(FourCC::stz2, "field size")),
            }
        }
        Ok(())
    }
}

impl Decode for CompactSampleSizeBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;
        <[u8; 3]>::decode(input)?; // reserved
        let field_size = u8::decode(input)?;
        let sample_count = u32::decode(input)?;

        let entry_size = match field_size {
            8 => 1,
            16 => 2,
            4 => return Err(Error::unsupported(FourCC::stz2, "4-bit field size")),
            _ => {
                return Err(Error::malformed(
                    FourCC::stz2,
                    format!("field size {field_size}"),
                ))
            }
        };
        check_entries(FourCC::stz2, sample_count, entry_size, input)?;
        let mut entry_sizes = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            entry_sizes.push(match field_size {
                8 => u8::decode(input)? as u16,
                _ => u16::decode(input)?,
            });
        }

        Ok(Self {
            header,
            field_size,
            entry_sizes,
        })
    }
}

// 8.7.5
#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct ChunkOffsetBox {
    pub header: FullBoxHeader,
    #[derivative(Debug = "ignore")]
    pub chunk_offsets: Vec<u32>,
}

impl Encode for ChunkOffsetBox {
    fn size(&self) -> u64 {
        4 + 4 + self.chunk_offsets.len() as u64 * 4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        (self.chunk_offsets.len() as u32).encode(output)?;
        for chunk_offset in &self.chunk_offsets {
            chunk_offset.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for ChunkOffsetBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;

        let entry_count = u32::decode(input)?;
        check_entries(FourCC::stco, entry_count, 4, input)?;
        let mut chunk_offsets = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            chunk_offsets.push(Decode::decode(input)?);
        }

        Ok(Self {
            header,
            chunk_offsets,
        })
    }
}

#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct ChunkLargeOffsetBox {
    pub header: FullBoxHeader,
    #[derivative(Debug = "ignore")]
    pub chunk_offsets: Vec<u64>,
}

impl Encode for ChunkLargeOffsetBox {
    fn size(&self) -> u64 {
        4 + 4 + self.chunk_offsets.len() as u64 * 8
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        (self.chunk_offsets.len() as u32).encode(output)?;
        for chunk_offset in &self.chunk_offsets {
            chunk_offset.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for ChunkLargeOffsetBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = Decode::decode(input)?;

        let entry_count = u32::decode(input)?;
        check_entries(FourCC::co64, entry_count, 8, input)?;
        let mut chunk_offsets = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            chunk_offsets.push(Decode::decode(input)?);
        }

        Ok(Self {
            header,
            chunk_offsets,
        })
    }
}

// 8.9.2
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SampleToGroupBox {
    pub header: FullBoxHeader,
    pub grouping_type: FourCC,
    /// Present in version 1 only.
    pub grouping_type_parameter: Option<u32>,
    pub entries: Vec<SampleToGroupEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleToGroupEntry {
    pub sample_count: u32,
    pub group_description_index: u32,
}

impl Encode for SampleToGroupBox {
    fn size(&self) -> u64 {
        4 + 4
            + self.grouping_type_parameter.map_or(0, |_| 4)
            + 4
            + self.entries.len() as u64 * (4 + 4)
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        let version = if self.grouping_type_parameter.is_some() { 1 } else { 0 };
        FullBoxHeader::new(version, self.header.flags).encode(output)?;
        self.grouping_type.encode(output)?;
        if let Some(grouping_type_parameter) = self.grouping_type_parameter {
            grouping_type_parameter.encode(output)?;
        }
        (self.entries.len() as u32).encode(output)?;
        for entry in &self.entries {
            entry.sample_count.encode(output)?;
            entry.group_description_index.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for SampleToGroupBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;
        let grouping_type = Decode::decode(input)?;
        let grouping_type_parameter = match header.version {
            1 => Some(Decode::decode(input)?),
            _ => None,
        };

        let entry_count = u32::decode(input)?;
        check_entries(FourCC::sbgp, entry_count, 8, input)?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            entries.push(SampleToGroupEntry {
                sample_count: Decode::decode(input)?,
                group_description_index: Decode::decode(input)?,
            });
        }

        Ok(Self {
            header,
            grouping_type,
            grouping_type_parameter,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::decode_exact;

    fn stsc(entries: &[(u32, u32)]) -> SampleToChunkBox {
        SampleToChunkBox {
            header: Default::default(),
            entries: entries
                .iter()
                .map(|&(first_chunk, samples_per_chunk)| SampleToChunkEntry {
                    first_chunk,
                    samples_per_chunk,
                    sample_description_index: 1,
                })
                .collect(),
        }
    }

    #[test]
    fn last_chunk_run_extends_to_end() {
        assert_eq!(
            stsc(&[(1, 3), (3, 1)]).samples_per_chunk(5).unwrap(),
            [3, 3, 1, 1, 1]
        );
        assert_eq!(stsc(&[(1, 2)]).samples_per_chunk(3).unwrap(), [2, 2, 2]);
        assert!(stsc(&[(2, 2)]).samples_per_chunk(3).is_err());
        assert!(stsc(&[(1, 2), (5, 1)]).samples_per_chunk(3).is_err());
        assert!(stsc(&[]).samples_per_chunk(1).is_err());
    }

    #[test]
    fn sample_sizes() {
        let constant = SampleSizeBox {
            sample_size: 512,
            sample_count: 3,
            ..Default::default()
        };
        assert_eq!(constant.get(2), Some(512));
        assert_eq!(constant.get(3), None);
        assert_eq!(constant.size(), 12);

        let table = SampleSizeBox {
            entry_sizes: vec![1, 2, 3],
            ..Default::default()
        };
        let mut data = vec![];
        table.encode(&mut data).unwrap();
        let decoded = decode_exact::<SampleSizeBox>(FourCC::stsz, &data).unwrap();
        assert_eq!(decoded.sample_count(), 3);
        assert_eq!(decoded.get(1), Some(2));

        let mut truncated = data.clone();
        truncated.truncate(data.len() - 1);
        assert!(decode_exact::<SampleSizeBox>(FourCC::stsz, &truncated).is_err());
    }

    #[test]
    fn compact_sample_sizes() {
        let mut data = vec![0, 0, 0, 0, 0, 0, 0, 8, 0, 0, 0, 2, 7, 9];
        let decoded = decode_exact::<CompactSampleSizeBox>(FourCC::stz2, &data).unwrap();
        assert_eq!(decoded.entry_sizes, [7, 9]);

        data[7] = 4;
        assert!(matches!(
            decode_exact::<CompactSampleSizeBox>(FourCC::stz2, &data),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn negative_composition_offsets_need_version_1() {
        let ctts = CompositionOffsetBox {
            header: Default::default(),
            entries: vec![CompositionOffsetEntry {
                sample_count: 2,
                sample_offset: -512,
            }],
        };
        let mut data = vec![];
        ctts.encode(&mut data).unwrap();
        assert_eq!(data[0], 1);
        let decoded = decode_exact::<CompositionOffsetBox>(FourCC::ctts, &data).unwrap();
        assert_eq!(decoded.entries, ctts.entries);
    }

    #[test]
    fn sound_description_version_1() {
        let mut data = vec![0u8; 28 + 16 + 4];
        data[7] = 1; // data_reference_index
        data[9] = 1; // version
        let mut buf = vec![];
        let mut entry = AudioSampleEntry::default();
        let mut input = &data[..];
        entry
            .read(FourCC::new(b"mp4a"), &mut input, data.len() as u64, &mut buf)
            .unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.extension.len(), 16);
        assert_eq!(entry.size(), 44);
        assert_eq!(input.len(), 4);
    }
}

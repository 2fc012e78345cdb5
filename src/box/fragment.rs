use std::io::Write;

use derivative::Derivative;

use crate::{
    marshal::{Decode, Encode, FourCC, FullBoxHeader},
    r#box::{
        movie::{decode_time, encode_time, time_version},
        sample_table::check_entries,
    },
    Result,
};

// 8.16.3
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SegmentIndexBox {
    pub header: FullBoxHeader,
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub references: Vec<SegmentReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentReference {
    pub reference_type: bool,
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    pub sap_type: u8,
    pub sap_delta_time: u32,
}

impl SegmentIndexBox {
    fn version(&self) -> u8 {
        time_version(
            self.header.version,
            &[self.earliest_presentation_time, self.first_offset],
        )
    }
}

impl Encode for SegmentIndexBox {
    fn size(&self) -> u64 {
        let times = match self.version() {
            0 => 4 + 4,
            _ => 8 + 8,
        };
        4 + 4 + 4 + times + 2 + 2 + self.references.len() as u64 * 12
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        let version = self.version();
        FullBoxHeader::new(version, self.header.flags).encode(output)?;
        self.reference_id.encode(output)?;
        self.timescale.encode(output)?;
        encode_time(version, self.earliest_presentation_time, output)?;
        encode_time(version, self.first_offset, output)?;
        0u16.encode(output)?; // reserved
        (self.references.len() as u16).encode(output)?;
        for reference in &self.references {
            ((reference.reference_type as u32) << 31 | reference.referenced_size & 0x7FFFFFFF)
                .encode(output)?;
            reference.subsegment_duration.encode(output)?;
            ((reference.starts_with_sap as u32) << 31
                | (reference.sap_type as u32 & 0x7) << 28
                | reference.sap_delta_time & 0x0FFFFFFF)
                .encode(output)?;
        }
        Ok(())
    }
}

impl Decode for SegmentIndexBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;
        let reference_id = Decode::decode(input)?;
        let timescale = Decode::decode(input)?;
        let earliest_presentation_time = decode_time(header.version, input)?;
        let first_offset = decode_time(header.version, input)?;
        u16::decode(input)?; // reserved

        let reference_count = u16::decode(input)?;
        check_entries(FourCC::sidx, reference_count as u32, 12, input)?;
        let mut references = Vec::with_capacity(reference_count as usize);
        for _ in 0..reference_count {
            let reference = u32::decode(input)?;
            let subsegment_duration = u32::decode(input)?;
            let sap = u32::decode(input)?;
            references.push(SegmentReference {
                reference_type: reference >> 31 != 0,
                referenced_size: reference & 0x7FFFFFFF,
                subsegment_duration,
                starts_with_sap: sap >> 31 != 0,
                sap_type: (sap >> 28 & 0x7) as u8,
                sap_delta_time: sap & 0x0FFFFFFF,
            });
        }

        Ok(Self {
            header,
            reference_id,
            timescale,
            earliest_presentation_time,
            first_offset,
            references,
        })
    }
}

// 8.8.5
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MovieFragmentHeaderBox {
    pub header: FullBoxHeader,
    pub sequence_number: u32,
}

impl Encode for MovieFragmentHeaderBox {
    fn size(&self) -> u64 {
        4 + 4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.header.encode(output)?;
        self.sequence_number.encode(output)
    }
}

impl Decode for MovieFragmentHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            header: Decode::decode(input)?,
            sequence_number: Decode::decode(input)?,
        })
    }
}

// 8.8.7
/// Track fragment defaults; each optional field is present exactly when its flag is set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackFragmentHeaderBox {
    pub header: FullBoxHeader,
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

impl TrackFragmentHeaderBox {
    pub const BASE_DATA_OFFSET_PRESENT: u32 = 0x000001;
    pub const SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x000002;
    pub const DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x000008;
    pub const DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x000010;
    pub const DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x000020;
    pub const DURATION_IS_EMPTY: u32 = 0x010000;
    pub const DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

    fn flags(&self) -> u32 {
        let mut header = self.header;
        header.set_flag(Self::BASE_DATA_OFFSET_PRESENT, self.base_data_offset.is_some());
        header.set_flag(
            Self::SAMPLE_DESCRIPTION_INDEX_PRESENT,
            self.sample_description_index.is_some(),
        );
        header.set_flag(
            Self::DEFAULT_SAMPLE_DURATION_PRESENT,
            self.default_sample_duration.is_some(),
        );
        header.set_flag(Self::DEFAULT_SAMPLE_SIZE_PRESENT, self.default_sample_size.is_some());
        header.set_flag(Self::DEFAULT_SAMPLE_FLAGS_PRESENT, self.default_sample_flags.is_some());
        header.flags
    }
}

impl Encode for TrackFragmentHeaderBox {
    fn size(&self) -> u64 {
        4 + 4
            + self.base_data_offset.map_or(0, |_| 8)
            + self.sample_description_index.map_or(0, |_| 4)
            + self.default_sample_duration.map_or(0, |_| 4)
            + self.default_sample_size.map_or(0, |_| 4)
            + self.default_sample_flags.map_or(0, |_| 4)
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        FullBoxHeader::new(self.header.version, self.flags()).encode(output)?;
        self.track_id.encode(output)?;
        if let Some(base_data_offset) = self.base_data_offset {
            base_data_offset.encode(output)?;
        }
        if let Some(sample_description_index) = self.sample_description_index {
            sample_description_index.encode(output)?;
        }
        if let Some(default_sample_duration) = self.default_sample_duration {
            default_sample_duration.encode(output)?;
        }
        if let Some(default_sample_size) = self.default_sample_size {
            default_sample_size.encode(output)?;
        }
        if let Some(default_sample_flags) = self.default_sample_flags {
            default_sample_flags.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for TrackFragmentHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;
        let track_id = Decode::decode(input)?;

        let base_data_offset = if header.has_flag(Self::BASE_DATA_OFFSET_PRESENT) {
            Some(Decode::decode(input)?)
        } else {
            None
        };
        let mut optional = |flag: u32| -> Result<Option<u32>> {
            Ok(if header.has_flag(flag) {
                Some(Decode::decode(input)?)
            } else {
                None
            })
        };
        let sample_description_index = optional(Self::SAMPLE_DESCRIPTION_INDEX_PRESENT)?;
        let default_sample_duration = optional(Self::DEFAULT_SAMPLE_DURATION_PRESENT)?;
        let default_sample_size = optional(Self::DEFAULT_SAMPLE_SIZE_PRESENT)?;
        let default_sample_flags = optional(Self::DEFAULT_SAMPLE_FLAGS_PRESENT)?;

        Ok(Self {
            header,
            track_id,
            base_data_offset,
            sample_description_index,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
        })
    }
}

// 8.8.12
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackFragmentBaseMediaDecodeTimeBox {
    pub header: FullBoxHeader,
    pub base_media_decode_time: u64,
}

impl Encode for TrackFragmentBaseMediaDecodeTimeBox {
    fn size(&self) -> u64 {
        4 + match time_version(self.header.version, &[self.base_media_decode_time]) {
            0 => 4,
            _ => 8,
        }
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        let version = time_version(self.header.version, &[self.base_media_decode_time]);
        FullBoxHeader::new(version, self.header.flags).encode(output)?;
        encode_time(version, self.base_media_decode_time, output)
    }
}

impl Decode for TrackFragmentBaseMediaDecodeTimeBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;
        let base_media_decode_time = decode_time(header.version, input)?;

        Ok(Self {
            header,
            base_media_decode_time,
        })
    }
}

// 8.8.8
/// Run of samples within a track fragment.
///
/// The flags in `header` decide which per-sample fields are present; fields of an entry that the
/// flags do not announce are `None` after decoding and ignored when encoding.
#[derive(Derivative, Default, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct TrackRunBox {
    pub header: FullBoxHeader,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    #[derivative(Debug = "ignore")]
    pub entries: Vec<TrackRunEntry>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackRunEntry {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<u32>,
    pub composition_offset: Option<i64>,
}

impl TrackRunBox {
    pub const DATA_OFFSET_PRESENT: u32 = 0x000001;
    pub const FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0x000004;
    pub const SAMPLE_DURATION_PRESENT: u32 = 0x000100;
    pub const SAMPLE_SIZE_PRESENT: u32 = 0x000200;
    pub const SAMPLE_FLAGS_PRESENT: u32 = 0x000400;
    pub const SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT: u32 = 0x000800;

    fn flags(&self) -> u32 {
        let mut header = self.header;
        header.set_flag(Self::DATA_OFFSET_PRESENT, self.data_offset.is_some());
        header.set_flag(Self::FIRST_SAMPLE_FLAGS_PRESENT, self.first_sample_flags.is_some());
        header.flags
    }

    fn entry_size(flags: u32) -> u64 {
        [
            Self::SAMPLE_DURATION_PRESENT,
            Self::SAMPLE_SIZE_PRESENT,
            Self::SAMPLE_FLAGS_PRESENT,
            Self::SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT,
        ]
        .iter()
        .filter(|&&flag| flags & flag != 0)
        .count() as u64
            * 4
    }
}

impl Encode for TrackRunBox {
    fn size(&self) -> u64 {
        4 + 4
            + self.data_offset.map_or(0, |_| 4)
            + self.first_sample_flags.map_or(0, |_| 4)
            + self.entries.len() as u64 * Self::entry_size(self.header.flags)
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        let header = FullBoxHeader::new(self.header.version, self.flags());
        header.encode(output)?;
        (self.entries.len() as u32).encode(output)?;
        if let Some(data_offset) = self.data_offset {
            data_offset.encode(output)?;
        }
        if let Some(first_sample_flags) = self.first_sample_flags {
            first_sample_flags.encode(output)?;
        }
        for entry in &self.entries {
            if header.has_flag(Self::SAMPLE_DURATION_PRESENT) {
                entry.duration.unwrap_or_default().encode(output)?;
            }
            if header.has_flag(Self::SAMPLE_SIZE_PRESENT) {
                entry.size.unwrap_or_default().encode(output)?;
            }
            if header.has_flag(Self::SAMPLE_FLAGS_PRESENT) {
                entry.flags.unwrap_or_default().encode(output)?;
            }
            if header.has_flag(Self::SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT) {
                let composition_offset = entry.composition_offset.unwrap_or_default();
                match header.version {
                    0 => (composition_offset as u32).encode(output)?,
                    _ => (composition_offset as i32).encode(output)?,
                }
            }
        }
        Ok(())
    }
}

impl Decode for TrackRunBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;
        let sample_count = u32::decode(input)?;
        let data_offset = if header.has_flag(Self::DATA_OFFSET_PRESENT) {
            Some(Decode::decode(input)?)
        } else {
            None
        };
        let first_sample_flags = if header.has_flag(Self::FIRST_SAMPLE_FLAGS_PRESENT) {
            Some(Decode::decode(input)?)
        } else {
            None
        };

        check_entries(FourCC::trun, sample_count, Self::entry_size(header.flags), input)?;
        let mut optional = |flag: u32| -> Result<Option<u32>> {
            Ok(if header.has_flag(flag) {
                Some(Decode::decode(input)?)
            } else {
                None
            })
        };
        let mut entries = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            let duration = optional(Self::SAMPLE_DURATION_PRESENT)?;
            let size = optional(Self::SAMPLE_SIZE_PRESENT)?;
            let flags = optional(Self::SAMPLE_FLAGS_PRESENT)?;
            let composition_offset = optional(Self::SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT)?
                .map(|offset| match header.version {
                    0 => offset as i64,
                    _ => offset as i32 as i64,
                });
            entries.push(TrackRunEntry {
                duration,
                size,
                flags,
                composition_offset,
            });
        }

        Ok(Self {
            header,
            data_offset,
            first_sample_flags,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::decode_exact;

    #[test]
    fn track_fragment_header_optional_fields() {
        let track_fragment_header = TrackFragmentHeaderBox {
            header: FullBoxHeader::new(0, TrackFragmentHeaderBox::DEFAULT_BASE_IS_MOOF),
            track_id: 2,
            base_data_offset: Some(u32::MAX as u64 + 5),
            default_sample_duration: Some(1024),
            default_sample_flags: Some(0x01010000),
            ..Default::default()
        };
        let mut data = vec![];
        track_fragment_header.encode(&mut data).unwrap();
        assert_eq!(data.len() as u64, track_fragment_header.size());
        assert_eq!(&data[..4], &[0, 0x02, 0, 0x29]);

        let decoded = decode_exact::<TrackFragmentHeaderBox>(FourCC::tfhd, &data).unwrap();
        assert_eq!(decoded.base_data_offset, Some(u32::MAX as u64 + 5));
        assert_eq!(decoded.default_sample_size, None);
        assert_eq!(decoded.default_sample_flags, Some(0x01010000));
    }

    #[test]
    fn track_run_signed_offsets() {
        let track_run = TrackRunBox {
            header: FullBoxHeader::new(
                1,
                TrackRunBox::DATA_OFFSET_PRESENT
                    | TrackRunBox::SAMPLE_SIZE_PRESENT
                    | TrackRunBox::SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT,
            ),
            data_offset: Some(-8),
            first_sample_flags: None,
            entries: vec![
                TrackRunEntry {
                    size: Some(100),
                    composition_offset: Some(-1024),
                    ..Default::default()
                },
                TrackRunEntry {
                    size: Some(200),
                    composition_offset: Some(2048),
                    ..Default::default()
                },
            ],
        };
        let mut data = vec![];
        track_run.encode(&mut data).unwrap();
        assert_eq!(data.len(), 4 + 4 + 4 + 2 * 8);

        let decoded = decode_exact::<TrackRunBox>(FourCC::trun, &data).unwrap();
        assert_eq!(decoded, track_run);
        assert!(decode_exact::<TrackRunBox>(FourCC::trun, &data[..data.len() - 2]).is_err());
    }

    #[test]
    fn segment_index_references() {
        let segment_index = SegmentIndexBox {
            reference_id: 1,
            timescale: 1000,
            references: vec![SegmentReference {
                reference_type: false,
                referenced_size: 4096,
                subsegment_duration: 2000,
                starts_with_sap: true,
                sap_type: 1,
                sap_delta_time: 0,
            }],
            ..Default::default()
        };
        let mut data = vec![];
        segment_index.encode(&mut data).unwrap();
        assert_eq!(
            decode_exact::<SegmentIndexBox>(FourCC::sidx, &data).unwrap(),
            segment_index
        );
    }
}

use std::io::Write;

use fixed::types::{U16F16, U8F8};
use fixed_macro::types::U16F16;

use crate::{
    marshal::{Decode, Encode, FourCC, FullBoxHeader, Matrix},
    r#box::movie::{decode_time, encode_time, time_version},
    Error, Result,
};

// 8.3.2
#[derive(Debug, Clone, PartialEq)]
pub struct TrackHeaderBox {
    pub header: FullBoxHeader,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub duration: u64,
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: U8F8,
    pub matrix: Matrix,
    pub width: U16F16,
    pub height: U16F16,
}

impl TrackHeaderBox {
    pub const ENABLED: u32 = 0x000001;
    pub const IN_MOVIE: u32 = 0x000002;
    pub const IN_PREVIEW: u32 = 0x000004;
    /// Also `track_size_is_aspect_ratio` in ISO/IEC 14496-12.
    pub const IN_POSTER: u32 = 0x000008;

    pub fn version(&self) -> u8 {
        time_version(
            self.header.version,
            &[self.creation_time, self.modification_time, self.duration],
        )
    }
}

impl Default for TrackHeaderBox {
    fn default() -> Self {
        Self {
            header: FullBoxHeader::new(0, Self::ENABLED | Self::IN_MOVIE),
            creation_time: 0,
            modification_time: 0,
            track_id: 1,
            duration: 0,
            layer: 0,
            alternate_group: 0,
            volume: U8F8::ZERO,
            matrix: Matrix::identity(),
            width: U16F16!(0),
            height: U16F16!(0),
        }
    }
}

impl Encode for TrackHeaderBox {
    fn size(&self) -> u64 {
        let times = match self.version() {
            0 => 4 + 4 + 4 + 4 + 4,
            _ => 8 + 8 + 4 + 4 + 8,
        };
        4 + times + 4 * 2 + 2 + 2 + 2 + 2 + self.matrix.size() + 4 + 4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        let version = self.version();
        FullBoxHeader::new(version, self.header.flags).encode(output)?;

        encode_time(version, self.creation_time, output)?;
        encode_time(version, self.modification_time, output)?;
        self.track_id.encode(output)?;
        0u32.encode(output)?; // reserved
        encode_time(version, self.duration, output)?;
        0u32.encode(output)?; // reserved
        0u32.encode(output)?; // reserved
        self.layer.encode(output)?;
        self.alternate_group.encode(output)?;
        self.volume.encode(output)?;
        0u16.encode(output)?; // reserved
        self.matrix.encode(output)?;
        self.width.encode(output)?;
        self.height.encode(output)
    }
}

impl Decode for TrackHeaderBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;

        let creation_time = decode_time(header.version, input)?;
        let modification_time = decode_time(header.version, input)?;
        let track_id = Decode::decode(input)?;
        u32::decode(input)?; // reserved
        let duration = decode_time(header.version, input)?;
        u32::decode(input)?; // reserved
        u32::decode(input)?; // reserved
        let layer = Decode::decode(input)?;
        let alternate_group = Decode::decode(input)?;
        let volume = Decode::decode(input)?;
        u16::decode(input)?; // reserved
        let matrix = Decode::decode(input)?;
        let width = Decode::decode(input)?;
        let height = Decode::decode(input)?;

        Ok(Self {
            header,
            creation_time,
            modification_time,
            track_id,
            duration,
            layer,
            alternate_group,
            volume,
            matrix,
            width,
            height,
        })
    }
}

// 8.6.6
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EditListBox {
    pub header: FullBoxHeader,
    pub entries: Vec<EditListEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditListEntry {
    pub segment_duration: u64,
    pub media_time: i64,
    pub media_rate_integer: i16,
    pub media_rate_fraction: i16,
}

impl EditListBox {
    fn version(&self) -> u8 {
        let wide = self.entries.iter().any(|entry| {
            entry.segment_duration > u32::MAX as u64 || i32::try_from(entry.media_time).is_err()
        });
        if self.header.version >= 1 || wide {
            1
        } else {
            0
        }
    }
}

impl Encode for EditListBox {
    fn size(&self) -> u64 {
        let entry_size = match self.version() {
            0 => 4 + 4 + 2 + 2,
            _ => 8 + 8 + 2 + 2,
        };
        4 + 4 + self.entries.len() as u64 * entry_size
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        let version = self.version();
        FullBoxHeader::new(version, self.header.flags).encode(output)?;

        (self.entries.len() as u32).encode(output)?;
        for entry in &self.entries {
            match version {
                0 => {
                    (entry.segment_duration as u32).encode(output)?;
                    (entry.media_time as i32).encode(output)?;
                }
                _ => {
                    entry.segment_duration.encode(output)?;
                    entry.media_time.encode(output)?;
                }
            }
            entry.media_rate_integer.encode(output)?;
            entry.media_rate_fraction.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for EditListBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let header = FullBoxHeader::decode(input)?;

        let entry_count = u32::decode(input)?;
        let entry_size = if header.version == 0 { 12 } else { 20 };
        if input.len() as u64 != entry_count as u64 * entry_size {
            return Err(Error::malformed(
                FourCC::elst,
                format!("{entry_count} entries in {} bytes", input.len()),
            ));
        }
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let (segment_duration, media_time) = match header.version {
                0 => (u32::decode(input)? as u64, i32::decode(input)? as i64),
                _ => (Decode::decode(input)?, Decode::decode(input)?),
            };
            entries.push(EditListEntry {
                segment_duration,
                media_time,
                media_rate_integer: Decode::decode(input)?,
                media_rate_fraction: Decode::decode(input)?,
            });
        }

        Ok(Self { header, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::decode_exact;

    #[test]
    fn track_header_flags() {
        let mut track_header = TrackHeaderBox::default();
        track_header
            .header
            .set_flag(TrackHeaderBox::IN_PREVIEW | TrackHeaderBox::IN_POSTER, true);
        track_header.track_id = 7;
        assert_eq!(track_header.size(), 84);

        let mut data = vec![];
        track_header.encode(&mut data).unwrap();
        assert_eq!(&data[..4], &[0, 0, 0, 0x0F]);
        let decoded = decode_exact::<TrackHeaderBox>(FourCC::tkhd, &data).unwrap();
        assert_eq!(decoded, track_header);
    }

    #[test]
    fn edit_list_negative_media_time() {
        let edit_list = EditListBox {
            header: Default::default(),
            entries: vec![EditListEntry {
                segment_duration: 1000,
                media_time: -1,
                media_rate_integer: 1,
                media_rate_fraction: 0,
            }],
        };
        let mut data = vec![];
        edit_list.encode(&mut data).unwrap();
        assert_eq!(data.len(), 20);
        assert_eq!(decode_exact::<EditListBox>(FourCC::elst, &data).unwrap(), edit_list);
        assert!(decode_exact::<EditListBox>(FourCC::elst, &data[..19]).is_err());
    }
}

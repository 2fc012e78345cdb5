use std::io::{Read, Write};

use crate::{
    io,
    marshal::{decode_exact, Decode, Encode, FourCC},
    Error, Result,
};

pub use self::{
    file::{FileTypeBox, FreeSpaceBox, UnknownBox},
    fragment::{
        MovieFragmentHeaderBox, SegmentIndexBox, SegmentReference,
        TrackFragmentBaseMediaDecodeTimeBox, TrackFragmentHeaderBox, TrackRunBox, TrackRunEntry,
    },
    media::{
        DataEntryUrlBox, DataEntryUrnBox, DataReferenceBox, HandlerBox, HintMediaHeaderBox,
        MediaHeaderBox, NullMediaHeaderBox, SoundMediaHeaderBox, VideoMediaHeaderBox,
    },
    metadata::{AppleItemBox, MetaBox},
    movie::{MovieExtendsHeaderBox, MovieHeaderBox, ObjectDescriptorBox, TrackExtendsBox},
    sample_table::{
        AudioSampleEntry, ChunkLargeOffsetBox, ChunkOffsetBox, CompactSampleSizeBox,
        CompositionOffsetBox, CompositionOffsetEntry, EsdBox, SampleDescriptionBox, SampleSizeBox,
        SampleToChunkBox, SampleToChunkEntry, SampleToGroupBox, SampleToGroupEntry,
        ShadowSyncSampleBox, ShadowSyncSampleEntry, SyncSampleBox, TimeToSampleBox,
        TimeToSampleEntry, VisualSampleEntry,
    },
    track::{EditListBox, EditListEntry, TrackHeaderBox},
};

pub mod file;
pub mod fragment;
pub mod media;
pub mod metadata;
pub mod movie;
pub mod sample_table;
pub mod track;

/// Largest size field that still fits the compact 32-bit header form.
const MAX_COMPACT_SIZE: u64 = u32::MAX as u64 - 8;

////////////////////////////////////////////////////////////////////////////////////////////////////
// ISO/IEC 14496-12:2015 4.2
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: FourCC,
    size: u32,
    large_size: Option<u64>,
    user_type: Option<[u8; 16]>,
}

impl BoxHeader {
    /// Header of an empty box of the given type.
    pub fn new(box_type: FourCC) -> Self {
        let mut header = Self {
            box_type,
            size: 0,
            large_size: None,
            user_type: (box_type == FourCC::uuid).then_some([0; 16]),
        };
        header.set_payload_len(0);
        header
    }

    /// Header of a box spanning exactly `total` bytes, header included.
    pub fn with_total_len(box_type: FourCC, total: u64) -> Result<Self> {
        let mut header = Self::new(box_type);
        let user_len = header.user_type.map_or(0, |_| 16);
        if total <= MAX_COMPACT_SIZE {
            if total < 8 + user_len {
                return Err(Error::malformed(
                    box_type,
                    format!("{total} bytes cannot hold a box header"),
                ));
            }
            header.size = total as u32;
            header.large_size = None;
        } else {
            header.size = 1;
            header.large_size = Some(total);
        }
        Ok(header)
    }

    pub fn user_type(&self) -> Option<&[u8; 16]> {
        self.user_type.as_ref()
    }

    pub fn set_user_type(&mut self, user_type: [u8; 16]) {
        let payload_len = self.payload_len().ok().flatten();
        self.user_type = Some(user_type);
        if let Some(payload_len) = payload_len {
            self.set_payload_len(payload_len);
        }
    }

    pub fn header_len(&self) -> u64 {
        8 + self.large_size.map_or(0, |_| 8) + self.user_type.map_or(0, |_| 16)
    }

    /// Declared size including the header, `None` for a box running to the end of the stream.
    pub fn total_len(&self) -> Option<u64> {
        match (self.size, self.large_size) {
            (_, Some(large_size)) => Some(large_size),
            (0, None) => None,
            (size, None) => Some(size as u64),
        }
    }

    pub fn is_large(&self) -> bool {
        self.large_size.is_some()
    }

    /// Declared payload size, `None` for a box running to the end of the stream.
    pub fn payload_len(&self) -> Result<Option<u64>> {
        self.total_len()
            .map(|total| {
                total.checked_sub(self.header_len()).ok_or_else(|| {
                    Error::malformed(
                        self.box_type,
                        format!("size {total} is smaller than its header"),
                    )
                })
            })
            .transpose()
    }

    /// Declares `len` payload bytes, switching between compact and large form as needed.
    pub fn set_payload_len(&mut self, len: u64) {
        let user_len = self.user_type.map_or(0, |_| 16);
        if len + user_len + 8 <= MAX_COMPACT_SIZE {
            self.size = (len + user_len + 8) as u32;
            self.large_size = None;
        } else {
            self.size = 1;
            self.large_size = Some(len + user_len + 16);
        }
    }

    /// Reads a header, returning `None` if the stream ends before its first byte and `allow_eof`
    /// is set.
    pub fn read<R: Read + ?Sized>(
        input: &mut R,
        buf: &mut Vec<u8>,
        allow_eof: bool,
    ) -> Result<Option<Self>> {
        if !io::read_or_eof(input, 8, buf)? {
            if allow_eof {
                return Ok(None);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        let mut data = &buf[..];
        let size = u32::decode(&mut data)?;
        let box_type = FourCC::decode(&mut data)?;

        let large_size = if size == 1 {
            io::read(input, 8, buf)?;
            Some(u64::decode(&mut &buf[..])?)
        } else {
            None
        };
        let user_type = if box_type == FourCC::uuid {
            io::read(input, 16, buf)?;
            Some(<[u8; 16]>::decode(&mut &buf[..])?)
        } else {
            None
        };

        let header = Self {
            box_type,
            size,
            large_size,
            user_type,
        };
        header.payload_len()?;
        Ok(Some(header))
    }
}

impl Encode for BoxHeader {
    fn size(&self) -> u64 {
        self.header_len()
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.size.encode(output)?;
        self.box_type.encode(output)?;
        if let Some(large_size) = self.large_size {
            large_size.encode(output)?;
        }
        if let Some(user_type) = &self.user_type {
            user_type.encode(output)?;
        }
        Ok(())
    }
}

/// Box payloads that read their own fields and leave the rest of the payload to the walker.
pub trait ReadFields {
    fn read(
        &mut self,
        box_type: FourCC,
        input: &mut dyn Read,
        len: u64,
        buf: &mut Vec<u8>,
    ) -> Result<()>;
}

/// Access to the concrete payload type behind a [`BoxData`].
pub trait BoxVariant: Sized {
    fn from_data(data: &BoxData) -> Option<&Self>;

    fn from_data_mut(data: &mut BoxData) -> Option<&mut Self>;
}

/// Reads the fixed-size leading fields of a box whose remaining payload holds child boxes.
pub(crate) fn read_prefix<T: Decode>(
    box_type: FourCC,
    input: &mut dyn Read,
    len: u64,
    prefix_len: u64,
    buf: &mut Vec<u8>,
) -> Result<T> {
    if len < prefix_len {
        return Err(Error::malformed(
            box_type,
            format!("payload of {len} bytes is shorter than {prefix_len}"),
        ));
    }
    io::read(input, prefix_len, buf)?;
    decode_exact(box_type, &buf[..])
}

macro_rules! box_data {
    (
        fields { $($fields:ident($fields_type:ty)),* $(,)? }
        prefix { $($prefix:ident($prefix_type:ty)),* $(,)? }
    ) => {
        /// Payload of a box, one variant per supported box type.
        #[derive(Debug, Clone)]
        pub enum BoxData {
            /// The payload is nothing but child boxes.
            Container,
            /// The payload is media data and never interpreted.
            MediaData,
            $($fields($fields_type),)*
            $($prefix($prefix_type),)*
        }

        $(
            impl BoxVariant for $fields_type {
                fn from_data(data: &BoxData) -> Option<&Self> {
                    match data {
                        BoxData::$fields(value) => Some(value),
                        _ => None,
                    }
                }

                fn from_data_mut(data: &mut BoxData) -> Option<&mut Self> {
                    match data {
                        BoxData::$fields(value) => Some(value),
                        _ => None,
                    }
                }
            }

            impl From<$fields_type> for BoxData {
                fn from(value: $fields_type) -> Self {
                    BoxData::$fields(value)
                }
            }
        )*

        $(
            impl BoxVariant for $prefix_type {
                fn from_data(data: &BoxData) -> Option<&Self> {
                    match data {
                        BoxData::$prefix(value) => Some(value),
                        _ => None,
                    }
                }

                fn from_data_mut(data: &mut BoxData) -> Option<&mut Self> {
                    match data {
                        BoxData::$prefix(value) => Some(value),
                        _ => None,
                    }
                }
            }

            impl From<$prefix_type> for BoxData {
                fn from(value: $prefix_type) -> Self {
                    BoxData::$prefix(value)
                }
            }
        )*

        impl BoxData {
            /// Reads the fields of this variant from the start of a `len` byte payload.
            ///
            /// Field boxes consume the whole payload, prefixed boxes only their own fields.
            pub fn read<R: Read>(
                &mut self,
                box_type: FourCC,
                input: &mut R,
                len: u64,
                buf: &mut Vec<u8>,
            ) -> Result<()> {
                match self {
                    BoxData::Container | BoxData::MediaData => Ok(()),
                    $(
                        BoxData::$fields(value) => {
                            io::read(input, len, buf)?;
                            *value = decode_exact(box_type, &buf[..])?;
                            Ok(())
                        }
                    )*
                    $(BoxData::$prefix(value) => value.read(box_type, input, len, buf),)*
                }
            }

            /// Size of the fields written by [`BoxData::encode`], children excluded.
            pub fn size(&self) -> u64 {
                match self {
                    BoxData::Container | BoxData::MediaData => 0,
                    $(BoxData::$fields(value) => value.size(),)*
                    $(BoxData::$prefix(value) => value.size(),)*
                }
            }

            pub fn encode(&self, box_type: FourCC, output: &mut impl Write) -> Result<()> {
                match self {
                    BoxData::Container | BoxData::MediaData => Ok(()),
                    BoxData::Unknown(UnknownBox { data: None, .. }) => {
                        Err(Error::unsupported(box_type, "write"))
                    }
                    $(BoxData::$fields(value) => value.encode(output),)*
                    $(BoxData::$prefix(value) => value.encode(output),)*
                }
            }
        }
    };
}

box_data! {
    fields {
        FileType(FileTypeBox),
        MovieHeader(MovieHeaderBox),
        ObjectDescriptor(ObjectDescriptorBox),
        TrackHeader(TrackHeaderBox),
        EditList(EditListBox),
        MediaHeader(MediaHeaderBox),
        Handler(HandlerBox),
        VideoMediaHeader(VideoMediaHeaderBox),
        SoundMediaHeader(SoundMediaHeaderBox),
        HintMediaHeader(HintMediaHeaderBox),
        NullMediaHeader(NullMediaHeaderBox),
        DataEntryUrl(DataEntryUrlBox),
        DataEntryUrn(DataEntryUrnBox),
        Esd(EsdBox),
        TimeToSample(TimeToSampleBox),
        CompositionOffset(CompositionOffsetBox),
        SyncSample(SyncSampleBox),
        ShadowSyncSample(ShadowSyncSampleBox),
        SampleToChunk(SampleToChunkBox),
        SampleSize(SampleSizeBox),
        CompactSampleSize(CompactSampleSizeBox),
        ChunkOffset(ChunkOffsetBox),
        ChunkLargeOffset(ChunkLargeOffsetBox),
        SampleToGroup(SampleToGroupBox),
        AppleItem(AppleItemBox),
        TrackExtends(TrackExtendsBox),
        MovieExtendsHeader(MovieExtendsHeaderBox),
        SegmentIndex(SegmentIndexBox),
        MovieFragmentHeader(MovieFragmentHeaderBox),
        TrackFragmentHeader(TrackFragmentHeaderBox),
        TrackFragmentDecodeTime(TrackFragmentBaseMediaDecodeTimeBox),
        TrackRun(TrackRunBox),
    }
    prefix {
        FreeSpace(FreeSpaceBox),
        Meta(MetaBox),
        DataReference(DataReferenceBox),
        SampleDescription(SampleDescriptionBox),
        AudioSampleEntry(AudioSampleEntry),
        VisualSampleEntry(VisualSampleEntry),
        Unknown(UnknownBox),
    }
}

impl BoxData {
    /// Empty payload for a box of `box_type`.
    ///
    /// Sample entries depend on the handler of the enclosing track, and Apple tags are only
    /// recognized inside an item list.
    pub fn empty(box_type: FourCC, parent: Option<FourCC>, handler: Option<FourCC>) -> Self {
        match parent {
            Some(FourCC::stsd) => {
                return match handler {
                    Some(FourCC::soun) => BoxData::AudioSampleEntry(Default::default()),
                    Some(FourCC::vide) => BoxData::VisualSampleEntry(Default::default()),
                    _ => BoxData::Unknown(Default::default()),
                }
            }
            Some(FourCC::ilst) => {
                return if AppleItemBox::is_known(box_type) {
                    BoxData::AppleItem(Default::default())
                } else {
                    BoxData::Unknown(Default::default())
                }
            }
            _ => {}
        }

        match box_type {
            FourCC::moov
            | FourCC::trak
            | FourCC::tref
            | FourCC::edts
            | FourCC::mdia
            | FourCC::minf
            | FourCC::dinf
            | FourCC::stbl
            | FourCC::udta
            | FourCC::ilst
            | FourCC::mvex
            | FourCC::moof
            | FourCC::traf
            | FourCC::mfra => BoxData::Container,
            FourCC::mdat => BoxData::MediaData,
            FourCC::ftyp => BoxData::FileType(Default::default()),
            FourCC::free | FourCC::skip => BoxData::FreeSpace(Default::default()),
            FourCC::mvhd => BoxData::MovieHeader(Default::default()),
            FourCC::iods => BoxData::ObjectDescriptor(Default::default()),
            FourCC::tkhd => BoxData::TrackHeader(Default::default()),
            FourCC::elst => BoxData::EditList(Default::default()),
            FourCC::mdhd => BoxData::MediaHeader(Default::default()),
            FourCC::hdlr => BoxData::Handler(Default::default()),
            FourCC::vmhd => BoxData::VideoMediaHeader(Default::default()),
            FourCC::smhd => BoxData::SoundMediaHeader(Default::default()),
            FourCC::hmhd => BoxData::HintMediaHeader(Default::default()),
            FourCC::nmhd => BoxData::NullMediaHeader(Default::default()),
            FourCC::dref => BoxData::DataReference(Default::default()),
            FourCC::url_ => BoxData::DataEntryUrl(Default::default()),
            FourCC::urn_ => BoxData::DataEntryUrn(Default::default()),
            FourCC::stsd => BoxData::SampleDescription(Default::default()),
            FourCC::esds => BoxData::Esd(Default::default()),
            FourCC::stts => BoxData::TimeToSample(Default::default()),
            FourCC::ctts => BoxData::CompositionOffset(Default::default()),
            FourCC::stss => BoxData::SyncSample(Default::default()),
            FourCC::stsh => BoxData::ShadowSyncSample(Default::default()),
            FourCC::stsc => BoxData::SampleToChunk(Default::default()),
            FourCC::stsz => BoxData::SampleSize(Default::default()),
            FourCC::stz2 => BoxData::CompactSampleSize(Default::default()),
            FourCC::stco => BoxData::ChunkOffset(Default::default()),
            FourCC::co64 => BoxData::ChunkLargeOffset(Default::default()),
            FourCC::sbgp => BoxData::SampleToGroup(Default::default()),
            FourCC::meta => BoxData::Meta(Default::default()),
            FourCC::trex => BoxData::TrackExtends(Default::default()),
            FourCC::mehd => BoxData::MovieExtendsHeader(Default::default()),
            FourCC::sidx => BoxData::SegmentIndex(Default::default()),
            FourCC::mfhd => BoxData::MovieFragmentHeader(Default::default()),
            FourCC::tfhd => BoxData::TrackFragmentHeader(Default::default()),
            FourCC::tfdt => BoxData::TrackFragmentDecodeTime(Default::default()),
            FourCC::trun => BoxData::TrackRun(Default::default()),
            _ => BoxData::Unknown(Default::default()),
        }
    }

    /// Count of child entries kept in the fields, refreshed from the child list on update.
    pub(crate) fn set_entry_count(&mut self, entry_count: u32) {
        match self {
            BoxData::SampleDescription(value) => value.entry_count = entry_count,
            BoxData::DataReference(value) => value.entry_count = entry_count,
            _ => {}
        }
    }

    /// Whether the declared size must be kept as is, because the payload is not held in memory.
    pub(crate) fn is_opaque(&self) -> bool {
        matches!(
            self,
            BoxData::MediaData | BoxData::Unknown(UnknownBox { data: None, .. })
        )
    }
}

const MOOV_ORDER: &[FourCC] = &[
    FourCC::mvhd,
    FourCC::iods,
    FourCC::trak,
    FourCC::mvex,
    FourCC::udta,
];
const TRAK_ORDER: &[FourCC] = &[
    FourCC::tkhd,
    FourCC::tref,
    FourCC::edts,
    FourCC::mdia,
    FourCC::udta,
];
const MDIA_ORDER: &[FourCC] = &[FourCC::mdhd, FourCC::hdlr, FourCC::minf];
const MINF_ORDER: &[FourCC] = &[
    FourCC::vmhd,
    FourCC::smhd,
    FourCC::hmhd,
    FourCC::nmhd,
    FourCC::dinf,
    FourCC::stbl,
];
const STBL_ORDER: &[FourCC] = &[
    FourCC::stsd,
    FourCC::stts,
    FourCC::ctts,
    FourCC::stss,
    FourCC::stsh,
    FourCC::stsc,
    FourCC::stsz,
    FourCC::stz2,
    FourCC::stco,
    FourCC::co64,
    FourCC::sbgp,
];
const UDTA_ORDER: &[FourCC] = &[FourCC::meta];
const META_ORDER: &[FourCC] = &[FourCC::hdlr, FourCC::ilst];
const ILST_ORDER: &[FourCC] = &[
    FourCC::Cnam,
    FourCC::CART,
    FourCC::aART,
    FourCC::Calb,
    FourCC::Cgen,
    FourCC::gnre,
    FourCC::Cday,
    FourCC::trkn,
    FourCC::Ccmt,
    FourCC::stik,
    FourCC::covr,
];
const MVEX_ORDER: &[FourCC] = &[FourCC::mehd, FourCC::trex];
const MOOF_ORDER: &[FourCC] = &[FourCC::mfhd, FourCC::traf];
const TRAF_ORDER: &[FourCC] = &[FourCC::tfhd, FourCC::tfdt, FourCC::trun];

/// Conventional child order of a container, empty if the container has none.
pub fn canonical_order(parent: FourCC) -> &'static [FourCC] {
    match parent {
        FourCC::moov => MOOV_ORDER,
        FourCC::trak => TRAK_ORDER,
        FourCC::mdia => MDIA_ORDER,
        FourCC::minf => MINF_ORDER,
        FourCC::stbl => STBL_ORDER,
        FourCC::udta => UDTA_ORDER,
        FourCC::meta => META_ORDER,
        FourCC::ilst => ILST_ORDER,
        FourCC::mvex => MVEX_ORDER,
        FourCC::moof => MOOF_ORDER,
        FourCC::traf => TRAF_ORDER,
        _ => &[],
    }
}

/// Sort key of `child` within `parent`; unlisted types rank after every listed one.
pub fn child_rank(parent: FourCC, child: FourCC) -> usize {
    let order = canonical_order(parent);
    order
        .iter()
        .position(|&box_type| box_type == child)
        .unwrap_or(order.len())
}

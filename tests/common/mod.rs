#![allow(dead_code)]

use std::io::Cursor;

use isomux::{
    channel::Channel,
    io,
    r#box::{
        AppleItemBox, AudioSampleEntry, ChunkOffsetBox, DataEntryUrlBox, DataReferenceBox,
        FileTypeBox, HandlerBox, MediaHeaderBox, MetaBox, MovieFragmentHeaderBox, MovieHeaderBox,
        SampleDescriptionBox, SampleSizeBox, SampleToChunkBox, SampleToChunkEntry,
        SoundMediaHeaderBox, TimeToSampleBox, TimeToSampleEntry, TrackExtendsBox,
        TrackFragmentBaseMediaDecodeTimeBox, TrackFragmentHeaderBox, TrackHeaderBox, TrackRunBox,
        TrackRunEntry, VideoMediaHeaderBox, VisualSampleEntry,
    },
    walk::{self, Walk},
    BoxData, BoxHeader, BoxId, FourCC, Tree,
};

pub const SAMPLE_DURATION: u32 = 1024;
pub const NON_SYNC: u32 = 0x0001_0000;

/// Writes `boxes` of `tree` and returns the bytes.
pub fn write_boxes(tree: &Tree, boxes: &[BoxId]) -> Vec<u8> {
    let mut output = Channel::new(Vec::new());
    walk::write(
        &mut output,
        tree,
        boxes,
        &mut io::buffer(),
        &mut |_, _| Walk::Continue,
    )
    .unwrap();
    output.into_inner()
}

pub fn write_tree(tree: &Tree) -> Vec<u8> {
    write_boxes(tree, tree.roots())
}

/// Reads every box of `data`.
pub fn read_tree(data: &[u8]) -> Tree {
    let mut tree = Tree::new();
    let mut listener = |_: &Tree, _: BoxId| Walk::Continue;
    walk::read(
        &mut Channel::new(Cursor::new(data)),
        None,
        None,
        &mut tree,
        &mut io::buffer(),
        &mut listener,
    )
    .unwrap();
    tree
}

/// `mdat` box holding `payload`.
pub fn media_data(payload: &[u8]) -> Vec<u8> {
    let mut header = BoxHeader::new(FourCC::mdat);
    header.set_payload_len(payload.len() as u64);
    let mut tree = Tree::new();
    let mdat = tree.add(None, header, BoxData::MediaData);
    let mut data = write_boxes(&tree, &[mdat]);
    data.extend_from_slice(payload);
    data
}

/// Sample bytes that identify the track and the sample.
pub fn sample(track_id: u32, index: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (track_id as usize * 64 + index * 7 + i) as u8)
        .collect()
}

pub struct TrackSpec {
    pub track_id: u32,
    pub handler: FourCC,
    /// Samples grouped into chunks.
    pub chunks: Vec<Vec<Vec<u8>>>,
}

impl TrackSpec {
    pub fn audio(track_id: u32, chunk_lens: &[usize]) -> Self {
        Self::new(track_id, FourCC::soun, chunk_lens)
    }

    pub fn video(track_id: u32, chunk_lens: &[usize]) -> Self {
        Self::new(track_id, FourCC::vide, chunk_lens)
    }

    /// A track with one chunk per entry of `chunk_lens`, each holding that many samples.
    fn new(track_id: u32, handler: FourCC, chunk_lens: &[usize]) -> Self {
        let mut index = 0;
        let chunks = chunk_lens
            .iter()
            .map(|&samples| {
                (0..samples)
                    .map(|_| {
                        index += 1;
                        sample(track_id, index, 10 + index % 5)
                    })
                    .collect()
            })
            .collect();
        Self {
            track_id,
            handler,
            chunks,
        }
    }

    /// The media bytes of the track in chunk order.
    pub fn media(&self) -> Vec<u8> {
        self.chunks.iter().flatten().flatten().copied().collect()
    }

    pub fn sample_sizes(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .flatten()
            .map(|sample| sample.len() as u32)
            .collect()
    }
}

/// Appends a `trak` with everything down to an empty `stbl`, returning the `trak` and `stbl`.
pub fn create_track(
    tree: &mut Tree,
    moov: BoxId,
    track_id: u32,
    handler: FourCC,
) -> (BoxId, BoxId) {
    let trak = tree.create_container(Some(moov), FourCC::trak);
    tree.create(
        Some(trak),
        FourCC::tkhd,
        TrackHeaderBox {
            track_id,
            duration: 5000,
            ..Default::default()
        },
    );
    let mdia = tree.create_container(Some(trak), FourCC::mdia);
    tree.create(
        Some(mdia),
        FourCC::mdhd,
        MediaHeaderBox {
            timescale: 44100,
            duration: 220_500,
            language: "und".parse().unwrap(),
            ..Default::default()
        },
    );
    tree.create(Some(mdia), FourCC::hdlr, HandlerBox::new(handler, "test"));
    let minf = tree.create_container(Some(mdia), FourCC::minf);
    if handler == FourCC::soun {
        tree.create(Some(minf), FourCC::smhd, SoundMediaHeaderBox::default());
    } else {
        tree.create(Some(minf), FourCC::vmhd, VideoMediaHeaderBox::default());
    }
    let dinf = tree.create_container(Some(minf), FourCC::dinf);
    let dref = tree.create(Some(dinf), FourCC::dref, DataReferenceBox::default());
    tree.create(Some(dref), FourCC::url_, DataEntryUrlBox::default());

    let stbl = tree.create_container(Some(minf), FourCC::stbl);
    let stsd = tree.create(Some(stbl), FourCC::stsd, SampleDescriptionBox::default());
    if handler == FourCC::soun {
        tree.create(Some(stsd), FourCC::new(b"mp4a"), AudioSampleEntry::default());
    } else {
        tree.create(Some(stsd), FourCC::new(b"avc1"), VisualSampleEntry::default());
    }
    (trak, stbl)
}

/// `udta` with a title, to be replaced when extracting.
fn create_old_tags(tree: &mut Tree, moov: BoxId) {
    let udta = tree.create_container(Some(moov), FourCC::udta);
    let meta = tree.create(Some(udta), FourCC::meta, MetaBox::default());
    tree.create(Some(meta), FourCC::hdlr, HandlerBox::new(FourCC::mdir, ""));
    let ilst = tree.create_container(Some(meta), FourCC::ilst);
    tree.create(Some(ilst), FourCC::Cnam, AppleItemBox::from_text("Old title"));
}

/// A regular movie with the chunks of `tracks` interleaved in one `mdat`.
pub fn movie(tracks: &[TrackSpec], moov_first: bool) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut offsets = vec![Vec::new(); tracks.len()];
    let max_chunks = tracks.iter().map(|track| track.chunks.len()).max().unwrap_or(0);
    for chunk in 0..max_chunks {
        for (i, track) in tracks.iter().enumerate() {
            if let Some(samples) = track.chunks.get(chunk) {
                offsets[i].push(payload.len() as u64);
                for sample in samples {
                    payload.extend_from_slice(sample);
                }
            }
        }
    }

    let mut tree = Tree::new();
    let ftyp = tree.create(None, FourCC::ftyp, FileTypeBox::default());
    let moov = tree.create_container(None, FourCC::moov);
    tree.create(
        Some(moov),
        FourCC::mvhd,
        MovieHeaderBox {
            timescale: 1000,
            duration: 5000,
            next_track_id: tracks.iter().map(|track| track.track_id).max().unwrap_or(0) + 1,
            ..Default::default()
        },
    );

    let mut stcos = Vec::new();
    for track in tracks {
        let (_, stbl) = create_track(&mut tree, moov, track.track_id, track.handler);
        let sizes = track.sample_sizes();
        tree.create(
            Some(stbl),
            FourCC::stts,
            TimeToSampleBox {
                entries: vec![TimeToSampleEntry {
                    sample_count: sizes.len() as u32,
                    sample_delta: SAMPLE_DURATION,
                }],
                ..Default::default()
            },
        );

        let mut entries: Vec<SampleToChunkEntry> = Vec::new();
        for (i, chunk) in track.chunks.iter().enumerate() {
            if entries.last().map(|entry| entry.samples_per_chunk) != Some(chunk.len() as u32) {
                entries.push(SampleToChunkEntry {
                    first_chunk: i as u32 + 1,
                    samples_per_chunk: chunk.len() as u32,
                    sample_description_index: 1,
                });
            }
        }
        tree.create(
            Some(stbl),
            FourCC::stsc,
            SampleToChunkBox {
                entries,
                ..Default::default()
            },
        );
        tree.create(
            Some(stbl),
            FourCC::stsz,
            SampleSizeBox {
                sample_size: 0,
                sample_count: sizes.len() as u32,
                entry_sizes: sizes,
                ..Default::default()
            },
        );
        stcos.push(tree.create(
            Some(stbl),
            FourCC::stco,
            ChunkOffsetBox {
                chunk_offsets: vec![0; track.chunks.len()],
                ..Default::default()
            },
        ));
    }
    create_old_tags(&mut tree, moov);
    tree.update();

    let ftyp_len = tree.header(ftyp).total_len().unwrap();
    let moov_len = tree.header(moov).total_len().unwrap();
    let mdat_header_len = 8;
    let base = if moov_first {
        ftyp_len + moov_len + mdat_header_len
    } else {
        ftyp_len + mdat_header_len
    };
    for (stco, offsets) in stcos.into_iter().zip(offsets) {
        tree.get_as_mut::<ChunkOffsetBox>(stco).unwrap().chunk_offsets =
            offsets.iter().map(|&offset| (base + offset) as u32).collect();
    }

    let mut data = write_boxes(&tree, &[ftyp]);
    if moov_first {
        data.extend(write_boxes(&tree, &[moov]));
        data.extend(media_data(&payload));
    } else {
        data.extend(media_data(&payload));
        data.extend(write_boxes(&tree, &[moov]));
    }
    data
}

/// One fragment sample: its bytes and whether it is a sync sample.
pub type FragmentSample = (Vec<u8>, bool);

/// A fragmented movie of a single track, one `moof` and `mdat` per entry of `fragments`.
///
/// Sample flags default to non-sync through `trex`, the first sample of a run overrides them
/// when it is a sync sample.
pub fn fragmented(track_id: u32, handler: FourCC, fragments: &[Vec<FragmentSample>]) -> Vec<u8> {
    let mut tree = Tree::new();
    let ftyp = tree.create(None, FourCC::ftyp, FileTypeBox::default());
    let moov = tree.create_container(None, FourCC::moov);
    tree.create(
        Some(moov),
        FourCC::mvhd,
        MovieHeaderBox {
            timescale: 1000,
            next_track_id: track_id + 1,
            ..Default::default()
        },
    );
    let (_, stbl) = create_track(&mut tree, moov, track_id, handler);
    tree.create(Some(stbl), FourCC::stts, TimeToSampleBox::default());
    tree.create(Some(stbl), FourCC::stsc, SampleToChunkBox::default());
    tree.create(Some(stbl), FourCC::stsz, SampleSizeBox::default());
    tree.create(Some(stbl), FourCC::stco, ChunkOffsetBox::default());
    let mvex = tree.create_container(Some(moov), FourCC::mvex);
    tree.create(
        Some(mvex),
        FourCC::trex,
        TrackExtendsBox {
            track_id,
            default_sample_description_index: 1,
            default_sample_duration: SAMPLE_DURATION,
            default_sample_size: 0,
            default_sample_flags: NON_SYNC,
            ..Default::default()
        },
    );
    tree.update();
    let mut data = write_boxes(&tree, &[ftyp, moov]);

    let mut decode_time = 0;
    for (i, samples) in fragments.iter().enumerate() {
        data.extend(fragment(track_id, i as u32 + 1, decode_time, samples));
        decode_time += samples.len() as u64 * SAMPLE_DURATION as u64;
    }
    data
}

/// A `moof` for `samples` followed by the `mdat` holding them.
pub fn fragment(
    track_id: u32,
    sequence_number: u32,
    decode_time: u64,
    samples: &[FragmentSample],
) -> Vec<u8> {
    let mut tree = Tree::new();
    let moof = tree.create_container(None, FourCC::moof);
    tree.create(
        Some(moof),
        FourCC::mfhd,
        MovieFragmentHeaderBox {
            sequence_number,
            ..Default::default()
        },
    );
    let traf = tree.create_container(Some(moof), FourCC::traf);
    let mut tfhd = TrackFragmentHeaderBox {
        track_id,
        ..Default::default()
    };
    tfhd.header.flags = TrackFragmentHeaderBox::DEFAULT_BASE_IS_MOOF;
    tree.create(Some(traf), FourCC::tfhd, tfhd);
    tree.create(
        Some(traf),
        FourCC::tfdt,
        TrackFragmentBaseMediaDecodeTimeBox {
            base_media_decode_time: decode_time,
            ..Default::default()
        },
    );

    let mut trun = TrackRunBox {
        data_offset: Some(0),
        first_sample_flags: samples.first().and_then(|(_, sync)| sync.then_some(0)),
        entries: samples
            .iter()
            .map(|(data, _)| TrackRunEntry {
                size: Some(data.len() as u32),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };
    trun.header.flags = TrackRunBox::SAMPLE_SIZE_PRESENT;
    // sync samples past the first need explicit flags
    if samples.iter().skip(1).any(|(_, sync)| *sync) {
        trun.header.flags |= TrackRunBox::SAMPLE_FLAGS_PRESENT;
        trun.first_sample_flags = None;
        for (entry, (_, sync)) in trun.entries.iter_mut().zip(samples) {
            entry.flags = Some(if *sync { 0 } else { NON_SYNC });
        }
    }
    let trun = tree.create(Some(traf), FourCC::trun, trun);
    tree.update();

    let moof_len = tree.header(moof).total_len().unwrap();
    tree.get_as_mut::<TrackRunBox>(trun).unwrap().data_offset = Some(moof_len as i32 + 8);

    let payload: Vec<u8> = samples.iter().flat_map(|(data, _)| data.clone()).collect();
    let mut data = write_tree(&tree);
    data.extend(media_data(&payload));
    data
}

/// Fragments of `fragment_lens[i]` samples each, the first sample of every fragment being a
/// sync sample.
pub fn fragment_samples(track_id: u32, fragment_lens: &[usize]) -> Vec<Vec<FragmentSample>> {
    let mut index = 0;
    fragment_lens
        .iter()
        .map(|&len| {
            (0..len)
                .map(|i| {
                    index += 1;
                    (sample(track_id, index, 20 + index % 3), i == 0)
                })
                .collect()
        })
        .collect()
}

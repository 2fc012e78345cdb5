use std::io::{Read, Seek, Write};

use tracing::{debug, info, warn};

use crate::{
    channel::Channel,
    demux::{
        find_track, fix_track, set_chunk_offsets, track_id, write_header, Mp4Info,
        ProgressListener, FRAGMENT_HEADER_FACTOR, HEADER_HEADROOM,
    },
    io,
    marshal::FourCC,
    r#box::{
        BoxData, BoxHeader, CompositionOffsetBox, CompositionOffsetEntry, FreeSpaceBox,
        MediaHeaderBox, MovieHeaderBox, SampleSizeBox, SampleToChunkBox, SampleToChunkEntry,
        SyncSampleBox, TimeToSampleBox, TimeToSampleEntry, TrackExtendsBox,
        TrackFragmentHeaderBox, TrackHeaderBox, TrackRunBox,
    },
    tree::{BoxId, Tree},
    walk, Error, Result,
};

/// `sample_is_non_sync_sample` bit of the sample flags.
const SAMPLE_IS_NON_SYNC: u32 = 0x0001_0000;

/// A fragmented movie to remux, optionally restricted to one of its tracks.
#[derive(Debug)]
pub struct FragmentSource<R> {
    pub input: R,
    /// Track to take, the first track of the movie if `None`.
    pub track_id: Option<u32>,
}

impl<R> FragmentSource<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            track_id: None,
        }
    }

    pub fn with_track(input: R, track_id: u32) -> Self {
        Self {
            input,
            track_id: Some(track_id),
        }
    }
}

/// Flattens fragmented movies into one regular movie with a track per input.
///
/// Fragments are taken round-robin from the inputs and their media data is copied behind a
/// region reserved for the movie header, which is written last. The reserved region is an
/// estimate; if the final header does not fit, the call fails with [`Error::HeaderOverflow`].
pub fn remux_fragments<R: Read + Seek, W: Write + Seek>(
    sources: Vec<FragmentSource<R>>,
    output: W,
    info: &Mp4Info,
    progress: &mut dyn ProgressListener,
) -> Result<()> {
    if sources.is_empty() {
        return Err(Error::NoInput);
    }
    let mut buf = io::buffer();
    let mut output = Channel::new(output);
    let mut inputs = sources
        .into_iter()
        .map(|source| Input::open(source, &mut buf))
        .collect::<Result<Vec<_>>>()?;
    info!(inputs = inputs.len(), "remuxing fragments");

    let mut mdat_offset = None;
    let mut fragments = 0;
    loop {
        let mut fresh = false;
        for input in &mut inputs {
            if !input.exhausted {
                input.next_fragment(&mut buf)?;
                fresh |= input.fragment.is_some();
            }
        }

        if mdat_offset.is_none() {
            let reserved = reserved_header_len(&inputs, info);
            debug!(reserved, "reserving movie header");
            output.seek_to(reserved)?;
            mdat_offset = Some(reserved);
        }
        if !fresh {
            break;
        }

        for input in &mut inputs {
            if let Some(fragment) = input.fragment.take() {
                input.copy_fragment(fragment, &mut output, &mut buf)?;
                fragments += 1;
            }
        }
        progress.on_bytes_read(inputs.iter().map(|input| input.input.count()).sum());
        debug!(fragments, position = output.count(), "remuxed round");
    }

    let mdat_offset = mdat_offset.unwrap_or(HEADER_HEADROOM);
    let media_len = output.count() - mdat_offset;
    let tree = assemble(&inputs, info, mdat_offset, media_len)?;
    output.seek_to(0)?;
    write_header(&mut output, &tree, mdat_offset, &mut buf)?;
    output.flush()?;

    info!(fragments, media_len, mdat_offset, "remuxed fragments");
    Ok(())
}

/// Bytes to leave in front of the media data for `ftyp`, `moov` and the `mdat` header.
fn reserved_header_len<R>(inputs: &[Input<R>], info: &Mp4Info) -> u64 {
    let fragment_headers: u64 = inputs
        .iter()
        .filter_map(|input| {
            let fragment = input.fragment.as_ref()?;
            let moof_len = fragment.tree.header(fragment.moof).total_len()?;
            let fragments = input.len / fragment.mdat_len.max(1);
            Some(fragments * moof_len * FRAGMENT_HEADER_FACTOR)
        })
        .sum();
    fragment_headers + HEADER_HEADROOM + info.cover_len()
}

/// Builds `ftyp`, `moov`, the `free` padding and the `mdat` header so that the media data
/// starts at `mdat_offset`.
fn assemble<R>(
    inputs: &[Input<R>],
    info: &Mp4Info,
    mdat_offset: u64,
    media_len: u64,
) -> Result<Tree> {
    let mut tree = Tree::new();
    tree.create(None, FourCC::ftyp, info.file_type());
    let moov = tree.create_container(None, FourCC::moov);

    let first = &inputs[0];
    let source_mvhd = first
        .skeleton
        .child(Some(first.moov), FourCC::mvhd)
        .ok_or_else(|| Error::missing(FourCC::mvhd))?;
    let mvhd = tree.graft(Some(moov), &first.skeleton, source_mvhd);
    let movie_timescale = tree
        .get_as::<MovieHeaderBox>(mvhd)
        .map(|mvhd| mvhd.timescale)
        .ok_or_else(|| Error::missing(FourCC::mvhd))?;

    let mut movie_duration = 0;
    for (i, input) in inputs.iter().enumerate() {
        let trak = tree.graft(Some(moov), &input.skeleton, input.trak);
        fix_track(&mut tree, trak)?;

        let duration = input.tables.duration();
        let mdhd = tree
            .path(Some(trak), &[FourCC::mdia, FourCC::mdhd])
            .and_then(|mdhd| tree.get_as_mut::<MediaHeaderBox>(mdhd))
            .ok_or_else(|| Error::missing(FourCC::mdhd))?;
        mdhd.duration = duration;
        let track_duration = rescale(duration, mdhd.timescale, movie_timescale);
        movie_duration = movie_duration.max(track_duration);

        let tkhd = tree
            .child(Some(trak), FourCC::tkhd)
            .and_then(|tkhd| tree.get_as_mut::<TrackHeaderBox>(tkhd))
            .ok_or_else(|| Error::missing(FourCC::tkhd))?;
        tkhd.track_id = i as u32 + 1;
        tkhd.duration = track_duration;

        let stbl = tree
            .path(Some(trak), &[FourCC::mdia, FourCC::minf, FourCC::stbl])
            .ok_or_else(|| Error::missing(FourCC::stbl))?;
        input.tables.replace(&mut tree, stbl);
        debug!(
            track_id = i + 1,
            samples = input.tables.sample_sizes.len(),
            chunks = input.tables.chunk_offsets.len(),
            duration,
            "flattened track"
        );
    }

    if let Some(mvhd) = tree.get_as_mut::<MovieHeaderBox>(mvhd) {
        mvhd.next_track_id = inputs.len() as u32 + 1;
        mvhd.duration = movie_duration;
    }
    info.create_user_data(&mut tree, moov);
    tree.update();

    let mut mdat_header = BoxHeader::new(FourCC::mdat);
    mdat_header.set_payload_len(media_len);
    let gap = padding_len(tree.len() + mdat_header.header_len(), mdat_offset)?;
    if gap > 0 {
        tree.create(None, FourCC::free, FreeSpaceBox::zeroed(gap - 8));
    }
    tree.add(None, mdat_header, BoxData::MediaData);
    tree.update();
    Ok(tree)
}

/// Bytes left between the movie header and the media data, either none or room for a `free`
/// box.
fn padding_len(header_len: u64, mdat_offset: u64) -> Result<u64> {
    mdat_offset
        .checked_sub(header_len)
        .filter(|&gap| gap == 0 || gap >= 8)
        .ok_or(Error::HeaderOverflow {
            header: header_len,
            reserved: mdat_offset,
        })
}

fn rescale(duration: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    (duration as u128 * to as u128 / from as u128) as u64
}

/// Reads top-level boxes into `tree` until one of `box_type`, returning it with its offset.
///
/// Media data met on the way is skipped. Returns `None` at the end of the stream.
fn read_until<R: Read>(
    input: &mut Channel<R>,
    len: u64,
    tree: &mut Tree,
    box_type: FourCC,
    buf: &mut Vec<u8>,
) -> Result<Option<(BoxId, u64)>> {
    loop {
        let offset = input.count();
        let Some(id) = walk::read_next(input, tree, buf)? else {
            return Ok(None);
        };
        if tree.box_type(id) == box_type {
            return Ok(Some((id, offset)));
        }
        if tree.box_type(id) == FourCC::mdat {
            let payload_len = media_payload_len(tree, id, len, input.count())?;
            debug!(offset, payload_len, "skipping media data");
            io::skip(input, payload_len, buf)?;
        }
    }
}

fn media_payload_len(tree: &Tree, mdat: BoxId, len: u64, position: u64) -> Result<u64> {
    Ok(tree
        .header(mdat)
        .payload_len()?
        .unwrap_or_else(|| len.saturating_sub(position)))
}

/// A `moof` with the header of the `mdat` following it; the media data is still unread.
struct Fragment {
    tree: Tree,
    moof: BoxId,
    moof_offset: u64,
    payload_offset: u64,
    payload_len: u64,
    mdat_len: u64,
}

/// Remux state of one input.
struct Input<R> {
    input: Channel<R>,
    len: u64,
    skeleton: Tree,
    moov: BoxId,
    trak: BoxId,
    track_id: u32,
    trex: TrackExtendsBox,
    fragment: Option<Fragment>,
    exhausted: bool,
    tables: SampleTables,
}

impl<R: Read + Seek> Input<R> {
    fn open(source: FragmentSource<R>, buf: &mut Vec<u8>) -> Result<Self> {
        let mut input = Channel::new(source.input);
        let len = input.stream_len()?;
        let mut skeleton = Tree::new();
        let (moov, _) = read_until(&mut input, len, &mut skeleton, FourCC::moov, buf)?
            .ok_or_else(|| Error::missing(FourCC::moov))?;

        let trak = match source.track_id {
            Some(track_id) => {
                find_track(&skeleton, moov, track_id).ok_or(Error::TrackNotFound(track_id))?
            }
            None => skeleton
                .child(Some(moov), FourCC::trak)
                .ok_or_else(|| Error::missing(FourCC::trak))?,
        };
        let track_id = track_id(&skeleton, trak)?;

        let trexes: Vec<&TrackExtendsBox> = skeleton
            .child(Some(moov), FourCC::mvex)
            .map(|mvex| skeleton.children_of_type(Some(mvex), FourCC::trex))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|trex| skeleton.get_as::<TrackExtendsBox>(trex))
            .collect();
        let trex = trexes
            .iter()
            .find(|trex| trex.track_id == track_id)
            .or_else(|| trexes.first())
            .map(|&trex| trex.clone())
            .unwrap_or_else(|| TrackExtendsBox {
                track_id,
                ..Default::default()
            });
        debug!(track_id, len, ?trex, "opened fragmented input");

        Ok(Self {
            input,
            len,
            skeleton,
            moov,
            trak,
            track_id,
            trex,
            fragment: None,
            exhausted: false,
            tables: SampleTables::default(),
        })
    }

    fn next_fragment(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        match self.read_fragment(buf) {
            Ok(Some(fragment)) => self.fragment = Some(fragment),
            Ok(None) => self.exhausted = true,
            Err(error) if error.is_eof() => {
                warn!(
                    track_id = self.track_id,
                    offset = self.input.count(),
                    "fragmented input is truncated"
                );
                self.exhausted = true;
            }
            Err(error) => return Err(error),
        }
        Ok(())
    }

    fn read_fragment(&mut self, buf: &mut Vec<u8>) -> Result<Option<Fragment>> {
        if self.input.count() >= self.len {
            return Ok(None);
        }
        let mut tree = Tree::new();
        let Some((moof, moof_offset)) =
            read_until(&mut self.input, self.len, &mut tree, FourCC::moof, buf)?
        else {
            return Ok(None);
        };
        let Some((mdat, mdat_offset)) =
            read_until(&mut self.input, self.len, &mut tree, FourCC::mdat, buf)?
        else {
            warn!(track_id = self.track_id, moof_offset, "fragment without media data");
            return Ok(None);
        };

        let payload_offset = self.input.count();
        let payload_len = media_payload_len(&tree, mdat, self.len, payload_offset)?;
        if payload_offset + payload_len > self.len {
            warn!(
                track_id = self.track_id,
                moof_offset,
                missing = payload_offset + payload_len - self.len,
                "media data of the last fragment is truncated"
            );
            return Ok(None);
        }
        Ok(Some(Fragment {
            tree,
            moof,
            moof_offset,
            payload_offset,
            payload_len,
            mdat_len: payload_offset - mdat_offset + payload_len,
        }))
    }

    /// Appends the samples of the fragment to the tables and copies its media data.
    fn copy_fragment<W: Write>(
        &mut self,
        fragment: Fragment,
        output: &mut Channel<W>,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        let tree = &fragment.tree;
        let trafs = tree.children_of_type(Some(fragment.moof), FourCC::traf);
        let mut target = None;
        for &traf in &trafs {
            let tfhd = tree
                .child(Some(traf), FourCC::tfhd)
                .and_then(|tfhd| tree.get_as::<TrackFragmentHeaderBox>(tfhd))
                .ok_or_else(|| Error::missing(FourCC::tfhd))?;
            if tfhd.track_id == self.track_id {
                target = Some((traf, tfhd));
            }
        }
        let Some((traf, tfhd)) = target else {
            debug!(
                track_id = self.track_id,
                offset = fragment.moof_offset,
                "skipping fragment of another track"
            );
            io::skip(&mut self.input, fragment.payload_len, buf)?;
            return Ok(());
        };
        if trafs.len() > 1 {
            return Err(Error::unsupported(FourCC::traf, "interleaving"));
        }

        let truns: Vec<&TrackRunBox> = tree
            .children_of_type(Some(traf), FourCC::trun)
            .into_iter()
            .filter_map(|trun| tree.get_as::<TrackRunBox>(trun))
            .collect();

        // data offsets are relative to the moof unless the fragment names a base
        let base = tfhd.base_data_offset.unwrap_or(fragment.moof_offset) as i64;
        let skip = truns
            .first()
            .and_then(|trun| trun.data_offset)
            .map_or(0, |data_offset| {
                (base + data_offset as i64 - fragment.payload_offset as i64).max(0) as u64
            });
        if skip > fragment.payload_len {
            return Err(Error::malformed(
                FourCC::trun,
                format!(
                    "data offset points {skip} bytes into {} bytes of media data",
                    fragment.payload_len
                ),
            ));
        }

        let sample_count: usize = truns.iter().map(|trun| trun.entries.len()).sum();
        if sample_count > 0 {
            let sample_description_index = tfhd
                .sample_description_index
                .or(Some(self.trex.default_sample_description_index))
                .filter(|&index| index != 0)
                .unwrap_or(1);
            self.tables.add_chunk(
                output.count() + skip,
                sample_count as u32,
                sample_description_index,
            );
        }

        for trun in &truns {
            if trun
                .header
                .has_flag(TrackRunBox::SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT)
            {
                self.tables.has_composition_offsets = true;
            }
            for (i, entry) in trun.entries.iter().enumerate() {
                let duration = entry
                    .duration
                    .or(tfhd.default_sample_duration)
                    .unwrap_or(self.trex.default_sample_duration);
                let size = entry
                    .size
                    .or(tfhd.default_sample_size)
                    .unwrap_or(self.trex.default_sample_size);
                let flags = entry
                    .flags
                    .or(if i == 0 { trun.first_sample_flags } else { None })
                    .or(tfhd.default_sample_flags)
                    .unwrap_or(self.trex.default_sample_flags);
                self.tables.add_sample(
                    duration,
                    size,
                    entry.composition_offset.unwrap_or(0),
                    flags & SAMPLE_IS_NON_SYNC == 0,
                );
            }
        }

        io::copy(&mut self.input, output, fragment.payload_len, buf)?;
        Ok(())
    }
}

/// Sample tables of one output track, built up fragment by fragment.
#[derive(Debug, Default)]
struct SampleTables {
    sample_times: Vec<TimeToSampleEntry>,
    composition_offsets: Vec<CompositionOffsetEntry>,
    has_composition_offsets: bool,
    sync_samples: Vec<u32>,
    sample_sizes: Vec<u32>,
    chunk_samples: Vec<SampleToChunkEntry>,
    chunk_offsets: Vec<u64>,
}

impl SampleTables {
    fn add_sample(&mut self, duration: u32, size: u32, composition_offset: i64, sync: bool) {
        self.add_sample_time(duration);
        self.add_composition_offset(composition_offset);
        if sync {
            let sample_number = self.sample_sizes.len() as u32 + 1;
            self.sync_samples.push(sample_number);
        }
        self.sample_sizes.push(size);
    }

    fn add_sample_time(&mut self, duration: u32) {
        if let Some(entry) = self.sample_times.last_mut() {
            if entry.sample_delta == duration {
                entry.sample_count += 1;
                return;
            }
        }

        self.sample_times.push(TimeToSampleEntry {
            sample_count: 1,
            sample_delta: duration,
        });
    }

    fn add_composition_offset(&mut self, offset: i64) {
        if let Some(entry) = self.composition_offsets.last_mut() {
            if entry.sample_offset == offset {
                entry.sample_count += 1;
                return;
            }
        }

        self.composition_offsets.push(CompositionOffsetEntry {
            sample_count: 1,
            sample_offset: offset,
        });
    }

    fn add_chunk(&mut self, offset: u64, sample_count: u32, sample_description_index: u32) {
        self.chunk_samples.push(SampleToChunkEntry {
            first_chunk: self.chunk_offsets.len() as u32 + 1,
            samples_per_chunk: sample_count,
            sample_description_index,
        });
        self.chunk_offsets.push(offset);
    }

    fn duration(&self) -> u64 {
        self.sample_times
            .iter()
            .map(|entry| entry.sample_count as u64 * entry.sample_delta as u64)
            .sum()
    }

    /// Swaps the sample tables below `stbl` for the accumulated ones.
    fn replace(&self, tree: &mut Tree, stbl: BoxId) {
        for child in tree.children(stbl).to_vec() {
            if matches!(
                tree.box_type(child),
                FourCC::stts
                    | FourCC::ctts
                    | FourCC::stss
                    | FourCC::stsc
                    | FourCC::stsz
                    | FourCC::stz2
            ) {
                tree.detach(child);
            }
        }

        let stts = TimeToSampleBox {
            entries: self.sample_times.clone(),
            ..Default::default()
        };
        tree.create(Some(stbl), FourCC::stts, stts);
        if self.has_composition_offsets {
            let ctts = CompositionOffsetBox {
                entries: self.composition_offsets.clone(),
                ..Default::default()
            };
            tree.create(Some(stbl), FourCC::ctts, ctts);
        }
        if self.sync_samples.len() != self.sample_sizes.len() {
            let stss = SyncSampleBox {
                sample_numbers: self.sync_samples.clone(),
                ..Default::default()
            };
            tree.create(Some(stbl), FourCC::stss, stss);
        }
        let stsc = SampleToChunkBox {
            entries: self.chunk_samples.clone(),
            ..Default::default()
        };
        tree.create(Some(stbl), FourCC::stsc, stsc);
        let stsz = SampleSizeBox {
            sample_size: 0,
            sample_count: self.sample_sizes.len() as u32,
            entry_sizes: self.sample_sizes.clone(),
            ..Default::default()
        };
        tree.create(Some(stbl), FourCC::stsz, stsz);
        set_chunk_offsets(tree, stbl, self.chunk_offsets.clone());
    }
}

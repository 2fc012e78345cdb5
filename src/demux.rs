//! Track extraction and fragment remuxing into a single, regular movie.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Seek},
    path::Path,
};

use tracing::{info, warn};

use crate::{
    channel::Channel,
    io,
    marshal::FourCC,
    r#box::{ChunkLargeOffsetBox, ChunkOffsetBox, MediaHeaderBox, TrackHeaderBox},
    tree::{BoxId, Tree},
    walk::{self, Walk},
    Error, Result,
};

pub use self::{
    fragment::{remux_fragments, FragmentSource},
    info::Mp4Info,
    simple::extract_track,
};

mod fragment;
mod info;
mod simple;

/// Bytes reserved before the media data for the movie header, on top of the estimate from the
/// fragment headers.
pub const HEADER_HEADROOM: u64 = 100_000;

/// Room reserved per fragment header when estimating the size of the flattened movie header.
pub const FRAGMENT_HEADER_FACTOR: u64 = 4;

/// Receives the number of input bytes consumed so far.
pub trait ProgressListener {
    fn on_bytes_read(&mut self, total: u64);
}

impl<F: FnMut(u64)> ProgressListener for F {
    fn on_bytes_read(&mut self, total: u64) {
        self(total)
    }
}

/// Reads the top-level boxes up to and including `moov`, skipping any media data in front of it.
pub(crate) fn read_movie<R: Read>(
    input: &mut Channel<R>,
    buf: &mut Vec<u8>,
) -> Result<(Tree, BoxId)> {
    let mut tree = Tree::new();
    let mut listener = |tree: &Tree, id: BoxId| {
        if tree.parent(id).is_none()
            && tree.box_type(id) != FourCC::moov
            && tree.child(None, FourCC::moov).is_some()
        {
            Walk::Stop
        } else {
            Walk::Continue
        }
    };
    walk::read(input, None, None, &mut tree, buf, &mut listener)?;
    let moov = tree
        .child(None, FourCC::moov)
        .ok_or_else(|| Error::missing(FourCC::moov))?;
    Ok((tree, moov))
}

/// The track of `moov` with the given id.
pub(crate) fn find_track(tree: &Tree, moov: BoxId, track_id: u32) -> Option<BoxId> {
    tree.children_of_type(Some(moov), FourCC::trak)
        .into_iter()
        .find(|&trak| {
            tree.child(Some(trak), FourCC::tkhd)
                .and_then(|tkhd| tree.get_as::<TrackHeaderBox>(tkhd))
                .is_some_and(|tkhd| tkhd.track_id == track_id)
        })
}

pub(crate) fn track_id(tree: &Tree, trak: BoxId) -> Result<u32> {
    tree.child(Some(trak), FourCC::tkhd)
        .and_then(|tkhd| tree.get_as::<TrackHeaderBox>(tkhd))
        .map(|tkhd| tkhd.track_id)
        .ok_or_else(|| Error::missing(FourCC::tkhd))
}

/// Marks the track as enabled and visible in every context, and tags its media as English.
pub(crate) fn fix_track(tree: &mut Tree, trak: BoxId) -> Result<()> {
    let tkhd = tree
        .child(Some(trak), FourCC::tkhd)
        .ok_or_else(|| Error::missing(FourCC::tkhd))?;
    if let Some(tkhd) = tree.get_as_mut::<TrackHeaderBox>(tkhd) {
        tkhd.header.flags |= TrackHeaderBox::ENABLED
            | TrackHeaderBox::IN_MOVIE
            | TrackHeaderBox::IN_PREVIEW
            | TrackHeaderBox::IN_POSTER;
    }

    let mdhd = tree
        .path(Some(trak), &[FourCC::mdia, FourCC::mdhd])
        .ok_or_else(|| Error::missing(FourCC::mdhd))?;
    if let Some(mdhd) = tree.get_as_mut::<MediaHeaderBox>(mdhd) {
        mdhd.language = "eng".parse()?;
    }
    Ok(())
}

/// Replaces the chunk offset table of `stbl`, using `co64` when an offset needs 64 bits.
pub(crate) fn set_chunk_offsets(tree: &mut Tree, stbl: BoxId, chunk_offsets: Vec<u64>) {
    for child in tree.children(stbl).to_vec() {
        if matches!(tree.box_type(child), FourCC::stco | FourCC::co64) {
            tree.detach(child);
        }
    }
    if chunk_offsets.iter().all(|&offset| offset <= u32::MAX as u64) {
        let stco = ChunkOffsetBox {
            chunk_offsets: chunk_offsets.into_iter().map(|offset| offset as u32).collect(),
            ..Default::default()
        };
        tree.create(Some(stbl), FourCC::stco, stco);
    } else {
        let co64 = ChunkLargeOffsetBox {
            chunk_offsets,
            ..Default::default()
        };
        tree.create(Some(stbl), FourCC::co64, co64);
    }
}

/// Writes the output tree, checking that the media data starts exactly at `mdat_offset`.
pub(crate) fn write_header<W: std::io::Write>(
    output: &mut Channel<W>,
    tree: &Tree,
    mdat_offset: u64,
    buf: &mut Vec<u8>,
) -> Result<()> {
    let start = output.count();
    walk::write(output, tree, tree.roots(), buf, &mut |_, _| Walk::Continue)?;
    let header = output.count() - start;
    if header != mdat_offset {
        return Err(Error::HeaderOverflow {
            header,
            reserved: mdat_offset,
        });
    }
    Ok(())
}

/// Creates `path`, runs `f` on it and removes the file again if `f` fails.
fn with_output<T>(path: &Path, f: impl FnOnce(BufWriter<File>) -> Result<T>) -> Result<T> {
    let output = BufWriter::with_capacity(io::BUFFER_SIZE, File::create(path)?);
    let result = f(output);
    if result.is_err() {
        if let Err(error) = fs::remove_file(path) {
            warn!(path = %path.display(), %error, "failed to remove partial output");
        }
    }
    result
}

fn open(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::with_capacity(io::BUFFER_SIZE, File::open(path)?))
}

pub fn extract_track_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    track_id: u32,
    info: &Mp4Info,
    progress: &mut dyn ProgressListener,
) -> Result<()> {
    let input = open(input.as_ref())?;
    with_output(output.as_ref(), |output| {
        extract_track(input, output, track_id, info, progress)
    })
}

pub fn remux_fragments_file<P: AsRef<Path>>(
    inputs: &[P],
    output: impl AsRef<Path>,
    info: &Mp4Info,
    progress: &mut dyn ProgressListener,
) -> Result<()> {
    let sources = inputs
        .iter()
        .map(|input| open(input.as_ref()).map(FragmentSource::new))
        .collect::<Result<Vec<_>>>()?;
    with_output(output.as_ref(), |output| {
        remux_fragments(sources, output, info, progress)
    })
}

/// Extracts the first sound track of a regular or fragmented movie.
pub fn extract_audio_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    info: &Mp4Info,
    progress: &mut dyn ProgressListener,
) -> Result<()> {
    let mut input = open(input.as_ref())?;
    let (tree, moov) = read_movie(&mut Channel::new(&mut input), &mut io::buffer())?;
    input.rewind()?;

    let smhd = tree
        .find_first(Some(moov), FourCC::smhd)
        .ok_or_else(|| Error::missing(FourCC::smhd))?;
    let trak = tree
        .ancestor(smhd, FourCC::trak)
        .ok_or_else(|| Error::missing(FourCC::trak))?;
    let track_id = track_id(&tree, trak)?;
    let fragmented = tree.child(Some(moov), FourCC::mvex).is_some();
    info!(track_id, fragmented, "extracting audio");

    with_output(output.as_ref(), |output| {
        if fragmented {
            let source = FragmentSource::with_track(input, track_id);
            remux_fragments(vec![source], output, info, progress)
        } else {
            extract_track(input, output, track_id, info, progress)
        }
    })
}

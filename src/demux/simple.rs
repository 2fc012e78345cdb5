use std::io::{Read, Seek, Write};

use tracing::{debug, info};

use crate::{
    channel::Channel,
    demux::{
        find_track, fix_track, read_movie, set_chunk_offsets, write_header, Mp4Info,
        ProgressListener,
    },
    io,
    marshal::FourCC,
    r#box::{
        BoxData, BoxHeader, ChunkLargeOffsetBox, ChunkOffsetBox, CompactSampleSizeBox,
        SampleSizeBox, SampleToChunkBox,
    },
    tree::{BoxId, Tree},
    Error, Result,
};

/// Writes a movie holding only the track `track_id` of a regular (non-fragmented) movie.
///
/// The chunks of the track are copied in order and packed right after the movie header, every
/// other top-level box is dropped.
pub fn extract_track<R: Read + Seek, W: Write>(
    input: R,
    output: W,
    track_id: u32,
    info: &Mp4Info,
    progress: &mut dyn ProgressListener,
) -> Result<()> {
    let mut input = Channel::new(input);
    let mut output = Channel::new(output);
    let mut buf = io::buffer();

    let (mut tree, moov) = read_movie(&mut input, &mut buf)?;
    progress.on_bytes_read(input.count());
    let trak = find_track(&tree, moov, track_id).ok_or(Error::TrackNotFound(track_id))?;
    let stbl = tree
        .path(Some(trak), &[FourCC::mdia, FourCC::minf, FourCC::stbl])
        .ok_or_else(|| Error::missing(FourCC::stbl))?;

    let source_offsets = chunk_offsets(&tree, stbl)?;
    let stsc = tree
        .child(Some(stbl), FourCC::stsc)
        .and_then(|stsc| tree.get_as::<SampleToChunkBox>(stsc))
        .ok_or_else(|| Error::missing(FourCC::stsc))?;
    let chunk_sizes = chunk_sizes(
        stsc,
        &sample_sizes(&tree, stbl)?,
        source_offsets.len() as u32,
    )?;
    let media_len: u64 = chunk_sizes.iter().sum();
    info!(track_id, chunks = chunk_sizes.len(), media_len, "extracting track");

    for child in tree.children(moov).to_vec() {
        let box_type = tree.box_type(child);
        if (box_type == FourCC::trak && child != trak) || box_type == FourCC::udta {
            tree.detach(child);
        }
    }

    let mut out = Tree::new();
    out.create(None, FourCC::ftyp, info.file_type());
    let out_moov = out.graft(None, &tree, moov);
    let out_trak = out
        .child(Some(out_moov), FourCC::trak)
        .ok_or_else(|| Error::missing(FourCC::trak))?;
    fix_track(&mut out, out_trak)?;
    info.create_user_data(&mut out, out_moov);
    let out_stbl = out
        .path(Some(out_trak), &[FourCC::mdia, FourCC::minf, FourCC::stbl])
        .ok_or_else(|| Error::missing(FourCC::stbl))?;

    let mut mdat_header = BoxHeader::new(FourCC::mdat);
    mdat_header.set_payload_len(media_len);
    out.add(None, mdat_header, BoxData::MediaData);

    let base = lay_out(&mut out, out_stbl, &chunk_sizes);
    debug!(header = base, "movie header laid out");

    write_header(&mut output, &out, base, &mut buf)?;
    for (&offset, &size) in source_offsets.iter().zip(&chunk_sizes) {
        if input.count() != offset {
            input.seek_to(offset)?;
        }
        io::copy(&mut input, &mut output, size, &mut buf)?;
        progress.on_bytes_read(input.count());
    }
    output.flush()?;

    info!(track_id, len = output.count(), "extracted track");
    Ok(())
}

/// Points the chunk offsets of `stbl` at the chunks packed right behind the header of `out`,
/// returning the header length.
///
/// `out` must end with the `mdat` header for all chunks.
fn lay_out(out: &mut Tree, stbl: BoxId, chunk_sizes: &[u64]) -> u64 {
    let media_len: u64 = chunk_sizes.iter().sum();
    // the offset table may grow into co64, which moves the media again
    let mut base = 0;
    loop {
        set_chunk_offsets(out, stbl, packed_offsets(base, chunk_sizes));
        out.update();
        let header = out.len() - media_len;
        if header == base {
            return base;
        }
        base = header;
    }
}

/// Offsets of chunks stored back to back from `base`.
fn packed_offsets(base: u64, chunk_sizes: &[u64]) -> Vec<u64> {
    chunk_sizes
        .iter()
        .scan(base, |offset, &size| {
            let chunk_offset = *offset;
            *offset += size;
            Some(chunk_offset)
        })
        .collect()
}

fn chunk_offsets(tree: &Tree, stbl: BoxId) -> Result<Vec<u64>> {
    if let Some(stco) = tree
        .child(Some(stbl), FourCC::stco)
        .and_then(|stco| tree.get_as::<ChunkOffsetBox>(stco))
    {
        return Ok(stco.chunk_offsets.iter().map(|&offset| offset as u64).collect());
    }
    tree.child(Some(stbl), FourCC::co64)
        .and_then(|co64| tree.get_as::<ChunkLargeOffsetBox>(co64))
        .map(|co64| co64.chunk_offsets.clone())
        .ok_or_else(|| Error::missing(FourCC::stco))
}

fn sample_sizes(tree: &Tree, stbl: BoxId) -> Result<Vec<u32>> {
    if let Some(stsz) = tree
        .child(Some(stbl), FourCC::stsz)
        .and_then(|stsz| tree.get_as::<SampleSizeBox>(stsz))
    {
        return Ok((0..stsz.sample_count())
            .filter_map(|sample| stsz.get(sample))
            .collect());
    }
    tree.child(Some(stbl), FourCC::stz2)
        .and_then(|stz2| tree.get_as::<CompactSampleSizeBox>(stz2))
        .map(|stz2| stz2.entry_sizes.iter().map(|&size| size as u32).collect())
        .ok_or_else(|| Error::missing(FourCC::stsz))
}

/// Byte size of each chunk, summing the sizes of the samples it holds.
pub(crate) fn chunk_sizes(
    stsc: &SampleToChunkBox,
    sample_sizes: &[u32],
    chunk_count: u32,
) -> Result<Vec<u64>> {
    let mut samples = sample_sizes.iter();
    let mut chunk_sizes = Vec::with_capacity(chunk_count as usize);
    for samples_per_chunk in stsc.samples_per_chunk(chunk_count)? {
        let mut chunk_size = 0;
        for _ in 0..samples_per_chunk {
            let &sample_size = samples.next().ok_or_else(|| {
                Error::malformed(
                    FourCC::stsz,
                    format!("{} samples are fewer than the chunks hold", sample_sizes.len()),
                )
            })?;
            chunk_size += sample_size as u64;
        }
        chunk_sizes.push(chunk_size);
    }
    if samples.len() != 0 {
        return Err(Error::malformed(
            FourCC::stsz,
            format!("{} samples are not in any chunk", samples.len()),
        ));
    }
    Ok(chunk_sizes)
}

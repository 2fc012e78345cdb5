use std::{fs, io::Cursor};

use isomux::{
    r#box::{
        ChunkLargeOffsetBox, ChunkOffsetBox, CompactSampleSizeBox, FileTypeBox, HandlerBox,
        MediaHeaderBox, SampleSizeBox, TrackHeaderBox,
    },
    BoxId, Error, FourCC, Mp4Info, Tree,
};
use tempfile::TempDir;

mod common;

use common::{movie, read_tree, TrackSpec};

fn tracks() -> Vec<TrackSpec> {
    vec![
        TrackSpec::audio(1, &[2, 2, 1]),
        TrackSpec::video(2, &[3, 3]),
        TrackSpec::video(3, &[1, 4]),
    ]
}

fn info() -> Mp4Info {
    Mp4Info::audio(
        Some("Title".to_owned()),
        Some("Artist".to_owned()),
        None,
        None,
    )
}

fn extract(data: &[u8], track_id: u32, info: &Mp4Info) -> isomux::Result<Vec<u8>> {
    let mut output = Vec::new();
    isomux::extract_track(Cursor::new(data), &mut output, track_id, info, &mut |_: u64| {})?;
    Ok(output)
}

fn single_track(tree: &Tree) -> BoxId {
    let traks = tree.find(None, FourCC::trak);
    assert_eq!(traks.len(), 1);
    traks[0]
}

/// Media bytes of the track in `data`, read through its chunk offsets and sample sizes.
fn track_media(data: &[u8], tree: &Tree, trak: BoxId) -> Vec<u8> {
    let stbl = tree
        .path(Some(trak), &[FourCC::mdia, FourCC::minf, FourCC::stbl])
        .unwrap();
    let stco = tree
        .get_as::<ChunkOffsetBox>(tree.child(Some(stbl), FourCC::stco).unwrap())
        .unwrap();
    let stsz = tree
        .get_as::<SampleSizeBox>(tree.child(Some(stbl), FourCC::stsz).unwrap())
        .unwrap();
    let chunk_len: usize = stsz.entry_sizes.iter().map(|&size| size as usize).sum();
    // packed chunks, so the first offset and the total length suffice
    let start = stco.chunk_offsets[0] as usize;
    data[start..start + chunk_len].to_vec()
}

/// `data` with the sample table of track `track_id` changed by `edit`.
///
/// The movie must come last in `data`, so its size does not move the media.
fn edit_sample_table(data: &[u8], track_id: u32, edit: impl FnOnce(&mut Tree, BoxId)) -> Vec<u8> {
    let mut tree = read_tree(data);
    let moov = tree.child(None, FourCC::moov).unwrap();
    assert_eq!(tree.roots().last(), Some(&moov));
    let moov_len = tree.header(moov).total_len().unwrap() as usize;
    let trak = tree
        .children_of_type(Some(moov), FourCC::trak)
        .into_iter()
        .find(|&trak| {
            let tkhd = tree.child(Some(trak), FourCC::tkhd).unwrap();
            tree.get_as::<TrackHeaderBox>(tkhd).unwrap().track_id == track_id
        })
        .unwrap();
    let stbl = tree
        .path(Some(trak), &[FourCC::mdia, FourCC::minf, FourCC::stbl])
        .unwrap();
    edit(&mut tree, stbl);
    tree.update();

    let mut edited = data[..data.len() - moov_len].to_vec();
    edited.extend(common::write_boxes(&tree, &[moov]));
    edited
}

#[test]
fn extracts_the_audio_track() {
    let tracks = tracks();
    let data = movie(&tracks, true);
    let output = extract(&data, 1, &info()).unwrap();

    let tree = read_tree(&output);
    let roots: Vec<FourCC> = tree.roots().iter().map(|&id| tree.box_type(id)).collect();
    assert_eq!(roots, [FourCC::ftyp, FourCC::moov, FourCC::mdat]);

    let ftyp = tree.get_as::<FileTypeBox>(tree.roots()[0]).unwrap();
    assert_eq!(ftyp.major_brand, FourCC::M4A_);
    assert_eq!(
        ftyp.compatible_brands,
        [FourCC::M4A_, FourCC::mp42, FourCC::isom, FourCC::new(&[0; 4])]
    );

    let trak = single_track(&tree);
    let hdlr = tree.path(Some(trak), &[FourCC::mdia, FourCC::hdlr]).unwrap();
    assert_eq!(tree.get_as::<HandlerBox>(hdlr).unwrap().handler_type, FourCC::soun);
    assert_eq!(track_media(&output, &tree, trak), tracks[0].media());

    let mdat = tree.roots()[2];
    assert_eq!(
        tree.header(mdat).payload_len().unwrap(),
        Some(tracks[0].media().len() as u64)
    );
    assert_eq!(tree.len(), output.len() as u64);
}

#[test]
fn extracted_chunks_are_packed() {
    let tracks = tracks();
    let data = movie(&tracks, false);
    let output = extract(&data, 3, &Mp4Info::default()).unwrap();

    let tree = read_tree(&output);
    let trak = single_track(&tree);
    let stbl = tree
        .path(Some(trak), &[FourCC::mdia, FourCC::minf, FourCC::stbl])
        .unwrap();
    let stco = tree
        .get_as::<ChunkOffsetBox>(tree.child(Some(stbl), FourCC::stco).unwrap())
        .unwrap();

    let mdat = tree.child(None, FourCC::mdat).unwrap();
    let mdat_start: u64 = tree
        .roots()
        .iter()
        .take_while(|&&id| id != mdat)
        .map(|&id| tree.header(id).total_len().unwrap())
        .sum();
    let chunk_sizes: Vec<u32> = tracks[2]
        .chunks
        .iter()
        .map(|chunk| chunk.iter().map(|sample| sample.len() as u32).sum())
        .collect();
    assert_eq!(
        stco.chunk_offsets,
        [
            (mdat_start + 8) as u32,
            (mdat_start + 8) as u32 + chunk_sizes[0]
        ]
    );
    assert_eq!(track_media(&output, &tree, trak), tracks[2].media());

    let ftyp = tree.get_as::<FileTypeBox>(tree.roots()[0]).unwrap();
    assert_eq!(ftyp.major_brand, FourCC::isom);
    assert_eq!(ftyp.compatible_brands, [FourCC::isom, FourCC::mp42]);
}

#[test]
fn extracts_from_large_chunk_offsets() {
    let tracks = tracks();
    let data = edit_sample_table(&movie(&tracks, false), 2, |tree, stbl| {
        let stco = tree.child(Some(stbl), FourCC::stco).unwrap();
        let chunk_offsets = tree
            .get_as::<ChunkOffsetBox>(stco)
            .unwrap()
            .chunk_offsets
            .iter()
            .map(|&offset| offset as u64)
            .collect();
        tree.detach(stco);
        tree.create(
            Some(stbl),
            FourCC::co64,
            ChunkLargeOffsetBox {
                chunk_offsets,
                ..Default::default()
            },
        );
    });
    assert!(read_tree(&data).find_first(None, FourCC::co64).is_some());

    let output = extract(&data, 2, &info()).unwrap();
    let tree = read_tree(&output);
    let trak = single_track(&tree);
    assert!(tree.find(Some(trak), FourCC::co64).is_empty());
    assert_eq!(track_media(&output, &tree, trak), tracks[1].media());
}

#[test]
fn extracts_from_compact_sample_sizes() {
    let tracks = tracks();
    let data = edit_sample_table(&movie(&tracks, false), 1, |tree, stbl| {
        let stsz = tree.child(Some(stbl), FourCC::stsz).unwrap();
        tree.detach(stsz);
        tree.create(
            Some(stbl),
            FourCC::stz2,
            CompactSampleSizeBox {
                field_size: 8,
                entry_sizes: tracks[0].sample_sizes().iter().map(|&size| size as u16).collect(),
                ..Default::default()
            },
        );
    });

    let output = extract(&data, 1, &info()).unwrap();
    let tree = read_tree(&output);
    let trak = single_track(&tree);
    let stbl = tree
        .path(Some(trak), &[FourCC::mdia, FourCC::minf, FourCC::stbl])
        .unwrap();
    let stz2 = tree.child(Some(stbl), FourCC::stz2).unwrap();
    assert_eq!(
        tree.get_as::<CompactSampleSizeBox>(stz2).unwrap().entry_sizes.len(),
        tracks[0].sample_sizes().len()
    );

    let stco = tree
        .get_as::<ChunkOffsetBox>(tree.child(Some(stbl), FourCC::stco).unwrap())
        .unwrap();
    let start = stco.chunk_offsets[0] as usize;
    let media = tracks[0].media();
    assert_eq!(output[start..start + media.len()], media[..]);
}

#[test]
fn extracted_track_is_enabled_and_english() {
    let output = extract(&movie(&tracks(), true), 2, &info()).unwrap();
    let tree = read_tree(&output);
    let trak = single_track(&tree);

    let tkhd = tree.child(Some(trak), FourCC::tkhd).unwrap();
    let tkhd = tree.get_as::<TrackHeaderBox>(tkhd).unwrap();
    assert_eq!(tkhd.track_id, 2);
    assert_eq!(tkhd.header.flags & 0xF, 0xF);

    let mdhd = tree.path(Some(trak), &[FourCC::mdia, FourCC::mdhd]).unwrap();
    let mdhd = tree.get_as::<MediaHeaderBox>(mdhd).unwrap();
    assert_eq!(mdhd.language.code(), "eng");
}

#[test]
fn user_data_is_replaced() {
    let output = extract(&movie(&tracks(), true), 1, &info()).unwrap();
    let tree = read_tree(&output);
    assert_eq!(tree.find(None, FourCC::udta).len(), 1);

    let tags = isomux::read_tags(&tree);
    assert_eq!(tags.title.as_deref(), Some("Title"));
    assert_eq!(tags.artist.as_deref(), Some("Artist"));
    assert_eq!(tags.album, None);
    assert_eq!(tags.duration, Some(5));

    let hdlr = tree
        .path(None, &[FourCC::moov, FourCC::udta, FourCC::meta, FourCC::hdlr])
        .unwrap();
    assert_eq!(tree.get_as::<HandlerBox>(hdlr).unwrap().handler_type, FourCC::mdir);
}

#[test]
fn unknown_track_fails() {
    let result = extract(&movie(&tracks(), true), 7, &info());
    assert!(matches!(result, Err(Error::TrackNotFound(7))));
}

#[test]
fn missing_movie_fails() {
    let data = common::media_data(&[0; 16]);
    let result = extract(&data, 1, &info());
    assert!(matches!(
        result,
        Err(Error::InvalidBoxQuantity { box_type, quantity: 0, .. }) if box_type == FourCC::moov
    ));
}

#[test]
fn failed_extraction_removes_the_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.mp4");
    let output = dir.path().join("output.m4a");
    fs::write(&input, movie(&tracks(), true)).unwrap();

    let result = isomux::extract_track_file(&input, &output, 9, &info(), &mut |_: u64| {});
    assert!(matches!(result, Err(Error::TrackNotFound(9))));
    assert!(!output.exists());
}

#[test]
fn extracts_the_first_sound_track_of_a_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.mp4");
    let output = dir.path().join("output.m4a");
    let tracks = vec![
        TrackSpec::video(1, &[2, 2]),
        TrackSpec::audio(2, &[1, 3]),
        TrackSpec::audio(3, &[1]),
    ];
    fs::write(&input, movie(&tracks, false)).unwrap();

    let mut reported = Vec::new();
    isomux::extract_audio_file(&input, &output, &info(), &mut |total: u64| reported.push(total))
        .unwrap();
    assert!(!reported.is_empty());
    assert!(reported.windows(2).all(|pair| pair[0] <= pair[1]));

    let data = fs::read(&output).unwrap();
    let tree = read_tree(&data);
    let trak = single_track(&tree);
    let tkhd = tree.child(Some(trak), FourCC::tkhd).unwrap();
    assert_eq!(tree.get_as::<TrackHeaderBox>(tkhd).unwrap().track_id, 2);
    assert_eq!(track_media(&data, &tree, trak), tracks[1].media());

    let tags = isomux::read_tags_file(&output).unwrap();
    assert_eq!(tags.title.as_deref(), Some("Title"));
}

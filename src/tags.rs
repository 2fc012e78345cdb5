//! iTunes metadata of a movie.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use crate::{
    channel::Channel,
    demux::read_movie,
    io,
    marshal::FourCC,
    r#box::{AppleItemBox, MovieHeaderBox},
    tree::Tree,
    Result,
};

/// ID3v1 genres including the Winamp extensions, `gnre` values index this table from 1.
const ID3_GENRES: [&str; 148] = [
    "Blues",
    "Classic Rock",
    "Country",
    "Dance",
    "Disco",
    "Funk",
    "Grunge",
    "Hip-Hop",
    "Jazz",
    "Metal",
    "New Age",
    "Oldies",
    "Other",
    "Pop",
    "R&B",
    "Rap",
    "Reggae",
    "Rock",
    "Techno",
    "Industrial",
    "Alternative",
    "Ska",
    "Death Metal",
    "Pranks",
    "Soundtrack",
    "Euro-Techno",
    "Ambient",
    "Trip-Hop",
    "Vocal",
    "Jazz+Funk",
    "Fusion",
    "Trance",
    "Classical",
    "Instrumental",
    "Acid",
    "House",
    "Game",
    "Sound Clip",
    "Gospel",
    "Noise",
    "AlternRock",
    "Bass",
    "Soul",
    "Punk",
    "Space",
    "Meditative",
    "Instrumental Pop",
    "Instrumental Rock",
    "Ethnic",
    "Gothic",
    "Darkwave",
    "Techno-Industrial",
    "Electronic",
    "Pop-Folk",
    "Eurodance",
    "Dream",
    "Southern Rock",
    "Comedy",
    "Cult",
    "Gangsta",
    "Top 40",
    "Christian Rap",
    "Pop/Funk",
    "Jungle",
    "Native American",
    "Cabaret",
    "New Wave",
    "Psychadelic",
    "Rave",
    "Showtunes",
    "Trailer",
    "Lo-Fi",
    "Tribal",
    "Acid Punk",
    "Acid Jazz",
    "Polka",
    "Retro",
    "Musical",
    "Rock & Roll",
    "Hard Rock",
    "Folk",
    "Folk-Rock",
    "National Folk",
    "Swing",
    "Fast Fusion",
    "Bebob",
    "Latin",
    "Revival",
    "Celtic",
    "Bluegrass",
    "Avantgarde",
    "Gothic Rock",
    "Progressive Rock",
    "Psychedelic Rock",
    "Symphonic Rock",
    "Slow Rock",
    "Big Band",
    "Chorus",
    "Easy Listening",
    "Acoustic",
    "Humour",
    "Speech",
    "Chanson",
    "Opera",
    "Chamber Music",
    "Sonata",
    "Symphony",
    "Booty Bass",
    "Primus",
    "Porn Groove",
    "Satire",
    "Slow Jam",
    "Club",
    "Tango",
    "Samba",
    "Folklore",
    "Ballad",
    "Power Ballad",
    "Rhythmic Soul",
    "Freestyle",
    "Duet",
    "Punk Rock",
    "Drum Solo",
    "A capella",
    "Euro-House",
    "Dance Hall",
    "Goa",
    "Drum & Bass",
    "Club-House",
    "Hardcore",
    "Terror",
    "Indie",
    "Britpop",
    "",
    "Polsk Punk",
    "Beat",
    "Christian Gangsta",
    "Heavy Metal",
    "Black Metal",
    "Crossover",
    "Contemporary Christian",
    "Christian Rock",
    "Merengue",
    "Salsa",
    "Thrash Metal",
    "Anime",
    "JPop",
    "Synthpop",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverFormat {
    Jpeg,
    Png,
    /// Any other `data` type code.
    Other(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverArt {
    pub format: CoverFormat,
    pub data: Vec<u8>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Mp4Tags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub comment: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub cover: Option<CoverArt>,
    /// Whole seconds.
    pub duration: Option<u64>,
}

/// Collects the tags of the first item list and the duration of the movie in `tree`.
pub fn read_tags(tree: &Tree) -> Mp4Tags {
    let duration = tree
        .path(None, &[FourCC::moov, FourCC::mvhd])
        .and_then(|mvhd| tree.get_as::<MovieHeaderBox>(mvhd))
        .filter(|mvhd| mvhd.timescale != 0)
        .map(|mvhd| mvhd.duration / mvhd.timescale as u64);

    let Some(ilst) = tree.find_first(None, FourCC::ilst) else {
        return Mp4Tags {
            duration,
            ..Default::default()
        };
    };
    let item = |box_type: FourCC| {
        tree.child(Some(ilst), box_type)
            .and_then(|item| tree.get_as::<AppleItemBox>(item))
    };
    let text = |box_type: FourCC| item(box_type).and_then(AppleItemBox::text);

    let genre = item(FourCC::gnre)
        .and_then(AppleItemBox::integer)
        .and_then(|index| ID3_GENRES.get(usize::try_from(index).ok()?.checked_sub(1)?))
        .filter(|genre| !genre.is_empty())
        .map(|genre| genre.to_string())
        .or_else(|| text(FourCC::Cgen));

    let cover = item(FourCC::covr).map(|covr| CoverArt {
        format: match covr.data_type {
            AppleItemBox::JPEG => CoverFormat::Jpeg,
            AppleItemBox::PNG => CoverFormat::Png,
            data_type => CoverFormat::Other(data_type),
        },
        data: covr.value.clone(),
    });

    Mp4Tags {
        title: text(FourCC::Cnam),
        artist: text(FourCC::CART),
        album: text(FourCC::Calb),
        comment: text(FourCC::Ccmt),
        year: text(FourCC::Cday),
        genre,
        cover,
        duration,
    }
}

pub fn read_tags_from<R: Read>(input: R) -> Result<Mp4Tags> {
    let (tree, _) = read_movie(&mut Channel::new(input), &mut io::buffer())?;
    Ok(read_tags(&tree))
}

pub fn read_tags_file(path: impl AsRef<Path>) -> Result<Mp4Tags> {
    read_tags_from(BufReader::new(File::open(path)?))
}

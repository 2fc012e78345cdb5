//! Reader, writer and remuxer for the ISO base media file format (MP4, M4A).
//!
//! Files are parsed into an arena [`Tree`] of boxes without buffering media data. The tree can be
//! mutated and written back, a single track can be extracted from a regular movie, and fragmented
//! movies can be flattened into one seekable file.

use thiserror::Error;

pub use crate::{
    demux::{
        extract_audio_file, extract_track, extract_track_file, remux_fragments,
        remux_fragments_file, FragmentSource, Mp4Info, ProgressListener,
    },
    file::{count, count_file, free, free_file, head, head_file},
    marshal::{FourCC, Language},
    r#box::{BoxData, BoxHeader},
    tags::{read_tags, read_tags_file, CoverArt, CoverFormat, Mp4Tags},
    tree::{BoxId, Tree},
    walk::{BoxListener, Walk},
};

pub mod channel;
pub mod demux;
pub mod file;
pub mod io;
pub mod marshal;
pub mod r#box;
pub mod tags;
pub mod tree;
pub mod walk;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Malformed {box_type} box: {reason}")]
    Malformed { box_type: FourCC, reason: String },

    #[error("Box {box_type} declares {declared} bytes, but {actual} were written")]
    SizeMismatch {
        box_type: FourCC,
        declared: u64,
        actual: u64,
    },

    #[error("Listener consumed {consumed} of {expected} payload bytes of {box_type} box")]
    PartialRead {
        box_type: FourCC,
        consumed: u64,
        expected: u64,
    },

    #[error("Unsupported {operation} of {box_type} box")]
    Unsupported {
        box_type: FourCC,
        operation: &'static str,
    },

    #[error("Payload of {len} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { len: u64, max: u64 },

    #[error("Invalid {box_type} box quantity: {quantity}, expected: {expected}")]
    InvalidBoxQuantity {
        box_type: FourCC,
        quantity: usize,
        expected: usize,
    },

    #[error("Track {0} not found")]
    TrackNotFound(u32),

    #[error("Movie header of {header} bytes does not fit in {reserved} reserved bytes")]
    HeaderOverflow { header: u64, reserved: u64 },

    #[error("No input to remux")]
    NoInput,

    #[error("Invalid four character code: {0:?}")]
    InvalidFourCC(String),

    #[error("Invalid language code: {0:?}")]
    InvalidLanguage(String),
}

impl Error {
    pub(crate) fn malformed(box_type: FourCC, reason: impl Into<String>) -> Self {
        Self::Malformed {
            box_type,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(box_type: FourCC, operation: &'static str) -> Self {
        Self::Unsupported {
            box_type,
            operation,
        }
    }

    pub(crate) fn missing(box_type: FourCC) -> Self {
        Self::InvalidBoxQuantity {
            box_type,
            quantity: 0,
            expected: 1,
        }
    }

    /// True for an end of stream hit in the middle of a read.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(error) if error.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

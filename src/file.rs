use std::{
    fs::{File, OpenOptions},
    io::{BufReader, Read, Seek, Write},
    path::Path,
};

use tracing::{debug, warn};

use crate::{
    channel::Channel,
    io,
    marshal::{Encode, FourCC},
    r#box::BoxHeader,
    tree::{BoxId, Tree},
    walk::{self, Walk},
    Error, Result,
};

/// Reads every box up to and including the first top-level `mdat` header.
///
/// The media data itself is not read, so this is cheap even for large files.
pub fn head<R: Read>(input: R) -> Result<Tree> {
    let mut input = Channel::new(input);
    let mut tree = Tree::new();
    let mut buf = io::buffer();
    let mut listener = |tree: &Tree, id: BoxId| {
        if tree.box_type(id) == FourCC::mdat && tree.parent(id).is_none() {
            Walk::Stop
        } else {
            Walk::Continue
        }
    };
    walk::read(&mut input, None, None, &mut tree, &mut buf, &mut listener)?;
    debug!(boxes = tree.descendants(None).len(), "read head");
    Ok(tree)
}

pub fn head_file(path: impl AsRef<Path>) -> Result<Tree> {
    head(BufReader::new(File::open(path)?))
}

/// Counts the boxes of the given type, or every box for [`FourCC::ANY`], in the boxes that
/// [`head`] reads.
pub fn count<R: Read>(input: R, box_type: FourCC) -> Result<usize> {
    let mut input = Channel::new(input);
    let mut tree = Tree::new();
    let mut buf = io::buffer();
    let mut count = 0;
    let mut listener = |tree: &Tree, id: BoxId| {
        if box_type == FourCC::ANY || tree.box_type(id) == box_type {
            count += 1;
        }
        if tree.box_type(id) == FourCC::mdat && tree.parent(id).is_none() {
            Walk::Stop
        } else {
            Walk::Continue
        }
    };
    walk::read(&mut input, None, None, &mut tree, &mut buf, &mut listener)?;
    Ok(count)
}

pub fn count_file(path: impl AsRef<Path>, box_type: FourCC) -> Result<usize> {
    count(BufReader::new(File::open(path)?), box_type)
}

/// Overwrites every top-level box of the given type in place with a zero-filled `free` box of
/// the same size, returning how many were replaced.
///
/// The length of the file does not change.
pub fn free<F: Read + Write + Seek>(file: F, box_type: FourCC) -> Result<usize> {
    let mut file = Channel::new(file);
    let mut buf = io::buffer();
    let len = file.stream_len()?;

    let mut count = 0;
    let mut offset = 0;
    while offset < len {
        if len - offset < 8 {
            warn!(offset, remaining = len - offset, "skipping trailing bytes");
            break;
        }
        file.seek_to(offset)?;
        let Some(header) = BoxHeader::read(&mut file, &mut buf, true)? else {
            break;
        };
        let total = header.total_len().unwrap_or(len - offset);
        if total > len - offset {
            return Err(Error::malformed(
                header.box_type,
                format!("{total} bytes at offset {offset} overflow the file"),
            ));
        }

        if box_type == FourCC::ANY || header.box_type == box_type {
            debug!(box_type = %header.box_type, offset, total, "freeing box");
            let free = BoxHeader::with_total_len(FourCC::free, total)?;
            file.seek_to(offset)?;
            free.encode(&mut file)?;
            io::zero_fill(&mut file, total - free.header_len(), &mut buf)?;
            count += 1;
        }
        offset += total;
    }
    file.flush()?;
    Ok(count)
}

pub fn free_file(path: impl AsRef<Path>, box_type: FourCC) -> Result<usize> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    free(file, box_type)
}

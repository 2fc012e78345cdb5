use std::io::{Read, Write};

use tracing::{trace, warn};

use crate::{
    channel::Channel,
    io,
    marshal::{Encode, FourCC},
    r#box::{child_rank, BoxData, BoxHeader},
    tree::{BoxId, Tree},
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    Stop,
}

/// Called once per box while reading, after its fields have been decoded and before its children
/// are read.
///
/// The listener may consume the rest of the payload from `payload`, in which case it must consume
/// all of it and the walker will not descend into the box.
pub trait BoxListener {
    fn on_box(&mut self, tree: &Tree, id: BoxId, payload: &mut dyn Read) -> Result<Walk>;
}

impl<F: FnMut(&Tree, BoxId) -> Walk> BoxListener for F {
    fn on_box(&mut self, tree: &Tree, id: BoxId, _payload: &mut dyn Read) -> Result<Walk> {
        Ok(self(tree, id))
    }
}

/// Reads boxes into `tree` below `parent` until `len` bytes are consumed, or until the end of
/// the stream for an unbounded top level.
pub fn read<R: Read>(
    input: &mut Channel<R>,
    len: Option<u64>,
    parent: Option<BoxId>,
    tree: &mut Tree,
    buf: &mut Vec<u8>,
    listener: &mut dyn BoxListener,
) -> Result<Walk> {
    let start = input.count();
    loop {
        let remaining = match len {
            Some(len) => {
                let remaining = len - (input.count() - start);
                if remaining == 0 {
                    break;
                }
                if remaining < 8 {
                    warn!(
                        parent = %parent.map_or(FourCC::ANY, |parent| tree.box_type(parent)),
                        remaining,
                        "skipping trailing bytes"
                    );
                    io::skip(input, remaining, buf)?;
                    break;
                }
                Some(remaining)
            }
            None => None,
        };

        match read_box(input, remaining, parent, tree, buf, listener, true)? {
            Some((_, Walk::Stop)) => return Ok(Walk::Stop),
            Some((_, Walk::Continue)) => {}
            None => break,
        }
    }
    Ok(Walk::Continue)
}

/// Reads the next top-level box and its children, leaving the payload of `mdat` unread.
///
/// Returns `None` at the end of the stream.
pub fn read_next<R: Read>(
    input: &mut Channel<R>,
    tree: &mut Tree,
    buf: &mut Vec<u8>,
) -> Result<Option<BoxId>> {
    let mut listener = |_: &Tree, _: BoxId| Walk::Continue;
    Ok(read_box(input, None, None, tree, buf, &mut listener, false)?.map(|(id, _)| id))
}

fn read_box<R: Read>(
    input: &mut Channel<R>,
    remaining: Option<u64>,
    parent: Option<BoxId>,
    tree: &mut Tree,
    buf: &mut Vec<u8>,
    listener: &mut dyn BoxListener,
    skip_media: bool,
) -> Result<Option<(BoxId, Walk)>> {
    let start = input.count();
    let Some(header) = BoxHeader::read(input, buf, parent.is_none())? else {
        return Ok(None);
    };
    let box_type = header.box_type;
    let header_len = header.header_len();

    let payload_len = match header.payload_len()? {
        Some(payload_len) => Some(payload_len),
        None if parent.is_some() => {
            return Err(Error::malformed(box_type, "size 0 is only valid at the top level"));
        }
        None => match remaining {
            Some(remaining) => Some(remaining - header_len),
            None if box_type == FourCC::mdat => None,
            None => {
                return Err(Error::malformed(box_type, "size 0 is only valid for mdat"));
            }
        },
    };
    if let (Some(remaining), Some(payload_len)) = (remaining, payload_len) {
        if header_len + payload_len > remaining {
            return Err(Error::malformed(
                box_type,
                format!(
                    "{} bytes overflow the {remaining} bytes left in the parent",
                    header_len + payload_len
                ),
            ));
        }
    }
    trace!(%box_type, ?payload_len, offset = start, "box");

    let parent_type = parent.map(|parent| tree.box_type(parent));
    let handler = parent.and_then(|parent| tree.handler_type(parent));
    let mut data = BoxData::empty(box_type, parent_type, handler);

    // media data running to the end of the stream
    let Some(payload_len) = payload_len else {
        let id = tree.add(parent, header, data);
        let walk = listener.on_box(tree, id, &mut std::io::empty())?;
        if skip_media && walk == Walk::Continue {
            io::skip_to_end(input, buf)?;
        }
        return Ok(Some((id, walk)));
    };

    let fields_start = input.count();
    data.read(box_type, input, payload_len, buf)?;
    let fields_len = input.count() - fields_start;
    let is_media = matches!(data, BoxData::MediaData);
    let id = tree.add(parent, header, data);

    let rest = payload_len - fields_len;
    let mut payload = Channel::new((&mut *input).take(rest));
    let walk = listener.on_box(tree, id, &mut payload)?;
    let consumed = payload.count();
    if consumed != 0 && consumed != rest {
        return Err(Error::PartialRead {
            box_type,
            consumed,
            expected: rest,
        });
    }
    if walk == Walk::Stop {
        return Ok(Some((id, Walk::Stop)));
    }

    let rest = rest - consumed;
    if rest > 0 {
        if is_media {
            if !skip_media {
                return Ok(Some((id, Walk::Continue)));
            }
            io::skip(input, rest, buf)?;
        } else if read(input, Some(rest), Some(id), tree, buf, listener)? == Walk::Stop {
            return Ok(Some((id, Walk::Stop)));
        }
    }

    let actual = input.count() - start;
    if actual != header_len + payload_len {
        return Err(Error::malformed(
            box_type,
            format!("consumed {actual} of {} bytes", header_len + payload_len),
        ));
    }
    Ok(Some((id, Walk::Continue)))
}

/// Writes `boxes` and their subtrees in canonical child order.
///
/// Only the header of `mdat` is written, its payload is left to the caller. Every other box must
/// produce exactly its declared size.
pub fn write<W: Write>(
    output: &mut Channel<W>,
    tree: &Tree,
    boxes: &[BoxId],
    buf: &mut Vec<u8>,
    listener: &mut dyn FnMut(&Tree, BoxId) -> Walk,
) -> Result<Walk> {
    for &id in boxes {
        let start = output.count();
        let header = tree.header(id);
        let box_type = header.box_type;
        header.encode(output)?;

        buf.clear();
        tree.data(id).encode(box_type, buf)?;
        output.write_all(buf)?;

        if listener(tree, id) == Walk::Stop {
            return Ok(Walk::Stop);
        }

        let mut children = tree.children(id).to_vec();
        children.sort_by_key(|&child| child_rank(box_type, tree.box_type(child)));
        if write(output, tree, &children, buf, listener)? == Walk::Stop {
            return Ok(Walk::Stop);
        }

        if matches!(tree.data(id), BoxData::MediaData) {
            continue;
        }
        let actual = output.count() - start;
        let declared = header.total_len().unwrap_or_default();
        if actual != declared {
            return Err(Error::SizeMismatch {
                box_type,
                declared,
                actual,
            });
        }
    }
    Ok(Walk::Continue)
}

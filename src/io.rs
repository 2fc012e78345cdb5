use std::io::{ErrorKind, Read, Write};

use crate::{Error, Result};

/// Size of the scratch buffer handed through a single top-level operation.
pub const BUFFER_SIZE: usize = 100 * 1024;

/// Largest payload that is ever buffered for decoding.
pub const MAX_BOX_PAYLOAD: u64 = 64 * 1024 * 1024;

pub fn buffer() -> Vec<u8> {
    Vec::with_capacity(BUFFER_SIZE)
}

/// Replaces the content of `buf` with exactly `len` bytes from `input`.
pub fn read<R: Read + ?Sized>(input: &mut R, len: u64, buf: &mut Vec<u8>) -> Result<()> {
    if len > MAX_BOX_PAYLOAD {
        return Err(Error::PayloadTooLarge {
            len,
            max: MAX_BOX_PAYLOAD,
        });
    }
    buf.clear();
    buf.resize(len as usize, 0);
    input.read_exact(buf)?;
    Ok(())
}

/// Like [`read`], but returns `false` when the stream ends before the first byte.
///
/// Ending anywhere after the first byte is still an error.
pub fn read_or_eof<R: Read + ?Sized>(input: &mut R, len: usize, buf: &mut Vec<u8>) -> Result<bool> {
    buf.clear();
    buf.resize(len, 0);
    let mut filled = 0;
    while filled < len {
        match input.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) => return Err(error.into()),
        }
    }
    Ok(true)
}

fn fill(buf: &mut Vec<u8>) {
    if buf.len() < BUFFER_SIZE {
        buf.resize(BUFFER_SIZE, 0);
    }
}

/// Reads and discards exactly `len` bytes.
pub fn skip<R: Read + ?Sized>(input: &mut R, mut len: u64, buf: &mut Vec<u8>) -> Result<()> {
    fill(buf);
    while len > 0 {
        let chunk = len.min(buf.len() as u64) as usize;
        input.read_exact(&mut buf[..chunk])?;
        len -= chunk as u64;
    }
    Ok(())
}

/// Reads and discards everything up to the end of the stream.
pub fn skip_to_end<R: Read + ?Sized>(input: &mut R, buf: &mut Vec<u8>) -> Result<u64> {
    fill(buf);
    let mut skipped = 0;
    loop {
        match input.read(buf) {
            Ok(0) => return Ok(skipped),
            Ok(n) => skipped += n as u64,
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) => return Err(error.into()),
        }
    }
}

/// Copies exactly `len` bytes from `input` to `output`.
pub fn copy<R: Read + ?Sized, W: Write + ?Sized>(
    input: &mut R,
    output: &mut W,
    mut len: u64,
    buf: &mut Vec<u8>,
) -> Result<()> {
    fill(buf);
    while len > 0 {
        let chunk = len.min(buf.len() as u64) as usize;
        input.read_exact(&mut buf[..chunk])?;
        output.write_all(&buf[..chunk])?;
        len -= chunk as u64;
    }
    Ok(())
}

/// Writes `len` zero bytes.
pub fn zero_fill<W: Write + ?Sized>(output: &mut W, mut len: u64, buf: &mut Vec<u8>) -> Result<()> {
    fill(buf);
    buf.fill(0);
    while len > 0 {
        let chunk = len.min(buf.len() as u64) as usize;
        output.write_all(&buf[..chunk])?;
        len -= chunk as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn read_exactly() {
        let mut buf = buffer();
        let mut input = Cursor::new(vec![1u8, 2, 3]);
        read(&mut input, 2, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        assert!(read(&mut input, 2, &mut buf).unwrap_err().is_eof());
        assert!(matches!(
            read(&mut input, MAX_BOX_PAYLOAD + 1, &mut buf),
            Err(Error::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn eof_only_at_start() {
        let mut buf = buffer();
        assert!(!read_or_eof(&mut Cursor::new(Vec::<u8>::new()), 8, &mut buf).unwrap());
        assert!(read_or_eof(&mut Cursor::new(vec![0u8; 4]), 8, &mut buf)
            .unwrap_err()
            .is_eof());
        assert!(read_or_eof(&mut Cursor::new(vec![7u8; 8]), 8, &mut buf).unwrap());
        assert_eq!(buf, [7; 8]);
    }

    #[test]
    fn copy_larger_than_buffer() {
        let len = BUFFER_SIZE * 2 + 17;
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let mut buf = buffer();
        let mut input = Cursor::new(data.clone());
        let mut output = vec![];
        skip(&mut input, 5, &mut buf).unwrap();
        copy(&mut input, &mut output, len as u64 - 10, &mut buf).unwrap();
        assert_eq!(output, &data[5..len - 5]);
        assert_eq!(skip_to_end(&mut input, &mut buf).unwrap(), 5);
        assert!(copy(&mut input, &mut output, 1, &mut buf).unwrap_err().is_eof());
    }

    #[test]
    fn zeros() {
        let mut buf = vec![9u8; 4];
        let mut output = vec![];
        zero_fill(&mut output, 10, &mut buf).unwrap();
        assert_eq!(output, [0; 10]);
    }
}

use std::io::{Read, Seek, SeekFrom, Write};

/// Byte-counting wrapper around a stream.
///
/// The count starts at zero and grows with every byte read or written. For streams that are opened
/// at offset zero this equals the stream position, which is kept true across [`Channel::seek_to`].
#[derive(Debug)]
pub struct Channel<T> {
    inner: T,
    count: u64,
}

impl<T> Channel<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Seek> Channel<T> {
    /// Repositions the stream and the count.
    pub fn seek_to(&mut self, position: u64) -> std::io::Result<()> {
        self.inner.seek(SeekFrom::Start(position))?;
        self.count = position;
        Ok(())
    }

    /// Total length of the underlying stream, leaving the position untouched.
    pub fn stream_len(&mut self) -> std::io::Result<u64> {
        let position = self.inner.stream_position()?;
        let len = self.inner.seek(SeekFrom::End(0))?;
        if position != len {
            self.inner.seek(SeekFrom::Start(position))?;
        }
        Ok(len)
    }
}

impl<T: Read> Read for Channel<T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = self.inner.read(buf)?;
        self.count += len as u64;
        Ok(len)
    }
}

impl<T: Write> Write for Channel<T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let len = self.inner.write(buf)?;
        self.count += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn counts_reads_and_writes() {
        let mut input = Channel::new(Cursor::new(vec![1u8, 2, 3, 4, 5]));
        let mut data = [0; 3];
        input.read_exact(&mut data).unwrap();
        assert_eq!(input.count(), 3);

        let mut output = Channel::new(Vec::new());
        output.write_all(&data).unwrap();
        output.write_all(&data[..1]).unwrap();
        assert_eq!(output.count(), 4);
    }

    #[test]
    fn seek_keeps_count_as_position() {
        let mut input = Channel::new(Cursor::new(vec![0u8; 10]));
        assert_eq!(input.stream_len().unwrap(), 10);
        input.seek_to(7).unwrap();
        assert_eq!(input.count(), 7);
        assert_eq!(input.stream_len().unwrap(), 10);

        let mut rest = vec![];
        input.read_to_end(&mut rest).unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(input.count(), 10);
    }
}

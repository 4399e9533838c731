use std::io::{self, BufRead, BufReader, Read, Write};

use crate::buf::fill_buf;
use crate::BLOCK_SIZE;

const ZERO_BLOCK: [u8; BLOCK_SIZE as usize] = [0; BLOCK_SIZE as usize];

/// Write-side half of the block discipline.
///
/// Bytes pass straight through to the sink while a running count tracks the
/// offset within the current block. [`BlockWriter::align`] zero-pads up to
/// the next boundary so every record region starts block-aligned.
pub struct BlockWriter<W: Write> {
    inner: W,
    since_align: u64,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(inner: W) -> Self {
        BlockWriter {
            inner,
            since_align: 0,
        }
    }

    /// Write then pad out the rest of the block.
    pub fn write_whole(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)?;
        self.align()
    }

    /// Zero-pad to the next block boundary. No-op when already aligned.
    pub fn align(&mut self) -> io::Result<()> {
        self.since_align %= BLOCK_SIZE;
        if self.since_align != 0 {
            let pad = (BLOCK_SIZE - self.since_align) as usize;
            self.inner.write_all(&ZERO_BLOCK[..pad])?;
            self.since_align = 0;
        }
        Ok(())
    }

    /// Align, flush, and hand the sink back.
    pub fn close(mut self) -> io::Result<W> {
        self.align()?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for BlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.since_align += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Read-side half of the block discipline.
///
/// Mirrors [`BlockWriter`]: reads pass through while counting, and
/// [`BlockReader::realign`] discards whatever remains of the current block
/// after a known-length region was consumed.
pub struct BlockReader<R: Read> {
    inner: BufReader<R>,
    since_align: u64,
}

impl<R: Read> BlockReader<R> {
    pub fn new(inner: R) -> Self {
        BlockReader {
            inner: BufReader::with_capacity(BLOCK_SIZE as usize, inner),
            since_align: 0,
        }
    }

    /// Discard bytes up to the next block boundary. No-op when already
    /// aligned. Hitting end-of-stream inside the padding is tolerated so a
    /// final partial block does not turn into a spurious error.
    pub fn realign(&mut self) -> io::Result<()> {
        self.since_align %= BLOCK_SIZE;
        if self.since_align != 0 {
            let mut remain = (BLOCK_SIZE - self.since_align) as usize;
            let mut scratch = [0u8; 512];

            while remain > 0 {
                let want = remain.min(scratch.len());
                match self.inner.read(&mut scratch[..want])? {
                    0 => break,
                    n => remain -= n,
                }
            }
            self.since_align = 0;
        }
        Ok(())
    }

    /// Read up to one whole block.
    ///
    /// Returns the bytes read plus an end-of-stream flag: true when the
    /// block came back short, or when a probe shows nothing follows it.
    pub fn read_block(&mut self) -> io::Result<(Vec<u8>, bool)> {
        let mut block = vec![0u8; BLOCK_SIZE as usize];
        let (_, got) = fill_buf(self, &mut block)?;
        block.truncate(got);

        let at_end = got < BLOCK_SIZE as usize || self.inner.fill_buf()?.is_empty();
        Ok((block, at_end))
    }
}

impl<R: Read> Read for BlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let got = self.inner.read(buf)?;
        self.since_align += got as u64;
        Ok(got)
    }
}


#[cfg(test)]
mod test_block_reader {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn realign_skips_rest_of_block() {
        let mut data = vec![0u8; 2 * BLOCK_SIZE as usize];
        data[BLOCK_SIZE as usize] = 0xAA;

        let mut reader = BlockReader::new(Cursor::new(data));
        let mut buf = [0u8; 10];
        reader.read_exact(&mut buf).unwrap();
        reader.realign().unwrap();

        let mut next = [0u8; 1];
        reader.read_exact(&mut next).unwrap();
        assert_eq!(next[0], 0xAA);
    }

    #[test]
    fn realign_is_idempotent() {
        let mut data = vec![0u8; 2 * BLOCK_SIZE as usize];
        data[BLOCK_SIZE as usize] = 0xAA;

        let mut reader = BlockReader::new(Cursor::new(data));
        let mut buf = [0u8; 10];
        reader.read_exact(&mut buf).unwrap();
        reader.realign().unwrap();
        reader.realign().unwrap();

        let mut next = [0u8; 1];
        reader.read_exact(&mut next).unwrap();
        assert_eq!(next[0], 0xAA);
    }

    #[test]
    fn read_block_reports_clean_end() {
        let mut reader = BlockReader::new(Cursor::new(vec![7u8; BLOCK_SIZE as usize]));

        let (block, at_end) = reader.read_block().unwrap();
        assert_eq!(block.len(), BLOCK_SIZE as usize);
        assert!(at_end);
    }

    #[test]
    fn read_block_reports_truncated_tail() {
        let mut reader = BlockReader::new(Cursor::new(vec![7u8; 100]));

        let (block, at_end) = reader.read_block().unwrap();
        assert_eq!(block.len(), 100);
        assert!(at_end);
    }

    #[test]
    fn read_block_sees_more_data() {
        let mut reader = BlockReader::new(Cursor::new(vec![7u8; BLOCK_SIZE as usize + 1]));

        let (block, at_end) = reader.read_block().unwrap();
        assert_eq!(block.len(), BLOCK_SIZE as usize);
        assert!(!at_end);
    }
}

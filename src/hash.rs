use std::io::Read;

use blake3::Hasher;

use crate::CHECKSUM_LEN;

/// Checksum value as carried in the preamble.
pub type Digest = [u8; CHECKSUM_LEN];

/// One-shot digest of a whole buffer.
pub fn digest(data: &[u8]) -> Digest {
    *blake3::hash(data).as_bytes()
}

/// Read adapter that hashes and counts every byte pulled through it.
///
/// The reader streams record bodies through one of these into the
/// decompressor, so the stored-byte checksum comes for free without
/// buffering the body twice.
pub struct TeeReader<R> {
    inner: R,
    hasher: Hasher,
    seen: u64,
}

impl<R: Read> TeeReader<R> {
    pub fn new(inner: R) -> Self {
        TeeReader {
            inner,
            hasher: Hasher::new(),
            seen: 0,
        }
    }

    pub fn finish(self) -> (Digest, u64) {
        (*self.hasher.finalize().as_bytes(), self.seen)
    }
}

impl<R: Read> Read for TeeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.seen += n as u64;
        Ok(n)
    }
}

use std::io::{self, BufReader, Read, Write};

use zstd::stream::read::{Decoder, Encoder};

use crate::error::{ArchiveError, Result};

/// Compression level handed to the zstd encoder.
const ZSTD_LEVEL: i32 = 21;

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 6;
const BROTLI_LGWIN: u32 = 22;

/// Body encoding of a record, independent of its record type.
///
/// Adding a codec means adding a variant here plus its encode/decode arm,
/// the writer and reader go through this one seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zstd,
    Brotli,
}

impl Compression {
    pub fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zstd => 1,
            Compression::Brotli => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zstd),
            3 => Ok(Compression::Brotli),
            x => Err(ArchiveError::UnknownCompression(x)),
        }
    }

    /// Compress a whole buffer. `None` is the identity transform; the
    /// dictionary only seeds the zstd codec.
    pub fn encode(&self, data: &[u8], dictionary: Option<&[u8]>) -> io::Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Zstd => {
                let mut out = Vec::new();
                match dictionary {
                    Some(dict) => {
                        let mut enc =
                            Encoder::with_dictionary(BufReader::new(data), ZSTD_LEVEL, dict)?;
                        io::copy(&mut enc, &mut out)?;
                    }
                    None => {
                        let mut enc = Encoder::new(data, ZSTD_LEVEL)?;
                        io::copy(&mut enc, &mut out)?;
                    }
                }
                Ok(out)
            }
            Compression::Brotli => {
                let mut out = Vec::new();
                {
                    let mut enc = brotli::CompressorWriter::new(
                        &mut out,
                        BROTLI_BUFFER,
                        BROTLI_QUALITY,
                        BROTLI_LGWIN,
                    );
                    enc.write_all(data)?;
                }
                Ok(out)
            }
        }
    }

    /// Wrap a stored-byte source in a lazily-pulled decompressing source,
    /// so callers can tee the raw bytes through a running hash without
    /// buffering the whole body.
    pub fn decoder<'a>(
        &self,
        src: impl Read + 'a,
        dictionary: Option<&'a [u8]>,
    ) -> io::Result<Box<dyn Read + 'a>> {
        match self {
            Compression::None => Ok(Box::new(src)),
            Compression::Zstd => match dictionary {
                Some(dict) => Ok(Box::new(Decoder::with_dictionary(
                    BufReader::new(src),
                    dict,
                )?)),
                None => Ok(Box::new(Decoder::new(src)?)),
            },
            Compression::Brotli => Ok(Box::new(brotli::Decompressor::new(src, BROTLI_BUFFER))),
        }
    }
}

#[cfg(test)]
mod test_compression {
    use super::*;

    fn round_trip(codec: Compression, dictionary: Option<&[u8]>) {
        let data = b"the quick brown fox jumps over the lazy dog. ".repeat(200);

        let stored = codec.encode(&data, dictionary).unwrap();
        let mut back = Vec::new();
        let mut dec = codec.decoder(&stored[..], dictionary).unwrap();
        io::copy(&mut dec, &mut back).unwrap();

        assert_eq!(back, data);
    }

    #[test]
    fn none_is_identity() {
        let data = b"plain bytes";
        assert_eq!(Compression::None.encode(data, None).unwrap(), data);
        round_trip(Compression::None, None);
    }

    #[test]
    fn zstd_round_trip() {
        round_trip(Compression::Zstd, None);
    }

    #[test]
    fn zstd_actually_compresses() {
        let data = vec![0u8; 100_000];
        let stored = Compression::Zstd.encode(&data, None).unwrap();
        assert!(stored.len() < data.len() / 10);
    }

    #[test]
    fn zstd_with_dictionary_round_trip() {
        let dict = b"the quick brown fox jumps over the lazy dog. ".repeat(20);
        round_trip(Compression::Zstd, Some(&dict));
    }

    #[test]
    fn brotli_round_trip() {
        round_trip(Compression::Brotli, None);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            Compression::from_tag(2),
            Err(ArchiveError::UnknownCompression(2))
        ));
    }
}

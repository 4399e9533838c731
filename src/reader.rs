use std::io::{self, Read, Write};

use log::{debug, warn};

use crate::block::BlockReader;
use crate::buf::fill_buf;
use crate::error::{ArchiveError, Result};
use crate::hash::{digest, TeeReader};
use crate::metadata::Metadata;
use crate::preamble::{Preamble, RecordFlags, RecordType};
use crate::{BLOCK_SIZE, MAX_DICTIONARY_RECORDS, PREAMBLE_LEN};

#[derive(Debug, Clone, Copy, PartialEq)]
enum ReaderState {
    BeforeStart,
    InArchive,
    Ended,
}

/// Forward-only record iterator over an archive stream.
///
/// `next` hands out `(Preamble, Metadata)` pairs in stream order; the body
/// of the current record is then available through `read_body`/`copy_body`
/// (or `read_chain`/`copy_chain` for continuation chains) until the next
/// call to `next`, which skips whatever was left unread.
///
/// Shared dictionary records are absorbed into the reader's zstd state and
/// never surface.
pub struct ArchiveReader<R: Read> {
    blocks: BlockReader<R>,
    state: ReaderState,
    pending: Option<Preamble>,
    dictionary: Option<Vec<u8>>,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(source: R) -> Self {
        ArchiveReader {
            blocks: BlockReader::new(source),
            state: ReaderState::BeforeStart,
            pending: None,
            dictionary: None,
        }
    }

    /// Advance to the next record. Returns `None` at a clean end of stream
    /// and after the end-of-archive control record.
    pub fn next(&mut self) -> Result<Option<(Preamble, Metadata)>> {
        if self.state == ReaderState::Ended {
            return Ok(None);
        }

        // Dictionary records are control-plane: absorb and keep pulling,
        // with a cap so a hostile stream cannot wedge us in this loop.
        for _ in 0..=MAX_DICTIONARY_RECORDS {
            match self.fetch()? {
                None => return Ok(None),
                Some((preamble, _)) if preamble.rtype == RecordType::SharedDictionary => {
                    let dict = self.read_body(true)?;
                    debug!("absorbed shared dictionary of {} bytes", dict.len());
                    self.dictionary = Some(dict);
                }
                Some(record) => return Ok(Some(record)),
            }
        }
        Err(ArchiveError::DictionaryFlood)
    }

    /// True when the current record declares a body.
    pub fn has_body(&self) -> bool {
        self.pending.as_ref().map(Preamble::has_body).unwrap_or(false)
    }

    /// Buffer the current record's decompressed body.
    pub fn read_body(&mut self, validate: bool) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.copy_body(&mut out, validate)?;
        Ok(out)
    }

    /// Stream the current record's body into `out`, teeing the stored
    /// bytes through a checksum. Whatever happens, the block reader is
    /// left realigned on a record boundary before this returns, so the
    /// caller can log a corruption and keep walking.
    pub fn copy_body<W: Write>(&mut self, out: &mut W, validate: bool) -> Result<u64> {
        let preamble = self
            .pending
            .take()
            .ok_or(ArchiveError::State("no current record to read a body from"))?;
        let stored = preamble.body_len();
        if stored == 0 {
            return Ok(0);
        }

        // Decoder construction can fail too; hold every error until the
        // stored region is drained and the boundary restored.
        let mut tee = TeeReader::new((&mut self.blocks).take(stored));
        let copied = match preamble
            .compression
            .decoder(&mut tee, self.dictionary.as_deref())
        {
            Ok(mut body) => io::copy(&mut body, out),
            Err(e) => Err(e),
        };

        // Drain whatever stored bytes the decoder left behind so the tee
        // has hashed the full region, then realign before reporting
        // anything.
        io::copy(&mut tee, &mut io::sink())?;
        let (checksum, seen) = tee.finish();
        self.blocks.realign()?;

        let copied = copied?;
        if seen < stored {
            return Err(ArchiveError::Truncated);
        }
        if validate && checksum != preamble.body_checksum {
            warn!(
                "body checksum mismatch on {:?} record, expected {} got {}",
                preamble.rtype,
                hex::encode(preamble.body_checksum),
                hex::encode(checksum),
            );
            return Err(ArchiveError::HashMismatch);
        }
        Ok(copied)
    }

    /// Buffer a whole logical body, following a continuation chain.
    pub fn read_chain(&mut self, validate: bool) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.copy_chain(&mut out, validate)?;
        Ok(out)
    }

    /// Stream a whole logical body into `out`. When the current record is
    /// flagged `Continues`, keeps pulling `Continuation` records until a
    /// link without the flag terminates the chain. Any other record type
    /// mid-chain is a framing error.
    pub fn copy_chain<W: Write>(&mut self, out: &mut W, validate: bool) -> Result<u64> {
        let mut continues = self
            .pending
            .as_ref()
            .ok_or(ArchiveError::State("no current record to read a chain from"))?
            .flags
            == RecordFlags::Continues;

        let mut total = self.copy_body(out, validate)?;
        while continues {
            match self.next()? {
                Some((preamble, _)) if preamble.rtype == RecordType::Continuation => {
                    continues = preamble.flags == RecordFlags::Continues;
                    total += self.copy_body(out, validate)?;
                }
                _ => return Err(ArchiveError::ExpectedContinuation),
            }
        }
        Ok(total)
    }

    /// Pull one raw record off the stream: skip the previous record's
    /// unread body, decode and checksum-validate preamble + metadata, and
    /// run the archive bracketing state machine.
    fn fetch(&mut self) -> Result<Option<(Preamble, Metadata)>> {
        if let Some(previous) = self.pending.take() {
            self.skip_body(&previous)?;
        }

        let mut raw = [0u8; PREAMBLE_LEN];
        let (_, got) = fill_buf(&mut self.blocks, &mut raw)?;
        if got == 0 {
            // Clean end of input on a record boundary
            return Ok(None);
        }
        if got < PREAMBLE_LEN {
            return Err(ArchiveError::Truncated);
        }
        let preamble = Preamble::decode(&mut &raw[..])?;

        let mut meta_buf = vec![0u8; preamble.metadata_length as usize];
        let (_, got) = fill_buf(&mut self.blocks, &mut meta_buf)?;
        if got < meta_buf.len() {
            return Err(ArchiveError::Truncated);
        }
        self.blocks.realign()?;

        if digest(&meta_buf) != preamble.metadata_checksum {
            // Body geometry is still trustworthy enough to skip, keep the
            // preamble pending so the caller may continue past this record.
            self.pending = Some(preamble);
            return Err(ArchiveError::CorruptMetadata);
        }

        let metadata = Metadata::decode(&preamble, &meta_buf)?;

        match (self.state, preamble.rtype, preamble.flags) {
            (ReaderState::BeforeStart, RecordType::Control, RecordFlags::ControlStart) => {
                self.state = ReaderState::InArchive;
            }
            (ReaderState::BeforeStart, _, _) => return Err(ArchiveError::MissingHeader),
            (ReaderState::InArchive, RecordType::Control, RecordFlags::ControlStart) => {
                return Err(ArchiveError::DuplicateHeader);
            }
            (ReaderState::InArchive, RecordType::Control, RecordFlags::ControlEnd) => {
                self.state = ReaderState::Ended;
            }
            _ => {}
        }

        debug!(
            "record {:?} flags {:?} body {}b",
            preamble.rtype,
            preamble.flags,
            preamble.body_len()
        );

        self.pending = Some(preamble.clone());
        Ok(Some((preamble, metadata)))
    }

    /// Discard the body of a record whose content was never requested.
    fn skip_body(&mut self, preamble: &Preamble) -> Result<()> {
        for _ in 0..preamble.body_blocks() {
            let (block, _) = self.blocks.read_block()?;
            if block.len() < BLOCK_SIZE as usize {
                return Err(ArchiveError::Truncated);
            }
        }
        Ok(())
    }
}



#[cfg(test)]
mod test_chains {
    use super::*;
    use std::io::{Cursor, Seek, SeekFrom};

    use crate::compression::Compression;
    use crate::metadata::Entry;
    use crate::writer::ArchiveWriter;

    const CHUNK: usize = 1024;

    fn entry(name: &str) -> Metadata {
        Metadata::Entry(Entry {
            name: name.to_string(),
            ..Default::default()
        })
    }

    fn stream_archive(body: &[u8], codec: Compression) -> Cursor<Vec<u8>> {
        let mut writer = ArchiveWriter::with_chunk_size(Cursor::new(Vec::new()), CHUNK);
        writer.begin("", "").unwrap();
        writer
            .append_stream(
                RecordType::File,
                RecordFlags::None,
                codec,
                &entry("big"),
                &mut Cursor::new(body.to_vec()),
            )
            .unwrap();
        writer.end().unwrap();

        let mut stream = writer.close().unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        stream
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn chain_reconstructs_exactly() {
        // k chunks plus a remainder, for k in {0, 1, 5}
        for k in [0usize, 1, 5] {
            let body = pattern(k * CHUNK + 37);
            let mut reader = ArchiveReader::new(stream_archive(&body, Compression::None));

            reader.next().unwrap().unwrap(); // start
            let (first, meta) = reader.next().unwrap().unwrap();
            assert_eq!(meta.name(), Some("big"));
            if k == 0 {
                assert_eq!(first.flags, RecordFlags::None, "small body must not chain");
            } else {
                assert_eq!(first.flags, RecordFlags::Continues);
            }

            assert_eq!(reader.read_chain(true).unwrap(), body, "k = {}", k);

            // The chain was fully consumed, next record is the end marker
            let (end, _) = reader.next().unwrap().unwrap();
            assert_eq!(end.flags, RecordFlags::ControlEnd);
        }
    }

    #[test]
    fn chain_of_exact_multiple_length() {
        let body = pattern(3 * CHUNK);
        let mut reader = ArchiveReader::new(stream_archive(&body, Compression::None));

        reader.next().unwrap().unwrap();
        reader.next().unwrap().unwrap();
        assert_eq!(reader.read_chain(true).unwrap(), body);
    }

    #[test]
    fn compressed_chain_round_trip() {
        let body = b"chained and compressed ".repeat(400);
        let mut reader = ArchiveReader::new(stream_archive(&body, Compression::Zstd));

        reader.next().unwrap().unwrap();
        reader.next().unwrap().unwrap();
        assert_eq!(reader.read_chain(true).unwrap(), body);
    }

    #[test]
    fn interrupted_chain_is_a_framing_error() {
        let mut writer = ArchiveWriter::with_chunk_size(Cursor::new(Vec::new()), CHUNK);
        writer.begin("", "").unwrap();
        // First link promises a continuation that never comes
        writer
            .append_record(
                RecordType::File,
                RecordFlags::Continues,
                Compression::None,
                &entry("liar"),
                &[1u8; 100],
            )
            .unwrap();
        writer
            .append_record(
                RecordType::Directory,
                RecordFlags::None,
                Compression::None,
                &entry("sub"),
                &[],
            )
            .unwrap();
        writer.end().unwrap();

        let mut stream = writer.close().unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut reader = ArchiveReader::new(stream);

        reader.next().unwrap().unwrap();
        reader.next().unwrap().unwrap();
        assert!(matches!(
            reader.read_chain(true),
            Err(ArchiveError::ExpectedContinuation)
        ));
    }
}

#[cfg(test)]
mod test_dictionary {
    use super::*;
    use std::io::{Cursor, Seek, SeekFrom};

    use crate::compression::Compression;
    use crate::metadata::Entry;
    use crate::writer::ArchiveWriter;

    fn entry(name: &str) -> Metadata {
        Metadata::Entry(Entry {
            name: name.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn dictionary_records_never_surface() {
        let dict = b"a shared sample phrase that seeds the codec ".repeat(30);
        let body1 = b"a shared sample phrase that seeds the codec plus one".to_vec();
        let body2 = b"a shared sample phrase that seeds the codec plus two".to_vec();

        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()));
        writer.begin("", "").unwrap();
        writer
            .append_record(
                RecordType::File,
                RecordFlags::None,
                Compression::Zstd,
                &entry("one"),
                &body1,
            )
            .unwrap();
        writer.append_dictionary(&dict).unwrap();
        writer
            .append_record(
                RecordType::File,
                RecordFlags::None,
                Compression::Zstd,
                &entry("two"),
                &body2,
            )
            .unwrap();
        writer.end().unwrap();

        let mut stream = writer.close().unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut reader = ArchiveReader::new(stream);

        reader.next().unwrap().unwrap(); // start

        // Exactly two file records come back, the dictionary is invisible
        let (_, meta) = reader.next().unwrap().unwrap();
        assert_eq!(meta.name(), Some("one"));
        assert_eq!(reader.read_body(true).unwrap(), body1);

        let (_, meta) = reader.next().unwrap().unwrap();
        assert_eq!(meta.name(), Some("two"));
        // Decodes correctly only because the absorbed dictionary was
        // applied to the reader's zstd state
        assert_eq!(reader.read_body(true).unwrap(), body2);

        let (end, _) = reader.next().unwrap().unwrap();
        assert_eq!(end.flags, RecordFlags::ControlEnd);
    }
}

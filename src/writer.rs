use std::io::{Read, Write};

use log::debug;

use crate::block::BlockWriter;
use crate::buf::fill_buf;
use crate::compression::Compression;
use crate::error::{ArchiveError, Result};
use crate::hash::digest;
use crate::metadata::{ArchiveHeader, Metadata, HOST_GENERIC};
use crate::preamble::{Preamble, RecordFlags, RecordType};
use crate::{DEFAULT_CHUNK_SIZE, FORMAT_VERSION};

#[derive(Debug, Clone, Copy, PartialEq)]
enum WriterState {
    Empty,
    Started,
    Ended,
}

/// Sequences preamble + metadata + body into block-padded records.
///
/// One instance owns one archive stream for its whole lifetime: `begin`
/// exactly once, any number of appends, `end`, then `close` to get the
/// sink back.
pub struct ArchiveWriter<W: Write> {
    blocks: BlockWriter<W>,
    state: WriterState,
    chunk_size: usize,
    dictionary: Option<Vec<u8>>,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(sink: W) -> Self {
        Self::with_chunk_size(sink, DEFAULT_CHUNK_SIZE)
    }

    /// `chunk_size` bounds how much of a streamed body is held in memory
    /// before the writer switches to a continuation chain.
    pub fn with_chunk_size(sink: W, chunk_size: usize) -> Self {
        ArchiveWriter {
            blocks: BlockWriter::new(sink),
            state: WriterState::Empty,
            chunk_size,
            dictionary: None,
        }
    }

    /// Emit the start-of-archive control record. Must be the first append.
    pub fn begin(&mut self, prefix: &str, comment: &str) -> Result<()> {
        if self.state != WriterState::Empty {
            return Err(ArchiveError::State("begin must be the first write"));
        }
        self.state = WriterState::Started;

        let header = Metadata::Archive(ArchiveHeader {
            version: FORMAT_VERSION,
            host: HOST_GENERIC.to_string(),
            prefix: prefix.to_string(),
            comment: comment.to_string(),
        });
        self.append_record(
            RecordType::Control,
            RecordFlags::ControlStart,
            Compression::None,
            &header,
            &[],
        )
    }

    /// Append one complete record: preamble + metadata padded to a block
    /// boundary, then the compressed body padded to a block boundary.
    pub fn append_record(
        &mut self,
        rtype: RecordType,
        flags: RecordFlags,
        compression: Compression,
        metadata: &Metadata,
        body: &[u8],
    ) -> Result<()> {
        if self.state != WriterState::Started {
            return Err(ArchiveError::State("record appended outside an open archive"));
        }

        let meta_buf = metadata.encode()?;
        if meta_buf.len() > u16::MAX as usize {
            return Err(ArchiveError::MetadataTooLarge(meta_buf.len()));
        }

        let stored = compression.encode(body, self.dictionary.as_deref())?;
        let preamble = Preamble::new(
            rtype,
            compression,
            flags,
            stored.len() as u64,
            digest(&stored),
            meta_buf.len() as u16,
            digest(&meta_buf),
        );

        debug!(
            "record {:?} flags {:?} meta {}b body {}b ({} blocks + {})",
            rtype,
            flags,
            meta_buf.len(),
            stored.len(),
            preamble.block_count,
            preamble.modulo,
        );

        // Alignment is an invariant between records, re-assert it so a
        // half-written record cannot poison the ones after it.
        self.blocks.align()?;
        preamble.encode(&mut self.blocks)?;
        self.blocks.write_whole(&meta_buf)?;
        if !stored.is_empty() {
            self.blocks.write_whole(&stored)?;
        }
        Ok(())
    }

    /// Append a record whose body comes from a reader of unknown size.
    ///
    /// A source that fits in one chunk becomes a single plain record.
    /// Anything larger becomes a continuation chain: the initiating record
    /// keeps the logical type and metadata and is flagged `Continues`, each
    /// further chunk rides in a `Continuation` record (no metadata, same
    /// codec), all but the last also flagged `Continues`. Each link is
    /// checksummed over its own stored bytes only.
    pub fn append_stream<R: Read>(
        &mut self,
        rtype: RecordType,
        flags: RecordFlags,
        compression: Compression,
        metadata: &Metadata,
        source: &mut R,
    ) -> Result<()> {
        let (eof, first) = self.read_chunk(source)?;
        if eof {
            return self.append_record(rtype, flags, compression, metadata, &first);
        }

        self.append_record(rtype, RecordFlags::Continues, compression, metadata, &first)?;
        loop {
            let (eof, chunk) = self.read_chunk(source)?;
            let link_flags = if eof {
                RecordFlags::None
            } else {
                RecordFlags::Continues
            };
            self.append_record(
                RecordType::Continuation,
                link_flags,
                compression,
                &Metadata::None,
                &chunk,
            )?;
            if eof {
                return Ok(());
            }
        }
    }

    /// Emit a shared dictionary record and seed the encode side with it:
    /// every zstd-compressed append from here on uses this dictionary.
    pub fn append_dictionary(&mut self, dictionary: &[u8]) -> Result<()> {
        self.append_record(
            RecordType::SharedDictionary,
            RecordFlags::None,
            Compression::None,
            &Metadata::None,
            dictionary,
        )?;
        self.dictionary = Some(dictionary.to_vec());
        Ok(())
    }

    /// Emit the end-of-archive control record. Appends after this are
    /// usage errors.
    pub fn end(&mut self) -> Result<()> {
        self.append_record(
            RecordType::Control,
            RecordFlags::ControlEnd,
            Compression::None,
            &Metadata::None,
            &[],
        )?;
        self.state = WriterState::Ended;
        Ok(())
    }

    /// Align, flush, and hand the sink back.
    pub fn close(self) -> Result<W> {
        Ok(self.blocks.close()?)
    }

    fn read_chunk<R: Read>(&self, source: &mut R) -> Result<(bool, Vec<u8>)> {
        let mut chunk = vec![0u8; self.chunk_size];
        let (eof, got) = fill_buf(source, &mut chunk)?;
        chunk.truncate(got);
        Ok((eof, chunk))
    }
}

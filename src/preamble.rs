use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::compression::Compression;
use crate::error::{ArchiveError, Result};
use crate::hash::Digest;
use crate::{BLOCK_SIZE, MAGIC};

/// On-wire record type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Control,
    File,
    Hardlink,
    Symlink,
    Directory,
    SharedDictionary,
    OsSpecial,
    Continuation,
}

impl RecordType {
    pub fn tag(self) -> u8 {
        match self {
            RecordType::Control => 0,
            RecordType::File => 1,
            RecordType::Hardlink => 2,
            RecordType::Symlink => 3,
            RecordType::Directory => 4,
            RecordType::SharedDictionary => 5,
            RecordType::OsSpecial => 126,
            RecordType::Continuation => 127,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(RecordType::Control),
            1 => Ok(RecordType::File),
            2 => Ok(RecordType::Hardlink),
            3 => Ok(RecordType::Symlink),
            4 => Ok(RecordType::Directory),
            5 => Ok(RecordType::SharedDictionary),
            126 => Ok(RecordType::OsSpecial),
            127 => Ok(RecordType::Continuation),
            x => Err(ArchiveError::UnknownRecordType(x)),
        }
    }
}

/// Record flags, keyed by record type.
///
/// On the wire `ControlEnd` and `Continues` share bit value `0b10`. Control
/// records never continue and nothing else brackets the archive, so the
/// closed enum resolves the overlap at decode time instead of leaving it as
/// a runtime invariant on a bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFlags {
    #[default]
    None,
    ControlStart,
    ControlEnd,
    Continues,
}

const FLAG_CONTROL_START: u16 = 0b1;
const FLAG_CONTROL_END: u16 = 0b10;
const FLAG_CONTINUES: u16 = 0b10;

impl RecordFlags {
    pub fn bits(self) -> u16 {
        match self {
            RecordFlags::None => 0,
            RecordFlags::ControlStart => FLAG_CONTROL_START,
            RecordFlags::ControlEnd => FLAG_CONTROL_END,
            RecordFlags::Continues => FLAG_CONTINUES,
        }
    }

    pub fn from_bits(rtype: RecordType, bits: u16) -> Result<Self> {
        match (rtype, bits) {
            (_, 0) => Ok(RecordFlags::None),
            (RecordType::Control, FLAG_CONTROL_START) => Ok(RecordFlags::ControlStart),
            (RecordType::Control, FLAG_CONTROL_END) => Ok(RecordFlags::ControlEnd),
            (RecordType::Control, bits) => Err(ArchiveError::BadFlags {
                rtype: rtype.tag(),
                bits,
            }),
            (_, FLAG_CONTINUES) => Ok(RecordFlags::Continues),
            (_, bits) => Err(ArchiveError::BadFlags {
                rtype: rtype.tag(),
                bits,
            }),
        }
    }
}

/// Fixed-width header present at the start of every record.
#[derive(Debug, Clone, PartialEq)]
pub struct Preamble {
    pub rtype: RecordType,
    pub compression: Compression,
    pub flags: RecordFlags,
    /// Whole blocks occupied by the stored body.
    pub block_count: u64,
    /// Bytes used in the final, partially-filled body block.
    pub modulo: u16,
    /// BLAKE3 of the body bytes as stored (post-compression).
    pub body_checksum: Digest,
    pub metadata_length: u16,
    /// BLAKE3 of the metadata blob, pre-padding.
    pub metadata_checksum: Digest,
}

impl Preamble {
    /// Build a preamble for a stored body of `body_len` bytes, computing
    /// the block count and modulo split.
    pub fn new(
        rtype: RecordType,
        compression: Compression,
        flags: RecordFlags,
        body_len: u64,
        body_checksum: Digest,
        metadata_length: u16,
        metadata_checksum: Digest,
    ) -> Self {
        let (block_count, modulo) = if body_len == 0 {
            (0, 0)
        } else if body_len % BLOCK_SIZE == 0 {
            (body_len / BLOCK_SIZE, 0)
        } else {
            (body_len / BLOCK_SIZE + 1, (body_len % BLOCK_SIZE) as u16)
        };

        Preamble {
            rtype,
            compression,
            flags,
            block_count,
            modulo,
            body_checksum,
            metadata_length,
            metadata_checksum,
        }
    }

    pub fn has_body(&self) -> bool {
        self.block_count != 0 || self.modulo != 0
    }

    /// Meaningful stored-body bytes, padding excluded.
    pub fn body_len(&self) -> u64 {
        if self.modulo == 0 {
            self.block_count * BLOCK_SIZE
        } else {
            // A nonzero modulo reserves at least one physical block even if
            // the block count came in as zero.
            (self.body_blocks() - 1) * BLOCK_SIZE + self.modulo as u64
        }
    }

    /// Physical blocks the body occupies on the wire.
    pub fn body_blocks(&self) -> u64 {
        if self.modulo != 0 {
            self.block_count.max(1)
        } else {
            self.block_count
        }
    }

    pub fn encode<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&MAGIC)?;
        out.write_u8(self.rtype.tag())?;
        out.write_u8(self.compression.tag())?;
        out.write_u16::<BigEndian>(self.flags.bits())?;
        out.write_u64::<BigEndian>(self.block_count)?;
        out.write_u16::<BigEndian>(self.modulo)?;
        out.write_all(&self.body_checksum)?;
        out.write_u16::<BigEndian>(self.metadata_length)?;
        out.write_all(&self.metadata_checksum)?;
        Ok(())
    }

    pub fn decode<R: Read>(src: &mut R) -> Result<Self> {
        let mut magic = [0u8; 6];
        read_field(src, &mut magic)?;
        if magic != MAGIC {
            return Err(ArchiveError::BadMagic);
        }

        let rtype = RecordType::from_tag(read_u8(src)?)?;
        let compression = Compression::from_tag(read_u8(src)?)?;
        let flags = RecordFlags::from_bits(rtype, read_u16(src)?)?;
        let block_count = src
            .read_u64::<BigEndian>()
            .map_err(|_| ArchiveError::Truncated)?;
        let modulo = read_u16(src)?;

        let mut body_checksum = Digest::default();
        read_field(src, &mut body_checksum)?;
        let metadata_length = read_u16(src)?;
        let mut metadata_checksum = Digest::default();
        read_field(src, &mut metadata_checksum)?;

        Ok(Preamble {
            rtype,
            compression,
            flags,
            block_count,
            modulo,
            body_checksum,
            metadata_length,
            metadata_checksum,
        })
    }
}

fn read_field<R: Read>(src: &mut R, buf: &mut [u8]) -> Result<()> {
    src.read_exact(buf).map_err(|_| ArchiveError::Truncated)
}

fn read_u8<R: Read>(src: &mut R) -> Result<u8> {
    src.read_u8().map_err(|_| ArchiveError::Truncated)
}

fn read_u16<R: Read>(src: &mut R) -> Result<u16> {
    src.read_u16::<BigEndian>()
        .map_err(|_| ArchiveError::Truncated)
}

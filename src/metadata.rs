use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::preamble::{Preamble, RecordFlags, RecordType};

/// Host tag vocabulary for the start-of-archive record.
pub const HOST_GENERIC: &str = "universe";
pub const HOST_LINUX: &str = "linux";
pub const HOST_UNIX: &str = "unix";
pub const HOST_SELINUX: &str = "selinux";
pub const HOST_NT: &str = "winnt";
pub const HOST_DARWIN: &str = "darwin";
pub const HOST_POSIX: &str = "posix";

/// Archive-level attributes carried by the start control record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArchiveHeader {
    pub version: u8,
    pub host: String,
    pub prefix: String,
    pub comment: String,
}

/// Attributes of a file or directory record.
///
/// Only the logical name is required. Everything else rides in `extra`, a
/// free-form extension map (file size, mime type, owner, mode bits,
/// xattrs...) that unknown producers may grow without breaking this
/// decoder: unrecognized keys land in `extra` instead of erroring, and an
/// absent `mtime` stays `None` rather than turning into a fake timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Entry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Attributes of a symlink or hardlink record. The target lives here in
/// the metadata, links carry no body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Link {
    pub name: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Attributes of an OS-special record (device nodes, fifos, ...).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Special {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Decoded per-record metadata, dispatched by record type.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    /// Continuation, shared dictionary, and end control records carry none.
    None,
    Archive(ArchiveHeader),
    Entry(Entry),
    Link(Link),
    Special(Special),
}

impl Metadata {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Metadata::None => {}
            Metadata::Archive(header) => ciborium::into_writer(header, &mut out)?,
            Metadata::Entry(entry) => ciborium::into_writer(entry, &mut out)?,
            Metadata::Link(link) => ciborium::into_writer(link, &mut out)?,
            Metadata::Special(special) => ciborium::into_writer(special, &mut out)?,
        }
        Ok(out)
    }

    /// Decode a metadata blob according to the record type that carried it.
    /// An empty blob is legal for any type and decodes to `Metadata::None`.
    pub fn decode(preamble: &Preamble, data: &[u8]) -> Result<Metadata> {
        if data.is_empty() {
            return Ok(Metadata::None);
        }

        match preamble.rtype {
            RecordType::Control if preamble.flags == RecordFlags::ControlStart => {
                Ok(Metadata::Archive(ciborium::from_reader(data)?))
            }
            RecordType::Control => Ok(Metadata::None),
            RecordType::File | RecordType::Directory => {
                Ok(Metadata::Entry(ciborium::from_reader(data)?))
            }
            RecordType::Symlink | RecordType::Hardlink => {
                Ok(Metadata::Link(ciborium::from_reader(data)?))
            }
            RecordType::OsSpecial => Ok(Metadata::Special(ciborium::from_reader(data)?)),
            // Never carry metadata, ignore whatever is there
            RecordType::SharedDictionary | RecordType::Continuation => Ok(Metadata::None),
        }
    }

    /// Logical name, when this metadata names an entry.
    pub fn name(&self) -> Option<&str> {
        match self {
            Metadata::Entry(e) => Some(&e.name),
            Metadata::Link(l) => Some(&l.name),
            Metadata::Special(s) => Some(&s.name),
            _ => None,
        }
    }

    pub fn mtime(&self) -> Option<i64> {
        match self {
            Metadata::Entry(e) => e.mtime,
            Metadata::Link(l) => l.mtime,
            Metadata::Special(s) => s.mtime,
            _ => None,
        }
    }
}

#[cfg(test)]
mod test_metadata {
    use super::*;
    use crate::compression::Compression;
    use crate::hash::digest;

    fn preamble_for(rtype: RecordType, flags: RecordFlags) -> Preamble {
        Preamble::new(
            rtype,
            Compression::None,
            flags,
            0,
            digest(&[]),
            0,
            digest(&[]),
        )
    }

    #[test]
    fn archive_header_round_trip() {
        let meta = Metadata::Archive(ArchiveHeader {
            version: 1,
            host: HOST_GENERIC.to_string(),
            prefix: "root".to_string(),
            comment: "t".to_string(),
        });

        let blob = meta.encode().unwrap();
        let back = Metadata::decode(
            &preamble_for(RecordType::Control, RecordFlags::ControlStart),
            &blob,
        )
        .unwrap();

        assert_eq!(meta, back);
    }

    #[test]
    fn entry_round_trip_with_extension_map() {
        let mut extra = BTreeMap::new();
        extra.insert("fileSize".to_string(), Value::from(1234u64));
        extra.insert("mimetype".to_string(), Value::from("text/plain"));

        let meta = Metadata::Entry(Entry {
            name: "a.txt".to_string(),
            mtime: Some(1_700_000_000),
            extra,
        });

        let blob = meta.encode().unwrap();
        let back = Metadata::decode(
            &preamble_for(RecordType::File, RecordFlags::None),
            &blob,
        )
        .unwrap();

        assert_eq!(meta, back);
    }

    #[test]
    fn absent_mtime_stays_unset() {
        let meta = Metadata::Entry(Entry {
            name: "sub".to_string(),
            mtime: None,
            extra: BTreeMap::new(),
        });

        let blob = meta.encode().unwrap();
        let back = Metadata::decode(
            &preamble_for(RecordType::Directory, RecordFlags::None),
            &blob,
        )
        .unwrap();

        match back {
            Metadata::Entry(e) => assert_eq!(e.mtime, None),
            x => panic!("expected an entry, got {:?}", x),
        }
    }

    #[test]
    fn unknown_fields_survive_in_extra() {
        // A future producer adds a field this decoder has never heard of
        let mut future = BTreeMap::new();
        future.insert("name".to_string(), Value::from("a.txt"));
        future.insert("futureField".to_string(), Value::from(42u64));

        let mut blob = Vec::new();
        ciborium::into_writer(&future, &mut blob).unwrap();

        let back = Metadata::decode(
            &preamble_for(RecordType::File, RecordFlags::None),
            &blob,
        )
        .unwrap();

        match back {
            Metadata::Entry(e) => {
                assert_eq!(e.name, "a.txt");
                assert_eq!(e.extra.get("futureField"), Some(&Value::from(42u64)));
            }
            x => panic!("expected an entry, got {:?}", x),
        }
    }

    #[test]
    fn link_keeps_target_in_metadata() {
        let meta = Metadata::Link(Link {
            name: "ln".to_string(),
            target: "a.txt".to_string(),
            mtime: None,
            extra: BTreeMap::new(),
        });

        let blob = meta.encode().unwrap();
        let back = Metadata::decode(
            &preamble_for(RecordType::Symlink, RecordFlags::None),
            &blob,
        )
        .unwrap();

        assert_eq!(meta, back);
    }

    #[test]
    fn empty_blob_decodes_to_none() {
        let back = Metadata::decode(
            &preamble_for(RecordType::Continuation, RecordFlags::None),
            &[],
        )
        .unwrap();
        assert_eq!(back, Metadata::None);
    }
}

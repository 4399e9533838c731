use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use ciborium::Value;
use ignore::WalkBuilder;
use log::{info, warn};

use crate::compression::Compression;
use crate::error::Result;
use crate::metadata::{Entry, Link, Metadata};
use crate::preamble::{RecordFlags, RecordType};
use crate::writer::ArchiveWriter;

/// Walk `paths` and append everything found to `writer`, depth-first with
/// siblings in file name order so the same tree always produces records in
/// the same sequence.
///
/// Symlinks are recorded as links, never followed. Source-side failures
/// (unreadable directories, entries that vanish before they are opened) are
/// logged and skipped so one bad entry does not abort the whole archive.
/// Once any byte of a record has reached the writer, failures are fatal:
/// the archive framing can no longer be trusted past that point.
pub fn pack_paths<W: Write>(
    writer: &mut ArchiveWriter<W>,
    paths: &[impl AsRef<Path>],
    compression: Compression,
) -> Result<()> {
    for root in paths {
        let mut builder = WalkBuilder::new(root.as_ref());
        builder
            .follow_links(false)
            .standard_filters(false)
            .sort_by_file_name(|a, b| a.cmp(b));

        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            pack_entry(writer, &entry, compression)?;
        }
    }
    Ok(())
}

fn pack_entry<W: Write>(
    writer: &mut ArchiveWriter<W>,
    entry: &ignore::DirEntry,
    compression: Compression,
) -> Result<()> {
    let path = entry.path();
    let name = path.to_string_lossy().into_owned();

    let file_type = match entry.file_type() {
        Some(ft) => ft,
        None => {
            warn!("skipping {}: no file type (stdin?)", path.display());
            return Ok(());
        }
    };

    if file_type.is_symlink() {
        // Still only touching the source side here, safe to drop the entry
        let target = match fs::read_link(path) {
            Ok(t) => t,
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                return Ok(());
            }
        };
        info!("LINK: {}", path.display());
        writer.append_record(
            RecordType::Symlink,
            RecordFlags::None,
            Compression::None,
            &Metadata::Link(Link {
                name,
                target: target.to_string_lossy().into_owned(),
                mtime: mtime_of(entry),
                extra: BTreeMap::new(),
            }),
            &[],
        )
    } else if file_type.is_dir() {
        info!("DIR:  {}", path.display());
        writer.append_record(
            RecordType::Directory,
            RecordFlags::None,
            Compression::None,
            &Metadata::Entry(Entry {
                name,
                mtime: mtime_of(entry),
                extra: BTreeMap::new(),
            }),
            &[],
        )
    } else if file_type.is_file() {
        // Stat and open before anything reaches the writer, so a vanished
        // or unreadable file can be dropped without breaking the archive
        let opened = fs::metadata(path).and_then(|m| fs::File::open(path).map(|f| (m, f)));
        let (meta, mut file) = match opened {
            Ok(pair) => pair,
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                return Ok(());
            }
        };
        info!("FILE: {} ({} bytes)", path.display(), meta.len());

        let mut extra = BTreeMap::new();
        extra.insert("fileSize".to_string(), Value::from(meta.len()));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            extra.insert("mode".to_string(), Value::from(meta.permissions().mode()));
        }

        writer.append_stream(
            RecordType::File,
            RecordFlags::None,
            compression,
            &Metadata::Entry(Entry {
                name,
                mtime: mtime_of(entry),
                extra,
            }),
            &mut file,
        )
    } else {
        // Sockets, fifos, device nodes. Record their presence without a
        // body so extraction tooling can decide what to do with them.
        info!("SPEC: {}", path.display());
        writer.append_record(
            RecordType::OsSpecial,
            RecordFlags::None,
            Compression::None,
            &Metadata::Special(crate::metadata::Special {
                name,
                mtime: mtime_of(entry),
                ..Default::default()
            }),
            &[],
        )
    }
}

fn mtime_of(entry: &ignore::DirEntry) -> Option<i64> {
    let modified = entry.metadata().ok()?.modified().ok()?;
    let since_epoch = modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs();
    i64::try_from(since_epoch).ok()
}

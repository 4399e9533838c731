use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Component, Path, PathBuf};

use clap::Parser;
use log::{error, info, warn};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use ponzu::cli::{Cli, Commands};
use ponzu::compression::Compression;
use ponzu::error::Result;
use ponzu::metadata::Metadata;
use ponzu::preamble::{Preamble, RecordType};
use ponzu::reader::ArchiveReader;
use ponzu::walk::pack_paths;
use ponzu::writer::ArchiveWriter;

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Create {
            archive,
            paths,
            compression,
            prefix,
            comment,
        } => create(&archive, &paths, compression.into(), &prefix, &comment),
        Commands::Extract {
            archive,
            dest,
            no_verify,
        } => extract(&archive, &dest, !no_verify),
        Commands::Inspect { archive } => inspect(&archive),
    };

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn create(
    archive: &Path,
    paths: &[PathBuf],
    compression: Compression,
    prefix: &str,
    comment: &str,
) -> Result<()> {
    let sink = BufWriter::new(File::create(archive)?);
    let mut writer = ArchiveWriter::new(sink);

    writer.begin(prefix, comment)?;
    pack_paths(&mut writer, paths, compression)?;
    writer.end()?;
    writer.close()?;

    info!("wrote {}", archive.display());
    Ok(())
}

fn extract(archive: &Path, dest: &Path, verify: bool) -> Result<()> {
    let mut reader = ArchiveReader::new(BufReader::new(File::open(archive)?));
    fs::create_dir_all(dest)?;

    loop {
        let (preamble, metadata) = match reader.next() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) if e.is_corruption() => {
                warn!("skipping corrupt record: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = extract_record(&mut reader, dest, &preamble, &metadata, verify) {
            if e.is_corruption() {
                warn!(
                    "skipping {}: {}",
                    metadata.name().unwrap_or("<unnamed>"),
                    e
                );
            } else {
                return Err(e);
            }
        }
    }
    Ok(())
}

fn extract_record<R: Read>(
    reader: &mut ArchiveReader<R>,
    dest: &Path,
    preamble: &Preamble,
    metadata: &Metadata,
    verify: bool,
) -> Result<()> {
    match preamble.rtype {
        RecordType::Control => {
            if let Metadata::Archive(header) = metadata {
                info!(
                    "archive v{} host {} prefix {:?}",
                    header.version, header.host, header.prefix
                );
            }
        }
        RecordType::Directory => {
            if let Some(path) = target_path(dest, metadata.name()) {
                fs::create_dir_all(path)?;
            }
        }
        RecordType::File => {
            let path = match target_path(dest, metadata.name()) {
                Some(p) => p,
                None => return Ok(()),
            };
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut out = BufWriter::new(File::create(&path)?);
            if let Err(e) = reader.copy_chain(&mut out, verify) {
                // Leave no half-written file behind
                drop(out);
                let _ = fs::remove_file(&path);
                return Err(e);
            }
            info!("extracted {}", path.display());
        }
        RecordType::Symlink => {
            if let (Some(path), Metadata::Link(link)) =
                (target_path(dest, metadata.name()), metadata)
            {
                make_symlink(&link.target, &path)?;
            }
        }
        RecordType::Hardlink => {
            if let Metadata::Link(link) = metadata {
                // The link target is an archived name too, hold it to the
                // same containment rule as the link itself
                if let (Some(path), Some(existing)) = (
                    target_path(dest, Some(&link.name)),
                    target_path(dest, Some(&link.target)),
                ) {
                    fs::hard_link(existing, path)?;
                }
            }
        }
        RecordType::OsSpecial => {
            warn!(
                "not recreating special entry {}",
                metadata.name().unwrap_or("<unnamed>")
            );
        }
        // A bare continuation only surfaces after its chain head was
        // dropped for corruption, its content is not placeable
        RecordType::Continuation => {
            warn!("discarding orphaned continuation record");
        }
        RecordType::SharedDictionary => {}
    }
    Ok(())
}

/// Resolve an archived name under `dest`, refusing names that would land
/// outside it. Absolute names and any `..` traversal are dropped with a
/// warning rather than extracted.
fn target_path(dest: &Path, name: Option<&str>) -> Option<PathBuf> {
    let name = name?;
    let relative = Path::new(name);

    let safe = !relative.is_absolute()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        warn!("refusing unsafe archived name {:?}", name);
        return None;
    }
    Some(dest.join(relative))
}

#[cfg(unix)]
fn make_symlink(target: &str, path: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, path)
}

#[cfg(not(unix))]
fn make_symlink(target: &str, path: &Path) -> std::io::Result<()> {
    warn!(
        "symlinks unsupported here, skipping {} -> {}",
        path.display(),
        target
    );
    Ok(())
}

fn inspect(archive: &Path) -> Result<()> {
    let mut reader = ArchiveReader::new(BufReader::new(File::open(archive)?));

    loop {
        let (preamble, metadata) = match reader.next() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) if e.is_corruption() => {
                println!("!! corrupt record: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut line = format!(
            "{:<16} {:<12} {:<6} {:>10}b  {}",
            format!("{:?}", preamble.rtype),
            format!("{:?}", preamble.flags),
            format!("{:?}", preamble.compression),
            preamble.body_len(),
            hex::encode(&preamble.body_checksum[..8]),
        );
        if let Some(name) = metadata.name() {
            line.push_str(&format!("  {}", name));
        }
        if let Metadata::Link(link) = &metadata {
            line.push_str(&format!(" -> {}", link.target));
        }
        if let Some(stamp) = metadata.mtime().and_then(format_mtime) {
            line.push_str(&format!("  {}", stamp));
        }
        println!("{}", line);
    }
    Ok(())
}

fn format_mtime(epoch: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(epoch)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

#[cfg(test)]
mod test_target_path {
    use super::*;

    #[test]
    fn contained_names_resolve_under_dest() {
        let dest = Path::new("out");
        assert_eq!(
            target_path(dest, Some("a/b.txt")).unwrap(),
            Path::new("out/a/b.txt")
        );
        assert!(target_path(dest, Some("./c")).is_some());
    }

    #[test]
    fn traversal_and_absolute_names_are_refused() {
        let dest = Path::new("out");
        assert!(target_path(dest, Some("../escape")).is_none());
        assert!(target_path(dest, Some("a/../../escape")).is_none());
        assert!(target_path(dest, Some("/etc/passwd")).is_none());
        assert!(target_path(dest, None).is_none());
    }
}

//! gzip-compressed tar archives on the local disk.
//!
//! Used by backends whose entries are plain host paths. Both directions
//! stream progress through [`blocking_stream`] and remove a partial archive
//! when compression fails or its consumer goes away.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use super::progress::{blocking_stream, ProgressStream};
use super::utils::{join_path, normalize_path_separators};
use super::{FileEntry, Permission};
use crate::errors::FileError;

/// Archive `sources` into `destination`, one progress item per source.
pub fn compress(sources: Vec<FileEntry>, destination: FileEntry) -> ProgressStream {
    blocking_stream(move |sink| {
        let archive_path = Path::new(&destination.uri);
        if archive_path.exists() {
            return Err(FileError::AlreadyExists(destination.uri.clone()));
        }
        if let Some(parent) = archive_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FileError::from_io(e, &parent.to_string_lossy()))?;
        }

        let file = File::create(archive_path).map_err(|e| FileError::from_io(e, &destination.uri))?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        builder.follow_symlinks(false);

        let result = (|| {
            for source in &sources {
                let path = Path::new(&source.uri);
                let name = source.name();
                let appended = if path.is_dir() {
                    append_tree(&mut builder, path, Path::new(name), archive_path)
                } else {
                    builder.append_path_with_name(path, name)
                };
                appended.map_err(|e| FileError::from_io(e, &source.uri))?;

                debug!("Archived {} into {}", source.uri, destination.uri);
                if !sink.emit(source.clone()) {
                    return Ok(false);
                }
            }
            builder
                .into_inner()
                .and_then(|encoder| encoder.finish())
                .map_err(|e| FileError::from_io(e, &destination.uri))?;
            Ok(true)
        })();

        match result {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!("Compression into {} abandoned by consumer", destination.uri);
                let _ = std::fs::remove_file(archive_path);
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(archive_path);
                Err(e)
            }
        }
    })
}

/// Append `dir` and everything below it as `name`, leaving out `skip` (the
/// archive being written when it sits inside a source directory).
fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    name: &Path,
    skip: &Path,
) -> io::Result<()> {
    builder.append_dir(name, dir)?;
    let mut children = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    children.sort_by_key(|child| child.file_name());
    for child in children {
        let path = child.path();
        if path == skip {
            continue;
        }
        let child_name = name.join(child.file_name());
        if child.file_type()?.is_dir() {
            append_tree(builder, &path, &child_name, skip)?;
        } else {
            builder.append_path_with_name(&path, &child_name)?;
        }
    }
    Ok(())
}

/// Unpack `source` into the directory `destination`, one progress item per
/// member. Members that would land outside `destination` are skipped.
pub fn extract(source: FileEntry, destination: FileEntry) -> ProgressStream {
    blocking_stream(move |sink| {
        let file = File::open(&source.uri).map_err(|e| FileError::from_io(e, &source.uri))?;
        let dest_dir = Path::new(&destination.uri);
        std::fs::create_dir_all(dest_dir).map_err(|e| FileError::from_io(e, &destination.uri))?;

        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.set_overwrite(false);

        let entries = archive
            .entries()
            .map_err(|e| FileError::OperationFailed(format!("{}: {e}", source.uri)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| FileError::OperationFailed(format!("{}: {e}", source.uri)))?;
            let member = entry
                .path()
                .map(|p| normalize_path_separators(&p.to_string_lossy()))
                .map_err(|e| FileError::OperationFailed(format!("{}: {e}", source.uri)))?;

            let unpacked = entry
                .unpack_in(dest_dir)
                .map_err(|e| FileError::from_io(e, &join_path(&destination.uri, &member)))?;
            if !unpacked {
                warn!("Skipped archive member outside destination: {member}");
                continue;
            }

            let header = entry.header();
            let extracted = FileEntry {
                uri: join_path(&destination.uri, member.trim_end_matches('/')),
                backend_id: destination.backend_id.clone(),
                size: header.size().unwrap_or(0),
                last_modified: header
                    .mtime()
                    .ok()
                    .and_then(|s| i64::try_from(s).ok())
                    .and_then(|s| s.checked_mul(1000))
                    .unwrap_or(0),
                is_directory: header.entry_type().is_dir(),
                permissions: header.mode().map(Permission::from_mode).unwrap_or_default(),
            };
            if !sink.emit(extracted) {
                debug!("Extraction of {} abandoned by consumer", source.uri);
                break;
            }
        }
        Ok(())
    })
}

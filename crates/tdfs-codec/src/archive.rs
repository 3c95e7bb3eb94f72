//! Deterministic tar+gzip packing and unpacking.

use crate::{CodecError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::EntryType;
use walkdir::WalkDir;

/// Timestamp applied to every archive entry: `2000-01-01T00:00:00Z`.
///
/// Entry times are the only non-content source of archive nondeterminism,
/// so access/change/modification times are all pinned here.
pub const ARCHIVE_EPOCH: u64 = 946_684_800;

/// Produce a gzip-wrapped tar of all regular files under `from`.
///
/// Entry names are relative to `from` with no leading separator; the root
/// directory itself, non-regular files, and the output file are excluded.
/// The archive is written to a fresh temp file whose path is returned; the
/// caller owns moving or deleting it.
pub fn compress_folder(from: &Path) -> Result<PathBuf> {
    let tmp = tempfile::Builder::new()
        .prefix("tdfs-blob-")
        .suffix(".tar.gz")
        .tempfile()?;
    let (file, out_path) = tmp.keep().map_err(|e| CodecError::Io(e.error))?;

    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_tree(&mut builder, from, Some(&out_path))?;
    let encoder = builder.into_inner()?;
    let mut inner = encoder.finish()?;
    inner.flush()?;

    tracing::debug!(folder = %from.display(), archive = %out_path.display(), "folder compressed");
    Ok(out_path)
}

/// Write the same tar stream as [`compress_folder`], uncompressed, into any
/// writer. Used to compute the diff-ID of a layer before compression.
pub fn archive_folder<W: Write>(from: &Path, writer: W) -> Result<()> {
    let mut builder = tar::Builder::new(writer);
    append_tree(&mut builder, from, None)?;
    let mut inner = builder.into_inner()?;
    inner.flush()?;
    Ok(())
}

fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    exclude: Option<&Path>,
) -> Result<()> {
    // Sorted walk keeps entry order stable across runs and filesystems.
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.path() == root || !entry.file_type().is_file() {
            continue;
        }
        if exclude.is_some_and(|out| entry.path() == out) {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| CodecError::PathOutsideRoot(entry.path().display().to_string()))?;
        let meta = entry.metadata()?;

        let mut header = tar::Header::new_gnu();
        header.set_size(meta.len());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            header.set_mode(meta.permissions().mode());
        }
        header.set_mtime(ARCHIVE_EPOCH);
        if let Some(gnu) = header.as_gnu_mut() {
            gnu.set_atime(ARCHIVE_EPOCH);
            gnu.set_ctime(ARCHIVE_EPOCH);
        }

        let mut file = File::open(entry.path())?;
        builder.append_data(&mut header, rel, &mut file)?;
    }
    Ok(())
}

/// Unpack a `.tar.gz` archive under `dst`, creating directories as needed
/// and preserving file mode bits from the entry headers. Entry types other
/// than directories and regular files are skipped.
pub fn decompress_archive(archive: &Path, dst: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut tar = tar::Archive::new(decoder);
    tar.set_preserve_permissions(true);

    for entry in tar.entries()? {
        let mut entry = entry?;
        match entry.header().entry_type() {
            EntryType::Directory | EntryType::Regular => {
                entry.unpack_in(dst)?;
            }
            _ => continue,
        }
    }
    Ok(())
}

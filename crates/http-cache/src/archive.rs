//! Artifact archive codec
//!
//! An artifact is a zstd-compressed tar stream holding the output files of a
//! task, named relative to the anchor directory they were collected from.
//! Headers are normalized (uid/gid/mtime zeroed) so that the same files
//! always produce the same bytes, which keeps artifact tags stable.
//!
//! Both halves work over plain [`Read`]/[`Write`] so the same code serves a
//! live response stream and a fully buffered body.

use crate::{Error, Result};
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{EntryType, Header};

/// Compression level used for artifacts
const ZSTD_LEVEL: i32 = 3;

/// Streams files into a compressed artifact
pub struct ArchiveWriter<W: Write> {
    builder: tar::Builder<zstd::Encoder<'static, W>>,
}

impl<W: Write> ArchiveWriter<W> {
    /// Start an artifact on top of `writer`
    pub fn new(writer: W) -> Result<Self> {
        let encoder = zstd::Encoder::new(writer, ZSTD_LEVEL)
            .map_err(|e| Error::archive(format!("zstd encoder error: {e}")))?;
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        Ok(Self { builder })
    }

    /// Append `file` (relative to `anchor`) to the artifact
    ///
    /// Regular files, directories and symlinks are supported; anything else
    /// is rejected so that restores are never lossy.
    pub fn add_file(&mut self, anchor: &Path, file: &Path) -> Result<()> {
        let name = archive_name(file)?;
        let source = anchor.join(file);
        let metadata =
            fs::symlink_metadata(&source).map_err(|e| Error::io(e, &source, "stat"))?;

        let mut header = Header::new_gnu();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_mode(file_mode(&metadata));

        let file_type = metadata.file_type();
        let appended = if file_type.is_symlink() {
            let target = fs::read_link(&source).map_err(|e| Error::io(e, &source, "read_link"))?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            self.builder.append_link(&mut header, &name, &target)
        } else if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            self.builder.append_data(&mut header, &name, io::empty())
        } else if file_type.is_file() {
            header.set_entry_type(EntryType::Regular);
            header.set_size(metadata.len());
            let contents = fs::File::open(&source).map_err(|e| Error::io(e, &source, "open"))?;
            self.builder.append_data(&mut header, &name, contents)
        } else {
            return Err(Error::archive(format!(
                "unsupported file type for {}",
                source.display()
            )));
        };

        appended.map_err(|e| Error::io(e, &source, "archive"))
    }

    /// Write the tar trailer, flush the compressor and hand back the writer
    pub fn finish(self) -> Result<W> {
        let encoder = self
            .builder
            .into_inner()
            .map_err(|e| Error::archive(format!("tar finalize failed: {e}")))?;
        encoder
            .finish()
            .map_err(|e| Error::archive(format!("zstd finish failed: {e}")))
    }
}

/// Restores the files of a compressed artifact
pub struct ArchiveReader<R: Read> {
    archive: tar::Archive<zstd::Decoder<'static, BufReader<R>>>,
}

impl<R: Read> ArchiveReader<R> {
    /// Read an artifact from `reader`
    pub fn new(reader: R) -> Result<Self> {
        let decoder = zstd::Decoder::new(reader)
            .map_err(|e| Error::archive(format!("zstd decoder error: {e}")))?;
        let mut archive = tar::Archive::new(decoder);
        archive.set_overwrite(true);
        archive.set_preserve_mtime(false);
        archive.set_preserve_permissions(true);
        Ok(Self { archive })
    }

    /// Restore every entry under `anchor`, returning the restored paths in archive order
    pub fn restore(&mut self, anchor: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(anchor).map_err(|e| Error::io(e, anchor, "create_dir_all"))?;

        let mut restored = Vec::new();
        let entries = self
            .archive
            .entries()
            .map_err(|e| Error::archive(format!("failed to read artifact: {e}")))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| Error::archive(format!("failed to read entry: {e}")))?;
            let raw = entry
                .path()
                .map_err(|e| Error::archive(format!("malformed entry name: {e}")))?
                .into_owned();
            let path = restored_path(&raw)?;

            match entry.header().entry_type() {
                EntryType::Regular | EntryType::Directory | EntryType::Symlink => {}
                other => {
                    return Err(Error::archive(format!(
                        "unsupported entry type {other:?} for {}",
                        raw.display()
                    )));
                }
            }

            let unpacked = entry
                .unpack_in(anchor)
                .map_err(|e| Error::io(e, anchor.join(&path), "restore"))?;
            if !unpacked {
                return Err(Error::archive(format!(
                    "refusing to restore {} outside of {}",
                    raw.display(),
                    anchor.display()
                )));
            }
            restored.push(path);
        }

        Ok(restored)
    }
}

/// Restore an artifact from `reader` into `anchor`
pub fn restore_archive(reader: impl Read, anchor: &Path) -> Result<Vec<PathBuf>> {
    ArchiveReader::new(reader)?.restore(anchor)
}

/// Forward-slash name for a relative path
fn archive_name(file: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in file.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    Error::archive(format!("path is not valid UTF-8: {}", file.display()))
                })?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(Error::archive(format!(
                    "artifact paths must be relative and stay inside the anchor: {}",
                    file.display()
                )));
            }
        }
    }
    if parts.is_empty() {
        return Err(Error::archive("artifact path is empty"));
    }
    Ok(parts.join("/"))
}

/// Validate an entry name and turn it into a relative path
fn restored_path(raw: &Path) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::archive(format!(
                    "malformed entry name: {}",
                    raw.display()
                )));
            }
        }
    }
    if path.as_os_str().is_empty() {
        return Err(Error::archive("artifact entry has an empty name"));
    }
    Ok(path)
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() { 0o755 } else { 0o644 }
}

//! Leaf directory archives
//!
//! A leaf directory is bundled into one uncompressed tar file holding the
//! member files the caller selected, all direct children of the directory.
//! Entries are written in name order with owner and permission metadata
//! normalized, so the same members always produce the same bytes.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, instrument, warn};

use cloudbak_core::ports::IArchiver;

use crate::{keep, scratch_file, CodecError};

/// `IArchiver` writing plain tar files into a temporary directory
#[derive(Debug, Clone)]
pub struct TarArchiver {
    temp_dir: PathBuf,
}

impl TarArchiver {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

fn mtime_secs(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Archive entry names of `members`, sorted, each checked to sit directly
/// inside `dir`
fn member_names<'a>(dir: &Path, members: &'a [PathBuf]) -> Result<Vec<(String, &'a Path)>, CodecError> {
    let mut names = Vec::with_capacity(members.len());
    for path in members {
        if path.parent() != Some(dir) {
            return Err(CodecError::Archive(format!(
                "{} is not directly inside {}",
                path.display(),
                dir.display()
            )));
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => names.push((name.to_string(), path.as_path())),
            None => warn!(path = %path.display(), "Skipping non UTF-8 file name"),
        }
    }
    names.sort_by(|a, b| a.0.cmp(&b.0));
    names.dedup_by(|a, b| a.0 == b.0);
    Ok(names)
}

fn write_archive(dir: &Path, members: &[PathBuf], output: &mut File) -> Result<usize, CodecError> {
    let members = member_names(dir, members)?;
    let mut builder = Builder::new(BufWriter::new(output));
    builder.follow_symlinks(false);

    let mut written = 0;
    for (name, path) in &members {
        let metadata = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "File vanished while archiving");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_file() {
            debug!(path = %path.display(), "Skipping non-file member");
            continue;
        }
        let file = File::open(path)?;

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mtime(mtime_secs(&metadata));
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(if is_executable(&metadata) { 0o755 } else { 0o644 });
        header.set_size(metadata.len());
        builder.append_data(&mut header, Path::new(name), file)?;
        written += 1;
    }

    let mut writer = builder.into_inner()?;
    writer.flush()?;
    Ok(written)
}

/// Rejects member names that would land outside the target directory
fn safe_member_name(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn expand_archive(archive: &Path, dir: &Path) -> Result<usize, CodecError> {
    fs::create_dir_all(dir)?;
    let mut archive = Archive::new(File::open(archive)?);
    archive.set_preserve_mtime(true);

    let mut expanded = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.into_owned();
        if !safe_member_name(&name) {
            return Err(CodecError::Archive(format!(
                "refusing archive member {}",
                name.display()
            )));
        }
        if entry.header().entry_type() != EntryType::Regular {
            debug!(member = %name.display(), "Skipping non-file archive member");
            continue;
        }
        entry.unpack(dir.join(&name))?;
        expanded += 1;
    }
    Ok(expanded)
}

#[async_trait::async_trait]
impl IArchiver for TarArchiver {
    #[instrument(skip(self, members), fields(dir = %dir.display(), members = members.len()))]
    async fn compress(&self, dir: &Path, members: &[PathBuf]) -> anyhow::Result<PathBuf> {
        let dir = dir.to_path_buf();
        let members = members.to_vec();
        let temp_dir = self.temp_dir.clone();

        let (output, written) = tokio::task::spawn_blocking(move || -> Result<_, CodecError> {
            let mut scratch = scratch_file(&temp_dir, ".tar")?;
            let written = write_archive(&dir, &members, scratch.as_file_mut())?;
            Ok((keep(scratch)?, written))
        })
        .await??;

        debug!(archive = %output.display(), written, "Archive written");
        Ok(output)
    }

    #[instrument(skip(self), fields(archive = %archive.display(), dir = %dir.display()))]
    async fn decompress(&self, archive: &Path, dir: &Path) -> anyhow::Result<()> {
        let archive = archive.to_path_buf();
        let dir = dir.to_path_buf();
        let members = tokio::task::spawn_blocking(move || expand_archive(&archive, &dir)).await??;
        debug!(members, "Archive expanded");
        Ok(())
    }
}

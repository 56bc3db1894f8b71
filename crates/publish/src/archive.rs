use crate::error::{ErrorKind, Result};
use crate::{Outcome, Sink, tree};
use async_trait::async_trait;
use bzip2::write::BzEncoder;
use exn::ResultExt;
use flate2::write::GzEncoder;
use freeze_config::{ArchiveCompression, ArchiveSettings, SinkKind};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::instrument;
use walkdir::WalkDir;

const GZIP_LEVEL: flate2::Compression = flate2::Compression::best();
const BZIP2_LEVEL: bzip2::Compression = bzip2::Compression::best();
const ARCHIVE_PREFIX: &str = "freeze-";

/// `freeze-YYYYMMDD-HHMMSS.tar.gz` (or `.tar.bz2`).
pub fn archive_name(at: OffsetDateTime, compression: ArchiveCompression) -> String {
    let stamp = at
        .format(format_description!("[year][month][day]-[hour][minute][second]"))
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    let extension = match compression {
        ArchiveCompression::Gzip => "tar.gz",
        ArchiveCompression::Bzip2 => "tar.bz2",
    };
    format!("{ARCHIVE_PREFIX}{stamp}.{extension}")
}

/// An archive left behind by an earlier run.
fn is_previous_archive(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
        name.starts_with(ARCHIVE_PREFIX) && (name.ends_with(".tar.gz") || name.ends_with(".tar.bz2"))
    })
}

fn publishable(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    !tree::is_excluded(relative) && !is_previous_archive(path)
}

/// Packs the workspace into a timestamped compressed tarball.
#[derive(Debug)]
pub struct ArchiveSink {
    settings: ArchiveSettings,
}

impl ArchiveSink {
    pub fn new(settings: ArchiveSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Sink for ArchiveSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Archive
    }

    #[instrument(skip(self), fields(directory = %self.settings.directory.display()))]
    async fn publish(&self, workspace: &Path) -> Result<Outcome> {
        let name = archive_name(OffsetDateTime::now_utc(), self.settings.compression);
        let destination = self.settings.directory.join(&name);
        let (root, target, compression) = (workspace.to_path_buf(), destination.clone(), self.settings.compression);
        let files = tokio::task::spawn_blocking(move || write_archive(&root, &target, compression))
            .await
            .or_raise(|| ErrorKind::Task)?
            .or_raise(|| ErrorKind::Filesystem(destination.clone()))?;
        tracing::info!(path = %destination.display(), files, "Archive written");
        Ok(Outcome::Archived { path: destination, files })
    }
}

/// Write the archive next to its final name and move it into place once
/// complete. Returns the number of files packed.
fn write_archive(root: &Path, destination: &Path, compression: ArchiveCompression) -> io::Result<usize> {
    let directory = destination.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(directory)?;
    let partial = destination.with_extension("partial");
    let file = BufWriter::new(File::create(&partial)?);
    let result = match compression {
        ArchiveCompression::Gzip => pack(root, GzEncoder::new(file, GZIP_LEVEL)).and_then(|(encoder, files)| {
            encoder.finish()?.flush()?;
            Ok(files)
        }),
        ArchiveCompression::Bzip2 => pack(root, BzEncoder::new(file, BZIP2_LEVEL)).and_then(|(encoder, files)| {
            encoder.finish()?.flush()?;
            Ok(files)
        }),
    };
    match result {
        Ok(files) => {
            fs::rename(&partial, destination)?;
            Ok(files)
        },
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        },
    }
}

fn pack<W: Write>(root: &Path, writer: W) -> io::Result<(W, usize)> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    let mut files = 0;
    // Directories holding nothing publishable are skipped entirely.
    let walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter().filter_entry(|entry| {
        if !publishable(root, entry.path()) {
            return false;
        }
        !entry.file_type().is_dir() || tree::has_files(entry.path(), |p| publishable(root, p))
    });
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let relative: PathBuf = entry.path().strip_prefix(root).map_err(io::Error::other)?.to_path_buf();
        if entry.file_type().is_dir() {
            builder.append_dir(&relative, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), &relative)?;
            files += 1;
        }
    }
    Ok((builder.into_inner()?, files))
}

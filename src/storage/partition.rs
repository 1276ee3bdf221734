//! Day-partitioned CSV files: naming, durable appends, atomic rewrites and
//! retention.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::info;

/// Extension of every partition file
pub const PARTITION_EXTENSION: &str = "csv";

const DATE_FORMAT: &str = "%Y-%m-%d";
const PROBE_FILE: &str = ".write_probe";

/// `{prefix}_{YYYY-MM-DD}.csv`
pub fn partition_file_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}_{}.{}", prefix, date.format(DATE_FORMAT), PARTITION_EXTENSION)
}

/// Date embedded in a partition file name, if it belongs to `prefix`
///
/// `STN_1` does not claim `STN_1_A_2024-01-01.csv`: the remainder after the
/// prefix must be exactly a date.
pub fn partition_date(path: &Path, prefix: &str) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(&format!(".{}", PARTITION_EXTENSION))?;
    let date = stem.strip_prefix(prefix)?.strip_prefix('_')?;
    NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
}

/// Partition files for `prefix` under `root`, oldest first
pub fn list_partitions(root: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && partition_date(path, prefix).is_some())
        .collect();

    // Names embed ISO dates, so lexical order is chronological
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Create `root` if needed and prove it accepts writes
pub fn ensure_writable_dir(root: &Path) -> io::Result<()> {
    fs::create_dir_all(root)?;
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} is not a directory", root.display()),
        ));
    }

    let probe = root.join(PROBE_FILE);
    let mut file = File::create(&probe)?;
    file.write_all(b"ok")?;
    file.sync_all()?;
    drop(file);
    fs::remove_file(&probe)?;
    Ok(())
}

/// Append one row, writing `header` first when the file is new or empty
///
/// The file is synced to the device before returning, so an acknowledged row
/// survives a crash or power cut immediately afterwards.
pub fn append_row(path: &Path, header: &str, row: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_new = file.metadata()?.len() == 0;

    let mut buf = String::with_capacity(header.len() + row.len() + 2);
    if is_new {
        buf.push_str(header);
        buf.push('\n');
    }
    buf.push_str(row);
    buf.push('\n');

    file.write_all(buf.as_bytes())?;
    file.sync_all()?;

    if is_new {
        if let Some(parent) = path.parent() {
            sync_dir(parent)?;
        }
    }
    Ok(())
}

/// Replace `path` with `contents` via temp file, fsync and rename
///
/// A crash at any point leaves either the old or the new file, never a mix.
pub fn rewrite_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", PARTITION_EXTENSION));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.flush()?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Delete the oldest partitions for `prefix` beyond `max_files`
///
/// `keep` is never deleted, even when it is the oldest file; the next oldest
/// go instead. Returns the removed paths.
pub fn rotate(
    root: &Path,
    prefix: &str,
    max_files: usize,
    keep: Option<&Path>,
) -> io::Result<Vec<PathBuf>> {
    let files = list_partitions(root, prefix)?;
    if files.len() <= max_files {
        return Ok(Vec::new());
    }

    let excess = files.len() - max_files;
    let mut removed = Vec::with_capacity(excess);
    for path in files
        .into_iter()
        .filter(|path| keep.map_or(true, |keep| path.file_name() != keep.file_name()))
        .take(excess)
    {
        fs::remove_file(&path)?;
        info!("Rotated out old partition {}", path.display());
        removed.push(path);
    }
    Ok(removed)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

//! On-disk value-table snapshots.
//!
//! The file is a versioned JSON document:
//!
//! ```json
//! { "format_version": 1, "saved_at": "2024-01-15T14:30:00Z",
//!   "entries": [ { "key": [10000, 9950, 0, 30, 5555, 1, 1050], "values": [0.0, 1.5, -0.2] } ] }
//! ```
//!
//! `key` is the `StateKey` encoding (hundredths of each state component).
//! Unknown fields are ignored; a newer `format_version` is refused.
//! Versioned snapshots are named `<stem>_<YYYYMMDD_HHMMSS>.<ext>` (UTC), so
//! the lexicographically greatest name is the most recent.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::{Clock, Error, Result};

use crate::table::{Row, StateKey, ValueTable};

pub const FORMAT_VERSION: u32 = 1;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = 15;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    format_version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    key: StateKey,
    values: Row,
}

/// Reads and writes value-table snapshots at a fixed base path.
#[derive(Clone)]
pub struct TableStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl TableStore {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `table` to the fixed path, or to a timestamp-suffixed sibling
    /// when `versioned`. Returns the path written.
    pub fn save(&self, table: &ValueTable, versioned: bool) -> Result<PathBuf> {
        let now = self.clock.now();
        let target = if versioned {
            self.versioned_path(now)
        } else {
            self.path.clone()
        };

        let mut entries: Vec<SnapshotEntry> = table
            .iter()
            .map(|(key, values)| SnapshotEntry {
                key: *key,
                values: *values,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let file = SnapshotFile {
            format_version: FORMAT_VERSION,
            saved_at: now,
            entries,
        };
        let body = serde_json::to_vec(&file)
            .map_err(|e| Error::Persistence(format!("encoding snapshot: {e}")))?;

        // Write beside the target, then rename over it.
        let tmp = sibling_with_suffix(&target, ".tmp");
        fs::write(&tmp, &body)
            .map_err(|e| Error::Persistence(format!("writing {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &target)
            .map_err(|e| Error::Persistence(format!("renaming to {}: {e}", target.display())))?;

        debug!(path = %target.display(), states = table.len(), "Value table saved");
        Ok(target)
    }

    /// Read the fixed-path snapshot, or the most recent versioned one.
    /// Versioned loads fall back to the fixed path when no versioned file
    /// exists. `Ok(None)` when no snapshot exists.
    pub fn load(&self, versioned: bool) -> Result<Option<ValueTable>> {
        let source = match versioned {
            true => self.latest_versioned()?.unwrap_or_else(|| self.path.clone()),
            false => self.path.clone(),
        };

        let body = match fs::read(&source) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!("reading {}: {e}", source.display())))
            }
        };

        let file: SnapshotFile = serde_json::from_slice(&body)
            .map_err(|e| Error::Persistence(format!("decoding {}: {e}", source.display())))?;
        if file.format_version > FORMAT_VERSION {
            return Err(Error::Persistence(format!(
                "{} has format version {}, newest supported is {FORMAT_VERSION}",
                source.display(),
                file.format_version
            )));
        }

        info!(
            path = %source.display(),
            states = file.entries.len(),
            saved_at = %file.saved_at,
            "Value table loaded"
        );
        Ok(Some(ValueTable::from_rows(
            file.entries.into_iter().map(|e| (e.key, e.values)),
        )))
    }

    /// Path of a versioned snapshot taken at `at`.
    pub fn versioned_path(&self, at: DateTime<Utc>) -> PathBuf {
        let (stem, ext) = self.stem_and_extension();
        let stamp = at.format(TIMESTAMP_FORMAT);
        let name = match ext {
            Some(ext) => format!("{stem}_{stamp}.{ext}"),
            None => format!("{stem}_{stamp}"),
        };
        self.path.with_file_name(name)
    }

    /// The lexicographically greatest (hence newest) versioned snapshot.
    pub fn latest_versioned(&self) -> Result<Option<PathBuf>> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let (stem, ext) = self.stem_and_extension();
        let prefix = format!("{stem}_");
        let suffix = ext.map(|e| format!(".{e}")).unwrap_or_default();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!("listing {}: {e}", dir.display())))
            }
        };

        let mut latest: Option<String> = None;
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(stamp) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
            else {
                continue;
            };
            if !is_timestamp(stamp) {
                continue;
            }
            if latest.as_deref().map_or(true, |l| name.as_str() > l) {
                latest = Some(name);
            }
        }
        Ok(latest.map(|name| dir.join(name)))
    }

    fn stem_and_extension(&self) -> (String, Option<String>) {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "q_table".to_string());
        let ext = self
            .path
            .extension()
            .map(|e| e.to_string_lossy().into_owned());
        (stem, ext)
    }
}

fn is_timestamp(stamp: &str) -> bool {
    stamp.len() == TIMESTAMP_LEN
        && stamp.char_indices().all(|(i, c)| match i {
            8 => c == '_',
            _ => c.is_ascii_digit(),
        })
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Advisory single-writer guard for a snapshot path.
///
/// Holds `<model_path>.lock` for its lifetime. A second writer pointed at the
/// same path fails to acquire it. A lock left behind by a crashed process
/// must be removed by hand.
#[derive(Debug)]
pub struct TableLock {
    path: PathBuf,
}

impl TableLock {
    pub fn acquire(model_path: &Path) -> Result<Self> {
        let path = sibling_with_suffix(model_path, ".lock");
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::Persistence(format!(
                    "{} is held by another writer (remove it if the owner is gone)",
                    path.display()
                )))
            }
            Err(e) => {
                return Err(Error::Persistence(format!("creating {}: {e}", path.display())))
            }
        };
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            warn!(path = %path.display(), error = %e, "Failed to record owner pid in table lock");
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release table lock");
        }
    }
}

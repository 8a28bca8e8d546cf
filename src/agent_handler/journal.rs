//! Append-only local journal of every record handed to the transport.
//!
//! Each record is written as one JSON object per line to
//! `<backup_dir>/treasuredata/<database>/<table>/backup.log`. The file is
//! reopened when it is moved or deleted underneath us, so external log
//! rotation works without signalling the process. Nothing reads the
//! journal back.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use thiserror::Error;

use crate::flatten::FlatRecord;

const JOURNAL_ROOT: &str = "treasuredata";
const JOURNAL_FILE: &str = "backup.log";

/// Failure to persist a record to the local journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("failed to create journal directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to open journal {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to write journal {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to encode journal record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Location of the journal file for `database` and `table`.
pub fn journal_path(backup_dir: &Path, database: &str, table: &str) -> PathBuf {
    backup_dir
        .join(JOURNAL_ROOT)
        .join(database)
        .join(table)
        .join(JOURNAL_FILE)
}

/// Encode `record` as compact JSON with `</` escaped as `<\/`.
pub fn json_encode(record: &FlatRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string(record).map(|json| json.replace("</", "<\\/"))
}

#[cfg(unix)]
type FileIdentity = (u64, u64);
#[cfg(not(unix))]
type FileIdentity = ();

#[cfg(unix)]
fn identity(meta: &fs::Metadata) -> FileIdentity {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn identity(_meta: &fs::Metadata) -> FileIdentity {}

#[derive(Debug)]
struct OpenJournal {
    file: File,
    identity: FileIdentity,
}

/// Rotation-aware journal writer. One writer per handler.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    current: Mutex<Option<OpenJournal>>,
}

impl Journal {
    /// Create the journal directories and open the file for appending.
    pub fn open(backup_dir: &Path, database: &str, table: &str) -> Result<Self, JournalError> {
        let path = journal_path(backup_dir, database, table);
        let journal = Self {
            path,
            current: Mutex::new(None),
        };
        *journal.current.lock() = Some(journal.reopen()?);
        Ok(journal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reopen(&self) -> Result<OpenJournal, JournalError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|source| JournalError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let open_err = |source| JournalError::Open {
            path: self.path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(open_err)?;
        let meta = file.metadata().map_err(open_err)?;
        Ok(OpenJournal {
            file,
            identity: identity(&meta),
        })
    }

    /// Whether the open handle still refers to the file at `path`.
    fn is_current(&self, open: &OpenJournal) -> bool {
        fs::metadata(&self.path).is_ok_and(|meta| identity(&meta) == open.identity)
    }

    /// Append `records`, one line each.
    ///
    /// Records are encoded before anything is written, so an encoding
    /// failure leaves the journal untouched.
    pub fn append(&self, records: &[FlatRecord]) -> Result<(), JournalError> {
        let mut lines = String::new();
        for record in records {
            lines.push_str(&json_encode(record)?);
            lines.push('\n');
        }
        let mut current = self.current.lock();
        if !current.as_ref().is_some_and(|open| self.is_current(open)) {
            *current = Some(self.reopen()?);
        }
        let Some(open) = current.as_mut() else {
            return Ok(());
        };
        let result = open
            .file
            .write_all(lines.as_bytes())
            .and_then(|()| open.file.flush());
        if let Err(source) = result {
            *current = None;
            return Err(JournalError::Write {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }
}

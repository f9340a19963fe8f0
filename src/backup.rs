// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Env file backups.
//!
//! Before envsync performs a destructive rewrite of a local env file, a full
//! copy of the previous file is placed in a backup directory under a name that
//! carries the time it was taken, e.g., `.env.20261018-142210.bak`. Backups are
//! never pruned automatically.

use chrono::NaiveDateTime;
use glob::{glob, Pattern};
use std::{
    fs::copy,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Timestamp layout used in backup file names.
pub const BACKUP_STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Record of a backup that was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// File that was backed up.
    pub source: PathBuf,

    /// Location of the copy.
    pub path: PathBuf,

    /// Time the backup was taken.
    pub taken_at: NaiveDateTime,
}

/// Copy target file into backup directory.
///
/// Backup directory is created if missing. If a backup with the same
/// timestamp already exists, a numeric suffix is added instead of
/// overwriting it.
///
/// # Errors
///
/// - Return [`BackupError::CreateDir`] if backup directory cannot be created.
/// - Return [`BackupError::Copy`] if file cannot be copied.
#[instrument(skip(source, backup_dir), level = "debug")]
pub fn create_backup(
    source: impl AsRef<Path>,
    backup_dir: impl AsRef<Path>,
    taken_at: NaiveDateTime,
) -> Result<BackupRecord> {
    let source = source.as_ref();
    let backup_dir = backup_dir.as_ref();
    mkdirp::mkdirp(backup_dir).map_err(|err| BackupError::CreateDir {
        source: err,
        path: backup_dir.to_path_buf(),
    })?;

    let base = format!(
        "{}.{}",
        file_name(source),
        taken_at.format(BACKUP_STAMP_FORMAT)
    );
    let mut path = backup_dir.join(format!("{base}.bak"));
    let mut attempt = 1;
    while path.exists() {
        path = backup_dir.join(format!("{base}-{attempt}.bak"));
        attempt += 1;
    }

    copy(source, &path).map_err(|err| BackupError::Copy {
        source: err,
        from: source.to_path_buf(),
        to: path.clone(),
    })?;
    info!("backed up {:?} to {:?}", source.display(), path.display());

    Ok(BackupRecord {
        source: source.to_path_buf(),
        path,
        taken_at,
    })
}

/// List existing backups of target file, oldest first.
///
/// # Errors
///
/// - Return [`BackupError::Pattern`] if backup search pattern is invalid.
/// - Return [`BackupError::Glob`] if backup directory cannot be traversed.
pub fn list_backups(
    source: impl AsRef<Path>,
    backup_dir: impl AsRef<Path>,
) -> Result<Vec<PathBuf>> {
    // INVARIANT: Only match names whose stamp follows the file name directly.
    let pattern = format!(
        "{}/{}.[0-9]*.bak",
        Pattern::escape(&backup_dir.as_ref().to_string_lossy()),
        Pattern::escape(&file_name(source.as_ref())),
    );

    let mut backups = Vec::new();
    for entry in glob(&pattern)? {
        backups.push(entry?);
    }

    // INVARIANT: Collision copies sort after the plain copy of their stamp.
    backups.sort_by_cached_key(|path| backup_order(path));

    Ok(backups)
}

/// Sort key of a backup name: stamp, then collision suffix as a number.
fn backup_order(path: &Path) -> (String, u32) {
    let name = file_name(path);
    let stem = name.strip_suffix(".bak").unwrap_or(&name);
    let tag = stem.rsplit_once('.').map(|(_, tag)| tag).unwrap_or(stem);

    let mut parts = tag.splitn(3, '-');
    let stamp = match (parts.next(), parts.next()) {
        (Some(date), Some(time)) => format!("{date}-{time}"),
        _ => tag.to_string(),
    };
    let attempt = parts.next().and_then(|n| n.parse().ok()).unwrap_or(0);

    (stamp, attempt)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "env".into())
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Backup directory cannot be created.
    #[error("failed to create backup directory at {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be copied into backup directory.
    #[error("failed to back up {:?} to {:?}", from.display(), to.display())]
    Copy {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Backup search pattern is invalid.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Backup directory cannot be traversed.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
}

/// Friendly result alias :3
pub type Result<T, E = BackupError> = std::result::Result<T, E>;

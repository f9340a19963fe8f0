// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Env file synchronization.
//!
//! A __binding__ pairs one local env file with one project and config in the
//! secret store. For each binding envsync can push local keys to the store,
//! pull store keys into the local file, or compare the two sides without
//! changing either.
//!
//! # Data Flow
//!
//! Every action starts the same way: the local env file is read through the
//! [`EnvFile`] codec, and the remote side is fetched through a
//! [`SecretStore`]. Local overrides then adjust both sides (see
//! [`overrides`]), a [`MergeMode`] computes the result (see [`merge`]), and
//! the result is either uploaded as one complete replacement (push) or
//! written back to the local file atomically (pull).
//!
//! # Never Silently Lose Data
//!
//! Merge policies never drop keys from either side. Conflicting values that
//! a pull overwrites stay visible in a dated comment right above the new
//! assignment. Force policies are the exception, so they always report a full
//! replace warning, and a force pull backs up the previous file first.
//!
//! # Multiple Bindings
//!
//! Bindings are processed one after another. A failure in one binding does
//! not stop the others, and nothing is rolled back across bindings.

pub mod diff;
pub mod merge;
pub mod overrides;

use crate::{
    backup::{create_backup, BackupRecord},
    config::EnvironmentBinding,
    envfile::{format_assignment, write_atomic, EnvFile, KeyValueTable},
    path::tildify,
    store::SecretStore,
    sync::{
        diff::ChangeSet,
        merge::{Annotation, MergeCounts, MergeMode},
        overrides::LocalOverrides,
    },
};

use chrono::{Local, NaiveDateTime};
use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{debug, info, instrument, warn};

/// What to do with a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run one of the merge policies.
    Sync(MergeMode),

    /// Compare both sides in detail.
    Diff,

    /// Summarize how far both sides are apart.
    Status,
}

/// Runs actions against bindings through a secret store.
pub struct Synchronizer<S>
where
    S: SecretStore,
{
    store: S,
    clock: fn() -> NaiveDateTime,
}

impl<S> Synchronizer<S>
where
    S: SecretStore,
{
    /// Construct new synchronizer using local wall clock time.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, local_now)
    }

    /// Construct new synchronizer with custom clock for annotations and
    /// backup names.
    pub fn with_clock(store: S, clock: fn() -> NaiveDateTime) -> Self {
        Self { store, clock }
    }

    /// Run action against every binding in order.
    ///
    /// Failures are logged and recorded per binding. Remaining bindings still
    /// run.
    pub fn run_all(
        &self,
        bindings: &[EnvironmentBinding],
        action: Action,
    ) -> Vec<(String, Result<Report>)> {
        let mut outcomes = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let outcome = self.run(binding, action);
            if let Err(error) = &outcome {
                warn!("binding {:?} failed: {error}", binding.name);
            }
            outcomes.push((binding.name.clone(), outcome));
        }

        outcomes
    }

    /// Run action against one binding.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::EnvFile`] if local file is missing for push,
    ///   diff, or status, or cannot be read or written.
    /// - Return [`SyncError::Store`] if secret store is unavailable.
    /// - Return [`SyncError::Backup`] if force pull cannot back up local file.
    #[instrument(skip(self, binding), fields(binding = %binding.name), level = "debug")]
    pub fn run(&self, binding: &EnvironmentBinding, action: Action) -> Result<Report> {
        match action {
            Action::Sync(mode) if mode.is_push() => self.push(binding, mode).map(Report::Sync),
            Action::Sync(mode) => self.pull(binding, mode).map(Report::Sync),
            Action::Diff => self.compare(binding).map(Report::Diff),
            Action::Status => self.compare(binding).map(Report::Status),
        }
    }

    fn fetch_remote(&self, binding: &EnvironmentBinding) -> Result<KeyValueTable> {
        let text = self
            .store
            .fetch(&binding.store_namespace, &binding.store_environment)?;
        let remote = KeyValueTable::parse(&text);
        if remote.is_empty() {
            warn!("{} holds no secrets", binding.remote_label());
        }
        debug!("fetched {} keys from {}", remote.len(), binding.remote_label());

        Ok(remote)
    }

    fn push(&self, binding: &EnvironmentBinding, mode: MergeMode) -> Result<SyncReport> {
        let local = EnvFile::read(&binding.local_file)?;
        if local.is_empty() {
            warn!("{:?} is empty", binding.local_file.display());
        }
        let remote = self.fetch_remote(binding)?;
        let overrides = LocalOverrides::from(&binding.local_override_keys);
        let note = Annotation::new((self.clock)(), binding.remote_label());
        let result = mode.apply(&local, &remote, &overrides, &note);

        let changed = result.table != remote;
        if changed {
            info!("{mode} {} keys to {}", result.table.len(), binding.remote_label());
            self.store.replace(
                &binding.store_namespace,
                &binding.store_environment,
                &result.table.to_string(),
            )?;
        } else {
            info!("{} already up to date", binding.remote_label());
        }

        Ok(SyncReport::new(binding, mode, result.counts, changed, None))
    }

    fn pull(&self, binding: &EnvironmentBinding, mode: MergeMode) -> Result<SyncReport> {
        let existing = EnvFile::read_if_exists(&binding.local_file)?;
        if existing.is_none() {
            info!(
                "{:?} does not exist, creating it from {}",
                binding.local_file.display(),
                binding.remote_label()
            );
        }
        let remote = self.fetch_remote(binding)?;

        let taken_at = (self.clock)();
        let overrides = LocalOverrides::from(&binding.local_override_keys);
        let note = Annotation::new(taken_at, binding.remote_label());
        let local = existing.clone().unwrap_or_default();
        let result = mode.apply(&local, &remote, &overrides, &note);
        let rendered = result.rendered.unwrap_or_default();

        let changed = existing.is_none() || rendered != local.to_string();
        if !changed {
            info!("{:?} already up to date", binding.local_file.display());
            return Ok(SyncReport::new(binding, mode, result.counts, false, None));
        }

        // INVARIANT: Destructive rewrites are always recoverable.
        let backup = match (mode.is_force(), existing.is_some()) {
            (true, true) => Some(create_backup(
                &binding.local_file,
                &binding.backup_dir,
                taken_at,
            )?),
            _ => None,
        };

        write_atomic(&binding.local_file, &rendered)?;
        info!("{mode} wrote {:?}", binding.local_file.display());

        Ok(SyncReport::new(binding, mode, result.counts, true, backup))
    }

    fn compare(&self, binding: &EnvironmentBinding) -> Result<CompareReport> {
        let local = EnvFile::read(&binding.local_file)?.table();
        let remote = self.fetch_remote(binding)?;
        let changes = ChangeSet::compute(&local, &remote);

        Ok(CompareReport {
            binding: binding.name.clone(),
            local_file: tildify(&binding.local_file),
            remote_label: binding.remote_label(),
            overrides: LocalOverrides::from(&binding.local_override_keys),
            changes,
            local,
            remote,
        })
    }
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Outcome of an action against one binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Sync(SyncReport),
    Diff(CompareReport),
    Status(CompareReport),
}

impl Display for Report {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Sync(report) => report.fmt(fmt),
            Self::Diff(report) => report.fmt_diff(fmt),
            Self::Status(report) => report.fmt_status(fmt),
        }
    }
}

/// Summary of a push or pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Binding name.
    pub binding: String,

    /// Policy that ran.
    pub mode: MergeMode,

    /// `project/config` label of remote side.
    pub remote_label: String,

    /// Local env file path, for display.
    pub local_file: String,

    /// What happened to the target side.
    pub counts: MergeCounts,

    /// Whether the target side was actually written.
    pub changed: bool,

    /// Backup taken before a destructive rewrite.
    pub backup: Option<BackupRecord>,
}

impl SyncReport {
    fn new(
        binding: &EnvironmentBinding,
        mode: MergeMode,
        counts: MergeCounts,
        changed: bool,
        backup: Option<BackupRecord>,
    ) -> Self {
        Self {
            binding: binding.name.clone(),
            mode,
            remote_label: binding.remote_label(),
            local_file: tildify(&binding.local_file),
            counts,
            changed,
            backup,
        }
    }
}

impl Display for SyncReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let (from, to) = match self.mode.is_push() {
            true => (&self.local_file, &self.remote_label),
            false => (&self.remote_label, &self.local_file),
        };
        writeln!(
            fmt,
            "[{}] {} {from} -> {to}: {}",
            self.binding, self.mode, self.counts
        )?;

        if self.mode.is_force() {
            writeln!(
                fmt,
                "[{}] warning: full replace of {to}, {} key(s) not present in {from} were removed",
                self.binding, self.counts.removed
            )?;
        }

        if let Some(backup) = &self.backup {
            writeln!(
                fmt,
                "[{}] previous {} saved to {}",
                self.binding,
                self.local_file,
                tildify(&backup.path)
            )?;
        }

        if !self.changed {
            writeln!(fmt, "[{}] {to} already up to date", self.binding)?;
        }

        Ok(())
    }
}

/// Read-only comparison of both sides of a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareReport {
    /// Binding name.
    pub binding: String,

    /// Local env file path, for display.
    pub local_file: String,

    /// `project/config` label of remote side.
    pub remote_label: String,

    /// Override keys of binding, labelled in output.
    pub overrides: LocalOverrides,

    /// Partition of both key sets.
    pub changes: ChangeSet,

    /// Local key table.
    pub local: KeyValueTable,

    /// Remote key table.
    pub remote: KeyValueTable,
}

impl CompareReport {
    fn label(&self, key: &str) -> &'static str {
        match self.overrides.contains(key) {
            true => "  [local override, not synchronized]",
            false => "",
        }
    }

    fn fmt_diff(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(
            fmt,
            "[{}] {} <-> {}",
            self.binding, self.local_file, self.remote_label
        )?;

        if self.changes.is_in_sync() {
            return writeln!(fmt, "  in sync ({} keys)", self.changes.identical.len());
        }

        for key in &self.changes.local_only {
            let value = self.local.get(key).unwrap_or_default();
            writeln!(fmt, "  + {}{}", format_assignment(key, value), self.label(key))?;
        }

        for key in &self.changes.remote_only {
            let value = self.remote.get(key).unwrap_or_default();
            writeln!(fmt, "  - {}{}", format_assignment(key, value), self.label(key))?;
        }

        for key in &self.changes.changed {
            let ours = self.local.get(key).unwrap_or_default();
            let theirs = self.remote.get(key).unwrap_or_default();
            writeln!(
                fmt,
                "  ~ {key}: local {ours:?}, remote {theirs:?}{}",
                self.label(key)
            )?;
        }

        Ok(())
    }

    fn fmt_status(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let changes = &self.changes;
        if changes.is_in_sync() {
            return writeln!(
                fmt,
                "[{}] {} <-> {}: in sync ({} keys)",
                self.binding,
                self.local_file,
                self.remote_label,
                changes.identical.len()
            );
        }

        write!(
            fmt,
            "[{}] {} <-> {}: ",
            self.binding, self.local_file, self.remote_label
        )?;
        writeln!(
            fmt,
            "{} difference(s), {} local only, {} remote only, {} changed, {} identical",
            changes.difference_count(),
            changes.local_only.len(),
            changes.remote_only.len(),
            changes.changed.len(),
            changes.identical.len()
        )?;

        let on_overrides = changes
            .local_only
            .iter()
            .chain(&changes.remote_only)
            .chain(&changes.changed)
            .filter(|key| self.overrides.contains(key))
            .count();
        if on_overrides > 0 {
            writeln!(
                fmt,
                "[{}] {on_overrides} difference(s) on local override keys, not synchronized",
                self.binding
            )?;
        }

        Ok(())
    }
}

/// Synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Configuration is unusable.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Local env file cannot be read or written.
    #[error(transparent)]
    EnvFile(#[from] crate::envfile::EnvFileError),

    /// Secret store cannot be reached.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    /// Backup of local env file fails.
    #[error(transparent)]
    Backup(#[from] crate::backup::BackupError),
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    use chrono::NaiveDate;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::{collections::BTreeSet, path::PathBuf};

    fn fixed_clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 18)
            .and_then(|date| date.and_hms_opt(9, 30, 0))
            .unwrap()
    }

    fn binding(overrides: &[&str]) -> EnvironmentBinding {
        EnvironmentBinding {
            name: "dev".into(),
            store_namespace: "acme".into(),
            store_environment: "dev".into(),
            local_file: PathBuf::from(".env"),
            backup_dir: PathBuf::from(".env-backups"),
            local_override_keys: overrides
                .iter()
                .map(|key| key.to_string())
                .collect::<BTreeSet<_>>(),
        }
    }

    fn compare_report(
        local: KeyValueTable,
        remote: KeyValueTable,
        overrides: &[&str],
    ) -> CompareReport {
        CompareReport {
            binding: "dev".into(),
            local_file: ".env".into(),
            remote_label: "acme/dev".into(),
            overrides: LocalOverrides::new(overrides.iter().copied()),
            changes: ChangeSet::compute(&local, &remote),
            local,
            remote,
        }
    }

    #[test]
    fn diff_output_labels_override_keys() {
        let report = compare_report(
            KeyValueTable::from_iter([("MINE", "1"), ("SECRET", "path"), ("SAME", "s")]),
            KeyValueTable::from_iter([
                ("THEIRS", "2"),
                ("SECRET", "__REPLACE_ME__"),
                ("SAME", "s"),
            ]),
            &["SECRET"],
        );

        let expect = indoc! {r#"
            [dev] .env <-> acme/dev
              + MINE="1"
              - THEIRS="2"
              ~ SECRET: local "path", remote "__REPLACE_ME__"  [local override, not synchronized]
        "#};
        assert_eq!(Report::Diff(report).to_string(), expect);
    }

    #[test]
    fn status_output_summarizes_counts() {
        let report = compare_report(
            KeyValueTable::from_iter([("MINE", "1"), ("SECRET", "path"), ("SAME", "s")]),
            KeyValueTable::from_iter([("SECRET", "__REPLACE_ME__"), ("SAME", "s")]),
            &["SECRET"],
        );

        let expect = indoc! {r#"
            [dev] .env <-> acme/dev: 2 difference(s), 1 local only, 0 remote only, 1 changed, 1 identical
            [dev] 1 difference(s) on local override keys, not synchronized
        "#};
        assert_eq!(Report::Status(report).to_string(), expect);
    }

    #[test]
    fn status_output_when_in_sync() {
        let table = KeyValueTable::from_iter([("A", "1")]);
        let report = compare_report(table.clone(), table, &[]);

        assert_eq!(
            Report::Status(report).to_string(),
            "[dev] .env <-> acme/dev: in sync (1 keys)\n"
        );
    }

    #[test]
    fn force_report_carries_full_replace_warning() {
        let report = SyncReport::new(
            &binding(&[]),
            MergeMode::PushForce,
            MergeCounts {
                added: 0,
                updated: 1,
                kept: 2,
                removed: 3,
            },
            true,
            None,
        );

        let expect = indoc! {r#"
            [dev] push-force .env -> acme/dev: added 0, updated 1, kept 2, removed 3
            [dev] warning: full replace of acme/dev, 3 key(s) not present in .env were removed
        "#};
        assert_eq!(report.to_string(), expect);
    }

    #[test]
    fn push_requires_local_file() {
        let store = MemoryStore::new();
        let sync = Synchronizer::with_clock(&store, fixed_clock);
        let mut binding = binding(&[]);
        binding.local_file = PathBuf::from("envsync-test-does-not-exist/.env");

        let result = sync.run(&binding, Action::Sync(MergeMode::PushMerge));
        assert!(matches!(
            result,
            Err(SyncError::EnvFile(crate::envfile::EnvFileError::Missing { .. }))
        ));
        assert!(matches!(
            sync.run(&binding, Action::Status),
            Err(SyncError::EnvFile(crate::envfile::EnvFileError::Missing { .. }))
        ));
        assert_eq!(store.replacements(), 0);
    }
}

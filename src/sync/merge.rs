// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Merge policies.
//!
//! Four ways to reconcile a local env file with a remote key table. Each one
//! is a pure function over the two sides plus the local override set, and
//! produces a [`MergeResult`]: the resulting table, counts of what happened,
//! and for pulls the full text of the new env file.
//!
//! # Push Merge
//!
//! Start from the remote table. Keys both sides have take the local value,
//! keys only the local side has are added, and keys only the remote side has
//! stay untouched. Nothing is ever dropped from the remote side.
//!
//! # Push Force
//!
//! The local table replaces the remote table verbatim. Remote-only keys are
//! destroyed. This is the one policy that can lose data remotely.
//!
//! # Pull Merge
//!
//! Walk the local file line by line. A key whose remote value differs gets a
//! dated comment holding the old line, followed by the new assignment, so old
//! values stay greppable in version control history. Keys that agree, keys
//! only the local side has, comments, and blank lines come out unchanged.
//! Remote keys the file lacks are appended under a dated banner.
//!
//! # Pull Force
//!
//! The remote table is written out as a fresh file. Local-only keys and all
//! comments are discarded. Local override keys are the exception: force never
//! forces them, and their local lines survive.

use crate::{
    envfile::{format_assignment, EnvFile, KeyValueTable, Line},
    sync::overrides::{placeholder_line, LocalOverrides},
};

use chrono::NaiveDateTime;
use std::{
    collections::{BTreeSet, HashMap},
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Timestamp layout used in annotation comments.
pub const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Closed set of merge policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    PushMerge,
    PushForce,
    PullMerge,
    PullForce,
}

impl MergeMode {
    /// Select push policy.
    pub fn push(force: bool) -> Self {
        match force {
            true => Self::PushForce,
            false => Self::PushMerge,
        }
    }

    /// Select pull policy.
    pub fn pull(force: bool) -> Self {
        match force {
            true => Self::PullForce,
            false => Self::PullMerge,
        }
    }

    /// Check if policy sends data to the secret store.
    pub fn is_push(self) -> bool {
        matches!(self, Self::PushMerge | Self::PushForce)
    }

    /// Check if policy fully replaces its target.
    pub fn is_force(self) -> bool {
        matches!(self, Self::PushForce | Self::PullForce)
    }

    /// Apply policy to local file and remote table.
    pub fn apply(
        self,
        local: &EnvFile,
        remote: &KeyValueTable,
        overrides: &LocalOverrides,
        note: &Annotation,
    ) -> MergeResult {
        match self {
            Self::PushMerge => push_merge(&local.table(), remote, overrides),
            Self::PushForce => push_force(&local.table(), remote, overrides),
            Self::PullMerge => pull_merge(local, remote, overrides, note),
            Self::PullForce => pull_force(local, remote, overrides, note),
        }
    }
}

impl Display for MergeMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::PushMerge => "push-merge",
            Self::PushForce => "push-force",
            Self::PullMerge => "pull-merge",
            Self::PullForce => "pull-force",
        })
    }
}

/// Dated comment text written into pulled env files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    stamp: String,
    source: String,
}

impl Annotation {
    /// Construct new annotation for a pull from `source` at given time.
    pub fn new(taken_at: NaiveDateTime, source: impl Into<String>) -> Self {
        Self {
            stamp: taken_at.format(STAMP_FORMAT).to_string(),
            source: source.into(),
        }
    }

    fn previous_value(&self, raw: &str) -> String {
        format!("# [envsync {}] previous value: {raw}", self.stamp)
    }

    fn new_variables(&self) -> String {
        format!("# [envsync {}] new variables from {}", self.stamp, self.source)
    }

    fn local_overrides(&self) -> String {
        format!(
            "# [envsync {}] local overrides: set a machine-specific value and uncomment",
            self.stamp
        )
    }
}

/// Tally of what a merge did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeCounts {
    /// Keys the target did not have before.
    pub added: usize,

    /// Keys whose value in the target changed.
    pub updated: usize,

    /// Keys whose value in the target stayed the same.
    pub kept: usize,

    /// Keys the target lost. Only force policies remove anything.
    pub removed: usize,
}

impl MergeCounts {
    /// Check if merge changed nothing in its target.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

impl Display for MergeCounts {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "added {}, updated {}, kept {}",
            self.added, self.updated, self.kept
        )?;
        if self.removed > 0 {
            write!(fmt, ", removed {}", self.removed)?;
        }

        Ok(())
    }
}

/// Outcome of a merge policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Resulting key table of the target side.
    pub table: KeyValueTable,

    /// What happened to the target side.
    pub counts: MergeCounts,

    /// New env file text, for pull policies only.
    pub rendered: Option<String>,
}

/// Merge local table into remote table without dropping remote keys.
pub fn push_merge(
    local: &KeyValueTable,
    remote: &KeyValueTable,
    overrides: &LocalOverrides,
) -> MergeResult {
    // INVARIANT: Real override values never reach the store.
    let local = overrides.mask(local);
    let mut table = remote.clone();
    let mut counts = MergeCounts::default();

    for (key, theirs) in remote.iter() {
        match local.get(key) {
            Some(ours) if ours != theirs => {
                table.insert(key, ours);
                counts.updated += 1;
            }
            _ => counts.kept += 1,
        }
    }

    for (key, ours) in local.iter() {
        if !remote.contains_key(key) {
            table.insert(key, ours);
            counts.added += 1;
        }
    }

    MergeResult {
        table,
        counts,
        rendered: None,
    }
}

/// Replace remote table with local table.
pub fn push_force(
    local: &KeyValueTable,
    remote: &KeyValueTable,
    overrides: &LocalOverrides,
) -> MergeResult {
    let table = overrides.mask(local);
    let mut counts = MergeCounts::default();

    for (key, ours) in table.iter() {
        match remote.get(key) {
            None => counts.added += 1,
            Some(theirs) if theirs != ours => counts.updated += 1,
            Some(_) => counts.kept += 1,
        }
    }
    counts.removed = remote.keys().filter(|key| !table.contains_key(key)).count();

    MergeResult {
        table,
        counts,
        rendered: None,
    }
}

/// Merge remote table into local file, preserving its layout.
pub fn pull_merge(
    local: &EnvFile,
    remote: &KeyValueTable,
    overrides: &LocalOverrides,
    note: &Annotation,
) -> MergeResult {
    let local_table = local.table();
    let mut table = local_table.clone();
    let mut counts = MergeCounts::default();
    let mut out = Vec::with_capacity(local.lines().len());

    // INVARIANT: Only the last assignment of a key takes effect, so only that
    // line is ever rewritten. Shadowed duplicates pass through untouched.
    let effective = local
        .lines()
        .iter()
        .enumerate()
        .filter_map(|(index, line)| match line {
            Line::Assignment(assignment) => Some((assignment.key.as_str(), index)),
            _ => None,
        })
        .collect::<HashMap<_, _>>();

    for (index, line) in local.lines().iter().enumerate() {
        let Line::Assignment(assignment) = line else {
            out.push(line.raw().to_string());
            continue;
        };

        if effective.get(assignment.key.as_str()) != Some(&index) {
            out.push(assignment.raw.clone());
            continue;
        }

        if overrides.contains(&assignment.key) {
            out.push(assignment.raw.clone());
            counts.kept += 1;
            continue;
        }

        match remote.get(&assignment.key) {
            Some(theirs) if theirs != assignment.value => {
                out.push(note.previous_value(&assignment.raw));
                out.push(format_assignment(&assignment.key, theirs));
                table.insert(assignment.key.clone(), theirs);
                counts.updated += 1;
            }
            _ => {
                out.push(assignment.raw.clone());
                counts.kept += 1;
            }
        }
    }

    let fresh = remote
        .iter()
        .filter(|(key, _)| !local_table.contains_key(key) && !overrides.contains(key))
        .collect::<Vec<_>>();
    if !fresh.is_empty() {
        push_section(&mut out, note.new_variables());
        for (key, theirs) in fresh {
            out.push(format_assignment(key, theirs));
            table.insert(key, theirs);
            counts.added += 1;
        }
    }

    // INVARIANT: Offer missing override keys once, commented out.
    let hidden = overrides
        .iter()
        .filter(|key| {
            remote.contains_key(key)
                && !local_table.contains_key(key)
                && !local.has_commented_assignment(key)
        })
        .collect::<Vec<_>>();
    push_hidden_overrides(&mut out, note, &hidden);

    MergeResult {
        table,
        counts,
        rendered: Some(render(&out)),
    }
}

/// Replace local file with remote table, keeping local override lines.
pub fn pull_force(
    local: &EnvFile,
    remote: &KeyValueTable,
    overrides: &LocalOverrides,
    note: &Annotation,
) -> MergeResult {
    let local_table = local.table();
    let mut table = KeyValueTable::new();
    let mut counts = MergeCounts::default();
    let mut out = Vec::with_capacity(remote.len());
    let mut hidden = Vec::new();

    let keys = remote
        .keys()
        .chain(local_table.keys().filter(|key| overrides.contains(key)))
        .collect::<BTreeSet<_>>();

    for key in keys {
        if overrides.contains(key) {
            match local.last_assignment(key) {
                Some(assignment) => {
                    out.push(assignment.raw.clone());
                    table.insert(key, assignment.value.as_str());
                    counts.kept += 1;
                }
                None => hidden.push(key),
            }
            continue;
        }

        let Some(theirs) = remote.get(key) else {
            continue;
        };
        match local_table.get(key) {
            None => counts.added += 1,
            Some(ours) if ours != theirs => counts.updated += 1,
            Some(_) => counts.kept += 1,
        }
        out.push(format_assignment(key, theirs));
        table.insert(key, theirs);
    }
    counts.removed = local_table
        .keys()
        .filter(|key| !table.contains_key(key))
        .count();

    push_hidden_overrides(&mut out, note, &hidden);

    MergeResult {
        table,
        counts,
        rendered: Some(render(&out)),
    }
}

fn push_section(out: &mut Vec<String>, banner: String) {
    if out.last().is_some_and(|line| !line.trim().is_empty()) {
        out.push(String::new());
    }
    out.push(banner);
}

fn push_hidden_overrides(out: &mut Vec<String>, note: &Annotation, keys: &[&str]) {
    if keys.is_empty() {
        return;
    }

    push_section(out, note.local_overrides());
    for key in keys {
        out.push(placeholder_line(key));
    }
}

fn render(lines: &[String]) -> String {
    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }

    text
}

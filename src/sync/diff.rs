// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Key table comparison.
//!
//! A [`ChangeSet`] partitions the union of keys of two tables into four
//! disjoint groups: keys only the local side has, keys only the remote side
//! has, keys both sides have with different values, and keys both sides agree
//! on. Every key of either table lands in exactly one group.
//!
//! Values compare by exact string equality after quote stripping. There is no
//! type coercion and no whitespace trimming, so two values that differ only in
//! internal whitespace are changed, not identical.

use crate::envfile::KeyValueTable;

use std::collections::BTreeSet;

/// Partition of two key tables.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Keys present locally but not remotely.
    pub local_only: Vec<String>,

    /// Keys present remotely but not locally.
    pub remote_only: Vec<String>,

    /// Keys present on both sides with different values.
    pub changed: Vec<String>,

    /// Keys present on both sides with equal values.
    pub identical: Vec<String>,
}

impl ChangeSet {
    /// Compare local and remote tables.
    ///
    /// Each group is sorted by key.
    pub fn compute(local: &KeyValueTable, remote: &KeyValueTable) -> Self {
        let keys = local.keys().chain(remote.keys()).collect::<BTreeSet<_>>();

        let mut changes = Self::default();
        for key in keys {
            match (local.get(key), remote.get(key)) {
                (Some(_), None) => changes.local_only.push(key.to_string()),
                (None, Some(_)) => changes.remote_only.push(key.to_string()),
                (Some(ours), Some(theirs)) if ours != theirs => {
                    changes.changed.push(key.to_string())
                }
                (Some(_), Some(_)) => changes.identical.push(key.to_string()),
                (None, None) => unreachable!("key came from one of the tables"),
            }
        }

        changes
    }

    /// Check if both sides hold exactly the same keys and values.
    pub fn is_in_sync(&self) -> bool {
        self.local_only.is_empty() && self.remote_only.is_empty() && self.changed.is_empty()
    }

    /// Number of keys that differ in any way.
    pub fn difference_count(&self) -> usize {
        self.local_only.len() + self.remote_only.len() + self.changed.len()
    }
}

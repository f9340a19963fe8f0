// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local override handling.
//!
//! Some keys hold values that only make sense on one machine, e.g., a path to a
//! local certificate or a socket. These __local overrides__ never flow between
//! the env file and the secret store the normal way:
//!
//! - On push, a fixed placeholder replaces their value before anything reaches
//!   the store. Real local values never leave the machine.
//! - On pull, an existing local line for an override key is kept byte for
//!   byte, whatever the store says. A missing one is offered as a commented
//!   out placeholder so it can be discovered without being activated.
//! - Force pulls follow the same rule. Force never forces override keys.
//! - Diff and status still compare them, but label them so nobody acts on the
//!   discrepancy.

use crate::envfile::{format_assignment, KeyValueTable};

use std::collections::BTreeSet;

/// Value pushed to the store in place of any override key's real value.
pub const PLACEHOLDER: &str = "__REPLACE_ME__";

/// Set of keys exempt from normal synchronization.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LocalOverrides {
    keys: BTreeSet<String>,
}

impl LocalOverrides {
    /// Construct new override set.
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if target key is a local override.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Iterate over override keys in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Produce copy of table that is safe to hand to the secret store.
    ///
    /// Every override key is set to [`PLACEHOLDER`], including override keys
    /// that the table lacks, so the key stays discoverable remotely.
    pub fn mask(&self, table: &KeyValueTable) -> KeyValueTable {
        let mut masked = table.clone();
        for key in &self.keys {
            masked.insert(key.clone(), PLACEHOLDER);
        }

        masked
    }
}

impl From<&BTreeSet<String>> for LocalOverrides {
    fn from(keys: &BTreeSet<String>) -> Self {
        Self { keys: keys.clone() }
    }
}

/// Render commented out placeholder line for an override key.
pub fn placeholder_line(key: &str) -> String {
    format!("# {}", format_assignment(key, PLACEHOLDER))
}

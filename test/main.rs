// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod integration;

use chrono::{NaiveDate, NaiveDateTime};
use envsync::{EnvironmentBinding, KeyValueTable, MemoryStore};
use std::{collections::BTreeSet, path::PathBuf};

pub(crate) fn fixed_clock() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 18)
        .and_then(|date| date.and_hms_opt(9, 30, 0))
        .unwrap()
}

pub(crate) struct BindingFixture {
    binding: EnvironmentBinding,
}

impl BindingFixture {
    pub(crate) fn new(name: &str, env_file: &str) -> Self {
        Self {
            binding: EnvironmentBinding {
                name: name.into(),
                store_namespace: "acme".into(),
                store_environment: name.into(),
                local_file: PathBuf::from(env_file),
                backup_dir: PathBuf::from(".env-backups"),
                local_override_keys: BTreeSet::new(),
            },
        }
    }

    pub(crate) fn with_overrides(mut self, keys: &[&str]) -> Self {
        self.binding.local_override_keys = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    /// Seed remote side of binding in target store.
    pub(crate) fn seed<'a>(
        self,
        store: &MemoryStore,
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        store.insert(
            &self.binding.store_namespace,
            &self.binding.store_environment,
            KeyValueTable::from_iter(entries),
        );
        self
    }

    pub(crate) fn build(self) -> EnvironmentBinding {
        self.binding
    }
}

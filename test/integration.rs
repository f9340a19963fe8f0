// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{fixed_clock, BindingFixture};

use envsync::{
    backup::list_backups,
    envfile::EnvFileError,
    store::StoreError,
    sync::{merge::MergeCounts, SyncError},
    Action, KeyValueTable, MemoryStore, MergeMode, Report, SyncConfig, Synchronizer,
};

use anyhow::{bail, Result};
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};

fn pull(force: bool) -> Action {
    Action::Sync(MergeMode::pull(force))
}

fn push(force: bool) -> Action {
    Action::Sync(MergeMode::push(force))
}

fn sync_counts(report: Report) -> Result<MergeCounts> {
    match report {
        Report::Sync(report) => Ok(report.counts),
        other => bail!("expected sync report, got {other:?}"),
    }
}

#[sealed_test]
fn pull_merge_annotates_and_appends() -> Result<()> {
    let store = MemoryStore::new();
    let binding = BindingFixture::new("dev", ".env")
        .seed(&store, [("FOO", "2"), ("BAR", "3")])
        .build();
    write(".env", "FOO=\"1\"\n")?;

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    let counts = sync_counts(sync.run(&binding, pull(false))?)?;

    let expect = indoc! {r#"
        # [envsync 2026-10-18 09:30:00] previous value: FOO="1"
        FOO="2"

        # [envsync 2026-10-18 09:30:00] new variables from acme/dev
        BAR="3"
    "#};
    assert_eq!(read_to_string(".env")?, expect);
    assert_eq!(
        counts,
        MergeCounts {
            added: 1,
            updated: 1,
            kept: 0,
            removed: 0
        }
    );
    assert_eq!(store.replacements(), 0);

    Ok(())
}

#[sealed_test]
fn pull_is_idempotent() -> Result<()> {
    let store = MemoryStore::new();
    let binding = BindingFixture::new("dev", ".env")
        .with_overrides(&["SOCKET"])
        .seed(&store, [("FOO", "2"), ("SOCKET", "__REPLACE_ME__")])
        .build();
    write(".env", "# app\nFOO=1\n")?;

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    sync.run(&binding, pull(false))?;
    let first = read_to_string(".env")?;

    let report = sync.run(&binding, pull(false))?;
    assert_eq!(read_to_string(".env")?, first);
    match report {
        Report::Sync(report) => assert!(!report.changed),
        other => bail!("expected sync report, got {other:?}"),
    }

    Ok(())
}

#[sealed_test]
fn pull_creates_missing_env_file() -> Result<()> {
    let store = MemoryStore::new();
    let binding = BindingFixture::new("dev", "config/.env")
        .seed(&store, [("A", "1")])
        .build();

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    sync.run(&binding, pull(false))?;

    let expect = indoc! {r#"
        # [envsync 2026-10-18 09:30:00] new variables from acme/dev
        A="1"
    "#};
    assert_eq!(read_to_string("config/.env")?, expect);
    assert!(!Path::new(".env-backups").exists());

    Ok(())
}

#[sealed_test]
fn pull_force_backs_up_and_keeps_overrides() -> Result<()> {
    let store = MemoryStore::new();
    let binding = BindingFixture::new("dev", ".env")
        .with_overrides(&["CERT"])
        .seed(&store, [("B", "2"), ("A", "1"), ("CERT", "__REPLACE_ME__")])
        .build();
    let original = indoc! {r#"
        # old comment
        LOCAL_ONLY=gone
        CERT=/home/me/cert.pem
    "#};
    write(".env", original)?;

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    let report = match sync.run(&binding, pull(true))? {
        Report::Sync(report) => report,
        other => bail!("expected sync report, got {other:?}"),
    };

    let expect = indoc! {r#"
        A="1"
        B="2"
        CERT=/home/me/cert.pem
    "#};
    assert_eq!(read_to_string(".env")?, expect);
    assert_eq!(report.counts.removed, 1);

    let backup = match report.backup {
        Some(backup) => backup,
        None => bail!("force pull took no backup"),
    };
    assert_eq!(
        backup.path,
        PathBuf::from(".env-backups/.env.20261018-093000.bak")
    );
    assert_eq!(read_to_string(&backup.path)?, original);
    assert_eq!(list_backups(".env", ".env-backups")?, vec![backup.path]);

    Ok(())
}

#[sealed_test]
fn push_merge_masks_overrides_and_keeps_remote_keys() -> Result<()> {
    let store = MemoryStore::new();
    let binding = BindingFixture::new("dev", ".env")
        .with_overrides(&["CERT", "SOCKET"])
        .seed(&store, [("REMOTE_ONLY", "r"), ("SHARED", "old")])
        .build();
    write(".env", "SHARED=new\nCERT=/home/me/cert.pem\nLOCAL=l\n")?;

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    let counts = sync_counts(sync.run(&binding, push(false))?)?;

    let expect = KeyValueTable::from_iter([
        ("CERT", "__REPLACE_ME__"),
        ("LOCAL", "l"),
        ("REMOTE_ONLY", "r"),
        ("SHARED", "new"),
        ("SOCKET", "__REPLACE_ME__"),
    ]);
    assert_eq!(store.table("acme", "dev"), expect);
    assert_eq!(counts.added, 3);
    assert_eq!(counts.updated, 1);
    assert_eq!(store.replacements(), 1);

    // INVARIANT: Local file is never touched by a push.
    assert_eq!(
        read_to_string(".env")?,
        "SHARED=new\nCERT=/home/me/cert.pem\nLOCAL=l\n"
    );

    Ok(())
}

#[sealed_test]
fn push_skips_upload_when_remote_is_current() -> Result<()> {
    let store = MemoryStore::new();
    let binding = BindingFixture::new("dev", ".env")
        .seed(&store, [("A", "1"), ("B", "2")])
        .build();
    write(".env", "A=1\n")?;

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    let counts = sync_counts(sync.run(&binding, push(false))?)?;

    assert!(counts.is_noop());
    assert_eq!(store.replacements(), 0);

    Ok(())
}

#[sealed_test]
fn push_force_replaces_remote_table() -> Result<()> {
    let store = MemoryStore::new();
    let binding = BindingFixture::new("dev", ".env")
        .seed(&store, [("A", "1"), ("B", "2")])
        .build();
    write(".env", "A=1\n")?;

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    let report = sync.run(&binding, push(true))?;

    assert_eq!(
        store.table("acme", "dev"),
        KeyValueTable::from_iter([("A", "1")])
    );
    assert!(report.to_string().contains("warning: full replace of acme/dev"));

    Ok(())
}

#[sealed_test]
fn push_and_compare_require_local_file() -> Result<()> {
    let store = MemoryStore::new();
    let binding = BindingFixture::new("dev", ".env")
        .seed(&store, [("A", "1")])
        .build();

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    for action in [push(false), push(true), Action::Diff, Action::Status] {
        let result = sync.run(&binding, action);
        assert!(matches!(
            result,
            Err(SyncError::EnvFile(EnvFileError::Missing { .. }))
        ));
    }
    assert_eq!(store.replacements(), 0);

    Ok(())
}

#[sealed_test]
fn unavailable_store_leaves_file_alone() -> Result<()> {
    let store = MemoryStore::new();
    let binding = BindingFixture::new("dev", ".env").build();
    store.make_unavailable("acme", "dev");
    write(".env", "A=1\n")?;

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    let result = sync.run(&binding, pull(true));

    assert!(matches!(
        result,
        Err(SyncError::Store(StoreError::Unavailable { .. }))
    ));
    assert_eq!(read_to_string(".env")?, "A=1\n");
    assert!(!Path::new(".env-backups").exists());

    Ok(())
}

#[sealed_test]
fn run_all_continues_past_failed_binding() -> Result<()> {
    let store = MemoryStore::new();
    let bindings = vec![
        BindingFixture::new("dev", ".env").seed(&store, [("A", "1")]).build(),
        BindingFixture::new("staging", ".env.staging").build(),
        BindingFixture::new("prod", ".env.prod")
            .seed(&store, [("B", "2")])
            .build(),
    ];
    store.make_unavailable("acme", "staging");

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    let outcomes = sync.run_all(&bindings, pull(false));

    let names = outcomes
        .iter()
        .map(|(name, outcome)| (name.as_str(), outcome.is_ok()))
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![("dev", true), ("staging", false), ("prod", true)]
    );
    assert!(Path::new(".env").exists());
    assert!(!Path::new(".env.staging").exists());
    assert!(Path::new(".env.prod").exists());

    Ok(())
}

#[sealed_test]
fn status_after_push_and_pull_is_in_sync() -> Result<()> {
    let store = MemoryStore::new();
    let binding = BindingFixture::new("dev", ".env")
        .with_overrides(&["CERT"])
        .seed(&store, [("REMOTE", "r")])
        .build();
    write(".env", "LOCAL=l\nCERT=/tmp/cert.pem\n")?;

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    sync.run(&binding, push(false))?;
    sync.run(&binding, pull(false))?;

    let report = match sync.run(&binding, Action::Status)? {
        Report::Status(report) => report,
        other => bail!("expected status report, got {other:?}"),
    };

    // INVARIANT: Only the override key may differ.
    assert_eq!(report.changes.changed, vec!["CERT".to_string()]);
    assert!(report.changes.local_only.is_empty());
    assert!(report.changes.remote_only.is_empty());

    Ok(())
}

#[sealed_test]
fn multi_config_file_drives_every_binding() -> Result<()> {
    write(
        "envsync.toml",
        indoc! {r#"
            [settings]
            project = "acme"
            config = "dev"
            env_file = ".env"
            local_overrides = ["CERT"]
            multi_config = true
            configs = ["dev", "staging"]

            [config.staging]
            config = "stg"
            env_file = ".env.staging"
            local_overrides = []
        "#},
    )?;

    let config = SyncConfig::load("envsync.toml")?;
    let bindings = config.bindings()?;
    let store = MemoryStore::new();
    store.insert("acme", "dev", KeyValueTable::from_iter([("A", "dev")]));
    store.insert("acme", "stg", KeyValueTable::from_iter([("A", "stg")]));

    let sync = Synchronizer::with_clock(&store, fixed_clock);
    for (_, outcome) in sync.run_all(&bindings, pull(false)) {
        outcome?;
    }

    assert!(read_to_string(".env")?.contains("A=\"dev\""));
    assert!(read_to_string(".env.staging")?.contains("A=\"stg\""));
    assert!(bindings[0].local_override_keys.contains("CERT"));
    assert!(bindings[1].local_override_keys.is_empty());

    Ok(())
}

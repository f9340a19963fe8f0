// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Secret store access.
//!
//! Envsync treats the remote secret store as a collaborator that offers exactly
//! two operations for a given project and config: read everything, and
//! replace everything. No partial update primitive is assumed, which is why all
//! merge semantics are computed locally and pushed as one complete replacement.
//!
//! Both operations speak the same `KEY="VALUE"` text format that local env
//! files use. Authentication and transport security are entirely the store's
//! concern.
//!
//! # Implementations
//!
//! - [`DopplerCli`] shells out to the `doppler` command line client.
//! - [`MemoryStore`] keeps tables in memory, mainly for tests and dry runs.
//! - [`ProgressStore`] wraps another store and shows a spinner while a call is
//!   in flight.

use crate::envfile::KeyValueTable;

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    ffi::{OsStr, OsString},
    io::Write,
    process::Command,
    time::Duration,
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Environment variable that selects the doppler executable.
pub const DOPPLER_BIN_ENV: &str = "ENVSYNC_DOPPLER_BIN";

/// Prefix of metadata keys the store injects into every download.
pub const RESERVED_PREFIX: &str = "DOPPLER_";

/// Layer of indirection for secret store access.
pub trait SecretStore {
    /// Fetch full contents of target project and config as `KEY="VALUE"` text.
    fn fetch(&self, namespace: &str, environment: &str) -> Result<String>;

    /// Replace full contents of target project and config with given text.
    fn replace(&self, namespace: &str, environment: &str, contents: &str) -> Result<()>;
}

impl<S> SecretStore for &S
where
    S: SecretStore + ?Sized,
{
    fn fetch(&self, namespace: &str, environment: &str) -> Result<String> {
        (**self).fetch(namespace, environment)
    }

    fn replace(&self, namespace: &str, environment: &str, contents: &str) -> Result<()> {
        (**self).replace(namespace, environment, contents)
    }
}

/// Secret store access through the doppler command line client.
#[derive(Debug, Clone)]
pub struct DopplerCli {
    binary: OsString,
}

impl DopplerCli {
    /// Construct new doppler client that runs target executable.
    pub fn new(binary: impl Into<OsString>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Construct new doppler client from environment.
    ///
    /// Uses `$ENVSYNC_DOPPLER_BIN` if set, otherwise `doppler` from `$PATH`.
    pub fn from_env() -> Self {
        match std::env::var_os(DOPPLER_BIN_ENV) {
            Some(binary) if !binary.is_empty() => Self::new(binary),
            _ => Self::new("doppler"),
        }
    }

    fn call(
        &self,
        namespace: &str,
        environment: &str,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Result<String> {
        let mut bin_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        bin_args.extend([
            "--project".into(),
            namespace.into(),
            "--config".into(),
            environment.into(),
        ]);

        syscall_non_interactive(&self.binary, bin_args).map_err(|err| match err {
            SyscallError::Spawn(source) => StoreError::Spawn {
                source,
                binary: self.binary.clone(),
            },
            SyscallError::Failed(message) => StoreError::Unavailable {
                namespace: namespace.into(),
                environment: environment.into(),
                message,
            },
        })
    }
}

impl SecretStore for DopplerCli {
    #[instrument(skip(self), level = "debug")]
    fn fetch(&self, namespace: &str, environment: &str) -> Result<String> {
        debug!("download secrets from {namespace}/{environment}");
        let output = self.call(
            namespace,
            environment,
            ["secrets", "download", "--no-file", "--format", "env"],
        )?;

        // INVARIANT: Store metadata never takes part in synchronization.
        Ok(output
            .lines()
            .filter(|line| !line.trim_start().starts_with(RESERVED_PREFIX))
            .map(|line| format!("{line}\n"))
            .collect())
    }

    /// Upload full text, then delete every remote key the text lacks.
    ///
    /// The doppler client only offers upsert style uploads, so the full
    /// replace contract is completed by deleting stale keys afterwards.
    #[instrument(skip(self, contents), level = "debug")]
    fn replace(&self, namespace: &str, environment: &str, contents: &str) -> Result<()> {
        let current = KeyValueTable::parse(&self.fetch(namespace, environment)?);
        let incoming = KeyValueTable::parse(contents);

        let stage_err = |source| StoreError::Stage {
            source,
            namespace: namespace.into(),
            environment: environment.into(),
        };
        let mut staged = NamedTempFile::new().map_err(stage_err)?;
        staged.write_all(contents.as_bytes()).map_err(stage_err)?;
        staged.flush().map_err(stage_err)?;

        info!("upload {} secrets to {namespace}/{environment}", incoming.len());
        let mut upload: Vec<OsString> = vec!["secrets".into(), "upload".into()];
        upload.push(staged.path().as_os_str().to_os_string());
        upload.push("--silent".into());
        self.call(namespace, environment, upload)?;

        let stale = current
            .keys()
            .filter(|key| !incoming.contains_key(key) && !key.starts_with(RESERVED_PREFIX))
            .map(OsString::from)
            .collect::<Vec<_>>();
        if !stale.is_empty() {
            info!("delete {} secrets from {namespace}/{environment}", stale.len());
            let mut delete: Vec<OsString> = vec!["secrets".into(), "delete".into()];
            delete.extend(stale);
            delete.extend(["--yes".into(), "--silent".into()]);
            self.call(namespace, environment, delete)?;
        }

        Ok(())
    }
}

/// In-memory secret store.
///
/// Coordinates can be marked unavailable to simulate network or
/// authentication failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RefCell<HashMap<(String, String), KeyValueTable>>,
    unavailable: RefCell<HashSet<(String, String)>>,
    replacements: RefCell<usize>,
}

impl MemoryStore {
    /// Construct new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set full contents of target project and config.
    pub fn insert(&self, namespace: &str, environment: &str, table: KeyValueTable) {
        self.tables
            .borrow_mut()
            .insert((namespace.into(), environment.into()), table);
    }

    /// Current contents of target project and config.
    pub fn table(&self, namespace: &str, environment: &str) -> KeyValueTable {
        self.tables
            .borrow()
            .get(&(namespace.into(), environment.into()))
            .cloned()
            .unwrap_or_default()
    }

    /// Make every call against target project and config fail.
    pub fn make_unavailable(&self, namespace: &str, environment: &str) {
        self.unavailable
            .borrow_mut()
            .insert((namespace.into(), environment.into()));
    }

    /// Number of successful replace calls so far.
    pub fn replacements(&self) -> usize {
        *self.replacements.borrow()
    }

    fn check(&self, namespace: &str, environment: &str) -> Result<()> {
        if self
            .unavailable
            .borrow()
            .contains(&(namespace.into(), environment.into()))
        {
            return Err(StoreError::Unavailable {
                namespace: namespace.into(),
                environment: environment.into(),
                message: "store marked unavailable".into(),
            });
        }

        Ok(())
    }
}

impl SecretStore for MemoryStore {
    fn fetch(&self, namespace: &str, environment: &str) -> Result<String> {
        self.check(namespace, environment)?;
        Ok(self.table(namespace, environment).to_string())
    }

    fn replace(&self, namespace: &str, environment: &str, contents: &str) -> Result<()> {
        self.check(namespace, environment)?;
        self.insert(namespace, environment, KeyValueTable::parse(contents));
        *self.replacements.borrow_mut() += 1;
        Ok(())
    }
}

/// Secret store wrapper that shows a spinner during calls.
pub struct ProgressStore<S>
where
    S: SecretStore,
{
    inner: S,
    style: ProgressStyle,
}

impl<S> ProgressStore<S>
where
    S: SecretStore,
{
    /// Construct new spinner wrapper around target store.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::IndicatifStyleTemplate`] if spinner template is
    ///   invalid.
    pub fn new(inner: S) -> Result<Self> {
        let style = ProgressStyle::with_template("{spinner:.green} {msg}")?
            .tick_chars("-\\|/ ");

        Ok(Self { inner, style })
    }

    fn spin<T>(&self, message: String, call: impl FnOnce(&S) -> Result<T>) -> Result<T> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(self.style.clone());
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(100));
        let result = call(&self.inner);
        bar.finish_and_clear();

        result
    }
}

impl<S> SecretStore for ProgressStore<S>
where
    S: SecretStore,
{
    fn fetch(&self, namespace: &str, environment: &str) -> Result<String> {
        self.spin(format!("fetching {namespace}/{environment}"), |store| {
            store.fetch(namespace, environment)
        })
    }

    fn replace(&self, namespace: &str, environment: &str, contents: &str) -> Result<()> {
        self.spin(format!("uploading {namespace}/{environment}"), |store| {
            store.replace(namespace, environment, contents)
        })
    }
}

enum SyscallError {
    Spawn(std::io::Error),
    Failed(String),
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> std::result::Result<String, SyscallError> {
    let output = Command::new(cmd.as_ref())
        .args(args)
        .output()
        .map_err(SyscallError::Spawn)?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

    if !output.status.success() {
        // INVARIANT: Chomp trailing newlines.
        let message = stderr.trim_end().to_string();
        let message = match message.is_empty() {
            true => format!("command {:?} failed with {}", cmd.as_ref(), output.status),
            false => message,
        };
        return Err(SyscallError::Failed(message));
    }

    Ok(stdout)
}

/// Secret store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store cannot be reached, or refused the request.
    #[error("secret store {namespace}/{environment} unavailable: {message}")]
    Unavailable {
        namespace: String,
        environment: String,
        message: String,
    },

    /// Store client executable cannot be started.
    #[error("failed to run secret store client {binary:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        binary: OsString,
    },

    /// Upload contents cannot be staged to a temporary file.
    #[error("failed to stage upload for {namespace}/{environment}")]
    Stage {
        #[source]
        source: std::io::Error,
        namespace: String,
        environment: String,
    },

    /// Style template cannot be set for spinner.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

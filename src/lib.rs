// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep local env files and Doppler secrets in step.
//!
//! envsync reconciles a local `.env` style file with one or more configs of a
//! remote secret store. It can push local keys up, pull remote keys down, or
//! compare both sides, while treating a small set of __local override__ keys
//! as machine specific values that never leave the machine.
//!
//! # Layout
//!
//! - [`config`]: `envsync.toml` layout and binding resolution.
//! - [`envfile`]: line preserving env file codec.
//! - [`store`]: secret store gateway.
//! - [`sync`]: merge policies, comparison, and orchestration.
//! - [`backup`]: timestamped copies taken before destructive rewrites.
//! - [`path`]: default locations.

pub mod backup;
pub mod config;
pub mod envfile;
pub mod path;
pub mod store;
pub mod sync;

pub use config::{EnvironmentBinding, SyncConfig};
pub use envfile::{EnvFile, KeyValueTable};
pub use store::{DopplerCli, MemoryStore, SecretStore};
pub use sync::{merge::MergeMode, Action, Report, Synchronizer};

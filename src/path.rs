// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for files that envsync reads or
//! writes on behalf of a project: the configuration file, the local env files
//! it names, and the directory that backups land in.

use std::path::{Path, PathBuf};

/// Name of configuration file looked up in the current working directory.
pub const CONFIG_FILE_NAME: &str = "envsync.toml";

/// Default backup directory, relative to the current working directory.
pub const DEFAULT_BACKUP_DIR: &str = ".env-backups";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default path to configuration file.
///
/// Uses `envsync.toml` in the current working directory. Does not check if
/// the path returned actually exists.
pub fn default_config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILE_NAME)
}

/// Determine default backup directory.
pub fn default_backup_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BACKUP_DIR)
}

/// Produce a short display form of a path by replacing the home directory
/// prefix with `~`.
pub fn tildify(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    match home_dir() {
        Ok(home) => match path.strip_prefix(&home) {
            Ok(rest) if rest.as_os_str().is_empty() => "~".into(),
            Ok(rest) => format!("~/{}", rest.display()),
            Err(_) => path.display().to_string(),
        },
        Err(_) => path.display().to_string(),
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tildify_leaves_relative_paths_alone() {
        assert_eq!(tildify(".env"), ".env");
        assert_eq!(tildify("config/.env.staging"), "config/.env.staging");
    }

    #[test]
    fn tildify_shortens_home_prefix() -> anyhow::Result<()> {
        let home = home_dir()?;
        assert_eq!(tildify(&home), "~");
        assert_eq!(tildify(home.join("work/.env")), "~/work/.env");

        Ok(())
    }
}

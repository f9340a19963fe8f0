// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local env file handling.
//!
//! Utilities to read, model, and rewrite `.env` style files.
//!
//! # File Layout
//!
//! An env file is line oriented. Each data line has the form `KEY="VALUE"`,
//! where the surrounding double quotes are optional on read but always added
//! by envsync on write. Lines starting with `#` (after optional leading
//! whitespace) and blank lines pass through untouched. There is no nesting,
//! no multi-line values, and no escape sequences. At most one pair of
//! surrounding double quotes is stripped from a value, nothing more.
//!
//! # Line Model
//!
//! Rather than re-deriving structure from string scans every time the file
//! needs to be rewritten, an [`EnvFile`] keeps the file as an ordered sequence
//! of typed [`Line`]s. Rewrites walk this sequence, so untouched lines come out
//! exactly as they went in, which keeps version control diffs minimal.
//!
//! For comparison purposes the assignments are collapsed into a
//! [`KeyValueTable`], which is always ordered by key.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{canonicalize, metadata, read_to_string, symlink_metadata},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

/// One line of an env file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Empty or whitespace-only line.
    Blank(String),

    /// Line whose first non-whitespace character is `#`.
    Comment(String),

    /// A `KEY=VALUE` data line.
    Assignment(Assignment),

    /// Data line that could not be understood. Kept verbatim.
    Malformed(String),
}

impl Line {
    /// Text of the line exactly as it appeared in the file.
    pub fn raw(&self) -> &str {
        match self {
            Self::Blank(raw) | Self::Comment(raw) | Self::Malformed(raw) => raw,
            Self::Assignment(assignment) => &assignment.raw,
        }
    }
}

/// A parsed `KEY=VALUE` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Variable name.
    pub key: String,

    /// Value with one layer of surrounding double quotes removed.
    pub value: String,

    /// Original line text.
    pub raw: String,
}

/// An env file as an ordered sequence of typed lines.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvFile {
    lines: Vec<Line>,
    malformed: Vec<MalformedLine>,
}

impl EnvFile {
    /// Construct new empty env file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read env file at target path.
    ///
    /// # Errors
    ///
    /// - Return [`EnvFileError::Missing`] if no file exists at target path.
    /// - Return [`EnvFileError::Read`] if file exists but cannot be read.
    #[instrument(skip(path), level = "debug")]
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("read env file: {:?}", path.display());
        let content = read_to_string(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => EnvFileError::Missing {
                path: path.to_path_buf(),
            },
            _ => EnvFileError::Read {
                source: err,
                path: path.to_path_buf(),
            },
        })?;

        let file = Self::from(content.as_str());
        for malformed in file.malformed() {
            warn!("skip {:?} {malformed}", path.display());
        }

        Ok(file)
    }

    /// Read env file at target path, treating a missing file as absent.
    ///
    /// # Errors
    ///
    /// - Return [`EnvFileError::Read`] if file exists but cannot be read.
    pub fn read_if_exists(path: impl AsRef<Path>) -> Result<Option<Self>> {
        match Self::read(path) {
            Ok(file) => Ok(Some(file)),
            Err(EnvFileError::Missing { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// All lines in file order.
    pub fn lines(&self) -> &[Line] {
        self.lines.as_slice()
    }

    /// Data lines that were skipped during parsing.
    pub fn malformed(&self) -> &[MalformedLine] {
        self.malformed.as_slice()
    }

    /// Check if file has no lines at all.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Collapse assignments into a key-sorted table.
    ///
    /// When a key is assigned more than once, the last assignment wins.
    pub fn table(&self) -> KeyValueTable {
        let mut table = KeyValueTable::new();
        for line in &self.lines {
            if let Line::Assignment(assignment) = line {
                table.insert(assignment.key.clone(), assignment.value.clone());
            }
        }

        table
    }

    /// Last assignment line of target key, i.e., the one that takes effect.
    pub fn last_assignment(&self, key: &str) -> Option<&Assignment> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Assignment(assignment) if assignment.key == key => Some(assignment),
            _ => None,
        })
    }

    /// Check if file carries a commented-out assignment for target key, e.g.,
    /// `# KEY="VALUE"`.
    pub fn has_commented_assignment(&self, key: &str) -> bool {
        self.lines.iter().any(|line| match line {
            Line::Comment(raw) => raw
                .trim_start()
                .trim_start_matches('#')
                .trim_start()
                .split_once('=')
                .is_some_and(|(name, _)| name.trim() == key),
            _ => false,
        })
    }
}

impl From<&str> for EnvFile {
    fn from(content: &str) -> Self {
        let mut file = EnvFile::new();
        for (index, raw) in content.lines().enumerate() {
            let line = parse_line(raw);
            if let Line::Malformed(ref content) = line {
                file.malformed.push(MalformedLine {
                    number: index + 1,
                    content: content.clone(),
                });
            }
            file.lines.push(line);
        }

        file
    }
}

impl Display for EnvFile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for line in &self.lines {
            writeln!(fmt, "{}", line.raw())?;
        }

        Ok(())
    }
}

fn parse_line(raw: &str) -> Line {
    if raw.trim().is_empty() {
        return Line::Blank(raw.to_string());
    }

    if raw.trim_start().starts_with('#') {
        return Line::Comment(raw.to_string());
    }

    match raw.split_once('=') {
        Some((key, value)) if is_valid_key(key.trim()) => Line::Assignment(Assignment {
            key: key.trim().to_string(),
            value: unquote(value).to_string(),
            raw: raw.to_string(),
        }),
        _ => Line::Malformed(raw.to_string()),
    }
}

/// Remove at most one pair of surrounding double quotes.
pub fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(value)
}

/// Render one assignment in the quoted form envsync always writes.
pub fn format_assignment(key: &str, value: &str) -> String {
    format!("{key}=\"{value}\"")
}

/// Check if target string can serve as a variable name.
///
/// Keys follow `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Key-sorted mapping of variable names to values.
///
/// # Invariant
///
/// - Keys are unique.
/// - Iteration is always in key order, so comparisons between two tables do
///   not depend on the order either side was read in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyValueTable {
    entries: BTreeMap<String, String>,
}

impl KeyValueTable {
    /// Construct new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `KEY="VALUE"` text into a table, logging skipped lines.
    pub fn parse(content: &str) -> Self {
        let file = EnvFile::from(content);
        for malformed in file.malformed() {
            warn!("skip {malformed}");
        }

        file.table()
    }

    /// Insert key and value, returning previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    /// Lookup value of target key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Check if table contains target key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate over keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over key and value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of keys in table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for KeyValueTable
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl Display for KeyValueTable {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for (key, value) in self.iter() {
            writeln!(fmt, "{}", format_assignment(key, value))?;
        }

        Ok(())
    }
}

/// Write contents to target path atomically.
///
/// Contents are written to a temporary file in the same directory as the
/// target, and only swapped into place once fully written. Parent directories
/// are created when missing. An existing file keeps its permissions, and a
/// symlink keeps pointing at its target, which receives the new contents.
///
/// # Errors
///
/// - Return [`EnvFileError::Write`] if temporary file cannot be written.
/// - Return [`EnvFileError::Persist`] if temporary file cannot be moved over
///   target path.
#[instrument(skip(path, contents), level = "debug")]
pub fn write_atomic(path: impl AsRef<Path>, contents: impl AsRef<str>) -> Result<()> {
    let path = path.as_ref();
    let write_err = |err| EnvFileError::Write {
        source: err,
        path: path.to_path_buf(),
    };

    // INVARIANT: A symlinked env file stays a symlink, its target is rewritten.
    let target = match symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => canonicalize(path).map_err(write_err)?,
        _ => path.to_path_buf(),
    };
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    debug!("write env file: {:?}", target.display());
    mkdirp::mkdirp(&parent).map_err(write_err)?;
    let mut tmp = NamedTempFile::new_in(&parent).map_err(write_err)?;
    tmp.write_all(contents.as_ref().as_bytes()).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;

    // INVARIANT: Existing files keep their permissions. New files stay
    // owner-only.
    if let Ok(meta) = metadata(&target) {
        tmp.as_file()
            .set_permissions(meta.permissions())
            .map_err(write_err)?;
    }

    tmp.persist(&target).map_err(|err| EnvFileError::Persist {
        source: err.error,
        path: path.to_path_buf(),
    })?;

    Ok(())
}

/// Data line without a usable `KEY=VALUE` shape.
///
/// Never aborts a parse. Malformed lines are logged, skipped for table
/// construction, and kept verbatim on rewrite.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed line {number}: expected KEY=VALUE, found {content:?}")]
pub struct MalformedLine {
    /// One-based line number.
    pub number: usize,

    /// Line text.
    pub content: String,
}

/// Env file error types.
#[derive(Debug, thiserror::Error)]
pub enum EnvFileError {
    /// Env file does not exist.
    #[error("env file {:?} does not exist", path.display())]
    Missing { path: PathBuf },

    /// Env file cannot be read from.
    #[error("failed to read env file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Temporary file for env file cannot be written to.
    #[error("failed to write env file at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Temporary file cannot be swapped into place.
    #[error("failed to replace env file at {:?}", path.display())]
    Persist {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = EnvFileError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test]
    fn parse_typed_lines() {
        let file = EnvFile::from(indoc! {r#"
            # database
            DB_HOST="localhost"

            DB_PORT=5432
              # indented comment
            garbage line
            EMPTY=""
        "#});

        let expect = vec![
            Line::Comment("# database".into()),
            Line::Assignment(Assignment {
                key: "DB_HOST".into(),
                value: "localhost".into(),
                raw: r#"DB_HOST="localhost""#.into(),
            }),
            Line::Blank("".into()),
            Line::Assignment(Assignment {
                key: "DB_PORT".into(),
                value: "5432".into(),
                raw: "DB_PORT=5432".into(),
            }),
            Line::Comment("  # indented comment".into()),
            Line::Malformed("garbage line".into()),
            Line::Assignment(Assignment {
                key: "EMPTY".into(),
                value: "".into(),
                raw: r#"EMPTY="""#.into(),
            }),
        ];
        assert_eq!(file.lines(), expect.as_slice());
        assert_eq!(
            file.malformed(),
            &[MalformedLine {
                number: 6,
                content: "garbage line".into()
            }]
        );
    }

    #[test_case(r#""quoted""#, "quoted"; "one pair removed")]
    #[test_case(r#"""nested"""#, r#""nested""#; "only one layer removed")]
    #[test_case("bare", "bare"; "bare value untouched")]
    #[test_case(r#""unbalanced"#, r#""unbalanced"#; "unbalanced quote kept")]
    #[test_case("'single'", "'single'"; "single quotes kept")]
    #[test_case(r#"" padded ""#, " padded "; "inner whitespace kept")]
    #[test_case(r#"""#, r#"""#; "lone quote kept")]
    #[test]
    fn unquote_strips_one_layer(raw: &str, expect: &str) {
        pretty_assertions::assert_eq!(unquote(raw), expect);
    }

    #[test_case("FOO", true; "upper case")]
    #[test_case("_private", true; "leading underscore")]
    #[test_case("api_Key2", true; "mixed case with digit")]
    #[test_case("2FAST", false; "leading digit")]
    #[test_case("FOO-BAR", false; "dash")]
    #[test_case("", false; "empty")]
    #[test]
    fn validate_key_names(key: &str, expect: bool) {
        pretty_assertions::assert_eq!(is_valid_key(key), expect);
    }

    #[test]
    fn table_is_sorted_and_last_assignment_wins() {
        let table = EnvFile::from(indoc! {r#"
            ZED="z"
            ALPHA="1"
            ALPHA="2"
            MID=m=m
        "#})
        .table();

        let result = table.iter().collect::<Vec<_>>();
        let expect = vec![("ALPHA", "2"), ("MID", "m=m"), ("ZED", "z")];
        assert_eq!(result, expect);
    }

    #[test]
    fn render_preserves_lines_verbatim() {
        let content = indoc! {r#"
            # keep me
            A=1
              B = "two"
            not a pair

            C="3"
        "#};

        assert_eq!(EnvFile::from(content).to_string(), content);
    }

    #[test]
    fn detect_commented_assignment() {
        let file = EnvFile::from(indoc! {r#"
            # LOCAL_PATH="__REPLACE_ME__"
            #OTHER=1
            # just words
        "#});

        assert!(file.has_commented_assignment("LOCAL_PATH"));
        assert!(file.has_commented_assignment("OTHER"));
        assert!(!file.has_commented_assignment("just"));
        assert!(!file.has_commented_assignment("MISSING"));
    }

    #[test]
    fn table_display_quotes_every_value() {
        let table = KeyValueTable::from_iter([("B", "two words"), ("A", "1")]);
        let expect = indoc! {r#"
            A="1"
            B="two words"
        "#};

        assert_eq!(table.to_string(), expect);
    }

    #[sealed_test]
    fn read_missing_file() {
        let result = EnvFile::read(".env");
        assert!(matches!(result, Err(EnvFileError::Missing { .. })));
        assert!(matches!(EnvFile::read_if_exists(".env"), Ok(None)));
    }

    #[sealed_test]
    fn write_atomic_creates_parents_and_replaces() -> anyhow::Result<()> {
        write_atomic("nested/dir/.env", "A=\"1\"\n")?;
        write_atomic("nested/dir/.env", "A=\"2\"\n")?;

        let file = EnvFile::read("nested/dir/.env")?;
        assert_eq!(file.table().get("A"), Some("2"));

        Ok(())
    }

    #[cfg(unix)]
    #[sealed_test]
    fn write_atomic_keeps_file_mode() -> anyhow::Result<()> {
        use std::{
            fs::{set_permissions, write, Permissions},
            os::unix::fs::PermissionsExt,
        };

        write(".env", "A=\"1\"\n")?;
        set_permissions(".env", Permissions::from_mode(0o644))?;
        write_atomic(".env", "A=\"2\"\n")?;

        let mode = metadata(".env")?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);

        Ok(())
    }

    #[cfg(unix)]
    #[sealed_test]
    fn write_atomic_follows_symlink() -> anyhow::Result<()> {
        use std::{fs::write, os::unix::fs::symlink};

        write("shared.env", "A=\"1\"\n")?;
        symlink("shared.env", ".env")?;
        write_atomic(".env", "A=\"2\"\n")?;

        assert!(symlink_metadata(".env")?.file_type().is_symlink());
        assert_eq!(read_to_string("shared.env")?, "A=\"2\"\n");

        Ok(())
    }
}

//! Flat key=value configuration loading for the test driver.
//!
//! The file format matches the shell-sourced `test.config` the wider test
//! suite uses: one `KEY=value` or `KEY="value"` per line, values may refer
//! to earlier keys via `$KEY`. Lines that do not match the pattern
//! (comments, blanks) are skipped.
//!
//! Unresolved `$VAR` references pass through as literal text rather than
//! failing; only a key that is absent after the whole file is parsed is an
//! error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ForgeError, ForgeResult};

static LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(\w+)="?([^"]+)"?"#).expect("line regex is valid"));

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_]\w*)").expect("var regex is valid"));

/// A key=value config file, parsed once on first lookup.
///
/// Repeated [`read_key`](ConfigFile::read_key) calls reuse the cached parse
/// instead of re-reading the file.
#[derive(Debug)]
pub struct ConfigFile {
    path: PathBuf,
    values: HashMap<String, String>,
    parsed: bool,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: HashMap::new(),
            parsed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up `key`, expanding `$VAR` references against already-parsed
    /// keys. Unknown references are left as the literal `$VAR` text.
    pub fn read_key(&mut self, key: &str) -> ForgeResult<String> {
        if !self.parsed {
            let content = std::fs::read_to_string(&self.path)?;
            for line in content.lines() {
                if let Some(caps) = LINE_RE.captures(line) {
                    self.values.insert(caps[1].to_string(), caps[2].to_string());
                }
            }
            self.parsed = true;
        }

        let raw = self
            .values
            .get(key)
            .ok_or_else(|| ForgeError::ConfigKeyNotFound {
                key: key.to_string(),
                path: self.path.clone(),
            })?;

        let expanded = VAR_RE.replace_all(raw, |caps: &regex::Captures| {
            let name = &caps[1];
            self.values
                .get(name)
                .cloned()
                .unwrap_or_else(|| format!("${name}"))
        });

        Ok(expanded.into_owned())
    }
}

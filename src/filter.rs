//! Ignore rules for relative paths.
//!
//! Patterns are regular expressions searched anywhere in the path,
//! case-insensitively. They are compiled once when a profile is resolved, so
//! a malformed pattern surfaces as a configuration error before anything runs.

use crate::error::{Result, SyncError};
use regex::{RegexBuilder, RegexSet, RegexSetBuilder};

/// Rules written by `--init` and used when a profile names none.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "watchme\\.json",
    "/venv/",
    "\\.svn/",
    "\\.hg/",
    "\\.git/",
    "\\.bzr",
    "_darcs",
    "CVS",
    "\\.DS_Store",
    "Thumbs\\.db",
    "desktop\\.ini",
    "node_modules/",
    "__pycache__/",
    "\\.vscode",
];

/// Compiled ignore rules for one profile.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    set: RegexSet,
    patterns: Vec<String>,
}

impl IgnoreRules {
    pub fn compile<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();

        // Build each pattern on its own first so the error names the culprit.
        for pattern in &patterns {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    SyncError::Config(format!("invalid ignore pattern {:?}: {}", pattern, e))
                })?;
        }

        let set = RegexSetBuilder::new(&patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| SyncError::Config(format!("invalid ignore patterns: {}", e)))?;

        Ok(Self { set, patterns })
    }

    pub fn empty() -> Self {
        Self {
            set: RegexSet::empty(),
            patterns: Vec::new(),
        }
    }

    pub fn defaults() -> Self {
        // The default list is static and known to compile.
        Self::compile(DEFAULT_IGNORE_PATTERNS.iter().copied()).unwrap_or_else(|_| Self::empty())
    }

    /// True iff any rule matches somewhere in `relative_path`.
    pub fn should_ignore(&self, relative_path: &str) -> bool {
        self.set.is_match(relative_path)
    }

    /// Like [`should_ignore`](Self::should_ignore), but directories are
    /// tested with a trailing `/` so rules such as `node_modules/` catch the
    /// directory entry itself.
    pub fn should_ignore_entry(&self, relative_path: &str, is_dir: bool) -> bool {
        if is_dir && !relative_path.ends_with('/') {
            self.should_ignore(&format!("{}/", relative_path))
        } else {
            self.should_ignore(relative_path)
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

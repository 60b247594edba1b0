//! Name codec for versioned commit files in a table's log directory.

use std::fmt;

use crate::error::{DeltaResult, Error};
use crate::Version;

const LOG_SUFFIX: &str = ".json";
const VERSION_DIGITS: usize = 20;

/// A parsed (or freshly minted) commit-file name: a zero-padded 20-digit version number
/// followed by `.json`, e.g. `00000000000000000123.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPath {
    version: Version,
    filename: String,
}

impl LogPath {
    /// The commit-file name for `version`.
    pub fn from_version(version: Version) -> Self {
        Self {
            version,
            filename: format!("{version:020}{LOG_SUFFIX}"),
        }
    }

    /// Parse a path (or bare file name) into its version. The stem must be purely numeric
    /// and at least 20 digits wide; anything else is rejected.
    pub fn parse(path: &str) -> DeltaResult<Self> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let stem = name
            .strip_suffix(LOG_SUFFIX)
            .ok_or_else(|| Error::InvalidLogFileName(path.to_string()))?;
        if stem.len() < VERSION_DIGITS || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidLogFileName(path.to_string()));
        }
        let version = stem
            .parse::<Version>()
            .map_err(|_| Error::InvalidLogFileName(path.to_string()))?;
        Ok(Self {
            version,
            filename: name.to_string(),
        })
    }

    /// Non-failing variant of [`LogPath::parse`] for directory scans: −1 for anything that
    /// is not a commit-file name.
    pub fn version_from_name(path: &str) -> i64 {
        match Self::parse(path) {
            Ok(parsed) => parsed.version as i64,
            Err(_) => -1,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The full path of this file inside `dir`, inserting a `/` separator if `dir` lacks a
    /// trailing one.
    pub fn path_in(&self, dir: &str) -> String {
        if dir.is_empty() || dir.ends_with('/') {
            format!("{dir}{}", self.filename)
        } else {
            format!("{dir}/{}", self.filename)
        }
    }
}

impl fmt::Display for LogPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename)
    }
}

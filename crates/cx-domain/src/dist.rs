use std::fmt;

use serde::{Deserialize, Serialize};

/// Suffix of a fetched package archive.
pub const ARCHIVE_SUFFIX: &str = ".tar.bz2";

/// Canonical `name-version-build` package identifier.
///
/// The name may itself contain dashes; version and build are always the last
/// two dash-delimited fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dist(String);

impl Dist {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Strip the archive suffix from an index key or archive filename.
    pub fn from_filename(filename: &str) -> Option<Self> {
        filename
            .strip_suffix(ARCHIVE_SUFFIX)
            .filter(|stem| !stem.is_empty())
            .map(Self::new)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Index key for this dist (`<dist>.tar.bz2`).
    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}{ARCHIVE_SUFFIX}", self.0)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.parts().0
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.parts().1
    }

    #[must_use]
    pub fn build(&self) -> Option<&str> {
        self.parts().2
    }

    /// Split into `(name, version, build)`. Version and build are absent when
    /// the dist has fewer than three dash-delimited fields.
    #[must_use]
    pub fn parts(&self) -> (&str, Option<&str>, Option<&str>) {
        let mut fields = self.0.rsplitn(3, '-');
        let last = fields.next().unwrap_or_default();
        let middle = fields.next();
        let first = fields.next();
        match (first, middle) {
            (Some(name), Some(version)) => (name, Some(version), Some(last)),
            (None, Some(name)) => (name, Some(last), None),
            _ => (last, None, None),
        }
    }

    /// Spec pinning the first three characters of the version, e.g.
    /// `python-3.5.1-0` becomes `python 3.5*`.
    ///
    /// Returns `None` when the dist is not a full `name-version-build` triple.
    #[must_use]
    pub fn to_pinned_spec(&self) -> Option<String> {
        match self.parts() {
            (name, Some(version), Some(_)) => {
                let prefix: String = version.chars().take(3).collect();
                Some(format!("{name} {prefix}*"))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Dist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Dist {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Dist {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Dist {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

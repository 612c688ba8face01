use std::fmt;

use serde::{Deserialize, Serialize};

/// Fully-qualified per-platform index location. Always ends in `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelUrl(String);

impl ChannelUrl {
    /// `<base>/<subdir>/`, with trailing slashes stripped from `base` first.
    pub fn for_subdir(base: &str, subdir: &str) -> Self {
        Self(format!("{}/{subdir}/", base.trim_end_matches('/')))
    }

    /// The two locations a channel base expands to: the platform subdir
    /// followed by `noarch`.
    pub fn expand(base: &str, platform: &str) -> [Self; 2] {
        [Self::for_subdir(base, platform), Self::for_subdir(base, "noarch")]
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.0.starts_with("file:")
    }

    #[must_use]
    pub fn is_noarch(&self) -> bool {
        self.0.ends_with("/noarch/")
    }

    #[must_use]
    pub fn repodata_url(&self) -> String {
        format!("{}repodata.json", self.0)
    }
}

impl fmt::Display for ChannelUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ChannelUrl {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ChannelUrl {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_to_platform_and_noarch() {
        let [platform, noarch] = ChannelUrl::expand("https://repo.example/pkgs/free//", "linux-64");
        assert_eq!(platform, "https://repo.example/pkgs/free/linux-64/");
        assert_eq!(noarch, "https://repo.example/pkgs/free/noarch/");
        assert!(noarch.is_noarch());
        assert!(!platform.is_file());
        assert_eq!(
            platform.repodata_url(),
            "https://repo.example/pkgs/free/linux-64/repodata.json"
        );
    }
}

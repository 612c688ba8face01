use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::dist::Dist;

/// Merged package index keyed by archive filename, in insertion order.
pub type PackageIndex = IndexMap<String, IndexEntry>;

/// Repodata record for one package archive.
///
/// Fields the client does not interpret are kept in `extra` so a record can
/// be handed to the solver unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IndexEntry {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        build: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            build: build.into(),
            build_number: 0,
            depends: Vec::new(),
            channel: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = depends.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn dist(&self) -> Dist {
        Dist::new(format!("{}-{}-{}", self.name, self.version, self.build))
    }

    #[must_use]
    pub fn filename(&self) -> String {
        self.extra
            .get("fn")
            .and_then(Value::as_str)
            .map_or_else(|| self.dist().filename(), ToOwned::to_owned)
    }
}

/// Metadata persisted for a package linked into an environment
/// (`conda-meta/<dist>.json`).
///
/// Any JSON object is accepted: a field that is null or of an unexpected type
/// reads as its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InstalledRecord {
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient")]
    pub build: String,
    #[serde(default, deserialize_with = "lenient")]
    pub build_number: u64,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub depends: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl InstalledRecord {
    /// Turn the record into an index entry for `dist`.
    ///
    /// Missing name/version/build are recovered from the dist and a missing
    /// `depends` becomes an empty list. Install-only fields (`files`, `link`,
    /// `url`) are carried over in `extra`.
    #[must_use]
    pub fn into_index_entry(self, dist: &Dist) -> IndexEntry {
        let (name, version, build) = dist.parts();
        let mut extra = self.extra;
        if let Some(url) = self.url {
            extra.insert("url".into(), Value::String(url));
        }
        if !self.files.is_empty() {
            extra.insert(
                "files".into(),
                Value::Array(self.files.into_iter().map(Value::String).collect()),
            );
        }
        if let Some(link) = self.link {
            extra.insert("link".into(), link);
        }
        IndexEntry {
            name: non_empty_or(self.name, name),
            version: non_empty_or(self.version, version.unwrap_or_default()),
            build: non_empty_or(self.build, build.unwrap_or_default()),
            build_number: self.build_number,
            depends: self.depends.unwrap_or_default(),
            channel: self.channel,
            extra,
        }
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_keeps_unknown_fields() {
        let raw = json!({
            "name": "numpy",
            "version": "1.10.4",
            "build": "py27_0",
            "build_number": 0,
            "depends": ["python 2.7*"],
            "md5": "abc",
            "size": 10
        });
        let entry: IndexEntry = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(entry.depends, vec!["python 2.7*"]);
        assert_eq!(entry.extra.get("md5"), Some(&json!("abc")));
        assert_eq!(serde_json::to_value(&entry).unwrap(), raw);
        assert_eq!(entry.filename(), "numpy-1.10.4-py27_0.tar.bz2");
    }

    #[test]
    fn record_without_depends_becomes_empty_list() {
        let record: InstalledRecord = serde_json::from_value(json!({
            "name": "zlib",
            "version": "1.2.8",
            "build": "0",
            "files": ["lib/libz.so"],
            "link": {"source": "/pkgs/zlib-1.2.8-0", "type": "hard-link"}
        }))
        .unwrap();
        assert!(record.depends.is_none());
        let entry = record.into_index_entry(&Dist::new("zlib-1.2.8-0"));
        assert!(entry.depends.is_empty());
        assert_eq!(entry.extra.get("files"), Some(&json!(["lib/libz.so"])));
        assert!(entry.extra.contains_key("link"));
    }

    #[test]
    fn record_with_null_or_odd_fields_is_kept() {
        let record: InstalledRecord = serde_json::from_value(json!({
            "name": null,
            "version": "1.2.8",
            "build": "0",
            "build_number": "7",
            "depends": "zlib",
            "files": null,
            "channel": 42
        }))
        .unwrap();
        assert_eq!(record.build_number, 0);
        assert!(record.depends.is_none());
        assert!(record.files.is_empty());
        assert!(record.channel.is_none());
        let entry = record.into_index_entry(&Dist::new("zlib-1.2.8-0"));
        assert_eq!(entry.name, "zlib");
        assert!(entry.depends.is_empty());

        assert!(serde_json::from_value::<InstalledRecord>(json!(["zlib"])).is_err());
    }

    #[test]
    fn record_fields_fall_back_to_dist() {
        let entry = InstalledRecord::default().into_index_entry(&Dist::new("my-pkg-0.1-py35_2"));
        assert_eq!(entry.name, "my-pkg");
        assert_eq!(entry.version, "0.1");
        assert_eq!(entry.build, "py35_2");
    }
}

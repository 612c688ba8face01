use std::path::Path;

use anyhow::Result;
use tracing::debug;

use cx_domain::{IndexEntry, PackageIndex};

use crate::{channels::ChannelResolver, fetch::IndexFetcher, query::IndexQuery};

/// Inputs to [`IndexAssembler::get_index`].
#[derive(Debug, Clone, Copy)]
pub struct IndexRequest<'a> {
    /// Channel tokens searched before the configured ones.
    pub channel_urls: &'a [String],
    /// Append the configured channel list after `channel_urls`.
    pub prepend: bool,
    pub platform: Option<&'a str>,
    /// Overlay packages linked into this environment.
    pub prefix: Option<&'a Path>,
    /// Keep only `file:` channels.
    pub offline: bool,
    pub use_cache: bool,
    /// Add extracted packages from the package caches.
    pub unknown: bool,
}

impl Default for IndexRequest<'_> {
    fn default() -> Self {
        Self {
            channel_urls: &[],
            prepend: true,
            platform: None,
            prefix: None,
            offline: false,
            use_cache: false,
            unknown: false,
        }
    }
}

/// Builds the package index handed to the solver.
#[derive(Debug)]
pub struct IndexAssembler<'r, 'c, F> {
    channels: &'r ChannelResolver<'c>,
    fetcher: F,
}

impl<'r, 'c, F: IndexFetcher> IndexAssembler<'r, 'c, F> {
    pub fn new(channels: &'r ChannelResolver<'c>, fetcher: F) -> Self {
        Self { channels, fetcher }
    }

    /// Resolve the request's channels, fetch their index and overlay the
    /// packages linked into `request.prefix`.
    ///
    /// # Errors
    /// Channel resolution and fetch failures are returned unchanged.
    pub fn get_index(&self, request: &IndexRequest<'_>) -> Result<PackageIndex> {
        let mut urls = self
            .channels
            .normalize(request.channel_urls, request.platform)?;
        if request.prepend {
            urls.extend(self.channels.channel_urls(request.platform)?);
        }
        if request.offline {
            urls.retain(|url| url.is_file());
        }
        debug!(
            channels = urls.len(),
            offline = request.offline,
            "assembling package index"
        );
        let mut index = self
            .fetcher
            .fetch_index(&urls, request.use_cache, request.unknown)?;
        if let Some(prefix) = request.prefix {
            let added = overlay_linked(&mut index, prefix);
            debug!(prefix = %prefix.display(), added, "overlaid linked packages");
        }
        Ok(index)
    }

    /// Every entry for `name` in the configured channels, oldest first.
    pub fn package_versions(&self, name: &str, offline: bool) -> Result<Vec<(String, IndexEntry)>> {
        let index = self.get_index(&IndexRequest {
            offline,
            ..IndexRequest::default()
        })?;
        Ok(IndexQuery::new(&index)
            .packages_named(name)
            .into_iter()
            .map(|(filename, entry)| (filename.to_string(), entry.clone()))
            .collect())
    }
}

/// Add the packages linked into `prefix` that `index` does not already have.
///
/// Existing entries are never replaced; a record without `depends` gets an
/// empty list. Returns the number of entries added.
pub fn overlay_linked(index: &mut PackageIndex, prefix: &Path) -> usize {
    let mut added = 0;
    for (dist, record) in cx_store::linked_data(prefix) {
        let filename = dist.filename();
        if index.contains_key(&filename) {
            continue;
        }
        index.insert(filename, record.into_index_entry(&dist));
        added += 1;
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use cx_domain::ChannelUrl;
    use std::{cell::RefCell, fs};
    use tempfile::tempdir;

    /// Returns a fixed index and remembers the URLs it was asked for.
    #[derive(Default)]
    struct RecordingFetcher {
        index: PackageIndex,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl IndexFetcher for RecordingFetcher {
        fn fetch_index(
            &self,
            channel_urls: &[ChannelUrl],
            _use_cache: bool,
            _unknown: bool,
        ) -> Result<PackageIndex> {
            self.calls.borrow_mut().push(
                channel_urls
                    .iter()
                    .map(|url| url.as_str().to_string())
                    .collect(),
            );
            Ok(self.index.clone())
        }
    }

    struct FailingFetcher;

    impl IndexFetcher for FailingFetcher {
        fn fetch_index(&self, _: &[ChannelUrl], _: bool, _: bool) -> Result<PackageIndex> {
            anyhow::bail!("network down")
        }
    }

    fn config() -> Config {
        let mut config = Config::for_root("/opt/cx");
        config.subdir = "linux-64".into();
        config.default_channels = vec!["https://repo.example/free".into()];
        config
    }

    fn index_of(entries: Vec<IndexEntry>) -> PackageIndex {
        entries
            .into_iter()
            .map(|entry| (entry.filename(), entry))
            .collect()
    }

    #[test]
    fn request_channels_come_before_configured_ones() -> Result<()> {
        let config = config();
        let resolver = ChannelResolver::new(&config);
        let fetcher = RecordingFetcher::default();
        let assembler = IndexAssembler::new(&resolver, &fetcher);
        let extra = vec!["file:///srv/local".to_string()];

        assembler.get_index(&IndexRequest {
            channel_urls: &extra,
            ..IndexRequest::default()
        })?;
        assembler.get_index(&IndexRequest {
            channel_urls: &extra,
            prepend: false,
            ..IndexRequest::default()
        })?;
        assembler.get_index(&IndexRequest {
            channel_urls: &extra,
            offline: true,
            ..IndexRequest::default()
        })?;

        let calls = fetcher.calls.borrow();
        assert_eq!(
            calls[0],
            [
                "file:///srv/local/linux-64/",
                "file:///srv/local/noarch/",
                "https://repo.example/free/linux-64/",
                "https://repo.example/free/noarch/",
            ]
        );
        assert_eq!(calls[1].len(), 2);
        assert_eq!(
            calls[2],
            ["file:///srv/local/linux-64/", "file:///srv/local/noarch/"]
        );
        Ok(())
    }

    #[test]
    fn prefix_overlay_fills_gaps_without_overwriting() -> Result<()> {
        let prefix = tempdir()?;
        let meta = cx_store::meta_dir(prefix.path());
        fs::create_dir_all(&meta)?;
        fs::write(
            meta.join("zlib-1.2.8-0.json"),
            r#"{"name": "zlib", "version": "1.2.8", "build": "0", "depends": ["local-only"]}"#,
        )?;
        fs::write(
            meta.join("mine-0.1-0.json"),
            r#"{"name": "mine", "version": "0.1", "build": "0"}"#,
        )?;

        let config = config();
        let resolver = ChannelResolver::new(&config);
        let remote = IndexEntry::new("zlib", "1.2.8", "0").with_depends(["remote"]);
        let fetcher = RecordingFetcher {
            index: index_of(vec![remote.clone()]),
            ..RecordingFetcher::default()
        };
        let assembler = IndexAssembler::new(&resolver, &fetcher);
        let index = assembler.get_index(&IndexRequest {
            prefix: Some(prefix.path()),
            ..IndexRequest::default()
        })?;

        assert_eq!(index.len(), 2);
        assert_eq!(index["zlib-1.2.8-0.tar.bz2"], remote);
        let mine = &index["mine-0.1-0.tar.bz2"];
        assert!(mine.depends.is_empty());
        assert_eq!(mine.name, "mine");
        Ok(())
    }

    #[test]
    fn overlay_of_missing_prefix_adds_nothing() {
        let dir = tempdir().unwrap();
        let mut index = PackageIndex::new();
        assert_eq!(overlay_linked(&mut index, &dir.path().join("absent")), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn fetch_errors_propagate() {
        let config = config();
        let resolver = ChannelResolver::new(&config);
        let assembler = IndexAssembler::new(&resolver, FailingFetcher);
        let err = assembler.get_index(&IndexRequest::default()).unwrap_err();
        assert_eq!(err.to_string(), "network down");
    }

    #[test]
    fn channel_errors_propagate() {
        let mut config = config();
        config.rc_channels = Some(vec!["system".into()]);
        let resolver = ChannelResolver::new(&config);
        let assembler = IndexAssembler::new(&resolver, RecordingFetcher::default());
        let err = assembler.get_index(&IndexRequest::default()).unwrap_err();
        assert!(err.downcast_ref::<crate::channels::ChannelError>().is_some());
    }

    #[test]
    fn package_versions_lists_entries_for_one_name() -> Result<()> {
        let config = config();
        let resolver = ChannelResolver::new(&config);
        let fetcher = RecordingFetcher {
            index: index_of(vec![
                IndexEntry::new("numpy", "1.10.4", "py27_0"),
                IndexEntry::new("numpy", "1.9.3", "py27_0"),
                IndexEntry::new("python", "2.7.11", "0"),
            ]),
            ..RecordingFetcher::default()
        };
        let assembler = IndexAssembler::new(&resolver, &fetcher);
        let versions: Vec<_> = assembler
            .package_versions("numpy", false)?
            .into_iter()
            .map(|(filename, entry)| {
                assert_eq!(filename, entry.filename());
                entry.version
            })
            .collect();
        assert_eq!(versions, ["1.9.3", "1.10.4"]);
        assert!(assembler.package_versions("scipy", true)?.is_empty());
        Ok(())
    }
}

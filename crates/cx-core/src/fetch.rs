//! Downloading and caching per-channel `repodata.json`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use cx_domain::{ChannelUrl, IndexEntry, PackageIndex};

use crate::{
    config::Config,
    transport::{Transport, TransportRequest},
};

const CACHE_DIR: &str = "cache";
const PIP: &str = "pip";

/// Produces the merged package index for an ordered list of channel URLs.
pub trait IndexFetcher {
    /// Earlier URLs take precedence over later ones for the same filename.
    fn fetch_index(
        &self,
        channel_urls: &[ChannelUrl],
        use_cache: bool,
        unknown: bool,
    ) -> Result<PackageIndex>;
}

impl<F: IndexFetcher + ?Sized> IndexFetcher for &F {
    fn fetch_index(
        &self,
        channel_urls: &[ChannelUrl],
        use_cache: bool,
        unknown: bool,
    ) -> Result<PackageIndex> {
        (**self).fetch_index(channel_urls, use_cache, unknown)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} while fetching {url}")]
    Status { url: String, status: u16 },
    #[error("invalid repodata from {url}")]
    InvalidRepodata {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A channel's `repodata.json`, with the validators of the response it came
/// from when cached on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repodata {
    #[serde(default)]
    pub packages: IndexMap<String, IndexEntry>,
    #[serde(rename = "_etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(rename = "_mod", default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// [`IndexFetcher`] backed by a [`Transport`] and an on-disk repodata cache in
/// the primary package cache.
#[derive(Debug)]
pub struct RepodataFetcher<'a, T> {
    config: &'a Config,
    transport: T,
}

impl<'a, T: Transport> RepodataFetcher<'a, T> {
    pub fn new(config: &'a Config, transport: T) -> Self {
        Self { config, transport }
    }

    /// `<pkgs_dirs[0]>/cache/<first 8 hex digits of sha256(url)>.json`.
    pub fn cache_path(&self, url: &ChannelUrl) -> Option<PathBuf> {
        let digest = hex::encode(Sha256::digest(url.as_str().as_bytes()));
        self.config
            .primary_pkgs_dir()
            .map(|dir| dir.join(CACHE_DIR).join(format!("{}.json", &digest[..8])))
    }

    /// Fetch one channel. `Ok(None)` means a missing `noarch` subdir.
    pub fn fetch_repodata(&self, url: &ChannelUrl, use_cache: bool) -> Result<Option<Repodata>> {
        let cache_path = self.cache_path(url);
        let cached = cache_path.as_deref().and_then(read_cache);
        if use_cache {
            if let Some(cached) = cached {
                debug!(%url, "using cached repodata");
                return Ok(Some(cached));
            }
        }

        let repodata_url = url.repodata_url();
        info!(url = %repodata_url, "fetching repodata");
        let request = TransportRequest {
            url: &repodata_url,
            etag: cached.as_ref().and_then(|data| data.etag.as_deref()),
            last_modified: cached.as_ref().and_then(|data| data.modified.as_deref()),
        };
        let response = self.transport.fetch(&request)?;

        match response.status {
            304 if cached.is_some() => {
                debug!(%url, "repodata not modified");
                return Ok(cached);
            }
            404 if url.is_noarch() => {
                debug!(%url, "channel has no noarch subdir");
                return Ok(None);
            }
            status if !response.is_success() => {
                return Err(FetchError::Status {
                    url: repodata_url,
                    status,
                }
                .into());
            }
            _ => {}
        }

        let etag = response.header("etag").map(str::to_string);
        let modified = response.header("last-modified").map(str::to_string);
        let body = response
            .into_bytes()
            .with_context(|| format!("failed to read {repodata_url}"))?;
        let mut repodata: Repodata =
            serde_json::from_slice(&body).map_err(|source| FetchError::InvalidRepodata {
                url: repodata_url.clone(),
                source,
            })?;
        repodata.etag = etag;
        repodata.modified = modified;

        if let Some(path) = &cache_path {
            if let Err(err) = write_cache(path, &repodata) {
                warn!(path = %path.display(), error = %format!("{err:#}"), "failed to cache repodata");
            }
        }
        Ok(Some(repodata))
    }
}

impl<T: Transport> IndexFetcher for RepodataFetcher<'_, T> {
    fn fetch_index(
        &self,
        channel_urls: &[ChannelUrl],
        use_cache: bool,
        unknown: bool,
    ) -> Result<PackageIndex> {
        debug!(channels = channel_urls.len(), use_cache, unknown, "fetching index");
        let mut index = PackageIndex::new();
        for url in channel_urls.iter().rev() {
            let Some(repodata) = self.fetch_repodata(url, use_cache)? else {
                continue;
            };
            for (filename, mut entry) in repodata.packages {
                entry.channel = Some(url.as_str().to_string());
                entry
                    .extra
                    .insert("fn".to_string(), Value::String(filename.clone()));
                index.insert(filename, entry);
            }
        }
        if unknown {
            add_unknown(&mut index, &self.config.pkgs_dirs);
        }
        add_pip_dependency(&mut index);
        Ok(index)
    }
}

/// Add extracted packages from the package caches that no channel provides.
///
/// Returns the number of entries added. Unreadable `info/index.json` files
/// are skipped.
pub fn add_unknown(index: &mut PackageIndex, pkgs_dirs: &[PathBuf]) -> usize {
    let mut added = 0;
    for pkgs_dir in pkgs_dirs {
        for dist in cx_store::extracted(pkgs_dir) {
            let filename = dist.filename();
            if index.contains_key(&filename) {
                continue;
            }
            match cx_store::extracted_index(pkgs_dir, &dist) {
                Ok(entry) => {
                    debug!(%filename, "adding cached package to index");
                    index.insert(filename, entry);
                    added += 1;
                }
                Err(err) => {
                    warn!(%dist, error = %format!("{err:#}"), "skipping cached package");
                }
            }
        }
    }
    added
}

/// Every `python` 2.x / 3.x entry depends on `pip`.
pub fn add_pip_dependency(index: &mut PackageIndex) {
    for entry in index.values_mut() {
        let is_python = entry.name == "python"
            && (entry.version.starts_with("2.") || entry.version.starts_with("3."));
        if is_python && !entry.depends.iter().any(|dep| dep == PIP) {
            entry.depends.push(PIP.to_string());
        }
    }
}

fn read_cache(path: &Path) -> Option<Repodata> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(repodata) => Some(repodata),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring corrupt repodata cache");
            None
        }
    }
}

fn write_cache(path: &Path, repodata: &Repodata) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let contents = serde_json::to_vec(repodata)?;
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

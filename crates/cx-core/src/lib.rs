//! Client front end: channel resolution, index assembly and spec
//! augmentation for conda-style package channels.

#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod augment;
pub mod channels;
pub mod config;
pub mod fetch;
pub mod index;
pub mod query;
pub mod transport;

use anyhow::Result;

pub use augment::SpecAugmenter;
pub use channels::{
    is_url, AliasRewriter, AnacondaTokenRewriter, ChannelError, ChannelResolver, NoRewrite,
    MAX_CHANNEL_DEPTH,
};
pub use config::{Config, ConfigError, SslVerify};
pub use cx_domain::{ChannelUrl, Dist, IndexEntry, MatchSpec, PackageIndex};
pub use fetch::{FetchError, IndexFetcher, Repodata, RepodataFetcher};
pub use index::{overlay_linked, IndexAssembler, IndexRequest};
pub use query::{IndexQuery, SolverIndexQuery};
pub use transport::{SessionTransport, Transport, TransportError, TransportRequest, TransportResponse};

/// Assemble the package index for `request` over HTTP(S) and `file:`
/// channels, caching repodata in the primary package cache.
pub fn get_index(config: &Config, request: &IndexRequest<'_>) -> Result<PackageIndex> {
    let channels = ChannelResolver::new(config);
    let fetcher = RepodataFetcher::new(config, SessionTransport::new(config)?);
    IndexAssembler::new(&channels, fetcher).get_index(request)
}

/// Every entry for `name` in the configured channels, oldest first.
pub fn package_versions(
    config: &Config,
    name: &str,
    offline: bool,
) -> Result<Vec<(String, IndexEntry)>> {
    let channels = ChannelResolver::new(config);
    let fetcher = RepodataFetcher::new(config, SessionTransport::new(config)?);
    IndexAssembler::new(&channels, fetcher).package_versions(name, offline)
}

#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod channel;
pub mod dist;
pub mod index;
pub mod platform;
pub mod spec;
pub mod version;

pub use channel::ChannelUrl;
pub use dist::{Dist, ARCHIVE_SUFFIX};
pub use index::{IndexEntry, InstalledRecord, PackageIndex};
pub use platform::{current_subdir, subdir_for};
pub use spec::{MatchSpec, SpecError, Strictness, VersionSpec};
pub use version::VersionOrder;

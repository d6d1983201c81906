//! Descriptor resolution for wfref
//!
//! [`DescriptorFetcher`] turns a remote identity into its declared inputs and
//! outputs; [`LocalFileResolver`] gives the cache read access to descriptors
//! that live inside the repository. [`VersionFetcher`] reports the latest
//! release of an action so outdated refs can be flagged.

pub mod fetcher;
pub mod local;
pub mod verifier;
pub mod version;

pub use fetcher::{DescriptorFetcher, FetchSettings, HttpFetcher};
pub use local::{resolve_local, FsLocalResolver, LocalFileResolver};
pub use version::{is_outdated, HttpVersionFetcher, VersionFetcher};

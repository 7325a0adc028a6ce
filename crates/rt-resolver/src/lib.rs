//! Bundle & manifest resolver (§4.2): turns a boot descriptor into a
//! verified, cached bundle plus its resolved runtime-configuration.

pub mod bundle;
pub mod signature;

mod resolver;

pub use bundle::{BundleArchive, BundleHandle, ZipBundleArchive};
pub use resolver::{ResolvedBundle, Resolver};
pub use signature::verify_signature;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] rt_config::Error),
    #[error("cache/network error: {0}")]
    Cache(#[from] rt_cache::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bundle archive error: {0}")]
    Archive(String),
    #[error("signature mismatch for bundle")]
    SignatureMismatch,
    #[error("manifest has no option matching this device's metrics")]
    EmptyManifest,
    #[error("a bundle is already mounted")]
    AlreadyMounted,
    #[error("closing a mounted bundle is not permitted; unmount first")]
    CloseWhileMounted,
}

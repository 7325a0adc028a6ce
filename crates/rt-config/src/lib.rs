//! Runtime-configuration, manifest, persona, and device-metric records.
//!
//! Precedence is a fixed chain of [`Overlay::overlay`] calls applied in
//! `RuntimeConfiguration::resolve`: defaults → bundle config → manifest
//! overlay → extension reservation maximum (§4.7 is the one exception that
//! raises rather than overlays).

pub mod device;
pub mod manifest;
pub mod persona;
pub mod runtime_config;

pub use device::DeviceMetrics;
pub use manifest::{BundleVariant, Manifest, ManifestOption};
pub use persona::{PersonaEntry, PersonaFile};
pub use runtime_config::{GuardPageMode, RuntimeConfiguration, WasmMemorySize};

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("persona {0:?} not found")]
    UnknownPersona(String),
    #[error("manifest has no option matching this device's metrics")]
    EmptyManifest,
}

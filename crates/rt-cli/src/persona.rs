//! Small file-reading helpers for the persona/config CLI paths. Kept apart
//! from `main`'s boot sequencing so that sequencing stays readable.

use std::path::Path;

use rt_config::runtime_config::RuntimeConfigurationOverlay;
use rt_orchestrator::Error;

pub fn read_persona_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| Error::Host(rt_host::Error::from(e)))
}

pub fn read_config_overlay(path: &Path) -> Result<RuntimeConfigurationOverlay, Error> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Host(rt_host::Error::from(e)))?;
    serde_json::from_str(&text).map_err(|e| Error::Config(rt_config::Error::from(e)))
}

/// Falls back to the machine hostname when `--device-id`/`RT_DEVICE_ID` is
/// absent, so the default CRC-based selector still has something stable to
/// seed from on a bare developer machine.
#[must_use]
pub fn default_device_id() -> String {
    hostname()
}

#[cfg(not(target_os = "windows"))]
fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-device".to_string())
}

#[cfg(target_os = "windows")]
fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown-device".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_persona_file_is_a_host_error() {
        let err = read_persona_file(Path::new("/no/such/persona.json"));
        assert!(matches!(err, Err(Error::Host(_))));
    }

    #[test]
    fn default_device_id_is_never_empty() {
        assert!(!default_device_id().is_empty());
    }
}

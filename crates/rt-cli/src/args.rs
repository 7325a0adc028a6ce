//! Command-line surface (§6): `--help`/`--version` are handled by `clap`
//! itself; everything else is validated by hand in [`Args::validate`] so
//! violations map onto the spec's own exit-code taxonomy instead of clap's
//! generic "bad usage" code.

use std::path::PathBuf;

use clap::Parser;

use crate::exit::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "rt-host", version, about = "Sandboxed WASM application runtime host")]
pub struct Args {
    /// Loads a bundle directory directly (skips persona/manifest resolution).
    #[arg(long, value_name = "PATH")]
    pub bundle: Option<PathBuf>,

    /// Loads a bare WASM module directly; `--config` may supply its runtime
    /// configuration since there is no bundle to read one from.
    #[arg(long, value_name = "PATH")]
    pub wasm: Option<PathBuf>,

    /// Loads a local manifest file instead of resolving one by persona.
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Fetches the manifest from this URL instead of a persona file.
    #[arg(long, value_name = "URL")]
    pub manifest_url: Option<String>,

    /// Persona file to read `<persona-id>`'s manifest URL template from.
    /// Requires `--persona-id`.
    #[arg(long, value_name = "PATH")]
    pub persona_file: Option<PathBuf>,

    /// The key to look up within `--persona-file`. Requires `--persona-file`.
    #[arg(long, value_name = "ID")]
    pub persona_id: Option<String>,

    /// Overrides bundle config when loading a bare WASM (`--wasm`).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Bypasses signature verification. Non-ship builds only.
    #[arg(long)]
    pub skip_signature: bool,

    /// Initializes and idles instead of running the guest's app-tick loop.
    #[arg(long)]
    pub no_app_load: bool,

    /// Directory to probe for extension DSOs.
    #[arg(long, value_name = "DIR")]
    pub extensions: Option<PathBuf>,

    /// Collector endpoint for telemetry spans/heap plots.
    #[arg(long, value_name = "HOST:PORT")]
    pub telemetry_server: Option<String>,

    /// Device partner id used to fill the persona URL template's first `%s`.
    /// Not in the spec's named subset; extensions and deployments vary this.
    #[arg(long, env = "RT_PARTNER", default_value = "")]
    pub partner: String,

    /// Device partner GUID, the persona URL template's second `%s`.
    #[arg(long, env = "RT_PARTNER_GUID", default_value = "")]
    pub partner_guid: String,

    /// Device id fed to the default CRC-based manifest selector.
    #[arg(long, env = "RT_DEVICE_ID", default_value = "")]
    pub device_id: String,

    /// Directory `rt-cache` stores fetched bundles/manifests under.
    #[arg(long, value_name = "DIR", default_value = "./cache")]
    pub cache_dir: PathBuf,

    /// Directory the guest's file-write surface is rooted at.
    #[arg(long, value_name = "DIR", default_value = "./files")]
    pub file_root: PathBuf,
}

impl Args {
    /// Hand-rolled validation the spec's `ArgGroup`-shaped action set needs:
    /// at most one action flag, and `--persona-id` never appears without
    /// `--persona-file` or vice versa.
    pub fn validate(&self) -> Result<(), ExitCode> {
        let actions = [
            self.bundle.is_some(),
            self.wasm.is_some(),
            self.manifest.is_some(),
            self.manifest_url.is_some(),
            self.persona_file.is_some(),
        ];
        let action_count = actions.iter().filter(|a| **a).count();
        if action_count > 1 {
            return Err(ExitCode::RedundantAction);
        }
        if self.persona_file.is_some() != self.persona_id.is_some() {
            return Err(ExitCode::MissingParameter);
        }
        if action_count == 0 && self.persona_file.is_none() {
            return Err(ExitCode::MissingParameter);
        }
        if self.config.is_some() && self.wasm.is_none() {
            tracing::warn!("--config has no effect without --wasm");
        }
        Ok(())
    }

    /// Every path the user handed us directly (as opposed to a URL or a
    /// persona/manifest key to be resolved later) must exist before we try
    /// to hand it to a subsystem.
    pub fn check_paths(&self) -> Result<(), ExitCode> {
        for path in [&self.bundle, &self.wasm, &self.manifest, &self.persona_file, &self.config, &self.extensions]
            .into_iter()
            .flatten()
        {
            if !path.exists() {
                return Err(ExitCode::InvalidPath);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Args {
        Args {
            bundle: None,
            wasm: None,
            manifest: None,
            manifest_url: None,
            persona_file: None,
            persona_id: None,
            config: None,
            skip_signature: false,
            no_app_load: false,
            extensions: None,
            telemetry_server: None,
            partner: String::new(),
            partner_guid: String::new(),
            device_id: String::new(),
            cache_dir: PathBuf::from("./cache"),
            file_root: PathBuf::from("./files"),
        }
    }

    #[test]
    fn no_action_at_all_is_a_missing_parameter() {
        assert_eq!(base().validate(), Err(ExitCode::MissingParameter));
    }

    #[test]
    fn two_actions_at_once_is_redundant() {
        let mut args = base();
        args.wasm = Some(PathBuf::from("a.wasm"));
        args.manifest = Some(PathBuf::from("m.json"));
        assert_eq!(args.validate(), Err(ExitCode::RedundantAction));
    }

    #[test]
    fn persona_id_without_persona_file_is_missing_parameter() {
        let mut args = base();
        args.persona_id = Some("default".to_string());
        assert_eq!(args.validate(), Err(ExitCode::MissingParameter));
    }

    #[test]
    fn bare_wasm_is_a_valid_single_action() {
        let mut args = base();
        args.wasm = Some(PathBuf::from("a.wasm"));
        assert_eq!(args.validate(), Ok(()));
    }

    #[test]
    fn persona_file_with_id_is_a_valid_single_action() {
        let mut args = base();
        args.persona_file = Some(PathBuf::from("persona.json"));
        args.persona_id = Some("default".to_string());
        assert_eq!(args.validate(), Ok(()));
    }

    #[test]
    fn a_missing_wasm_path_is_invalid_path() {
        let mut args = base();
        args.wasm = Some(PathBuf::from("/no/such/file.wasm"));
        assert_eq!(args.check_paths(), Err(ExitCode::InvalidPath));
    }

    #[test]
    fn no_paths_given_is_fine() {
        assert_eq!(base().check_paths(), Ok(()));
    }
}

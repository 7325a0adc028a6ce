use std::collections::HashMap;

use serde::Deserialize;

use crate::device::DeviceMetrics;
use crate::runtime_config::RuntimeConfigurationOverlay;

/// `{ "v1": { "options": [ { "rules": {...}, "runtime_config": {...}, "bundle": [...] } ] } }`
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    v1: ManifestV1,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestV1 {
    options: Vec<ManifestOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestOption {
    #[serde(default)]
    pub rules: HashMap<String, RuleValue>,
    #[serde(default)]
    pub runtime_config: RuntimeConfigurationOverlay,
    pub bundle: Vec<BundleVariant>,
}

/// A rule's right-hand side: either a single value or a list of acceptable
/// values ("any-of" semantics — the device's value must equal at least one).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    One(String),
    Any(Vec<String>),
}

impl RuleValue {
    fn matches(&self, actual: &str) -> bool {
        match self {
            Self::One(v) => v == actual,
            Self::Any(vs) => vs.iter().any(|v| v == actual),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleVariant {
    #[serde(flatten)]
    pub resource: BundleResource,
    pub signature: String,
    pub interpreter: String,
    pub sample: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleResource {
    Url { url: String },
    File { file: String },
}

impl ManifestOption {
    /// An option matches when *every* named rule has an any-of match against
    /// device metrics. Unknown property names are ignored with a warning.
    fn matches(&self, metrics: &DeviceMetrics) -> bool {
        self.rules.iter().all(|(property, rule)| {
            let Some(actual) = metrics.get(property) else {
                tracing::warn!(property, "unknown device metric property in manifest rule");
                return true;
            };
            rule.matches(actual)
        })
    }

    /// Chooses a bundle variant from `self.bundle` using `pick`, a value in
    /// `[0, total_weight)`. `pick` is produced by a [`Selector`].
    #[must_use]
    pub fn select_variant(&self, pick: u32) -> &BundleVariant {
        let mut border = 0u32;
        for variant in &self.bundle {
            border += variant.sample.unwrap_or(1);
            if pick < border {
                return variant;
            }
        }
        self.bundle.last().expect("manifest option has at least one bundle variant")
    }

    #[must_use]
    pub fn total_weight(&self) -> u32 {
        self.bundle.iter().map(|v| v.sample.unwrap_or(1)).sum()
    }
}

impl Manifest {
    pub fn parse(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// First option whose rules all match the device's metrics.
    pub fn select_option(&self, metrics: &DeviceMetrics) -> crate::Result<&ManifestOption> {
        self.v1
            .options
            .iter()
            .find(|opt| opt.matches(metrics))
            .ok_or(crate::Error::EmptyManifest)
    }
}

/// Picks an integer in `[0, total)`. The default selector is deterministic,
/// seeded from a CRC-64/XZ of the device id, so the same device always picks
/// the same variant until the manifest changes (§8 property 1). Tests can
/// install an override (§8 property 2).
pub trait Selector: Send + Sync {
    fn pick(&self, total: u32) -> u32;
}

pub struct DeviceIdSelector {
    device_id: String,
}

impl DeviceIdSelector {
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

const CRC64_XZ: crc::Crc<u64> = crc::Crc::<u64>::new(&crc::CRC_64_XZ);

impl Selector for DeviceIdSelector {
    fn pick(&self, total: u32) -> u32 {
        if total == 0 {
            return 0;
        }
        let digest = CRC64_XZ.checksum(self.device_id.as_bytes());
        (digest % u64::from(total)) as u32
    }
}

/// Test-only selector that replays a fixed sequence of picks.
pub struct SequenceSelector {
    picks: std::sync::Mutex<std::collections::VecDeque<u32>>,
}

impl SequenceSelector {
    #[must_use]
    pub fn new(picks: impl IntoIterator<Item = u32>) -> Self {
        Self {
            picks: std::sync::Mutex::new(picks.into_iter().collect()),
        }
    }
}

impl Selector for SequenceSelector {
    fn pick(&self, _total: u32) -> u32 {
        self.picks.lock().unwrap().pop_front().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "v1": {
            "options": [
                {
                    "rules": {"region": ["us", "ca"]},
                    "runtime_config": {},
                    "bundle": [
                        {"url": "https://a", "signature": "sig-a", "interpreter": "wasm3", "sample": 3},
                        {"url": "https://b", "signature": "sig-b", "interpreter": "wasm3", "sample": 1}
                    ]
                }
            ]
        }
    }"#;

    #[test]
    fn weighted_selection_is_deterministic_for_same_device() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let metrics = DeviceMetrics::builder().set("region", "us").build();
        let opt = manifest.select_option(&metrics).unwrap();
        let selector = DeviceIdSelector::new("e04f432955f1");
        let first = opt.select_variant(selector.pick(opt.total_weight()));
        for _ in 0..100 {
            let again = opt.select_variant(selector.pick(opt.total_weight()));
            assert_eq!(
                format!("{:?}", again.resource),
                format!("{:?}", first.resource)
            );
        }
    }

    #[test]
    fn sequence_selector_reproduces_distribution_example() {
        let manifest = Manifest::parse(
            r#"{"v1": {"options": [{"rules": {}, "runtime_config": {}, "bundle": [
                {"url": "ONE", "signature": "s", "interpreter": "wasm3", "sample": 1},
                {"url": "TWO", "signature": "s", "interpreter": "wasm3", "sample": 3}
            ]}]}}"#,
        )
        .unwrap();
        let metrics = DeviceMetrics::default();
        let opt = manifest.select_option(&metrics).unwrap();
        let selector = SequenceSelector::new([0, 1, 2, 3]);
        let picks: Vec<_> = (0..4)
            .map(|_| {
                let v = opt.select_variant(selector.pick(opt.total_weight()));
                match &v.resource {
                    BundleResource::Url { url } => url.clone(),
                    BundleResource::File { file } => file.clone(),
                }
            })
            .collect();
        assert_eq!(picks, vec!["ONE", "TWO", "TWO", "TWO"]);
    }

    #[test]
    fn option_with_no_matching_rule_is_skipped() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let metrics = DeviceMetrics::builder().set("region", "eu").build();
        assert!(manifest.select_option(&metrics).is_err());
    }

    #[test]
    fn rule_values_with_unknown_property_warn_and_still_match() {
        let manifest = Manifest::parse(
            r#"{"v1": {"options": [{"rules": {"not_a_real_property": "x"}, "runtime_config": {}, "bundle": [
                {"url": "u", "signature": "s", "interpreter": "wasm3"}
            ]}]}}"#,
        )
        .unwrap();
        assert!(manifest.select_option(&DeviceMetrics::default()).is_ok());
    }
}

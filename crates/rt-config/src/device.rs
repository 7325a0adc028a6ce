use std::collections::HashMap;

/// The closed set of device properties the manifest resolver matches
/// `rules` against. Collected once at boot and held immutably.
#[derive(Debug, Clone, Default)]
pub struct DeviceMetrics {
    values: HashMap<&'static str, String>,
}

/// Every property name a manifest `rules` object is allowed to name.
/// Matching is case-insensitive on the property name; unknown names are
/// ignored (with a warning) rather than rejected.
pub const KNOWN_PROPERTIES: &[&str] = &[
    "vendor",
    "device",
    "firmware",
    "cpu",
    "gpu",
    "region",
    "revision",
    "core_version",
    "software",
    "config",
    "device_id",
];

impl DeviceMetrics {
    #[must_use]
    pub fn builder() -> DeviceMetricsBuilder {
        DeviceMetricsBuilder::default()
    }

    #[must_use]
    pub fn get(&self, property: &str) -> Option<&str> {
        let key = KNOWN_PROPERTIES
            .iter()
            .find(|k| k.eq_ignore_ascii_case(property))?;
        self.values.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        self.get("device_id").unwrap_or_default()
    }
}

#[derive(Default)]
pub struct DeviceMetricsBuilder {
    values: HashMap<&'static str, String>,
}

impl DeviceMetricsBuilder {
    #[must_use]
    pub fn set(mut self, property: &str, value: impl Into<String>) -> Self {
        if let Some(key) = KNOWN_PROPERTIES.iter().find(|k| k.eq_ignore_ascii_case(property)) {
            self.values.insert(key, value.into());
        } else {
            tracing::warn!(property, "ignoring unknown device metric property");
        }
        self
    }

    #[must_use]
    pub fn build(self) -> DeviceMetrics {
        DeviceMetrics { values: self.values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_properties_are_ignored() {
        let m = DeviceMetrics::builder().set("not_a_real_property", "x").build();
        assert_eq!(m.get("not_a_real_property"), None);
    }

    #[test]
    fn property_lookup_is_case_insensitive() {
        let m = DeviceMetrics::builder().set("Vendor", "acme").build();
        assert_eq!(m.get("vendor"), Some("acme"));
        assert_eq!(m.get("VENDOR"), Some("acme"));
    }
}

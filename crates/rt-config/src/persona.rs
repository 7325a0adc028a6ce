use std::collections::HashMap;

use serde::Deserialize;

/// `{ "<persona-id>": { "manifest_url": "...", "fallback_error_message": "..." }, ... }`
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct PersonaFile {
    personas: HashMap<String, PersonaEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonaEntry {
    pub manifest_url: UrlTemplate,
    pub fallback_error_message: String,
}

/// A manifest URL template with named slots, replacing the original's
/// positional `%s, %s` C-string formatting (§9 redesign flag). The two
/// slots the original filled positionally are named `partner` and
/// `partner_guid` here; unknown slot names are left untouched.
#[derive(Debug, Clone)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    #[must_use]
    pub fn render(&self, partner: &str, partner_guid: &str) -> String {
        self.0
            .replacen("{partner}", partner, 1)
            .replacen("{partner_guid}", partner_guid, 1)
    }
}

impl<'de> Deserialize<'de> for UrlTemplate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        // Accept the legacy positional `%s` form too: fill slots in order.
        let mut parts = raw.splitn(3, "%s");
        let mut rendered = String::new();
        if let Some(first) = parts.next() {
            rendered.push_str(first);
        }
        for (slot, rest) in ["{partner}", "{partner_guid}"].iter().zip(parts) {
            rendered.push_str(slot);
            rendered.push_str(rest);
        }
        Ok(Self(rendered))
    }
}

impl PersonaFile {
    pub fn parse(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn lookup(&self, persona_id: &str) -> crate::Result<&PersonaEntry> {
        self.personas
            .get(persona_id)
            .ok_or_else(|| crate::Error::UnknownPersona(persona_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_percent_s_template_renders_named_slots() {
        let file = PersonaFile::parse(
            r#"{"default": {"manifest_url": "https://cdn/%s/%s/manifest.json", "fallback_error_message": "oops"}}"#,
        )
        .unwrap();
        let entry = file.lookup("default").unwrap();
        assert_eq!(
            entry.manifest_url.render("acme", "guid-1"),
            "https://cdn/acme/guid-1/manifest.json"
        );
    }

    #[test]
    fn unknown_persona_is_an_error() {
        let file = PersonaFile::parse("{}").unwrap();
        assert!(file.lookup("missing").is_err());
    }
}

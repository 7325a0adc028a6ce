use std::time::Duration;

use rt_cache::{Cache, RetryPolicy, UpdateMode};
use rt_config::manifest::{BundleResource, Selector};
use rt_config::runtime_config::{Overlay, RuntimeConfiguration, RuntimeConfigurationOverlay};
use rt_config::{DeviceMetrics, Manifest, PersonaFile};

use crate::bundle::{BundleArchive, BundleHandle, ZipBundleArchive, CONFIG_PATH};
use crate::{Error, Result};

const MANIFEST_RETRY_ATTEMPTS: u32 = 4;
const MANIFEST_RETRY_BACKOFF_MS: u64 = 1_000;

/// The outcome of a full resolution: a mounted, signature-verified bundle
/// plus the runtime-configuration it resolved to.
pub struct ResolvedBundle {
    pub handle: BundleHandle,
    pub config: RuntimeConfiguration,
    pub interpreter: String,
    /// The persona entry's configured error-splash text (§4.2 step 1,
    /// §4.9): the message to show on the splash if a later boot step fails,
    /// now that the persona lookup itself has succeeded.
    pub fallback_error_message: String,
}

/// Turns a boot descriptor (persona file + persona id) into a verified,
/// cached bundle (§4.2). Owns the HTTP client and on-disk cache; the
/// signing key is build-embedded and supplied at construction.
pub struct Resolver {
    http: reqwest::Client,
    cache: Cache,
    signing_key_base64: String,
}

impl Resolver {
    #[must_use]
    pub fn new(http: reqwest::Client, cache: Cache, signing_key_base64: impl Into<String>) -> Self {
        Self {
            http,
            cache,
            signing_key_base64: signing_key_base64.into(),
        }
    }

    async fn get_bytes(&self, url: &str) -> reqwest::Result<Vec<u8>> {
        Ok(self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?
            .to_vec())
    }

    /// Steps 1-2: persona lookup and manifest fetch (cache + retry). Returns
    /// the entry's fallback error message alongside the manifest, since step
    /// 1 is the only place that message is ever read from the persona file.
    async fn fetch_manifest(&self, persona_file_json: &str, persona_id: &str, partner: &str, partner_guid: &str) -> Result<(Manifest, String)> {
        let personas = PersonaFile::parse(persona_file_json)?;
        let entry = personas.lookup(persona_id)?;
        let fallback_error_message = entry.fallback_error_message.clone();
        let url = entry.manifest_url.render(partner, partner_guid);
        let retry = RetryPolicy::new(MANIFEST_RETRY_ATTEMPTS, Duration::from_millis(MANIFEST_RETRY_BACKOFF_MS));
        let bytes = self
            .cache
            .fetch(&url, UpdateMode::PreferCache, retry, |_attempt| self.get_bytes(&url))
            .await?;
        let text = String::from_utf8_lossy(&bytes);
        Ok((Manifest::parse(&text)?, fallback_error_message))
    }

    /// Steps 5: downloads the bundle, verifying its HMAC signature against
    /// the manifest's `signature` field. On mismatch, evicts the cache entry
    /// and retries up to `retry_max_attempts` additional times (so
    /// `retry_max_attempts` total retries beyond the initial attempt).
    async fn fetch_verified_bundle(
        &self,
        url: &str,
        expected_signature: &str,
        retry_max_attempts: u32,
        retry_backoff: Duration,
    ) -> Result<Vec<u8>> {
        let total_attempts = retry_max_attempts + 1;
        for attempt in 0..total_attempts {
            let mode = if attempt == 0 {
                UpdateMode::PreferCache
            } else {
                UpdateMode::ForceRefresh
            };
            let retry = RetryPolicy::new(1, Duration::ZERO);
            let bytes = self.cache.fetch(url, mode, retry, |_| self.get_bytes(url)).await?;
            if crate::signature::verify_signature(&self.signing_key_base64, &bytes, expected_signature) {
                return Ok(bytes);
            }
            tracing::warn!(url, attempt, "bundle signature mismatch, evicting cache entry");
            self.cache.delete_key(url);
            if attempt + 1 < total_attempts {
                tokio::time::sleep(retry_backoff).await;
            }
        }
        Err(Error::SignatureMismatch)
    }

    /// Runs the full §4.2 algorithm end to end.
    pub async fn resolve(
        &self,
        persona_file_json: &str,
        persona_id: &str,
        partner: &str,
        partner_guid: &str,
        metrics: &DeviceMetrics,
        selector: &dyn Selector,
    ) -> Result<ResolvedBundle> {
        let (manifest, fallback_error_message) = self
            .fetch_manifest(persona_file_json, persona_id, partner, partner_guid)
            .await?;
        let option = manifest.select_option(metrics).map_err(|_| Error::EmptyManifest)?;

        let pick = selector.pick(option.total_weight());
        let variant = option.select_variant(pick);

        // Resolve a preliminary configuration (defaults + manifest overlay
        // only) purely to learn the bundle-fetch retry policy before the
        // bundle itself is in hand.
        let preliminary = RuntimeConfiguration::resolve(None, option.runtime_config.clone());

        let url = match &variant.resource {
            BundleResource::Url { url } => url.clone(),
            BundleResource::File { file } => file.clone(),
        };
        let bytes = self
            .fetch_verified_bundle(
                &url,
                &variant.signature,
                preliminary.bundle_fetch.retry_max_attempts,
                Duration::from_millis(preliminary.bundle_fetch.retry_backoff_ms),
            )
            .await?;

        let archive = ZipBundleArchive::open_bytes(bytes)?;
        let bundle_overlay = archive
            .open(CONFIG_PATH)
            .ok()
            .and_then(|raw| match serde_json::from_slice::<RuntimeConfigurationOverlay>(&raw) {
                Ok(overlay) => Some(overlay),
                Err(e) => {
                    tracing::warn!(error = %e, "bundle config present but failed to parse; ignoring");
                    None
                }
            });

        let config = RuntimeConfiguration::resolve(bundle_overlay, option.runtime_config.clone());

        let handle = BundleHandle::new(Box::new(archive));
        handle.mount()?;

        Ok(ResolvedBundle {
            handle,
            config,
            interpreter: variant.interpreter.clone(),
            fallback_error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_config::manifest::{DeviceIdSelector, SequenceSelector};
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    fn signing_key() -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(b"test-signing-key")
    }

    fn sign(key_base64: &str, bytes: &[u8]) -> String {
        use base64::Engine as _;
        use hmac::{Hmac, Mac};
        use sha2::Sha256;
        let key = base64::engine::general_purpose::STANDARD.decode(key_base64).unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
        mac.update(bytes);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn end_to_end_resolution_picks_signed_bundle() {
        let server = MockServer::start().await;
        let key = signing_key();
        let zip_bytes = make_zip(&[(crate::bundle::WASM_PATH, b"(module)")]);
        let sig = sign(&key, &zip_bytes);

        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"{{"v1": {{"options": [{{"rules": {{}}, "runtime_config": {{}}, "bundle": [
                    {{"url": "{}/bundle.zip", "signature": "{sig}", "interpreter": "wasm3"}}
                ]}}]}}}}"#,
                server.uri()
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bundle.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes))
            .mount(&server)
            .await;

        let personas = format!(
            r#"{{"default": {{"manifest_url": "{}/manifest.json", "fallback_error_message": "oops"}}}}"#,
            server.uri()
        );

        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(reqwest::Client::new(), Cache::new(dir.path()), key);
        let metrics = DeviceMetrics::default();
        let selector = DeviceIdSelector::new("device-1");

        let resolved = resolver
            .resolve(&personas, "default", "acme", "guid", &metrics, &selector)
            .await
            .unwrap();
        assert_eq!(resolved.interpreter, "wasm3");
        assert!(resolved.handle.is_mounted());
    }

    #[tokio::test]
    async fn signature_mismatch_retries_then_fails() {
        let server = MockServer::start().await;
        let key = signing_key();
        let zip_bytes = make_zip(&[(crate::bundle::WASM_PATH, b"(module)")]);

        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"{{"v1": {{"options": [{{"rules": {{}}, "runtime_config": {{"bundle_fetch": {{"retry_max_attempts": 2, "retry_backoff_ms": 1}}}}, "bundle": [
                    {{"url": "{}/bundle.zip", "signature": "wrong-signature", "interpreter": "wasm3"}}
                ]}}]}}}}"#,
                server.uri()
            )))
            .mount(&server)
            .await;
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .and(path("/bundle.zip"))
            .respond_with(move |_: &wiremock::Request| {
                attempts_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_bytes(zip_bytes.clone())
            })
            .mount(&server)
            .await;

        let personas = format!(
            r#"{{"default": {{"manifest_url": "{}/manifest.json", "fallback_error_message": "oops"}}}}"#,
            server.uri()
        );

        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(reqwest::Client::new(), Cache::new(dir.path()), key);
        let metrics = DeviceMetrics::default();
        let selector = SequenceSelector::new([0]);

        let result = resolver
            .resolve(&personas, "default", "acme", "guid", &metrics, &selector)
            .await;
        assert!(matches!(result, Err(Error::SignatureMismatch)));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}

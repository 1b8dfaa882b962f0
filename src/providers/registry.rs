//! Provider Registry (spec §4.B). Builds adapters from descriptors, skips
//! unconfigured ones with a warning rather than failing construction, and
//! tracks in-flight streams so [`ProviderRegistry::cleanup`] can wait for
//! them to drain — grounded in `providers/registry.py`'s `ProviderRegistry`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ConfigError;

use super::anthropic::AnthropicAdapter;
use super::google::GoogleAdapter;
use super::openai_compatible::OpenAiCompatibleAdapter;
use super::{ProviderAdapter, ProviderDescriptor, ProviderKind};

/// Maximum time to wait for active streams during cleanup (spec §4.B).
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);
const CLEANUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ProviderRegistry {
    /// Insertion order preserved (a `Vec`, not a `HashMap`): the stage-1
    /// label bijection and the election's tie-break both depend on
    /// "iteration order of the provider set" (spec §3, §4.E.7), which must
    /// match construction order the way the Python original's dict does.
    providers: Vec<(String, Box<dyn ProviderAdapter>)>,
    active_streams: AtomicUsize,
}

impl ProviderRegistry {
    /// Build a registry from descriptors, in order. A descriptor that fails
    /// [`ProviderDescriptor::is_configured`] is skipped with a warning
    /// rather than rejected (spec §4.B, grounded in `registry.py`'s
    /// `if not provider_config.api_key: continue`). A duplicate `name`
    /// across descriptors is a construction error: unlike the Python
    /// original's dict-based silent overwrite, the spec's label bijection
    /// depends on every active provider having a distinct name.
    pub fn from_descriptors(
        descriptors: Vec<ProviderDescriptor>,
        client: reqwest::Client,
        app_url: String,
        app_name: String,
    ) -> Result<Self, ConfigError> {
        let mut providers: Vec<(String, Box<dyn ProviderAdapter>)> = Vec::new();

        for descriptor in descriptors {
            if !descriptor.is_configured() {
                warn!(provider = %descriptor.name, "skipping unconfigured provider");
                continue;
            }
            if providers.iter().any(|(name, _)| *name == descriptor.name) {
                return Err(ConfigError::DuplicateName(descriptor.name));
            }

            let name = descriptor.name.clone();
            let adapter: Box<dyn ProviderAdapter> = match descriptor.kind {
                ProviderKind::AnthropicMessages => {
                    Box::new(AnthropicAdapter::new(descriptor, client.clone()))
                }
                ProviderKind::GoogleGenerateContent => {
                    Box::new(GoogleAdapter::new(descriptor, client.clone()))
                }
                ProviderKind::OpenaiChat
                | ProviderKind::OpenrouterChat
                | ProviderKind::OpenaiCompatibleChat => Box::new(OpenAiCompatibleAdapter::new(
                    descriptor,
                    client.clone(),
                    app_url.clone(),
                    app_name.clone(),
                )),
            };
            providers.push((name, adapter));
        }

        Ok(ProviderRegistry { providers, active_streams: AtomicUsize::new(0) })
    }

    /// Build a registry directly from already-constructed adapters, keyed
    /// by [`ProviderAdapter::name`], preserving `adapters`' order. Bypasses
    /// descriptor validation — useful for wiring in fake adapters under
    /// test, where the concrete wire-kind dispatch in
    /// [`Self::from_descriptors`] doesn't apply.
    pub fn from_adapters(adapters: Vec<Box<dyn ProviderAdapter>>) -> Self {
        let providers = adapters.into_iter().map(|a| (a.name().to_string(), a)).collect();
        ProviderRegistry { providers, active_streams: AtomicUsize::new(0) }
    }

    pub fn stream_started(&self) {
        self.active_streams.fetch_add(1, Ordering::SeqCst);
    }

    pub fn stream_ended(&self) {
        let _ = self
            .active_streams
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ProviderAdapter> {
        self.providers
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, adapter)| adapter.as_ref())
    }

    /// All providers that are usable right now, in insertion order (spec
    /// §4.B `get_active_providers`). Every provider stored here already
    /// passed `is_configured()` at construction time, so this is currently
    /// equivalent to iterating `self.providers` — kept as its own method to
    /// mirror the Python original's call shape and leave room for a future
    /// per-call liveness check.
    pub fn active_providers(&self) -> Vec<&dyn ProviderAdapter> {
        self.providers.iter().map(|(_, adapter)| adapter.as_ref()).collect()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Wait (bounded by [`CLEANUP_TIMEOUT`]) for active streams to drain,
    /// then release every adapter's resources (spec §4.B).
    pub async fn cleanup(&self) {
        let mut waited = Duration::ZERO;
        while self.active_streams.load(Ordering::SeqCst) > 0 && waited < CLEANUP_TIMEOUT {
            debug!(
                active = self.active_streams.load(Ordering::SeqCst),
                "waiting for active streams to complete"
            );
            tokio::time::sleep(CLEANUP_POLL_INTERVAL).await;
            waited += CLEANUP_POLL_INTERVAL;
        }

        let remaining = self.active_streams.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!(remaining, timeout_secs = CLEANUP_TIMEOUT.as_secs(), "cleanup timeout, proceeding anyway");
        }

        for (_, adapter) in &self.providers {
            adapter.cleanup();
        }
    }
}

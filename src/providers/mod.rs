//! Provider Adapter (spec §4.A) and supporting types.
//!
//! A [`ProviderAdapter`] is a uniform streaming-chat interface over one
//! remote LLM vendor. Implementations never raise across the boundary —
//! every failure becomes a [`StreamChunk`] carrying an error, exactly as
//! the Python original's `BaseProvider.stream_chat` always yields rather
//! than raises (`providers/base.py`, `providers/claude.py`: every
//! `stream_chat` body is wrapped in `try/except` with `yield
//! self._error_chunk(e)` on failure).

pub mod anthropic;
pub mod google;
pub mod openai_compatible;
pub mod registry;
pub mod sse;

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::messages::Message;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Which wire protocol a provider speaks (spec §3 "Provider descriptor").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    AnthropicMessages,
    OpenaiChat,
    GoogleGenerateContent,
    OpenrouterChat,
    OpenaiCompatibleChat,
}

/// Immutable-after-construction provider configuration (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Declared false only by adapters that know they can't see images.
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    pub supports_vision: bool,
}

fn default_true() -> bool {
    true
}

impl ProviderDescriptor {
    /// `free_tier` (spec §3): true when the adapter signals slower/
    /// rate-limited operation. Today this is only OpenRouter models whose
    /// id ends in `:free` (spec §3, grounded in `providers/openrouter.py`
    /// `is_free_tier`).
    pub fn free_tier(&self) -> bool {
        self.kind == ProviderKind::OpenrouterChat && self.model.ends_with(":free")
    }

    pub fn timeout_multiplier(&self) -> f64 {
        if self.free_tier() {
            crate::config::FREE_TIER_TIMEOUT_MULTIPLIER
        } else {
            1.0
        }
    }

    /// A descriptor is usable unless it lacks a required API key. Every
    /// kind except `openai-compatible-chat` requires one (spec §4.B —
    /// local/self-hosted servers often need no auth, grounded in
    /// `providers/openai_compatible.py`'s optional `api_key`).
    pub fn is_configured(&self) -> bool {
        match self.kind {
            ProviderKind::OpenaiCompatibleChat => true,
            _ => self.api_key.as_deref().is_some_and(|k| !k.is_empty()),
        }
    }
}

/// The adapter's output unit (spec §3 "Stream chunk").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub provider_name: String,
    pub content_text: String,
    pub done_flag: bool,
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn content(provider: impl Into<String>, text: impl Into<String>) -> Self {
        StreamChunk {
            provider_name: provider.into(),
            content_text: text.into(),
            done_flag: false,
            error: None,
        }
    }

    pub fn done(provider: impl Into<String>) -> Self {
        StreamChunk {
            provider_name: provider.into(),
            content_text: String::new(),
            done_flag: true,
            error: None,
        }
    }

    pub fn error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        StreamChunk {
            provider_name: provider.into(),
            content_text: String::new(),
            done_flag: true,
            error: Some(message.into()),
        }
    }
}

/// Uniform streaming-chat contract every wire-kind adapter implements
/// (spec §4.A). `stream_chat` is a plain (non-async) method that returns an
/// already-started stream, so the trait stays object-safe without needing
/// `async_trait` boxing at every call site — each implementation builds its
/// stream with the `async_stream::stream!` macro.
pub trait ProviderAdapter: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn supports_vision(&self) -> bool {
        self.descriptor().supports_vision
    }

    fn is_free_tier(&self) -> bool {
        self.descriptor().free_tier()
    }

    fn is_configured(&self) -> bool {
        self.descriptor().is_configured()
    }

    /// Stream a chat completion. Always terminates with exactly one chunk
    /// where `done_flag` is true or `error` is `Some` (spec §3, §4.A).
    fn stream_chat(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> BoxStream<StreamChunk>;

    /// Release the adapter's HTTP client resources (spec §4.B "Cleanup").
    /// Default no-op; adapters backed by a `reqwest::Client` don't need to
    /// do anything explicit since `reqwest` has no persistent sockets to
    /// close by hand, but the hook exists so future adapters with real
    /// teardown (e.g. websockets) have somewhere to put it.
    fn cleanup(&self) {}
}

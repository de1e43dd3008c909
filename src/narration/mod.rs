//! Narration audio
//!
//! Lines are synthesized by a [`NarrationBackend`], cached in memory by
//! speaker and text hash, and played through an [`AudioSink`].

mod bridge;
mod playback;

pub use bridge::NarrationHandle;
pub use playback::{AudioSink, SilentSink, decode_mp3};
#[cfg(feature = "speaker")]
pub use playback::SpeakerSink;

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use lru::LruCache;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::story::{DialogueLine, Speaker};
use crate::{Error, Result};

/// Voice id used by backends that address voices directly
#[must_use]
pub const fn voice_id(speaker: Speaker) -> &'static str {
    match speaker {
        Speaker::Mom => "9BWtsMINqrJLrRacOk9x",
        Speaker::Dad => "N2lVS1w4EtoT3dr4eOWO",
        Speaker::Narrator => "pFZP5JQG7iQjIQuC4Bku",
        Speaker::Friend => "XB0fDUnXU5powFXDhCwa",
    }
}

/// Voice used when a backend receives no usable speaker
pub const DEFAULT_VOICE_ID: &str = voice_id(Speaker::Mom);

/// Stable cache key for a spoken line: `{speaker}_{sha256(text) hex}`
#[must_use]
pub fn cache_key(speaker: Speaker, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{speaker}_{}", hex::encode(hasher.finalize()))
}

/// Body sent to the narration service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationRequest {
    /// Line text
    pub text: String,

    /// Speaker name
    pub speaker: Speaker,

    /// Emotion hint
    pub emotion: String,

    /// Key the service may cache the audio under
    pub cache_key: String,

    /// Voice id for the speaker
    pub voice_id: &'static str,
}

impl NarrationRequest {
    /// Request for a dialogue line
    #[must_use]
    pub fn for_line(line: &DialogueLine) -> Self {
        Self {
            text: line.text.clone(),
            speaker: line.speaker,
            emotion: line.emotion.clone(),
            cache_key: cache_key(line.speaker, &line.text),
            voice_id: voice_id(line.speaker),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NarrationResponse {
    audio_content: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

/// A speech synthesis backend producing MPEG audio
#[async_trait]
pub trait NarrationBackend: Send + Sync {
    /// Synthesize one line
    ///
    /// # Errors
    ///
    /// Returns error if the service fails or returns no audio
    async fn synthesize(&self, request: &NarrationRequest) -> Result<Vec<u8>>;
}

/// Narration service over HTTP
pub struct HttpNarrationBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpNarrationBackend {
    /// Create a backend posting to `url`
    #[must_use]
    pub fn new(url: String, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl NarrationBackend for HttpNarrationBackend {
    async fn synthesize(&self, request: &NarrationRequest) -> Result<Vec<u8>> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: NarrationResponse = serde_json::from_str(&body).map_err(|_| {
            Error::Narration(format!("narration service error {status}: {body}"))
        })?;

        if !status.is_success() {
            let error = parsed.error.unwrap_or_else(|| status.to_string());
            let details = parsed.details.unwrap_or_default();
            return Err(Error::Narration(format!("{error} {details}").trim().to_string()));
        }

        let audio = parsed
            .audio_content
            .ok_or_else(|| Error::Narration("no audio data received".to_string()))?;

        Ok(base64::engine::general_purpose::STANDARD.decode(audio)?)
    }
}

/// Backend that produces no audio; lines are paced by the sink
#[derive(Debug, Default, Clone, Copy)]
pub struct MuteBackend;

#[async_trait]
impl NarrationBackend for MuteBackend {
    async fn synthesize(&self, _request: &NarrationRequest) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Synthesizes, caches, and plays dialogue lines
pub struct Narrator {
    backend: Arc<dyn NarrationBackend>,
    sink: Box<dyn AudioSink>,
    cache: LruCache<String, Arc<[u8]>>,
}

impl Narrator {
    /// Create a narrator caching up to `capacity` lines
    #[must_use]
    pub fn new(backend: Arc<dyn NarrationBackend>, sink: Box<dyn AudioSink>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            backend,
            sink,
            cache: LruCache::new(capacity),
        }
    }

    /// Audio for a line, synthesizing on a cache miss
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn audio_for(&mut self, line: &DialogueLine) -> Result<Arc<[u8]>> {
        let request = NarrationRequest::for_line(line);

        if let Some(audio) = self.cache.get(&request.cache_key) {
            tracing::debug!(key = %request.cache_key, "narration cache hit");
            return Ok(Arc::clone(audio));
        }

        tracing::debug!(key = %request.cache_key, speaker = %line.speaker, "synthesizing narration");
        let audio: Arc<[u8]> = self.backend.synthesize(&request).await?.into();
        self.cache.put(request.cache_key, Arc::clone(&audio));

        Ok(audio)
    }

    /// Synthesize (or reuse) and play a line to completion
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    pub async fn speak(&mut self, line: &DialogueLine) -> Result<()> {
        let audio = self.audio_for(line).await?;
        self.sink.play(&audio).await
    }

    /// Number of cached lines
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

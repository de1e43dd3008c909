//! Story generation client with bounded wait and fallback substitution

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::{Story, fallback_story};
use crate::settings::Settings;
use crate::{Error, Result};

/// Body sent to the story service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRequest {
    /// Vocabulary words to weave in
    pub target_words: Vec<String>,

    /// Enabled gesture names
    pub gestures: Vec<String>,

    /// Child's name, if given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_name: Option<String>,

    /// Enabled language codes
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
}

impl StoryRequest {
    /// Build a request from persisted settings
    #[must_use]
    pub fn from_settings(settings: &Settings, child_name: Option<String>) -> Self {
        Self {
            target_words: settings.words.clone(),
            gestures: settings.actions.clone(),
            child_name,
            languages: settings.languages.clone(),
        }
    }
}

/// A story generation backend
#[async_trait]
pub trait StoryBackend: Send + Sync {
    /// Generate a story for the request
    async fn generate(&self, request: &StoryRequest) -> Result<Story>;
}

/// Story service over HTTP
pub struct HttpStoryBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpStoryBackend {
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
impl StoryBackend for HttpStoryBackend {
    async fn generate(&self, request: &StoryRequest) -> Result<Story> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Story(format!("story service error {status}: {body}")));
        }

        let body = response.text().await?;
        let story: Story = serde_json::from_str(&body)?;
        Ok(story)
    }
}

/// Where a story came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorySource {
    /// Produced by the backend
    Generated,
    /// Backend failed or timed out; built-in story substituted
    Fallback {
        /// Why generation was abandoned
        reason: String,
    },
    /// Demo mode; no request made
    Demo,
}

/// A story ready to play
#[derive(Debug, Clone)]
pub struct GeneratedStory {
    /// Story content
    pub story: Story,

    /// Provenance
    pub source: StorySource,
}

/// Requests stories and never leaves the caller without one
pub struct StoryGenerator {
    backend: Option<Arc<dyn StoryBackend>>,
    timeout: Duration,
}

impl StoryGenerator {
    /// Create a generator; `None` backend always yields the fallback story
    #[must_use]
    pub fn new(backend: Option<Arc<dyn StoryBackend>>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Built-in story without a request
    #[must_use]
    pub fn demo() -> GeneratedStory {
        tracing::info!("using demo story");
        GeneratedStory {
            story: fallback_story(),
            source: StorySource::Demo,
        }
    }

    /// Generate a story, substituting the fallback on timeout or failure
    pub async fn generate(&self, request: &StoryRequest) -> GeneratedStory {
        let Some(backend) = &self.backend else {
            return Self::fallback("no story service configured".to_string());
        };

        tracing::info!(
            words = ?request.target_words,
            gestures = ?request.gestures,
            timeout_secs = self.timeout.as_secs(),
            "generating story"
        );

        match tokio::time::timeout(self.timeout, backend.generate(request)).await {
            Ok(Ok(story)) if story.scenes.is_empty() => {
                Self::fallback("story service returned no scenes".to_string())
            }
            Ok(Ok(story)) => {
                tracing::info!(title = %story.title, scenes = story.scenes.len(), "story generated");
                GeneratedStory {
                    story,
                    source: StorySource::Generated,
                }
            }
            Ok(Err(e)) => Self::fallback(e.to_string()),
            Err(_) => Self::fallback(format!(
                "story generation timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }

    fn fallback(reason: String) -> GeneratedStory {
        tracing::warn!(reason = %reason, "story generation failed, using fallback story");
        GeneratedStory {
            story: fallback_story(),
            source: StorySource::Fallback { reason },
        }
    }
}

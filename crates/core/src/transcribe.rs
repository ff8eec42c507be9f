//! Transcription collaborator.
//!
//! One opaque call per audio chunk. Failures are treated as transient and
//! eligible for a single retry before the chunk is marked failed by the
//! sequencer; nothing here knows about ordering.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("transcription service unavailable: {0}")]
    Unavailable(String),
    #[error("transcription failed: {0}")]
    Failed(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Bytes) -> Result<String, TranscribeError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// A `Transcriber` backed by an OpenAI-compatible `audio/transcriptions`
/// endpoint.
pub struct HttpTranscriber {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpTranscriber {
    pub fn new(api_base: String, api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: Bytes) -> Result<String, TranscribeError> {
        let part = Part::bytes(audio.to_vec())
            .file_name("chunk.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::Failed(e.to_string()))?;
        let form = Form::new().text("model", self.model.clone()).part("file", part);

        let response = self
            .http
            .post(format!(
                "{}/audio/transcriptions",
                self.api_base.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscribeError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TranscribeError::Unavailable(format!(
                "provider returned {}",
                response.status()
            )));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::Failed(e.to_string()))?;
        Ok(body.text)
    }
}

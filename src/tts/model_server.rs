use super::config::BackendConfig;
use super::interface::{
    AudioFormat, BackendDescriptor, ModelHandle, SynthesisParams, SynthesizedAudio, TtsBackend,
    TtsError,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Model-server backend: a local Coqui-style inference server over HTTP.
///
/// The server must expose:
///   GET  /health          returns 200 if server is ready
///   POST /models/load     loads a model, returns its name and speakers
///   POST /synthesize      accepts JSON, returns audio bytes
pub struct ModelServerBackend {
    client: Client,
    endpoint: String,
    descriptor: BackendDescriptor,
    /// Language → model name.
    models: HashMap<String, String>,
    timeout: Duration,
    /// Sent as a bearer token when the server sits behind auth.
    api_key: Option<String>,
}

#[derive(Serialize)]
struct LoadRequest<'a> {
    language: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct LoadResponse {
    model: String,
    #[serde(default)]
    speakers: Vec<String>,
}

#[derive(Serialize)]
struct SynthRequest<'a> {
    text: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speaker_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    emotion: Option<&'a str>,
}

/// Backend state held in the model handle.
struct LoadedModel {
    name: String,
}

impl ModelServerBackend {
    pub fn new(endpoint: String, descriptor: BackendDescriptor, models: HashMap<String, String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            descriptor,
            models,
            timeout: Duration::from_secs(60),
            api_key: None,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Option<Self> {
        let descriptor = BackendDescriptor {
            id: config.id.clone(),
            supports_speaker_id: config.multi_speaker,
            supports_language_tag: config.language_tag,
            supports_locale_accent: false,
            is_multi_speaker: config.multi_speaker,
            supports_speed: config.speed,
            languages: config.languages.clone(),
        };
        let mut backend = Self::new(
            config.endpoint_or("http://localhost:5002"),
            descriptor,
            config.models.clone(),
        );
        if let Some(secs) = config.timeout_secs {
            backend.timeout = Duration::from_secs(secs);
        }
        backend.api_key = config.resolve_api_key();
        Some(backend)
    }

    fn model_for(&self, language: &str) -> Option<&str> {
        self.models
            .get(language)
            .or_else(|| self.models.get("*"))
            .map(String::as_str)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl TtsBackend for ModelServerBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.endpoint);
        match self.client.get(&url).timeout(Duration::from_secs(3)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn load_model(&self, language: &str) -> Result<ModelHandle, TtsError> {
        let model = self.model_for(language).ok_or_else(|| {
            TtsError::ModelUnavailable(format!("no model configured for '{}'", language))
        })?;

        let url = format!("{}/models/load", self.endpoint);
        let response = self
            .authorized(self.client.post(&url))
            .json(&LoadRequest { language, model })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TtsError::ModelUnavailable(format!("model server unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TtsError::ModelUnavailable(format!(
                "model server refused to load {} ({}): {}",
                model, status, error_text
            )));
        }

        let loaded: LoadResponse = response
            .json()
            .await
            .map_err(|e| TtsError::ModelUnavailable(format!("bad load response: {}", e)))?;

        Ok(ModelHandle::new(
            self.descriptor.id.clone(),
            language,
            loaded.model.clone(),
            loaded.speakers,
            Arc::new(LoadedModel { name: loaded.model }),
        ))
    }

    async fn synthesize(
        &self,
        model: &ModelHandle,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<SynthesizedAudio, TtsError> {
        let name = model
            .state::<LoadedModel>()
            .map(|m| m.name.as_str())
            .unwrap_or(model.model_name.as_str());

        let url = format!("{}/synthesize", self.endpoint);
        let body = SynthRequest {
            text,
            model: name,
            speaker_id: params.speaker.as_deref(),
            language: params.language.as_deref(),
            speed: params.speed,
            emotion: params.emotion.as_deref(),
        };

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TtsError::SynthesisFailed(format!("model server request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TtsError::UnsupportedParameter(format!(
                "model server rejected request ({}): {}",
                status, error_text
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TtsError::SynthesisFailed(format!(
                "model server error ({}): {}",
                status, error_text
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TtsError::SynthesisFailed(format!("model server bytes error: {}", e)))?
            .to_vec();

        let format = content_type
            .as_deref()
            .and_then(AudioFormat::from_content_type)
            .or_else(|| AudioFormat::sniff(&bytes))
            .unwrap_or(AudioFormat::Wav);
        debug!(target: "tts", backend = %self.descriptor.id, bytes = bytes.len(), "Model server synthesized");

        Ok(SynthesizedAudio { bytes, format })
    }
}

use super::config::BackendConfig;
use super::interface::{
    AudioFormat, BackendDescriptor, ModelHandle, SynthesisParams, SynthesizedAudio, TtsBackend,
    TtsError,
};
use crate::utils::http::request_with_backoff;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The translate-TTS endpoint rejects longer inputs.
const MAX_CHUNK_CHARS: usize = 100;
/// Below this speed the endpoint's slow mode is used.
const SLOW_BELOW: f32 = 0.85;
const DEFAULT_BASE_URL: &str = "https://translate.google.{tld}";
const DEFAULT_TLD: &str = "com";

/// Accent-by-locale backend over Google's translate-TTS endpoint.
///
/// The accent is picked by top-level domain (`co.in`, `co.uk`, `com.au`, ...);
/// the language by the `tl` query parameter. There is no model to load, so
/// `load_model` only validates the language and returns an empty handle.
pub struct GoogleAccentBackend {
    client: Client,
    base_url: String,
    default_tld: String,
    descriptor: BackendDescriptor,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl GoogleAccentBackend {
    pub fn new(id: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            default_tld: DEFAULT_TLD.to_string(),
            descriptor: BackendDescriptor {
                id: id.to_string(),
                supports_speaker_id: false,
                supports_language_tag: true,
                supports_locale_accent: true,
                is_multi_speaker: false,
                supports_speed: true,
                languages: Vec::new(),
            },
            timeout: Duration::from_secs(20),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Option<Self> {
        let mut backend = Self::new(&config.id, &config.endpoint_or(DEFAULT_BASE_URL));
        backend.descriptor.supports_speed = config.speed;
        backend.descriptor.languages = config.languages.clone();
        if let Some(tld) = config.extra.get("tld").and_then(|v| v.as_str()) {
            backend.default_tld = tld.to_string();
        }
        if let Some(secs) = config.timeout_secs {
            backend.timeout = Duration::from_secs(secs);
        }
        Some(backend)
    }

    pub fn with_retry(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    fn url_for(&self, tld: &str) -> String {
        format!("{}/translate_tts", self.base_url.replace("{tld}", tld))
    }

    async fn fetch_chunk(
        &self,
        url: &str,
        language: &str,
        chunk: &str,
        slow: bool,
    ) -> Result<Vec<u8>, TtsError> {
        let speed = if slow { "0.3" } else { "1" };
        let query = [
            ("ie", "UTF-8"),
            ("client", "tw-ob"),
            ("tl", language),
            ("q", chunk),
            ("ttsspeed", speed),
        ];

        let response = request_with_backoff(
            || {
                self.client
                    .get(url)
                    .query(&query)
                    .timeout(self.timeout)
                    .send()
            },
            self.max_retries,
            self.retry_delay,
        )
        .await
        .map_err(TtsError::SynthesisFailed)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TtsError::SynthesisFailed(format!(
                "translate-tts error ({}): {}",
                status, error_text
            )));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TtsError::SynthesisFailed(format!("translate-tts bytes error: {}", e)))
    }
}

/// Split text into chunks of at most `max` characters, on whitespace where possible.
pub fn split_text(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            chunks.extend(chars.chunks(max).map(|c| c.iter().collect::<String>()));
            continue;
        }
        let needed = if current.is_empty() { word_len } else { word_len + 1 };
        if current_len + needed > max {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl TtsBackend for GoogleAccentBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn is_available(&self) -> bool {
        !self.base_url.is_empty()
    }

    async fn load_model(&self, language: &str) -> Result<ModelHandle, TtsError> {
        if language.trim().is_empty() {
            return Err(TtsError::ModelUnavailable("empty language code".into()));
        }
        if !self.descriptor.serves(language) {
            return Err(TtsError::ModelUnavailable(format!(
                "'{}' is not served by {}",
                language, self.descriptor.id
            )));
        }
        Ok(ModelHandle::new(
            self.descriptor.id.clone(),
            language,
            format!("translate_tts/{}", language),
            Vec::new(),
            Arc::new(()),
        ))
    }

    async fn synthesize(
        &self,
        model: &ModelHandle,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<SynthesizedAudio, TtsError> {
        let language = params.language.as_deref().unwrap_or(&model.language);
        let tld = params.locale.as_deref().unwrap_or(&self.default_tld);
        let slow = params.speed.map(|s| s < SLOW_BELOW).unwrap_or(false);
        let url = self.url_for(tld);

        let chunks = split_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(TtsError::InvalidInput("nothing to synthesize".into()));
        }

        let mut bytes = Vec::new();
        for chunk in &chunks {
            bytes.extend(self.fetch_chunk(&url, language, chunk, slow).await?);
        }
        debug!(
            target: "tts",
            backend = %self.descriptor.id,
            tld,
            language,
            chunks = chunks.len(),
            bytes = bytes.len(),
            "Accent backend synthesized"
        );

        Ok(SynthesizedAudio {
            bytes,
            format: AudioFormat::Mp3,
        })
    }
}

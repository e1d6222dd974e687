use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

// ── Error Types ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TtsError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Failed to load model for {backend}/{language}: {cause}")]
    ModelLoad {
        backend: String,
        language: String,
        cause: String,
    },
    #[error("Unsupported parameter: {0}")]
    UnsupportedParameter(String),
    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("Post-processing failed: {0}")]
    PostProcessingFailed(String),
    #[error("TTS timeout: {0}")]
    Timeout(String),
    #[error("TTS backend not found: {0}")]
    BackendNotFound(String),
    #[error("TTS config error: {0}")]
    ConfigError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TtsError {
    /// True for failures that mean "this backend/model cannot serve right now",
    /// which is what triggers the base-language fallback.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(
            self,
            TtsError::ModelUnavailable(_) | TtsError::ModelLoad { .. }
        )
    }
}

// ── Backend Descriptor ─────────────────────────────────

/// Static capability record for one backend, fixed at registration time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: String,
    pub supports_speaker_id: bool,
    pub supports_language_tag: bool,
    pub supports_locale_accent: bool,
    pub is_multi_speaker: bool,
    #[serde(default)]
    pub supports_speed: bool,
    /// Languages this backend can synthesize. Empty means any language.
    #[serde(default)]
    pub languages: Vec<String>,
}

impl BackendDescriptor {
    pub fn serves(&self, language: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|l| l == language)
    }

    /// Whether the backend can take the given selector as-is.
    pub fn accepts(&self, selector: &VoiceSelector) -> bool {
        match selector {
            VoiceSelector::SpeakerId(_) => self.supports_speaker_id,
            VoiceSelector::LocaleTag(_) => self.supports_locale_accent,
            VoiceSelector::LanguageTag(_) => self.supports_language_tag,
            VoiceSelector::None => true,
        }
    }
}

// ── Voice Profiles ─────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Neutral,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
            Gender::Neutral => write!(f, "neutral"),
        }
    }
}

/// Backend-specific voice selection carried by a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VoiceSelector {
    SpeakerId(String),
    LocaleTag(String),
    LanguageTag(String),
    None,
}

impl VoiceSelector {
    pub fn is_none(&self) -> bool {
        matches!(self, VoiceSelector::None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub persona: String,
    pub language: String,
    pub speed_factor: f32,
    pub pitch_shift_semitones: i32,
    pub gender: Gender,
    pub backend_selector: VoiceSelector,
    pub emotion_label: String,
    #[serde(default)]
    pub description: String,
}

/// Largest pitch shift a profile may ask for, either direction.
pub const MAX_PITCH_SHIFT_SEMITONES: i32 = 24;

impl VoiceProfile {
    /// Speed must be finite and positive; pitch within two octaves.
    pub fn validate(&self) -> Result<(), TtsError> {
        if !self.speed_factor.is_finite() || self.speed_factor <= 0.0 {
            return Err(TtsError::ConfigError(format!(
                "profile {}/{}: speed_factor must be > 0, got {}",
                self.persona, self.language, self.speed_factor
            )));
        }
        if self.pitch_shift_semitones.unsigned_abs() > MAX_PITCH_SHIFT_SEMITONES.unsigned_abs() {
            return Err(TtsError::ConfigError(format!(
                "profile {}/{}: pitch_shift_semitones must be within ±{}, got {}",
                self.persona, self.language, MAX_PITCH_SHIFT_SEMITONES, self.pitch_shift_semitones
            )));
        }
        Ok(())
    }
}

// ── Synthesis Parameters ───────────────────────────────

/// Parameters handed to a backend. Only fields the backend advertised
/// support for are ever populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisParams {
    pub speaker: Option<String>,
    pub language: Option<String>,
    pub locale: Option<String>,
    pub speed: Option<f32>,
    pub emotion: Option<String>,
}

// ── Audio ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mpeg",
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("wav") {
            Some(AudioFormat::Wav)
        } else if ct.contains("mpeg") || ct.contains("mp3") {
            Some(AudioFormat::Mp3)
        } else {
            None
        }
    }

    /// Sniff the container from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return Some(AudioFormat::Wav);
        }
        if bytes.starts_with(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0) {
            return Some(AudioFormat::Mp3);
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

// ── Model Handle ───────────────────────────────────────

/// A loaded backend model. Cheap to clone; the backend-owned state is shared.
#[derive(Clone)]
pub struct ModelHandle {
    pub backend_id: String,
    pub language: String,
    pub model_name: String,
    /// Speakers the loaded model offers, default speaker first.
    pub speakers: Vec<String>,
    state: Arc<dyn Any + Send + Sync>,
}

impl ModelHandle {
    pub fn new(
        backend_id: impl Into<String>,
        language: impl Into<String>,
        model_name: impl Into<String>,
        speakers: Vec<String>,
        state: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            language: language.into(),
            model_name: model_name.into(),
            speakers,
            state,
        }
    }

    /// Downcast the backend-owned state.
    pub fn state<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.state.downcast_ref::<T>()
    }

    pub fn default_speaker(&self) -> Option<&str> {
        self.speakers.first().map(String::as_str)
    }

    /// Two handles are the same load if they share the backend state allocation.
    pub fn same_model(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("backend_id", &self.backend_id)
            .field("language", &self.language)
            .field("model_name", &self.model_name)
            .field("speakers", &self.speakers.len())
            .finish()
    }
}

// ── Backend Trait ──────────────────────────────────────

#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Capabilities, fixed for the lifetime of the backend.
    fn descriptor(&self) -> &BackendDescriptor;

    /// Cheap reachability probe used by health reporting.
    async fn is_available(&self) -> bool;

    /// Load (or validate) the model serving `language`. Expensive; the
    /// orchestrator only calls this through the model cache.
    async fn load_model(&self, language: &str) -> Result<ModelHandle, TtsError>;

    /// Synthesize `text` with a previously loaded model.
    async fn synthesize(
        &self,
        model: &ModelHandle,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<SynthesizedAudio, TtsError>;
}

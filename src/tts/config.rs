use super::interface::{TtsError, VoiceProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ── Backend Config ─────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub backend_type: String, // "model_server", "piper", "google"
    #[serde(default = "default_true")]
    pub enabled: bool,

    // Common fields (optional, backend-specific)
    pub endpoint: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub binary: Option<String>,
    pub model_dir: Option<String>,
    /// Language → model name (model server) or voice key (piper).
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Piper voice key → `{ file, language }`.
    #[serde(default)]
    pub voices: HashMap<String, VoiceFileConfig>,
    /// Generic speaker id → backend voice key.
    #[serde(default)]
    pub speaker_aliases: HashMap<String, String>,
    pub default_voice: Option<String>,
    #[serde(default)]
    pub multi_speaker: bool,
    #[serde(default)]
    pub language_tag: bool,
    #[serde(default)]
    pub speed: bool,
    /// Languages served. Empty means any.
    #[serde(default)]
    pub languages: Vec<String>,
    pub timeout_secs: Option<u64>,

    /// Catch-all for backend-specific config
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl BackendConfig {
    /// Bearer key for backends behind auth, from the field or the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        crate::config::resolve_api_key(self.api_key.as_deref(), self.api_key_env.as_deref())
    }

    pub fn endpoint_or(&self, fallback: &str) -> String {
        self.endpoint
            .clone()
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| fallback.to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceFileConfig {
    pub file: String,
    pub language: String,
}

fn default_true() -> bool {
    true
}

// ── Queue Config ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_backend: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_backend: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}

// ── Top-Level System Config ────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSystemConfig {
    #[serde(default = "default_base_language")]
    pub base_language: String,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default)]
    pub synthesis_timeout_secs: Option<u64>,
    #[serde(default)]
    pub default_backend: Option<String>,
    #[serde(default)]
    pub routes: HashMap<String, String>,
    #[serde(default)]
    pub preload: Vec<String>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    /// Extra or overriding persona profiles, merged over the built-in table.
    #[serde(default)]
    pub personas: Vec<VoiceProfile>,
}

fn default_base_language() -> String {
    "en".to_string()
}

fn default_max_text_chars() -> usize {
    5000
}

fn model_server_backend(id: &str, languages: &[&str], models: &[(&str, &str)]) -> BackendConfig {
    BackendConfig {
        id: id.to_string(),
        backend_type: "model_server".to_string(),
        enabled: true,
        endpoint: Some("http://localhost:5002".to_string()),
        languages: languages.iter().map(|l| l.to_string()).collect(),
        models: models
            .iter()
            .map(|(l, m)| (l.to_string(), m.to_string()))
            .collect(),
        timeout_secs: Some(60),
        ..Default::default()
    }
}

impl Default for TtsSystemConfig {
    fn default() -> Self {
        let mut vctk = model_server_backend("coqui-vctk", &["en"], &[("en", "tts_models/en/vctk/vits")]);
        vctk.multi_speaker = true;
        vctk.speed = true;

        let mut multilingual = model_server_backend(
            "coqui-multilingual",
            &["hi", "ta"],
            &[
                ("hi", "tts_models/multilingual/multi-dataset/xtts_v2"),
                ("ta", "tts_models/multilingual/multi-dataset/xtts_v2"),
            ],
        );
        multilingual.multi_speaker = true;
        multilingual.language_tag = true;

        let telugu = model_server_backend("coqui-telugu", &["te"], &[("te", "tts_models/te/cv/vits")]);

        let google = BackendConfig {
            id: "google".to_string(),
            backend_type: "google".to_string(),
            enabled: true,
            languages: vec!["en".into(), "hi".into(), "te".into(), "ta".into()],
            speed: true,
            timeout_secs: Some(20),
            ..Default::default()
        };

        let piper = BackendConfig {
            id: "piper".to_string(),
            backend_type: "piper".to_string(),
            enabled: false,
            binary: Some("piper".to_string()),
            model_dir: Some("models/piper".to_string()),
            voices: [
                ("en_us_ryan", "en_US-ryan-high.onnx", "en"),
                ("en_us_lessac", "en_US-lessac-medium.onnx", "en"),
                ("en_gb_alan", "en_GB-alan-medium.onnx", "en"),
                ("en_us_amy", "en_US-amy-medium.onnx", "en"),
            ]
            .iter()
            .map(|(key, file, lang)| {
                (
                    key.to_string(),
                    VoiceFileConfig {
                        file: file.to_string(),
                        language: lang.to_string(),
                    },
                )
            })
            .collect(),
            speaker_aliases: [
                ("p260", "en_us_ryan"),
                ("p251", "en_us_ryan"),
                ("p259", "en_us_lessac"),
                ("p263", "en_gb_alan"),
                ("p229", "en_us_amy"),
            ]
            .iter()
            .map(|(s, v)| (s.to_string(), v.to_string()))
            .collect(),
            default_voice: Some("en_us_lessac".to_string()),
            multi_speaker: true,
            speed: true,
            languages: vec!["en".into()],
            timeout_secs: Some(60),
            ..Default::default()
        };

        Self {
            base_language: default_base_language(),
            max_text_chars: default_max_text_chars(),
            synthesis_timeout_secs: Some(120),
            default_backend: Some("google".to_string()),
            routes: [
                ("en", "coqui-vctk"),
                ("hi", "coqui-multilingual"),
                ("ta", "coqui-multilingual"),
                ("te", "coqui-telugu"),
            ]
            .iter()
            .map(|(l, b)| (l.to_string(), b.to_string()))
            .collect(),
            preload: vec!["en".to_string()],
            queue: QueueConfig::default(),
            backends: vec![vctk, multilingual, telugu, google, piper],
            personas: Vec::new(),
        }
    }
}

/// Read the system config. A missing or broken file gives the built-in defaults.
pub fn load_config(path: &Path) -> TtsSystemConfig {
    crate::config::load_json_config(path, "TTS")
}

/// Persist the system config as pretty JSON.
pub fn save_config(path: &Path, config: &TtsSystemConfig) -> Result<(), TtsError> {
    crate::config::save_json_config(path, config, "TTS")
}

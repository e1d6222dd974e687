use super::config::BackendConfig;
use super::interface::{
    AudioFormat, BackendDescriptor, ModelHandle, SynthesisParams, SynthesizedAudio, TtsBackend,
    TtsError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Piper backend: runs the local `piper` CLI against `.onnx` voice files.
///
/// Each voice is a separate model file tagged with a language. Generic
/// speaker ids (VCTK-style) are mapped to voices through `speaker_aliases`.
pub struct PiperBackend {
    binary: String,
    model_dir: PathBuf,
    /// Voice key → (file name, language).
    voices: HashMap<String, (String, String)>,
    speaker_aliases: HashMap<String, String>,
    default_voice: Option<String>,
    descriptor: BackendDescriptor,
    timeout: Duration,
    /// Where per-request output files are created.
    scratch_dir: PathBuf,
}

/// Backend state held in the model handle: voice key → resolved onnx path.
struct PiperModel {
    binary: PathBuf,
    voices: HashMap<String, PathBuf>,
    aliases: HashMap<String, String>,
    default_voice: String,
}

impl PiperBackend {
    pub fn from_config(config: &BackendConfig) -> Option<Self> {
        let voices: HashMap<String, (String, String)> = config
            .voices
            .iter()
            .map(|(key, v)| (key.clone(), (v.file.clone(), v.language.clone())))
            .collect();
        if voices.is_empty() {
            warn!(target: "tts", backend = %config.id, "Piper backend has no voices configured");
            return None;
        }

        let mut languages = config.languages.clone();
        if languages.is_empty() {
            languages = voices.values().map(|(_, lang)| lang.clone()).collect();
            languages.sort();
            languages.dedup();
        }

        Some(Self {
            binary: config.binary.clone().unwrap_or_else(|| "piper".to_string()),
            model_dir: PathBuf::from(config.model_dir.clone().unwrap_or_else(|| ".".to_string())),
            voices,
            speaker_aliases: config.speaker_aliases.clone(),
            default_voice: config.default_voice.clone(),
            descriptor: BackendDescriptor {
                id: config.id.clone(),
                supports_speaker_id: true,
                supports_language_tag: false,
                supports_locale_accent: false,
                is_multi_speaker: true,
                supports_speed: config.speed,
                languages,
            },
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(60)),
            scratch_dir: config
                .extra
                .get("scratch_dir")
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }
}

fn find_binary(bin: &str) -> Option<PathBuf> {
    // A path-like string is taken as-is
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.exists() { Some(p) } else { None };
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.exists())
}

#[async_trait]
impl TtsBackend for PiperBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn is_available(&self) -> bool {
        find_binary(&self.binary).is_some()
    }

    async fn load_model(&self, language: &str) -> Result<ModelHandle, TtsError> {
        let binary = find_binary(&self.binary).ok_or_else(|| {
            TtsError::ModelUnavailable(format!("piper binary '{}' not found", self.binary))
        })?;

        let mut voices = HashMap::new();
        for (key, (file, lang)) in &self.voices {
            if lang != language {
                continue;
            }
            let path = self.model_dir.join(file);
            if path.exists() {
                voices.insert(key.clone(), path);
            } else {
                debug!(target: "tts", voice = %key, path = %path.display(), "Piper voice file missing");
            }
        }
        if voices.is_empty() {
            return Err(TtsError::ModelUnavailable(format!(
                "no piper voice files for '{}' in {}",
                language,
                self.model_dir.display()
            )));
        }

        let mut keys: Vec<String> = voices.keys().cloned().collect();
        keys.sort();
        let default_voice = self
            .default_voice
            .clone()
            .filter(|v| voices.contains_key(v))
            .unwrap_or_else(|| keys[0].clone());

        // Default voice first, then the rest, then aliases that land on a loaded voice.
        let mut speakers = vec![default_voice.clone()];
        speakers.extend(keys.into_iter().filter(|k| k != &default_voice));
        let mut aliases: Vec<(&String, &String)> = self
            .speaker_aliases
            .iter()
            .filter(|(_, voice)| voices.contains_key(*voice))
            .collect();
        aliases.sort();
        speakers.extend(aliases.iter().map(|(alias, _)| (*alias).clone()));

        let model_name = voices[&default_voice]
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| default_voice.clone());

        let state = PiperModel {
            binary,
            aliases: aliases
                .into_iter()
                .map(|(a, v)| (a.clone(), v.clone()))
                .collect(),
            voices,
            default_voice,
        };
        Ok(ModelHandle::new(
            self.descriptor.id.clone(),
            language,
            model_name,
            speakers,
            Arc::new(state),
        ))
    }

    async fn synthesize(
        &self,
        model: &ModelHandle,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<SynthesizedAudio, TtsError> {
        let state = model
            .state::<PiperModel>()
            .ok_or_else(|| TtsError::Internal("handle was not loaded by piper".into()))?;

        let voice_key = match params.speaker.as_deref() {
            Some(speaker) => state
                .aliases
                .get(speaker)
                .map(String::as_str)
                .unwrap_or(speaker),
            None => state.default_voice.as_str(),
        };
        let voice_path = state.voices.get(voice_key).ok_or_else(|| {
            TtsError::UnsupportedParameter(format!("unknown piper voice '{}'", voice_key))
        })?;

        // Deleted when `output` drops, whichever way this returns.
        let output = tempfile::Builder::new()
            .prefix("persona-tts-")
            .suffix(".wav")
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| TtsError::SynthesisFailed(format!("temp file: {}", e)))?;

        let bytes = run_piper(
            &state.binary,
            voice_path,
            output.path(),
            text,
            params.speed,
            self.timeout,
        )
        .await?;

        if AudioFormat::sniff(&bytes) != Some(AudioFormat::Wav) {
            return Err(TtsError::SynthesisFailed("piper produced no WAV output".into()));
        }
        Ok(SynthesizedAudio {
            bytes,
            format: AudioFormat::Wav,
        })
    }
}

async fn run_piper(
    binary: &Path,
    voice: &Path,
    output: &Path,
    text: &str,
    speed: Option<f32>,
    limit: Duration,
) -> Result<Vec<u8>, TtsError> {
    let mut cmd = Command::new(binary);
    cmd.arg("--model")
        .arg(voice)
        .arg("--output_file")
        .arg(output)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(speed) = speed.filter(|s| *s > 0.0) {
        cmd.arg("--length_scale").arg(format!("{:.3}", 1.0 / speed));
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| TtsError::SynthesisFailed(format!("failed to start piper: {}", e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| TtsError::SynthesisFailed(format!("piper stdin: {}", e)))?;
    }

    let finished = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| TtsError::Timeout(format!("piper exceeded {:?}", limit)))?
        .map_err(|e| TtsError::SynthesisFailed(format!("piper wait: {}", e)))?;

    if !finished.status.success() {
        let stderr = String::from_utf8_lossy(&finished.stderr);
        return Err(TtsError::SynthesisFailed(format!(
            "piper exited with {}: {}",
            finished.status,
            stderr.trim()
        )));
    }

    tokio::fs::read(output)
        .await
        .map_err(|e| TtsError::SynthesisFailed(format!("piper output: {}", e)))
}

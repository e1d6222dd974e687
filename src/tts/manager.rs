use super::config::{BackendConfig, TtsSystemConfig};
use super::google_accent::GoogleAccentBackend;
use super::interface::{BackendDescriptor, TtsBackend, TtsError, VoiceProfile};
use super::model_cache::ModelCache;
use super::model_server::ModelServerBackend;
use super::params::build_params;
use super::persona::{PersonaProfileTable, DEFAULT_PERSONA};
use super::piper::PiperBackend;
use super::pitch::PitchShifter;
use super::queue::TtsQueue;
use super::router::{BackendRouter, RouteResult};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Requests & Results ─────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub enhance: bool,
}

fn default_language() -> String {
    "en".to_string()
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
            persona: None,
            enhance: false,
        }
    }

    pub fn persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn enhance(mut self, enhance: bool) -> Self {
        self.enhance = enhance;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub audio_bytes: Vec<u8>,
    pub mime_type: String,
    pub applied_profile: VoiceProfile,
    pub backend_used: String,
    pub model_name: String,
    pub requested_language: String,
    pub resolved_language: String,
    /// True when the base-language fallback produced this result.
    pub degraded: bool,
    /// Semitones actually applied, 0 if no shift happened.
    pub pitch_shift_applied: i32,
}

impl SynthesisResult {
    /// Response metadata as header name/value pairs.
    pub fn metadata(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-TTS-Engine", self.backend_used.clone()),
            ("X-Model", self.model_name.clone()),
            ("X-Language", self.resolved_language.clone()),
            ("X-Requested-Language", self.requested_language.clone()),
            ("X-Persona", self.applied_profile.persona.clone()),
            ("X-Speed", self.applied_profile.speed_factor.to_string()),
            ("X-Pitch-Shift", self.pitch_shift_applied.to_string()),
            ("X-Gender", self.applied_profile.gender.to_string()),
            ("X-TTS-Fallback", self.degraded.to_string()),
            ("X-Emotion", self.applied_profile.emotion_label.clone()),
        ]
    }
}

// ── Errors ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    ModelLoadError,
    Internal,
    SynthesisFailed,
    Timeout,
}

/// A failed request, with enough context to reproduce it.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "TTS failed for persona '{persona}' in '{language}' (backend: {}, degraded: {degraded}): {source}",
    .backend.as_deref().unwrap_or("none")
)]
pub struct SynthesisError {
    pub persona: String,
    pub language: String,
    pub backend: Option<String>,
    pub degraded: bool,
    pub source: TtsError,
}

impl SynthesisError {
    pub fn kind(&self) -> ErrorKind {
        match &self.source {
            TtsError::InvalidInput(_) => ErrorKind::InvalidInput,
            TtsError::ModelUnavailable(_) | TtsError::ModelLoad { .. } => ErrorKind::ModelLoadError,
            TtsError::SynthesisFailed(_) => ErrorKind::SynthesisFailed,
            TtsError::Timeout(_) => ErrorKind::Timeout,
            TtsError::UnsupportedParameter(_)
            | TtsError::PostProcessingFailed(_)
            | TtsError::BackendNotFound(_)
            | TtsError::ConfigError(_)
            | TtsError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// One attempt's failure: which backend (if any) was involved.
struct AttemptFailure {
    backend: Option<String>,
    source: TtsError,
}

impl AttemptFailure {
    fn new(backend: Option<&str>, source: TtsError) -> Self {
        Self {
            backend: backend.map(str::to_string),
            source,
        }
    }
}

// ── Discovery & Health ─────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct VoiceListing {
    pub base_language: String,
    pub personas: Vec<String>,
    pub profiles: Vec<VoiceProfile>,
    pub backends: Vec<BackendDescriptor>,
    pub routes: BTreeMap<String, String>,
    pub default_backend: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub descriptor: BackendDescriptor,
    pub available: bool,
    pub loaded_languages: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageHealth {
    pub language: String,
    pub backend: Option<String>,
    pub servable: bool,
    pub model_loaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub backends: Vec<BackendHealth>,
    pub languages: Vec<LanguageHealth>,
    pub loaded_models: usize,
}

// ── TtsService ─────────────────────────────────────────

/// The synthesis orchestrator: persona profile → backend route → cached
/// model → capability-aware params → synthesis → optional pitch shift.
pub struct TtsService {
    profiles: Arc<PersonaProfileTable>,
    router: BackendRouter,
    models: Arc<ModelCache>,
    queue: TtsQueue,
    base_language: String,
    max_text_chars: usize,
    timeout: Option<Duration>,
    preload_languages: Vec<String>,
}

impl TtsService {
    pub fn new(profiles: PersonaProfileTable, router: BackendRouter) -> Self {
        Self {
            profiles: Arc::new(profiles),
            router,
            models: Arc::new(ModelCache::new()),
            queue: TtsQueue::new(4),
            base_language: "en".to_string(),
            max_text_chars: 5000,
            timeout: None,
            preload_languages: Vec::new(),
        }
    }

    /// Use a shared or pre-seeded model cache.
    pub fn with_model_cache(mut self, models: Arc<ModelCache>) -> Self {
        self.models = models;
        self
    }

    pub fn with_queue_limit(mut self, max_concurrent_per_backend: usize) -> Self {
        self.queue = TtsQueue::new(max_concurrent_per_backend);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_language(mut self, base_language: &str) -> Self {
        self.base_language = base_language.trim().to_lowercase();
        self
    }

    pub fn with_max_text_chars(mut self, max_text_chars: usize) -> Self {
        self.max_text_chars = max_text_chars;
        self
    }

    pub fn with_preload(mut self, languages: Vec<String>) -> Self {
        self.preload_languages = languages;
        self
    }

    /// Build the service and all enabled backends from config.
    pub fn from_config(config: &TtsSystemConfig) -> Result<Self, TtsError> {
        for profile in &config.personas {
            profile.validate()?;
        }
        let profiles = PersonaProfileTable::with_base_language(
            super::persona::builtin_profiles()
                .into_iter()
                .chain(config.personas.iter().cloned()),
            &config.base_language,
        );
        let mut router = BackendRouter::new(config.routes.clone(), config.default_backend.clone());

        for backend_config in &config.backends {
            if !backend_config.enabled {
                info!(target: "tts", backend = %backend_config.id, "Skipping disabled backend");
                continue;
            }
            match Self::build_backend(backend_config) {
                Some(backend) => router.register(backend)?,
                None => warn!(
                    target: "tts",
                    backend = %backend_config.id,
                    backend_type = %backend_config.backend_type,
                    "Failed to build backend, check its config"
                ),
            }
        }

        if let Some(id) = &config.default_backend {
            if router.get(id).is_none() {
                warn!(target: "tts", backend = %id, "Default backend is not registered");
            }
        }
        for (language, id) in &config.routes {
            if router.get(id).is_none() {
                warn!(target: "tts", %language, backend = %id, "Route points at an unregistered backend");
            }
        }

        Ok(Self::new(profiles, router)
            .with_base_language(&config.base_language)
            .with_max_text_chars(config.max_text_chars)
            .with_queue_limit(config.queue.max_concurrent_per_backend)
            .with_timeout(config.synthesis_timeout_secs.map(Duration::from_secs))
            .with_preload(config.preload.clone()))
    }

    fn build_backend(config: &BackendConfig) -> Option<Arc<dyn TtsBackend>> {
        match config.backend_type.as_str() {
            "model_server" => {
                ModelServerBackend::from_config(config).map(|b| Arc::new(b) as Arc<dyn TtsBackend>)
            }
            "piper" => PiperBackend::from_config(config).map(|b| Arc::new(b) as Arc<dyn TtsBackend>),
            "google" => {
                GoogleAccentBackend::from_config(config).map(|b| Arc::new(b) as Arc<dyn TtsBackend>)
            }
            other => {
                warn!(target: "tts", backend_type = other, "Unknown backend type");
                None
            }
        }
    }

    /// Register an extra backend. Only possible before the service is shared.
    pub fn register_backend(&mut self, backend: Arc<dyn TtsBackend>) -> Result<(), TtsError> {
        self.router.register(backend)
    }

    pub fn profiles(&self) -> &PersonaProfileTable {
        &self.profiles
    }

    pub fn model_cache(&self) -> &Arc<ModelCache> {
        &self.models
    }

    /// Synthesize one request.
    pub async fn handle(&self, request: &SynthesisRequest) -> Result<SynthesisResult, SynthesisError> {
        let persona = request
            .persona
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PERSONA);
        let requested = request.language.trim().to_lowercase();

        let fail = |language: &str, degraded: bool, failure: AttemptFailure| SynthesisError {
            persona: persona.to_string(),
            language: language.to_string(),
            backend: failure.backend,
            degraded,
            source: failure.source,
        };

        self.validate(&request.text, &requested)
            .map_err(|e| fail(&requested, false, AttemptFailure::new(None, e)))?;

        match self.attempt(persona, &requested, request).await {
            Ok(result) => Ok(result),
            Err(failure) if failure.source.is_model_unavailable() && requested != self.base_language => {
                warn!(
                    target: "tts",
                    persona,
                    language = %requested,
                    fallback = %self.base_language,
                    backend = failure.backend.as_deref().unwrap_or("none"),
                    error = %failure.source,
                    "Language unavailable, falling back to base language"
                );
                let base = self.base_language.clone();
                self.attempt(persona, &base, request)
                    .await
                    .map(|mut result| {
                        result.requested_language = requested.clone();
                        result.degraded = true;
                        result
                    })
                    .map_err(|failure| fail(&base, true, failure))
            }
            Err(failure) => Err(fail(&requested, false, failure)),
        }
    }

    fn validate(&self, text: &str, language: &str) -> Result<(), TtsError> {
        if text.trim().is_empty() {
            return Err(TtsError::InvalidInput("text must not be empty".into()));
        }
        let chars = text.chars().count();
        if chars > self.max_text_chars {
            return Err(TtsError::InvalidInput(format!(
                "text is {} characters, limit is {}",
                chars, self.max_text_chars
            )));
        }
        if language.is_empty() {
            return Err(TtsError::InvalidInput("language must not be empty".into()));
        }
        Ok(())
    }

    /// One synthesis attempt in `language`, bounded by the service timeout.
    /// Routing happens first so a timeout still names the backend.
    async fn attempt(
        &self,
        persona: &str,
        language: &str,
        request: &SynthesisRequest,
    ) -> Result<SynthesisResult, AttemptFailure> {
        let route = self
            .router
            .route(language)
            .map_err(|e| AttemptFailure::new(None, e))?;
        let backend_id = route.backend.descriptor().id.clone();

        let run = self.attempt_inner(persona, language, request, route);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.unwrap_or_else(|_| {
                Err(AttemptFailure::new(
                    Some(&backend_id),
                    TtsError::Timeout(format!("synthesis exceeded {:?}", limit)),
                ))
            }),
            None => run.await,
        }
    }

    async fn attempt_inner(
        &self,
        persona: &str,
        language: &str,
        request: &SynthesisRequest,
        route: RouteResult,
    ) -> Result<SynthesisResult, AttemptFailure> {
        let profile = self.profiles.resolve(persona, language).clone();

        let RouteResult { backend, reason } = route;
        let backend_id = backend.descriptor().id.clone();
        let failed = |e: TtsError| AttemptFailure::new(Some(&backend_id), e);

        let model = self
            .models
            .get_or_create(&backend, language)
            .await
            .map_err(failed)?;

        let params = build_params(backend.descriptor(), &profile, &model, language);
        let text = request.text.trim();
        let audio = self
            .queue
            .run(&backend_id, || backend.synthesize(&model, text, &params))
            .await
            .map_err(|e| match e {
                // Params are built from the descriptor, so this is a descriptor bug.
                TtsError::UnsupportedParameter(detail) => failed(TtsError::Internal(format!(
                    "backend '{}' rejected capability-checked params: {}",
                    backend_id, detail
                ))),
                other => failed(other),
            })?;

        let mut bytes = audio.bytes;
        let mut pitch_shift_applied = 0;
        let semitones = profile.pitch_shift_semitones;
        if request.enhance && semitones != 0 {
            match shift_pitch(bytes, semitones).await {
                Ok(shifted) => {
                    bytes = shifted;
                    pitch_shift_applied = semitones;
                }
                Err((original, e)) => {
                    warn!(
                        target: "tts",
                        backend = %backend_id,
                        semitones,
                        error = %e,
                        "Pitch shift failed, returning unshifted audio"
                    );
                    bytes = original;
                }
            }
        }

        debug!(
            target: "tts",
            backend = %backend_id,
            route = ?reason,
            persona = %profile.persona,
            language,
            bytes = bytes.len(),
            "Synthesis complete"
        );

        Ok(SynthesisResult {
            audio_bytes: bytes,
            mime_type: audio.format.mime_type().to_string(),
            applied_profile: profile,
            backend_used: backend_id.clone(),
            model_name: model.model_name.clone(),
            requested_language: language.to_string(),
            resolved_language: language.to_string(),
            degraded: false,
            pitch_shift_applied,
        })
    }

    /// Warm the models for the configured preload languages. Failures are
    /// logged and skipped. Returns how many models are ready afterwards.
    pub async fn preload(&self) -> usize {
        let loads = self.preload_languages.iter().map(|language| async move {
            let route = match self.router.route(language) {
                Ok(route) => route,
                Err(e) => {
                    warn!(target: "tts", %language, error = %e, "Preload skipped, no route");
                    return false;
                }
            };
            match self.models.get_or_create(&route.backend, language).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(target: "tts", %language, error = %e, "Preload failed");
                    false
                }
            }
        });
        let ready = join_all(loads).await.into_iter().filter(|ok| *ok).count();
        info!(target: "tts", ready, requested = self.preload_languages.len(), "Preload finished");
        ready
    }

    /// Everything a voice-discovery endpoint needs.
    pub fn list_voices(&self) -> VoiceListing {
        VoiceListing {
            base_language: self.base_language.clone(),
            personas: self.profiles.personas().into_iter().map(str::to_string).collect(),
            profiles: self.profiles.list().into_iter().cloned().collect(),
            backends: self.router.descriptors(),
            routes: self
                .router
                .routes()
                .iter()
                .map(|(l, b)| (l.clone(), b.clone()))
                .collect(),
            default_backend: self.router.default_backend().map(str::to_string),
        }
    }

    /// Per-backend availability and per-language routing/model state.
    pub async fn health(&self) -> HealthReport {
        let loaded = self.models.loaded_keys().await;

        let probes = self.router.backends().map(|backend| async move {
            let descriptor = backend.descriptor().clone();
            let available = backend.is_available().await;
            (descriptor, available)
        });
        let backends = join_all(probes)
            .await
            .into_iter()
            .map(|(descriptor, available)| BackendHealth {
                loaded_languages: loaded
                    .iter()
                    .filter(|k| k.backend_id == descriptor.id)
                    .map(|k| k.language.clone())
                    .collect(),
                descriptor,
                available,
            })
            .collect();

        let mut languages = Vec::new();
        for language in self.router.known_languages() {
            let route = self.router.route(&language).ok();
            let backend = route.as_ref().map(|r| r.backend.descriptor().id.clone());
            let model_loaded = match &backend {
                Some(id) => loaded.iter().any(|k| &k.backend_id == id && k.language == language),
                None => false,
            };
            languages.push(LanguageHealth {
                servable: backend.is_some(),
                backend,
                model_loaded,
                language,
            });
        }

        HealthReport {
            backends,
            languages,
            loaded_models: loaded.len(),
        }
    }
}

/// Run the pitch shift on the blocking pool. On failure the original bytes
/// come back with the error.
async fn shift_pitch(bytes: Vec<u8>, semitones: i32) -> Result<Vec<u8>, (Vec<u8>, TtsError)> {
    let original = Arc::new(bytes);
    let input = Arc::clone(&original);
    let outcome = tokio::task::spawn_blocking(move || PitchShifter::shift(&input, semitones))
        .await
        .map_err(|e| TtsError::PostProcessingFailed(format!("pitch task failed: {}", e)))
        .and_then(|r| r);

    match outcome {
        Ok(shifted) => Ok(shifted),
        Err(e) => {
            let original = Arc::try_unwrap(original).unwrap_or_else(|shared| (*shared).clone());
            Err((original, e))
        }
    }
}

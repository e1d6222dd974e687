use super::interface::{BackendDescriptor, TtsBackend, TtsError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Language router: picks the backend that should serve a language.
///
/// Selection order:
///   1. An explicit route for the language, if that backend serves it
///   2. The default backend, if it serves the language
///   3. Any backend that explicitly lists the language (lowest id first)
///
/// A language no registered backend can serve is reported as
/// `ModelUnavailable`, which the orchestrator treats as grounds for the
/// base-language fallback.
pub struct BackendRouter {
    backends: BTreeMap<String, Arc<dyn TtsBackend>>,
    routes: HashMap<String, String>,
    default_backend: Option<String>,
}

#[derive(Clone)]
pub struct RouteResult {
    pub backend: Arc<dyn TtsBackend>,
    pub reason: RouteReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    Explicit,
    Default,
    Capability,
}

impl BackendRouter {
    pub fn new(routes: HashMap<String, String>, default_backend: Option<String>) -> Self {
        Self {
            backends: BTreeMap::new(),
            routes: routes
                .into_iter()
                .map(|(lang, id)| (lang.trim().to_lowercase(), id))
                .collect(),
            default_backend,
        }
    }

    /// Register a backend. Its descriptor is validated here, once.
    pub fn register(&mut self, backend: Arc<dyn TtsBackend>) -> Result<(), TtsError> {
        let descriptor = backend.descriptor();
        validate_descriptor(descriptor)?;
        if self.backends.contains_key(&descriptor.id) {
            return Err(TtsError::ConfigError(format!(
                "backend '{}' registered twice",
                descriptor.id
            )));
        }
        info!(
            target: "tts",
            backend = %descriptor.id,
            speaker_id = descriptor.supports_speaker_id,
            language_tag = descriptor.supports_language_tag,
            locale = descriptor.supports_locale_accent,
            languages = ?descriptor.languages,
            "Registered backend"
        );
        self.backends.insert(descriptor.id.clone(), backend);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn TtsBackend>> {
        self.backends.get(id)
    }

    pub fn backends(&self) -> impl Iterator<Item = &Arc<dyn TtsBackend>> {
        self.backends.values()
    }

    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends.values().map(|b| b.descriptor().clone()).collect()
    }

    pub fn routes(&self) -> &HashMap<String, String> {
        &self.routes
    }

    pub fn default_backend(&self) -> Option<&str> {
        self.default_backend.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Every language with an explicit route or an explicitly serving backend, sorted.
    pub fn known_languages(&self) -> Vec<String> {
        let mut langs: BTreeSet<String> = self.routes.keys().cloned().collect();
        for backend in self.backends.values() {
            langs.extend(backend.descriptor().languages.iter().cloned());
        }
        langs.into_iter().collect()
    }

    pub fn route(&self, language: &str) -> Result<RouteResult, TtsError> {
        let language = language.trim().to_lowercase();

        if self.backends.is_empty() {
            return Err(TtsError::BackendNotFound("no TTS backends registered".into()));
        }

        if let Some(id) = self.routes.get(&language) {
            if let Some(backend) = self.serving(id, &language) {
                return Ok(self.found(backend, RouteReason::Explicit, &language));
            }
            debug!(target: "tts", backend = %id, %language, "Routed backend cannot serve language");
        }

        if let Some(id) = &self.default_backend {
            if let Some(backend) = self.serving(id, &language) {
                return Ok(self.found(backend, RouteReason::Default, &language));
            }
        }

        let by_capability = self
            .backends
            .values()
            .find(|b| b.descriptor().languages.iter().any(|l| l == &language));
        if let Some(backend) = by_capability {
            return Ok(self.found(Arc::clone(backend), RouteReason::Capability, &language));
        }

        Err(TtsError::ModelUnavailable(format!(
            "no backend can serve language '{}'",
            language
        )))
    }

    fn serving(&self, id: &str, language: &str) -> Option<Arc<dyn TtsBackend>> {
        self.backends
            .get(id)
            .filter(|b| b.descriptor().serves(language))
            .cloned()
    }

    fn found(&self, backend: Arc<dyn TtsBackend>, reason: RouteReason, language: &str) -> RouteResult {
        debug!(target: "tts", backend = %backend.descriptor().id, language, ?reason, "Routed");
        RouteResult { backend, reason }
    }
}

fn validate_descriptor(descriptor: &BackendDescriptor) -> Result<(), TtsError> {
    if descriptor.id.trim().is_empty() {
        return Err(TtsError::ConfigError("backend id must not be empty".into()));
    }
    if descriptor.is_multi_speaker && !descriptor.supports_speaker_id {
        return Err(TtsError::ConfigError(format!(
            "backend '{}' is multi-speaker but takes no speaker id",
            descriptor.id
        )));
    }
    Ok(())
}

use super::helpers::{mp3_sine_fixture, service_with, wav_fixture, wav_frames, ScriptedBackend};
use crate::tts::config::TtsSystemConfig;
use crate::tts::interface::{AudioFormat, TtsError, VoiceSelector};
use crate::tts::manager::{ErrorKind, SynthesisRequest};
use crate::tts::model_cache::ModelCache;
use crate::tts::{ModelHandle, TtsService};
use std::sync::Arc;

fn vctk() -> Arc<ScriptedBackend> {
    Arc::new(
        ScriptedBackend::new("vctk")
            .languages(&["en"])
            .speakers(&["p225", "p259", "p260"])
            .descriptor_with(|d| d.supports_speed = true),
    )
}

fn header<'a>(meta: &'a [(&'static str, String)], name: &str) -> &'a str {
    meta.iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| v.as_str())
        .unwrap_or_else(|| panic!("missing header {name}"))
}

// ── Scenario: Telugu unavailable → English fallback ─────────

#[tokio::test]
async fn test_shiva_in_telugu_falls_back_to_english() {
    let telugu = Arc::new(
        ScriptedBackend::new("telugu")
            .languages(&["te"])
            .fail_loads(TtsError::ModelUnavailable("te weights missing".into())),
    );
    let en = vctk();
    let service = service_with(
        vec![telugu.clone(), en.clone()],
        &[("te", "telugu"), ("en", "vctk")],
        None,
    );

    let request = SynthesisRequest::new("Hello", "te")
        .persona("shiva")
        .enhance(true);
    let result = service.handle(&request).await.unwrap();

    assert!(result.degraded);
    assert_eq!(result.applied_profile.persona, "shiva");
    assert_eq!(result.applied_profile.language, "en");
    assert_eq!(result.backend_used, "vctk");
    assert_eq!(result.requested_language, "te");
    assert_eq!(result.resolved_language, "en");
    assert_eq!(telugu.load_count(), 1);
    assert_eq!(telugu.synth_count(), 0);

    let meta = result.metadata();
    assert_eq!(header(&meta, "X-TTS-Fallback"), "true");
    assert_eq!(header(&meta, "X-Language"), "en");
    assert_eq!(header(&meta, "X-Requested-Language"), "te");
    assert_eq!(header(&meta, "X-Persona"), "shiva");
    assert_eq!(header(&meta, "X-Gender"), "male");

    // shiva's English profile: speaker p260, pitched down 5 semitones.
    assert_eq!(en.params().unwrap().speaker.as_deref(), Some("p260"));
    assert_eq!(result.pitch_shift_applied, -5);
    assert_eq!(header(&meta, "X-Pitch-Shift"), "-5");
    assert!(wav_frames(&result.audio_bytes) > 2048, "shifting down lengthens");
}

// ── Input validation ────────────────────────────────────────

#[tokio::test]
async fn test_empty_text_is_rejected_before_any_backend_work() {
    let en = vctk();
    let service = service_with(vec![en.clone()], &[("en", "vctk")], None);

    for text in ["", "   \n\t"] {
        let err = service
            .handle(&SynthesisRequest::new(text, "en"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.backend, None);
    }
    assert_eq!(en.load_count(), 0);
    assert_eq!(en.synth_count(), 0);
}

#[tokio::test]
async fn test_text_length_limit_is_5000_characters() {
    let en = vctk();
    let service = service_with(vec![en.clone()], &[("en", "vctk")], None);

    let err = service
        .handle(&SynthesisRequest::new("a".repeat(5001), "en"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(en.load_count(), 0);

    // Limit counts characters, not bytes.
    let telugu_text = "న".repeat(5000);
    assert!(telugu_text.len() > 5000);
    service
        .handle(&SynthesisRequest::new(telugu_text, "en"))
        .await
        .unwrap();
}

// ── Persona resolution through the service ──────────────────

#[tokio::test]
async fn test_unknown_persona_gets_default_voice() {
    let en = vctk();
    let service = service_with(vec![en.clone()], &[("en", "vctk")], None);
    let backend_audio = wav_fixture(2048, 16000);

    let result = service
        .handle(&SynthesisRequest::new("Hi", "en").persona("nobody").enhance(true))
        .await
        .unwrap();

    assert_eq!(result.applied_profile.persona, "default");
    assert_eq!(result.pitch_shift_applied, 0);
    assert_eq!(result.audio_bytes, backend_audio, "default has no pitch shift");
    assert!(!result.degraded);
    // The default profile carries no speaker, and vctk is not multilingual.
    assert_eq!(en.params().unwrap().speaker, None);
}

#[tokio::test]
async fn test_enhance_off_returns_backend_audio_untouched() {
    let en = vctk();
    let service = service_with(vec![en.clone()], &[("en", "vctk")], None);

    let result = service
        .handle(&SynthesisRequest::new("Om", "en").persona("shiva"))
        .await
        .unwrap();
    assert_eq!(result.audio_bytes, wav_fixture(2048, 16000));
    assert_eq!(result.pitch_shift_applied, 0);
    assert_eq!(result.mime_type, "audio/wav");
}

#[tokio::test]
async fn test_mp3_backend_output_is_pitch_shifted() {
    let original = mp3_sine_fixture(22050, 22050);
    let accent = Arc::new(
        ScriptedBackend::new("accent")
            .languages(&["en"])
            .returning(original.clone(), AudioFormat::Mp3),
    );
    let service = service_with(vec![accent], &[("en", "accent")], None);

    let result = service
        .handle(&SynthesisRequest::new("Ravens", "en").persona("odin").enhance(true))
        .await
        .unwrap();
    assert_eq!(result.pitch_shift_applied, -6);
    assert_eq!(result.mime_type, "audio/mpeg");
    assert_eq!(AudioFormat::sniff(&result.audio_bytes), Some(AudioFormat::Mp3));
    assert_ne!(result.audio_bytes, original);
    // Pitched down, so the clip gets longer.
    assert!(result.audio_bytes.len() > original.len());
}

#[tokio::test]
async fn test_multilingual_backend_gets_language_and_model_default_speaker() {
    let multi = Arc::new(
        ScriptedBackend::new("multi")
            .languages(&["hi", "ta"])
            .speakers(&["Ana Florence", "Claribel Dervla"])
            .descriptor_with(|d| d.supports_language_tag = true),
    );
    let service = service_with(vec![multi.clone(), vctk()], &[("hi", "multi")], None);

    let result = service
        .handle(&SynthesisRequest::new("नमस्ते", "hi").persona("krishna"))
        .await
        .unwrap();
    assert_eq!(result.applied_profile.language, "hi");

    let params = multi.params().unwrap();
    assert_eq!(params.language.as_deref(), Some("hi"));
    // krishna's p259 is not a speaker of this model.
    assert_eq!(params.speaker.as_deref(), Some("Ana Florence"));
    assert_eq!(params.speed, None);
    assert_eq!(params.emotion.as_deref(), Some("calm"));
}

// ── Model cache through the service ─────────────────────────

#[tokio::test]
async fn test_model_is_loaded_once_across_requests() {
    let en = vctk();
    let service = Arc::new(service_with(vec![en.clone()], &[("en", "vctk")], None));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            service
                .handle(&SynthesisRequest::new(format!("line {i}"), "en").persona("rama"))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(en.load_count(), 1);
    assert_eq!(en.synth_count(), 16);
    assert!(service.model_cache().is_loaded("vctk", "en").await);
}

#[tokio::test]
async fn test_injected_cache_skips_backend_load() {
    let cache = Arc::new(ModelCache::new());
    cache
        .insert(ModelHandle::new(
            "vctk",
            "en",
            "preseeded",
            vec!["p260".into()],
            Arc::new(()),
        ))
        .await;

    let en = vctk();
    let mut service = service_with(Vec::new(), &[("en", "vctk")], None)
        .with_model_cache(Arc::clone(&cache));
    service.register_backend(en.clone()).unwrap();
    assert!(service.register_backend(en.clone()).is_err(), "duplicate id");

    let result = service
        .handle(&SynthesisRequest::new("cached", "en").persona("shiva"))
        .await
        .unwrap();
    assert_eq!(result.model_name, "preseeded");
    assert_eq!(en.load_count(), 0);
    assert_eq!(en.synth_count(), 1);
}

// ── Discovery & health ──────────────────────────────────────

#[tokio::test]
async fn test_list_voices_exposes_table_and_backends() {
    let service = service_with(vec![vctk()], &[("en", "vctk")], None);
    let listing = service.list_voices();

    assert!(listing.personas.iter().any(|p| p == "shiva"));
    assert!(!listing.personas.iter().any(|p| p == "default"));
    assert_eq!(listing.profiles.last().unwrap().persona, "default");
    assert_eq!(listing.profiles.len(), service.profiles().len());
    assert_eq!(listing.backends[0].id, "vctk");
    assert_eq!(listing.routes.get("en").map(String::as_str), Some("vctk"));

    let json = serde_json::to_value(&listing).unwrap();
    assert_eq!(json["base_language"], "en");
}

#[tokio::test]
async fn test_health_reports_backends_and_languages() {
    let broken = Arc::new(
        ScriptedBackend::new("telugu")
            .languages(&["te"])
            .fail_loads(TtsError::ModelUnavailable("offline".into())),
    );
    let en = vctk();
    let service = service_with(
        vec![broken, en],
        &[("te", "telugu"), ("en", "vctk")],
        None,
    );
    service
        .handle(&SynthesisRequest::new("warm up", "en"))
        .await
        .unwrap();

    let report = service.health().await;
    let telugu = report
        .backends
        .iter()
        .find(|b| b.descriptor.id == "telugu")
        .unwrap();
    assert!(!telugu.available);
    let vctk_health = report
        .backends
        .iter()
        .find(|b| b.descriptor.id == "vctk")
        .unwrap();
    assert!(vctk_health.available);
    assert_eq!(vctk_health.loaded_languages, vec!["en"]);

    let en = report.languages.iter().find(|l| l.language == "en").unwrap();
    assert!(en.servable && en.model_loaded);
    let te = report.languages.iter().find(|l| l.language == "te").unwrap();
    assert!(te.servable && !te.model_loaded);
    assert_eq!(report.loaded_models, 1);
}

#[tokio::test]
async fn test_preload_warms_configured_languages() {
    let en = vctk();
    let service = service_with(vec![en.clone()], &[("en", "vctk")], None)
        .with_preload(vec!["en".into(), "fr".into()]);

    assert_eq!(service.preload().await, 1);
    assert_eq!(en.load_count(), 1);
    service
        .handle(&SynthesisRequest::new("ready", "en"))
        .await
        .unwrap();
    assert_eq!(en.load_count(), 1);
}

// ── Config-built service ────────────────────────────────────

#[test]
fn test_default_config_registers_enabled_backends_only() {
    let service = TtsService::from_config(&TtsSystemConfig::default()).unwrap();
    let ids: Vec<String> = service
        .list_voices()
        .backends
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(
        ids,
        vec!["coqui-multilingual", "coqui-telugu", "coqui-vctk", "google"]
    );
}

#[test]
fn test_config_personas_override_builtin_profiles() {
    let mut config = TtsSystemConfig::default();
    let mut zeus = crate::tts::persona::builtin_default();
    zeus.persona = "zeus".into();
    zeus.language = "en".into();
    zeus.backend_selector = VoiceSelector::LocaleTag("com.au".into());
    config.personas.push(zeus);

    let service = TtsService::from_config(&config).unwrap();
    assert_eq!(
        service.profiles().resolve("zeus", "en").backend_selector,
        VoiceSelector::LocaleTag("com.au".into())
    );
}

#[test]
fn test_invalid_config_persona_is_rejected() {
    let mut config = TtsSystemConfig::default();
    let mut shiva = crate::tts::persona::builtin_default();
    shiva.persona = "shiva".into();
    shiva.language = "en".into();
    shiva.speed_factor = -1.0;
    shiva.pitch_shift_semitones = -5000;
    config.personas.push(shiva);

    let err = TtsService::from_config(&config).err().unwrap();
    assert!(matches!(err, TtsError::ConfigError(_)));

    config.personas[0].speed_factor = 0.9;
    config.personas[0].pitch_shift_semitones = -30;
    assert!(TtsService::from_config(&config).is_err());

    config.personas[0].pitch_shift_semitones = -7;
    assert!(TtsService::from_config(&config).is_ok());
}

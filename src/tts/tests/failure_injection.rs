use super::helpers::{mp3_fixture, service_with, ScriptedBackend};
use crate::tts::interface::{AudioFormat, TtsError};
use crate::tts::manager::{ErrorKind, SynthesisRequest};
use std::sync::Arc;
use std::time::Duration;

fn failing(id: &str, languages: &[&str]) -> Arc<ScriptedBackend> {
    Arc::new(
        ScriptedBackend::new(id)
            .languages(languages)
            .fail_loads(TtsError::ModelUnavailable(format!("{id} offline"))),
    )
}

fn healthy(id: &str, languages: &[&str]) -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::new(id).languages(languages))
}

// ── Fallback bound ──────────────────────────────────────────

#[tokio::test]
async fn test_fallback_stops_after_exactly_two_attempts() {
    let te = failing("telugu", &["te"]);
    let en = failing("vctk", &["en"]);
    let service = service_with(
        vec![te.clone(), en.clone()],
        &[("te", "telugu"), ("en", "vctk")],
        None,
    );

    let err = service
        .handle(&SynthesisRequest::new("Hello", "te").persona("shiva"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ModelLoadError);
    assert!(err.degraded);
    assert_eq!(err.language, "en");
    assert_eq!(err.backend.as_deref(), Some("vctk"));
    assert_eq!(err.persona, "shiva");
    assert_eq!(te.load_count() + en.load_count(), 2);
    assert_eq!(te.synth_count() + en.synth_count(), 0);
}

#[tokio::test]
async fn test_base_language_failure_is_not_retried() {
    let en = failing("vctk", &["en"]);
    let service = service_with(vec![en.clone()], &[("en", "vctk")], None);

    let err = service
        .handle(&SynthesisRequest::new("Hello", "en"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelLoadError);
    assert!(!err.degraded);
    assert_eq!(en.load_count(), 1);
    assert!(err.to_string().contains("vctk"));
}

#[tokio::test]
async fn test_unroutable_language_degrades_to_base() {
    let en = healthy("vctk", &["en"]);
    let service = service_with(vec![en.clone()], &[("en", "vctk")], None);

    let result = service
        .handle(&SynthesisRequest::new("Bonjour", "fr").persona("athena"))
        .await
        .unwrap();
    assert!(result.degraded);
    assert_eq!(result.resolved_language, "en");
    assert_eq!(result.applied_profile.persona, "athena");
}

#[tokio::test]
async fn test_model_unavailable_during_synthesis_falls_back() {
    let te = Arc::new(
        ScriptedBackend::new("telugu")
            .languages(&["te"])
            .fail_synthesis(TtsError::ModelUnavailable("gpu lost".into())),
    );
    let en = healthy("vctk", &["en"]);
    let service = service_with(
        vec![te.clone(), en.clone()],
        &[("te", "telugu"), ("en", "vctk")],
        None,
    );

    let result = service
        .handle(&SynthesisRequest::new("Hello", "te"))
        .await
        .unwrap();
    assert!(result.degraded);
    assert_eq!(te.synth_count(), 1);
    assert_eq!(en.synth_count(), 1);
}

// ── Surfaced failures ───────────────────────────────────────

#[tokio::test]
async fn test_synthesis_failure_is_surfaced_not_retried() {
    let en = Arc::new(
        ScriptedBackend::new("vctk")
            .languages(&["en"])
            .fail_synthesis(TtsError::SynthesisFailed("vocoder crashed".into())),
    );
    let service = service_with(vec![en.clone()], &[("en", "vctk")], None);

    let err = service
        .handle(&SynthesisRequest::new("Hello", "en").persona("thor"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SynthesisFailed);
    assert_eq!(err.backend.as_deref(), Some("vctk"));
    assert_eq!(en.synth_count(), 1);
}

#[tokio::test]
async fn test_unsupported_parameter_surfaces_as_internal() {
    let te = Arc::new(
        ScriptedBackend::new("telugu")
            .languages(&["te"])
            .fail_synthesis(TtsError::UnsupportedParameter("speaker_id".into())),
    );
    let en = healthy("vctk", &["en"]);
    let service = service_with(
        vec![te.clone(), en.clone()],
        &[("te", "telugu"), ("en", "vctk")],
        None,
    );

    let err = service
        .handle(&SynthesisRequest::new("Hello", "te"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(matches!(err.source, TtsError::Internal(_)));
    assert!(!err.degraded, "no fallback for a descriptor bug");
    assert_eq!(en.load_count(), 0);
}

#[tokio::test]
async fn test_orchestrator_timeout() {
    let en = Arc::new(
        ScriptedBackend::new("vctk")
            .languages(&["en"])
            .synth_delay(Duration::from_millis(500)),
    );
    let service = service_with(vec![en], &[("en", "vctk")], None)
        .with_timeout(Some(Duration::from_millis(20)));

    let err = service
        .handle(&SynthesisRequest::new("slow", "en"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.backend.as_deref(), Some("vctk"));
    assert!(err.to_string().contains("vctk"));
}

#[tokio::test]
async fn test_no_backends_is_internal() {
    let service = service_with(Vec::new(), &[], None);
    let err = service
        .handle(&SynthesisRequest::new("Hello", "en"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

// ── Best-effort pitch shift ─────────────────────────────────

#[tokio::test]
async fn test_pitch_shift_failure_returns_original_audio() {
    let accent = Arc::new(
        ScriptedBackend::new("accent")
            .languages(&["en"])
            .returning(mp3_fixture(), AudioFormat::Mp3),
    );
    let service = service_with(vec![accent], &[("en", "accent")], None);

    // odin is pitched down 6 semitones; this MP3 cannot be decoded.
    let result = service
        .handle(&SynthesisRequest::new("Ravens", "en").persona("odin").enhance(true))
        .await
        .unwrap();
    assert_eq!(result.audio_bytes, mp3_fixture());
    assert_eq!(result.pitch_shift_applied, 0);
    assert_eq!(result.mime_type, "audio/mpeg");
}

#[tokio::test]
async fn test_corrupt_wav_pitch_failure_is_swallowed() {
    let mut corrupt = b"RIFF\x24\x00\x00\x00WAVE".to_vec();
    corrupt.extend_from_slice(b"garbage-not-a-fmt-chunk");
    let en = Arc::new(
        ScriptedBackend::new("vctk")
            .languages(&["en"])
            .returning(corrupt.clone(), AudioFormat::Wav),
    );
    let service = service_with(vec![en], &[("en", "vctk")], None);

    let result = service
        .handle(&SynthesisRequest::new("Thunder", "en").persona("zeus").enhance(true))
        .await
        .unwrap();
    assert_eq!(result.audio_bytes, corrupt);
    assert_eq!(result.pitch_shift_applied, 0);
}

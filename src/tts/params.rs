use super::interface::{BackendDescriptor, ModelHandle, SynthesisParams, VoiceProfile, VoiceSelector};

/// Build the parameters for one synthesis call from the resolved profile.
///
/// Only fields the backend advertised support for are populated, so a
/// correct descriptor never leads to an `UnsupportedParameter` failure.
/// `language` is the language actually being synthesized, which differs
/// from the request's language after a fallback.
pub fn build_params(
    descriptor: &BackendDescriptor,
    profile: &VoiceProfile,
    model: &ModelHandle,
    language: &str,
) -> SynthesisParams {
    let speaker = if descriptor.supports_speaker_id {
        resolve_speaker(descriptor, &profile.backend_selector, model)
    } else {
        None
    };

    let language = if descriptor.supports_language_tag {
        match &profile.backend_selector {
            VoiceSelector::LanguageTag(tag) => Some(tag.clone()),
            _ => Some(language.to_string()),
        }
    } else {
        None
    };

    let locale = match &profile.backend_selector {
        VoiceSelector::LocaleTag(tag) if descriptor.supports_locale_accent => Some(tag.clone()),
        _ => None,
    };

    SynthesisParams {
        speaker,
        language,
        locale,
        speed: descriptor.supports_speed.then_some(profile.speed_factor),
        emotion: (!profile.emotion_label.is_empty()).then(|| profile.emotion_label.clone()),
    }
}

fn resolve_speaker(
    descriptor: &BackendDescriptor,
    selector: &VoiceSelector,
    model: &ModelHandle,
) -> Option<String> {
    match selector {
        VoiceSelector::SpeakerId(id) => {
            if model.speakers.is_empty() || model.speakers.iter().any(|s| s == id) {
                Some(id.clone())
            } else {
                // The loaded model does not know this speaker.
                model.default_speaker().map(str::to_string)
            }
        }
        // Multilingual models need an explicit speaker; use the model's own default.
        _ if descriptor.is_multi_speaker && descriptor.supports_language_tag => {
            model.default_speaker().map(str::to_string)
        }
        _ => None,
    }
}

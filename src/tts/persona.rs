//! Persona → voice profile table.
//!
//! Profiles are keyed by `(persona, language)`. Lookup never fails: it walks
//! exact key → `(persona, base language)` → any entry for the persona →
//! the global `default` profile. Unknown personas silently get the default
//! voice. The table is built once and is read-only afterwards.

use super::interface::{Gender, VoiceProfile, VoiceSelector};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

pub const DEFAULT_PERSONA: &str = "default";
pub const BASE_LANGUAGE: &str = "en";

pub struct PersonaProfileTable {
    profiles: HashMap<String, BTreeMap<String, VoiceProfile>>,
    default_profile: VoiceProfile,
    base_language: String,
}

impl PersonaProfileTable {
    /// Build a table from a set of profiles. Later entries override earlier
    /// ones with the same key; entries that fail validation are skipped.
    /// A `default` profile is always present; if none is supplied the
    /// built-in one is used.
    pub fn new(profiles: impl IntoIterator<Item = VoiceProfile>) -> Self {
        Self::with_base_language(profiles, BASE_LANGUAGE)
    }

    pub fn with_base_language(
        profiles: impl IntoIterator<Item = VoiceProfile>,
        base_language: &str,
    ) -> Self {
        let mut table: HashMap<String, BTreeMap<String, VoiceProfile>> = HashMap::new();
        let mut default_profile = None;

        for mut profile in profiles {
            profile.persona = normalize(&profile.persona);
            profile.language = normalize(&profile.language);
            if let Err(e) = profile.validate() {
                warn!(target: "tts", error = %e, "Skipping invalid voice profile");
                continue;
            }

            if profile.persona == DEFAULT_PERSONA {
                default_profile = Some(profile);
                continue;
            }
            table
                .entry(profile.persona.clone())
                .or_default()
                .insert(profile.language.clone(), profile);
        }

        Self {
            profiles: table,
            default_profile: default_profile.unwrap_or_else(builtin_default),
            base_language: normalize(base_language),
        }
    }

    /// The built-in persona set merged with `overrides`.
    pub fn builtin_with(overrides: impl IntoIterator<Item = VoiceProfile>) -> Self {
        Self::new(builtin_profiles().into_iter().chain(overrides))
    }

    pub fn resolve(&self, persona: &str, language: &str) -> &VoiceProfile {
        let persona = normalize(persona);
        let language = normalize(language);

        let Some(by_language) = self.profiles.get(&persona) else {
            return &self.default_profile;
        };

        by_language
            .get(&language)
            .or_else(|| by_language.get(&self.base_language))
            .or_else(|| by_language.values().next())
            .unwrap_or(&self.default_profile)
    }

    pub fn default_profile(&self) -> &VoiceProfile {
        &self.default_profile
    }

    pub fn contains_persona(&self, persona: &str) -> bool {
        self.profiles.contains_key(&normalize(persona))
    }

    /// Sorted persona names, excluding `default`.
    pub fn personas(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Every profile in the table, default last, in a stable order.
    pub fn list(&self) -> Vec<&VoiceProfile> {
        let mut out = Vec::new();
        for persona in self.personas() {
            out.extend(self.profiles[persona].values());
        }
        out.push(&self.default_profile);
        out
    }

    pub fn len(&self) -> usize {
        self.profiles.values().map(BTreeMap::len).sum::<usize>() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for PersonaProfileTable {
    fn default() -> Self {
        Self::new(builtin_profiles())
    }
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

// ── Built-in personas ──────────────────────────────────

// (persona, language, speed, pitch semitones, gender, speaker, emotion, description)
type Entry = (
    &'static str,
    &'static str,
    f32,
    i32,
    Gender,
    &'static str,
    &'static str,
    &'static str,
);

use super::interface::Gender::{Female, Male};

// Speaker ids are VCTK corpus speakers; the en entry of each persona is the
// canonical voice and language variants reuse its speaker.
const BUILTIN: &[Entry] = &[
    // Hindu deities
    ("krishna", "en", 0.90, -2, Male, "p259", "calm", "Divine teacher, calm and wise"),
    ("krishna", "hi", 0.88, -2, Male, "p259", "calm", "Krishna in Hindi"),
    ("krishna", "te", 0.90, -2, Male, "p259", "calm", "Krishna in Telugu"),
    ("shiva", "en", 0.82, -5, Male, "p260", "deep", "Destroyer and transformer, deep and powerful"),
    ("shiva", "hi", 0.80, -5, Male, "p260", "deep", "Shiva in Hindi"),
    ("shiva", "te", 0.82, -5, Male, "p260", "deep", "Shiva in Telugu"),
    ("rama", "en", 0.88, -2, Male, "p270", "noble", "Righteous king, noble and steady"),
    ("rama", "te", 0.86, -2, Male, "p270", "noble", "Rama in Telugu"),
    ("hanuman", "en", 1.12, 0, Male, "p274", "energetic", "Devoted servant, bold and energetic"),
    ("hanuman", "te", 1.15, 0, Male, "p274", "energetic", "Hanuman in Telugu"),
    ("ganesha", "en", 0.92, -1, Male, "p278", "wise", "Remover of obstacles, wise and gentle"),
    ("vishnu", "en", 0.88, -3, Male, "p279", "divine", "Preserver, calm divine authority"),
    ("ayyappa", "en", 0.90, -1, Male, "p281", "calm", "Calm and composed"),
    ("lakshmi", "en", 0.93, 3, Female, "p229", "gentle", "Goddess of prosperity, gentle and graceful"),
    ("saraswati", "en", 0.90, 3, Female, "p233", "wise", "Goddess of knowledge, wise and artistic"),
    ("parvati", "en", 0.93, 2, Female, "p236", "nurturing", "Nurturing and powerful"),
    ("durga", "en", 0.96, 2, Female, "p240", "fierce", "Fierce warrior goddess"),
    // Greek deities
    ("zeus", "en", 0.85, -4, Male, "p263", "authoritative", "King of gods, commanding"),
    ("zeus", "hi", 0.84, -4, Male, "p263", "authoritative", "Zeus in Hindi"),
    ("zeus", "te", 0.85, -4, Male, "p263", "authoritative", "Zeus in Telugu"),
    ("zeus", "ta", 0.85, -4, Male, "p263", "authoritative", "Zeus in Tamil"),
    ("apollo", "en", 0.95, -1, Male, "p272", "bright", "God of sun and music, bright and clear"),
    ("apollo", "hi", 0.93, -1, Male, "p272", "bright", "Apollo in Hindi"),
    ("apollo", "te", 0.95, -1, Male, "p272", "bright", "Apollo in Telugu"),
    ("athena", "en", 0.92, 2, Female, "p264", "wise", "Goddess of wisdom, strategic"),
    ("poseidon", "en", 0.84, -4, Male, "p271", "powerful", "God of the sea, deep and powerful"),
    ("hera", "en", 0.91, 2, Female, "p276", "regal", "Queen of gods, regal and dignified"),
    // Norse deities
    ("odin", "en", 0.78, -6, Male, "p251", "ancient", "All-father, ancient and very deep"),
    ("odin", "hi", 0.78, -6, Male, "p251", "ancient", "Odin in Hindi"),
    ("odin", "te", 0.76, -6, Male, "p251", "ancient", "Odin in Telugu"),
    ("odin", "ta", 0.77, -6, Male, "p251", "ancient", "Odin in Tamil"),
    ("thor", "en", 1.10, 0, Male, "p245", "strong", "God of thunder, bold warrior"),
    ("thor", "hi", 1.10, 0, Male, "p245", "strong", "Thor in Hindi"),
    ("thor", "te", 1.12, 0, Male, "p245", "strong", "Thor in Telugu"),
    ("thor", "ta", 1.11, 0, Male, "p245", "strong", "Thor in Tamil"),
    ("loki", "en", 1.15, 1, Male, "p273", "mischievous", "Trickster, quick and playful"),
    ("loki", "hi", 1.15, 1, Male, "p273", "mischievous", "Loki in Hindi"),
    ("loki", "te", 1.18, 1, Male, "p273", "mischievous", "Loki in Telugu"),
    ("loki", "ta", 1.16, 1, Male, "p273", "mischievous", "Loki in Tamil"),
    ("freyja", "en", 0.91, 2, Female, "p268", "graceful", "Goddess of love and war, elegant"),
    ("freyja", "hi", 0.91, 2, Female, "p268", "graceful", "Freyja in Hindi"),
    ("freyja", "te", 0.89, 2, Female, "p268", "graceful", "Freyja in Telugu"),
    ("freyja", "ta", 0.90, 2, Female, "p268", "graceful", "Freyja in Tamil"),
    // Other
    ("jesus", "en", 0.86, -2, Male, "p258", "compassionate", "Teacher of love, gentle"),
    ("jesus", "te", 0.85, -2, Male, "p258", "compassionate", "Jesus in Telugu"),
];

pub fn builtin_default() -> VoiceProfile {
    VoiceProfile {
        persona: DEFAULT_PERSONA.to_string(),
        language: BASE_LANGUAGE.to_string(),
        speed_factor: 1.0,
        pitch_shift_semitones: 0,
        gender: Gender::Neutral,
        backend_selector: VoiceSelector::None,
        emotion_label: "neutral".to_string(),
        description: "Default voice".to_string(),
    }
}

pub fn builtin_profiles() -> Vec<VoiceProfile> {
    BUILTIN
        .iter()
        .map(
            |&(persona, language, speed, pitch, gender, speaker, emotion, description)| {
                VoiceProfile {
                    persona: persona.to_string(),
                    language: language.to_string(),
                    speed_factor: speed,
                    pitch_shift_semitones: pitch,
                    gender,
                    backend_selector: VoiceSelector::SpeakerId(speaker.to_string()),
                    emotion_label: emotion.to_string(),
                    description: description.to_string(),
                }
            },
        )
        .chain(std::iter::once(builtin_default()))
        .collect()
}

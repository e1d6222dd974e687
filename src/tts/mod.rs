pub mod config;
pub mod google_accent;
pub mod interface;
pub mod manager;
pub mod model_cache;
pub mod model_server;
pub mod mp3;
pub mod params;
pub mod persona;
pub mod piper;
pub mod pitch;
pub mod queue;
pub mod router;

#[cfg(test)]
mod tests;

pub use config::{load_config, save_config, TtsSystemConfig};
pub use interface::{
    AudioFormat, BackendDescriptor, Gender, ModelHandle, SynthesisParams, SynthesizedAudio,
    TtsBackend, TtsError, VoiceProfile, VoiceSelector,
};
pub use manager::{
    ErrorKind, HealthReport, SynthesisError, SynthesisRequest, SynthesisResult, TtsService,
    VoiceListing,
};
pub use model_cache::{ModelCache, ModelKey};
pub use persona::PersonaProfileTable;
pub use pitch::PitchShifter;

use crate::tts::interface::{
    AudioFormat, BackendDescriptor, ModelHandle, SynthesisParams, SynthesizedAudio, TtsBackend,
    TtsError,
};
use crate::tts::persona::PersonaProfileTable;
use crate::tts::router::BackendRouter;
use crate::tts::TtsService;
use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Audio fixtures ──────────────────────────────────────────

/// A mono 16-bit sine WAV of `frames` samples at `rate`.
pub fn wav_fixture(frames: usize, rate: u32) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / rate as f32;
            let v = (t * 220.0 * 2.0 * std::f32::consts::PI).sin() * 0.4;
            writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Frame count of a WAV buffer.
pub fn wav_frames(bytes: &[u8]) -> u32 {
    hound::WavReader::new(Cursor::new(bytes)).unwrap().duration()
}

/// A mono sine MP3 of `frames` samples at `rate`.
pub fn mp3_sine_fixture(frames: usize, rate: u32) -> Vec<u8> {
    let tone: Vec<f32> = (0..frames)
        .map(|i| (i as f32 / rate as f32 * 220.0 * 2.0 * std::f32::consts::PI).sin() * 0.4)
        .collect();
    crate::tts::mp3::encode(rate, &[tone]).unwrap()
}

/// Bytes that sniff as MP3 but hold no decodable frames.
pub fn mp3_fixture() -> Vec<u8> {
    let mut bytes = b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec();
    bytes.resize(256, 0x55);
    bytes
}

// ── Scripted backend ────────────────────────────────────────

/// In-memory backend with scripted outcomes and call counters.
pub struct ScriptedBackend {
    descriptor: BackendDescriptor,
    speakers: Vec<String>,
    load_failure: Option<TtsError>,
    synth_failure: Option<TtsError>,
    audio: Vec<u8>,
    format: AudioFormat,
    load_delay: Duration,
    synth_delay: Duration,
    pub loads: AtomicUsize,
    pub syntheses: AtomicUsize,
    pub last_params: Mutex<Option<SynthesisParams>>,
}

#[allow(dead_code)]
impl ScriptedBackend {
    pub fn new(id: &str) -> Self {
        Self {
            descriptor: BackendDescriptor {
                id: id.to_string(),
                ..Default::default()
            },
            speakers: Vec::new(),
            load_failure: None,
            synth_failure: None,
            audio: wav_fixture(2048, 16000),
            format: AudioFormat::Wav,
            load_delay: Duration::ZERO,
            synth_delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
            syntheses: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        }
    }

    pub fn languages(mut self, languages: &[&str]) -> Self {
        self.descriptor.languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn descriptor_with(mut self, edit: impl FnOnce(&mut BackendDescriptor)) -> Self {
        edit(&mut self.descriptor);
        self
    }

    /// Multi-speaker by id, with `speakers` enumerated by every loaded model.
    pub fn speakers(mut self, speakers: &[&str]) -> Self {
        self.descriptor.supports_speaker_id = true;
        self.descriptor.is_multi_speaker = true;
        self.speakers = speakers.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn fail_loads(mut self, error: TtsError) -> Self {
        self.load_failure = Some(error);
        self
    }

    pub fn fail_synthesis(mut self, error: TtsError) -> Self {
        self.synth_failure = Some(error);
        self
    }

    pub fn returning(mut self, audio: Vec<u8>, format: AudioFormat) -> Self {
        self.audio = audio;
        self.format = format;
        self
    }

    pub fn load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn synth_delay(mut self, delay: Duration) -> Self {
        self.synth_delay = delay;
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn synth_count(&self) -> usize {
        self.syntheses.load(Ordering::SeqCst)
    }

    pub fn params(&self) -> Option<SynthesisParams> {
        self.last_params.lock().unwrap().clone()
    }
}

#[async_trait]
impl TtsBackend for ScriptedBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn is_available(&self) -> bool {
        self.load_failure.is_none()
    }

    async fn load_model(&self, language: &str) -> Result<ModelHandle, TtsError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if let Some(err) = &self.load_failure {
            return Err(err.clone());
        }
        Ok(ModelHandle::new(
            self.descriptor.id.clone(),
            language,
            format!("{}-{}", self.descriptor.id, language),
            self.speakers.clone(),
            Arc::new(()),
        ))
    }

    async fn synthesize(
        &self,
        _model: &ModelHandle,
        _text: &str,
        params: &SynthesisParams,
    ) -> Result<SynthesizedAudio, TtsError> {
        self.syntheses.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());
        if !self.synth_delay.is_zero() {
            tokio::time::sleep(self.synth_delay).await;
        }
        if let Some(err) = &self.synth_failure {
            return Err(err.clone());
        }
        Ok(SynthesizedAudio {
            bytes: self.audio.clone(),
            format: self.format,
        })
    }
}

// ── Service setup ───────────────────────────────────────────

/// Build a service over the built-in personas with the given backends and routes.
pub fn service_with(
    backends: Vec<Arc<ScriptedBackend>>,
    routes: &[(&str, &str)],
    default_backend: Option<&str>,
) -> TtsService {
    let mut router = BackendRouter::new(
        routes
            .iter()
            .map(|(l, b)| (l.to_string(), b.to_string()))
            .collect(),
        default_backend.map(str::to_string),
    );
    for backend in backends {
        router.register(backend).unwrap();
    }
    TtsService::new(PersonaProfileTable::default(), router)
}

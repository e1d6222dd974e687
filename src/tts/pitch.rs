//! Semitone pitch shifting for WAV and MP3 output.
//!
//! The shift is done the cheap way: the samples are reinterpreted at
//! `rate * 2^(s/12)` and then resampled back to the original rate. Pitch
//! moves by `s` semitones and duration scales by `2^(-s/12)`, so shifting
//! by `s` and then `-s` gives back the original length. MP3 input is
//! decoded, shifted and re-encoded as MP3.

use super::interface::{AudioFormat, TtsError, MAX_PITCH_SHIFT_SEMITONES};
use super::mp3;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{FftFixedIn, Resampler};
use std::io::Cursor;

/// Below this many frames the FFT resampler is not worth setting up.
const MIN_RESAMPLER_FRAMES: usize = 64;
const CHUNK_SIZE: usize = 1024;
/// Shifted rates are snapped to this grid so the FFT resampler gets a
/// usable common divisor with the original rate.
const RATE_STEP: u32 = 50;

pub struct PitchShifter;

impl PitchShifter {
    /// Shift `audio` by `semitones`, keeping its container. Zero returns the
    /// input unchanged; shifts beyond two octaves are refused.
    pub fn shift(audio: &[u8], semitones: i32) -> Result<Vec<u8>, TtsError> {
        if semitones == 0 {
            return Ok(audio.to_vec());
        }
        if semitones.unsigned_abs() > MAX_PITCH_SHIFT_SEMITONES.unsigned_abs() {
            return Err(TtsError::PostProcessingFailed(format!(
                "pitch shift of {} semitones is outside ±{}",
                semitones, MAX_PITCH_SHIFT_SEMITONES
            )));
        }

        match AudioFormat::sniff(audio) {
            Some(AudioFormat::Wav) => {
                let (spec, channels) = decode(audio)?;
                let shifted = shift_channels(&channels, spec.sample_rate, semitones)?;
                encode(spec, &shifted)
            }
            Some(AudioFormat::Mp3) => {
                let clip = mp3::decode(audio)?;
                let shifted = shift_channels(&clip.channels, clip.sample_rate, semitones)?;
                mp3::encode(clip.sample_rate, &shifted)
            }
            None => Err(TtsError::PostProcessingFailed(
                "pitch shift needs WAV or MP3 input".into(),
            )),
        }
    }
}

fn shift_channels(
    channels: &[Vec<f32>],
    rate: u32,
    semitones: i32,
) -> Result<Vec<Vec<f32>>, TtsError> {
    let source_rate = shifted_rate(rate, semitones);
    channels
        .iter()
        .map(|samples| resample(samples, source_rate, rate))
        .collect()
}

fn shifted_rate(rate: u32, semitones: i32) -> u32 {
    let exact = rate as f64 * 2f64.powf(semitones as f64 / 12.0);
    let step = if rate % RATE_STEP == 0 { RATE_STEP } else { 1 };
    let snapped = (exact / step as f64).round() as u32 * step;
    snapped.max(1)
}

fn post_err(e: impl std::fmt::Display) -> TtsError {
    TtsError::PostProcessingFailed(e.to_string())
}

/// Decode into one normalized `f32` buffer per channel.
fn decode(audio: &[u8]) -> Result<(WavSpec, Vec<Vec<f32>>), TtsError> {
    let mut reader = WavReader::new(Cursor::new(audio)).map_err(post_err)?;
    let spec = reader.spec();
    let channel_count = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(post_err)?,
        SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(post_err)?
        }
    };

    let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (ch, sample) in frame.iter().enumerate() {
            channels[ch].push(*sample);
        }
    }
    Ok((spec, channels))
}

fn encode(spec: WavSpec, channels: &[Vec<f32>]) -> Result<Vec<u8>, TtsError> {
    let frames = channels.first().map(Vec::len).unwrap_or(0);
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).map_err(post_err)?;
        match spec.sample_format {
            SampleFormat::Float => {
                for i in 0..frames {
                    for channel in channels {
                        writer.write_sample(channel[i]).map_err(post_err)?;
                    }
                }
            }
            SampleFormat::Int => {
                let scale = int_scale(spec.bits_per_sample);
                for i in 0..frames {
                    for channel in channels {
                        let v = (channel[i] * scale).round().clamp(-scale, scale - 1.0);
                        writer.write_sample(v as i32).map_err(post_err)?;
                    }
                }
            }
        }
        writer.finalize().map_err(post_err)?;
    }
    Ok(cursor.into_inner())
}

fn int_scale(bits: u16) -> f32 {
    (1u64 << (bits.clamp(1, 32) - 1)) as f32
}

/// Resample one channel from `from_rate` to `to_rate`, trimmed to the
/// exact expected length.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, TtsError> {
    let expected =
        (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    if samples.len() < MIN_RESAMPLER_FRAMES {
        return Ok(resample_linear(samples, expected));
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_SIZE,
        2,
        1,
    )
    .map_err(post_err)?;

    let mut output = Vec::with_capacity(expected + CHUNK_SIZE);
    let mut pos = 0;
    // Keep feeding silence past the end until the resampler's delay is flushed.
    let mut flush_rounds = 0;
    while output.len() < expected && flush_rounds < 8 {
        let frames_needed = resampler.input_frames_next();
        let end = (pos + frames_needed).min(samples.len());

        let mut input_chunk = samples[pos..end].to_vec();
        input_chunk.resize(frames_needed, 0.0);
        if pos == samples.len() {
            flush_rounds += 1;
        }

        let input = vec![input_chunk];
        let resampled = resampler.process(&input, None).map_err(post_err)?;
        if let Some(chunk) = resampled.into_iter().next() {
            output.extend(chunk);
        }
        pos = end;
    }

    output.resize(expected, 0.0);
    Ok(output)
}

fn resample_linear(input: &[f32], output_len: usize) -> Vec<f32> {
    if input.is_empty() || output_len == 0 {
        return vec![0.0; output_len];
    }
    let step = input.len() as f64 / output_len as f64;
    (0..output_len)
        .map(|i| {
            let src = i as f64 * step;
            let lo = (src.floor() as usize).min(input.len() - 1);
            let hi = (lo + 1).min(input.len() - 1);
            let frac = (src - lo as f64) as f32;
            input[lo] * (1.0 - frac) + input[hi] * frac
        })
        .collect()
}

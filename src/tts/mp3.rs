//! MP3 decode and encode for post-processing.
//!
//! Decoding goes through symphonia, encoding through LAME. Both sides work
//! on one normalized `f32` buffer per channel, the same layout the WAV path
//! in `pitch` uses.

use super::interface::TtsError;
use mp3lame_encoder::{Bitrate, Builder, DualPcm, FlushNoGap, MonoPcm, Quality};
use std::io::{Cursor, ErrorKind};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// LAME needs this much headroom to flush its last frames.
const FLUSH_HEADROOM: usize = 7200;

/// Decoded MP3 audio.
#[derive(Debug, Clone)]
pub struct Mp3Clip {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

fn codec_err(e: impl std::fmt::Display) -> TtsError {
    TtsError::PostProcessingFailed(format!("mp3: {}", e))
}

/// Decode an MP3 stream into per-channel samples.
pub fn decode(bytes: &[u8]) -> Result<Mp3Clip, TtsError> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(codec_err)?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| codec_err("no audio track"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(codec_err)?;

    let mut channels: Vec<Vec<f32>> = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(codec_err(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt frame is dropped; the rest of the stream still plays.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(codec_err(e)),
        };

        let spec = *decoded.spec();
        let channel_count = spec.channels.count().max(1);
        sample_rate = spec.rate;
        if channels.is_empty() {
            channels = vec![Vec::new(); channel_count];
        }

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        for frame in buffer.samples().chunks_exact(channel_count) {
            for (ch, sample) in frame.iter().enumerate().take(channels.len()) {
                channels[ch].push(*sample);
            }
        }
    }

    if channels.first().map_or(true, Vec::is_empty) || sample_rate == 0 {
        return Err(codec_err("stream has no decodable frames"));
    }
    Ok(Mp3Clip {
        sample_rate,
        channels,
    })
}

fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s * 32768.0).round().clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Encode per-channel samples as a mono or stereo MP3 stream.
pub fn encode(sample_rate: u32, channels: &[Vec<f32>]) -> Result<Vec<u8>, TtsError> {
    if channels.is_empty() || channels.len() > 2 {
        return Err(codec_err(format!(
            "cannot encode {} channels",
            channels.len()
        )));
    }

    let mut builder = Builder::new().ok_or_else(|| codec_err("LAME is unavailable"))?;
    builder
        .set_num_channels(channels.len() as u8)
        .map_err(|e| codec_err(format!("{:?}", e)))?;
    builder
        .set_sample_rate(sample_rate)
        .map_err(|e| codec_err(format!("{:?}", e)))?;
    builder
        .set_brate(Bitrate::Kbps64)
        .map_err(|e| codec_err(format!("{:?}", e)))?;
    builder
        .set_quality(Quality::Best)
        .map_err(|e| codec_err(format!("{:?}", e)))?;
    let mut encoder = builder
        .build()
        .map_err(|e| codec_err(format!("{:?}", e)))?;

    let frames = channels[0].len();
    let mut out = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(frames));
    match channels {
        [left, right] => {
            let left = to_i16(left);
            let right = to_i16(right);
            encoder
                .encode_to_vec(
                    DualPcm {
                        left: &left,
                        right: &right,
                    },
                    &mut out,
                )
                .map_err(|e| codec_err(format!("{:?}", e)))?;
        }
        _ => {
            let pcm = to_i16(&channels[0]);
            encoder
                .encode_to_vec(MonoPcm(&pcm), &mut out)
                .map_err(|e| codec_err(format!("{:?}", e)))?;
        }
    }

    out.reserve(FLUSH_HEADROOM);
    encoder
        .flush_to_vec::<FlushNoGap>(&mut out)
        .map_err(|e| codec_err(format!("{:?}", e)))?;
    Ok(out)
}

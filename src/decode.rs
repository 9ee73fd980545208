//! Audio decoding using symphonia, mono downmix and rubato resampling.
//!
//! Supports MP3, FLAC, OGG, WAV and AAC/M4A.

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

pub use crate::error::DecodeError;
use crate::store::Waveform;

/// Decoded interleaved samples.
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    /// Collapse to mono by averaging channels.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect()
    }

    /// Mono waveform at `target_rate`.
    pub fn into_canonical(self, target_rate: u32) -> Result<Waveform, DecodeError> {
        let mono = self.to_mono();
        let samples = resample(&mono, self.sample_rate, target_rate)?;
        Ok(Waveform::new(samples, target_rate))
    }
}

/// Resample mono audio using sinc interpolation.
pub fn resample(mono: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, DecodeError> {
    if from_rate == to_rate || mono.is_empty() {
        return Ok(mono.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let chunk_size = 1024;
    // max_resample_ratio_relative must cover the actual ratio in both directions
    let max_ratio = ratio.max(1.0 / ratio) * 1.1;

    let mut resampler = SincFixedIn::<f32>::new(ratio, max_ratio, params, chunk_size, 1)?;

    let mut output = Vec::with_capacity((mono.len() as f64 * ratio) as usize + chunk_size);
    for chunk in mono.chunks(chunk_size) {
        let mut input = vec![chunk.to_vec()];
        input[0].resize(chunk_size, 0.0);
        let resampled = resampler.process(&input, None)?;
        output.extend_from_slice(&resampled[0]);
    }

    let expected_len = (mono.len() as f64 * ratio).round() as usize;
    output.resize(expected_len, 0.0);
    Ok(output)
}

/// Decode an audio file, probing by its extension.
pub fn load_audio_file(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let file = File::open(path).map_err(SymphoniaError::IoError)?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    decode_stream(MediaSourceStream::new(Box::new(file), Default::default()), &hint)
}

fn decode_stream(mss: MediaSourceStream, hint: &Hint) -> Result<DecodedAudio, DecodeError> {
    let probed = symphonia::default::get_probe().format(
        hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::UnsupportedCodec)?;
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let track_id = track.id;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        append_samples(&decoded, &mut samples, channels)?;
    }

    if samples.is_empty() {
        return Err(DecodeError::NoAudioTrack);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

fn append_samples(
    buffer: &AudioBufferRef,
    output: &mut Vec<f32>,
    channels: usize,
) -> Result<(), DecodeError> {
    fn interleave<S: Copy>(
        buf: &symphonia::core::audio::AudioBuffer<S>,
        output: &mut Vec<f32>,
        channels: usize,
        convert: impl Fn(S) -> f32,
    ) where
        S: symphonia::core::sample::Sample,
    {
        for frame in 0..buf.frames() {
            for ch in 0..channels {
                output.push(convert(buf.chan(ch)[frame]));
            }
        }
    }

    match buffer {
        AudioBufferRef::F32(buf) => interleave(&**buf, output, channels, |s| s),
        AudioBufferRef::F64(buf) => interleave(&**buf, output, channels, |s| s as f32),
        AudioBufferRef::S16(buf) => interleave(&**buf, output, channels, |s| s as f32 / 32768.0),
        AudioBufferRef::S24(buf) => {
            interleave(&**buf, output, channels, |s| s.inner() as f32 / 8388608.0)
        }
        AudioBufferRef::S32(buf) => {
            interleave(&**buf, output, channels, |s| s as f32 / 2147483648.0)
        }
        AudioBufferRef::U8(buf) => {
            interleave(&**buf, output, channels, |s| (s as f32 - 128.0) / 128.0)
        }
        _ => return Err(DecodeError::UnsupportedCodec),
    }
    Ok(())
}

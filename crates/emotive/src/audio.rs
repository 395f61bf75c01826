//! Audio decoding and resampling.
//!
//! - mono f32 samples
//! - linear resampling to the extractor rate
//! - minimal WAV parser (16-bit PCM) as the fast path, symphonia for everything else

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Linearly resample `input` from `src_hz` to `dst_hz`.
///
/// Both rates must be non-zero.
pub fn resample_linear_mono_f32(
    input: &[f32],
    src_hz: u32,
    dst_hz: u32,
) -> Result<Vec<f32>, AudioError> {
    if src_hz == 0 || dst_hz == 0 {
        return Err(AudioError::InvalidRate { src_hz, dst_hz });
    }
    if src_hz == dst_hz || input.is_empty() {
        return Ok(input.to_vec());
    }

    let new_n = (input.len() as u64)
        .checked_mul(u64::from(dst_hz))
        .map(|n| n / u64::from(src_hz))
        .and_then(|n| usize::try_from(n).ok())
        .ok_or(AudioError::ResampleOverflow)?;
    let mut out = vec![0.0f32; new_n];

    for (i, y) in out.iter_mut().enumerate() {
        let src_pos = (i as f64) * f64::from(src_hz) / f64::from(dst_hz);
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;

        let a = input.get(idx).copied().unwrap_or(0.0);
        let b = input.get(idx + 1).copied().unwrap_or(a);
        *y = a * (1.0 - frac) + b * frac;
    }

    Ok(out)
}

/// Average interleaved frames down to one channel.
#[must_use]
pub fn downmix_interleaved(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub samples_mono: Vec<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("not a valid WAV file")]
    InvalidHeader,
    #[error("unsupported WAV format (need 16-bit PCM)")]
    UnsupportedFormat,
    #[error("malformed WAV chunks")]
    MalformedChunks,
    #[error("cannot resample {src_hz} Hz to {dst_hz} Hz")]
    InvalidRate { src_hz: u32, dst_hz: u32 },
    #[error("resampled length overflowed usize")]
    ResampleOverflow,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
}

fn read_u16_le(p: &[u8]) -> u16 {
    u16::from_le_bytes([p[0], p[1]])
}

fn read_u32_le(p: &[u8]) -> u32 {
    u32::from_le_bytes([p[0], p[1], p[2], p[3]])
}

#[must_use]
pub fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Parse WAV bytes and return mono `f32` samples at the file's sample rate.
///
/// Supports: PCM (`audio_format=1`), 16-bit, >=1 channels.
pub fn parse_wav_bytes(data: &[u8]) -> Result<DecodedAudio, AudioError> {
    if data.len() < 44 || !is_wav(data) {
        return Err(AudioError::InvalidHeader);
    }

    let mut channels: u16 = 0;
    let mut sample_rate_hz: u32 = 0;
    let mut bits_per_sample: u16 = 0;
    let mut audio_format: u16 = 0;

    let mut pcm_data: Option<&[u8]> = None;

    let mut p = 12usize;
    while p + 8 <= data.len() {
        let chunk_id = &data[p..p + 4];
        let chunk_size = read_u32_le(&data[p + 4..p + 8]) as usize;
        let chunk_data_start = p + 8;
        let chunk_data_end = chunk_data_start.saturating_add(chunk_size);
        if chunk_data_end > data.len() {
            break;
        }

        if chunk_id == b"fmt " && chunk_size >= 16 {
            audio_format = read_u16_le(&data[chunk_data_start..chunk_data_start + 2]);
            channels = read_u16_le(&data[chunk_data_start + 2..chunk_data_start + 4]);
            sample_rate_hz = read_u32_le(&data[chunk_data_start + 4..chunk_data_start + 8]);
            bits_per_sample = read_u16_le(&data[chunk_data_start + 14..chunk_data_start + 16]);
        } else if chunk_id == b"data" {
            pcm_data = Some(&data[chunk_data_start..chunk_data_end]);
        }

        p = chunk_data_end;
        if chunk_size & 1 == 1 {
            p = p.saturating_add(1);
        }
    }

    let Some(pcm_data) = pcm_data else {
        return Err(AudioError::MalformedChunks);
    };

    if sample_rate_hz == 0 || channels == 0 {
        return Err(AudioError::InvalidHeader);
    }
    if audio_format != 1 || bits_per_sample != 16 {
        return Err(AudioError::UnsupportedFormat);
    }

    let interleaved: Vec<f32> = pcm_data
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect();
    let samples_mono = downmix_interleaved(&interleaved, usize::from(channels));

    Ok(DecodedAudio {
        sample_rate_hz,
        channels,
        samples_mono,
    })
}

/// Decode any container symphonia knows about (mp3, flac, ogg, ...).
pub fn decode_with_symphonia(path: &Path) -> Result<DecodedAudio, AudioError> {
    let decode_err = |reason: String| AudioError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|source| AudioError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_err(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_err("no audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate_hz = track
        .codec_params
        .sample_rate
        .filter(|&hz| hz > 0)
        .ok_or_else(|| decode_err("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(e.to_string()))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut channels = track
        .codec_params
        .channels
        .map_or(1, |c| c.count() as u16);
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(decode_err(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| decode_err(e.to_string()))?;

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            channels = spec.channels.count() as u16;
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            interleaved.extend_from_slice(buf.samples());
        }
    }

    Ok(DecodedAudio {
        sample_rate_hz,
        channels,
        samples_mono: downmix_interleaved(&interleaved, usize::from(channels)),
    })
}

/// Decode a file to mono samples at its native rate.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, AudioError> {
    let bytes = std::fs::read(path).map_err(|source| AudioError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if is_wav(&bytes) {
        match parse_wav_bytes(&bytes) {
            Ok(wav) => return Ok(wav),
            // Float / 24-bit WAV goes through symphonia.
            Err(AudioError::UnsupportedFormat) => {}
            Err(e) => return Err(e),
        }
    }
    decode_with_symphonia(path)
}

/// Decode + resample primitive used by the feature cache.
pub trait SpeechLoader {
    fn load(&self, path: &Path, target_hz: u32) -> Result<Vec<f32>, AudioError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileSpeechLoader;

impl SpeechLoader for FileSpeechLoader {
    fn load(&self, path: &Path, target_hz: u32) -> Result<Vec<f32>, AudioError> {
        let audio = decode_file(path)?;
        resample_linear_mono_f32(&audio.samples_mono, audio.sample_rate_hz, target_hz)
    }
}

#[cfg(test)]
pub(crate) fn wav_bytes_i16(sample_rate_hz: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut wav = Vec::<u8>::new();
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36u32 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&(16u32).to_le_bytes());
    wav.extend_from_slice(&(1u16).to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate_hz.to_le_bytes());
    wav.extend_from_slice(&(sample_rate_hz * u32::from(channels) * 2).to_le_bytes());
    wav.extend_from_slice(&(channels * 2).to_le_bytes());
    wav.extend_from_slice(&(16u16).to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        wav.extend_from_slice(&s.to_le_bytes());
    }
    wav
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_linear_identity() {
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let y = resample_linear_mono_f32(&x, 16_000, 16_000).expect("resample");
        assert_eq!(x, y);
    }

    #[test]
    fn resample_linear_length() {
        let x = vec![0.0f32; 16_000];
        let y = resample_linear_mono_f32(&x, 48_000, 16_000).expect("resample");
        assert_eq!(y.len(), 5333); // floor(16000*16000/48000)

        let up = resample_linear_mono_f32(&[0.0, 1.0], 8_000, 16_000).expect("resample");
        assert_eq!(up.len(), 4);
        assert!((up[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn resample_rejects_zero_rates() {
        assert!(matches!(
            resample_linear_mono_f32(&[1.0, 2.0], 0, 16_000),
            Err(AudioError::InvalidRate { src_hz: 0, .. })
        ));
        assert!(matches!(
            resample_linear_mono_f32(&[], 16_000, 0),
            Err(AudioError::InvalidRate { dst_hz: 0, .. })
        ));
    }

    #[test]
    fn wav_with_zero_rate_or_channels_is_rejected() {
        let zero_rate = wav_bytes_i16(0, 1, &[1, 2, 3, 4]);
        assert!(matches!(
            parse_wav_bytes(&zero_rate),
            Err(AudioError::InvalidHeader)
        ));
        let zero_channels = wav_bytes_i16(16_000, 0, &[1, 2]);
        assert!(matches!(
            parse_wav_bytes(&zero_channels),
            Err(AudioError::InvalidHeader)
        ));
    }

    #[test]
    fn wav_parse_smoke() {
        let wav = wav_bytes_i16(16_000, 1, &[0]);
        let parsed = parse_wav_bytes(&wav).expect("parse wav");
        assert_eq!(parsed.sample_rate_hz, 16_000);
        assert_eq!(parsed.channels, 1);
        assert_eq!(parsed.samples_mono.len(), 1);
        assert!((parsed.samples_mono[0]).abs() < 1e-6);
    }

    #[test]
    fn wav_stereo_is_downmixed() {
        let wav = wav_bytes_i16(8_000, 2, &[16_384, 0, -16_384, -16_384]);
        let parsed = parse_wav_bytes(&wav).expect("parse wav");
        assert_eq!(parsed.channels, 2);
        assert_eq!(parsed.samples_mono.len(), 2);
        assert!((parsed.samples_mono[0] - 0.25).abs() < 1e-6);
        assert!((parsed.samples_mono[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn loader_resamples_wav_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.wav");
        std::fs::write(&path, wav_bytes_i16(8_000, 1, &[0; 800])).expect("write wav");

        let samples = FileSpeechLoader.load(&path, 16_000).expect("load");
        assert_eq!(samples.len(), 1_600);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = FileSpeechLoader
            .load(Path::new("/definitely/not/here.wav"), 16_000)
            .expect_err("missing file");
        assert!(matches!(err, AudioError::Read { .. }));
    }
}

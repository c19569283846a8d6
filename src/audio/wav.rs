//! WAV container handling: duration probing, chunk layout, decode/encode.

use crate::error::{PipelineError, Result};
use std::io::Cursor;

/// Format parameters read from a `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

/// Borrowed view of the two chunks that matter in a WAV buffer.
#[derive(Debug, Clone, Copy)]
pub struct WavLayout<'a> {
    pub format: WavFormat,
    /// Raw body of the `fmt ` chunk, used to prove two clips are identical in format.
    pub fmt_body: &'a [u8],
    /// Sample payload of the `data` chunk.
    pub data: &'a [u8],
}

impl WavLayout<'_> {
    /// Bytes per frame across all channels.
    pub fn block_align(&self) -> usize {
        usize::from(self.format.channels) * usize::from(self.format.bits_per_sample).div_ceil(8)
    }

    /// True when the payload holds no trailing partial frame.
    pub fn has_whole_frames(&self) -> bool {
        let align = self.block_align();
        align > 0 && self.data.len() % align == 0
    }
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    let bytes = buf.get(at..at + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Walk the RIFF chunk list and locate the `fmt ` and `data` chunks.
///
/// Returns `None` for anything that is not a RIFF/WAVE buffer carrying both
/// chunks. A `data` chunk whose declared length runs past the end of the
/// buffer is clamped to the bytes actually present.
pub fn parse_layout(buf: &[u8]) -> Option<WavLayout<'_>> {
    if buf.len() < 12 || &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
        return None;
    }

    let mut format = None;
    let mut fmt_body: &[u8] = &[];
    let mut data = None;
    let mut pos = 12usize;

    while pos + 8 <= buf.len() {
        let id = &buf[pos..pos + 4];
        let declared = read_u32(buf, pos + 4)? as usize;
        let body_start = pos + 8;
        let body_end = body_start.saturating_add(declared).min(buf.len());
        let body = &buf[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return None;
                }
                format = Some(WavFormat {
                    audio_format: read_u16(body, 0)?,
                    channels: read_u16(body, 2)?,
                    sample_rate: read_u32(body, 4)?,
                    bits_per_sample: read_u16(body, 14)?,
                });
                fmt_body = body;
            }
            b"data" => data = Some(body),
            _ => {}
        }

        // Chunks are padded to an even length.
        let padded = declared.saturating_add(declared & 1);
        pos = body_start.saturating_add(padded);
    }

    Some(WavLayout {
        format: format?,
        fmt_body,
        data: data?,
    })
}

/// Duration of a WAV buffer in seconds, without decoding samples.
///
/// Never fails: malformed or foreign input yields `None`.
pub fn probe_duration(buf: &[u8]) -> Option<f64> {
    let layout = parse_layout(buf)?;
    let WavFormat {
        channels,
        sample_rate,
        bits_per_sample,
        ..
    } = layout.format;
    if channels == 0 || sample_rate == 0 || bits_per_sample == 0 {
        return None;
    }
    let bytes_per_frame = f64::from(channels) * (f64::from(bits_per_sample) / 8.0);
    Some(layout.data.len() as f64 / bytes_per_frame / f64::from(sample_rate))
}

/// Samples decoded to `f32` in `[-1.0, 1.0]`, interleaved by channel.
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub spec: hound::WavSpec,
    pub samples: Vec<f32>,
}

impl DecodedClip {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        match self.spec.channels {
            0 => 0,
            channels => self.samples.len() / usize::from(channels),
        }
    }
}

/// Decode a WAV buffer into normalized samples.
pub fn decode(buf: &[u8]) -> Result<DecodedClip> {
    let mut reader = hound::WavReader::new(Cursor::new(buf))
        .map_err(|e| PipelineError::merge(format!("Failed to parse WAV: {e}")))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
    }
    .map_err(|e| PipelineError::merge(format!("Failed to read WAV samples: {e}")))?;

    Ok(DecodedClip { spec, samples })
}

/// Encode normalized interleaved samples with the given spec.
pub fn encode(spec: hound::WavSpec, samples: &[f32]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|e| PipelineError::merge(format!("Failed to start WAV writer: {e}")))?;

    match spec.sample_format {
        hound::SampleFormat::Float => {
            for &s in samples {
                writer
                    .write_sample(s)
                    .map_err(|e| PipelineError::merge(format!("Failed to write sample: {e}")))?;
            }
        }
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample);
            for &s in samples {
                let value = (s.clamp(-1.0, 1.0) * (scale - 1.0)).round() as i32;
                writer
                    .write_sample(value)
                    .map_err(|e| PipelineError::merge(format!("Failed to write sample: {e}")))?;
            }
        }
    }

    writer
        .finalize()
        .map_err(|e| PipelineError::merge(format!("Failed to finalize WAV: {e}")))?;
    Ok(cursor.into_inner())
}

fn int_scale(bits: u16) -> f32 {
    (1u64 << (bits.clamp(1, 32) - 1)) as f32
}

/// Remap interleaved samples from one channel count to another.
///
/// Down-mixing to mono averages all channels; otherwise channels are copied
/// by index, repeating the last source channel when the target has more.
pub fn remap_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let from = usize::from(from);
    let to = usize::from(to);

    samples
        .chunks_exact(from)
        .flat_map(|frame| {
            (0..to).map(move |ch| {
                if to == 1 {
                    frame.iter().sum::<f32>() / from as f32
                } else {
                    frame[ch.min(from - 1)]
                }
            })
        })
        .collect()
}

/// Linear-interpolation resampling of interleaved frames.
pub fn resample(samples: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || channels == 0 || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let channels = usize::from(channels);
    let frames = samples.len() / channels;
    if frames == 0 {
        return Vec::new();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_frames = (frames as f64 / ratio).ceil() as usize;
    let mut out = Vec::with_capacity(output_frames * channels);

    for i in 0..output_frames {
        let source_pos = i as f64 * ratio;
        let source_idx = (source_pos.floor() as usize).min(frames - 1);
        let fraction = (source_pos - source_idx as f64) as f32;

        for ch in 0..channels {
            let left = samples[source_idx * channels + ch];
            if source_idx + 1 >= frames {
                out.push(left);
            } else {
                let right = samples[(source_idx + 1) * channels + ch];
                out.push(left + (right - left) * fraction);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    /// Hand-built RIFF buffer with arbitrary chunk layout.
    fn riff(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut body = b"WAVE".to_vec();
        for (id, data) in chunks {
            body.extend_from_slice(*id);
            body.extend_from_slice(&(data.len() as u32).to_le_bytes());
            body.extend_from_slice(data);
            if data.len() % 2 == 1 {
                body.push(0);
            }
        }
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    fn fmt_chunk(channels: u16, sample_rate: u32, bits: u16) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&1u16.to_le_bytes());
        fmt.extend_from_slice(&channels.to_le_bytes());
        fmt.extend_from_slice(&sample_rate.to_le_bytes());
        fmt.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
        fmt.extend_from_slice(&block_align.to_le_bytes());
        fmt.extend_from_slice(&bits.to_le_bytes());
        fmt
    }

    #[test]
    fn probe_two_seconds_of_16khz_mono() {
        let wav = make_wav_data(16000, 1, &vec![0i16; 32000]);
        assert_eq!(probe_duration(&wav), Some(2.0));

        // 64000 data bytes written by hand
        let wav = riff(&[
            (b"fmt ", fmt_chunk(1, 16000, 16)),
            (b"data", vec![0u8; 64000]),
        ]);
        assert_eq!(probe_duration(&wav), Some(2.0));
    }

    #[test]
    fn probe_skips_unknown_chunks_with_odd_padding() {
        let wav = riff(&[
            (b"LIST", vec![1u8; 7]),
            (b"fmt ", fmt_chunk(2, 8000, 16)),
            (b"junk", vec![0u8; 3]),
            (b"data", vec![0u8; 16000]),
        ]);
        // 16000 bytes / (2 ch * 2 bytes) / 8000 Hz
        assert_eq!(probe_duration(&wav), Some(0.5));
    }

    #[test]
    fn probe_rejects_missing_signature() {
        assert_eq!(probe_duration(b"XXXX\x00\x00\x00\x00WAVEfmt "), None);
        assert_eq!(probe_duration(b"RIFF\x24\x00\x00\x00XXXX"), None);
        assert_eq!(probe_duration(&[]), None);
        assert_eq!(probe_duration(&[0u8; 1000]), None);
    }

    #[test]
    fn probe_rejects_missing_chunks() {
        let no_fmt = riff(&[(b"data", vec![0u8; 100])]);
        assert_eq!(probe_duration(&no_fmt), None);

        let no_data = riff(&[(b"fmt ", fmt_chunk(1, 16000, 16))]);
        assert_eq!(probe_duration(&no_data), None);
    }

    #[test]
    fn probe_rejects_zero_parameters() {
        let zero_rate = riff(&[
            (b"fmt ", fmt_chunk(1, 0, 16)),
            (b"data", vec![0u8; 100]),
        ]);
        assert_eq!(probe_duration(&zero_rate), None);

        let zero_channels = riff(&[
            (b"fmt ", fmt_chunk(0, 16000, 16)),
            (b"data", vec![0u8; 100]),
        ]);
        assert_eq!(probe_duration(&zero_channels), None);
    }

    #[test]
    fn probe_handles_random_garbage() {
        let garbage: Vec<u8> = (0..500).map(|i| ((i * 17 + 42) % 256) as u8).collect();
        assert_eq!(probe_duration(&garbage), None);

        let mut truncated = make_wav_data(16000, 1, &[100i16; 10]);
        truncated.truncate(30);
        assert_eq!(probe_duration(&truncated), None);
    }

    #[test]
    fn probe_clamps_oversized_data_length() {
        let mut wav = make_wav_data(16000, 1, &vec![0i16; 1600]);
        let data_pos = wav.windows(4).position(|w| w == b"data").unwrap();
        wav[data_pos + 4..data_pos + 8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(probe_duration(&wav), Some(0.1));
    }

    #[test]
    fn decode_normalizes_int_samples() {
        let wav = make_wav_data(16000, 1, &[0, 16384, -32768]);
        let clip = decode(&wav).unwrap();
        assert_eq!(clip.spec.sample_rate, 16000);
        assert_eq!(clip.frames(), 3);
        assert_eq!(clip.samples[0], 0.0);
        assert!((clip.samples[1] - 0.5).abs() < 1e-4);
        assert_eq!(clip.samples[2], -1.0);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode(&[0u8, 1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("Failed to parse WAV"));
    }

    #[test]
    fn encode_then_decode_preserves_frame_count() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let samples = vec![0.25f32; 200];
        let bytes = encode(spec, &samples).unwrap();
        let clip = decode(&bytes).unwrap();
        assert_eq!(clip.spec, spec);
        assert_eq!(clip.frames(), 100);
    }

    #[test]
    fn remap_stereo_to_mono_averages() {
        let mono = remap_channels(&[0.2, 0.4, -0.5, 0.5], 2, 1);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert_eq!(mono[1], 0.0);
    }

    #[test]
    fn remap_mono_to_stereo_duplicates() {
        assert_eq!(remap_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn resample_identity_same_rate() {
        let samples = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample(&samples, 1, 16000, 16000), samples);
    }

    #[test]
    fn resample_upsample_doubles_frames() {
        let resampled = resample(&[0.0, 0.5, 1.0], 1, 8000, 16000);
        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0.0);
        assert!(resampled[1] > 0.0 && resampled[1] < 0.5);
        assert_eq!(resampled[2], 0.5);
    }

    #[test]
    fn resample_downsample_stereo_halves_frames() {
        let samples = vec![0.0f32; 3200 * 2];
        let resampled = resample(&samples, 2, 16000, 8000);
        assert_eq!(resampled.len(), 1600 * 2);
    }

    #[test]
    fn resample_handles_edge_cases() {
        assert!(resample(&[], 1, 16000, 8000).is_empty());
        assert_eq!(resample(&[0.5], 1, 16000, 8000), vec![0.5]);
    }
}

//! Merging synthesized clips into one continuous WAV artifact.
//!
//! Two backends sit behind [`AudioMerger`]: a container-level copy that only
//! applies when every clip shares a byte-identical format, and a decode path
//! that resamples and remixes everything to the first clip's format.
//! [`ClipMerger`] tries them in order and falls through on failure.

use super::wav::{self, WavLayout};
use crate::error::{PipelineError, Result};
use tracing::{debug, warn};

/// A strategy for joining WAV clips end to end.
pub trait AudioMerger: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capability check. `merge` is only attempted when this returns true.
    fn can_merge(&self, clips: &[Vec<u8>]) -> bool;

    fn merge(&self, clips: &[Vec<u8>]) -> Result<Vec<u8>>;
}

/// Copies `data` payloads under a single rewritten header.
///
/// Lossless and cheap, but only valid when all `fmt ` chunks match exactly
/// and every payload is a whole number of frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamCopyMerger;

impl AudioMerger for StreamCopyMerger {
    fn name(&self) -> &'static str {
        "stream-copy"
    }

    fn can_merge(&self, clips: &[Vec<u8>]) -> bool {
        let mut layouts = clips.iter().map(|c| wav::parse_layout(c));
        let Some(Some(first)) = layouts.next() else {
            return false;
        };
        first.has_whole_frames()
            && layouts.all(|l| {
                l.is_some_and(|l| l.fmt_body == first.fmt_body && l.has_whole_frames())
            })
    }

    fn merge(&self, clips: &[Vec<u8>]) -> Result<Vec<u8>> {
        let layouts = clips
            .iter()
            .map(|c| wav::parse_layout(c))
            .collect::<Option<Vec<WavLayout<'_>>>>()
            .ok_or_else(|| PipelineError::merge("clip is not a RIFF/WAVE buffer"))?;
        let first = layouts
            .first()
            .ok_or_else(|| PipelineError::merge("no clips to merge"))?;

        let mut data = Vec::new();
        for (i, layout) in layouts.iter().enumerate() {
            if layout.fmt_body != first.fmt_body {
                return Err(PipelineError::merge(format!("clip {i} differs in format")));
            }
            if !layout.has_whole_frames() {
                return Err(PipelineError::merge(format!("clip {i} ends in a partial frame")));
            }
            data.extend_from_slice(layout.data);
        }

        write_riff(first.fmt_body, &data)
    }
}

fn write_riff(fmt_body: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let fmt_len = u32::try_from(fmt_body.len())
        .map_err(|_| PipelineError::merge("fmt chunk too large"))?;
    let data_len =
        u32::try_from(data.len()).map_err(|_| PipelineError::merge("merged audio exceeds 4 GiB"))?;
    let fmt_pad = fmt_body.len() & 1;
    let data_pad = data.len() & 1;
    let riff_len = 4 + 8 + fmt_body.len() + fmt_pad + 8 + data.len() + data_pad;
    let riff_len =
        u32::try_from(riff_len).map_err(|_| PipelineError::merge("merged audio exceeds 4 GiB"))?;

    let mut out = Vec::with_capacity(riff_len as usize + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_len.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&fmt_len.to_le_bytes());
    out.extend_from_slice(fmt_body);
    if fmt_pad == 1 {
        out.push(0);
    }
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(data);
    if data_pad == 1 {
        out.push(0);
    }
    Ok(out)
}

/// Decodes every clip, normalizes it to the first clip's format, re-encodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResamplingMerger;

impl AudioMerger for ResamplingMerger {
    fn name(&self) -> &'static str {
        "resample"
    }

    fn can_merge(&self, clips: &[Vec<u8>]) -> bool {
        !clips.is_empty()
            && clips
                .iter()
                .all(|c| wav::parse_layout(c).is_some_and(|l| l.has_whole_frames()))
    }

    fn merge(&self, clips: &[Vec<u8>]) -> Result<Vec<u8>> {
        let mut decoded = clips.iter().map(|c| wav::decode(c));
        let first = decoded
            .next()
            .ok_or_else(|| PipelineError::merge("no clips to merge"))??;
        let target = first.spec;
        let mut samples = first.samples;

        for clip in decoded {
            let clip = clip?;
            let remixed = wav::remap_channels(&clip.samples, clip.spec.channels, target.channels);
            let resampled = wav::resample(
                &remixed,
                target.channels,
                clip.spec.sample_rate,
                target.sample_rate,
            );
            samples.extend_from_slice(&resampled);
        }

        wav::encode(target, &samples)
    }
}

/// Ordered set of merge backends with fallback.
pub struct ClipMerger {
    backends: Vec<Box<dyn AudioMerger>>,
}

impl Default for ClipMerger {
    fn default() -> Self {
        Self::new(vec![Box::new(StreamCopyMerger), Box::new(ResamplingMerger)])
    }
}

impl ClipMerger {
    pub fn new(backends: Vec<Box<dyn AudioMerger>>) -> Self {
        Self { backends }
    }

    /// Join clips in order.
    ///
    /// A single clip is returned unchanged. An empty list, or every eligible
    /// backend failing, is a merge error.
    pub fn merge(&self, clips: &[Vec<u8>]) -> Result<Vec<u8>> {
        match clips {
            [] => return Err(PipelineError::merge("no clips to merge")),
            [only] => return Ok(only.clone()),
            _ => {}
        }

        let mut last_error = None;
        for backend in &self.backends {
            if !backend.can_merge(clips) {
                debug!(backend = backend.name(), "merge backend not applicable");
                continue;
            }
            match backend.merge(clips) {
                Ok(merged) => {
                    debug!(
                        backend = backend.name(),
                        clips = clips.len(),
                        bytes = merged.len(),
                        "merged clips"
                    );
                    return Ok(merged);
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "merge backend failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(PipelineError::merge(match last_error {
            Some(e) => format!("all merge backends failed: {}", e.message()),
            None => "no merge backend accepts these clips".to_string(),
        }))
    }
}

/// Merge with the default backend order.
pub fn merge_clips(clips: &[Vec<u8>]) -> Result<Vec<u8>> {
    ClipMerger::default().merge(clips)
}

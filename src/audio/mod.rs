//! WAV probing and clip merging.

pub mod merge;
pub mod wav;

pub use merge::{AudioMerger, ClipMerger, ResamplingMerger, StreamCopyMerger, merge_clips};
pub use wav::probe_duration;

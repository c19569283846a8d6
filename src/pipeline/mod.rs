//! Reply pipeline: segmenting generated text, synthesizing it, and
//! orchestrating whole runs.

pub mod dispatcher;
pub mod orchestrator;
pub mod segmenter;
pub mod sink;
pub mod types;

pub use dispatcher::{BatchDispatcher, Dispatcher, SequentialDispatcher};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorSettings};
pub use segmenter::{StreamSegmenter, segment_text};
pub use sink::{ClipStore, DirClipStore, MemoryClipStore, StoredClip};
pub use types::{
    AggregateReply, PipelineEvent, PipelineState, ReplyRequest, SegmentEvent, SpeechSegment,
    SynthesizedClip, UserInput,
};

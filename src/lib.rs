//! mintai-voice - spoken replies for dialect voice assistants
//!
//! Recognizes what the user said, generates a reply, and synthesizes it
//! clause by clause so playback can start before the reply is finished.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
#[cfg(feature = "http")]
pub(crate) mod http;
pub mod llm;
pub mod pipeline;
pub mod retry;
pub mod session;
pub mod stt;
pub mod subtitle;
pub mod tts;

// Collaborator seams
pub use llm::Generator;
pub use pipeline::{ClipStore, Dispatcher};
pub use session::HistoryStore;
pub use stt::Transcriber;
pub use tts::Synthesizer;

// Pipeline
pub use pipeline::{
    AggregateReply, Collaborators, Orchestrator, OrchestratorSettings, PipelineEvent,
    ReplyRequest, UserInput,
};

// Error handling
pub use error::{ErrorKind, PipelineError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_hash_suffix_only_with_git() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}

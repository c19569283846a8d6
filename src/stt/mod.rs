//! Speech recognition collaborators.

#[cfg(feature = "http")]
pub mod http;
pub mod transcriber;

#[cfg(feature = "http")]
pub use http::HttpTranscriber;
pub use transcriber::{MockTranscriber, Transcriber};

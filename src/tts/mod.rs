//! Speech synthesis collaborators.

#[cfg(feature = "http")]
pub mod http;
pub mod synthesizer;

#[cfg(feature = "http")]
pub use http::HttpSynthesizer;
pub use synthesizer::{MockSynthesizer, Synthesizer, Voice};

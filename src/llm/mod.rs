//! Text generation collaborators and reply parsing.

pub mod generator;
#[cfg(feature = "http")]
pub mod http;
pub mod reply;

pub use generator::{ChatMessage, ChatRole, Generator, MockGenerator, TextStream};
#[cfg(feature = "http")]
pub use http::HttpGenerator;
pub use reply::{ParsedReply, Provenance, ReplyFields, ReplyParser, parse_reply};

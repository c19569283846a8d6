use crate::config::OutputConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Where synthesized audio goes. Returns a reference clients can fetch.
#[async_trait]
pub trait ClipStore: Send + Sync {
    /// Store `bytes` and return its audio reference.
    async fn put(&self, name_hint: &str, bytes: &[u8], content_type: &str) -> Result<String>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "clip-store"
    }
}

/// A clip kept by [`MemoryClipStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredClip {
    pub reference: String,
    pub name_hint: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Collects clips in memory. References look like `mem://3`.
#[derive(Debug, Default)]
pub struct MemoryClipStore {
    clips: Mutex<Vec<StoredClip>>,
}

impl MemoryClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &str) -> Option<Vec<u8>> {
        self.clips
            .lock()
            .ok()?
            .iter()
            .find(|c| c.reference == reference)
            .map(|c| c.bytes.clone())
    }

    pub fn clips(&self) -> Vec<StoredClip> {
        self.clips.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.clips.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ClipStore for MemoryClipStore {
    async fn put(&self, name_hint: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let mut clips = self
            .clips
            .lock()
            .map_err(|_| PipelineError::Other("clip store lock poisoned".to_string()))?;
        let reference = format!("mem://{}", clips.len());
        clips.push(StoredClip {
            reference: reference.clone(),
            name_hint: name_hint.to_string(),
            bytes: bytes.to_vec(),
            content_type: content_type.to_string(),
        });
        Ok(reference)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Writes clips as files under a directory served at `url_prefix`.
#[derive(Debug, Clone)]
pub struct DirClipStore {
    dir: PathBuf,
    url_prefix: String,
}

impl DirClipStore {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(&config.audio_dir, &config.url_prefix)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(name_hint: &str, content_type: &str) -> String {
        let hint: String = name_hint
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(32)
            .collect();
        let ext = match content_type {
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            _ => "bin",
        };
        let id = Uuid::new_v4().simple();
        if hint.is_empty() {
            format!("{id}.{ext}")
        } else {
            format!("{hint}_{id}.{ext}")
        }
    }
}

#[async_trait]
impl ClipStore for DirClipStore {
    async fn put(&self, name_hint: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let file_name = Self::file_name(name_hint, content_type);
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "clip written");
        Ok(format!("{}/{}", self.url_prefix, file_name))
    }

    fn name(&self) -> &'static str {
        "dir"
    }
}

//! Diagnostic persistence of assembled and optimized shader text.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};

use super::types::{Pass, ShaderStage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactStage {
    Pre,
    Post,
}

impl ArtifactStage {
    fn as_str(self) -> &'static str {
        match self {
            ArtifactStage::Pre => "pre",
            ArtifactStage::Post => "post",
        }
    }
}

/// `<shader>.<pass index>.<pre|post>.<vert|frag>.glsl`
pub fn artifact_name(shader: &str, pass: Pass, stage: ArtifactStage, shader_stage: ShaderStage) -> String {
    format!(
        "{shader}.{}.{}.{}.glsl",
        pass.index(),
        stage.as_str(),
        shader_stage.suffix()
    )
}

/// `<shader>.<pass index>.<vert|frag>.log`
pub fn log_name(shader: &str, pass: Pass, shader_stage: ShaderStage) -> String {
    format!("{shader}.{}.{}.log", pass.index(), shader_stage.suffix())
}

pub trait ArtifactSink {
    fn persist(&self, name: &str, text: &str) -> Result<()>;
}

/// Writes artifacts as files under a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirectoryArtifacts {
    dir: PathBuf,
}

impl DirectoryArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactSink for DirectoryArtifacts {
    fn persist(&self, name: &str, text: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.dir.join(name);
        std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Keeps artifacts in memory; clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifacts {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.inner.lock().ok()?.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ArtifactSink for MemoryArtifacts {
    fn persist(&self, name: &str, text: &str) -> Result<()> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| anyhow!("artifact table lock poisoned"))?;
        map.insert(name.to_string(), text.to_string());
        Ok(())
    }
}

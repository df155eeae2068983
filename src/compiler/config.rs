//! Compiler configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Capacity of each hardware resource class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformLimits {
    pub max_textures: usize,
    pub max_attrib_arrays: usize,
    pub max_lights: usize,
    pub max_texcoords: usize,
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Self {
            max_textures: 6,
            max_attrib_arrays: 8,
            max_lights: 4,
            max_texcoords: 6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub limits: PlatformLimits,
    /// Pass the assembled text through the configured optimizer.
    pub optimize: bool,
    pub gles: bool,
    /// Shared code fragments injected after the `#define` block.
    pub prelude: Vec<String>,
    /// Where pre/post optimization text is persisted for diagnostics.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            limits: PlatformLimits::default(),
            optimize: true,
            gles: false,
            prelude: vec!["Common.glsl".to_string(), "Shader.glsl".to_string()],
            artifact_dir: None,
        }
    }
}

impl CompilerConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: CompilerConfig =
            serde_json::from_str(text).context("failed to parse compiler config json")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read compiler config at {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("invalid compiler config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let l = &self.limits;
        // Slot values are stored in a byte with 255 reserved.
        for (name, v) in [
            ("max_textures", l.max_textures),
            ("max_attrib_arrays", l.max_attrib_arrays),
            ("max_lights", l.max_lights),
            ("max_texcoords", l.max_texcoords),
        ] {
            if v == 0 || v > 254 {
                bail!("limits.{name} must be in 1..=254, got {v}");
            }
        }
        Ok(())
    }
}

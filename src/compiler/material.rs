//! Material-side inputs consulted by the resource mapper and assembler.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::types::SkinMode;

/// Texture-coordinate generator for a texture stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcGen {
    #[default]
    Vertex,
    #[serde(alias = "env_map")]
    Envmap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcMod {
    Rotate,
    Turb,
    Scale,
    Shift,
    Scroll,
}

impl TcMod {
    pub const ALL: [TcMod; 5] = [TcMod::Rotate, TcMod::Turb, TcMod::Scale, TcMod::Shift, TcMod::Scroll];

    pub fn flag(self) -> u8 {
        1 << self as u8
    }

    pub fn macro_suffix(self) -> &'static str {
        match self {
            TcMod::Rotate => "ROTATE",
            TcMod::Turb => "TURB",
            TcMod::Scale => "SCALE",
            TcMod::Shift => "SHIFT",
            TcMod::Scroll => "SCROLL",
        }
    }
}

/// Animation curve driving a tc-mod stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveKind {
    #[default]
    Identity,
    Constant,
    Square,
    Sawtooth,
    InverseSawtooth,
    Triangle,
    Sine,
    Noise,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureStage {
    /// UV channel the stage reads.
    pub uv: u8,
    pub tc_gen: TcGen,
    /// Missing entries are identity.
    pub tc_mods: BTreeMap<TcMod, WaveKind>,
}

impl TextureStage {
    pub fn wave(&self, m: TcMod) -> WaveKind {
        self.tc_mods.get(&m).copied().unwrap_or_default()
    }

    pub fn is_identity(&self) -> bool {
        TcMod::ALL.iter().all(|m| self.wave(*m) == WaveKind::Identity)
    }

    pub fn tc_mod_flags(&self) -> u8 {
        TcMod::ALL
            .iter()
            .filter(|m| self.wave(**m) != WaveKind::Identity)
            .fold(0, |acc, m| acc | m.flag())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Material {
    pub skin_mode: SkinMode,
    /// Per texture index; missing stages read UV channel 0 with identity coordinates.
    pub textures: Vec<TextureStage>,
}

impl Material {
    pub fn stage(&self, index: u8) -> TextureStage {
        self.textures.get(index as usize).cloned().unwrap_or_default()
    }

    pub fn tc_uv_index(&self, index: u8) -> u8 {
        self.textures.get(index as usize).map_or(0, |s| s.uv)
    }

    pub fn tc_gen(&self, index: u8) -> TcGen {
        self.textures
            .get(index as usize)
            .map_or(TcGen::Vertex, |s| s.tc_gen)
    }

    pub fn tc_mod_flags(&self, index: u8) -> u8 {
        self.textures
            .get(index as usize)
            .map_or(0, TextureStage::tc_mod_flags)
    }

    /// True if any stage generates coordinates from an environment reflection.
    pub fn gen_reflect(&self) -> bool {
        self.textures.iter().any(|s| s.tc_gen == TcGen::Envmap)
    }

    pub fn from_json_str(text: &str) -> Result<Material> {
        serde_json::from_str(text).context("failed to parse material json")
    }

    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Material> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read material json at {}", path.display()))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_material_json() {
        let m = Material::from_json_str(
            r#"{
                "skinMode": "sprite",
                "textures": [
                    { "uv": 1 },
                    { "uv": 0, "tc_gen": "envmap" },
                    { "tc_mods": { "scroll": "sine", "rotate": "identity" } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(m.skin_mode, SkinMode::Sprite);
        assert_eq!(m.tc_uv_index(0), 1);
        assert_eq!(m.tc_gen(1), TcGen::Envmap);
        assert!(m.gen_reflect());
        assert!(m.stage(0).is_identity());
        assert!(!m.stage(2).is_identity());
        assert_eq!(m.tc_mod_flags(2), TcMod::Scroll.flag());
        // Out of range stages default to identity on UV 0.
        assert_eq!(m.tc_uv_index(9), 0);
        assert!(m.stage(9).is_identity());
    }
}

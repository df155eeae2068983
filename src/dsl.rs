//! Shader documents: node instances plus per-pass output wiring.
//!
//! ```json
//! {
//!   "name": "wall",
//!   "precision": "medium",
//!   "nodes": {
//!     "tint": { "type": "Mul", "in": { "a": { "source": "texture", "index": 0 },
//!                                       "b": { "source": "color" } } }
//!   },
//!   "passes": {
//!     "Default": { "color": { "node": "tint" } }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::compiler::error::CompileError;
use crate::compiler::types::{MaterialSource, Pass, Precision, ShaderOutput, SkinMode};
use crate::graph::Leaf;

/// Output name selecting a node's return register.
pub const RETURN_OUTPUT: &str = "r";

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShaderDocument {
    pub name: String,
    #[serde(default)]
    pub skin_mode: SkinMode,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub sampler_precision: Option<SamplerPrecision>,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeDesc>,
    #[serde(default)]
    pub passes: BTreeMap<String, PassDesc>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum SamplerPrecision {
    All(Precision),
    /// Keyed by texture index.
    PerTexture(BTreeMap<String, Precision>),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct NodeDesc {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(rename = "in", default)]
    pub inputs: BTreeMap<String, BindingDesc>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct PassDesc {
    #[serde(default)]
    pub color: Option<BindingDesc>,
    #[serde(default)]
    pub alpha: Option<BindingDesc>,
    #[serde(default)]
    pub depth: Option<BindingDesc>,
}

impl PassDesc {
    pub fn slot(&self, output: ShaderOutput) -> Option<&BindingDesc> {
        match output {
            ShaderOutput::Color => self.color.as_ref(),
            ShaderOutput::Alpha => self.alpha.as_ref(),
            ShaderOutput::Depth => self.depth.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        ShaderOutput::ALL.iter().all(|o| self.slot(*o).is_none())
    }
}

/// Loosely-typed binding as written in a document; see [`BindingDesc::classify`].
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BindingDesc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
}

/// A binding after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRef<'a> {
    Node { node: &'a str, output: &'a str },
    Leaf(Leaf),
}

impl BindingDesc {
    pub fn node(node: &str) -> Self {
        Self {
            node: Some(node.to_string()),
            ..Self::default()
        }
    }

    pub fn leaf(source: MaterialSource, index: u8) -> Self {
        let source = serde_json::to_value(source)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string));
        Self {
            source,
            index: Some(index as i64),
            ..Self::default()
        }
    }

    /// Decides between node reference and leaf binding. `context` names the binding site.
    pub fn classify(&self, context: &str) -> Result<BindingRef<'_>> {
        let fail = |reason: String| -> anyhow::Error {
            CompileError::MalformedBinding {
                context: context.to_string(),
                reason,
            }
            .into()
        };
        match (&self.node, &self.source) {
            (Some(node), None) => {
                if self.index.is_some() {
                    return Err(fail("node bindings take no index".to_string()));
                }
                Ok(BindingRef::Node {
                    node,
                    output: self.output.as_deref().unwrap_or(RETURN_OUTPUT),
                })
            }
            (None, Some(source)) => {
                if self.output.is_some() {
                    return Err(fail("leaf bindings take no output".to_string()));
                }
                let Some(src) = MaterialSource::parse(source) else {
                    return Err(fail(format!("unknown material source '{source}'")));
                };
                let raw = self.index.unwrap_or(0);
                let Ok(index) = u8::try_from(raw) else {
                    return Err(fail(format!("index {raw} out of range")));
                };
                Ok(BindingRef::Leaf(Leaf::new(src, index)))
            }
            (Some(_), Some(_)) => Err(fail("both node and source given".to_string())),
            (None, None) => Err(fail("expected either node or source".to_string())),
        }
    }
}

impl ShaderDocument {
    pub fn from_json_str(text: &str) -> Result<ShaderDocument> {
        let doc: ShaderDocument =
            serde_json::from_str(text).context("failed to parse shader json")?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<ShaderDocument> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read shader json at {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Structural checks that do not need node types.
    pub fn validate(&self) -> Result<()> {
        let known: Vec<String> = Pass::all().into_iter().map(Pass::doc_name).collect();
        let mut errors: Vec<String> = Vec::new();
        for name in self.passes.keys() {
            if !known.contains(name) {
                errors.push(format!("unknown pass '{name}'"));
            }
        }
        if let Some(SamplerPrecision::PerTexture(map)) = &self.sampler_precision {
            for key in map.keys() {
                if key.parse::<u8>().is_err() {
                    errors.push(format!("samplerPrecision key '{key}' is not a texture index"));
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "shader '{}' failed validation ({} error(s)):\n- {}",
                self.name,
                errors.len(),
                errors.join("\n- ")
            )
        }
    }

    /// The description for `pass`; `Preview` falls back to `Default`.
    pub fn pass(&self, pass: Pass) -> Option<&PassDesc> {
        if let Some(desc) = self.passes.get(&pass.doc_name()) {
            return Some(desc);
        }
        if pass == Pass::Preview {
            let fallback = self.passes.get(&Pass::Default.doc_name());
            if fallback.is_some() {
                log::warn!("[shader] {}: no Preview pass, using Default", self.name);
            }
            return fallback;
        }
        None
    }

    /// Sampler precision for texture `index`; defaults to the shader precision.
    pub fn sampler_precision(&self, index: u8) -> Precision {
        match &self.sampler_precision {
            None => self.precision,
            Some(SamplerPrecision::All(p)) => *p,
            Some(SamplerPrecision::PerTexture(map)) => map
                .get(&index.to_string())
                .copied()
                .unwrap_or(self.precision),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::error::compile_error;

    const DOC: &str = r#"{
        "name": "wall",
        "precision": "medium",
        "samplerPrecision": { "1": "high" },
        "nodes": {
            "tint": { "type": "Mul", "in": { "a": { "source": "texture", "index": 1 },
                                              "b": { "node": "other", "output": "q" } } }
        },
        "passes": { "Default": { "color": { "node": "tint" } } }
    }"#;

    #[test]
    fn parses_document() {
        let doc = ShaderDocument::from_json_str(DOC).unwrap();
        assert_eq!(doc.name, "wall");
        assert_eq!(doc.precision, Precision::Medium);
        assert_eq!(doc.sampler_precision(0), Precision::Medium);
        assert_eq!(doc.sampler_precision(1), Precision::High);

        let default = doc.pass(Pass::Default).unwrap();
        assert_eq!(
            default.color.as_ref().unwrap().classify("color").unwrap(),
            BindingRef::Node { node: "tint", output: RETURN_OUTPUT }
        );
        assert!(default.alpha.is_none());
        assert!(doc.pass(Pass::Fullbright).is_none());
        // Preview falls back to Default.
        assert!(doc.pass(Pass::Preview).is_some());

        let tint = &doc.nodes["tint"];
        assert_eq!(
            tint.inputs["a"].classify("a").unwrap(),
            BindingRef::Leaf(Leaf::new(MaterialSource::Texture, 1))
        );
        assert_eq!(
            tint.inputs["b"].classify("b").unwrap(),
            BindingRef::Node { node: "other", output: "q" }
        );
    }

    #[test]
    fn rejects_unknown_pass() {
        let err = ShaderDocument::from_json_str(r#"{ "name": "x", "passes": { "Diffuse9": {} } }"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("unknown pass 'Diffuse9'"));
    }

    #[test]
    fn malformed_bindings() {
        for b in [
            BindingDesc::default(),
            BindingDesc {
                node: Some("n".into()),
                source: Some("color".into()),
                ..Default::default()
            },
            BindingDesc {
                source: Some("bogus".into()),
                ..Default::default()
            },
            BindingDesc {
                source: Some("texture".into()),
                index: Some(300),
                ..Default::default()
            },
        ] {
            let err = b.classify("site").unwrap_err();
            assert!(matches!(
                compile_error(&err),
                Some(CompileError::MalformedBinding { .. })
            ));
        }
    }

    #[test]
    fn leaf_constructor_round_trips() {
        let b = BindingDesc::leaf(MaterialSource::LightTanVec, 2);
        assert_eq!(
            b.classify("x").unwrap(),
            BindingRef::Leaf(Leaf::new(MaterialSource::LightTanVec, 2))
        );
    }
}

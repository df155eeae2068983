//! Core type definitions for the shader graph compiler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of per-light pass variants (`Diffuse1..N`, `DiffuseSpecular1..N`).
pub const MAX_LIGHTS: u8 = 4;

/// Reserved slot value written at the backend boundary for unused mapping entries.
pub const INVALID_MAPPING: u8 = 255;

/// Scalar/vector/sampler type attached to every connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicType {
    #[serde(rename = "FLOAT", alias = "float", alias = "float1")]
    Float,
    #[serde(rename = "FLOAT2", alias = "float2")]
    Float2,
    #[serde(rename = "FLOAT3", alias = "float3")]
    Float3,
    #[serde(rename = "FLOAT4", alias = "float4")]
    Float4,
    #[serde(rename = "HALF", alias = "half", alias = "half1")]
    Half,
    #[serde(rename = "HALF2", alias = "half2")]
    Half2,
    #[serde(rename = "HALF3", alias = "half3")]
    Half3,
    #[serde(rename = "HALF4", alias = "half4")]
    Half4,
    #[serde(rename = "FIXED", alias = "fixed", alias = "fixed1")]
    Fixed,
    #[serde(rename = "FIXED2", alias = "fixed2")]
    Fixed2,
    #[serde(rename = "FIXED3", alias = "fixed3")]
    Fixed3,
    #[serde(rename = "FIXED4", alias = "fixed4")]
    Fixed4,
    #[serde(rename = "sampler2D", alias = "sampler2d")]
    Sampler2D,
    #[serde(rename = "samplerCUBE", alias = "samplerCube", alias = "samplercube")]
    SamplerCube,
}

impl BasicType {
    pub const ALL: [BasicType; 14] = [
        BasicType::Float,
        BasicType::Float2,
        BasicType::Float3,
        BasicType::Float4,
        BasicType::Half,
        BasicType::Half2,
        BasicType::Half3,
        BasicType::Half4,
        BasicType::Fixed,
        BasicType::Fixed2,
        BasicType::Fixed3,
        BasicType::Fixed4,
        BasicType::Sampler2D,
        BasicType::SamplerCube,
    ];

    /// Returns the macro type name used in emitted shader text.
    pub fn macro_name(self) -> &'static str {
        match self {
            BasicType::Float => "FLOAT",
            BasicType::Float2 => "FLOAT2",
            BasicType::Float3 => "FLOAT3",
            BasicType::Float4 => "FLOAT4",
            BasicType::Half => "HALF",
            BasicType::Half2 => "HALF2",
            BasicType::Half3 => "HALF3",
            BasicType::Half4 => "HALF4",
            BasicType::Fixed => "FIXED",
            BasicType::Fixed2 => "FIXED2",
            BasicType::Fixed3 => "FIXED3",
            BasicType::Fixed4 => "FIXED4",
            BasicType::Sampler2D => "sampler2D",
            BasicType::SamplerCube => "samplerCUBE",
        }
    }

    pub fn is_sampler(self) -> bool {
        matches!(self, BasicType::Sampler2D | BasicType::SamplerCube)
    }

    /// Parses either the macro tag (`FLOAT4`) or the lower-case spelling (`float4`).
    pub fn parse(tag: &str) -> Option<BasicType> {
        let lower = tag.to_ascii_lowercase();
        let lower = lower.strip_suffix('1').unwrap_or(&lower);
        BasicType::ALL
            .into_iter()
            .find(|t| t.macro_name().eq_ignore_ascii_case(lower))
    }

    /// Numeric tags follow declaration order, matching the script-side constants.
    pub fn from_index(index: i64) -> Option<BasicType> {
        usize::try_from(index)
            .ok()
            .and_then(|i| BasicType::ALL.get(i).copied())
    }
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.macro_name())
    }
}

/// Engine-supplied leaf value categories a graph input may bind to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialSource {
    Texture,
    Framebuffer,
    Color,
    SpecularColor,
    SpecularExponent,
    LightDiffuseColor,
    LightSpecularColor,
    LightPos,
    LightVec,
    LightHalfVec,
    LightVertex,
    LightTanVec,
    LightTanHalfVec,
    Vertex,
    Normal,
    Tangent,
    Bitangent,
    #[serde(alias = "texcoord")]
    TexCoord,
    VertexColor,
    SpriteSkin,
}

impl MaterialSource {
    pub const COUNT: usize = 20;

    pub const ALL: [MaterialSource; MaterialSource::COUNT] = [
        MaterialSource::Texture,
        MaterialSource::Framebuffer,
        MaterialSource::Color,
        MaterialSource::SpecularColor,
        MaterialSource::SpecularExponent,
        MaterialSource::LightDiffuseColor,
        MaterialSource::LightSpecularColor,
        MaterialSource::LightPos,
        MaterialSource::LightVec,
        MaterialSource::LightHalfVec,
        MaterialSource::LightVertex,
        MaterialSource::LightTanVec,
        MaterialSource::LightTanHalfVec,
        MaterialSource::Vertex,
        MaterialSource::Normal,
        MaterialSource::Tangent,
        MaterialSource::Bitangent,
        MaterialSource::TexCoord,
        MaterialSource::VertexColor,
        MaterialSource::SpriteSkin,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Per-light parameters; the leaf index names the light.
    pub fn is_light(self) -> bool {
        matches!(
            self,
            MaterialSource::LightDiffuseColor
                | MaterialSource::LightSpecularColor
                | MaterialSource::LightPos
                | MaterialSource::LightVec
                | MaterialSource::LightHalfVec
                | MaterialSource::LightVertex
                | MaterialSource::LightTanVec
                | MaterialSource::LightTanHalfVec
        )
    }

    /// Light vectors expressed in tangent space need a tangent basis in the vertex stage.
    pub fn is_tangent_space(self) -> bool {
        matches!(
            self,
            MaterialSource::LightTanVec | MaterialSource::LightTanHalfVec
        )
    }

    pub fn parse(name: &str) -> Option<MaterialSource> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
    }
}

impl fmt::Display for MaterialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Texture-unit source categories recorded in the resource mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureSource {
    Texture = 0,
    Framebuffer = 1,
}

impl TextureSource {
    pub const COUNT: usize = 2;
}

/// Vertex attribute stream categories recorded in the resource mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometrySource {
    Vertices = 0,
    Normals = 1,
    Tangents = 2,
    TexCoords = 3,
    VertexColor = 4,
    SpriteSkin = 5,
}

impl GeometrySource {
    pub const COUNT: usize = 6;
}

/// The three result fields a pass may write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderOutput {
    Color = 0,
    Alpha = 1,
    Depth = 2,
}

impl ShaderOutput {
    pub const ALL: [ShaderOutput; 3] = [ShaderOutput::Color, ShaderOutput::Alpha, ShaderOutput::Depth];

    /// Key used in pass descriptions.
    pub fn key(self) -> &'static str {
        match self {
            ShaderOutput::Color => "color",
            ShaderOutput::Alpha => "alpha",
            ShaderOutput::Depth => "depth",
        }
    }

    pub fn flag(self) -> OutputFlags {
        OutputFlags(1 << self as u8)
    }
}

/// Bit set of [`ShaderOutput`]s written by a pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OutputFlags(pub u8);

impl OutputFlags {
    pub const NONE: OutputFlags = OutputFlags(0);
    pub const COLOR: OutputFlags = OutputFlags(1);
    pub const ALPHA: OutputFlags = OutputFlags(2);
    pub const DEPTH: OutputFlags = OutputFlags(4);

    pub fn contains(self, other: OutputFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: OutputFlags) {
        self.0 |= other.0;
    }
}

/// One lighting/rendering variant of a shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pass {
    Default,
    /// Per-light diffuse pass, zero-based light index.
    Diffuse(u8),
    /// Per-light diffuse + specular pass, zero-based light index.
    DiffuseSpecular(u8),
    Fullbright,
    Preview,
}

impl Pass {
    pub const COUNT: usize = 3 + 2 * MAX_LIGHTS as usize;

    /// All passes in index order.
    pub fn all() -> Vec<Pass> {
        let mut passes = Vec::with_capacity(Pass::COUNT);
        passes.push(Pass::Default);
        passes.extend((0..MAX_LIGHTS).map(Pass::Diffuse));
        passes.extend((0..MAX_LIGHTS).map(Pass::DiffuseSpecular));
        passes.push(Pass::Fullbright);
        passes.push(Pass::Preview);
        passes
    }

    pub fn index(self) -> usize {
        match self {
            Pass::Default => 0,
            Pass::Diffuse(i) => 1 + i as usize,
            Pass::DiffuseSpecular(i) => 1 + MAX_LIGHTS as usize + i as usize,
            Pass::Fullbright => 1 + 2 * MAX_LIGHTS as usize,
            Pass::Preview => 2 + 2 * MAX_LIGHTS as usize,
        }
    }

    pub fn from_index(index: usize) -> Option<Pass> {
        Pass::all().get(index).copied()
    }

    /// Name of the pass entry in a shader description.
    pub fn doc_name(self) -> String {
        match self {
            Pass::Default => "Default".to_string(),
            Pass::Diffuse(i) => format!("Diffuse{}", i + 1),
            Pass::DiffuseSpecular(i) => format!("DiffuseSpecular{}", i + 1),
            Pass::Fullbright => "Fullbright".to_string(),
            Pass::Preview => "Preview".to_string(),
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.doc_name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkinMode {
    #[default]
    Default,
    Sprite,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Low,
    Medium,
    High,
}

impl Precision {
    pub fn macro_suffix(self) -> &'static str {
        match self {
            Precision::Low => "LOW",
            Precision::Medium => "MEDIUM",
            Precision::High => "HIGH",
        }
    }

    /// Scalar family the precision mode maps `PFLOAT*` onto.
    pub fn scalar_family(self) -> &'static str {
        match self {
            Precision::Low => "FIXED",
            Precision::Medium => "HALF",
            Precision::High => "FLOAT",
        }
    }

    pub fn qualifier(self) -> &'static str {
        match self {
            Precision::Low => "lowp",
            Precision::Medium => "mediump",
            Precision::High => "highp",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// File suffix used for persisted artifacts.
    pub fn suffix(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
        }
    }
}

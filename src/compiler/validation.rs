//! The external optimizer seam and a naga-backed implementation.

use anyhow::{Result, anyhow};

use super::types::ShaderStage;

/// Consumes assembled shader text and produces backend text.
pub trait ShaderOptimizer {
    fn name(&self) -> &str;

    /// `Err` carries the optimizer's diagnostic log.
    fn optimize(&self, source: &str, stage: ShaderStage) -> std::result::Result<String, String>;
}

/// Parses the assembled GLSL with naga, validates the module and writes WGSL.
#[derive(Debug, Clone, Default)]
pub struct NagaOptimizer;

impl ShaderOptimizer for NagaOptimizer {
    fn name(&self) -> &str {
        "naga"
    }

    fn optimize(&self, source: &str, stage: ShaderStage) -> std::result::Result<String, String> {
        glsl_to_wgsl(source, stage).map_err(|e| format!("{e:#}"))
    }
}

/// Prepends a version directive when the text has none.
fn with_version(source: &str) -> String {
    if source.trim_start().starts_with("#version") {
        source.to_string()
    } else {
        format!("#version 450 core\n{source}")
    }
}

pub fn glsl_to_wgsl(source: &str, stage: ShaderStage) -> Result<String> {
    let shader_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };

    let mut parser = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: shader_stage,
        defines: Default::default(),
    };

    let module = parser
        .parse(&options, &with_version(source))
        .map_err(|e| anyhow!("GLSL parse failed: {e:?}"))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("GLSL validation failed: {e:?}"))?;

    naga::back::wgsl::write_string(
        &module,
        &info,
        naga::back::wgsl::WriterFlags::EXPLICIT_TYPES,
    )
    .map_err(|e| anyhow!("WGSL writer failed: {e:?}"))
}

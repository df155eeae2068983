//! Macro preprocessing: `#define` block, shared prelude, one level of include expansion,
//! then the optional optimizer hand-off.

use std::fmt::Write as _;

use anyhow::Result;

use super::artifacts::{ArtifactSink, ArtifactStage, artifact_name, log_name};
use super::config::CompilerConfig;
use super::error::CompileError;
use super::mapping::MaterialInputMappings;
use super::material::{Material, TcGen, TcMod};
use super::types::{
    BasicType, GeometrySource, MaterialSource, Pass, Precision, ShaderStage, SkinMode,
    TextureSource,
};
use super::usage::Usage;
use super::validation::ShaderOptimizer;
use crate::asset_store::{ResourceKind, SourceResolver};

/// Include target replaced by the node functions and the emitted body.
pub const MATERIAL_INCLUDE: &str = "material";

/// Everything that parameterizes the text of one (pass, stage).
#[derive(Clone, Copy)]
pub struct AssemblyPlan<'a> {
    pub shader: &'a str,
    pub pass: Pass,
    pub stage: ShaderStage,
    pub precision: Precision,
    pub skin_mode: SkinMode,
    pub gen_reflect: bool,
    pub usage: &'a Usage,
    pub mapping: &'a MaterialInputMappings,
    pub material: &'a Material,
    /// Sampler precision per texture index.
    pub sampler_precision: &'a dyn Fn(u8) -> Precision,
    /// Node functions followed by the emitted entry point.
    pub material_text: &'a str,
}

fn define(out: &mut String, name: &str) {
    out.push_str("#define ");
    out.push_str(name);
    out.push_str("\r\n");
}

fn define_value(out: &mut String, name: &str, value: impl std::fmt::Display) {
    // Writing to a String cannot fail.
    let _ = write!(out, "#define {name} {value}\r\n");
}

/// Lights are bound densely from 0, so the count is one past the highest index referenced
/// by any per-light source.
fn light_count(usage: &Usage) -> usize {
    MaterialSource::ALL
        .into_iter()
        .filter(|s| s.is_light())
        .filter_map(|s| usage.indices(s).last().copied())
        .max()
        .map_or(0, |i| i as usize + 1)
}

/// The `#define` block for `plan`, in fixed order.
pub fn defines(plan: &AssemblyPlan<'_>, gles: bool) -> String {
    let mut out = String::new();
    match plan.stage {
        ShaderStage::Vertex => define(&mut out, "VERTEX"),
        ShaderStage::Fragment => {
            define(&mut out, "FRAGMENT");
            define(&mut out, "MATERIAL");
        }
    }

    let family = plan.precision.scalar_family();
    define(&mut out, &format!("PRECISION_{}", plan.precision.macro_suffix()));
    define_value(&mut out, "PFLOAT", family);
    for n in 2..=4 {
        define_value(&mut out, &format!("PFLOAT{n}"), format!("{family}{n}"));
    }
    define_value(&mut out, "PRECISION_COLOR_TYPE", format!("{family}4"));

    let m = plan.mapping;
    if !m.textures.is_empty() {
        define_value(&mut out, "TEXTURES", m.textures.len());
        for (unit, t) in m.textures.iter().enumerate() {
            let ty = match t.source {
                TextureSource::Texture => plan.usage.texture_type(t.index),
                TextureSource::Framebuffer => BasicType::Sampler2D,
            };
            let precision = match t.source {
                TextureSource::Texture => (plan.sampler_precision)(t.index),
                TextureSource::Framebuffer => plan.precision,
            };
            define_value(&mut out, &format!("T{unit}TYPE"), ty);
            define_value(&mut out, &format!("T{unit}PRECISION"), precision.qualifier());
        }
    }

    if !m.tc_mods.is_empty() {
        define_value(&mut out, "TEXCOORDS", m.tc_mods.len());
        if plan.stage == ShaderStage::Vertex {
            for (register, &index) in m.tc_mods.iter().enumerate() {
                define_value(
                    &mut out,
                    &format!("TEXCOORD{register}_UV"),
                    plan.material.tc_uv_index(index),
                );
                let flags = plan.material.tc_mod_flags(index);
                for tc_mod in TcMod::ALL {
                    if flags & tc_mod.flag() != 0 {
                        define(&mut out, &format!("TEXCOORD{register}_{}", tc_mod.macro_suffix()));
                    }
                }
                if plan.material.tc_gen(index) == TcGen::Envmap {
                    define(&mut out, &format!("TEXCOORD{register}_GENREFLECT"));
                }
            }
        }
    }

    let counts = [
        ("COLORS", m.geometry_source_count(GeometrySource::VertexColor)),
        ("LIGHTS", light_count(plan.usage)),
        ("NORMALS", m.geometry_source_count(GeometrySource::Normals)),
        ("TANGENTS", m.geometry_source_count(GeometrySource::Tangents)),
        ("BITANGENTS", plan.usage.count(MaterialSource::Bitangent)),
    ];
    for (name, count) in counts {
        if count > 0 {
            define_value(&mut out, name, count);
        }
    }

    if gles {
        define(&mut out, "_GLES");
    }
    if plan.skin_mode == SkinMode::Sprite && plan.pass != Pass::Preview {
        define(&mut out, "SKIN_SPRITE");
    }
    if plan.gen_reflect {
        define(&mut out, "GENREFLECT");
    }
    out
}

/// Target of an `#include "<name>"` line.
fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("#include")?.trim();
    rest.strip_prefix('"')?.strip_suffix('"')
}

/// Expands include directives one level deep; included text is copied verbatim.
///
/// Returns whether the material include was seen.
pub fn expand_includes(
    text: &str,
    stage: ShaderStage,
    material_text: &str,
    resolver: &dyn SourceResolver,
    out: &mut String,
) -> Result<bool> {
    let mut saw_material = false;
    for line in text.split_inclusive('\n') {
        let Some(name) = include_target(line) else {
            out.push_str(line);
            continue;
        };
        if name == MATERIAL_INCLUDE {
            saw_material = true;
            if stage == ShaderStage::Fragment {
                out.push_str(material_text);
            }
            continue;
        }
        let Some(included) = resolver.resolve(ResourceKind::Include, name)? else {
            return Err(CompileError::MissingInclude {
                name: name.to_string(),
            }
            .into());
        };
        out.push_str(&included);
        if !included.ends_with('\n') {
            out.push_str("\r\n");
        }
    }
    Ok(saw_material)
}

/// Turns emitted material text into final stage text.
pub struct Assembler<'a> {
    pub config: &'a CompilerConfig,
    pub resolver: &'a dyn SourceResolver,
    pub optimizer: Option<&'a dyn ShaderOptimizer>,
    pub artifacts: Option<&'a dyn ArtifactSink>,
}

impl Assembler<'_> {
    fn persist(&self, name: &str, text: &str) {
        let Some(sink) = self.artifacts else {
            return;
        };
        if let Err(e) = sink.persist(name, text) {
            log::warn!("[assembler] failed to persist {name}: {e:#}");
        }
    }

    /// Defines, prelude and include expansion, without the optimizer.
    pub fn assemble_source(&self, plan: &AssemblyPlan<'_>) -> Result<String> {
        let mut text = defines(plan, self.config.gles);
        for name in &self.config.prelude {
            let Some(fragment) = self.resolver.resolve(ResourceKind::Include, name)? else {
                return Err(CompileError::MissingInclude { name: name.clone() }.into());
            };
            let _ = write!(text, "// {name}\r\n{fragment}\r\n");
        }

        let mut expanded = String::with_capacity(text.len() + plan.material_text.len());
        let saw_material = expand_includes(
            &text,
            plan.stage,
            plan.material_text,
            self.resolver,
            &mut expanded,
        )?;
        if !saw_material && plan.stage == ShaderStage::Fragment {
            expanded.push_str(plan.material_text);
        }
        Ok(expanded)
    }

    /// Full assembly; runs the optimizer when enabled and persists pre/post text.
    pub fn assemble(&self, plan: &AssemblyPlan<'_>) -> Result<String> {
        let source = self.assemble_source(plan)?;
        let optimizer = match self.optimizer {
            Some(o) if self.config.optimize => o,
            _ => return Ok(source),
        };

        self.persist(
            &artifact_name(plan.shader, plan.pass, ArtifactStage::Pre, plan.stage),
            &source,
        );
        match optimizer.optimize(&source, plan.stage) {
            Ok(optimized) => {
                let mut text = String::new();
                if self.config.gles {
                    text.push_str(match plan.stage {
                        ShaderStage::Vertex => "precision mediump float;\r\n",
                        ShaderStage::Fragment => "precision lowp float;\r\n",
                    });
                }
                text.push_str(&optimized);
                self.persist(
                    &artifact_name(plan.shader, plan.pass, ArtifactStage::Post, plan.stage),
                    &text,
                );
                Ok(text)
            }
            Err(log) => {
                self.persist(&log_name(plan.shader, plan.pass, plan.stage), &log);
                let context = format!(
                    "{} pass {} ({})",
                    plan.shader,
                    plan.pass,
                    plan.stage.suffix()
                );
                log::error!("[assembler] {} rejected {context}", optimizer.name());
                Err(CompileError::OptimizerFailed { context, log }.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_store::MemoryResolver;
    use crate::compiler::artifacts::MemoryArtifacts;
    use crate::compiler::config::PlatformLimits;
    use crate::compiler::error::compile_error;
    use crate::compiler::mapping::{build_input_mappings, material_input_mappings};
    use crate::compiler::material::{TextureStage, WaveKind};
    use crate::graph::Leaf;

    struct Fixture {
        usage: Usage,
        mapping: MaterialInputMappings,
        material: Material,
    }

    fn fixture() -> Fixture {
        let mut usage = Usage::new();
        usage.add_usage(Leaf::new(MaterialSource::Texture, 0));
        usage.add_usage(Leaf::new(MaterialSource::TexCoord, 0));
        usage.add_usage(Leaf::new(MaterialSource::LightVec, 0));
        let mut stage = TextureStage::default();
        stage.tc_mods.insert(TcMod::Scroll, WaveKind::Sawtooth);
        stage.tc_gen = TcGen::Envmap;
        let material = Material {
            skin_mode: SkinMode::Default,
            textures: vec![stage],
        };
        let limits = PlatformLimits::default();
        let base = build_input_mappings(&usage, Pass::Default, SkinMode::Default, true, &limits)
            .unwrap();
        let (mapping, _) = material_input_mappings(&base, &usage, &material, &limits).unwrap();
        Fixture {
            usage,
            mapping,
            material,
        }
    }

    fn high(_: u8) -> Precision {
        Precision::High
    }

    fn plan<'a>(f: &'a Fixture, stage: ShaderStage, body: &'a str) -> AssemblyPlan<'a> {
        AssemblyPlan {
            shader: "wall",
            pass: Pass::Default,
            stage,
            precision: Precision::Medium,
            skin_mode: SkinMode::Default,
            gen_reflect: true,
            usage: &f.usage,
            mapping: &f.mapping,
            material: &f.material,
            sampler_precision: &high,
            material_text: body,
        }
    }

    #[test]
    fn vertex_defines_in_order() {
        let f = fixture();
        let text = defines(&plan(&f, ShaderStage::Vertex, ""), true);
        let expected = [
            "#define VERTEX",
            "#define PRECISION_MEDIUM",
            "#define PFLOAT HALF",
            "#define PFLOAT2 HALF2",
            "#define PFLOAT3 HALF3",
            "#define PFLOAT4 HALF4",
            "#define PRECISION_COLOR_TYPE HALF4",
            "#define TEXTURES 1",
            "#define T0TYPE sampler2D",
            "#define T0PRECISION highp",
            "#define TEXCOORDS 1",
            "#define TEXCOORD0_UV 0",
            "#define TEXCOORD0_SCROLL",
            "#define TEXCOORD0_GENREFLECT",
            "#define LIGHTS 1",
            "#define NORMALS 1",
            "#define _GLES",
            "#define GENREFLECT",
        ];
        assert_eq!(text.split("\r\n").filter(|l| !l.is_empty()).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn fragment_skips_tc_mod_defines() {
        let f = fixture();
        let text = defines(&plan(&f, ShaderStage::Fragment, ""), false);
        assert!(text.starts_with("#define FRAGMENT\r\n#define MATERIAL\r\n"));
        assert!(text.contains("#define TEXCOORDS 1\r\n"));
        assert!(!text.contains("TEXCOORD0_SCROLL"));
        assert!(!text.contains("_GLES"));
    }

    #[test]
    fn sparse_lights_and_framebuffer_precision() {
        let mut usage = Usage::new();
        usage.add_usage(Leaf::new(MaterialSource::LightVec, 2));
        usage.add_usage(Leaf::new(MaterialSource::LightDiffuseColor, 1));
        usage.add_usage(Leaf::new(MaterialSource::Texture, 0));
        usage.add_usage(Leaf::new(MaterialSource::Framebuffer, 0));
        let limits = PlatformLimits::default();
        let mapping =
            build_input_mappings(&usage, Pass::Default, SkinMode::Default, false, &limits).unwrap();
        let f = Fixture {
            usage,
            mapping,
            material: Material::default(),
        };
        let text = defines(&plan(&f, ShaderStage::Fragment, ""), false);
        assert!(text.contains("#define LIGHTS 3\r\n"));
        // Sampler precision applies to textures only; framebuffers follow the shader.
        assert!(text.contains("#define T0PRECISION highp\r\n"));
        assert!(text.contains("#define T1TYPE sampler2D\r\n#define T1PRECISION mediump\r\n"));
    }

    #[test]
    fn includes_expand_one_level() {
        let r = MemoryResolver::new()
            .with(ResourceKind::Include, "a.glsl", "#include \"b.glsl\"\r\nA\r\n");
        let mut out = String::new();
        let saw = expand_includes(
            "x\r\n#include \"a.glsl\"\r\n  #include \"material\"\r\ny",
            ShaderStage::Fragment,
            "BODY\r\n",
            &r,
            &mut out,
        )
        .unwrap();
        assert!(saw);
        assert_eq!(out, "x\r\n#include \"b.glsl\"\r\nA\r\nBODY\r\ny");

        let mut vertex = String::new();
        expand_includes("#include \"material\"\n", ShaderStage::Vertex, "BODY", &r, &mut vertex)
            .unwrap();
        assert_eq!(vertex, "");

        let err = expand_includes("#include \"nope\"\n", ShaderStage::Vertex, "", &r, &mut String::new())
            .unwrap_err();
        assert_eq!(
            compile_error(&err),
            Some(&CompileError::MissingInclude {
                name: "nope".to_string()
            })
        );
    }

    struct Rejecting;

    impl ShaderOptimizer for Rejecting {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn optimize(&self, _source: &str, _stage: ShaderStage) -> std::result::Result<String, String> {
            Err("0:1: syntax error".to_string())
        }
    }

    struct Upper;

    impl ShaderOptimizer for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn optimize(&self, source: &str, _stage: ShaderStage) -> std::result::Result<String, String> {
            Ok(source.to_uppercase())
        }
    }

    #[test]
    fn optimizer_failure_persists_source_and_log() {
        let f = fixture();
        let config = CompilerConfig {
            prelude: vec!["Shader.glsl".to_string()],
            ..Default::default()
        };
        let resolver =
            MemoryResolver::new().with(ResourceKind::Include, "Shader.glsl", "#include \"material\"");
        let sink = MemoryArtifacts::new();
        let assembler = Assembler {
            config: &config,
            resolver: &resolver,
            optimizer: Some(&Rejecting),
            artifacts: Some(&sink),
        };
        let err = assembler
            .assemble(&plan(&f, ShaderStage::Fragment, "body"))
            .unwrap_err();
        assert!(matches!(
            compile_error(&err),
            Some(CompileError::OptimizerFailed { .. })
        ));
        let pre = sink.get("wall.0.pre.frag.glsl").unwrap();
        assert!(pre.contains("// Shader.glsl\r\nbody"));
        assert_eq!(sink.get("wall.0.frag.log").unwrap(), "0:1: syntax error");
        assert!(sink.get("wall.0.post.frag.glsl").is_none());
    }

    #[test]
    fn optimizer_success_and_bypass() {
        let f = fixture();
        let mut config = CompilerConfig {
            prelude: Vec::new(),
            gles: true,
            ..Default::default()
        };
        let resolver = MemoryResolver::new();
        let sink = MemoryArtifacts::new();
        let text = Assembler {
            config: &config,
            resolver: &resolver,
            optimizer: Some(&Upper),
            artifacts: Some(&sink),
        }
        .assemble(&plan(&f, ShaderStage::Vertex, "body"))
        .unwrap();
        assert!(text.starts_with("precision mediump float;\r\n#DEFINE VERTEX"));
        assert_eq!(sink.names().len(), 2);

        config.optimize = false;
        let plain = Assembler {
            config: &config,
            resolver: &resolver,
            optimizer: Some(&Upper),
            artifacts: None,
        }
        .assemble(&plan(&f, ShaderStage::Fragment, "body"))
        .unwrap();
        assert!(plain.starts_with("#define FRAGMENT"));
        // No material include in the prelude: the body is appended.
        assert!(plain.ends_with("body"));
    }
}

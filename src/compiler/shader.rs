//! Compiled shaders: per-pass graphs, usage and mappings, plus the queries and
//! code generation entry points built on top of them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use super::artifacts::{ArtifactSink, DirectoryArtifacts};
use super::assembler::{Assembler, AssemblyPlan};
use super::config::CompilerConfig;
use super::emit::{EmitContext, emit_functions, emit_shader};
use super::loader::{NodeRegistry, PassGraph, parse_shader_pass};
use super::mapping::{
    MaterialInputMappings, TexCoordMapping, build_input_mappings, material_input_mappings,
};
use super::material::Material;
use super::types::{GeometrySource, MaterialSource, OutputFlags, Pass, ShaderStage, SkinMode};
use super::usage::{Usage, gather_usage};
use super::validation::ShaderOptimizer;
use super::wire::{CookedPass, WireInputMappings, write_cooked};
use crate::asset_store::{ResourceKind, SourceResolver};
use crate::dsl::ShaderDocument;
use crate::graph::NodeType;

/// Backend tag written at the head of cooked output.
pub const COOKED_BACKEND_GLSL: u8 = 1;

/// Entry point name used for the emitted body.
pub const ENTRY_POINT: &str = "Diffuse";

/// Material properties that change how a shader compiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderVariant {
    pub skin_mode: SkinMode,
    pub gen_reflect: bool,
}

impl ShaderVariant {
    pub fn of(material: &Material) -> Self {
        Self {
            skin_mode: material.skin_mode,
            gen_reflect: material.gen_reflect(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledGraph {
    graph: PassGraph,
    usage: Usage,
    mapping: MaterialInputMappings,
}

/// A shader document resolved into per-pass graphs.
#[derive(Debug, Clone)]
pub struct Shader {
    name: String,
    document: ShaderDocument,
    variant: ShaderVariant,
    /// Templates referenced by nodes reachable from some pass, by type name.
    types: BTreeMap<String, Arc<NodeType>>,
    passes: BTreeMap<Pass, CompiledGraph>,
}

/// Mapping and final text for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPass {
    pub pass: Pass,
    pub outputs: OutputFlags,
    pub mapping: MaterialInputMappings,
    pub tex_coords: TexCoordMapping,
    pub vertex: String,
    pub fragment: String,
}

impl Shader {
    /// Resolves every pass of `document`. Fails if no pass populates an output slot.
    pub fn load(
        registry: &mut NodeRegistry,
        resolver: &dyn SourceResolver,
        document: ShaderDocument,
        variant: ShaderVariant,
        config: &CompilerConfig,
    ) -> Result<Shader> {
        let variant = ShaderVariant {
            skin_mode: if document.skin_mode == SkinMode::Sprite {
                SkinMode::Sprite
            } else {
                variant.skin_mode
            },
            ..variant
        };

        let mut types = BTreeMap::new();
        let mut passes = BTreeMap::new();
        for pass in Pass::all() {
            let Some(graph) = parse_shader_pass(registry, resolver, &document, pass)? else {
                continue;
            };
            let usage = gather_usage(&graph);
            let mapping = build_input_mappings(
                &usage,
                pass,
                variant.skin_mode,
                variant.gen_reflect,
                &config.limits,
            )
            .with_context(|| format!("shader '{}' pass {pass}", document.name))?;
            for id in graph.live_nodes() {
                let ty = &graph.graph.node(id).ty;
                types.insert(ty.name.clone(), ty.clone());
            }
            log::debug!(
                "[shader] {}: pass {pass} uses {} texture(s), {} attribute array(s)",
                document.name,
                mapping.textures.len(),
                mapping.attributes.len()
            );
            passes.insert(
                pass,
                CompiledGraph {
                    graph,
                    usage,
                    mapping,
                },
            );
        }

        if passes.is_empty() {
            bail!("shader '{}' does not define any pass", document.name);
        }
        log::info!(
            "[shader] loaded {} ({} pass(es), {} node type(s))",
            document.name,
            passes.len(),
            types.len()
        );
        Ok(Shader {
            name: document.name.clone(),
            document,
            variant,
            types,
            passes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &ShaderDocument {
        &self.document
    }

    pub fn variant(&self) -> ShaderVariant {
        self.variant
    }

    pub fn skin_mode(&self) -> SkinMode {
        self.variant.skin_mode
    }

    pub fn node_types(&self) -> impl Iterator<Item = &Arc<NodeType>> {
        self.types.values()
    }

    pub fn exists(&self, pass: Pass) -> bool {
        self.passes.contains_key(&pass)
    }

    /// Existing passes in index order.
    pub fn passes(&self) -> impl Iterator<Item = Pass> + '_ {
        self.passes.keys().copied()
    }

    pub fn pass_graph(&self, pass: Pass) -> Option<&PassGraph> {
        self.passes.get(&pass).map(|p| &p.graph)
    }

    pub fn pass_outputs(&self, pass: Pass) -> OutputFlags {
        self.passes
            .get(&pass)
            .map_or(OutputFlags::NONE, |p| p.graph.output_flags())
    }

    pub fn usage(&self, pass: Pass) -> Option<&Usage> {
        self.passes.get(&pass).map(|p| &p.usage)
    }

    /// Number of distinct indices of `source` the pass references.
    pub fn material_source_usage(&self, pass: Pass, source: MaterialSource) -> usize {
        self.usage(pass).map_or(0, |u| u.count(source))
    }

    /// Referenced indices of a vertex-stream source, without forced entries.
    pub fn attribute_usage(&self, pass: Pass, source: GeometrySource) -> BTreeSet<u8> {
        let Some(usage) = self.usage(pass) else {
            return BTreeSet::new();
        };
        let material_source = match source {
            GeometrySource::Vertices => MaterialSource::Vertex,
            GeometrySource::Normals => MaterialSource::Normal,
            GeometrySource::Tangents => MaterialSource::Tangent,
            GeometrySource::TexCoords => MaterialSource::TexCoord,
            GeometrySource::VertexColor => MaterialSource::VertexColor,
            GeometrySource::SpriteSkin => MaterialSource::SpriteSkin,
        };
        usage.indices(material_source).clone()
    }

    fn compiled(&self, pass: Pass) -> Result<&CompiledGraph> {
        match self.passes.get(&pass) {
            Some(p) => Ok(p),
            None => bail!("shader '{}' has no pass {pass}", self.name),
        }
    }

    /// The pass mapping extended with the material's texcoord registers.
    pub fn input_mappings(
        &self,
        material: &Material,
        pass: Pass,
        config: &CompilerConfig,
    ) -> Result<(MaterialInputMappings, TexCoordMapping)> {
        let p = self.compiled(pass)?;
        material_input_mappings(&p.mapping, &p.usage, material, &config.limits)
            .with_context(|| format!("shader '{}' pass {pass}", self.name))
    }

    /// Function text of every node type the shader uses.
    pub fn emit_functions(&self, resolver: &dyn SourceResolver, out: &mut String) -> Result<()> {
        emit_functions(&self.types, resolver, out)
    }

    /// Emits the entry point of `pass` for `material`.
    pub fn emit_shader(
        &self,
        entry: &str,
        pass: Pass,
        material: &Material,
        config: &CompilerConfig,
        out: &mut String,
    ) -> Result<()> {
        let p = self.compiled(pass)?;
        let (mapping, tex_coords) = self.input_mappings(material, pass, config)?;
        emit_shader(
            entry,
            EmitContext {
                pass: &p.graph,
                usage: &p.usage,
                mapping: &mapping,
                tex_coords: &tex_coords,
            },
            out,
        )
        .with_context(|| format!("shader '{}' pass {pass}", self.name))
    }
}

/// Owns the node registry and the collaborators shared by every shader it compiles.
pub struct Compiler {
    config: CompilerConfig,
    resolver: Box<dyn SourceResolver>,
    registry: NodeRegistry,
    optimizer: Option<Box<dyn ShaderOptimizer>>,
    artifacts: Option<Box<dyn ArtifactSink>>,
}

impl Compiler {
    /// No optimizer is attached; artifacts go to `config.artifact_dir` when set.
    pub fn new(config: CompilerConfig, resolver: impl SourceResolver + 'static) -> Self {
        let artifacts = config
            .artifact_dir
            .clone()
            .map(|dir| Box::new(DirectoryArtifacts::new(dir)) as Box<dyn ArtifactSink>);
        Self {
            config,
            resolver: Box::new(resolver),
            registry: NodeRegistry::new(),
            optimizer: None,
            artifacts,
        }
    }

    pub fn with_optimizer(mut self, optimizer: impl ShaderOptimizer + 'static) -> Self {
        self.optimizer = Some(Box::new(optimizer));
        self
    }

    pub fn with_artifacts(mut self, sink: impl ArtifactSink + 'static) -> Self {
        self.artifacts = Some(Box::new(sink));
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn resolver(&self) -> &dyn SourceResolver {
        self.resolver.as_ref()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn load_document(&mut self, document: ShaderDocument, variant: ShaderVariant) -> Result<Shader> {
        Shader::load(
            &mut self.registry,
            self.resolver.as_ref(),
            document,
            variant,
            &self.config,
        )
    }

    /// Loads `<name>.shader` through the resolver.
    pub fn load_shader(&mut self, name: &str, variant: ShaderVariant) -> Result<Shader> {
        let Some(text) = self.resolver.resolve(ResourceKind::Shader, name)? else {
            bail!(
                "failed to load shader '{name}' ({} not found)",
                self.resolver.describe(ResourceKind::Shader, name)
            );
        };
        let document = ShaderDocument::from_json_str(&text)
            .with_context(|| self.resolver.describe(ResourceKind::Shader, name))?;
        self.load_document(document, variant)
    }

    fn assembler(&self) -> Assembler<'_> {
        Assembler {
            config: &self.config,
            resolver: self.resolver.as_ref(),
            optimizer: self.optimizer.as_deref(),
            artifacts: self.artifacts.as_deref(),
        }
    }

    /// Emits, assembles and optionally optimizes both stages of `pass`.
    pub fn compile_pass(&self, shader: &Shader, pass: Pass, material: &Material) -> Result<CompiledPass> {
        let p = shader.compiled(pass)?;
        let (mapping, tex_coords) = shader.input_mappings(material, pass, &self.config)?;

        let mut material_text = String::new();
        shader.emit_functions(self.resolver.as_ref(), &mut material_text)?;
        emit_shader(
            ENTRY_POINT,
            EmitContext {
                pass: &p.graph,
                usage: &p.usage,
                mapping: &mapping,
                tex_coords: &tex_coords,
            },
            &mut material_text,
        )
        .with_context(|| format!("shader '{}' pass {pass}", shader.name))?;

        let document = &shader.document;
        let sampler_precision = |index: u8| document.sampler_precision(index);
        let assembler = self.assembler();
        let stage_text = |stage: ShaderStage| {
            assembler.assemble(&AssemblyPlan {
                shader: &shader.name,
                pass,
                stage,
                precision: document.precision,
                skin_mode: shader.variant.skin_mode,
                gen_reflect: shader.variant.gen_reflect,
                usage: &p.usage,
                mapping: &mapping,
                material,
                sampler_precision: &sampler_precision,
                material_text: &material_text,
            })
        };
        let vertex = stage_text(ShaderStage::Vertex)?;
        let fragment = stage_text(ShaderStage::Fragment)?;

        log::debug!(
            "[shader] compiled {} pass {pass} ({} + {} bytes)",
            shader.name,
            vertex.len(),
            fragment.len()
        );
        Ok(CompiledPass {
            pass,
            outputs: p.graph.output_flags(),
            mapping,
            tex_coords,
            vertex,
            fragment,
        })
    }

    /// Compiles every existing pass except `Preview` and serializes the result.
    pub fn cook_shader(&self, shader: &Shader, material: &Material) -> Result<Vec<u8>> {
        let mut cooked = Vec::new();
        for pass in shader.passes().filter(|p| *p != Pass::Preview) {
            let compiled = self.compile_pass(shader, pass, material)?;
            cooked.push(CookedPass {
                pass,
                outputs: compiled.outputs,
                mappings: WireInputMappings::from_mappings(&compiled.mapping)?,
                vertex: compiled.vertex,
                fragment: compiled.fragment,
            });
        }
        write_cooked(COOKED_BACKEND_GLSL, &cooked)
    }
}

/// Compiled shaders shared by name and variant.
#[derive(Debug, Default)]
pub struct ShaderCache {
    shaders: HashMap<(String, ShaderVariant), Arc<Shader>>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    pub fn get(&self, name: &str, variant: ShaderVariant) -> Option<Arc<Shader>> {
        self.shaders.get(&(name.to_string(), variant)).cloned()
    }

    /// Returns the cached shader for `(name, material variant)`, loading it on first use.
    /// Failed loads are not cached.
    pub fn load(&mut self, compiler: &mut Compiler, name: &str, material: &Material) -> Result<Arc<Shader>> {
        let variant = ShaderVariant::of(material);
        let key = (name.to_string(), variant);
        if let Some(shader) = self.shaders.get(&key) {
            return Ok(shader.clone());
        }
        let shader = Arc::new(compiler.load_shader(name, variant)?);
        self.shaders.insert(key, shader.clone());
        Ok(shader)
    }

    pub fn clear(&mut self) {
        self.shaders.clear();
    }
}

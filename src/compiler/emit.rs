//! Code emission: one function call per node, inputs first, sequential temporaries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Result, anyhow};

use super::error::CompileError;
use super::loader::PassGraph;
use super::mapping::{MaterialInputMappings, TexCoordMapping};
use super::types::{MaterialSource, OutputFlags, ShaderOutput, TextureSource};
use super::usage::Usage;
use crate::asset_store::{ResourceKind, SourceResolver};
use crate::graph::{Binding, Leaf, NodeId, NodeType, OutputRef, RETURN_REGISTER};

/// Everything the emitter reads for one pass.
#[derive(Clone, Copy)]
pub struct EmitContext<'a> {
    pub pass: &'a PassGraph,
    pub usage: &'a Usage,
    pub mapping: &'a MaterialInputMappings,
    pub tex_coords: &'a TexCoordMapping,
}

fn temp(n: usize) -> String {
    format!("r{n:03}")
}

fn ordinal(set: &std::collections::BTreeSet<u8>, index: u8) -> Option<usize> {
    set.iter().position(|&i| i == index)
}

impl EmitContext<'_> {
    /// Text substituted for a leaf binding.
    pub fn material_input(&self, leaf: Leaf) -> Result<String> {
        let i = leaf.index;
        let unmapped = || anyhow!("{} {} has no mapped slot", leaf.source, i);
        let attrib = |source: MaterialSource| {
            ordinal(self.usage.indices(source), i).ok_or_else(unmapped)
        };
        Ok(match leaf.source {
            MaterialSource::Texture => format!(
                "UNIFORM(t{})",
                self.mapping
                    .texture_unit(TextureSource::Texture, i)
                    .ok_or_else(unmapped)?
            ),
            MaterialSource::Framebuffer => format!(
                "UNIFORM(t{})",
                self.mapping
                    .texture_unit(TextureSource::Framebuffer, i)
                    .ok_or_else(unmapped)?
            ),
            MaterialSource::Color => "U_color".to_string(),
            MaterialSource::SpecularColor => "U_scolor".to_string(),
            MaterialSource::SpecularExponent => "U_scolor.w".to_string(),
            MaterialSource::LightDiffuseColor => format!("UNIFORM(light{i}_diffuseColor)"),
            MaterialSource::LightSpecularColor => format!("UNIFORM(light{i}_specularColor)"),
            MaterialSource::LightPos => format!("UNIFORM(light{i}_pos)"),
            MaterialSource::LightVec => format!("normalize(IN(light{i}_vec))"),
            MaterialSource::LightHalfVec => format!("normalize(IN(light{i}_halfvec))"),
            MaterialSource::LightVertex => format!("IN(light{i}_vpos)"),
            MaterialSource::LightTanVec => format!("normalize(IN(light{i}_tanvec))"),
            MaterialSource::LightTanHalfVec => format!("normalize(IN(light{i}_tanhalfvec))"),
            MaterialSource::Vertex => "IN(position)".to_string(),
            MaterialSource::Normal => format!("normalize(IN(nm{}))", attrib(MaterialSource::Normal)?),
            MaterialSource::Tangent => format!("IN(tan{})", attrib(MaterialSource::Tangent)?),
            MaterialSource::Bitangent => format!("IN(bitan{})", attrib(MaterialSource::Bitangent)?),
            MaterialSource::TexCoord => format!(
                "IN(tc{})",
                self.tex_coords.register_for(i).ok_or_else(unmapped)?
            ),
            MaterialSource::VertexColor => {
                format!("IN(vertexColor{})", attrib(MaterialSource::VertexColor)?)
            }
            MaterialSource::SpriteSkin => {
                return Err(CompileError::UnaddressableSource {
                    material_source: leaf.source,
                }
                .into());
            }
        })
    }
}

struct Emitter<'a, 'o> {
    ctx: EmitContext<'a>,
    out: &'o mut String,
    vars: HashMap<OutputRef, usize>,
    emitted: HashSet<NodeId>,
    in_progress: HashSet<NodeId>,
    next: usize,
}

impl Emitter<'_, '_> {
    fn emit_node(&mut self, id: NodeId) -> Result<()> {
        if self.emitted.contains(&id) {
            return Ok(());
        }
        let ctx = self.ctx;
        let graph = &ctx.pass.graph;
        let node = graph.node(id);
        if !self.in_progress.insert(id) {
            return Err(CompileError::RecursiveNode {
                node: node.name.clone(),
            }
            .into());
        }

        for (i, b) in node.inputs.iter().enumerate() {
            match *b {
                Binding::Output(src) => self.emit_node(src.node)?,
                Binding::Leaf(_) => {}
                Binding::Unbound => {
                    return Err(CompileError::UnboundInput {
                        node: node.name.clone(),
                        node_type: node.ty.name.clone(),
                        input: node.input_connection(i).name.clone(),
                    }
                    .into());
                }
            }
        }

        // Arguments ordered by register; outputs win a register collision.
        let mut args: BTreeMap<i32, String> = BTreeMap::new();
        let mut ret: Option<usize> = None;
        for (o, conn) in node.ty.outputs.iter().enumerate() {
            let n = self.next;
            self.next += 1;
            self.vars.insert(OutputRef { node: id, output: o }, n);
            if conn.register == RETURN_REGISTER {
                ret = Some(n);
            } else {
                args.insert(conn.register, temp(n));
            }
            write!(self.out, "\t{} {};\r\n", conn.ty.macro_name(), temp(n))?;
        }

        for (i, b) in node.inputs.iter().enumerate() {
            let arg = match *b {
                Binding::Output(src) => {
                    let n = self
                        .vars
                        .get(&src)
                        .ok_or_else(|| anyhow!("output of '{}' used before emission", graph.node(src.node).name))?;
                    temp(*n)
                }
                Binding::Leaf(leaf) => self.ctx.material_input(leaf)?,
                Binding::Unbound => continue,
            };
            args.entry(node.input_connection(i).register).or_insert(arg);
        }

        self.out.push('\t');
        if let Some(n) = ret {
            write!(self.out, "{} = ", temp(n))?;
        }
        let joined = args.into_values().collect::<Vec<_>>().join(", ");
        let function = node.ty.function_name();
        if node.ty.alias.is_some() {
            write!(self.out, "{function}({joined});\r\n")?;
        } else {
            write!(self.out, "{function}({joined} P_GLOBALS);\r\n")?;
        }

        self.in_progress.remove(&id);
        self.emitted.insert(id);
        Ok(())
    }

    fn emit_output(&mut self, output: ShaderOutput, field: &str) -> Result<()> {
        match self.ctx.pass.output(output) {
            Binding::Unbound => Ok(()),
            Binding::Leaf(leaf) => {
                let expr = self.ctx.material_input(leaf)?;
                write!(self.out, "\tR.{field} = {expr};\r\n")?;
                Ok(())
            }
            Binding::Output(o) => {
                self.emit_node(o.node)?;
                let n = self
                    .vars
                    .get(&o)
                    .copied()
                    .ok_or_else(|| anyhow!("output slot {} was not emitted", output.key()))?;
                write!(self.out, "\tR.{field} = {};\r\n", temp(n))?;
                Ok(())
            }
        }
    }
}

/// Emits `M <entry>(VOID_GLOBALS) { ... }` for the pass in `ctx`.
pub fn emit_shader(entry: &str, ctx: EmitContext<'_>, out: &mut String) -> Result<()> {
    write!(out, "M {entry}(VOID_GLOBALS)\r\n{{\r\n\tM R;\r\n")?;

    let flags = ctx.pass.output_flags();
    let alpha = flags.contains(OutputFlags::ALPHA);
    let mut e = Emitter {
        ctx,
        out: &mut *out,
        vars: HashMap::new(),
        emitted: HashSet::new(),
        in_progress: HashSet::new(),
        next: 0,
    };

    if flags.contains(OutputFlags::COLOR) {
        e.emit_output(ShaderOutput::Color, if alpha { "color.xyz" } else { "color" })?;
    } else {
        e.out
            .push_str("\tR.color = PRECISION_COLOR_TYPE(1.0, 1.0, 1.0, 1.0);\r\n");
    }
    if alpha {
        e.emit_output(ShaderOutput::Alpha, "color.w")?;
    }
    if flags.contains(OutputFlags::DEPTH) {
        e.emit_output(ShaderOutput::Depth, "depth")?;
    }

    out.push_str("\treturn R;\r\n}\r\n");
    Ok(())
}

/// Concatenates `Nodes/<T>.code` for every non-aliased type, in name order.
pub fn emit_functions(
    types: &BTreeMap<String, Arc<NodeType>>,
    resolver: &dyn SourceResolver,
    out: &mut String,
) -> Result<()> {
    for (name, ty) in types {
        if ty.alias.is_some() {
            continue;
        }
        let Some(code) = resolver.resolve(ResourceKind::NodeCode, name)? else {
            return Err(CompileError::MissingInclude {
                name: resolver.describe(ResourceKind::NodeCode, name),
            }
            .into());
        };
        write!(out, "// Nodes/{name}.code\r\n{code}\r\n")?;
    }
    Ok(())
}

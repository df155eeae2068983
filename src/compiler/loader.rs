//! Graph loading: node-type registry plus per-pass graph resolution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use super::error::CompileError;
use super::types::{OutputFlags, Pass, ShaderOutput};
use crate::asset_store::{ResourceKind, SourceResolver};
use crate::dsl::{BindingDesc, BindingRef, RETURN_OUTPUT, ShaderDocument};
use crate::graph::{Binding, Graph, InputRef, NodeId, NodeType, OutputRef, RETURN_REGISTER};
use crate::schema::parse_node_type;

/// Lazily populated cache of node-type templates keyed by type name.
///
/// Not designed for concurrent mutation; give each thread its own registry.
#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    types: HashMap<String, Arc<NodeType>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registers a template directly, replacing any cached one.
    pub fn insert(&mut self, ty: NodeType) -> Arc<NodeType> {
        let ty = Arc::new(ty);
        self.types.insert(ty.name.clone(), ty.clone());
        ty
    }

    pub fn get(&self, name: &str) -> Option<Arc<NodeType>> {
        self.types.get(name).cloned()
    }

    /// Returns the template for `name`, parsing `Nodes/<name>.node` on first reference.
    pub fn load_node(&mut self, name: &str, resolver: &dyn SourceResolver) -> Result<Arc<NodeType>> {
        if let Some(ty) = self.types.get(name) {
            return Ok(ty.clone());
        }
        let Some(text) = resolver.resolve(ResourceKind::NodeType, name)? else {
            return Err(CompileError::UnknownNodeType {
                node_type: name.to_string(),
                context: format!("{} not found", resolver.describe(ResourceKind::NodeType, name)),
            }
            .into());
        };
        let ty = parse_node_type(name, &text)
            .with_context(|| resolver.describe(ResourceKind::NodeType, name))?;
        log::debug!(
            "[loader] loaded node type {name} ({} inputs, {} outputs)",
            ty.inputs.len(),
            ty.outputs.len()
        );
        Ok(self.insert(ty))
    }
}

/// The resolved graph of one render pass with its color/alpha/depth bindings.
#[derive(Debug, Clone)]
pub struct PassGraph {
    pub pass: Pass,
    pub graph: Graph,
    /// Indexed by [`ShaderOutput`]; `Unbound` marks an absent slot.
    pub outputs: [Binding; 3],
}

impl PassGraph {
    pub fn output(&self, output: ShaderOutput) -> Binding {
        self.outputs[output as usize]
    }

    pub fn output_flags(&self) -> OutputFlags {
        let mut flags = OutputFlags::NONE;
        for o in ShaderOutput::ALL {
            if self.output(o) != Binding::Unbound {
                flags.insert(o.flag());
            }
        }
        flags
    }

    /// Nodes reachable from any populated output slot.
    pub fn live_nodes(&self) -> HashSet<NodeId> {
        let mut live = HashSet::new();
        for b in self.outputs {
            if let Binding::Output(o) = b {
                live.extend(self.graph.upstream_reachable(o.node));
            }
        }
        live
    }
}

/// Resolves the description of `pass` into a [`PassGraph`].
///
/// Returns `Ok(None)` when the document has no description for the pass or the description
/// populates none of the output slots.
pub fn parse_shader_pass(
    registry: &mut NodeRegistry,
    resolver: &dyn SourceResolver,
    doc: &ShaderDocument,
    pass: Pass,
) -> Result<Option<PassGraph>> {
    let Some(desc) = doc.pass(pass) else {
        return Ok(None);
    };
    if desc.is_empty() {
        log::debug!("[loader] {}: pass {pass} populates no outputs", doc.name);
        return Ok(None);
    }

    let mut graph = Graph::new();
    for (name, node) in &doc.nodes {
        let ty = registry
            .load_node(&node.node_type, resolver)
            .with_context(|| format!("node '{name}' of shader '{}'", doc.name))?;
        graph.instantiate(name.clone(), ty);
    }

    let mut loader = PassLoader {
        doc,
        graph,
        resolving: HashSet::new(),
        done: HashSet::new(),
    };

    let mut outputs = [Binding::Unbound; 3];
    for output in ShaderOutput::ALL {
        let Some(slot) = desc.slot(output) else {
            continue;
        };
        let context = format!("{pass}.{}", output.key());
        let binding = loader
            .resolve_binding(slot, &context)
            .with_context(|| format!("shader '{}' pass {pass}", doc.name))?;
        if let Binding::Output(o) = binding {
            let conn = loader.graph.node(o.node).output_connection(o.output);
            if conn.ty.is_sampler() {
                return Err(anyhow::Error::new(CompileError::InvalidOutput {
                    pass: pass.to_string(),
                    output: output.key().to_string(),
                })
                .context(format!("shader '{}'", doc.name)));
            }
        }
        debug_assert!(loader.resolving.is_empty());
        outputs[output as usize] = binding;
    }

    Ok(Some(PassGraph {
        pass,
        graph: loader.graph,
        outputs,
    }))
}

struct PassLoader<'a> {
    doc: &'a ShaderDocument,
    graph: Graph,
    /// Nodes whose inputs are currently being resolved by an ancestor call.
    resolving: HashSet<NodeId>,
    done: HashSet<NodeId>,
}

impl PassLoader<'_> {
    fn resolve_binding(&mut self, desc: &BindingDesc, context: &str) -> Result<Binding> {
        match desc.classify(context)? {
            BindingRef::Leaf(leaf) => Ok(Binding::Leaf(leaf)),
            BindingRef::Node { node, output } => {
                let id = self.graph.find_node(node).ok_or_else(|| {
                    anyhow!(CompileError::MalformedBinding {
                        context: context.to_string(),
                        reason: format!("no node named '{node}'"),
                    })
                })?;
                let ty = self.graph.node(id).ty.clone();
                let index = if output == RETURN_OUTPUT {
                    ty.find_output_register(RETURN_REGISTER).ok_or_else(|| {
                        anyhow!(CompileError::MissingReturnRegister {
                            node: node.to_string(),
                        })
                    })?
                } else {
                    ty.find_output(output).ok_or_else(|| {
                        anyhow!(CompileError::MissingOutput {
                            node: node.to_string(),
                            output: output.to_string(),
                        })
                    })?
                };
                self.resolve_node(id)?;
                Ok(Binding::Output(OutputRef { node: id, output: index }))
            }
        }
    }

    fn resolve_node(&mut self, id: NodeId) -> Result<()> {
        if self.done.contains(&id) {
            return Ok(());
        }
        let name = self.graph.node(id).name.clone();
        if !self.resolving.insert(id) {
            return Err(CompileError::RecursiveNode { node: name }.into());
        }

        let ty = self.graph.node(id).ty.clone();
        let doc = self.doc;
        let desc = doc
            .nodes
            .get(&name)
            .ok_or_else(|| anyhow!("node '{name}' vanished from shader '{}'", doc.name))?;

        if let Some(unknown) = desc.inputs.keys().find(|k| ty.find_input(k).is_none()) {
            return Err(CompileError::UnknownInput {
                node: name,
                input: unknown.clone(),
            }
            .into());
        }

        for (index, conn) in ty.inputs.iter().enumerate() {
            let Some(input_desc) = desc.inputs.get(&conn.name) else {
                return Err(CompileError::MissingInput {
                    node: name,
                    node_type: ty.name.clone(),
                    input: conn.name.clone(),
                }
                .into());
            };
            let binding = self.resolve_binding(input_desc, &format!("{name}.{}", conn.name))?;
            let input = InputRef { node: id, input: index };
            match binding {
                Binding::Output(src) => self.graph.connect(src, input)?,
                Binding::Leaf(leaf) => self.graph.bind_leaf(input, leaf)?,
                Binding::Unbound => {}
            }
        }

        self.resolving.remove(&id);
        self.done.insert(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_store::MemoryResolver;
    use crate::compiler::error::compile_error;
    use crate::compiler::types::MaterialSource;
    use crate::graph::Leaf;

    const MUL: &str = r#"{
        "Inputs": { "a": { "t": "FLOAT4", "r": 0 }, "b": { "t": "FLOAT4", "r": 1 } },
        "Outputs": { "r": { "t": "FLOAT4", "r": -1 } }
    }"#;

    fn resolver() -> MemoryResolver {
        MemoryResolver::new()
            .with(ResourceKind::NodeType, "Mul", MUL)
            .with(
                ResourceKind::NodeType,
                "Sampler",
                r#"{ "Outputs": { "s": { "t": "sampler2D", "r": 0 } } }"#,
            )
    }

    fn load(doc: &str, pass: Pass) -> Result<Option<PassGraph>> {
        let doc = ShaderDocument::from_json_str(doc)?;
        let mut registry = NodeRegistry::new();
        parse_shader_pass(&mut registry, &resolver(), &doc, pass)
    }

    #[test]
    fn registry_caches_templates() {
        let r = resolver();
        let mut registry = NodeRegistry::new();
        let a = registry.load_node("Mul", &r).unwrap();
        r.remove(ResourceKind::NodeType, "Mul");
        let b = registry.load_node("Mul", &r).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        let err = registry.load_node("Nope", &r).unwrap_err();
        assert!(matches!(
            compile_error(&err),
            Some(CompileError::UnknownNodeType { .. })
        ));
    }

    #[test]
    fn resolves_shared_node_once() {
        let pg = load(
            r#"{
                "name": "s",
                "nodes": {
                    "base": { "type": "Mul", "in": { "a": { "source": "texture" },
                                                     "b": { "source": "color" } } },
                    "top": { "type": "Mul", "in": { "a": { "node": "base" },
                                                    "b": { "node": "base" } } }
                },
                "passes": { "Default": { "color": { "node": "top" },
                                         "alpha": { "source": "vertex_color" } } }
            }"#,
            Pass::Default,
        )
        .unwrap()
        .unwrap();

        assert_eq!(pg.output_flags().0, 3);
        let base = pg.graph.find_node("base").unwrap();
        assert_eq!(pg.graph.consumers(OutputRef { node: base, output: 0 }).count(), 2);
        assert_eq!(
            pg.graph.binding(InputRef { node: base, input: 0 }),
            Binding::Leaf(Leaf::new(MaterialSource::Texture, 0))
        );
        assert_eq!(pg.live_nodes().len(), 2);
    }

    #[test]
    fn cycle_is_rejected() {
        let err = load(
            r#"{
                "name": "s",
                "nodes": {
                    "a": { "type": "Mul", "in": { "a": { "node": "b" }, "b": { "source": "color" } } },
                    "b": { "type": "Mul", "in": { "a": { "node": "a" }, "b": { "source": "color" } } }
                },
                "passes": { "Default": { "color": { "node": "a" } } }
            }"#,
            Pass::Default,
        )
        .unwrap_err();
        assert!(matches!(
            compile_error(&err),
            Some(CompileError::RecursiveNode { .. })
        ));
    }

    #[test]
    fn absent_and_empty_passes_yield_none() {
        let doc = r#"{ "name": "s", "passes": { "Default": {} } }"#;
        assert!(load(doc, Pass::Default).unwrap().is_none());
        assert!(load(doc, Pass::Fullbright).unwrap().is_none());
    }

    #[test]
    fn description_errors() {
        let cases = [
            (
                r#"{ "a": { "source": "color" } }"#,
                "missing input",
            ),
            (
                r#"{ "a": { "source": "color" }, "b": { "source": "color" }, "c": { "source": "color" } }"#,
                "unknown input",
            ),
            (
                r#"{ "a": { "node": "m", "output": "zz" }, "b": { "source": "color" } }"#,
                "missing output",
            ),
        ];
        for (inputs, what) in cases {
            let doc = format!(
                r#"{{ "name": "s",
                     "nodes": {{ "m": {{ "type": "Mul", "in": {{ "a": {{ "source": "color" }}, "b": {{ "source": "color" }} }} }},
                                 "n": {{ "type": "Mul", "in": {inputs} }} }},
                     "passes": {{ "Default": {{ "color": {{ "node": "n" }} }} }} }}"#
            );
            let err = load(&doc, Pass::Default).unwrap_err();
            let ce = compile_error(&err).unwrap();
            let ok = match what {
                "missing input" => matches!(ce, CompileError::MissingInput { .. }),
                "unknown input" => matches!(ce, CompileError::UnknownInput { .. }),
                _ => matches!(ce, CompileError::MissingOutput { .. }),
            };
            assert!(ok, "{what}: {err:#}");
        }
    }

    #[test]
    fn sampler_output_in_slot_is_invalid() {
        let err = load(
            r#"{ "name": "s", "nodes": { "t": { "type": "Sampler" } },
                 "passes": { "Default": { "color": { "node": "t", "output": "s" } } } }"#,
            Pass::Default,
        )
        .unwrap_err();
        assert!(matches!(
            compile_error(&err),
            Some(CompileError::InvalidOutput { .. })
        ));
    }

    #[test]
    fn missing_return_register() {
        let err = load(
            r#"{ "name": "s", "nodes": { "t": { "type": "Sampler" } },
                 "passes": { "Default": { "color": { "node": "t" } } } }"#,
            Pass::Default,
        )
        .unwrap_err();
        assert!(matches!(
            compile_error(&err),
            Some(CompileError::MissingReturnRegister { .. })
        ));
    }
}

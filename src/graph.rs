//! Typed node-graph IR.
//!
//! Node types are immutable templates shared through `Arc`; a [`Graph`] holds lightweight
//! instances that reference a template and carry only their wiring.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};

use crate::compiler::types::{BasicType, MaterialSource};

/// Register tag of the designated return output.
pub const RETURN_REGISTER: i32 = -1;

/// Pin metadata shared by inputs and outputs of a node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub name: String,
    pub ty: BasicType,
    /// Output field written when the pin feeds a final shader result.
    pub semantic: Option<String>,
    /// Argument position for inputs; `RETURN_REGISTER` marks the return output.
    pub register: i32,
}

/// Immutable node-type template loaded from a node description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeType {
    pub name: String,
    pub inputs: Vec<Connection>,
    pub outputs: Vec<Connection>,
    /// Alternate emitted function name; aliased types have no standalone function.
    pub alias: Option<String>,
}

impl NodeType {
    pub fn find_input(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|c| c.name == name)
    }

    pub fn find_output(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|c| c.name == name)
    }

    pub fn find_output_register(&self, register: i32) -> Option<usize> {
        self.outputs.iter().position(|c| c.register == register)
    }

    /// The name the emitter calls.
    pub fn function_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputRef {
    pub node: NodeId,
    pub output: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputRef {
    pub node: NodeId,
    pub input: usize,
}

/// Leaf binding to an engine-supplied value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Leaf {
    pub source: MaterialSource,
    pub index: u8,
}

impl Leaf {
    pub fn new(source: MaterialSource, index: u8) -> Self {
        Self { source, index }
    }
}

/// What an input is wired to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Binding {
    #[default]
    Unbound,
    Leaf(Leaf),
    Output(OutputRef),
}

/// One instantiation of a node type inside a graph.
#[derive(Debug, Clone)]
pub struct NodeInstance {
    pub name: String,
    pub ty: Arc<NodeType>,
    pub inputs: Vec<Binding>,
    /// Per output: inputs currently wired to it.
    consumers: Vec<BTreeSet<InputRef>>,
}

impl NodeInstance {
    pub fn input_connection(&self, input: usize) -> &Connection {
        &self.ty.inputs[input]
    }

    pub fn output_connection(&self, output: usize) -> &Connection {
        &self.ty.outputs[output]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<NodeInstance>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Creates an unwired instance of `ty`.
    pub fn instantiate(&mut self, name: impl Into<String>, ty: Arc<NodeType>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeInstance {
            name: name.into(),
            inputs: vec![Binding::Unbound; ty.inputs.len()],
            consumers: vec![BTreeSet::new(); ty.outputs.len()],
            ty,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &NodeInstance {
        &self.nodes[id.0]
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    pub fn binding(&self, input: InputRef) -> Binding {
        self.nodes[input.node.0].inputs[input.input]
    }

    pub fn consumers(&self, output: OutputRef) -> impl Iterator<Item = InputRef> + '_ {
        self.nodes[output.node.0].consumers[output.output].iter().copied()
    }

    fn check_input(&self, input: InputRef) -> Result<()> {
        let node = self
            .nodes
            .get(input.node.0)
            .ok_or_else(|| anyhow!("node not found: {:?}", input.node))?;
        if input.input >= node.inputs.len() {
            bail!("node {} has no input #{}", node.name, input.input);
        }
        Ok(())
    }

    fn check_output(&self, output: OutputRef) -> Result<()> {
        let node = self
            .nodes
            .get(output.node.0)
            .ok_or_else(|| anyhow!("node not found: {:?}", output.node))?;
        if output.output >= node.consumers.len() {
            bail!("node {} has no output #{}", node.name, output.output);
        }
        Ok(())
    }

    /// Wires `output` into `input`, replacing whatever the input was bound to.
    pub fn connect(&mut self, output: OutputRef, input: InputRef) -> Result<()> {
        self.check_output(output)?;
        self.check_input(input)?;
        self.disconnect(input);
        self.nodes[input.node.0].inputs[input.input] = Binding::Output(output);
        self.nodes[output.node.0].consumers[output.output].insert(input);
        Ok(())
    }

    /// Binds `input` directly to a material source.
    pub fn bind_leaf(&mut self, input: InputRef, leaf: Leaf) -> Result<()> {
        self.check_input(input)?;
        self.disconnect(input);
        self.nodes[input.node.0].inputs[input.input] = Binding::Leaf(leaf);
        Ok(())
    }

    /// Leaves `input` unbound.
    pub fn disconnect(&mut self, input: InputRef) {
        let Some(node) = self.nodes.get_mut(input.node.0) else {
            return;
        };
        let Some(slot) = node.inputs.get_mut(input.input) else {
            return;
        };
        let previous = std::mem::take(slot);
        if let Binding::Output(src) = previous {
            self.nodes[src.node.0].consumers[src.output].remove(&input);
        }
    }

    /// Unbinds every input fed by `output`.
    pub fn disconnect_all(&mut self, output: OutputRef) {
        let Some(set) = self
            .nodes
            .get_mut(output.node.0)
            .and_then(|n| n.consumers.get_mut(output.output))
        else {
            return;
        };
        for input in std::mem::take(set) {
            self.nodes[input.node.0].inputs[input.input] = Binding::Unbound;
        }
    }

    /// Nodes reachable from `start` by following input edges (including `start`).
    pub fn upstream_reachable(&self, start: NodeId) -> HashSet<NodeId> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = vec![start];
        while let Some(n) = stack.pop() {
            if !visited.insert(n) {
                continue;
            }
            for b in &self.nodes[n.0].inputs {
                if let Binding::Output(src) = b {
                    stack.push(src.node);
                }
            }
        }
        visited
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    pub fn conn(name: &str, ty: BasicType, register: i32) -> Connection {
        Connection {
            name: name.to_string(),
            ty,
            semantic: None,
            register,
        }
    }

    /// `name(a, b) -> r` with float4 pins.
    pub fn binary_type(name: &str) -> Arc<NodeType> {
        Arc::new(NodeType {
            name: name.to_string(),
            inputs: vec![
                conn("a", BasicType::Float4, 0),
                conn("b", BasicType::Float4, 1),
            ],
            outputs: vec![conn("r", BasicType::Float4, RETURN_REGISTER)],
            alias: None,
        })
    }
}

//! Per-pass usage analysis: which material-source indices a pass references.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::loader::PassGraph;
use super::types::{BasicType, MaterialSource};
use crate::graph::{Binding, Leaf, NodeId};

/// Distinct indices referenced per material source. Iteration is ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    sources: [BTreeSet<u8>; MaterialSource::COUNT],
    /// Sampler type per texture index, taken from the first consuming input.
    texture_types: BTreeMap<u8, BasicType>,
}

impl Usage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `leaf`; repeated insertion is a no-op.
    pub fn add_usage(&mut self, leaf: Leaf) {
        self.sources[leaf.source.index()].insert(leaf.index);
    }

    fn add_texture_type(&mut self, leaf: Leaf, ty: BasicType) {
        if leaf.source != MaterialSource::Texture || !ty.is_sampler() {
            return;
        }
        let previous = *self.texture_types.entry(leaf.index).or_insert(ty);
        if previous != ty {
            log::warn!(
                "[usage] texture {} sampled as both {previous} and {ty}; keeping {previous}",
                leaf.index
            );
        }
    }

    pub fn indices(&self, source: MaterialSource) -> &BTreeSet<u8> {
        &self.sources[source.index()]
    }

    pub fn uses(&self, source: MaterialSource) -> bool {
        !self.indices(source).is_empty()
    }

    pub fn count(&self, source: MaterialSource) -> usize {
        self.indices(source).len()
    }

    /// `sampler2D` unless a consumer declared otherwise.
    pub fn texture_type(&self, index: u8) -> BasicType {
        self.texture_types
            .get(&index)
            .copied()
            .unwrap_or(BasicType::Sampler2D)
    }

    /// Every recorded `(source, index)` pair in source then index order.
    pub fn iter(&self) -> impl Iterator<Item = Leaf> + '_ {
        MaterialSource::ALL
            .into_iter()
            .flat_map(move |s| self.indices(s).iter().map(move |i| Leaf::new(s, *i)))
    }
}

/// Walks every populated output slot of `pass` and records each leaf it reaches.
pub fn gather_usage(pass: &PassGraph) -> Usage {
    let mut usage = Usage::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<NodeId> = Vec::new();

    for slot in pass.outputs {
        match slot {
            Binding::Unbound => {}
            Binding::Leaf(leaf) => usage.add_usage(leaf),
            Binding::Output(o) => stack.push(o.node),
        }
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let node = pass.graph.node(id);
            for (i, b) in node.inputs.iter().enumerate() {
                match *b {
                    Binding::Leaf(leaf) => {
                        usage.add_usage(leaf);
                        usage.add_texture_type(leaf, node.input_connection(i).ty);
                    }
                    Binding::Output(src) => stack.push(src.node),
                    Binding::Unbound => {}
                }
            }
        }
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::Pass;
    use crate::graph::test_utils::*;
    use crate::graph::{Graph, InputRef, NodeType, OutputRef, RETURN_REGISTER};
    use std::sync::Arc;

    #[test]
    fn add_usage_is_idempotent() {
        let mut u = Usage::new();
        u.add_usage(Leaf::new(MaterialSource::TexCoord, 3));
        u.add_usage(Leaf::new(MaterialSource::TexCoord, 1));
        u.add_usage(Leaf::new(MaterialSource::TexCoord, 3));
        assert_eq!(u.count(MaterialSource::TexCoord), 2);
        assert_eq!(
            u.indices(MaterialSource::TexCoord).iter().copied().collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert!(!u.uses(MaterialSource::Texture));
    }

    #[test]
    fn gathers_through_shared_nodes() {
        let cube = Arc::new(NodeType {
            name: "Env".to_string(),
            inputs: vec![conn("map", BasicType::SamplerCube, 0)],
            outputs: vec![conn("r", BasicType::Float4, RETURN_REGISTER)],
            alias: None,
        });
        let mut g = Graph::new();
        let env = g.instantiate("env", cube);
        let add = g.instantiate("add", binary_type("Add"));
        let env_out = OutputRef { node: env, output: 0 };
        g.bind_leaf(InputRef { node: env, input: 0 }, Leaf::new(MaterialSource::Texture, 2))
            .unwrap();
        g.connect(env_out, InputRef { node: add, input: 0 }).unwrap();
        g.bind_leaf(InputRef { node: add, input: 1 }, Leaf::new(MaterialSource::LightVec, 0))
            .unwrap();

        let pass = PassGraph {
            pass: Pass::Default,
            graph: g,
            outputs: [
                Binding::Output(OutputRef { node: add, output: 0 }),
                Binding::Output(env_out),
                Binding::Leaf(Leaf::new(MaterialSource::Texture, 0)),
            ],
        };
        let u = gather_usage(&pass);
        assert_eq!(
            u.iter().collect::<Vec<_>>(),
            vec![
                Leaf::new(MaterialSource::Texture, 0),
                Leaf::new(MaterialSource::Texture, 2),
                Leaf::new(MaterialSource::LightVec, 0),
            ]
        );
        assert_eq!(u.texture_type(2), BasicType::SamplerCube);
        assert_eq!(u.texture_type(0), BasicType::Sampler2D);
    }
}

//! Typed failure taxonomy carried inside `anyhow::Error`.
//!
//! Library functions return `anyhow::Result`; callers that need to react to a specific
//! class of failure use `err.downcast_ref::<CompileError>()`.

use thiserror::Error;

use super::types::MaterialSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing description data.
    Description,
    /// Graph recursion or partial graphs.
    Structural,
    /// Hardware slot overflow.
    Capacity,
    /// A named resource could not be resolved to text.
    Resource,
    /// The external optimizer rejected the assembled text.
    Backend,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("unknown node type '{node_type}' ({context})")]
    UnknownNodeType { node_type: String, context: String },

    #[error("node type {node_type}: {reason}")]
    MalformedNodeType { node_type: String, reason: String },

    #[error("invalid binding for {context}: {reason}")]
    MalformedBinding { context: String, reason: String },

    #[error("node {node} does not have output named {output}")]
    MissingOutput { node: String, output: String },

    #[error("node {node} does not have a return register")]
    MissingReturnRegister { node: String },

    #[error("node '{node}' ({node_type}) has no binding for input {input}")]
    MissingInput {
        node: String,
        node_type: String,
        input: String,
    },

    #[error("node {node} does not have input named {input}")]
    UnknownInput { node: String, input: String },

    #[error("recursive material node '{node}'")]
    RecursiveNode { node: String },

    #[error("invalid material {output} output in pass {pass}")]
    InvalidOutput { pass: String, output: String },

    #[error("node is missing input ({node_type}:\"{node}\", In.{input})")]
    UnboundInput {
        node: String,
        node_type: String,
        input: String,
    },

    #[error("material source {material_source} cannot be referenced from a shader graph")]
    UnaddressableSource { material_source: MaterialSource },

    #[error("texture limits exceeded ({used} > {limit})")]
    TextureLimit { used: usize, limit: usize },

    #[error("attribute limits exceeded ({used} > {limit})")]
    AttributeLimit { used: usize, limit: usize },

    #[error("texcoord register overflow ({used} > {limit})")]
    TexCoordLimit { used: usize, limit: usize },

    #[error("light index {index} exceeds light limit {limit}")]
    LightLimit { index: u8, limit: usize },

    #[error("unable to locate '{name}'")]
    MissingInclude { name: String },

    #[error("shader optimizer failed for {context}:\n{log}")]
    OptimizerFailed { context: String, log: String },
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::UnknownNodeType { .. }
            | CompileError::MalformedNodeType { .. }
            | CompileError::MalformedBinding { .. }
            | CompileError::MissingOutput { .. }
            | CompileError::MissingReturnRegister { .. }
            | CompileError::MissingInput { .. }
            | CompileError::UnknownInput { .. }
            | CompileError::InvalidOutput { .. } => ErrorKind::Description,
            CompileError::RecursiveNode { .. }
            | CompileError::UnboundInput { .. }
            | CompileError::UnaddressableSource { .. } => ErrorKind::Structural,
            CompileError::TextureLimit { .. }
            | CompileError::AttributeLimit { .. }
            | CompileError::TexCoordLimit { .. }
            | CompileError::LightLimit { .. } => ErrorKind::Capacity,
            CompileError::MissingInclude { .. } => ErrorKind::Resource,
            CompileError::OptimizerFailed { .. } => ErrorKind::Backend,
        }
    }
}

/// Finds the [`CompileError`] anywhere in an error chain.
pub fn compile_error(err: &anyhow::Error) -> Option<&CompileError> {
    err.chain().find_map(|e| e.downcast_ref::<CompileError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classifies_through_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::Error::new(CompileError::TextureLimit {
            used: 7,
            limit: 6,
        }))
        .context("pass Default");
        let err = err.unwrap_err();
        let ce = compile_error(&err).unwrap();
        assert_eq!(ce.kind(), ErrorKind::Capacity);
        assert!(format!("{err:#}").contains("texture limits exceeded (7 > 6)"));
    }
}

//! Node-type descriptions (`Nodes/<Type>.node`).
//!
//! A description is a JSON object:
//!
//! ```json
//! {
//!   "Inputs":  { "a": { "t": "FLOAT4", "r": 0 }, "b": { "t": "FLOAT4", "r": 1 } },
//!   "Outputs": { "r": { "t": "FLOAT4", "r": -1, "s": "color" } },
//!   "Alias": "mul"
//! }
//! ```
//!
//! `Outputs` is required. Pins are kept in name order.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use serde::Deserialize;

use crate::compiler::error::CompileError;
use crate::compiler::types::BasicType;
use crate::graph::{Connection, NodeType, RETURN_REGISTER};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNodeType {
    #[serde(rename = "Outputs")]
    outputs: Option<BTreeMap<String, RawConnection>>,
    #[serde(rename = "Inputs", default)]
    inputs: BTreeMap<String, RawConnection>,
    #[serde(rename = "Alias", default)]
    alias: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConnection {
    t: TypeTag,
    r: i64,
    #[serde(default)]
    s: Option<String>,
}

/// Basic types may be given by tag (`"FLOAT4"`, `"float4"`) or by numeric index.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TypeTag {
    Name(String),
    Index(i64),
}

impl TypeTag {
    fn resolve(&self) -> Option<BasicType> {
        match self {
            TypeTag::Name(s) => BasicType::parse(s),
            TypeTag::Index(i) => BasicType::from_index(*i),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn malformed(node_type: &str, reason: impl Into<String>) -> anyhow::Error {
    CompileError::MalformedNodeType {
        node_type: node_type.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn convert_pins(
    pins: BTreeMap<String, RawConnection>,
    kind: &str,
    errors: &mut Vec<String>,
) -> Vec<Connection> {
    let mut out = Vec::with_capacity(pins.len());
    for (name, raw) in pins {
        let Some(ty) = raw.t.resolve() else {
            errors.push(format!("{kind} '{name}' has unknown type {:?}", raw.t));
            continue;
        };
        let Ok(register) = i32::try_from(raw.r) else {
            errors.push(format!("{kind} '{name}' register {} out of range", raw.r));
            continue;
        };
        if !is_identifier(&name) {
            errors.push(format!("{kind} name '{name}' is not an identifier"));
        }
        out.push(Connection {
            name,
            ty,
            semantic: raw.s,
            register,
        });
    }
    out
}

/// Parses and validates a node-type description.
pub fn parse_node_type(name: &str, text: &str) -> Result<NodeType> {
    let raw: RawNodeType =
        serde_json::from_str(text).map_err(|e| malformed(name, format!("invalid json: {e}")))?;

    let Some(raw_outputs) = raw.outputs else {
        return Err(malformed(name, "missing required Outputs table"));
    };

    let mut errors: Vec<String> = Vec::new();
    let inputs = convert_pins(raw.inputs, "input", &mut errors);
    let outputs = convert_pins(raw_outputs, "output", &mut errors);

    let mut seen: HashSet<i32> = HashSet::new();
    for c in &inputs {
        if c.register < 0 {
            errors.push(format!("input '{}' has negative register {}", c.name, c.register));
        } else if !seen.insert(c.register) {
            errors.push(format!("input '{}' reuses register {}", c.name, c.register));
        }
    }
    if outputs
        .iter()
        .filter(|c| c.register == RETURN_REGISTER)
        .count()
        > 1
    {
        errors.push("more than one output uses the return register".to_string());
    }
    if let Some(c) = outputs
        .iter()
        .find(|c| c.register < RETURN_REGISTER)
    {
        errors.push(format!("output '{}' has invalid register {}", c.name, c.register));
    }

    let alias = match raw.alias {
        Some(a) if !is_identifier(&a) => {
            errors.push(format!("invalid alias '{a}'"));
            None
        }
        other => other,
    };

    if !errors.is_empty() {
        return Err(malformed(name, errors.join("; ")));
    }

    Ok(NodeType {
        name: name.to_string(),
        inputs,
        outputs,
        alias,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::error::compile_error;

    #[test]
    fn parses_inputs_outputs_in_name_order() {
        let t = parse_node_type(
            "Mul",
            r#"{
                "Inputs": { "b": { "t": "float4", "r": 1 }, "a": { "t": "FLOAT4", "r": 0 } },
                "Outputs": { "r": { "t": 3, "r": -1, "s": "color" } }
            }"#,
        )
        .unwrap();
        assert_eq!(t.inputs[0].name, "a");
        assert_eq!(t.inputs[1].name, "b");
        assert_eq!(t.outputs[0].ty, BasicType::Float4);
        assert_eq!(t.find_output_register(RETURN_REGISTER), Some(0));
        assert_eq!(t.outputs[0].semantic.as_deref(), Some("color"));
        assert_eq!(t.function_name(), "Mul");
    }

    #[test]
    fn alias_replaces_function_name() {
        let t = parse_node_type(
            "Multiply",
            r#"{ "Outputs": { "r": { "t": "FLOAT4", "r": -1 } }, "Alias": "mul" }"#,
        )
        .unwrap();
        assert_eq!(t.function_name(), "mul");
    }

    #[test]
    fn missing_outputs_is_malformed() {
        let err = parse_node_type("Broken", r#"{ "Inputs": {} }"#).unwrap_err();
        let ce = compile_error(&err).unwrap();
        assert!(matches!(ce, CompileError::MalformedNodeType { node_type, .. } if node_type == "Broken"));
        assert!(format!("{err}").contains("Outputs"));
    }

    #[test]
    fn rejects_bad_entries() {
        for doc in [
            r#"{ "Outputs": { "r": { "t": "vec4", "r": -1 } } }"#,
            r#"{ "Outputs": { "r": { "t": "FLOAT4" } } }"#,
            r#"{ "Outputs": { "r": { "t": "FLOAT4", "r": -1 } }, "Alias": "not valid" }"#,
            r#"{ "Outputs": { "r": { "t": "FLOAT4", "r": -1 }, "q": { "t": "FLOAT", "r": -1 } } }"#,
            r#"{ "Inputs": { "a": { "t": "FLOAT", "r": 0 }, "b": { "t": "FLOAT", "r": 0 } },
                 "Outputs": { "r": { "t": "FLOAT4", "r": -1 } } }"#,
            r#"{ "Outputs": {}, "Extra": 1 }"#,
        ] {
            assert!(parse_node_type("T", doc).is_err(), "{doc}");
        }
    }
}

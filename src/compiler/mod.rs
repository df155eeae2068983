//! Shader graph compiler.
//!
//! This module is organized into several submodules:
//! - `types`: Core enumerations (BasicType, MaterialSource, Pass, precision, limits)
//! - `loader`: Node-type registry and per-pass graph resolution
//! - `usage`: Per-pass material-source usage analysis
//! - `mapping`: Texture unit, attribute array and texcoord register assignment
//! - `emit`: Node function calls and leaf substitution for a pass entry point
//! - `assembler`: `#define` block, prelude injection and include expansion
//! - `validation`: The optimizer seam and the naga-backed implementation
//! - `wire`: Fixed-layout mapping struct and cooked shader format
//! - `shader`: Compiled shaders, the compiler driver and the shader cache
//!
//! The main entry points are:
//! - `Compiler::load_shader` / `Compiler::compile_pass`
//! - `ShaderCache`: shared shaders keyed by name and material variant

pub mod artifacts;
pub mod assembler;
pub mod config;
pub mod emit;
pub mod error;
pub mod loader;
pub mod mapping;
pub mod material;
pub mod shader;
pub mod types;
pub mod usage;
pub mod validation;
pub mod wire;

pub use config::{CompilerConfig, PlatformLimits};
pub use error::{CompileError, ErrorKind, compile_error};
pub use loader::{NodeRegistry, PassGraph, parse_shader_pass};
pub use mapping::{MaterialInputMappings, TexCoordMapping};
pub use material::Material;
pub use shader::{CompiledPass, Compiler, Shader, ShaderCache, ShaderVariant};
pub use types::{BasicType, MaterialSource, OutputFlags, Pass, Precision, ShaderStage, SkinMode};
pub use usage::Usage;
pub use validation::{NagaOptimizer, ShaderOptimizer};

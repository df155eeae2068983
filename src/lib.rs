pub mod asset_store;
pub mod compiler;
pub mod dsl;
pub mod graph;
pub mod schema;

pub use asset_store::{DirectoryResolver, MemoryResolver, ResourceKind, SourceResolver};
pub use compiler::{CompileError, Compiler, CompilerConfig, Material, Shader, ShaderCache};
pub use dsl::ShaderDocument;

//! Named text resources the compiler asks for: node-type descriptions, node function
//! code, shader documents and include targets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `Nodes/<Type>.node`
    NodeType,
    /// `Nodes/<Type>.code`
    NodeCode,
    /// `<name>.shader`
    Shader,
    /// Shared code fragments and include targets, by file name.
    Include,
}

/// Resolves named resources to text. `Ok(None)` means "not found".
pub trait SourceResolver {
    fn resolve(&self, kind: ResourceKind, name: &str) -> Result<Option<String>>;

    /// Path-like description of where a resource would live, for diagnostics.
    fn describe(&self, kind: ResourceKind, name: &str) -> String {
        relative_path(kind, name).display().to_string()
    }
}

fn relative_path(kind: ResourceKind, name: &str) -> PathBuf {
    match kind {
        ResourceKind::NodeType => Path::new("Nodes").join(format!("{name}.node")),
        ResourceKind::NodeCode => Path::new("Nodes").join(format!("{name}.code")),
        ResourceKind::Shader => PathBuf::from(format!("{name}.shader")),
        ResourceKind::Include => PathBuf::from(name),
    }
}

/// Reads resources from a shader source tree on disk.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, kind: ResourceKind, name: &str) -> PathBuf {
        self.root.join(relative_path(kind, name))
    }
}

impl SourceResolver for DirectoryResolver {
    fn resolve(&self, kind: ResourceKind, name: &str) -> Result<Option<String>> {
        let path = self.path_of(kind, name);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(text))
    }

    fn describe(&self, kind: ResourceKind, name: &str) -> String {
        self.path_of(kind, name).display().to_string()
    }
}

/// Thread-safe, clone-friendly in-memory resource table.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    inner: Arc<Mutex<HashMap<(ResourceKind, String), String>>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is a single map insert or remove, so a poisoned table is still consistent.
    fn table(&self) -> MutexGuard<'_, HashMap<(ResourceKind, String), String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a resource.
    pub fn insert(&self, kind: ResourceKind, name: impl Into<String>, text: impl Into<String>) {
        self.table().insert((kind, name.into()), text.into());
    }

    pub fn with(self, kind: ResourceKind, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(kind, name, text);
        self
    }

    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.table().contains_key(&(kind, name.to_string()))
    }

    pub fn remove(&self, kind: ResourceKind, name: &str) -> Option<String> {
        self.table().remove(&(kind, name.to_string()))
    }
}

impl SourceResolver for MemoryResolver {
    fn resolve(&self, kind: ResourceKind, name: &str) -> Result<Option<String>> {
        Ok(self.table().get(&(kind, name.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_resolver_round_trip() {
        let r = MemoryResolver::new().with(ResourceKind::NodeCode, "Mul", "FLOAT4 Mul() {}");
        assert!(r.contains(ResourceKind::NodeCode, "Mul"));
        assert!(!r.contains(ResourceKind::NodeType, "Mul"));
        assert_eq!(
            r.resolve(ResourceKind::NodeCode, "Mul").unwrap().as_deref(),
            Some("FLOAT4 Mul() {}")
        );
        assert_eq!(r.resolve(ResourceKind::Include, "x").unwrap(), None);
        assert_eq!(r.describe(ResourceKind::NodeType, "Mul"), "Nodes/Mul.node");
        assert!(r.remove(ResourceKind::NodeCode, "Mul").is_some());
    }

    #[test]
    fn memory_resolver_survives_poisoned_lock() {
        let r = MemoryResolver::new();
        let held = r.clone();
        let _ = std::thread::spawn(move || {
            let _guard = held.inner.lock().unwrap();
            panic!("writer died");
        })
        .join();
        assert!(r.inner.is_poisoned());

        r.insert(ResourceKind::Include, "Common.glsl", "// common");
        assert!(r.contains(ResourceKind::Include, "Common.glsl"));
        assert_eq!(
            r.resolve(ResourceKind::Include, "Common.glsl").unwrap().as_deref(),
            Some("// common")
        );
    }

    #[test]
    fn directory_resolver_reports_missing_files() {
        let dir = std::env::temp_dir().join(format!("sgc-resolver-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("Nodes")).unwrap();
        std::fs::write(dir.join("Nodes").join("Tex.code"), "code").unwrap();

        let r = DirectoryResolver::new(&dir);
        assert_eq!(
            r.resolve(ResourceKind::NodeCode, "Tex").unwrap().as_deref(),
            Some("code")
        );
        assert_eq!(r.resolve(ResourceKind::NodeType, "Tex").unwrap(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }
}

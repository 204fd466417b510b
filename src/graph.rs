use std::collections::HashMap;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

/// Declared type of a module, inferred from its file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Script,
    Component,
    Stylesheet,
    Vendor,
    Static,
}

impl ModuleKind {
    /// Kind of a file reachable through imports, `None` for unsupported types
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "js" | "mjs" | "cjs" => Some(Self::Script),
            "vue" => Some(Self::Component),
            "css" => Some(Self::Stylesheet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Component => "component",
            Self::Stylesheet => "stylesheet",
            Self::Vendor => "vendor",
            Self::Static => "static",
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved dependency edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dependency {
    /// Identifier as written in the source
    pub specifier: String,
    /// Canonical path of the target module
    pub path: PathBuf,
}

/// Node in the module graph
#[derive(Debug, Clone, Serialize)]
pub struct Module {
    /// Root-relative id used inside the bundle
    pub id: String,
    /// Canonical path, the module's identity
    pub path: PathBuf,
    pub kind: ModuleKind,
    #[serde(skip)]
    pub source: String,
    /// Declared dependency identifiers, in source order
    pub specifiers: Vec<String>,
    /// Resolved edges, one per specifier
    pub dependencies: Vec<Dependency>,
}

impl Module {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, kind: ModuleKind, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            kind,
            source: source.into(),
            specifiers: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Canonical path a specifier resolved to
    pub fn resolved(&self, specifier: &str) -> Option<&Path> {
        self.dependencies
            .iter()
            .find(|dep| dep.specifier == specifier)
            .map(|dep| dep.path.as_path())
    }
}

/// Deduplicated modules in traversal order, plus the entry points they were
/// reached from
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModuleGraph {
    entries: Vec<PathBuf>,
    modules: Vec<Module>,
    #[serde(skip)]
    index: HashMap<PathBuf, usize>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, path: PathBuf) {
        if !self.entries.contains(&path) {
            self.entries.push(path);
        }
    }

    /// Insert a module; returns `false` and leaves the graph untouched when
    /// its path is already present
    pub fn insert(&mut self, module: Module) -> bool {
        if self.index.contains_key(&module.path) {
            return false;
        }
        self.index.insert(module.path.clone(), self.modules.len());
        self.modules.push(module);
        true
    }

    pub fn get(&self, path: &Path) -> Option<&Module> {
        self.index.get(path).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Modules in traversal order
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Edges pointing at paths outside the graph; empty for a complete graph
    pub fn dangling_edges(&self) -> Vec<(&Module, &Dependency)> {
        self.modules
            .iter()
            .flat_map(|module| module.dependencies.iter().map(move |dep| (module, dep)))
            .filter(|(_, dep)| !self.contains(&dep.path))
            .collect()
    }
}

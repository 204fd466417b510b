use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::analyzer::scan_script_imports;
use crate::component::ComponentBlocks;
use crate::config::{normalize_path, Config};
use crate::errors::{KilnError, Result};
use crate::glob::to_slash;
use crate::graph::{Dependency, Module, ModuleGraph, ModuleKind};
use crate::packages::PackageLookup;

/// Resolves import specifiers to canonical paths and builds module graphs
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    root: PathBuf,
    packages: PackageLookup,
    style_paths: Vec<PathBuf>,
    extensions: Vec<String>,
}

impl ModuleResolver {
    pub fn new(config: &Config) -> Self {
        let mut root = config.resolve_path(Path::new("."));
        if root.as_os_str().is_empty() {
            root = PathBuf::from(".");
        }
        let root = canonical_or_normalized(&root);
        let package_dirs = config
            .build
            .package_dirs
            .iter()
            .map(|dir| config.resolve_path(dir))
            .collect();
        let style_paths = config
            .build
            .style_paths
            .iter()
            .map(|dir| config.resolve_path(dir))
            .collect();

        Self {
            root,
            packages: PackageLookup::new(package_dirs),
            style_paths,
            extensions: config.build.extensions.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the graph of every module reachable from the entry paths.
    ///
    /// Traversal is breadth-first. A path is marked as discovered when it is
    /// first enqueued, so a re-encounter (including one through a cycle) only
    /// records the edge and never re-traverses.
    pub fn resolve(&self, entries: &[PathBuf]) -> Result<ModuleGraph> {
        let mut graph = ModuleGraph::new();
        let mut discovered: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();

        for entry in entries {
            let candidate = if entry.is_absolute() {
                entry.clone()
            } else {
                self.root.join(entry)
            };
            let path = self.infer(&candidate, &self.extensions).ok_or_else(|| {
                KilnError::resolution("<entry>", entry.display().to_string(), "entry module not found")
            })?;
            graph.add_entry(path.clone());
            if discovered.insert(path.clone()) {
                queue.push_back(path);
            }
        }

        while let Some(path) = queue.pop_front() {
            let mut module = self.load(&path)?;
            debug!("Discovered {} ({})", module.id, module.kind);

            for specifier in module.specifiers.clone() {
                let target = self.resolve_specifier(&path, &specifier).map_err(|reason| {
                    KilnError::resolution(module.id.clone(), specifier.clone(), reason)
                })?;

                if ModuleKind::from_path(&target).is_none() {
                    return Err(KilnError::resolution(
                        module.id.clone(),
                        specifier,
                        format!("unsupported module type: {}", target.display()),
                    ));
                }

                if discovered.insert(target.clone()) {
                    queue.push_back(target.clone());
                }
                module.dependencies.push(Dependency { specifier, path: target });
            }

            graph.insert(module);
        }

        info!(
            "Resolved {} modules from {} entry point(s)",
            graph.len(),
            graph.entries().len()
        );
        Ok(graph)
    }

    /// Resolve a specifier imported from `from`: relative path, then package
    /// lookup, each followed by extension inference
    pub fn resolve_specifier(&self, from: &Path, specifier: &str) -> std::result::Result<PathBuf, String> {
        if is_path_like(specifier) {
            let candidate = self.relative_candidate(from, specifier);
            return self
                .infer(&candidate, &self.extensions)
                .ok_or_else(|| format!("no file matches {}", candidate.display()));
        }

        for candidate in self.packages.candidates(specifier) {
            if let Some(found) = self.infer(&candidate, &self.extensions) {
                return Ok(found);
            }
        }

        Err(format!(
            "package not found in {}",
            self.packages
                .dirs()
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Resolve a stylesheet `@import`: relative to the importer, then the
    /// style search paths, then package directories
    pub fn resolve_stylesheet(&self, from: &Path, specifier: &str) -> std::result::Result<PathBuf, String> {
        let css = [".css".to_string()];

        if is_path_like(specifier) {
            let candidate = self.relative_candidate(from, specifier);
            return self
                .infer(&candidate, &css)
                .ok_or_else(|| format!("no stylesheet matches {}", candidate.display()));
        }

        let mut candidates = Vec::new();
        if let Some(dir) = from.parent() {
            candidates.push(dir.join(specifier));
        }
        candidates.extend(self.style_paths.iter().map(|dir| dir.join(specifier)));
        candidates.extend(self.packages.candidates(specifier));

        candidates
            .iter()
            .find_map(|candidate| self.infer(candidate, &css))
            .ok_or_else(|| format!("stylesheet '{}' not found", specifier))
    }

    /// Bundle id of a canonical path
    pub fn module_id(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => to_slash(relative),
            Err(_) => path.display().to_string(),
        }
    }

    fn load(&self, path: &Path) -> Result<Module> {
        let kind = ModuleKind::from_path(path).ok_or_else(|| {
            KilnError::resolution(
                "<entry>",
                path.display().to_string(),
                "unsupported module type",
            )
        })?;

        let source = std::fs::read_to_string(path)
            .map_err(|e| KilnError::file_system_error("Failed to read module", path, e))?;

        let specifiers = match kind {
            ModuleKind::Script => scan_script_imports(&source),
            ModuleKind::Component => ComponentBlocks::parse(&source)
                .ok()
                .and_then(|blocks| blocks.script.map(|script| scan_script_imports(&script.content)))
                .unwrap_or_default(),
            // Stylesheet imports are inlined by the stylesheet chain.
            _ => Vec::new(),
        };

        let mut module = Module::new(self.module_id(path), path, kind, source);
        module.specifiers = specifiers;
        Ok(module)
    }

    fn relative_candidate(&self, from: &Path, specifier: &str) -> PathBuf {
        if let Some(stripped) = specifier.strip_prefix('/') {
            self.root.join(stripped)
        } else {
            let dir = from.parent().unwrap_or(&self.root);
            dir.join(specifier)
        }
    }

    /// Extension inference: the exact file, then each extension appended,
    /// then `index` plus each extension inside a directory
    fn infer(&self, candidate: &Path, extensions: &[String]) -> Option<PathBuf> {
        let candidate = normalize_path(candidate);

        if candidate.is_file() {
            return Some(canonical_or_normalized(&candidate));
        }

        for ext in extensions {
            let mut with_ext = candidate.clone().into_os_string();
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            if with_ext.is_file() {
                return Some(canonical_or_normalized(&with_ext));
            }
        }

        if candidate.is_dir() {
            for ext in extensions {
                let index = candidate.join(format!("index{}", ext));
                if index.is_file() {
                    return Some(canonical_or_normalized(&index));
                }
            }
        }

        None
    }
}

fn is_path_like(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
        || specifier == "." || specifier == ".."
}

fn canonical_or_normalized(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| normalize_path(path))
}

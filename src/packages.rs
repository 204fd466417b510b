use std::path::{Path, PathBuf};
use serde::Deserialize;
use tracing::debug;

/// Locates bare package specifiers (`phoenix`, `@scope/pkg/sub`) in the
/// configured package directories
#[derive(Debug, Clone)]
pub struct PackageLookup {
    dirs: Vec<PathBuf>,
}

/// The subset of `package.json` consulted for an entry file
#[derive(Debug, Deserialize, Default)]
pub struct PackageManifest {
    pub name: Option<String>,
    pub main: Option<String>,
    pub module: Option<String>,
    pub browser: Option<serde_json::Value>,
}

impl PackageManifest {
    pub fn read(package_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(package_dir.join("package.json")).ok()?;
        match serde_json::from_str(&content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                debug!("Ignoring unreadable manifest in {}: {}", package_dir.display(), e);
                None
            }
        }
    }

    /// Entry file declared by the manifest: `browser` (string form), then
    /// `module`, then `main`
    pub fn entry(&self) -> Option<&str> {
        if let Some(serde_json::Value::String(browser)) = &self.browser {
            return Some(browser);
        }
        self.module.as_deref().or(self.main.as_deref())
    }
}

impl PackageLookup {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Candidate paths for a bare specifier, one or more per package
    /// directory, in lookup order. Candidates still go through extension
    /// inference.
    pub fn candidates(&self, specifier: &str) -> Vec<PathBuf> {
        let (name, subpath) = split_specifier(specifier);
        let mut candidates = Vec::new();

        for dir in &self.dirs {
            let package_dir = dir.join(name);

            if package_dir.is_dir() {
                match subpath {
                    Some(sub) => candidates.push(package_dir.join(sub)),
                    None => {
                        if let Some(entry) = PackageManifest::read(&package_dir)
                            .as_ref()
                            .and_then(PackageManifest::entry)
                        {
                            candidates.push(package_dir.join(entry));
                        }
                        candidates.push(package_dir.join("index"));
                    }
                }
            } else {
                candidates.push(dir.join(specifier));
            }
        }

        candidates
    }
}

/// Split `@scope/name/sub/path` into (`@scope/name`, `sub/path`)
fn split_specifier(specifier: &str) -> (&str, Option<&str>) {
    let name_segments = if specifier.starts_with('@') { 2 } else { 1 };
    let mut split_at = None;
    for (count, (i, _)) in specifier.match_indices('/').enumerate() {
        if count + 1 == name_segments {
            split_at = Some(i);
            break;
        }
    }

    match split_at {
        Some(i) => (&specifier[..i], Some(&specifier[i + 1..]).filter(|s| !s.is_empty())),
        None => (specifier, None),
    }
}

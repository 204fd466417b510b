//! Kiln - Build front-end asset trees into deployable bundles
//!
//! Kiln resolves a dependency graph from each configured entry point, runs
//! every module through the transform chain bound to its type, and writes one
//! script bundle and one extracted stylesheet per entry. A static directory
//! tree is mirrored alongside. The [`runtime`] module holds the client-side
//! core the bundle boots: a hook registry, component mounts and a
//! reconnecting live socket.
//!
//! # Features
//!
//! - Script, single-file component and stylesheet modules
//! - Package lookup through `node_modules`-style directories
//! - Stylesheet import inlining, design tokens and vendor prefixes
//! - Glob-selected vendor scripts
//! - Atomic artifact writes and optional minification
//!
//! # Example
//!
//! ```rust,no_run
//! use kiln::{BuildOptions, Builder, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(Some("assets/kiln.toml".as_ref()))?;
//!     let builder = Builder::new(config)?;
//!
//!     let report = builder.build(&BuildOptions::default()).await?;
//!     for artifact in &report.artifacts {
//!         println!("{} ({} bytes)", artifact.path.display(), artifact.bytes);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod cli;
pub mod component;
pub mod config;
pub mod errors;
pub mod glob;
pub mod graph;
pub mod output;
pub mod packages;
pub mod pipeline;
pub mod prefixes;
pub mod resolver;
pub mod runtime;
pub mod static_copy;
pub mod tokens;
pub mod transformer;

// Re-export main types for convenience
pub use config::Config;
pub use errors::{KilnError, Result};
pub use graph::{Module, ModuleGraph, ModuleKind};
pub use pipeline::{BuildOptions, BuildReport, Builder};
pub use runtime::{ClientRuntime, LiveSocket};

/// Current version of Kiln
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if this version of Kiln supports a given build feature
pub fn is_feature_supported(feature: &str) -> bool {
    match feature {
        "esmodules" | "commonjs" | "components" => true,
        "css-import" | "design-tokens" | "vendor-prefixes" => true,
        "minification" | "static-copy" => true,
        "source-maps" => false,
        "tree-shaking" | "hmr" => false,
        _ => false,
    }
}

/// Module types the resolver accepts
pub fn supported_module_kinds() -> Vec<&'static str> {
    vec![
        ModuleKind::Script.as_str(),
        ModuleKind::Component.as_str(),
        ModuleKind::Stylesheet.as_str(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.chars().next().unwrap().is_ascii_digit());
    }

    #[test]
    fn test_feature_support() {
        assert!(is_feature_supported("design-tokens"));
        assert!(is_feature_supported("commonjs"));
        assert!(!is_feature_supported("source-maps"));
        assert!(!is_feature_supported("nonexistent-feature"));
    }

    #[test]
    fn test_supported_module_kinds() {
        assert_eq!(supported_module_kinds().len(), 3);
    }
}

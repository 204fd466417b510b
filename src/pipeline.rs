use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Config, EntryConfig, VendorPosition};
use crate::errors::{KilnError, Result};
use crate::glob::{GlobMatcher, VendorSet};
use crate::graph::ModuleGraph;
use crate::output::{ArtifactKind, BannerContext, EntryOutput, OutputWriter, WrittenArtifact};
use crate::resolver::ModuleResolver;
use crate::static_copy::{self, CopyPlan};
use crate::transformer::{TransformPipeline, TransformedModule};

/// Options for one build invocation
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Entry names to build; all entries when empty
    pub entries: Vec<String>,
    /// Overrides `output.minify` when set
    pub minify: Option<bool>,
}

/// Result of a build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Unique build ID for tracking
    pub build_id: String,

    /// Every file written, entries in configuration order, then static files
    pub artifacts: Vec<WrittenArtifact>,

    /// Number of graph modules across all built entries
    pub modules: usize,

    /// Number of static files copied
    pub static_files: usize,

    /// Build time in milliseconds
    pub elapsed_ms: u64,
}

/// Result of building one entry
#[derive(Debug, Clone, Serialize)]
pub struct EntryBuild {
    pub name: String,
    pub modules: usize,
    pub artifacts: Vec<WrittenArtifact>,
}

/// Main builder that orchestrates resolution, transformation and output
#[derive(Clone)]
pub struct Builder {
    config: Arc<Config>,
    pipeline: Arc<TransformPipeline>,
}

impl Builder {
    /// Create a builder; the configuration is validated first
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let resolver = ModuleResolver::new(&config);
        let pipeline = TransformPipeline::new(&config, resolver)?;

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    /// Entries matching the filter, in configuration order
    pub fn selected_entries(&self, filter: &[String]) -> Result<Vec<EntryConfig>> {
        if let Some(unknown) = filter
            .iter()
            .find(|name| !self.config.entries.iter().any(|e| &e.name == *name))
        {
            return Err(KilnError::config(format!("unknown entry '{}'", unknown)));
        }

        Ok(self
            .config
            .entries
            .iter()
            .filter(|e| filter.is_empty() || filter.contains(&e.name))
            .cloned()
            .collect())
    }

    /// Resolve the module graph of a named entry
    pub fn graph(&self, entry: &str) -> Result<ModuleGraph> {
        let entry = self
            .config
            .entries
            .iter()
            .find(|e| e.name == entry)
            .ok_or_else(|| KilnError::config(format!("unknown entry '{}'", entry)))?;

        let input = self.config.resolve_path(&entry.input);
        self.pipeline.resolver().resolve(&[input])
    }

    /// Build every selected entry and copy static trees.
    ///
    /// Static copy runs concurrently with the entries; entries run in
    /// parallel up to `build.workers`. The first failure aborts the
    /// remaining work.
    pub async fn build(&self, options: &BuildOptions) -> Result<BuildReport> {
        let start_time = Instant::now();
        let build_id = Uuid::new_v4().to_string();

        info!("Starting build");
        debug!("Build ID: {}", build_id);

        let entries = self.selected_entries(&options.entries)?;
        let copy_plan = self.plan_static_copy()?;

        let writer = OutputWriter::new(&self.config)?;
        let writer = match options.minify {
            Some(minify) => writer.with_minify(minify),
            None => writer,
        };
        let writer = Arc::new(writer);

        let static_task = tokio::task::spawn_blocking(move || -> Result<Vec<WrittenArtifact>> {
            static_copy::execute(&copy_plan)?;
            Ok(copy_plan
                .iter()
                .map(|item| WrittenArtifact {
                    kind: ArtifactKind::Static,
                    path: item.destination.clone(),
                    bytes: std::fs::metadata(&item.destination).map(|m| m.len()).unwrap_or(0),
                })
                .collect())
        });

        let semaphore = Arc::new(Semaphore::new(self.config.build.workers));
        let mut tasks = JoinSet::new();

        for (index, entry) in entries.iter().cloned().enumerate() {
            let builder = self.clone();
            let writer = Arc::clone(&writer);
            let semaphore = Arc::clone(&semaphore);
            let build_id = build_id.clone();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| KilnError::transform(&entry.name, "schedule", e.to_string()))?;
                let name = entry.name.clone();
                let built = tokio::task::spawn_blocking(move || builder.build_entry(&entry, &writer, &build_id))
                    .await
                    .map_err(|e| KilnError::transform(&name, "worker", e.to_string()))??;
                Ok::<_, KilnError>((index, built))
            });
        }

        let mut built: Vec<Option<EntryBuild>> = vec![None; entries.len()];
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| KilnError::transform("<build>", "worker", e.to_string()))
                .and_then(|result| result);

            match outcome {
                Ok((index, entry)) => built[index] = Some(entry),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        let static_artifacts = static_task
            .await
            .map_err(|e| KilnError::transform("<static>", "static-copy", e.to_string()))??;

        let mut report = BuildReport {
            build_id,
            artifacts: Vec::new(),
            modules: 0,
            static_files: static_artifacts.len(),
            elapsed_ms: 0,
        };
        for entry in built.into_iter().flatten() {
            report.modules += entry.modules;
            report.artifacts.extend(entry.artifacts);
        }
        report.artifacts.extend(static_artifacts);
        report.elapsed_ms = start_time.elapsed().as_millis() as u64;

        info!(
            "Build {} finished: {} artifact(s), {} module(s) in {}ms",
            report.build_id,
            report.artifacts.len(),
            report.modules,
            report.elapsed_ms
        );
        Ok(report)
    }

    /// Resolve, transform and write one entry
    pub fn build_entry(&self, entry: &EntryConfig, writer: &OutputWriter, build_id: &str) -> Result<EntryBuild> {
        info!("Building entry '{}'", entry.name);

        let input = self.config.resolve_path(&entry.input);
        let graph = self.pipeline.resolver().resolve(&[input])?;

        let modules = graph
            .modules()
            .map(|module| self.pipeline.apply(module, &graph))
            .collect::<Result<Vec<TransformedModule>>>()?;

        let vendor = self.vendor_scripts(entry, &graph)?;
        let (before, after) = match entry.vendor_position {
            VendorPosition::Before => (vendor, Vec::new()),
            VendorPosition::After => (Vec::new(), vendor),
        };

        let entry_id = graph
            .entries()
            .first()
            .and_then(|path| graph.get(path))
            .map(|module| module.id.clone())
            .unwrap_or_else(|| entry.name.clone());

        let output = EntryOutput {
            entry_id: &entry_id,
            vendor_before: &before,
            vendor_after: &after,
            modules: &modules,
            script_destination: self.config.resolve_path(&entry.script_output),
            style_destination: self.config.resolve_path(&entry.style_output),
        };

        let banner = BannerContext {
            entry: entry.name.clone(),
            version: crate::VERSION.to_string(),
            build_id: build_id.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
        };

        let artifacts = writer.assemble(&output)?;
        let written = writer.write(&artifacts, Some(&banner))?;

        Ok(EntryBuild {
            name: entry.name.clone(),
            modules: graph.len(),
            artifacts: written,
        })
    }

    /// Vendor scripts of an entry, run through the vendor chain. Files that
    /// are already part of the module graph are skipped.
    fn vendor_scripts(&self, entry: &EntryConfig, graph: &ModuleGraph) -> Result<Vec<String>> {
        let matcher = GlobMatcher::new(self.config.resolve_path(std::path::Path::new(".")));
        let set = VendorSet::collect(&matcher, &entry.vendor)?;
        debug!("Entry '{}' has {} vendor script(s)", entry.name, set.len());

        let mut scripts = Vec::with_capacity(set.len());
        for path in set.paths() {
            let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            if graph.contains(&canonical) {
                debug!("Vendor script {} is already bundled as a module", path.display());
                continue;
            }

            let source = std::fs::read_to_string(path)
                .map_err(|e| KilnError::file_system_error("Failed to read vendor script", path, e))?;
            let id = self.pipeline.resolver().module_id(&canonical);
            scripts.push(self.pipeline.apply_vendor(&id, &canonical, source)?);
        }

        Ok(scripts)
    }

    /// Plan every static copy and check it against all artifact paths
    fn plan_static_copy(&self) -> Result<Vec<CopyPlan>> {
        let mut plan = Vec::new();
        for pair in &self.config.static_copy {
            plan.extend(static_copy::plan_copy(
                &self.config.resolve_path(&pair.from),
                &self.config.resolve_path(&pair.to),
            )?);
        }

        let artifact_paths: Vec<PathBuf> = self
            .config
            .entries
            .iter()
            .flat_map(|e| [&e.script_output, &e.style_output])
            .map(|p| self.config.resolve_path(p))
            .collect();
        static_copy::check_overlap(&plan, &artifact_paths)?;

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> (TempDir, Config) {
        let temp = TempDir::new().unwrap();
        for (relative, content) in files {
            let path = temp.path().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        let mut config = Config::from_toml(
            r#"
            [build]
            workers = 2

            [[entries]]
            name = "app"
            input = "js/app.js"
            script_output = "out/js/app.js"
            style_output = "out/css/app.css"
            vendor = ["vendor/*.js"]

            [[entries]]
            name = "admin"
            input = "js/admin.js"
            script_output = "out/js/admin.js"
            style_output = "out/css/admin.css"

            [[static_copy]]
            from = "static"
            to = "out"
            "#,
        )
        .unwrap();
        config.root = temp.path().to_path_buf();
        (temp, config)
    }

    fn files() -> Vec<(&'static str, &'static str)> {
        vec![
            ("js/app.js", "import \"../css/app.css\";\nimport { greet } from \"./greet\";\ngreet();\n"),
            ("js/greet.js", "export function greet() { return \"hi\"; }\n"),
            ("js/admin.js", "import { greet } from \"./greet\";\ngreet();\n"),
            ("css/app.css", ".app { margin: theme('spacing.18'); }\n"),
            ("vendor/a.js", "window.vendorA = true;\n"),
            ("static/robots.txt", "User-agent: *\n"),
        ]
    }

    #[tokio::test]
    async fn test_build_all_entries() {
        let (temp, config) = project(&files());
        let builder = Builder::new(config).unwrap();

        let report = builder.build(&BuildOptions::default()).await.unwrap();

        assert_eq!(report.static_files, 1);
        assert_eq!(report.modules, 5);
        assert_eq!(report.artifacts.len(), 5);
        assert_eq!(report.artifacts[0].path, builder.config().resolve_path(std::path::Path::new("out/js/app.js")));
        assert!(Uuid::parse_str(&report.build_id).is_ok());

        let app = fs::read_to_string(temp.path().join("out/js/app.js")).unwrap();
        assert!(app.find("window.vendorA").unwrap() < app.find("__kiln_define").unwrap());
        let css = fs::read_to_string(temp.path().join("out/css/app.css")).unwrap();
        assert!(css.contains("margin: 4.5rem"));
        assert!(temp.path().join("out/css/admin.css").is_file());
        assert!(temp.path().join("out/robots.txt").is_file());
    }

    #[tokio::test]
    async fn test_entry_filter() {
        let (temp, config) = project(&files());
        let builder = Builder::new(config).unwrap();

        let options = BuildOptions {
            entries: vec!["admin".to_string()],
            minify: Some(true),
        };
        let report = builder.build(&options).await.unwrap();

        assert_eq!(report.modules, 2);
        assert!(temp.path().join("out/js/admin.js").is_file());
        assert!(!temp.path().join("out/js/app.js").exists());

        let options = BuildOptions {
            entries: vec!["nope".to_string()],
            minify: None,
        };
        assert!(matches!(builder.build(&options).await, Err(KilnError::Config { .. })));
    }

    #[tokio::test]
    async fn test_failed_entry_writes_nothing_for_that_entry() {
        let mut broken = files();
        broken.retain(|(path, _)| *path != "js/admin.js");
        broken.push(("js/admin.js", "import \"./missing\";\n"));
        let (temp, config) = project(&broken);
        let builder = Builder::new(config).unwrap();

        let err = builder.build(&BuildOptions::default()).await.unwrap_err();
        assert!(matches!(err, KilnError::Resolution { .. }));
        assert!(!temp.path().join("out/js/admin.js").exists());
        assert!(!temp.path().join("out/css/admin.css").exists());
    }

    #[tokio::test]
    async fn test_static_overlap_is_rejected_before_writing() {
        let mut overlapping = files();
        overlapping.push(("static/js/app.js", "stale"));
        let (temp, config) = project(&overlapping);
        let builder = Builder::new(config).unwrap();

        let err = builder.build(&BuildOptions::default()).await.unwrap_err();
        assert!(matches!(err, KilnError::Config { .. }));
        assert!(!temp.path().join("out").exists());
    }

    #[test]
    fn test_graph_for_named_entry() {
        let (_temp, config) = project(&files());
        let builder = Builder::new(config).unwrap();

        let graph = builder.graph("app").unwrap();
        let ids: Vec<&str> = graph.modules().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["js/app.js", "css/app.css", "js/greet.js"]);

        assert!(builder.graph("missing").is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (_temp, mut config) = project(&files());
        config.build.workers = 0;
        assert!(matches!(Builder::new(config), Err(KilnError::Config { .. })));
    }
}

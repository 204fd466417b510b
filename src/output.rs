use std::io::Write;
use std::path::{Path, PathBuf};
use handlebars::{Handlebars, Helper, Output, RenderContext, RenderError};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::{KilnError, Result};
use crate::transformer::TransformedModule;

const BUNDLE_TEMPLATE: &str = "bundle";
const BANNER_TEMPLATE: &str = "banner";

/// Kind of a produced artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Script,
    Stylesheet,
    Static,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Stylesheet => "stylesheet",
            Self::Static => "static",
        }
    }
}

/// An artifact waiting to be written
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArtifact {
    pub kind: ArtifactKind,
    pub destination: PathBuf,
    /// Content fragments in output order
    pub fragments: Vec<String>,
    pub minify: bool,
}

/// An artifact that reached its destination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Values available to the banner template
#[derive(Debug, Clone, Serialize)]
pub struct BannerContext {
    pub entry: String,
    pub version: String,
    pub build_id: String,
    pub generated_at: String,
}

/// Everything one entry contributes to its artifacts
#[derive(Debug)]
pub struct EntryOutput<'a> {
    pub entry_id: &'a str,
    pub vendor_before: &'a [String],
    pub vendor_after: &'a [String],
    pub modules: &'a [TransformedModule],
    pub script_destination: PathBuf,
    pub style_destination: PathBuf,
}

#[derive(Serialize)]
struct BundleContext<'a> {
    entry: &'a str,
    modules: Vec<ModuleContext<'a>>,
}

#[derive(Serialize)]
struct ModuleContext<'a> {
    id: &'a str,
    source: String,
}

/// Assembles and writes script and stylesheet artifacts
pub struct OutputWriter {
    handlebars: Handlebars<'static>,
    minify: bool,
    has_banner: bool,
}

impl OutputWriter {
    pub fn new(config: &Config) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(true);
        handlebars.register_helper("js_string", Box::new(js_string_helper));

        handlebars
            .register_template_string(BUNDLE_TEMPLATE, bundle_template())
            .map_err(|e| KilnError::config(format!("invalid bundle template: {}", e)))?;

        let has_banner = match &config.output.banner {
            Some(banner) => {
                handlebars
                    .register_template_string(BANNER_TEMPLATE, banner)
                    .map_err(|e| KilnError::config(format!("invalid output.banner template: {}", e)))?;
                true
            }
            None => false,
        };

        Ok(Self {
            handlebars,
            minify: config.output.minify,
            has_banner,
        })
    }

    /// Override the configured minification flag
    pub fn with_minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    pub fn minify(&self) -> bool {
        self.minify
    }

    /// Build the script and stylesheet artifacts of one entry
    pub fn assemble(&self, entry: &EntryOutput<'_>) -> Result<[OutputArtifact; 2]> {
        let context = BundleContext {
            entry: entry.entry_id,
            modules: entry
                .modules
                .iter()
                .filter(|module| !module.script.is_empty())
                .map(|module| ModuleContext {
                    id: &module.id,
                    source: module.script_source(),
                })
                .collect(),
        };

        let bundle = self
            .handlebars
            .render(BUNDLE_TEMPLATE, &context)
            .map_err(|e| KilnError::transform(entry.entry_id, "assemble", e.to_string()))?;

        let mut script = Vec::with_capacity(entry.vendor_before.len() + entry.vendor_after.len() + 1);
        script.extend(entry.vendor_before.iter().cloned());
        script.push(bundle);
        script.extend(entry.vendor_after.iter().cloned());

        let styles: Vec<String> = entry
            .modules
            .iter()
            .flat_map(|module| module.styles.iter().cloned())
            .collect();

        debug!(
            "Assembled {}: {} script fragment(s), {} style fragment(s)",
            entry.entry_id,
            script.len(),
            styles.len()
        );

        Ok([
            OutputArtifact {
                kind: ArtifactKind::Script,
                destination: entry.script_destination.clone(),
                fragments: script,
                minify: self.minify,
            },
            OutputArtifact {
                kind: ArtifactKind::Stylesheet,
                destination: entry.style_destination.clone(),
                fragments: styles,
                minify: self.minify,
            },
        ])
    }

    /// Final text of an artifact: joined fragments, minified when enabled,
    /// with the banner on top
    pub fn render(&self, artifact: &OutputArtifact, banner: Option<&BannerContext>) -> Result<String> {
        let mut content = artifact.fragments.join("\n");

        if artifact.minify {
            content = match artifact.kind {
                ArtifactKind::Script => minify_script(&content)?,
                ArtifactKind::Stylesheet => minify_stylesheet(&content)?,
                ArtifactKind::Static => content,
            };
        } else if !content.ends_with('\n') && !content.is_empty() {
            content.push('\n');
        }

        match (self.has_banner, banner) {
            (true, Some(context)) => {
                let text = self
                    .handlebars
                    .render(BANNER_TEMPLATE, context)
                    .map_err(|e| KilnError::config(format!("output.banner failed to render: {}", e)))?;
                Ok(format!("/*! {} */\n{}", text.trim().replace("*/", "* /"), content))
            }
            _ => Ok(content),
        }
    }

    /// Render every artifact, stage each in a temporary file beside its
    /// destination, then move them all into place. Nothing reaches a
    /// destination unless every artifact rendered and staged.
    pub fn write(&self, artifacts: &[OutputArtifact], banner: Option<&BannerContext>) -> Result<Vec<WrittenArtifact>> {
        let mut staged = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            let content = self.render(artifact, banner)?;
            let temp = stage(&artifact.destination, content.as_bytes())?;
            staged.push((artifact, temp, content.len() as u64));
        }

        let mut written = Vec::with_capacity(staged.len());
        for (artifact, temp, bytes) in staged {
            temp.persist(&artifact.destination)
                .map_err(|e| KilnError::write_error(&artifact.destination, e.error))?;
            info!("Wrote {} ({} bytes)", artifact.destination.display(), bytes);
            written.push(WrittenArtifact {
                kind: artifact.kind,
                path: artifact.destination.clone(),
                bytes,
            });
        }

        Ok(written)
    }
}

fn stage(destination: &Path, content: &[u8]) -> Result<NamedTempFile> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    std::fs::create_dir_all(parent).map_err(|e| KilnError::write_error(destination, e))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| KilnError::write_error(destination, e))?;
    temp.write_all(content)
        .and_then(|_| temp.flush())
        .map_err(|e| KilnError::write_error(destination, e))?;
    Ok(temp)
}

/// Minify a script until the output stops shrinking
pub fn minify_script(code: &str) -> Result<String> {
    minify_to_fixpoint(code, |input| Ok(minifier::js::minify(input).to_string()))
}

/// Minify a stylesheet until the output stops shrinking
pub fn minify_stylesheet(css: &str) -> Result<String> {
    minify_to_fixpoint(css, |input| {
        minifier::css::minify(input)
            .map(|minified| minified.to_string())
            .map_err(|message| KilnError::Minification {
                kind: "stylesheet".to_string(),
                message: message.to_string(),
            })
    })
}

fn minify_to_fixpoint<F>(input: &str, pass: F) -> Result<String>
where
    F: Fn(&str) -> Result<String>,
{
    let mut current = input.to_string();
    loop {
        let next = pass(&current)?;
        if next.len() >= current.len() {
            return Ok(current);
        }
        current = next;
    }
}

fn bundle_template() -> &'static str {
    r#"(function () {
  "use strict";
  var definitions = {};
  var cache = {};
  function __kiln_define(id, definition) {
    definitions[id] = definition;
  }
  function __kiln_require(id) {
    if (cache[id]) return cache[id].exports;
    var definition = definitions[id];
    if (!definition) throw new Error("kiln: module " + id + " is not in this bundle");
    var module = cache[id] = { exports: {} };
    definition.call(module.exports, module, module.exports, __kiln_require);
    return module.exports;
  }
  function __kiln_interop(m) {
    if (m && m.__esModule) return m;
    var ns = { default: m };
    if (m && (typeof m === "object" || typeof m === "function")) {
      for (var k in m) if (k !== "default") ns[k] = m[k];
    }
    return ns;
  }
{{#each modules}}
  __kiln_define({{js_string id}}, function (module, exports, require) {
{{source}}
  });
{{/each}}
  __kiln_require({{js_string entry}});
})();"#
}

// Handlebars helper functions

fn js_string_helper(
    h: &Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> std::result::Result<(), RenderError> {
    let value = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .ok_or_else(|| RenderError::from(handlebars::RenderErrorReason::ParamNotFoundForIndex("js_string", 0)))?;

    out.write(&serde_json::Value::String(value.to_string()).to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModuleKind;
    use tempfile::TempDir;

    fn module(id: &str, script: &[&str], styles: &[&str]) -> TransformedModule {
        TransformedModule {
            id: id.to_string(),
            path: PathBuf::from(format!("/project/{}", id)),
            kind: ModuleKind::Script,
            script: script.iter().map(|s| s.to_string()).collect(),
            styles: styles.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn entry<'a>(
        modules: &'a [TransformedModule],
        before: &'a [String],
        after: &'a [String],
        dir: &Path,
    ) -> EntryOutput<'a> {
        EntryOutput {
            entry_id: "js/app.js",
            vendor_before: before,
            vendor_after: after,
            modules,
            script_destination: dir.join("js/app.js"),
            style_destination: dir.join("css/app.css"),
        }
    }

    #[test]
    fn test_assemble_orders_vendor_and_modules() {
        let temp = TempDir::new().unwrap();
        let writer = OutputWriter::new(&Config::default()).unwrap();
        let modules = vec![
            module("js/app.js", &["exports.app = 1;"], &[]),
            module("css/app.css", &[], &[".app { color: red; }"]),
            module("js/dep.js", &["exports.dep = 2;"], &[".dep { margin: 0; }"]),
        ];
        let before = vec!["window.vendorA = 1;".to_string(), "window.vendorB = 2;".to_string()];

        let [script, style] = writer.assemble(&entry(&modules, &before, &[], temp.path())).unwrap();
        let text = writer.render(&script, None).unwrap();

        let vendor_a = text.find("window.vendorA").unwrap();
        let vendor_b = text.find("window.vendorB").unwrap();
        let app = text.find("exports.app = 1;").unwrap();
        let dep = text.find("exports.dep = 2;").unwrap();
        assert!(vendor_a < vendor_b && vendor_b < app && app < dep);
        assert!(text.contains("__kiln_define(\"js/app.js\""));
        assert!(!text.contains("__kiln_define(\"css/app.css\""));
        assert!(text.trim_end().ends_with("__kiln_require(\"js/app.js\");\n})();"));

        assert_eq!(style.fragments, vec![".app { color: red; }", ".dep { margin: 0; }"]);
        assert_eq!(style.kind, ArtifactKind::Stylesheet);
    }

    #[test]
    fn test_vendor_after_policy() {
        let temp = TempDir::new().unwrap();
        let writer = OutputWriter::new(&Config::default()).unwrap();
        let modules = vec![module("js/app.js", &["exports.app = 1;"], &[])];
        let after = vec!["window.late = true;".to_string()];

        let [script, _] = writer.assemble(&entry(&modules, &[], &after, temp.path())).unwrap();
        let text = writer.render(&script, None).unwrap();
        assert!(text.find("exports.app").unwrap() < text.find("window.late").unwrap());
    }

    #[test]
    fn test_minification_is_idempotent() {
        let code = "function add(first, second) {\n    // sum\n    return first + second;\n}\nexports.add = add;\n";
        let once = minify_script(code).unwrap();
        let twice = minify_script(&once).unwrap();
        assert!(once.len() < code.len());
        assert_eq!(once, twice);
        assert!(once.contains("exports.add"));

        let css = ".a {\n  color: red;\n}\n\n/* note */\n.b { margin: 0 ; }\n";
        let once = minify_stylesheet(css).unwrap();
        assert!(once.len() < css.len());
        assert_eq!(once, minify_stylesheet(&once).unwrap());
        assert!(once.contains(".b"));
    }

    #[test]
    fn test_write_creates_directories_and_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let writer = OutputWriter::new(&Config::default()).unwrap();
        let modules = vec![module("js/app.js", &["exports.app = 1;"], &[".a{}"])];

        let artifacts = writer.assemble(&entry(&modules, &[], &[], temp.path())).unwrap();
        let written = writer.write(&artifacts, None).unwrap();

        assert_eq!(written.len(), 2);
        assert!(temp.path().join("js/app.js").is_file());
        assert_eq!(std::fs::read_to_string(temp.path().join("css/app.css")).unwrap(), ".a{}\n");
        assert_eq!(std::fs::read_dir(temp.path().join("js")).unwrap().count(), 1);
        assert_eq!(written[0].bytes, std::fs::metadata(temp.path().join("js/app.js")).unwrap().len());
    }

    #[test]
    fn test_banner() {
        let mut config = Config::default();
        config.output.banner = Some("{{entry}} v{{version}} ({{build_id}})".to_string());
        let writer = OutputWriter::new(&config).unwrap();

        let artifact = OutputArtifact {
            kind: ArtifactKind::Stylesheet,
            destination: PathBuf::from("app.css"),
            fragments: vec![".a { color: red; }".to_string()],
            minify: false,
        };
        let banner = BannerContext {
            entry: "app".to_string(),
            version: "0.1.0".to_string(),
            build_id: "b-1".to_string(),
            generated_at: "2024-01-01T00:00:00Z".to_string(),
        };

        let text = writer.render(&artifact, Some(&banner)).unwrap();
        assert!(text.starts_with("/*! app v0.1.0 (b-1) */\n"));

        config.output.banner = Some("{{#if}}".to_string());
        assert!(OutputWriter::new(&config).is_err());
    }

    #[test]
    fn test_write_failure_is_write_error() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();

        let writer = OutputWriter::new(&Config::default()).unwrap();
        let artifacts = vec![OutputArtifact {
            kind: ArtifactKind::Script,
            destination: blocker.join("app.js"),
            fragments: vec!["1;".to_string()],
            minify: false,
        }];

        let err = writer.write(&artifacts, None).unwrap_err();
        assert!(matches!(err, KilnError::Write { .. }));
    }
}

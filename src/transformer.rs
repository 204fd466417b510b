//! Per-kind transform chains.
//!
//! Every module kind is bound to an ordered list of named stages. A stage is a
//! plain function from a [`Fragment`] to a [`StageOutput`]: the rewritten
//! fragment plus zero or more child fragments of a different kind. Children
//! run through their own kind's chain and are collected after their parent.
//! The fragment's [`Route`] decides which artifact its content lands in.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use regex::{Captures, Regex};
use tracing::debug;

use crate::analyzer::{lex_script, lex_stylesheet, mask_script, CSS_IMPORT_RE, EXPORT_FROM_RE, IMPORT_RE, REQUIRE_RE};
use crate::component::ComponentBlocks;
use crate::config::Config;
use crate::errors::{KilnError, Result};
use crate::graph::{Module, ModuleGraph, ModuleKind};
use crate::prefixes::PrefixRegistry;
use crate::resolver::ModuleResolver;
use crate::tokens::DesignTokens;

static EXPORT_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<indent>[ \t]*)export\s+default\s+").expect("export default pattern is valid")
});

static EXPORT_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^(?P<indent>[ \t]*)export\s+(?P<keyword>(?:async\s+)?function\s*\*?|class|const|let|var)\s*(?P<name>[\w$]+)",
    )
    .expect("export declaration pattern is valid")
});

static EXPORT_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<indent>[ \t]*)export\s*\{(?P<names>[^}]*)\}[ \t]*;?")
        .expect("export list pattern is valid")
});

/// Where a finished fragment's content goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Into the entry's script artifact
    Inline,
    /// Into the entry's stylesheet artifact
    Extract,
    /// Replaced entirely by its children
    Consumed,
}

/// Content moving through a chain
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub kind: ModuleKind,
    pub content: String,
    pub route: Route,
    /// Free-form metadata stages pass to later stages
    pub attributes: BTreeMap<String, String>,
}

impl Fragment {
    pub fn new(kind: ModuleKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            route: Route::Inline,
            attributes: BTreeMap::new(),
        }
    }

    fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

/// Result of one stage
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub fragment: Fragment,
    pub children: Vec<Fragment>,
}

impl From<Fragment> for StageOutput {
    fn from(fragment: Fragment) -> Self {
        Self {
            fragment,
            children: Vec::new(),
        }
    }
}

/// Read-only inputs available to every stage
pub struct StageContext<'a> {
    pub module: &'a Module,
    pub graph: &'a ModuleGraph,
    pub resolver: &'a ModuleResolver,
    pub tokens: &'a DesignTokens,
    pub prefixes: &'a PrefixRegistry,
}

impl StageContext<'_> {
    /// Graph module a specifier of the current module resolved to
    fn target(&self, specifier: &str) -> std::result::Result<&Module, String> {
        let path = self
            .module
            .resolved(specifier)
            .ok_or_else(|| format!("import '{}' was not resolved", specifier))?;
        self.graph
            .get(path)
            .ok_or_else(|| format!("import '{}' points outside the module graph", specifier))
    }
}

pub type StageFn = fn(Fragment, &StageContext<'_>) -> std::result::Result<StageOutput, String>;

/// A named transform stage
#[derive(Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    pub run: StageFn,
}

impl Stage {
    pub const fn new(name: &'static str, run: StageFn) -> Self {
        Self { name, run }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Output of the chains for one module, split by destination
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedModule {
    pub id: String,
    pub path: PathBuf,
    pub kind: ModuleKind,
    pub script: Vec<String>,
    pub styles: Vec<String>,
}

impl TransformedModule {
    pub fn script_source(&self) -> String {
        self.script.join("\n")
    }
}

/// Applies the chain bound to each module kind
#[derive(Debug)]
pub struct TransformPipeline {
    chains: HashMap<ModuleKind, Vec<Stage>>,
    resolver: ModuleResolver,
    tokens: DesignTokens,
    prefixes: PrefixRegistry,
}

impl TransformPipeline {
    pub fn new(config: &Config, resolver: ModuleResolver) -> Result<Self> {
        let mut chains = HashMap::new();
        chains.insert(
            ModuleKind::Script,
            vec![
                Stage::new("check-syntax", check_script_syntax),
                Stage::new("strip-comments", strip_script_comments),
                Stage::new("rewrite-imports", rewrite_imports),
                Stage::new("rewrite-exports", rewrite_exports),
            ],
        );
        chains.insert(
            ModuleKind::Component,
            vec![Stage::new("split-component", split_component)],
        );
        chains.insert(
            ModuleKind::Stylesheet,
            vec![
                Stage::new("import-inline", inline_style_imports),
                Stage::new("design-tokens", substitute_tokens),
                Stage::new("vendor-prefix", expand_prefixes),
                Stage::new("extract", mark_extracted),
            ],
        );
        chains.insert(
            ModuleKind::Vendor,
            vec![Stage::new("check-syntax", check_script_syntax)],
        );

        Ok(Self {
            chains,
            resolver,
            tokens: DesignTokens::from_table(&config.tokens),
            prefixes: PrefixRegistry::new(&config.prefixes)?,
        })
    }

    /// Replace the chain bound to a kind
    pub fn set_chain(&mut self, kind: ModuleKind, stages: Vec<Stage>) {
        self.chains.insert(kind, stages);
    }

    /// Stage names bound to a kind, in order
    pub fn chain(&self, kind: ModuleKind) -> Vec<&'static str> {
        self.chains
            .get(&kind)
            .map(|stages| stages.iter().map(|s| s.name).collect())
            .unwrap_or_default()
    }

    pub fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    /// Run a module through its chain
    pub fn apply(&self, module: &Module, graph: &ModuleGraph) -> Result<TransformedModule> {
        let ctx = StageContext {
            module,
            graph,
            resolver: &self.resolver,
            tokens: &self.tokens,
            prefixes: &self.prefixes,
        };

        let mut finished = Vec::new();
        self.run_chain(Fragment::new(module.kind, module.source.as_str()), &ctx, &mut finished)?;

        let mut transformed = TransformedModule {
            id: module.id.clone(),
            path: module.path.clone(),
            kind: module.kind,
            script: Vec::new(),
            styles: Vec::new(),
        };
        for fragment in finished {
            match fragment.route {
                Route::Inline => transformed.script.push(fragment.content),
                Route::Extract => transformed.styles.push(fragment.content),
                Route::Consumed => {}
            }
        }

        debug!(
            "Transformed {}: {} script / {} style fragment(s)",
            module.id,
            transformed.script.len(),
            transformed.styles.len()
        );
        Ok(transformed)
    }

    /// Run a vendor script through the vendor chain
    pub fn apply_vendor(&self, id: &str, path: &Path, source: String) -> Result<String> {
        let module = Module::new(id, path, ModuleKind::Vendor, source);
        let graph = ModuleGraph::new();
        let transformed = self.apply(&module, &graph)?;
        Ok(transformed.script_source())
    }

    fn run_chain(&self, mut fragment: Fragment, ctx: &StageContext<'_>, finished: &mut Vec<Fragment>) -> Result<()> {
        let kind = fragment.kind;
        let stages = self.chains.get(&kind).ok_or_else(|| {
            KilnError::transform(&ctx.module.id, "select-chain", format!("no chain bound to {} modules", kind))
        })?;

        let mut children = Vec::new();
        for stage in stages {
            let output = (stage.run)(fragment, ctx)
                .map_err(|diagnostic| KilnError::transform(&ctx.module.id, stage.name, diagnostic))?;

            for child in &output.children {
                if child.kind == kind {
                    return Err(KilnError::transform(
                        &ctx.module.id,
                        stage.name,
                        format!("stage emitted a child fragment of its own kind ({})", kind),
                    ));
                }
            }

            fragment = output.fragment;
            children.extend(output.children);
        }

        finished.push(fragment);
        for child in children {
            self.run_chain(child, ctx, finished)?;
        }
        Ok(())
    }
}

// Script stages

fn check_script_syntax(fragment: Fragment, _ctx: &StageContext<'_>) -> std::result::Result<StageOutput, String> {
    lex_script(&fragment.content)?;
    Ok(fragment.into())
}

fn strip_script_comments(fragment: Fragment, _ctx: &StageContext<'_>) -> std::result::Result<StageOutput, String> {
    let stripped = lex_script(&fragment.content)?;
    Ok(fragment.with_content(stripped).into())
}

fn rewrite_imports(mut fragment: Fragment, ctx: &StageContext<'_>) -> std::result::Result<StageOutput, String> {
    let mut failure: Option<String> = None;
    let mut counter = 0usize;
    let mut esm = false;

    let code = replace_code(&REQUIRE_RE, &fragment.content, |caps| {
        match ctx.target(&caps["src"]) {
            Ok(target) if target.kind == ModuleKind::Stylesheet => "({})".to_string(),
            Ok(target) => format!("require({})", js_string(&target.id)),
            Err(err) => {
                record(&mut failure, err);
                caps[0].to_string()
            }
        }
    })?;

    let code = replace_code(&EXPORT_FROM_RE, &code, |caps| {
        esm = true;
        counter += 1;
        let module = match ctx.target(&caps["src"]) {
            Ok(target) => import_expression(target),
            Err(err) => {
                record(&mut failure, err);
                return caps[0].to_string();
            }
        };

        let clause = caps["clause"].trim();
        if clause == "*" {
            format!(
                "(function(m){{ for (var k in m) if (k !== \"default\" && !(k in exports)) exports[k] = m[k]; }})({});",
                module
            )
        } else if let Some(ns) = clause.strip_prefix('*') {
            let name = ns.trim().trim_start_matches("as").trim();
            format!("exports.{} = {};", name, module)
        } else {
            let temp = format!("__kiln_reexport_{}", counter);
            let mut out = format!("var {} = {};", temp, module);
            for (imported, local) in named_bindings(clause) {
                out.push_str(&format!(" exports.{} = {}.{};", local, temp, imported));
            }
            out
        }
    })?;

    let code = replace_code(&IMPORT_RE, &code, |caps| {
        esm = true;
        counter += 1;
        let target = match ctx.target(&caps["src"]) {
            Ok(target) => target,
            Err(err) => {
                record(&mut failure, err);
                return caps[0].to_string();
            }
        };

        let Some(clause) = caps.name("clause").map(|m| m.as_str().trim()).filter(|c| !c.is_empty()) else {
            return if target.kind == ModuleKind::Stylesheet {
                String::new()
            } else {
                format!("require({});", js_string(&target.id))
            };
        };

        let temp = format!("__kiln_import_{}", counter);
        let mut out = format!("var {} = {};", temp, import_expression(target));
        match import_bindings(clause) {
            Ok(bindings) => {
                for (local, access) in bindings {
                    out.push_str(&format!(" var {} = {}{};", local, temp, access));
                }
            }
            Err(err) => record(&mut failure, err),
        }
        out
    })?;

    if let Some(err) = failure {
        return Err(err);
    }

    if esm {
        fragment.attributes.insert("esm".to_string(), "true".to_string());
    }
    Ok(fragment.with_content(code).into())
}

fn rewrite_exports(mut fragment: Fragment, _ctx: &StageContext<'_>) -> std::result::Result<StageOutput, String> {
    let mut hoisted: Vec<String> = Vec::new();
    let mut trailing: Vec<String> = Vec::new();
    let mut esm = fragment.attributes.get("esm").is_some_and(|v| v == "true");

    let code = replace_code(&EXPORT_DEFAULT_RE, &fragment.content, |caps| {
        esm = true;
        format!("{}exports.default = ", &caps["indent"])
    })?;

    let code = replace_code(&EXPORT_DECL_RE, &code, |caps| {
        esm = true;
        let keyword = &caps["keyword"];
        let name = caps["name"].to_string();
        if keyword.contains("function") {
            hoisted.push(format!("exports.{0} = {0};", name));
        } else {
            trailing.push(format!("exports.{0} = {0};", name));
        }
        format!("{}{} {}", &caps["indent"], keyword, name)
    })?;

    let code = replace_code(&EXPORT_LIST_RE, &code, |caps| {
        esm = true;
        let assignments: Vec<String> = named_bindings(&caps["names"])
            .into_iter()
            .map(|(local, exported)| format!("exports.{} = {};", exported, local))
            .collect();
        format!("{}{}", &caps["indent"], assignments.join(" "))
    })?;

    if let Some((line, _)) = mask_script(&code)?
        .lines()
        .enumerate()
        .find(|(_, l)| l.trim_start().starts_with("export ") || l.trim_start().starts_with("export{"))
    {
        return Err(format!("unsupported export form at line {}", line + 1));
    }

    let mut out = String::new();
    if esm {
        out.push_str("exports.__esModule = true;\n");
    }
    for line in &hoisted {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&code);
    if !trailing.is_empty() {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&trailing.join("\n"));
        out.push('\n');
    }

    fragment.attributes.insert("esm".to_string(), esm.to_string());
    Ok(fragment.with_content(out).into())
}

/// `Regex::replace_all` over code only. Matches are found in the literal
/// mask, then captured again from the original text so specifiers keep
/// their contents.
fn replace_code<F>(re: &Regex, code: &str, mut replace: F) -> std::result::Result<String, String>
where
    F: FnMut(&Captures<'_>) -> String,
{
    let masked = mask_script(code)?;
    let mut out = String::with_capacity(code.len());
    let mut last = 0;
    for found in re.find_iter(&masked) {
        let span = &code[found.range()];
        let Some(caps) = re.captures(span).filter(|c| c.get(0).is_some_and(|m| m.len() == span.len())) else {
            continue;
        };
        out.push_str(&code[last..found.start()]);
        out.push_str(&replace(&caps));
        last = found.end();
    }
    out.push_str(&code[last..]);
    Ok(out)
}

fn record(failure: &mut Option<String>, err: String) {
    if failure.is_none() {
        *failure = Some(err);
    }
}

fn import_expression(target: &Module) -> String {
    if target.kind == ModuleKind::Stylesheet {
        "{}".to_string()
    } else {
        format!("__kiln_interop(require({}))", js_string(&target.id))
    }
}

/// `Default, * as ns, { a, b as c }` to (local, accessor) pairs
fn import_bindings(clause: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let mut bindings = Vec::new();
    let mut rest = clause.to_string();

    if let Some(open) = clause.find('{') {
        let close = clause[open..]
            .find('}')
            .map(|i| i + open)
            .ok_or_else(|| format!("unterminated import list in '{}'", clause))?;
        for (imported, local) in named_bindings(&clause[open + 1..close]) {
            bindings.push((local, format!(".{}", imported)));
        }
        rest = format!("{}{}", &clause[..open], &clause[close + 1..]);
    }

    for part in rest.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(ns) = part.strip_prefix('*') {
            let name = ns.trim().strip_prefix("as").map(str::trim).unwrap_or_default();
            if !is_identifier(name) {
                return Err(format!("malformed namespace import '{}'", part));
            }
            bindings.insert(0, (name.to_string(), String::new()));
        } else if is_identifier(part) {
            bindings.insert(0, (part.to_string(), ".default".to_string()));
        } else {
            return Err(format!("malformed import clause '{}'", clause));
        }
    }

    Ok(bindings)
}

/// `a, b as c` to (source name, bound name) pairs
fn named_bindings(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once(" as ") {
            Some((name, alias)) => (name.trim().to_string(), alias.trim().to_string()),
            None => (item.to_string(), item.to_string()),
        })
        .collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

// Component stages

fn split_component(mut fragment: Fragment, _ctx: &StageContext<'_>) -> std::result::Result<StageOutput, String> {
    let blocks = ComponentBlocks::parse(&fragment.content)?;
    blocks.check_languages()?;

    let script = blocks
        .script
        .as_ref()
        .map(|block| block.content.clone())
        .unwrap_or_else(|| "export default {};\n".to_string());
    let template = blocks
        .template
        .as_ref()
        .map(|block| block.content.trim().to_string())
        .unwrap_or_default();

    let mut children = vec![Fragment::new(
        ModuleKind::Script,
        format!("{}\nexport const template = {};\n", script, js_string(&template)),
    )];

    for style in &blocks.styles {
        let mut child = Fragment::new(ModuleKind::Stylesheet, style.content.as_str());
        child.attributes = style.attributes.clone();
        children.push(child);
    }

    fragment.content.clear();
    fragment.route = Route::Consumed;
    Ok(StageOutput { fragment, children })
}

// Stylesheet stages

fn inline_style_imports(fragment: Fragment, ctx: &StageContext<'_>) -> std::result::Result<StageOutput, String> {
    let mut in_progress = HashSet::new();
    let mut emitted = HashSet::new();
    in_progress.insert(ctx.module.path.clone());
    emitted.insert(ctx.module.path.clone());

    let content = inline_imports(
        &fragment.content,
        &ctx.module.path,
        &ctx.module.id,
        ctx,
        &mut in_progress,
        &mut emitted,
    )?;
    Ok(fragment.with_content(content).into())
}

fn inline_imports(
    css: &str,
    path: &Path,
    id: &str,
    ctx: &StageContext<'_>,
    in_progress: &mut HashSet<PathBuf>,
    emitted: &mut HashSet<PathBuf>,
) -> std::result::Result<String, String> {
    let css = lex_stylesheet(css).map_err(|e| format!("{}: {}", id, e))?;

    let mut out = String::with_capacity(css.len());
    let mut last = 0usize;

    for caps in CSS_IMPORT_RE.captures_iter(&css) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&css[last..whole.start()]);
        last = whole.end();

        let specifier = caps
            .name("src")
            .or_else(|| caps.name("url"))
            .map(|m| m.as_str().trim())
            .unwrap_or_default();

        // Remote stylesheets stay as directives.
        if specifier.starts_with("http://") || specifier.starts_with("https://") || specifier.starts_with("//") {
            out.push_str(whole.as_str());
            continue;
        }

        let target = ctx
            .resolver
            .resolve_stylesheet(path, specifier)
            .map_err(|reason| format!("cannot resolve @import '{}' in {}: {}", specifier, id, reason))?;

        if in_progress.contains(&target) || !emitted.insert(target.clone()) {
            debug!("Skipping repeated @import {} in {}", specifier, id);
            continue;
        }

        let source = std::fs::read_to_string(&target)
            .map_err(|e| format!("cannot read {}: {}", target.display(), e))?;
        let target_id = ctx.resolver.module_id(&target);

        in_progress.insert(target.clone());
        let inlined = inline_imports(&source, &target, &target_id, ctx, in_progress, emitted)?;
        in_progress.remove(&target);

        let media = caps.name("media").map(|m| m.as_str().trim()).unwrap_or_default();
        if media.is_empty() {
            out.push_str(inlined.trim_end());
        } else {
            out.push_str(&format!("@media {} {{\n{}\n}}", media, inlined.trim()));
        }
    }

    out.push_str(&css[last..]);
    Ok(out)
}

fn substitute_tokens(fragment: Fragment, ctx: &StageContext<'_>) -> std::result::Result<StageOutput, String> {
    let content = ctx.tokens.substitute(&fragment.content)?;
    Ok(fragment.with_content(content).into())
}

fn expand_prefixes(fragment: Fragment, ctx: &StageContext<'_>) -> std::result::Result<StageOutput, String> {
    let content = ctx.prefixes.expand(&fragment.content);
    Ok(fragment.with_content(content).into())
}

fn mark_extracted(mut fragment: Fragment, _ctx: &StageContext<'_>) -> std::result::Result<StageOutput, String> {
    fragment.route = Route::Extract;
    Ok(fragment.into())
}

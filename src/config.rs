use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::{KilnError, Result};
use crate::glob::GlobPattern;

pub const CONFIG_FILE_NAME: &str = "kiln.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory every relative path is resolved against
    #[serde(skip)]
    pub root: PathBuf,

    /// Module resolution and scheduling
    #[serde(default)]
    pub build: BuildConfig,

    /// Artifact writing
    #[serde(default)]
    pub output: OutputConfig,

    /// Entry points, one script and one stylesheet artifact each
    #[serde(default = "default_entries")]
    pub entries: Vec<EntryConfig>,

    /// Directory trees mirrored verbatim
    #[serde(default = "default_static_copy")]
    pub static_copy: Vec<StaticCopyConfig>,

    /// Design-token table consulted by `theme()` references
    #[serde(default = "default_tokens")]
    pub tokens: toml::Table,

    /// Extra vendor-prefix rules, property name to prefixes
    #[serde(default)]
    pub prefixes: BTreeMap<String, Vec<String>>,

    /// Client runtime connection settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directories searched for bare package specifiers
    #[serde(default = "default_package_dirs")]
    pub package_dirs: Vec<PathBuf>,

    /// Directories searched for stylesheet `@import` targets
    #[serde(default = "default_style_paths")]
    pub style_paths: Vec<PathBuf>,

    /// Extensions tried, in order, when a specifier has none
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Maximum number of entry points built in parallel
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Minify script and stylesheet artifacts
    #[serde(default)]
    pub minify: bool,

    /// Handlebars template prepended to every artifact
    pub banner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    /// Entry name, used for filtering and reporting
    pub name: String,

    /// Entry module path
    pub input: PathBuf,

    /// Destination of the script bundle
    pub script_output: PathBuf,

    /// Destination of the extracted stylesheet
    pub style_output: PathBuf,

    /// Glob patterns for vendor scripts
    #[serde(default)]
    pub vendor: Vec<String>,

    /// Where vendor scripts go relative to application code
    #[serde(default)]
    pub vendor_position: VendorPosition,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VendorPosition {
    #[default]
    Before,
    After,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticCopyConfig {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Scheme and host of the rendering server
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the live endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Query parameter carrying the authentication token
    #[serde(default = "default_token_param")]
    pub token_param: String,

    /// Protocol version sent with every handshake
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Attribute naming the hook bound to a node
    #[serde(default = "default_hook_attribute")]
    pub hook_attribute: String,

    /// Class marking nodes that receive a mounted component
    #[serde(default = "default_mount_class")]
    pub mount_class: String,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds
    #[serde(default = "default_backoff_initial")]
    pub initial_ms: u64,

    /// Upper bound of the retry delay in milliseconds
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,

    /// Growth factor applied after each failure
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,

    /// Give up after this many consecutive failures (unbounded when absent)
    pub max_attempts: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            build: BuildConfig::default(),
            output: OutputConfig::default(),
            entries: default_entries(),
            static_copy: default_static_copy(),
            tokens: default_tokens(),
            prefixes: BTreeMap::new(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            package_dirs: default_package_dirs(),
            style_paths: default_style_paths(),
            extensions: default_extensions(),
            workers: default_workers(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            minify: false,
            banner: None,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoint: default_endpoint(),
            token_param: default_token_param(),
            protocol_version: default_protocol_version(),
            hook_attribute: default_hook_attribute(),
            mount_class: default_mount_class(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial(),
            max_ms: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
            max_attempts: None,
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::find_config_file()?,
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).map_err(|e| {
                KilnError::file_system_error("Failed to read config file", &config_path, e)
            })?;

            let mut config = Self::from_toml(&content).map_err(|e| match e {
                KilnError::Config { message, source } => KilnError::Config {
                    message: format!("{}: {}", config_path.display(), message),
                    source,
                },
                other => other,
            })?;
            config.root = config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok(config)
        } else if path.is_some() {
            Err(KilnError::config(format!(
                "config file not found: {}",
                config_path.display()
            )))
        } else {
            let mut config = Config::default();
            config.root = config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok(config)
        }
    }

    /// Parse configuration text; the root stays at `.` until the caller sets it
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Initialize configuration file
    pub fn init(output_dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

        let config_path = output_dir.join(CONFIG_FILE_NAME);
        let config = Config::default();

        let content = toml::to_string_pretty(&config)
            .context("Failed to serialize default configuration")?;

        let content = format!(
            "# Kiln build configuration\n# Relative paths resolve against this file's directory.\n\n{}",
            content
        );

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Reject configurations no stage can run with
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(KilnError::config("at least one [[entries]] table is required"));
        }
        if self.build.workers == 0 {
            return Err(KilnError::config("build.workers must be at least 1"));
        }

        let mut names = HashSet::new();
        let mut destinations: HashMap<PathBuf, &str> = HashMap::new();
        for entry in &self.entries {
            if entry.name.trim().is_empty() {
                return Err(KilnError::config("entry name must not be empty"));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(KilnError::config(format!("duplicate entry name '{}'", entry.name)));
            }
            if entry.input.as_os_str().is_empty() {
                return Err(KilnError::config(format!("entry '{}' has an empty input", entry.name)));
            }
            if self.resolve_path(&entry.script_output) == self.resolve_path(&entry.style_output) {
                return Err(KilnError::config(format!(
                    "entry '{}' writes script and style to the same path",
                    entry.name
                )));
            }
            for output in [&entry.script_output, &entry.style_output] {
                let destination = self.resolve_path(output);
                if let Some(owner) = destinations.insert(destination, entry.name.as_str()) {
                    return Err(KilnError::config(format!(
                        "entries '{}' and '{}' both write {}",
                        owner,
                        entry.name,
                        output.display()
                    )));
                }
            }
            for pattern in &entry.vendor {
                GlobPattern::compile(pattern)?;
            }
        }

        let backoff = &self.runtime.backoff;
        if backoff.initial_ms == 0 || backoff.max_ms < backoff.initial_ms {
            return Err(KilnError::config(
                "runtime.backoff requires 0 < initial_ms <= max_ms",
            ));
        }
        if !(backoff.multiplier >= 1.0) {
            return Err(KilnError::config("runtime.backoff.multiplier must be >= 1.0"));
        }
        url::Url::parse(&self.runtime.base_url).map_err(|e| KilnError::Config {
            message: format!("runtime.base_url '{}' is not a URL", self.runtime.base_url),
            source: Some(Box::new(e)),
        })?;

        Ok(())
    }

    /// Resolve a configured path against the project root
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.root.join(path))
        }
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Result<PathBuf> {
        let current_dir = std::env::current_dir()
            .map_err(|e| KilnError::file_system_error("Failed to get current directory", ".", e))?;

        // Look for kiln.toml in current directory and parents
        let mut dir = current_dir.as_path();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Ok(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }

        // Look in config directory
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("kiln").join("config.toml");
            if config_path.exists() {
                return Ok(config_path);
            }
        }

        // Return default path (may not exist)
        Ok(current_dir.join(CONFIG_FILE_NAME))
    }
}

/// Lexically remove `.` and `..` components without touching the file system
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

// Default value functions
fn default_entries() -> Vec<EntryConfig> {
    vec![EntryConfig {
        name: "app".to_string(),
        input: PathBuf::from("js/app.js"),
        script_output: PathBuf::from("../priv/static/js/app.js"),
        style_output: PathBuf::from("../priv/static/css/app.css"),
        vendor: vec!["vendor/**/*.js".to_string()],
        vendor_position: VendorPosition::Before,
    }]
}

fn default_static_copy() -> Vec<StaticCopyConfig> {
    vec![StaticCopyConfig {
        from: PathBuf::from("static"),
        to: PathBuf::from("../priv/static"),
    }]
}

fn default_tokens() -> toml::Table {
    let mut spacing = toml::Table::new();
    spacing.insert("18".to_string(), toml::Value::String("4.5rem".to_string()));

    let mut tokens = toml::Table::new();
    tokens.insert("spacing".to_string(), toml::Value::Table(spacing));
    tokens
}

fn default_package_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("node_modules")]
}

fn default_style_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("css")]
}

fn default_extensions() -> Vec<String> {
    vec![
        ".js".to_string(),
        ".mjs".to_string(),
        ".vue".to_string(),
        ".css".to_string(),
    ]
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_base_url() -> String {
    "ws://localhost:4000".to_string()
}

fn default_endpoint() -> String {
    "/live".to_string()
}

fn default_token_param() -> String {
    "_csrf_token".to_string()
}

fn default_protocol_version() -> String {
    "2.0.0".to_string()
}

fn default_hook_attribute() -> String {
    "phx-hook".to_string()
}

fn default_mount_class() -> String {
    "vue-editor".to_string()
}

fn default_backoff_initial() -> u64 {
    50
}

fn default_backoff_max() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

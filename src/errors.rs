use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Kiln
#[derive(Error, Debug)]
pub enum KilnError {
    #[error("Cannot resolve '{identifier}' imported from {module}: {reason}")]
    Resolution {
        module: String,
        identifier: String,
        reason: String,
    },

    #[error("Transform stage '{stage}' failed for {module}: {diagnostic}")]
    Transform {
        module: String,
        stage: String,
        diagnostic: String,
    },

    #[error("Failed to write artifact {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("File system error: {message}")]
    FileSystem {
        message: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Minification of {kind} failed: {message}")]
    Minification {
        kind: String,
        message: String,
    },

    #[error("Connection to {url} failed: {message}")]
    Connection {
        url: String,
        message: String,
    },

    #[error("Unknown hook '{name}' on node '{node}'")]
    UnknownHook {
        name: String,
        node: String,
    },

    #[error("Server reported an error: {message}")]
    Server { message: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, KilnError>;

impl KilnError {
    pub fn resolution(
        module: impl Into<String>,
        identifier: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            module: module.into(),
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    pub fn transform(
        module: impl Into<String>,
        stage: impl Into<String>,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self::Transform {
            module: module.into(),
            stage: stage.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn write_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub fn file_system_error(
        message: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error
    ) -> Self {
        Self::FileSystem {
            message: message.into(),
            path: path.into(),
            source,
        }
    }

    pub fn connection(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Get error category for reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Resolution { .. } => ErrorCategory::Resolution,

            Self::Transform { .. } |
            Self::Minification { .. } => ErrorCategory::Transform,

            Self::Write { .. } |
            Self::FileSystem { .. } => ErrorCategory::FileSystem,

            Self::Config { .. } => ErrorCategory::Configuration,

            Self::Connection { .. } |
            Self::UnknownHook { .. } |
            Self::Server { .. } => ErrorCategory::Runtime,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorCategory {
    Resolution,
    Transform,
    FileSystem,
    Configuration,
    Runtime,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Resolution => "resolution",
            Self::Transform => "transform",
            Self::FileSystem => "filesystem",
            Self::Configuration => "configuration",
            Self::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

impl From<std::io::Error> for KilnError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            message: err.to_string(),
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for KilnError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: err.message().to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        Self::Server {
            message: format!("malformed message: {}", err),
        }
    }
}

impl From<regex::Error> for KilnError {
    fn from(err: regex::Error) -> Self {
        Self::Config {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = KilnError::resolution("js/app.js", "./missing", "no matching file");
        assert!(matches!(err, KilnError::Resolution { .. }));
        assert_eq!(
            err.to_string(),
            "Cannot resolve './missing' imported from js/app.js: no matching file"
        );
    }

    #[test]
    fn test_error_categories() {
        let err = KilnError::transform("css/app.css", "design-tokens", "unknown token");
        assert_eq!(err.category(), ErrorCategory::Transform);

        let err = KilnError::config("no entries");
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = KilnError::connection("ws://localhost/live", "refused");
        assert_eq!(err.category(), ErrorCategory::Runtime);
        assert_eq!(err.category().to_string(), "runtime");
    }

    #[test]
    fn test_transform_error_names_module_and_stage() {
        let err = KilnError::transform("js/app.js", "check-syntax", "unbalanced '{' at line 3");
        let message = err.to_string();
        assert!(message.contains("js/app.js"));
        assert!(message.contains("check-syntax"));
        assert!(message.contains("line 3"));
    }
}

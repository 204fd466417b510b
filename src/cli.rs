use std::path::PathBuf;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};

/// Build front-end asset trees into deployable bundles
#[derive(Parser)]
#[command(
    name = "kiln",
    version,
    about = "Build front-end asset trees into deployable bundles",
    long_about = "Kiln resolves script modules, single-file components and stylesheets from one or more entry points, runs each through its transform chain, and writes one script bundle and one extracted stylesheet per entry, alongside a mirrored static directory."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build every configured entry point and copy static files
    Build {
        /// Force minification on
        #[arg(short = 'M', long, conflicts_with = "no_minify")]
        minify: bool,

        /// Force minification off
        #[arg(long)]
        no_minify: bool,

        /// Only build the named entries (repeatable)
        #[arg(short, long, value_name = "NAME")]
        entry: Vec<String>,
    },

    /// Resolve an entry point and print its module graph as JSON
    Graph {
        /// Entry name from the configuration
        #[arg(value_name = "ENTRY")]
        entry: String,
    },

    /// Initialize Kiln configuration
    Init {
        /// Output directory for configuration
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Default)]
pub enum LogFormat {
    #[default]
    #[value(name = "pretty")]
    Pretty,
    #[value(name = "json")]
    Json,
}

impl Commands {
    /// Minification override requested on the command line, if any.
    pub fn minify_override(&self) -> Option<bool> {
        match self {
            Commands::Build { minify: true, .. } => Some(true),
            Commands::Build { no_minify: true, .. } => Some(false),
            _ => None,
        }
    }
}

pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }

    #[test]
    fn test_default_values() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn test_minify_override() {
        let cli = Cli::parse_from(["kiln", "build", "--minify"]);
        assert_eq!(cli.command.minify_override(), Some(true));

        let cli = Cli::parse_from(["kiln", "build", "--no-minify"]);
        assert_eq!(cli.command.minify_override(), Some(false));

        let cli = Cli::parse_from(["kiln", "build", "--entry", "app", "--entry", "admin"]);
        assert_eq!(cli.command.minify_override(), None);
        match cli.command {
            Commands::Build { entry, .. } => assert_eq!(entry, vec!["app", "admin"]),
            _ => panic!("expected build command"),
        }
    }
}

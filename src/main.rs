use std::time::Duration;
use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kiln::cli::{self, Cli, Commands, LogFormat};
use kiln::{BuildOptions, BuildReport, Builder, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose, cli.log_format)?;

    info!("Starting Kiln v{}", kiln::VERSION);

    let minify = cli.command.minify_override();

    // Handle commands
    match cli.command {
        Commands::Build { entry, .. } => {
            let options = BuildOptions {
                entries: entry,
                minify,
            };

            let spinner = spinner("Building assets...");
            match build(cli.config.as_deref(), &options).await {
                Ok(report) => {
                    spinner.finish_and_clear();
                    print_report(&report);
                }
                Err(e) => {
                    spinner.finish_and_clear();
                    eprintln!("{} Build failed [{}]: {}", "✗".red(), e.category(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Graph { entry } => {
            let graph = Config::load(cli.config.as_deref())
                .and_then(Builder::new)
                .and_then(|builder| builder.graph(&entry));

            match graph {
                Ok(graph) => {
                    println!("{}", serde_json::to_string_pretty(&graph)?);
                }
                Err(e) => {
                    eprintln!("{} Graph resolution failed [{}]: {}", "✗".red(), e.category(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Init { output_dir } => {
            Config::init(&output_dir)?;
            println!(
                "{} Initialized Kiln configuration in {}",
                "✓".green(),
                output_dir.display()
            );
        }

        Commands::Completions { shell } => {
            cli::generate_completions(shell);
        }
    }

    Ok(())
}

async fn build(config_path: Option<&std::path::Path>, options: &BuildOptions) -> kiln::Result<BuildReport> {
    let config = Config::load(config_path)?;
    let builder = Builder::new(config)?;
    builder.build(options).await
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_report(report: &BuildReport) {
    for artifact in &report.artifacts {
        println!(
            "  {} {} ({} bytes)",
            format!("{:<10}", artifact.kind.as_str()).dimmed(),
            artifact.path.display(),
            artifact.bytes
        );
    }
    println!(
        "{} Built {} modules and copied {} static files in {} ms {}",
        "✓".green(),
        report.modules.to_string().bold(),
        report.static_files.to_string().bold(),
        report.elapsed_ms,
        format!("[{}]", report.build_id).dimmed()
    );
}

fn init_tracing(verbose: bool, format: LogFormat) -> Result<()> {
    let default_directive = if verbose { "kiln=debug" } else { "kiln=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(filter)
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()?,
    }

    Ok(())
}

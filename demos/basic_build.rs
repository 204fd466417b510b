//! Basic build example for Kiln
//!
//! This example builds the sample application shipped with the test
//! fixtures into a temporary directory and prints the resulting artifacts.

use std::path::Path;
use kiln::{BuildOptions, Builder, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("Kiln Basic Build Example");
    println!("========================");

    // Work on a copy so the fixture tree stays untouched
    let workspace = tempfile::tempdir()?;
    let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sample_app");
    let assets = workspace.path().join("assets");
    kiln::static_copy::copy_tree(&fixture, &assets)?;
    println!("✓ Sample app copied to {}", assets.display());

    let config = Config::load(Some(&assets.join("kiln.toml")))?;
    let builder = Builder::new(config)?;
    println!("✓ Builder initialized");

    let graph = builder.graph("app")?;
    println!("📦 Entry 'app' reaches {} modules:", graph.len());
    for module in graph.modules() {
        println!("   - {} ({})", module.id, module.kind);
    }

    let options = BuildOptions {
        minify: Some(true),
        ..Default::default()
    };

    match builder.build(&options).await {
        Ok(report) => {
            println!("✅ Build {} finished in {}ms", report.build_id, report.elapsed_ms);
            for artifact in &report.artifacts {
                println!("📁 {} ({} bytes)", artifact.path.display(), artifact.bytes);
            }
        }
        Err(e) => {
            println!("❌ Build failed: {}", e);
            println!("Error category: {:?}", e.category());
        }
    }

    Ok(())
}

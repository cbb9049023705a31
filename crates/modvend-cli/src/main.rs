//! modvend - module vendoring CLI
//!
//! Reads a YAML vendor file (default `Terrafile`) and vendors every declared
//! module into the destination directory.
//!
//! ## Commands
//!
//! - `install`: Clear the destination and fetch every module
//! - `list`: Show declared modules and how their sources classify
//! - `version`: Print the modvend version

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use modvend_core::{
    SourceAddress, VendorFile, VendorOrchestrator, VendorReport, VendorSettings,
    DEFAULT_VENDOR_DIR, DEFAULT_VENDOR_FILE,
};

#[derive(Parser)]
#[command(name = "modvend")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Vendor infrastructure modules into a local directory", long_about = None)]
struct Cli {
    /// Vendor file to read
    #[arg(short, long, global = true, default_value = DEFAULT_VENDOR_FILE)]
    file: PathBuf,

    /// Destination directory; a `vendor_dir` in the file applies when omitted
    #[arg(short, long, global = true, default_value = DEFAULT_VENDOR_DIR)]
    directory: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove the destination directory and vendor every module again
    Install,

    /// List declared modules with their source kind
    List,

    /// Print the modvend version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    modvend_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Install => {
            let settings = VendorSettings::from_env();
            let report = cmd_install(&cli.file, &cli.directory, &settings).await?;
            println!(
                "Vendored {} modules into {} in {} ms",
                report.modules.len(),
                report.root.display(),
                report.duration_ms
            );
            Ok(())
        }
        Commands::List => {
            for line in cmd_list(&cli.file)? {
                println!("{line}");
            }
            Ok(())
        }
        Commands::Version => {
            println!("modvend {}", modvend_core::VERSION);
            Ok(())
        }
    }
}

fn load_vendor_file(path: &Path) -> Result<VendorFile> {
    VendorFile::load(path).with_context(|| format!("Failed to read vendor file {}", path.display()))
}

/// Vendor every module declared in `file`.
async fn cmd_install(
    file: &Path,
    directory: &Path,
    settings: &VendorSettings,
) -> Result<VendorReport> {
    let vendor_file = load_vendor_file(file)?;
    let root = vendor_file.vendor_dir_or(directory);
    info!(
        file = %file.display(),
        root = %root.display(),
        modules = vendor_file.modules.len(),
        "installing modules"
    );

    let orchestrator = VendorOrchestrator::from_settings(settings)
        .context("Failed to set up fetchers")?
        .with_default_versions(vendor_file.default_versions.clone());
    let report = orchestrator
        .run_all(vendor_file.module_specs(), &root)
        .await?;
    Ok(report)
}

/// One line per module: name, kind, source, version and sub-path.
fn cmd_list(file: &Path) -> Result<Vec<String>> {
    let vendor_file = load_vendor_file(file)?;
    if vendor_file.modules.is_empty() {
        return Ok(vec![format!("No modules declared in {}", file.display())]);
    }

    Ok(vendor_file
        .modules
        .iter()
        .map(|(name, decl)| {
            let address = SourceAddress::parse(&decl.source);
            let version = if decl.version.is_empty() {
                "-"
            } else {
                decl.version.as_str()
            };
            let mut line = format!("{name}\t{}\t{}\t{version}", address.kind, decl.source);
            if !decl.path.is_empty() {
                line.push_str(&format!("\tpath={}", decl.path));
            }
            line
        })
        .collect())
}

//! Unfurl CLI - unpack meta-package dependencies into the project package list

use anyhow::Result;
use clap::{Parser, Subcommand};

mod unpack;

#[derive(Parser)]
#[command(name = "unfurl")]
#[command(version)]
#[command(about = "Unpack meta-package dependencies into the project package list", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack an installed package's dependencies into pack.json
    Unpack {
        /// Installed packages to unpack (only the first is processed, the
        /// rest are ignored)
        #[arg(required = true)]
        packages: Vec<String>,

        /// Keep the [require] section alphabetically sorted
        #[arg(long)]
        sort_packages: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Unpack {
            packages,
            sort_packages,
        } => {
            let options = unpack::UnpackOptions {
                packages,
                sort_packages,
            };
            if let Err(err) = unpack::unpack(options) {
                if let Some(unfurl_pkg::UnpackError::PackageNotFound(name)) = err.downcast_ref() {
                    eprintln!("Package {name} is not installed");
                    std::process::exit(1);
                }
                return Err(err);
            }
        }
    }

    Ok(())
}

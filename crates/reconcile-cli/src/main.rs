//! Proxmox VE reconcile CLI (pvereconcile)

use std::path::PathBuf;

use clap::Parser;
use pve_reconcile_core::ModuleOutcome;
use pvereconcile::{execute, ModuleKind};

#[derive(Parser)]
#[command(name = "pvereconcile")]
#[command(about = "Reconcile Proxmox VE cluster resources with a desired state")]
#[command(version)]
#[command(long_about = "
Reconcile Proxmox VE cluster resources with a desired state

Each run applies one module to the cluster. Arguments, including the
connection settings, are read from a JSON file; the outcome is printed
as JSON on stdout.

Examples:
  pvereconcile zone zone.json              # Create or update an SDN zone
  pvereconcile --check subnet subnet.json  # Report what would change
  pvereconcile sdn unlock.json             # Release a stuck SDN lock
  pvereconcile -d acl acl.json             # Log every API call
  pvereconcile vnet-info vnets.json        # Show vnets with subnets and rules
")]
struct Cli {
    /// Enable verbose output
    #[arg(short = 'V', long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Report changes without making them
    #[arg(long)]
    check: bool,

    /// Module to run
    #[arg(value_enum)]
    module: ModuleKind,

    /// JSON file with the module arguments
    args_file: PathBuf,
}

fn print_outcome(outcome: &ModuleOutcome) {
    match serde_json::to_string(outcome) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to encode result: {}", e),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .target(env_logger::Target::Stderr)
        .init();

    match execute(cli.module, &cli.args_file, cli.check).await {
        Ok(outcome) => {
            print_outcome(&outcome);
            if !cli.quiet {
                log::info!("Module {} completed (changed: {})", cli.module, outcome.changed);
            }
            std::process::exit(0);
        }
        Err(e) => {
            print_outcome(&ModuleOutcome::failure(&*e));

            if !cli.quiet {
                eprintln!("Error: {:#}", e);

                // Print error chain if in verbose mode
                if cli.verbose || cli.debug {
                    for cause in e.chain().skip(1) {
                        eprintln!("  Caused by: {}", cause);
                    }
                }
            }
            std::process::exit(1);
        }
    }
}

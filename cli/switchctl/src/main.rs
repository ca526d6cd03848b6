//! switchctl - operator CLI for the vmswitch daemon.
//!
//! Talks to switchd's HTTP API; the daemon owns all orchestration logic.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

mod client;

use client::{ApiClient, FullStatus, LockResponse, SwitchResult};

/// Control which of the two VMs is running.
#[derive(Debug, Parser)]
#[command(name = "switchctl", version, about)]
struct Cli {
    /// Base URL of the switchd HTTP API.
    #[arg(
        long,
        env = "SWITCHCTL_API_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    api_url: String,

    /// Bearer token for the API.
    #[arg(long, env = "SWITCHCTL_API_TOKEN")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Linux,
    Windows,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show power state of both VMs and the manual lock.
    Status,

    /// Switch the active VM.
    Switch {
        /// Target role.
        role: RoleArg,
    },

    /// Disable switching until unlocked.
    Lock,

    /// Re-enable switching.
    Unlock,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api_url, &cli.token)?;

    match cli.command {
        Commands::Status => {
            let status: FullStatus = client.get("/status").await?;
            println!("linux:   {}", paint_state(&status.linux));
            println!("windows: {}", paint_state(&status.windows));
            println!(
                "locked:  {}",
                if status.locked {
                    "yes".red().to_string()
                } else {
                    "no".to_string()
                }
            );
        }
        Commands::Switch { role } => {
            let path = match role {
                RoleArg::Linux => "/switch_linux",
                RoleArg::Windows => "/switch_windows",
            };
            let result: SwitchResult = client.post(path).await?;
            if result.status == "ok" {
                println!("{} {}", "ok:".green(), result.message);
            } else {
                eprintln!("{} {}", "error:".red(), result.message);
                std::process::exit(1);
            }
        }
        Commands::Lock => {
            let response: LockResponse = client.post("/lock").await?;
            println!("locked: {}", response.locked);
        }
        Commands::Unlock => {
            let response: LockResponse = client.post("/unlock").await?;
            println!("locked: {}", response.locked);
        }
    }

    Ok(())
}

fn paint_state(state: &str) -> String {
    match state {
        "running" => state.green().to_string(),
        "stopped" => state.yellow().to_string(),
        _ => state.red().to_string(),
    }
}

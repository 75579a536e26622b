use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run all workspace tests
    Test,
    /// Run the gateway
    Serve {
        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building workspace...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Testing workspace...");
            cargo(&["test", "--workspace"], "Test")?;
        }
        Commands::Serve { port } => {
            println!("Starting gateway...");
            let port = port.map(|p| p.to_string());
            let mut args = vec!["run", "-p", "moisture-cli", "--", "serve"];
            if let Some(port) = &port {
                args.extend(["--port", port.as_str()]);
            }
            cargo(&args, "Serve")?;
        }
    }

    Ok(())
}

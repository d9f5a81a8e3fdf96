use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kr_client::transport::ClientError;
use kr_client::{
    init_logging, ClientConfig, DaemonClient, Diagnostics, Outcome, PairingError, PairingFlow,
    RandomSecretGenerator, TerminalQrEncoder,
};
use std::process::ExitCode;
use tracing::error;

#[derive(Parser)]
#[command(name = "kr")]
#[command(about = "Pair this workstation with the Kryptonite mobile app", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Pair with a phone by scanning a QR code
    #[command(alias = "p")]
    Pair,
    /// Re-pair and show this workstation's identity
    Me,
    /// Pair and list the linked device
    #[command(alias = "ls")]
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = ClientConfig::from_env();
    let _log_guard = init_logging("kr", &config.logging);
    let diagnostics = Diagnostics::stderr();

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let message = format!("{err:#}");
            error!(event = "kr_command_failed", error = %message);
            match err.downcast_ref::<PairingError>() {
                Some(PairingError::Client(ClientError::ConnectingToDaemon)) => {
                    Outcome::DaemonUnreachable.report(&diagnostics)
                }
                _ => diagnostics.error(&message),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &ClientConfig) -> Result<()> {
    match command {
        Commands::Pair | Commands::Me | Commands::List => {
            let flow = PairingFlow::new(
                DaemonClient::new(config),
                RandomSecretGenerator,
                TerminalQrEncoder,
            );
            let mut stdout = std::io::stdout();
            flow.pair(&mut stdout)
                .await
                .context("pairing did not complete")?;
        }
    }
    Ok(())
}

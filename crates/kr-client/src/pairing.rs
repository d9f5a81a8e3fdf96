use crate::transport::{ClientError, DaemonClient};
use kr_core::http_frame::Method;
use kr_core::{PairingSecret, PAIR_PATH};
use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;
use rand::RngCore;
use std::io::{self, Write};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

const SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("could not serialize pairing secret: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not encode QR code: {0}")]
    Encode(String),
    #[error("{0}")]
    Client(#[from] ClientError),
    #[error("pairing failed: daemon returned status {status} {reason}")]
    Refused { status: u16, reason: String },
    #[error("terminal output failed: {0}")]
    Output(#[from] io::Error),
}

pub trait SecretGenerator {
    fn generate(&self) -> Result<PairingSecret, PairingError>;
}

pub trait QrEncoder {
    /// Renders `data` as text that displays as a scannable code in a terminal.
    fn encode(&self, data: &[u8]) -> Result<String, PairingError>;
}

/// Random key material tagged with this machine's host name.
pub struct RandomSecretGenerator;

impl SecretGenerator for RandomSecretGenerator {
    fn generate(&self) -> Result<PairingSecret, PairingError> {
        let mut public_key = vec![0u8; SECRET_BYTES];
        rand::rng().fill_bytes(&mut public_key);
        Ok(PairingSecret {
            public_key,
            workstation_name: workstation_name(),
        })
    }
}

fn workstation_name() -> String {
    if let Ok(value) = std::env::var("HOSTNAME") {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "workstation".to_string())
}

pub struct TerminalQrEncoder;

impl QrEncoder for TerminalQrEncoder {
    fn encode(&self, data: &[u8]) -> Result<String, PairingError> {
        let code = QrCode::new(data).map_err(|err| PairingError::Encode(err.to_string()))?;
        Ok(code.render::<Dense1x2>().quiet_zone(true).build())
    }
}

pub struct PairingFlow<G, Q> {
    client: DaemonClient,
    generator: G,
    encoder: Q,
}

impl<G: SecretGenerator, Q: QrEncoder> PairingFlow<G, Q> {
    pub fn new(client: DaemonClient, generator: G, encoder: Q) -> Self {
        Self {
            client,
            generator,
            encoder,
        }
    }

    /// One attempt: send the secret, show it as a QR code, wait for the agent.
    pub async fn pair<W: Write>(&self, out: &mut W) -> Result<(), PairingError> {
        let secret = self.generator.generate()?;
        let payload = serde_json::to_vec(&secret)?;

        let pending = self.client.send(Method::Put, PAIR_PATH, &payload).await?;
        let qr = self.encoder.encode(&payload)?;

        writeln!(
            out,
            "Scan this QR Code with the Kryptonite mobile app to connect it with this workstation."
        )?;
        writeln!(out)?;
        writeln!(out, "{qr}")?;
        out.flush()?;
        info!(event = "pairing_code_shown", workstation = %secret.workstation_name);

        let response = pending.read().await?;
        clear_terminal(out).await;
        if !response.is_success() {
            return Err(PairingError::Refused {
                status: response.status,
                reason: response.reason,
            });
        }
        info!(event = "pairing_complete");
        Ok(())
    }
}

/// Wipes the code off the screen. Best effort.
async fn clear_terminal<W: Write>(out: &mut W) {
    match Command::new("clear").output().await {
        Ok(output) => {
            let _ = out.write_all(&output.stdout);
            let _ = out.flush();
        }
        Err(err) => debug!(event = "clear_terminal_error", error = %err),
    }
}

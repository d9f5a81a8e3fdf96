//! Client side of the remote-approval signing protocol: agent transport,
//! notification tailing, outcome classification and local fallback.

pub mod classify;
pub mod config;
pub mod diagnostics;
pub mod fallback;
pub mod logging;
pub mod notify;
pub mod pairing;
pub mod sign;
pub mod transport;

#[cfg(test)]
#[path = "../tests/support/mod.rs"]
mod test_support;

pub use classify::{classify, Outcome};
pub use config::{ClientConfig, LogConfig};
pub use diagnostics::Diagnostics;
pub use fallback::{ExitDecision, FallbackController, SignatureOutput, StdioOutput};
pub use logging::{init_logging, LogGuard};
pub use pairing::{PairingError, PairingFlow, RandomSecretGenerator, TerminalQrEncoder};
pub use sign::SignFlow;
pub use transport::{ClientError, DaemonClient};

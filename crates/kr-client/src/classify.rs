use crate::diagnostics::Diagnostics;
use crate::transport::ClientError;
use kr_core::{DaemonErrorKind, SignResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Vec<u8>),
    NotPaired,
    DaemonUnreachable,
    Rejected,
    UnknownError(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The single status line shown for this outcome.
    pub fn report(&self, diagnostics: &Diagnostics) {
        match self {
            Outcome::Success(_) => diagnostics.success("Success. Request Allowed ✔"),
            Outcome::NotPaired => diagnostics.warn(
                "Workstation not yet paired. Please run \"kr pair\" and scan the QRCode with the Kryptonite mobile app.",
            ),
            Outcome::DaemonUnreachable => diagnostics.error(
                "Could not connect to Kryptonite daemon. Make sure it is running by typing \"kr restart\"",
            ),
            Outcome::Rejected => diagnostics.error("Request Rejected ✘"),
            Outcome::UnknownError(detail) => {
                diagnostics.error(&format!("Unknown error: {detail}"))
            }
        }
    }
}

/// Maps one transport result to an outcome. Pure: no I/O, no state.
pub fn classify(result: Result<&SignResponse, &ClientError>) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(ClientError::ConnectingToDaemon) => return Outcome::DaemonUnreachable,
        Err(ClientError::NotPaired) => return Outcome::NotPaired,
        Err(other) => return Outcome::UnknownError(other.to_string()),
    };

    let signature = response
        .signature
        .as_ref()
        .filter(|signature| !signature.is_empty());
    match (response.error_kind(), signature) {
        (Some(_), Some(_)) => Outcome::UnknownError(
            "protocol violation: response carries both a signature and an error".to_string(),
        ),
        (Some(DaemonErrorKind::Rejected), None) => Outcome::Rejected,
        (Some(DaemonErrorKind::Other(tag)), None) => {
            Outcome::UnknownError(format!("daemon error: {tag}"))
        }
        (None, Some(signature)) => Outcome::Success(signature.clone()),
        (None, None) => Outcome::UnknownError(
            "protocol violation: response carries neither a signature nor an error".to_string(),
        ),
    }
}

//! Client for the agent control socket.
//!
//! Every call dials a fresh connection, writes one framed request and reads
//! one framed response. Failing to dial is reported as
//! [`ClientError::ConnectingToDaemon`], which callers treat as "agent not
//! running" and recover from.

use crate::config::ClientConfig;
use kr_core::http_frame::{
    encode_request, FrameError, FramedResponse, Method, ResponseDecoder, DEFAULT_MAX_BODY_BYTES,
};
use kr_core::{ResponseEnvelope, SignRequest, SignResponse, ENCLAVE_PATH};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};

const NOT_FOUND: u16 = 404;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to the Kryptonite daemon")]
    ConnectingToDaemon,
    #[error("no mobile device is paired with this workstation")]
    NotPaired,
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
    #[error("daemon returned status {status} {reason}")]
    UnexpectedStatus { status: u16, reason: String },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Frame(#[from] FrameError),
}

#[derive(Clone, Debug)]
pub struct DaemonClient {
    socket_path: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl DaemonClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            timeout: config.request_timeout,
        }
    }

    /// Writes the request and hands back the open connection so the caller can
    /// do other work (such as showing a QR code) before blocking on the reply.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: &[u8],
    ) -> Result<PendingResponse, ClientError> {
        let frame = encode_request(method, path, body, DEFAULT_MAX_BODY_BYTES)?;
        let mut stream = self.connect().await?;
        stream.write_all(&frame).await?;
        stream.flush().await?;
        debug!(event = "daemon_request_sent", method = %method, path, bytes = frame.len());
        Ok(PendingResponse { stream })
    }

    pub async fn round_trip(
        &self,
        method: Method,
        path: &str,
        body: &[u8],
    ) -> Result<FramedResponse, ClientError> {
        self.send(method, path, body).await?.read().await
    }

    /// Sends a git signing request and waits for the agent's answer, bounded by
    /// the configured timeout if there is one.
    pub async fn request_git_signature(
        &self,
        request: &SignRequest,
    ) -> Result<SignResponse, ClientError> {
        let body = serde_json::to_vec(request)
            .map_err(|err| FrameError::Encode(err.to_string()))?;
        let exchange = self.round_trip(Method::Put, ENCLAVE_PATH, &body);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| ClientError::TimedOut(limit))??,
            None => exchange.await?,
        };

        if response.status == NOT_FOUND {
            return Err(ClientError::NotPaired);
        }
        if !response.is_success() {
            return Err(ClientError::UnexpectedStatus {
                status: response.status,
                reason: response.reason,
            });
        }
        let envelope: ResponseEnvelope = response.json()?;
        if let Some(id) = envelope.request_id.as_deref() {
            if id != request.request_id {
                warn!(event = "daemon_request_id_mismatch", expected = %request.request_id, got = id);
            }
        }
        Ok(envelope.git_sign_response.unwrap_or_default())
    }

    async fn connect(&self) -> Result<UnixStream, ClientError> {
        let Some(path) = self.socket_path.as_ref() else {
            debug!(event = "daemon_socket_unset");
            return Err(ClientError::ConnectingToDaemon);
        };
        UnixStream::connect(path).await.map_err(|err| {
            debug!(event = "daemon_connect_error", socket = %path.display(), error = %err);
            ClientError::ConnectingToDaemon
        })
    }
}

/// A request that has been written; the response has not been read yet.
pub struct PendingResponse {
    stream: UnixStream,
}

impl PendingResponse {
    pub async fn read(mut self) -> Result<FramedResponse, ClientError> {
        let mut decoder = ResponseDecoder::response();
        let mut read_buf = [0u8; 8192];
        loop {
            let read = self.stream.read(&mut read_buf).await?;
            if read == 0 {
                return Ok(decoder.finish()?);
            }
            if let Some(response) = decoder.push_chunk(&read_buf[..read])? {
                debug!(event = "daemon_response", status = response.status, bytes = response.body.len());
                return Ok(response);
            }
        }
    }
}

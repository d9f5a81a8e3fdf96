use crate::classify::{classify, Outcome};
use crate::config::ClientConfig;
use crate::diagnostics::Diagnostics;
use crate::fallback::{emit_signature, ExitDecision, FallbackController, SignatureOutput};
use crate::notify::{NotificationChannel, NotificationStreamer};
use crate::transport::DaemonClient;
use kr_core::protocol::new_request_id;
use kr_core::{armor_signature, parse_git_object, ParseError, SignRequest};
use std::ffi::OsString;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Upper bound on waiting for the streamer to drain after the channel is removed.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("error parsing git object: {0}")]
    Parse(#[from] ParseError),
    #[error("could not allocate notification channel: {0}")]
    Channel(#[source] io::Error),
    #[error("remote signing did not complete")]
    Declined(Outcome),
}

/// A request id plus the notification channel allocated for it, if any.
#[derive(Debug)]
pub struct PendingRequest {
    pub request_id: String,
    pub channel: Option<NotificationChannel>,
}

impl PendingRequest {
    pub fn allocate(config: &ClientConfig) -> io::Result<Self> {
        let request_id = new_request_id();
        let channel = if config.notifications_enabled {
            Some(NotificationChannel::create(&config.notify_dir, &request_id)?)
        } else {
            None
        };
        Ok(Self {
            request_id,
            channel,
        })
    }
}

pub struct SignFlow {
    config: ClientConfig,
    diagnostics: Diagnostics,
    client: DaemonClient,
    user_id: String,
    fallback: FallbackController,
}

impl SignFlow {
    /// `local_args` is the invocation as received, forwarded to the local tool on fallback.
    pub fn new(
        config: ClientConfig,
        diagnostics: Diagnostics,
        user_id: impl Into<String>,
        local_args: Vec<OsString>,
    ) -> Self {
        let client = DaemonClient::new(&config);
        let fallback =
            FallbackController::new(config.local_tool.clone(), local_args, diagnostics.clone());
        Self {
            config,
            diagnostics,
            client,
            user_id: user_id.into(),
            fallback,
        }
    }

    /// Signs `input` remotely or recovers through the local tool.
    pub async fn run(&self, input: &[u8], output: &mut dyn SignatureOutput) -> ExitDecision {
        match self.request_signature(input).await {
            Ok(signature) => {
                let armored = armor_signature(&signature);
                match emit_signature(output, &armored) {
                    Ok(()) => ExitDecision::SUCCESS,
                    Err(err) => {
                        self.diagnostics
                            .error(&format!("failed to write signature: {err}"));
                        ExitDecision::FAILURE
                    }
                }
            }
            Err(err) => {
                info!(event = "remote_sign_failed", error = %err);
                self.fallback.recover(input).await
            }
        }
    }

    /// Every failure is reported on the diagnostics sink exactly once.
    pub async fn request_signature(&self, input: &[u8]) -> Result<Vec<u8>, AttemptError> {
        let object = parse_git_object(input).map_err(|err| {
            self.diagnostics
                .error(&format!("error parsing git object: {err}"));
            AttemptError::Parse(err)
        })?;
        let pending = PendingRequest::allocate(&self.config).map_err(|err| {
            self.diagnostics
                .error(&format!("could not allocate notification channel: {err}"));
            AttemptError::Channel(err)
        })?;

        let streamer = match &pending.channel {
            Some(channel) => self.start_streamer(channel).await,
            None => None,
        };

        let kind = object.kind();
        let request = SignRequest::new(
            pending.request_id.clone(),
            object,
            self.user_id.clone(),
            pending.channel.as_ref().map(|channel| channel.name().to_string()),
        );
        self.diagnostics
            .info(&format!("Requesting git {kind} signature from phone"));
        debug!(event = "git_sign_request", request_id = %request.request_id, kind);

        let result = self.client.request_git_signature(&request).await;
        let outcome = classify(result.as_ref());

        if let Some(channel) = &pending.channel {
            channel.remove();
        }
        if let Some(handle) = streamer {
            let _ = tokio::time::timeout(STREAM_DRAIN_TIMEOUT, handle).await;
        }

        outcome.report(&self.diagnostics);
        match outcome {
            Outcome::Success(signature) => Ok(signature),
            other => Err(AttemptError::Declined(other)),
        }
    }

    async fn start_streamer(&self, channel: &NotificationChannel) -> Option<JoinHandle<usize>> {
        match channel.open_reader().await {
            Ok(reader) => Some(NotificationStreamer::new(reader, self.diagnostics.clone()).spawn()),
            Err(err) => {
                debug!(event = "notify_reader_error", error = %err);
                None
            }
        }
    }
}

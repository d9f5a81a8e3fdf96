use crate::diagnostics::Diagnostics;
use kr_core::SIG_CREATED_STATUS;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Process exit status, decided once by the top-level dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitDecision(u8);

impl ExitDecision {
    pub const SUCCESS: Self = Self(0);
    pub const FAILURE: Self = Self(1);

    pub fn from_status(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self(u8::try_from(code).unwrap_or(1)),
            None => Self::FAILURE,
        }
    }

    pub fn code(&self) -> u8 {
        self.0
    }
}

/// The local signing program used when the remote flow cannot finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTool {
    program: PathBuf,
}

pub enum ToolInput<'a> {
    /// Replay these exact bytes on the tool's stdin.
    Replay(&'a [u8]),
    /// Hand our own stdin to the tool untouched.
    Inherit,
}

impl LocalTool {
    /// Resolves `name` against `PATH`, or checks it directly when it is a path.
    pub fn locate(name: &str) -> Option<Self> {
        if name.contains('/') {
            let candidate = PathBuf::from(name);
            return candidate.is_file().then_some(Self { program: candidate });
        }
        which_cmd(name).map(|program| Self { program })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs the tool with `args`; its stdout and stderr pass straight through.
    pub async fn run(&self, args: &[OsString], input: ToolInput<'_>) -> io::Result<ExitDecision> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let status = match input {
            ToolInput::Inherit => command.stdin(Stdio::inherit()).status().await?,
            ToolInput::Replay(bytes) => {
                let mut child = command.stdin(Stdio::piped()).spawn()?;
                if let Some(mut stdin) = child.stdin.take() {
                    // A tool that exits without reading everything closes the pipe early.
                    if let Err(err) = stdin.write_all(bytes).await {
                        if err.kind() != io::ErrorKind::BrokenPipe {
                            return Err(err);
                        }
                    }
                    drop(stdin);
                }
                child.wait().await?
            }
        };
        debug!(event = "local_tool_exit", program = %self.program.display(), status = %status);
        Ok(ExitDecision::from_status(status))
    }
}

fn which_cmd(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Decides what happens after the remote flow failed to produce a signature.
pub struct FallbackController {
    tool_name: String,
    args: Vec<OsString>,
    diagnostics: Diagnostics,
}

impl FallbackController {
    pub fn new(tool_name: impl Into<String>, args: Vec<OsString>, diagnostics: Diagnostics) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
            diagnostics,
        }
    }

    /// Replays the original input through the local tool if one is installed.
    pub async fn recover(&self, original_input: &[u8]) -> ExitDecision {
        let Some(tool) = LocalTool::locate(&self.tool_name) else {
            debug!(event = "fallback_unavailable", tool = %self.tool_name);
            return ExitDecision::FAILURE;
        };
        self.diagnostics
            .warn("Falling back to local gpg keychain");
        self.run_tool(&tool, ToolInput::Replay(original_input)).await
    }

    /// Hands the whole invocation to the local tool (modes we do not handle).
    pub async fn delegate(&self) -> ExitDecision {
        match LocalTool::locate(&self.tool_name) {
            Some(tool) => self.run_tool(&tool, ToolInput::Inherit).await,
            None => {
                self.diagnostics
                    .error(&format!("{} not found on this system", self.tool_name));
                ExitDecision::FAILURE
            }
        }
    }

    async fn run_tool(&self, tool: &LocalTool, input: ToolInput<'_>) -> ExitDecision {
        match tool.run(&self.args, input).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(event = "local_tool_error", program = %tool.program().display(), error = %err);
                self.diagnostics
                    .error(&format!("failed to run {}: {err}", tool.program().display()));
                ExitDecision::FAILURE
            }
        }
    }
}

/// Destination for a produced signature and the status marker that follows it.
pub trait SignatureOutput {
    fn signature(&mut self) -> &mut dyn Write;
    /// Closes the signature stream so the reader sees EOF before the status line.
    fn close_signature(&mut self) -> io::Result<()>;
    fn status(&mut self) -> &mut dyn Write;
}

pub fn emit_signature(output: &mut dyn SignatureOutput, armored: &str) -> io::Result<()> {
    let out = output.signature();
    out.write_all(armored.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    output.close_signature()?;
    let status = output.status();
    status.write_all(SIG_CREATED_STATUS.as_bytes())?;
    status.flush()
}

/// The process's real stdout and stderr.
pub struct StdioOutput {
    stdout: io::Stdout,
    stderr: io::Stderr,
}

impl StdioOutput {
    pub fn new() -> Self {
        Self {
            stdout: io::stdout(),
            stderr: io::stderr(),
        }
    }
}

impl Default for StdioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureOutput for StdioOutput {
    fn signature(&mut self) -> &mut dyn Write {
        &mut self.stdout
    }

    #[cfg(unix)]
    fn close_signature(&mut self) -> io::Result<()> {
        use std::os::fd::{FromRawFd, OwnedFd};

        self.stdout.flush()?;
        // SAFETY: fd 1 is owned by this process and nothing writes to stdout
        // after this point; std ignores EBADF on stdout if anything does.
        drop(unsafe { OwnedFd::from_raw_fd(1) });
        Ok(())
    }

    #[cfg(not(unix))]
    fn close_signature(&mut self) -> io::Result<()> {
        self.stdout.flush()
    }

    fn status(&mut self) -> &mut dyn Write {
        &mut self.stderr
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use std::os::unix::fs::PermissionsExt;

    struct CapturedOutput {
        stdout: MemorySink,
        stderr: MemorySink,
        closed_before_status: bool,
    }

    impl SignatureOutput for CapturedOutput {
        fn signature(&mut self) -> &mut dyn Write {
            &mut self.stdout
        }

        fn close_signature(&mut self) -> io::Result<()> {
            self.closed_before_status = self.stderr.contents().is_empty();
            Ok(())
        }

        fn status(&mut self) -> &mut dyn Write {
            &mut self.stderr
        }
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        path
    }

    #[test]
    fn signature_then_close_then_status() {
        let mut output = CapturedOutput {
            stdout: MemorySink::default(),
            stderr: MemorySink::default(),
            closed_before_status: false,
        };
        emit_signature(&mut output, "ARMORED").expect("emit");
        assert_eq!(output.stdout.text(), "ARMORED\n");
        assert_eq!(output.stderr.text(), "\n[GNUPG:] SIG_CREATED ");
        assert!(output.closed_before_status);
    }

    #[test]
    fn exit_codes_pass_through() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(ExitDecision::from_status(std::process::ExitStatus::from_raw(0)).code(), 0);
        assert_eq!(
            ExitDecision::from_status(std::process::ExitStatus::from_raw(7 << 8)).code(),
            7
        );
        // killed by SIGKILL: no exit code
        assert_eq!(
            ExitDecision::from_status(std::process::ExitStatus::from_raw(9)),
            ExitDecision::FAILURE
        );
    }

    #[test]
    fn locate_accepts_paths_and_rejects_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(dir.path(), "fake-gpg", "exit 0");
        let located = LocalTool::locate(script.to_str().expect("utf8 path")).expect("located");
        assert_eq!(located.program(), script.as_path());
        assert!(LocalTool::locate("/nonexistent/kr-test/gpg").is_none());
        assert!(LocalTool::locate("kr-test-definitely-not-installed").is_none());
    }

    #[tokio::test]
    async fn recover_replays_exact_input_and_returns_tool_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let captured = dir.path().join("stdin.bin");
        let script = write_script(
            dir.path(),
            "fake-gpg",
            &format!("cat > '{}'\nexit 3", captured.display()),
        );
        let controller = FallbackController::new(
            script.to_string_lossy(),
            vec![OsString::from("-bsau"), OsString::from("key")],
            Diagnostics::from_writer(MemorySink::default()),
        );

        let input = b"tree abc\nauthor A\ncommitter B\n\n  msg \r\n\xff";
        let decision = controller.recover(input).await;
        assert_eq!(decision.code(), 3);
        assert_eq!(std::fs::read(&captured).expect("captured"), input);
    }

    #[tokio::test]
    async fn recover_without_tool_fails_quietly() {
        let sink = MemorySink::default();
        let controller = FallbackController::new(
            "/nonexistent/kr-test/gpg",
            Vec::new(),
            Diagnostics::from_writer(sink.clone()),
        );
        assert_eq!(controller.recover(b"input").await, ExitDecision::FAILURE);
        assert!(sink.text().is_empty());
    }

    #[tokio::test]
    async fn tool_ignoring_stdin_still_reports_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(dir.path(), "fake-gpg", "exit 0");
        let tool = LocalTool::locate(script.to_str().expect("utf8 path")).expect("located");
        let big = vec![b'x'; 1 << 20];
        let decision = tool.run(&[], ToolInput::Replay(&big)).await.expect("run");
        assert_eq!(decision, ExitDecision::SUCCESS);
    }
}

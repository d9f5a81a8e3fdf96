//! Drop-in replacement for the local signing tool, configured as git's
//! `gpg.program`. Detached armored signing requests go to the phone; every
//! other invocation is handed to the real tool unchanged.

use anyhow::{Context, Result};
use clap::Parser;
use kr_client::{
    init_logging, ClientConfig, Diagnostics, ExitDecision, FallbackController, SignFlow,
    StdioOutput,
};
use std::ffi::OsString;
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "krgpg", disable_help_flag = true, disable_version_flag = true)]
struct GpgArgs {
    /// Output ascii armor
    #[arg(short = 'a', long = "armor")]
    armor: bool,
    /// Create a detached signature
    #[arg(short = 'b', long = "detach-sign")]
    detach_sign: bool,
    /// Create a signature
    #[arg(short = 's', long = "sign")]
    sign: bool,
    #[arg(short = 'u', long = "local-user", value_name = "ID")]
    local_user: Option<String>,
    #[arg(long = "status-fd", value_name = "FD")]
    status_fd: Option<String>,
    /// Combined detach-sign, armor and local-user, as git passes them
    #[arg(long = "bsau")]
    bsau: bool,
    #[arg(long = "verify")]
    verify: bool,
    #[arg(long = "keyid-format", value_name = "FMT")]
    keyid_format: Option<String>,
    #[arg(trailing_var_arg = true)]
    rest: Vec<String>,
}

impl GpgArgs {
    fn wants_remote_signature(&self) -> bool {
        self.bsau || (self.sign && self.detach_sign && self.armor)
    }

    fn user_id(&self) -> String {
        self.local_user
            .clone()
            .or_else(|| self.rest.last().cloned())
            .unwrap_or_default()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = ClientConfig::from_env();
    let _log_guard = init_logging("krgpg", &config.logging);
    let diagnostics = Diagnostics::open(config.diagnostics_tty.as_deref());
    let argv: Vec<OsString> = std::env::args_os().collect();

    let decision = dispatch(config, diagnostics, argv).await;
    ExitCode::from(decision.code())
}

async fn dispatch(
    config: ClientConfig,
    diagnostics: Diagnostics,
    argv: Vec<OsString>,
) -> ExitDecision {
    let forwarded: Vec<OsString> = argv.iter().skip(1).cloned().collect();
    let fallback =
        FallbackController::new(config.local_tool.clone(), forwarded.clone(), diagnostics.clone());

    let args = match GpgArgs::try_parse_from(&argv) {
        Ok(args) => args,
        Err(err) => {
            let first_line = err.to_string();
            let first_line = first_line.lines().next().unwrap_or_default().to_string();
            diagnostics.error(&first_line);
            return fallback.delegate().await;
        }
    };
    if !args.wants_remote_signature() {
        debug!(
            event = "krgpg_delegate",
            verify = args.verify,
            keyid_format = ?args.keyid_format,
            args = ?forwarded
        );
        return fallback.delegate().await;
    }

    let input = match read_stdin().await {
        Ok(input) => input,
        Err(err) => {
            diagnostics.error(&format!("{err:#}"));
            return ExitDecision::FAILURE;
        }
    };
    info!(event = "krgpg_sign", bytes = input.len(), status_fd = ?args.status_fd);
    let flow = SignFlow::new(config, diagnostics, args.user_id(), forwarded);
    flow.run(&input, &mut StdioOutput::new()).await
}

async fn read_stdin() -> Result<Vec<u8>> {
    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .context("failed to read object from stdin")?;
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> GpgArgs {
        GpgArgs::try_parse_from(args).expect("parse")
    }

    #[test]
    fn git_signing_invocation_is_remote() {
        let args = parse(&["krgpg", "--status-fd=2", "-bsau", "Alice <alice@example.com>"]);
        assert!(args.detach_sign && args.sign && args.armor);
        assert_eq!(args.local_user.as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(args.status_fd.as_deref(), Some("2"));
        assert!(args.wants_remote_signature());
        assert_eq!(args.user_id(), "Alice <alice@example.com>");
    }

    #[test]
    fn long_bsau_takes_user_from_last_positional() {
        let args = parse(&["krgpg", "--bsau", "key-one", "key-two"]);
        assert!(args.wants_remote_signature());
        assert_eq!(args.user_id(), "key-two");
    }

    #[test]
    fn separate_flags_need_all_three() {
        assert!(parse(&["krgpg", "-s", "-b", "-a"]).wants_remote_signature());
        assert!(!parse(&["krgpg", "-s", "-b"]).wants_remote_signature());
        assert_eq!(parse(&["krgpg", "-s", "-b", "-a"]).user_id(), "");
    }

    #[test]
    fn verify_is_delegated() {
        let args = parse(&[
            "krgpg",
            "--keyid-format=long",
            "--status-fd=1",
            "--verify",
            "/tmp/sig",
            "-",
        ]);
        assert!(args.verify);
        assert_eq!(args.keyid_format.as_deref(), Some("long"));
        assert_eq!(args.rest, vec!["/tmp/sig".to_string(), "-".to_string()]);
        assert!(!args.wants_remote_signature());
    }

    #[test]
    fn help_and_unknown_flags_are_parse_errors() {
        assert!(GpgArgs::try_parse_from(["krgpg", "--help"]).is_err());
        assert!(GpgArgs::try_parse_from(["krgpg", "--list-keys"]).is_err());
    }

    #[cfg(unix)]
    mod delegation {
        use super::*;
        use kr_client::diagnostics::MemorySink;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        /// A local tool that writes each argument it received on its own line.
        fn recording_tool(dir: &Path, code: i32) -> (PathBuf, PathBuf) {
            let record = dir.join("argv.txt");
            let script = dir.join("fake-gpg");
            std::fs::write(
                &script,
                format!(
                    "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\nexit {code}\n",
                    record.display()
                ),
            )
            .expect("write script");
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
                .expect("chmod script");
            (script, record)
        }

        fn config_with_tool(tool: &Path) -> ClientConfig {
            let mut config = ClientConfig::from_lookup(|_| None);
            config.local_tool = tool.display().to_string();
            config
        }

        fn argv(args: &[&str]) -> Vec<OsString> {
            args.iter().map(OsString::from).collect()
        }

        #[tokio::test]
        async fn unknown_flags_still_reach_local_tool() {
            let dir = tempfile::tempdir().expect("tempdir");
            let (tool, record) = recording_tool(dir.path(), 4);
            let sink = MemorySink::default();

            let decision = dispatch(
                config_with_tool(&tool),
                Diagnostics::from_writer(sink.clone()),
                argv(&["krgpg", "--list-keys", "--with-colons"]),
            )
            .await;

            assert_eq!(decision.code(), 4);
            assert_eq!(
                std::fs::read_to_string(&record).expect("recorded argv"),
                "--list-keys\n--with-colons\n"
            );
            assert!(sink.text().contains("--list-keys"));
        }

        #[tokio::test]
        async fn verify_forwards_every_argument_and_exit_code() {
            let dir = tempfile::tempdir().expect("tempdir");
            let (tool, record) = recording_tool(dir.path(), 2);
            let sink = MemorySink::default();

            let decision = dispatch(
                config_with_tool(&tool),
                Diagnostics::from_writer(sink.clone()),
                argv(&[
                    "krgpg",
                    "--keyid-format=long",
                    "--status-fd=1",
                    "--verify",
                    "/tmp/sig",
                    "-",
                ]),
            )
            .await;

            assert_eq!(decision.code(), 2);
            assert_eq!(
                std::fs::read_to_string(&record).expect("recorded argv"),
                "--keyid-format=long\n--status-fd=1\n--verify\n/tmp/sig\n-\n"
            );
            assert!(sink.text().is_empty());
        }

        #[tokio::test]
        async fn delegation_without_local_tool_fails() {
            let dir = tempfile::tempdir().expect("tempdir");
            let sink = MemorySink::default();

            let decision = dispatch(
                config_with_tool(&dir.path().join("no-such-gpg")),
                Diagnostics::from_writer(sink.clone()),
                argv(&["krgpg", "--verify", "/tmp/sig", "-"]),
            )
            .await;

            assert_eq!(decision, ExitDecision::FAILURE);
            assert!(sink.text().contains("not found on this system"));
        }
    }
}

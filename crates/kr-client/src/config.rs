use kr_core::CTL_SOCK_ENV;
use std::path::PathBuf;
use std::time::Duration;

pub const NOTIFY_DIR_ENV: &str = "KR_NOTIFY_DIR";
pub const NOTIFY_ENV: &str = "KR_NOTIFY";
pub const REQUEST_TIMEOUT_ENV: &str = "KR_REQUEST_TIMEOUT_SECS";
pub const LOCAL_GPG_ENV: &str = "KR_LOCAL_GPG";
pub const LOG_LEVEL_ENV: &str = "KR_LOG_LEVEL";
pub const LOG_DIR_ENV: &str = "KR_LOG_DIR";
pub const LOG_STDERR_ENV: &str = "KR_LOG_STDERR";

const DEFAULT_LOCAL_TOOL: &str = "gpg";
const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub socket_path: Option<PathBuf>,
    pub notify_dir: PathBuf,
    pub notifications_enabled: bool,
    /// No client-side deadline when `None`; the agent decides when to give up.
    pub request_timeout: Option<Duration>,
    pub local_tool: String,
    pub diagnostics_tty: Option<PathBuf>,
    pub logging: LogConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
    pub stderr: bool,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let notify_dir = value(NOTIFY_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| default_notify_dir(value("XDG_RUNTIME_DIR")));
        let request_timeout = value(REQUEST_TIMEOUT_ENV)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let diagnostics_tty = value("GPG_TTY").or_else(|| value("TTY")).map(PathBuf::from);

        Self {
            socket_path: value(CTL_SOCK_ENV).map(PathBuf::from),
            notify_dir,
            notifications_enabled: value(NOTIFY_ENV)
                .and_then(|raw| parse_bool_flag(&raw))
                .unwrap_or(true),
            request_timeout,
            local_tool: value(LOCAL_GPG_ENV).unwrap_or_else(|| DEFAULT_LOCAL_TOOL.to_string()),
            diagnostics_tty,
            logging: LogConfig {
                level: value(LOG_LEVEL_ENV).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
                dir: value(LOG_DIR_ENV).map(PathBuf::from),
                stderr: value(LOG_STDERR_ENV)
                    .and_then(|raw| parse_bool_flag(&raw))
                    .unwrap_or(false),
            },
        }
    }
}

fn default_notify_dir(runtime_dir: Option<String>) -> PathBuf {
    match runtime_dir {
        Some(dir) => PathBuf::from(dir).join("kr").join("notify"),
        None => std::env::temp_dir().join("kr-notify"),
    }
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub mod armor;
pub mod git_object;
pub mod http_frame;
pub mod protocol;

pub use armor::armor_signature;
pub use git_object::{parse_git_object, ParseError};
pub use protocol::{
    CommitInfo, DaemonErrorKind, GitObject, GitSignRequest, PairingSecret, ResponseEnvelope,
    SignRequest, SignResponse, TagInfo,
};

/// Path of the agent control socket.
pub const CTL_SOCK_ENV: &str = "KR_CTL_SOCK";

pub const PAIR_PATH: &str = "/pair";
pub const ENCLAVE_PATH: &str = "/enclave";

/// Status marker git looks for on the status fd after a detached signature.
pub const SIG_CREATED_STATUS: &str = "\n[GNUPG:] SIG_CREATED ";

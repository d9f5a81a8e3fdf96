use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitInfo {
    pub tree: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub merge_parents: Option<Vec<String>>,
    pub author: String,
    pub committer: String,
    /// Everything after the committer line, byte for byte.
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagInfo {
    pub object: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub tag: String,
    pub tagger: String,
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GitObject {
    Commit(CommitInfo),
    Tag(TagInfo),
}

impl GitObject {
    pub fn kind(&self) -> &'static str {
        match self {
            GitObject::Commit(_) => "commit",
            GitObject::Tag(_) => "tag",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitSignRequest {
    #[serde(flatten)]
    pub object: GitObject,
    pub user_id: String,
}

/// Envelope for one signing attempt. Built once, never mutated after send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignRequest {
    pub request_id: String,
    pub unix_seconds: i64,
    #[serde(rename = "v")]
    pub version: String,
    #[serde(rename = "a", default)]
    pub send_ack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_channel: Option<String>,
    pub git_sign_request: GitSignRequest,
}

impl SignRequest {
    pub fn new(
        request_id: impl Into<String>,
        object: GitObject,
        user_id: impl Into<String>,
        notify_channel: Option<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            unix_seconds: Utc::now().timestamp(),
            version: CLIENT_VERSION.to_string(),
            send_ack: true,
            notify_channel,
            git_sign_request: GitSignRequest {
                object,
                user_id: user_id.into(),
            },
        }
    }
}

pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignResponse {
    #[serde(default, with = "base64_bytes_opt")]
    pub signature: Option<Vec<u8>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SignResponse {
    pub fn signed(signature: Vec<u8>) -> Self {
        Self {
            signature: Some(signature),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            signature: None,
            error: Some(error.into()),
        }
    }

    /// Error tag reported by the daemon; an empty tag counts as none.
    pub fn error_kind(&self) -> Option<DaemonErrorKind> {
        self.error
            .as_deref()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(DaemonErrorKind::from_tag)
    }
}

/// Daemon response body. Older agents may omit the request id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub git_sign_response: Option<SignResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonErrorKind {
    Rejected,
    Other(String),
}

impl DaemonErrorKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "rejected" => DaemonErrorKind::Rejected,
            other => DaemonErrorKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairingSecret {
    #[serde(rename = "pk", with = "base64_bytes")]
    pub public_key: Vec<u8>,
    #[serde(rename = "n")]
    pub workstation_name: String,
}

mod base64_bytes {
    use base64::prelude::{Engine, BASE64_STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64::prelude::{Engine, BASE64_STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_some(&BASE64_STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|value| {
                BASE64_STANDARD
                    .decode(value.as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

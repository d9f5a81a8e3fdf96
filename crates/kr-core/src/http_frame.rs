//! HTTP/1.1 style framing used on the agent control socket.
//!
//! The client writes one request per connection and reads one response.
//! Response bodies are delimited by `Content-Length`, by chunked transfer
//! encoding, or by EOF.

use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("header section exceeds max size: {size} > {max}")]
    OversizedHeader { size: usize, max: usize },
    #[error("body exceeds max size: {size} > {max}")]
    OversizedBody { size: usize, max: usize },
    #[error("malformed start line: {0}")]
    MalformedStartLine(String),
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),
    #[error("connection closed before a complete message was read")]
    Truncated,
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl FramedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        serde_json::from_slice(&self.body).map_err(|err| FrameError::Decode(err.to_string()))
    }
}

pub fn encode_request(
    method: Method,
    path: &str,
    body: &[u8],
    max_body_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    if body.len() > max_body_bytes {
        return Err(FrameError::OversizedBody {
            size: body.len(),
            max: max_body_bytes,
        });
    }
    if path.is_empty() || path.contains(char::is_whitespace) {
        return Err(FrameError::Encode(format!("invalid request path '{path}'")));
    }
    let mut encoded = format!(
        "{method} {path} HTTP/1.1\r\nHost: kr\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    encoded.extend_from_slice(body);
    Ok(encoded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Length(usize),
    Chunked,
    UntilEof,
}

#[derive(Debug, Clone)]
struct Head {
    start_line: String,
    headers: Headers,
    framing: BodyFraming,
}

/// Incremental decoder for a single response read off a stream.
#[derive(Debug)]
pub struct ResponseDecoder {
    max_header_bytes: usize,
    max_body_bytes: usize,
    pending: Vec<u8>,
    head: Option<Head>,
}

impl ResponseDecoder {
    pub fn response() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            pending: Vec::new(),
            head: None,
        }
    }

    pub fn max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Feeds bytes read from the stream. Returns the response once complete.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Option<FramedResponse>, FrameError> {
        self.pending.extend_from_slice(chunk);

        if self.head.is_none() {
            let Some(end) = find(&self.pending, HEADER_TERMINATOR) else {
                if self.pending.len() > self.max_header_bytes {
                    return Err(FrameError::OversizedHeader {
                        size: self.pending.len(),
                        max: self.max_header_bytes,
                    });
                }
                return Ok(None);
            };
            if end > self.max_header_bytes {
                return Err(FrameError::OversizedHeader {
                    size: end,
                    max: self.max_header_bytes,
                });
            }
            let raw_head = self
                .pending
                .drain(..end + HEADER_TERMINATOR.len())
                .collect::<Vec<u8>>();
            self.head = Some(self.parse_head(&raw_head[..end])?);
        }

        let framing = match &self.head {
            Some(head) => head.framing,
            None => return Ok(None),
        };
        match framing {
            BodyFraming::Length(length) => {
                if self.pending.len() < length {
                    return Ok(None);
                }
                let body = self.pending.drain(..length).collect();
                self.complete(body).map(Some)
            }
            BodyFraming::Chunked => match decode_chunked(&self.pending, self.max_body_bytes)? {
                Some(body) => {
                    self.pending.clear();
                    self.complete(body).map(Some)
                }
                None => {
                    // Size lines, extensions and trailers get the header allowance on top.
                    let limit = self.max_body_bytes.saturating_add(self.max_header_bytes);
                    if self.pending.len() > limit {
                        return Err(FrameError::OversizedBody {
                            size: self.pending.len(),
                            max: limit,
                        });
                    }
                    Ok(None)
                }
            },
            BodyFraming::UntilEof => {
                if self.pending.len() > self.max_body_bytes {
                    return Err(FrameError::OversizedBody {
                        size: self.pending.len(),
                        max: self.max_body_bytes,
                    });
                }
                Ok(None)
            }
        }
    }

    /// Called at EOF. Only an EOF-delimited body can complete here.
    pub fn finish(&mut self) -> Result<FramedResponse, FrameError> {
        match self.head.as_ref().map(|head| head.framing) {
            Some(BodyFraming::UntilEof) => {
                let body = std::mem::take(&mut self.pending);
                self.complete(body)
            }
            _ => Err(FrameError::Truncated),
        }
    }

    fn complete(&mut self, body: Vec<u8>) -> Result<FramedResponse, FrameError> {
        let head = self.head.take().ok_or(FrameError::Truncated)?;
        build_response(head, body)
    }

    fn parse_head(&self, raw: &[u8]) -> Result<Head, FrameError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| FrameError::MalformedHeader("header section is not utf-8".to_string()))?;
        let mut lines = text.split("\r\n");
        let start_line = lines.next().unwrap_or_default().to_string();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(FrameError::MalformedHeader(line.to_string()));
            }
            headers.push((name.to_string(), value.trim().to_string()));
        }
        let headers = Headers(headers);

        let chunked = headers
            .get("Transfer-Encoding")
            .map(|value| value.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);
        let framing = if chunked {
            BodyFraming::Chunked
        } else if let Some(length) = headers.get("Content-Length") {
            let length = length
                .parse::<usize>()
                .map_err(|_| FrameError::MalformedHeader(format!("Content-Length: {length}")))?;
            if length > self.max_body_bytes {
                return Err(FrameError::OversizedBody {
                    size: length,
                    max: self.max_body_bytes,
                });
            }
            BodyFraming::Length(length)
        } else {
            BodyFraming::UntilEof
        };

        Ok(Head {
            start_line,
            headers,
            framing,
        })
    }
}

fn build_response(head: Head, body: Vec<u8>) -> Result<FramedResponse, FrameError> {
    let mut parts = head.start_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(FrameError::MalformedStartLine(head.start_line.clone()));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| FrameError::MalformedStartLine(head.start_line.clone()))?;
    let reason = parts.next().unwrap_or_default().to_string();
    Ok(FramedResponse {
        status,
        reason,
        headers: head.headers,
        body,
    })
}

/// Returns the reassembled body once the terminating zero-size chunk is seen.
fn decode_chunked(buf: &[u8], max_body_bytes: usize) -> Result<Option<Vec<u8>>, FrameError> {
    let mut body = Vec::new();
    let mut cursor = 0;
    loop {
        let Some(line_len) = find(&buf[cursor..], b"\r\n") else {
            return Ok(None);
        };
        let size_line = std::str::from_utf8(&buf[cursor..cursor + line_len])
            .map_err(|_| FrameError::MalformedChunk("size line is not utf-8".to_string()))?;
        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_token, 16)
            .map_err(|_| FrameError::MalformedChunk(size_line.to_string()))?;
        cursor += line_len + 2;

        if size == 0 {
            // Skip optional trailers up to the final empty line.
            loop {
                let Some(trailer_len) = find(&buf[cursor..], b"\r\n") else {
                    return Ok(None);
                };
                cursor += trailer_len + 2;
                if trailer_len == 0 {
                    return Ok(Some(body));
                }
            }
        }

        let total = body.len().checked_add(size);
        if total.map_or(true, |total| total > max_body_bytes) {
            return Err(FrameError::OversizedBody {
                size: body.len().saturating_add(size),
                max: max_body_bytes,
            });
        }
        let data_end = cursor + size;
        let chunk_end = data_end
            .checked_add(2)
            .ok_or_else(|| FrameError::MalformedChunk(size_line.to_string()))?;
        if buf.len() < chunk_end {
            return Ok(None);
        }
        body.extend_from_slice(&buf[cursor..data_end]);
        if &buf[data_end..chunk_end] != b"\r\n" {
            return Err(FrameError::MalformedChunk(
                "chunk data not followed by CRLF".to_string(),
            ));
        }
        cursor = chunk_end;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

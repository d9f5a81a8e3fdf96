//! Agent side of the control socket, for tests.
#![allow(dead_code)]

use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

/// One request as the agent sees it.
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn json<T: DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("request body is json")
    }
}

/// Reads one `Content-Length` framed request off `stream`.
pub async fn read_request(stream: &mut UnixStream) -> ReceivedRequest {
    let mut raw = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        if let Some(end) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
            let head = std::str::from_utf8(&raw[..end]).expect("utf-8 head");
            let mut lines = head.split("\r\n");
            let mut start = lines.next().unwrap_or_default().split(' ');
            let method = start.next().unwrap_or_default().to_string();
            let path = start.next().unwrap_or_default().to_string();
            let length = lines
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .map(|(_, value)| value.trim().parse::<usize>().expect("content length"))
                .unwrap_or(0);
            let body_start = end + 4;
            if raw.len() >= body_start + length {
                return ReceivedRequest {
                    method,
                    path,
                    body: raw[body_start..body_start + length].to_vec(),
                };
            }
        }
        let read = stream.read(&mut buf).await.expect("read request");
        assert!(read > 0, "client hung up before finishing the request");
        raw.extend_from_slice(&buf[..read]);
    }
}

pub fn response_frame(status: u16, reason: &str, body: &[u8]) -> Vec<u8> {
    let mut frame = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    frame.extend_from_slice(body);
    frame
}

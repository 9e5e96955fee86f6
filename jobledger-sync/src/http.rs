//! Blocking HTTP plumbing shared by the orchestrator client and the REST backend.

use std::time::Duration;

const USER_AGENT: &str = concat!("jobledger/", env!("CARGO_PKG_VERSION"));

/// A ureq agent with one overall timeout per request.
pub(crate) fn agent(timeout_secs: u64) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
}

/// Percent-encode one URL path segment. Query values go through
/// `ureq::Request::query` instead.
///
/// Everything outside the RFC 3986 unreserved set is escaped, `/` included.
pub(crate) fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Percent-encode a `/`-separated path, keeping the separators.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Body of an error response, best effort.
pub(crate) fn error_body(response: ureq::Response) -> String {
    response
        .into_string()
        .map(|body| body.trim().to_string())
        .unwrap_or_else(|_| "unable to read response body".to_string())
}

use std::fmt::Write as _;

/// An RTSP response under construction (RFC 2326 §7).
///
/// Builder-style: pick a status constructor, chain
/// [`add_header`](Self::add_header) and [`with_body`](Self::with_body) —
/// which records `Content-Length` itself (RFC 2326 §12.14) — then call
/// [`serialize`](Self::serialize) for the wire form:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 2\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\n...
/// ```
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// 200 OK — success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 400 Bad Request — malformed request or track not describable.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 401 Unauthorized — authentication required or failed (RFC 2326 §11.1).
    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
    }

    /// 454 Session Not Found — the Session header did not resolve.
    pub fn session_not_found() -> Self {
        Self::new(454, "Session Not Found")
    }

    /// 461 Unsupported Transport — e.g. a multicast SETUP.
    pub fn unsupported_transport() -> Self {
        Self::new(461, "Unsupported Transport")
    }

    /// 501 Not Implemented — unknown RTSP method.
    pub fn not_implemented() -> Self {
        Self::new(501, "Not Implemented")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Attach a body. `Content-Length` is recorded here, so the header
    /// list is complete before serialization.
    pub fn with_body(mut self, body: String) -> Self {
        self.headers
            .push(("Content-Length".to_string(), body.len().to_string()));
        self.body = Some(body);
        self
    }

    /// Render the RTSP text wire format: status line, every recorded
    /// header, the blank separator, then the body if one was attached.
    pub fn serialize(&self) -> String {
        let body_len = self.body.as_deref().map_or(0, str::len);
        let mut wire = String::with_capacity(64 + 32 * self.headers.len() + body_len);

        let _ = write!(wire, "RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);
        for (name, value) in &self.headers {
            let _ = write!(wire, "{name}: {value}\r\n");
        }
        wire.push_str("\r\n");
        if let Some(body) = &self.body {
            wire.push_str(body);
        }

        wire
    }
}

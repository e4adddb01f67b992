use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media::TrackId;

/// RTSP method tokens the dialog engine dispatches on (RFC 2326 §6.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    GetParameter,
    Teardown,
    /// Unrecognized token; answered with 501.
    Other(String),
}

impl Method {
    fn from_token(token: &str) -> Self {
        match token {
            "OPTIONS" => Self::Options,
            "DESCRIBE" => Self::Describe,
            "SETUP" => Self::Setup,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "GET_PARAMETER" => Self::GetParameter,
            "TEARDOWN" => Self::Teardown,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name of the method. Also the HA2 input for digest verification.
    pub fn name(&self) -> &str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::GetParameter => "GET_PARAMETER",
            Self::Teardown => "TEARDOWN",
            Self::Other(token) => token,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One received RTSP request: start line plus headers (RFC 2326 §6).
///
/// Header names are folded to lowercase at parse time, so lookups are
/// plain comparisons (names are case-insensitive per RFC 2326 §4.2).
/// Request bodies never reach the dialog engine — the framing layer
/// drains them against `Content-Length`.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: Method,
    /// Request-URI, e.g. `rtsp://host:port/trackID=0`.
    pub uri: String,
    headers: Vec<(String, String)>,
}

impl RtspRequest {
    /// Parse a complete request: start line, headers, trailing blank line.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let start_line = match lines.next() {
            Some(line) if !line.trim().is_empty() => line.trim_end(),
            _ => {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::EmptyRequest,
                });
            }
        };

        // Method SP Request-URI SP RTSP-Version
        let invalid_start = || RtspError::Parse {
            kind: ParseErrorKind::InvalidRequestLine,
        };
        let (token, tail) = start_line.split_once(' ').ok_or_else(invalid_start)?;
        let (uri, version) = tail.trim().rsplit_once(' ').ok_or_else(invalid_start)?;
        let uri = uri.trim();
        if token.is_empty() || uri.is_empty() || !version.starts_with("RTSP/") {
            return Err(invalid_start());
        }
        if version != "RTSP/1.0" {
            tracing::warn!(version, "request is not RTSP/1.0, answering anyway");
        }

        let mut headers = Vec::new();
        for line in lines.take_while(|line| !line.is_empty()) {
            let (name, value) = line.split_once(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Self {
            method: Method::from_token(token),
            uri: uri.to_string(),
            headers,
        })
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// CSeq echo value; `"0"` when the client omitted it (RFC 2326 §12.17).
    pub fn cseq(&self) -> &str {
        self.header("cseq").unwrap_or("0")
    }

    /// Session ID from the Session header, parameters stripped:
    /// `"42;timeout=60"` → `"42"`.
    pub fn session_id(&self) -> Option<&str> {
        self.header("session")
            .map(|value| value.split(';').next().unwrap_or(value).trim())
            .filter(|id| !id.is_empty())
    }

    /// Track addressed by a `trackID=<id>` suffix on the request URI
    /// (how SETUP names a stream within the session).
    pub fn track_id(&self) -> Option<TrackId> {
        match self.uri.rsplit_once("trackID=")? {
            (_, "0") => Some(TrackId::Video),
            (_, "1") => Some(TrackId::Audio),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_request_round_trip() {
        let raw = "SETUP rtsp://10.0.0.5:8554/trackID=1 RTSP/1.0\r\n\
                   CSeq: 7\r\n\
                   Transport: RTP/AVP;unicast;client_port=9000-9001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Setup);
        assert_eq!(req.uri, "rtsp://10.0.0.5:8554/trackID=1");
        assert_eq!(req.cseq(), "7");
        assert_eq!(
            req.header("Transport"),
            Some("RTP/AVP;unicast;client_port=9000-9001")
        );
        assert_eq!(req.track_id(), Some(TrackId::Audio));
    }

    #[test]
    fn unknown_method_token_is_kept() {
        let req = RtspRequest::parse("RECORD rtsp://h/ RTSP/1.0\r\nCSeq: 2\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Other("RECORD".to_string()));
        assert_eq!(req.method.name(), "RECORD");
    }

    #[test]
    fn malformed_requests_are_rejected() {
        assert!(matches!(
            RtspRequest::parse(""),
            Err(RtspError::Parse {
                kind: ParseErrorKind::EmptyRequest
            })
        ));
        assert!(matches!(
            RtspRequest::parse("TEARDOWN\r\n\r\n"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine
            })
        ));
        assert!(matches!(
            RtspRequest::parse("PLAY rtsp://h/ HTTP/1.1\r\n\r\n"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine
            })
        ));
        assert!(matches!(
            RtspRequest::parse("OPTIONS rtsp://h/ RTSP/1.0\r\nno colon here\r\n\r\n"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader
            })
        ));
    }

    #[test]
    fn header_names_ignore_case() {
        let raw = "OPTIONS rtsp://h/ RTSP/1.0\r\nCSEQ: 3\r\nauthorization: Basic Zm9v\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.cseq(), "3");
        assert_eq!(req.header("Authorization"), Some("Basic Zm9v"));
        assert_eq!(req.header("authorization"), Some("Basic Zm9v"));
    }

    #[test]
    fn cseq_defaults_to_zero() {
        let req = RtspRequest::parse("OPTIONS rtsp://h/ RTSP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.cseq(), "0");
    }

    #[test]
    fn session_id_strips_parameters() {
        let req =
            RtspRequest::parse("PLAY rtsp://h/ RTSP/1.0\r\nSession: 12;timeout=60\r\n\r\n").unwrap();
        assert_eq!(req.session_id(), Some("12"));

        let bare = RtspRequest::parse("PLAY rtsp://h/ RTSP/1.0\r\n\r\n").unwrap();
        assert_eq!(bare.session_id(), None);
    }

    #[test]
    fn track_id_requires_known_suffix() {
        let parse = |uri: &str| {
            RtspRequest::parse(&format!("SETUP {uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n")).unwrap()
        };
        assert_eq!(parse("rtsp://h/trackID=0").track_id(), Some(TrackId::Video));
        assert_eq!(parse("rtsp://h/trackID=1").track_id(), Some(TrackId::Audio));
        assert_eq!(parse("rtsp://h/trackID=7").track_id(), None);
        assert_eq!(parse("rtsp://h/").track_id(), None);
    }
}

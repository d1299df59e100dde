//! RTSP request encoding and response parsing.

use std::fmt;

use super::headers::HeaderList;
use super::transport::TransportError;

/// Protocol version sent and accepted on every message.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// Request methods used by the streaming handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtspMethod {
    Options,
    Announce,
    Setup,
    Record,
    SetParameter,
    Flush,
    Teardown,
}

impl RtspMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Announce => "ANNOUNCE",
            Self::Setup => "SETUP",
            Self::Record => "RECORD",
            Self::SetParameter => "SET_PARAMETER",
            Self::Flush => "FLUSH",
            Self::Teardown => "TEARDOWN",
        }
    }
}

impl fmt::Display for RtspMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspBody {
    pub content_type: String,
    pub content: String,
}

/// An outgoing RTSP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: RtspMethod,
    pub url: String,
    pub cseq: u32,
    pub headers: HeaderList,
    pub body: Option<RtspBody>,
}

impl RtspRequest {
    /// Serialises the request into wire form.
    ///
    /// `CSeq` always comes first; `Content-Type`/`Content-Length` are derived
    /// from the body and appended after the caller's headers.
    pub fn encode(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.url, RTSP_VERSION);
        out.push_str(&format!("CSeq: {}\r\n", self.cseq));
        for (key, value) in self.headers.iter() {
            out.push_str(&format!("{key}: {value}\r\n"));
        }
        match &self.body {
            Some(body) => {
                out.push_str(&format!("Content-Type: {}\r\n", body.content_type));
                out.push_str(&format!("Content-Length: {}\r\n\r\n", body.content.len()));
                out.push_str(&body.content);
            }
            None => out.push_str("\r\n"),
        }
        out
    }
}

/// A parsed RTSP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub code: u16,
    pub reason: String,
    pub headers: HeaderList,
    pub body: String,
}

impl RtspResponse {
    /// Parses a complete response (status line, headers and body).
    pub fn parse(raw: &str) -> Result<Self, TransportError> {
        let (head, body) = match raw.find("\r\n\r\n") {
            Some(pos) => (&raw[..pos], &raw[pos + 4..]),
            None => (raw.trim_end_matches("\r\n"), ""),
        };

        let mut lines = head.split("\r\n");
        let status = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| TransportError::Malformed("empty response".to_string()))?;
        let (code, reason) = parse_status_line(status)?;

        let mut headers = HeaderList::new();
        for line in lines {
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| TransportError::Malformed(format!("bad header line '{line}'")))?;
            headers.put(key.trim(), value.trim());
        }

        Ok(Self {
            code,
            reason,
            headers,
            body: body.to_string(),
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Declared body length; zero when absent or unparseable.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

fn parse_status_line(line: &str) -> Result<(u16, String), TransportError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if version != RTSP_VERSION {
        return Err(TransportError::Malformed(format!(
            "unexpected protocol '{version}'"
        )));
    }
    let code = parts
        .next()
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| TransportError::Malformed(format!("bad status line '{line}'")))?;
    let reason = parts.next().unwrap_or_default().to_string();
    Ok((code, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_request_without_body() {
        let mut headers = HeaderList::new();
        headers.put("User-Agent", "test");
        let request = RtspRequest {
            method: RtspMethod::Record,
            url: "rtsp://10.0.0.2/42".to_string(),
            cseq: 3,
            headers,
            body: None,
        };

        assert_eq!(
            request.encode(),
            "RECORD rtsp://10.0.0.2/42 RTSP/1.0\r\nCSeq: 3\r\nUser-Agent: test\r\n\r\n"
        );
    }

    #[test]
    fn encodes_body_with_length() {
        let request = RtspRequest {
            method: RtspMethod::SetParameter,
            url: "rtsp://h/1".to_string(),
            cseq: 1,
            headers: HeaderList::new(),
            body: Some(RtspBody {
                content_type: "text/parameters".to_string(),
                content: "volume: -15.000000\r\n".to_string(),
            }),
        };

        let wire = request.encode();
        assert!(wire.starts_with("SET_PARAMETER rtsp://h/1 RTSP/1.0\r\n"));
        assert!(wire.contains("Content-Type: text/parameters\r\n"));
        assert!(wire.ends_with("Content-Length: 20\r\n\r\nvolume: -15.000000\r\n"));
    }

    #[test]
    fn parses_response_headers() {
        let response = RtspResponse::parse(
            "RTSP/1.0 200 OK\r\nCSeq: 2\r\nSession: DEADBEEF\r\nAudio-Jack-Status: connected; type=analog\r\n\r\n",
        )
        .unwrap();

        assert_eq!(response.code, 200);
        assert_eq!(response.reason, "OK");
        assert!(response.is_success());
        assert_eq!(response.header("Session"), Some("DEADBEEF"));
        assert_eq!(
            response.header("Audio-Jack-Status"),
            Some("connected; type=analog")
        );
    }

    #[test]
    fn parses_error_status_with_multiword_reason() {
        let response = RtspResponse::parse("RTSP/1.0 453 Not Enough Bandwidth\r\n\r\n").unwrap();
        assert_eq!(response.code, 453);
        assert_eq!(response.reason, "Not Enough Bandwidth");
        assert!(!response.is_success());
    }

    #[test]
    fn rejects_garbage() {
        assert!(RtspResponse::parse("").is_err());
        assert!(RtspResponse::parse("HTTP/1.1 200 OK\r\n\r\n").is_err());
        assert!(RtspResponse::parse("RTSP/1.0 abc OK\r\n\r\n").is_err());
        assert!(RtspResponse::parse("RTSP/1.0 200 OK\r\nnocolon\r\n\r\n").is_err());
    }
}

//! RTSP client session.

use std::net::IpAddr;

use thiserror::Error;

use super::headers::HeaderList;
use super::message::{RtspBody, RtspMethod, RtspRequest, RtspResponse};
use super::transport::{RtspTransport, TransportError};

/// Transport requested on SETUP.
const SETUP_TRANSPORT: &str = "RTP/AVP/TCP;unicast;interleaved=0-1;mode=record";

/// Errors returned by [`RtspContext`] requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtspError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{method} rejected: {code} {reason}")]
    Status {
        method: RtspMethod,
        code: u16,
        reason: String,
    },
}

/// Client side of one RTSP session.
///
/// Holds the headers sent on every request (`Client-Instance`,
/// `Apple-Challenge` while it is set), the CSeq counter and the session id
/// the receiver assigned on SETUP.
pub struct RtspContext<T: RtspTransport> {
    transport: T,
    user_agent: String,
    url: String,
    headers: HeaderList,
    cseq: u32,
    session: Option<String>,
}

impl<T: RtspTransport> RtspContext<T> {
    pub fn new(transport: T, user_agent: impl Into<String>) -> Self {
        Self {
            transport,
            user_agent: user_agent.into(),
            url: String::new(),
            headers: HeaderList::new(),
            cseq: 0,
            session: None,
        }
    }

    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), RtspError> {
        log::debug!("[Rtsp] connecting to {host}:{port}");
        self.transport.connect(host, port)?;
        Ok(())
    }

    pub fn local_ip(&self) -> Result<IpAddr, RtspError> {
        Ok(self.transport.local_ip()?)
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.put(key, value);
    }

    pub fn remove_header(&mut self, key: &str) -> Option<String> {
        self.headers.remove(key)
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    /// Session id assigned by the receiver on SETUP.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn announce(&mut self, sdp: &str) -> Result<RtspResponse, RtspError> {
        let body = RtspBody {
            content_type: "application/sdp".to_string(),
            content: sdp.to_string(),
        };
        self.exec(RtspMethod::Announce, HeaderList::new(), Some(body))
    }

    pub fn setup(&mut self) -> Result<RtspResponse, RtspError> {
        let mut extra = HeaderList::new();
        extra.put("Transport", SETUP_TRANSPORT);
        let response = self.exec(RtspMethod::Setup, extra, None)?;
        if let Some(session) = response.header("Session") {
            self.session = Some(session.to_string());
        }
        Ok(response)
    }

    pub fn record(&mut self) -> Result<RtspResponse, RtspError> {
        let mut extra = HeaderList::new();
        extra.put("Range", "npt=0-");
        extra.put("RTP-Info", "seq=0;rtptime=0");
        self.exec(RtspMethod::Record, extra, None)
    }

    pub fn set_parameter(&mut self, parameters: &str) -> Result<RtspResponse, RtspError> {
        let body = RtspBody {
            content_type: "text/parameters".to_string(),
            content: parameters.to_string(),
        };
        self.exec(RtspMethod::SetParameter, HeaderList::new(), Some(body))
    }

    pub fn flush(&mut self) -> Result<RtspResponse, RtspError> {
        let mut extra = HeaderList::new();
        extra.put("RTP-Info", "seq=0;rtptime=0");
        self.exec(RtspMethod::Flush, extra, None)
    }

    pub fn teardown(&mut self) -> Result<RtspResponse, RtspError> {
        let response = self.exec(RtspMethod::Teardown, HeaderList::new(), None);
        self.session = None;
        response
    }

    /// Closes the transport and forgets the session.
    pub fn close(&mut self) {
        self.session = None;
        self.transport.close();
    }

    fn exec(
        &mut self,
        method: RtspMethod,
        extra: HeaderList,
        body: Option<RtspBody>,
    ) -> Result<RtspResponse, RtspError> {
        self.cseq += 1;

        let mut headers = self.headers.clone();
        for (key, value) in extra.iter() {
            headers.put(key, value);
        }
        if let Some(session) = &self.session {
            headers.put("Session", session.as_str());
        }
        headers.put("User-Agent", self.user_agent.as_str());

        let request = RtspRequest {
            method,
            url: self.url.clone(),
            cseq: self.cseq,
            headers,
            body,
        };

        log::debug!("[Rtsp] {} {} (CSeq {})", method, self.url, self.cseq);
        let response = self.transport.exchange(&request)?;
        log::debug!("[Rtsp] {} -> {} {}", method, response.code, response.reason);

        if !response.is_success() {
            return Err(RtspError::Status {
                method,
                code: response.code,
                reason: response.reason,
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{ok_response, ScriptedTransport};

    fn context(transport: ScriptedTransport) -> RtspContext<ScriptedTransport> {
        let mut ctx = RtspContext::new(transport, "agent/1.0");
        ctx.set_url("rtsp://192.168.1.10/1234");
        ctx
    }

    #[test]
    fn cseq_increments_per_request() {
        let transport = ScriptedTransport::new(vec![Ok(ok_response(&[])), Ok(ok_response(&[]))]);
        let log = transport.requests();
        let mut ctx = context(transport);

        ctx.announce("v=0\r\n").unwrap();
        ctx.record().unwrap();

        let sent = log.lock();
        assert_eq!(sent[0].cseq, 1);
        assert_eq!(sent[1].cseq, 2);
        assert_eq!(sent[0].method, RtspMethod::Announce);
        assert_eq!(sent[1].headers.get("Range"), Some("npt=0-"));
    }

    #[test]
    fn setup_stores_session_and_sends_it_afterwards() {
        let transport = ScriptedTransport::new(vec![
            Ok(ok_response(&[("Session", "ABCD")])),
            Ok(ok_response(&[])),
        ]);
        let log = transport.requests();
        let mut ctx = context(transport);

        ctx.setup().unwrap();
        assert_eq!(ctx.session(), Some("ABCD"));
        ctx.record().unwrap();

        let sent = log.lock();
        assert_eq!(sent[0].headers.get("Transport"), Some(SETUP_TRANSPORT));
        assert_eq!(sent[0].headers.get("Session"), None);
        assert_eq!(sent[1].headers.get("Session"), Some("ABCD"));
    }

    #[test]
    fn persistent_headers_ride_along_until_removed() {
        let transport = ScriptedTransport::new(vec![Ok(ok_response(&[])), Ok(ok_response(&[]))]);
        let log = transport.requests();
        let mut ctx = context(transport);

        ctx.add_header("Apple-Challenge", "xyz");
        ctx.announce("v=0\r\n").unwrap();
        assert_eq!(ctx.remove_header("Apple-Challenge").as_deref(), Some("xyz"));
        ctx.setup().unwrap();

        let sent = log.lock();
        assert_eq!(sent[0].headers.get("Apple-Challenge"), Some("xyz"));
        assert_eq!(sent[0].headers.get("User-Agent"), Some("agent/1.0"));
        assert_eq!(sent[1].headers.get("Apple-Challenge"), None);
    }

    #[test]
    fn error_status_is_reported() {
        let rejected = RtspResponse::parse("RTSP/1.0 401 Unauthorized\r\n\r\n").unwrap();
        let mut ctx = context(ScriptedTransport::new(vec![Ok(rejected)]));

        let err = ctx.announce("v=0\r\n").unwrap_err();
        assert_eq!(
            err,
            RtspError::Status {
                method: RtspMethod::Announce,
                code: 401,
                reason: "Unauthorized".to_string(),
            }
        );
    }

    #[test]
    fn teardown_forgets_the_session() {
        let transport = ScriptedTransport::new(vec![
            Ok(ok_response(&[("Session", "S1")])),
            Ok(ok_response(&[])),
        ]);
        let mut ctx = context(transport);
        ctx.setup().unwrap();
        ctx.teardown().unwrap();
        assert_eq!(ctx.session(), None);
    }
}

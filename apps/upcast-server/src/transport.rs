//! Blocking TCP transport for RTSP sessions.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use upcast_core::rtsp::{RtspRequest, RtspResponse, RtspTransport, TransportError};

/// Largest response body accepted from a receiver.
pub const MAX_BODY_LEN: usize = 64 * 1024;

/// One TCP connection to a receiver's RTSP port.
pub struct TcpRtspTransport {
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpRtspTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            stream: None,
        }
    }

    fn stream(&mut self) -> Result<&mut BufReader<TcpStream>, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl RtspTransport for TcpRtspTransport {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        let connect_error = |reason: String| TransportError::Connect {
            host: host.to_string(),
            port,
            reason,
        };

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_error(e.to_string()))?
            .next()
            .ok_or_else(|| connect_error("no address resolved".to_string()))?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| connect_error(e.to_string()))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;

        log::debug!("[Rtsp] connected to {addr}");
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    fn local_ip(&self) -> Result<IpAddr, TransportError> {
        let stream = self.stream.as_ref().ok_or(TransportError::NotConnected)?;
        Ok(stream.get_ref().local_addr()?.ip())
    }

    fn exchange(&mut self, request: &RtspRequest) -> Result<RtspResponse, TransportError> {
        let reader = self.stream()?;
        log::trace!("[Rtsp] >> {} {}", request.method, request.url);
        reader.get_mut().write_all(request.encode().as_bytes())?;

        let mut head = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Err(TransportError::Io("connection closed by peer".to_string()));
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            head.push_str(line.trim_end_matches(['\r', '\n']));
            head.push_str("\r\n");
        }

        let mut response = RtspResponse::parse(&head)?;
        let length = body_length(&response)?;
        if length > 0 {
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body)?;
            response.body = String::from_utf8_lossy(&body).into_owned();
        }

        log::trace!("[Rtsp] << {} {}", response.code, response.reason);
        Ok(response)
    }

    fn close(&mut self) {
        if let Some(reader) = self.stream.take() {
            let _ = reader.get_ref().shutdown(std::net::Shutdown::Both);
        }
    }
}

/// Declared body length, bounded by [`MAX_BODY_LEN`].
fn body_length(response: &RtspResponse) -> Result<usize, TransportError> {
    let Some(value) = response.header("Content-Length") else {
        return Ok(0);
    };
    value
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|length| *length <= MAX_BODY_LEN)
        .ok_or_else(|| {
            TransportError::Malformed(format!(
                "Content-Length '{value}' is not within 0..={MAX_BODY_LEN}"
            ))
        })
}

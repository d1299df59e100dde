//! RAOP streaming session client.
//!
//! Drives the handshake with an AirPort-style receiver over RTSP:
//!
//! ```text
//! Connect ──ANNOUNCE──▶ Announce ──SETUP──▶ Setup ──RECORD──▶ Record
//! ```
//!
//! Each state is entered when the previous request was acknowledged, and the
//! entry action sends the next request. Nothing is retried: any error aborts
//! the handshake and closes the connection.
//!
//! Once in `Record` the session accepts volume changes, flushes, teardown and
//! audio packets for encryption.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::crypto::{self, CipherContext, CryptoError};
use crate::error::ErrorCode;
use crate::events::{EventEmitter, NoopEventEmitter, SessionEvent};
use crate::rtsp::{HeaderList, RtspContext, RtspError, RtspTransport, TransportError};
use crate::utils::now_millis;
use crate::volume::VolumeValue;

/// User agent the receivers expect.
pub const DEFAULT_USER_AGENT: &str = "iTunes/4.6 (Macintosh; U; PPC Mac OS X 10.3)";

/// RTSP port of the receivers.
pub const DEFAULT_RTSP_PORT: u16 = 5000;

const HEADER_CLIENT_INSTANCE: &str = "Client-Instance";
const HEADER_CHALLENGE: &str = "Apple-Challenge";
const HEADER_JACK_STATUS: &str = "Audio-Jack-Status";

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that abort a streaming session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RaopError {
    #[error(transparent)]
    Rtsp(#[from] RtspError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("operation requires state {expected}, session is in {actual}")]
    InvalidState {
        expected: RtspState,
        actual: RtspState,
    },
}

impl From<TransportError> for RaopError {
    fn from(err: TransportError) -> Self {
        Self::Rtsp(RtspError::Transport(err))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session State
// ─────────────────────────────────────────────────────────────────────────────

/// Handshake/session state. Each value is entered when the request of the
/// same name was acknowledged (`Connect` when the transport opened).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RtspState {
    Connect,
    Announce,
    Setup,
    Record,
    SetParameter,
    Flush,
    Teardown,
}

impl fmt::Display for RtspState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "Connect",
            Self::Announce => "Announce",
            Self::Setup => "Setup",
            Self::Record => "Record",
            Self::SetParameter => "SetParameter",
            Self::Flush => "Flush",
            Self::Teardown => "Teardown",
        };
        f.write_str(name)
    }
}

/// Kind of audio output the receiver reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JackType {
    #[default]
    Analog,
    Digital,
}

/// Whether something is plugged into the receiver's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JackConnection {
    #[default]
    Disconnected,
    Connected,
}

/// Parsed `Audio-Jack-Status` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct JackStatus {
    #[serde(rename = "type")]
    pub jack_type: JackType,
    pub status: JackConnection,
}

/// Parses an `Audio-Jack-Status` value such as `connected; type=analog`.
///
/// Tokens are `;`-separated. Only `type=digital` and the bare flag
/// `connected` change the result; everything else is ignored, so the default
/// is analog and disconnected.
pub fn parse_jack_status(value: &str) -> JackStatus {
    let mut jack = JackStatus::default();
    for token in value.split(';').map(str::trim) {
        match token.split_once('=') {
            Some((key, val)) => {
                if key.trim() == "type" && val.trim() == "digital" {
                    jack.jack_type = JackType::Digital;
                }
            }
            None => {
                if token == "connected" {
                    jack.status = JackConnection::Connected;
                }
            }
        }
    }
    jack
}

/// Result of a handshake that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The session reached `Record`.
    Streaming(JackStatus),
    /// The receiver acknowledged SETUP without a jack status; the session
    /// stays in `Setup`.
    NotReady,
}

/// Builds the ANNOUNCE body.
pub fn session_description(
    sid: &str,
    local_ip: IpAddr,
    host: &str,
    wrapped_key: &str,
    iv: &str,
) -> String {
    format!(
        "v=0\r\n\
         o=iTunes {sid} 0 IN IP4 {local_ip}\r\n\
         s=iTunes\r\n\
         c=IN IP4 {host}\r\n\
         t=0 0\r\n\
         m=audio 0 RTP/AVP 96\r\n\
         a=rtpmap:96 AppleLossless\r\n\
         a=fmtp:96 4096 0 16 40 10 14 2 255 0 0 44100\r\n\
         a=rsaaeskey:{wrapped_key}\r\n\
         a=aesiv:{iv}\r\n"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// One streaming session with one receiver.
pub struct RaopClient<T: RtspTransport> {
    rtsp: RtspContext<T>,
    port: u16,
    host: String,
    sid: String,
    client_instance: String,
    cipher: CipherContext,
    /// Identity and cipher have not been used by a handshake yet.
    fresh: bool,
    state: RtspState,
    jack: Option<JackStatus>,
    emitter: Arc<dyn EventEmitter>,
}

fn session_identity() -> (String, String) {
    let sid = OsRng.next_u32().to_string();
    let client_instance = format!("{:08x}{:08x}", OsRng.next_u32(), OsRng.next_u32());
    (sid, client_instance)
}

impl<T: RtspTransport> RaopClient<T> {
    /// Creates a client with a fresh session id, client instance and cipher.
    pub fn new(transport: T, config: &Config) -> Self {
        Self::with_cipher(transport, config, CipherContext::generate())
    }

    /// Creates a client with a caller-supplied cipher context.
    ///
    /// The cipher is used for the first handshake only; every later
    /// [`connect`](Self::connect) generates a new one.
    pub fn with_cipher(transport: T, config: &Config, cipher: CipherContext) -> Self {
        let (sid, client_instance) = session_identity();
        Self {
            rtsp: RtspContext::new(transport, config.user_agent.clone()),
            port: config.rtsp_port,
            host: String::new(),
            sid,
            client_instance,
            cipher,
            fresh: true,
            state: RtspState::Connect,
            jack: None,
            emitter: Arc::new(NoopEventEmitter),
        }
    }

    /// Routes session events to `emitter`.
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn state(&self) -> RtspState {
        self.state
    }

    pub fn jack_status(&self) -> Option<JackStatus> {
        self.jack
    }

    pub fn session_id(&self) -> &str {
        &self.sid
    }

    pub fn client_instance(&self) -> &str {
        &self.client_instance
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Opens the connection to `host` and runs the handshake.
    ///
    /// Each call starts a new session: session id, Client-Instance and cipher
    /// are regenerated unless this is the client's first handshake. On error
    /// the connection is closed.
    pub fn connect(&mut self, host: &str) -> Result<HandshakeOutcome, RaopError> {
        if !std::mem::take(&mut self.fresh) {
            let (sid, client_instance) = session_identity();
            self.sid = sid;
            self.client_instance = client_instance;
            self.cipher = CipherContext::generate();
        }
        self.host = host.to_string();
        self.state = RtspState::Connect;
        self.jack = None;
        self.rtsp
            .add_header(HEADER_CLIENT_INSTANCE, self.client_instance.as_str());

        log::info!("[Raop] Connecting to {}:{}", host, self.port);
        let result = self
            .rtsp
            .connect(host, self.port)
            .map_err(RaopError::from)
            .and_then(|()| self.run_handshake());

        if let Err(e) = &result {
            self.abort(e);
        }
        result
    }

    /// Sends the receiver a new volume.
    pub fn set_volume(&mut self, volume: VolumeValue) -> Result<(), RaopError> {
        self.require_record()?;
        let parameters = format!("volume: {:.6}\r\n", volume.to_raop_db());
        self.run_in_session(RtspState::SetParameter, |rtsp| {
            rtsp.set_parameter(&parameters)
        })
    }

    /// Asks the receiver to drop buffered audio.
    pub fn flush(&mut self) -> Result<(), RaopError> {
        self.require_record()?;
        self.run_in_session(RtspState::Flush, |rtsp| rtsp.flush())
    }

    /// Ends the session and closes the connection.
    pub fn teardown(&mut self) -> Result<(), RaopError> {
        self.require_record()?;
        let result = self.rtsp.teardown();
        self.rtsp.close();
        match result {
            Ok(_) => {
                self.enter(RtspState::Teardown);
                Ok(())
            }
            Err(e) => {
                let err = RaopError::from(e);
                self.abort(&err);
                Err(err)
            }
        }
    }

    /// Encrypts one outgoing audio packet in place.
    ///
    /// Returns the number of bytes encrypted; a trailing partial block stays
    /// in plaintext.
    pub fn encrypt_audio(&mut self, packet: &mut [u8]) -> Result<usize, RaopError> {
        self.require_record()?;
        Ok(self.cipher.encrypt_packet(packet))
    }

    fn require_record(&self) -> Result<(), RaopError> {
        if self.state != RtspState::Record {
            return Err(RaopError::InvalidState {
                expected: RtspState::Record,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Runs a request that passes through `transient` and returns to `Record`.
    fn run_in_session<F>(&mut self, transient: RtspState, request: F) -> Result<(), RaopError>
    where
        F: FnOnce(&mut RtspContext<T>) -> Result<crate::rtsp::RtspResponse, RtspError>,
    {
        match request(&mut self.rtsp) {
            Ok(_) => {
                self.enter(transient);
                self.state = RtspState::Record;
                Ok(())
            }
            Err(e) => {
                let err = RaopError::from(e);
                self.abort(&err);
                Err(err)
            }
        }
    }

    fn run_handshake(&mut self) -> Result<HandshakeOutcome, RaopError> {
        let mut next = Some((RtspState::Connect, HeaderList::new()));
        while let Some((state, headers)) = next.take() {
            self.enter(state);
            next = self.on_state(state, &headers)?;
        }

        Ok(match (self.state, self.jack) {
            (RtspState::Record, Some(jack)) => HandshakeOutcome::Streaming(jack),
            _ => HandshakeOutcome::NotReady,
        })
    }

    /// Entry action of `state`. Returns the state acknowledged next, with the
    /// acknowledgement's headers.
    fn on_state(
        &mut self,
        state: RtspState,
        headers: &HeaderList,
    ) -> Result<Option<(RtspState, HeaderList)>, RaopError> {
        match state {
            RtspState::Connect => {
                let local_ip = self.rtsp.local_ip()?;
                self.rtsp.set_url(format!("rtsp://{}/{}", local_ip, self.sid));

                let key = STANDARD_NO_PAD.encode(self.cipher.wrapped_key()?);
                let iv = STANDARD_NO_PAD.encode(self.cipher.iv());
                let challenge = STANDARD_NO_PAD.encode(crypto::challenge());
                self.rtsp.add_header(HEADER_CHALLENGE, challenge);

                let sdp = session_description(&self.sid, local_ip, &self.host, &key, &iv);
                let response = self.rtsp.announce(&sdp)?;
                Ok(Some((RtspState::Announce, response.headers)))
            }
            RtspState::Announce => {
                self.rtsp.remove_header(HEADER_CHALLENGE);
                let response = self.rtsp.setup()?;
                Ok(Some((RtspState::Setup, response.headers)))
            }
            RtspState::Setup => match headers.get(HEADER_JACK_STATUS) {
                Some(value) => {
                    let jack = parse_jack_status(value);
                    log::debug!("[Raop] {}: jack {:?}", self.host, jack);
                    self.jack = Some(jack);
                    self.emitter.emit_session(SessionEvent::JackStatus {
                        host: self.host.clone(),
                        jack,
                        timestamp: now_millis(),
                    });
                    let response = self.rtsp.record()?;
                    Ok(Some((RtspState::Record, response.headers)))
                }
                None => {
                    log::error!("[Raop] {}: Audio-Jack-Status missing", self.host);
                    Ok(None)
                }
            },
            RtspState::Record => {
                log::info!("[Raop] {}: recording (session {})", self.host, self.sid);
                Ok(None)
            }
            RtspState::SetParameter | RtspState::Flush | RtspState::Teardown => Ok(None),
        }
    }

    fn enter(&mut self, state: RtspState) {
        self.state = state;
        self.emitter.emit_session(SessionEvent::StateChanged {
            host: self.host.clone(),
            state,
            timestamp: now_millis(),
        });
    }

    fn abort(&mut self, err: &RaopError) {
        log::warn!("[Raop] {}: session aborted in {}: {}", self.host, self.state, err);
        self.rtsp.close();
        self.emitter.emit_session(SessionEvent::Failed {
            host: self.host.clone(),
            code: err.code(),
            error: err.to_string(),
            timestamp: now_millis(),
        });
    }
}

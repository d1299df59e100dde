//! Minimal RTSP client used by the streaming handshake.

mod context;
mod headers;
mod message;
mod transport;

pub use context::{RtspContext, RtspError};
pub use headers::HeaderList;
pub use message::{RtspBody, RtspMethod, RtspRequest, RtspResponse, RTSP_VERSION};
pub use transport::{RtspTransport, TransportError};

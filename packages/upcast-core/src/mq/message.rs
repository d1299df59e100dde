//! Message envelopes carried by [`AsyncMsgQueue`](super::AsyncMsgQueue).

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// Opcode reserved for the shutdown sentinel.
///
/// Payload enums must never map a variant onto this value.
pub const SHUTDOWN_OPCODE: u32 = u32::MAX;

/// Numeric identity of a payload variant.
///
/// Payloads are closed enums, one per queue use-site, so the opcode is a
/// property of the variant rather than a free-standing integer that has to
/// agree with an untyped data pointer.
pub trait Opcode {
    /// Wire/log identity of this variant.
    fn opcode(&self) -> u32;

    /// Short human-readable name for logs.
    fn name(&self) -> &'static str;
}

/// The single capability a queue needs from the object a message targets.
///
/// Implementations run on the consuming context only. They take `&self`
/// because the same handler is shared by every message of a use-site;
/// state they mutate lives behind their own locks.
pub trait Handler: Send + Sync + 'static {
    /// Closed set of payloads this handler understands.
    type Payload: Opcode + Send + 'static;
    /// Value handed back to the sender through [`Pending`](super::Pending).
    type Reply: Send + 'static;

    /// Processes one message.
    fn process(&self, payload: Self::Payload, offset: i64, data: Option<Bytes>) -> Self::Reply;
}

/// A command or notification addressed to a handler.
pub struct Message<H: Handler> {
    handler: Arc<H>,
    payload: H::Payload,
    offset: i64,
    data: Option<Bytes>,
}

impl<H: Handler> Message<H> {
    pub(crate) fn new(handler: Arc<H>, payload: H::Payload, offset: i64, data: Option<Bytes>) -> Self {
        Self {
            handler,
            payload,
            offset,
            data,
        }
    }

    /// Opcode of the carried payload.
    pub fn opcode(&self) -> u32 {
        self.payload.opcode()
    }

    /// Name of the carried payload variant.
    pub fn name(&self) -> &'static str {
        self.payload.name()
    }

    /// Byte offset attached by the sender.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Raw data block attached by the sender, if any.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Borrow the payload without consuming the message.
    pub fn payload(&self) -> &H::Payload {
        &self.payload
    }

    /// Hands the payload to its handler and returns the handler's reply.
    pub fn dispatch(self) -> H::Reply {
        self.handler.process(self.payload, self.offset, self.data)
    }
}

impl<H: Handler> fmt::Debug for Message<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("opcode", &self.opcode())
            .field("name", &self.name())
            .field("offset", &self.offset)
            .field("data_len", &self.data.as_ref().map(Bytes::len))
            .finish()
    }
}

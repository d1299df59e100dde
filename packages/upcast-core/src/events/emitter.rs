//! Event emitter abstraction.
//!
//! Components depend on the [`EventEmitter`] trait rather than on a concrete
//! delivery mechanism, which keeps them testable and lets the embedding
//! application decide where events go.

use super::{DeviceEvent, SessionEvent, SinkEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct Discovery {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl Discovery {
///     fn on_removed(&self, udn: &str) {
///         self.emitter.emit_device(DeviceEvent::Removed { ... });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a discovery event.
    fn emit_device(&self, event: DeviceEvent);

    /// Emits a sink endpoint event.
    fn emit_sink(&self, event: SinkEvent);

    /// Emits a streaming session event.
    fn emit_session(&self, event: SessionEvent);
}

/// No-op emitter. Events are silently discarded.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_device(&self, _event: DeviceEvent) {}

    fn emit_sink(&self, _event: SinkEvent) {}

    fn emit_session(&self, _event: SessionEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level. Without a `tracing` subscriber the
/// records go to whatever `log` logger the application installed.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_device(&self, event: DeviceEvent) {
        tracing::debug!(?event, "device_event");
    }

    fn emit_sink(&self, event: SinkEvent) {
        tracing::debug!(?event, "sink_event");
    }

    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }
}

//! Per-renderer sink module.
//!
//! A sink binds one UPnP MediaRenderer (found by UDN) to a local volume/mute
//! endpoint. It runs two worker threads:
//!
//! - the **control thread** drives a [`MainLoop`](crate::mq::MainLoop) that
//!   owns the device's RenderingControl service: it answers volume/mute
//!   requests and turns LastChange notifications into messages for the owner
//! - the **audio thread** runs at realtime priority and answers the sink's
//!   own queue (latency, state changes)
//!
//! Everything the owner learns from either thread arrives as a message on a
//! shared notification queue, drained with
//! [`SinkModule::dispatch_pending`].

mod audio;
mod control;
mod last_change;
mod module;

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use thiserror::Error;

pub use audio::{AudioHandler, AudioMsg, AudioReply, SinkState};
pub use control::{
    ControlEndpoint, ControlError, ControlHandler, ControlMsg, ControlReply, LinkState,
    NotifyHandler, NotifyMsg,
};
pub use last_change::{parse_last_change, LastChangeData, LastChangeError};
pub use module::{SinkDeps, SinkModule, VALID_ARGS};

// ─────────────────────────────────────────────────────────────────────────────
// UPnP Collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// A UPnP action that the device rejected or that could not be delivered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("UPnP action failed: {0}")]
pub struct ActionError(pub String);

/// RenderingControl service of one device.
///
/// SOAP encoding and GENA subscriptions live behind this trait.
pub trait RenderingControl: Send + Sync {
    /// Invokes `action` with `inputs` and returns the requested `outputs`.
    fn send_action(
        &self,
        action: &str,
        inputs: &[(&str, String)],
        outputs: &[&str],
    ) -> Result<HashMap<String, String>, ActionError>;

    /// Subscribes to the `LastChange` state variable.
    ///
    /// Each value received is the raw notification body.
    fn subscribe_last_change(&self) -> Receiver<String>;
}

/// Handle to a discovered device.
pub trait DeviceProxy: Send + Sync {
    fn udn(&self) -> &str;

    fn friendly_name(&self) -> &str;

    /// The device's RenderingControl service, if it offers one.
    fn rendering_control(&self) -> Option<Arc<dyn RenderingControl>>;
}

/// Finds a specific device for a sink.
pub trait DeviceLocator: Send + Sync {
    /// Starts watching for the device `udn`.
    ///
    /// The receiver yields the proxy each time the device becomes available.
    fn watch(&self, udn: &str) -> Receiver<Arc<dyn DeviceProxy>>;
}

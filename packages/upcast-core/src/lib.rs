//! Upcast Core - control plane for UPnP/RAOP network sinks.
//!
//! The crate lets a realtime audio thread and slower per-device control
//! threads exchange commands and notifications, and drives the RAOP
//! handshake that authenticates and encrypts outbound audio.
//!
//! # Architecture
//!
//! - [`mq`]: cross-thread message queues and the cooperative loop that drains them
//! - [`registry`]: discovered renderers and the modules loaded for them
//! - [`discovery`]: turns renderer announcements into per-device modules
//! - [`sink`]: per-device volume/mute endpoint, control thread and audio thread
//! - [`rtsp`]: RTSP request/response codec and session context
//! - [`raop`]: the RAOP session client state machine
//! - [`crypto`]: AES-CBC stream cipher and RSA key wrapping
//! - [`props`]: reference-counted named-secret store
//! - [`volume`]: volume representation and conversions
//! - [`config`]: tunables and module argument parsing
//! - [`events`]: event system for observers
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! External collaborators are reached only through traits:
//!
//! - [`ModuleHost`](host::ModuleHost): loading and unloading modules
//! - [`DeviceBrowser`](discovery::DeviceBrowser): renderer announcements
//! - [`DeviceLocator`](sink::DeviceLocator) / [`DeviceProxy`](sink::DeviceProxy) /
//!   [`RenderingControl`](sink::RenderingControl): UPnP device access
//! - [`RtspTransport`](rtsp::RtspTransport): the socket beneath a session
//! - [`SchedulerAdapter`](mq::SchedulerAdapter): a foreign event loop
//! - [`EventEmitter`](events::EventEmitter): emitting domain events

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod events;
pub mod host;
pub mod mq;
pub mod props;
pub mod raop;
pub mod registry;
pub mod rtsp;
pub mod sink;
pub mod utils;
pub mod volume;

#[cfg(test)]
mod test_fixtures;

// Re-export commonly used types at the crate root
pub use config::{Config, ModuleArgs};
pub use error::{ErrorCode, UpcastError, UpcastResult};
pub use events::{
    DeviceEvent, EventEmitter, LoggingEventEmitter, NoopEventEmitter, SessionEvent, SinkEvent,
    UpcastEvent,
};
pub use host::{ModuleHost, ModuleIndex, NoopModuleHost};
pub use utils::{make_realtime, now_millis};
pub use volume::VolumeValue;

// Re-export messaging types
pub use mq::{AsyncMsgQueue, Handler, MainLoop, Opcode, SchedulerAdapter, ThreadMq};

// Re-export device-side types
pub use discovery::{DeviceBrowser, DiscoveryDeps, DiscoveryEvent, DiscoveryModule};
pub use registry::{DeviceRegistry, ManagedDevice};
pub use sink::{ControlEndpoint, DeviceLocator, DeviceProxy, RenderingControl, SinkDeps, SinkModule};

// Re-export streaming types
pub use crypto::CipherContext;
pub use props::{PropertyStore, SecretHandle};
pub use raop::{HandshakeOutcome, JackStatus, RaopClient, RtspState};
pub use rtsp::{RtspContext, RtspTransport};

//! Event system for observers of the control plane.
//!
//! This module provides:
//! - [`EventEmitter`] trait for components to report what happened
//! - Event types for device discovery, sink endpoints and streaming sessions
//!
//! Events are notifications only. Nothing in the core reacts to its own
//! events, so an emitter may drop them freely.

mod emitter;

pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::raop::{JackStatus, RtspState};

/// Every event the core emits, tagged by category.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum UpcastEvent {
    Device(DeviceEvent),
    Sink(SinkEvent),
    Session(SessionEvent),
}

/// Events from the discovery side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// A renderer appeared and its per-device module was loaded.
    Added {
        udn: String,
        #[serde(rename = "friendlyName")]
        friendly_name: String,
        #[serde(rename = "moduleIndex")]
        module_index: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A renderer appeared but its module could not be loaded.
    LoadFailed {
        udn: String,
        error: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A renderer went away and its module was asked to unload.
    Removed {
        udn: String,
        #[serde(rename = "moduleIndex")]
        module_index: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from a per-device sink endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SinkEvent {
    /// The device answered its initial queries and the endpoint is usable.
    Linked {
        udn: String,
        name: String,
        /// Volume in percent (0-100).
        volume: u8,
        muted: bool,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The device reported a new volume.
    VolumeChanged {
        udn: String,
        /// Volume in percent (0-100).
        volume: u8,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The device reported a new mute state.
    MuteChanged {
        udn: String,
        muted: bool,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The endpoint was unlinked during unload.
    Unlinked {
        udn: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from a streaming session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The handshake moved to a new state.
    StateChanged {
        host: String,
        state: RtspState,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The receiver reported its audio jack on SETUP.
    JackStatus {
        host: String,
        jack: JackStatus,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The session was aborted.
    Failed {
        host: String,
        code: &'static str,
        error: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_event_serializes_with_type_tag() {
        let event = DeviceEvent::Added {
            udn: "uuid:1".to_string(),
            friendly_name: "Kitchen".to_string(),
            module_index: 7,
            timestamp: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "added");
        assert_eq!(json["friendlyName"], "Kitchen");
        assert_eq!(json["moduleIndex"], 7);
    }

    #[test]
    fn wrapper_adds_category() {
        let event = UpcastEvent::Sink(SinkEvent::MuteChanged {
            udn: "uuid:1".to_string(),
            muted: true,
            timestamp: 0,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "sink");
        assert_eq!(json["type"], "muteChanged");
    }
}

//! Shared test doubles and payloads.
//!
//! Collaborators (transport, module host, UPnP proxies) are replaced by small
//! hand-written fakes that record what they were asked to do.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::events::{DeviceEvent, EventEmitter, SessionEvent, SinkEvent};
use crate::host::{ModuleError, ModuleHost, ModuleIndex};
use crate::rtsp::{HeaderList, RtspRequest, RtspResponse, RtspTransport, TransportError};
use crate::sink::{ActionError, DeviceLocator, DeviceProxy, RenderingControl};

// ─────────────────────────────────────────────────────────────────────────────
// RTSP
// ─────────────────────────────────────────────────────────────────────────────

/// `200 OK` carrying `headers`.
pub fn ok_response(headers: &[(&str, &str)]) -> RtspResponse {
    RtspResponse {
        code: 200,
        reason: "OK".to_string(),
        headers: headers.iter().copied().collect::<HeaderList>(),
        body: String::new(),
    }
}

/// Transport that replays scripted responses and records every request.
///
/// Clones share state, so a test can keep a handle after handing the
/// transport to a client.
#[derive(Clone)]
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<Result<RtspResponse, TransportError>>>>,
    requests: Arc<Mutex<Vec<RtspRequest>>>,
    connected_to: Arc<Mutex<Option<String>>>,
    closed: Arc<AtomicBool>,
    refuse: bool,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<RtspResponse, TransportError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
            connected_to: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            refuse: false,
        }
    }

    /// A transport whose `connect` always fails.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<RtspRequest>>> {
        Arc::clone(&self.requests)
    }

    pub fn connected_to(&self) -> Option<String> {
        self.connected_to.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl RtspTransport for ScriptedTransport {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        if self.refuse {
            return Err(TransportError::Connect {
                host: host.to_string(),
                port,
                reason: "connection refused".to_string(),
            });
        }
        *self.connected_to.lock() = Some(format!("{host}:{port}"));
        Ok(())
    }

    fn local_ip(&self) -> Result<IpAddr, TransportError> {
        if self.connected_to.lock().is_none() {
            return Err(TransportError::NotConnected);
        }
        Ok(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)))
    }

    fn exchange(&mut self, request: &RtspRequest) -> Result<RtspResponse, TransportError> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Io("script exhausted".to_string())))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Emitter that keeps every event.
#[derive(Default)]
pub struct RecordingEmitter {
    devices: Mutex<Vec<DeviceEvent>>,
    sinks: Mutex<Vec<SinkEvent>>,
    sessions: Mutex<Vec<SessionEvent>>,
}

impl RecordingEmitter {
    pub fn devices(&self) -> Vec<DeviceEvent> {
        self.devices.lock().clone()
    }

    pub fn sinks(&self) -> Vec<SinkEvent> {
        self.sinks.lock().clone()
    }

    pub fn sessions(&self) -> Vec<SessionEvent> {
        self.sessions.lock().clone()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit_device(&self, event: DeviceEvent) {
        self.devices.lock().push(event);
    }

    fn emit_sink(&self, event: SinkEvent) {
        self.sinks.lock().push(event);
    }

    fn emit_session(&self, event: SessionEvent) {
        self.sessions.lock().push(event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module Host
// ─────────────────────────────────────────────────────────────────────────────

/// Module host that records loads and unload requests.
#[derive(Default)]
pub struct RecordingHost {
    next: AtomicU32,
    loads: Mutex<Vec<(String, String)>>,
    unloads: Mutex<Vec<ModuleIndex>>,
    fail_for: Mutex<Vec<String>>,
}

impl RecordingHost {
    /// Makes every load whose arguments contain `needle` fail.
    pub fn fail_loads_matching(&self, needle: &str) {
        self.fail_for.lock().push(needle.to_string());
    }

    pub fn loads(&self) -> Vec<(String, String)> {
        self.loads.lock().clone()
    }

    pub fn unloads(&self) -> Vec<ModuleIndex> {
        self.unloads.lock().clone()
    }
}

impl ModuleHost for RecordingHost {
    fn load(&self, name: &str, args: &str) -> Result<ModuleIndex, ModuleError> {
        self.loads.lock().push((name.to_string(), args.to_string()));
        if self.fail_for.lock().iter().any(|n| args.contains(n.as_str())) {
            return Err(ModuleError::LoadFailed {
                name: name.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(ModuleIndex(self.next.fetch_add(1, Ordering::SeqCst)))
    }

    fn unload_request(&self, index: ModuleIndex) {
        self.unloads.lock().push(index);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UPnP Device Doubles
// ─────────────────────────────────────────────────────────────────────────────

/// Device with an optional fake RenderingControl service.
pub struct FakeDevice {
    udn: String,
    name: String,
    control: Option<Arc<FakeRenderingControl>>,
}

impl FakeDevice {
    pub fn new(udn: &str, name: &str, control: Option<Arc<FakeRenderingControl>>) -> Arc<Self> {
        Arc::new(Self {
            udn: udn.to_string(),
            name: name.to_string(),
            control,
        })
    }
}

impl DeviceProxy for FakeDevice {
    fn udn(&self) -> &str {
        &self.udn
    }

    fn friendly_name(&self) -> &str {
        &self.name
    }

    fn rendering_control(&self) -> Option<Arc<dyn RenderingControl>> {
        self.control
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn RenderingControl>)
    }
}

/// RenderingControl fake that answers from an in-memory state table.
pub struct FakeRenderingControl {
    volume: Mutex<u32>,
    muted: Mutex<bool>,
    actions: Mutex<Vec<(String, Vec<(String, String)>)>>,
    failing: Mutex<Option<String>>,
    last_change_tx: Sender<String>,
    last_change_rx: Receiver<String>,
}

impl FakeRenderingControl {
    pub fn new(volume_percent: u32, muted: bool) -> Arc<Self> {
        let (last_change_tx, last_change_rx) = unbounded();
        Arc::new(Self {
            volume: Mutex::new(volume_percent),
            muted: Mutex::new(muted),
            actions: Mutex::new(Vec::new()),
            failing: Mutex::new(None),
            last_change_tx,
            last_change_rx,
        })
    }

    /// Every action invoked, with its input arguments.
    pub fn actions(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.actions.lock().clone()
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions.lock().iter().map(|(a, _)| a.clone()).collect()
    }

    /// Makes every later invocation of `action` fail.
    pub fn fail_action(&self, action: &str) {
        *self.failing.lock() = Some(action.to_string());
    }

    /// Pushes a LastChange notification to subscribers.
    pub fn notify_last_change(&self, value: &str) {
        let _ = self.last_change_tx.send(value.to_string());
    }
}

impl RenderingControl for FakeRenderingControl {
    fn send_action(
        &self,
        action: &str,
        inputs: &[(&str, String)],
        outputs: &[&str],
    ) -> Result<HashMap<String, String>, ActionError> {
        self.actions.lock().push((
            action.to_string(),
            inputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        ));

        if self.failing.lock().as_deref() == Some(action) {
            return Err(ActionError(format!("{action} rejected by device")));
        }

        let input = |name: &str| {
            inputs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
        };

        match action {
            "SetVolume" => {
                if let Some(v) = input("DesiredVolume").and_then(|v| v.parse().ok()) {
                    *self.volume.lock() = v;
                }
            }
            "SetMute" => {
                if let Some(m) = input("DesiredMute") {
                    *self.muted.lock() = m == "1" || m == "true";
                }
            }
            "GetVolume" | "GetMute" => {}
            other => return Err(ActionError(format!("unsupported action {other}"))),
        }

        let mut out = HashMap::new();
        for name in outputs {
            match *name {
                "CurrentVolume" => {
                    out.insert(name.to_string(), self.volume.lock().to_string());
                }
                "CurrentMute" => {
                    let muted = if *self.muted.lock() { "1" } else { "0" };
                    out.insert(name.to_string(), muted.to_string());
                }
                _ => {}
            }
        }
        Ok(out)
    }

    fn subscribe_last_change(&self) -> Receiver<String> {
        self.last_change_rx.clone()
    }
}

/// Locator that hands devices to whoever watches their UDN.
///
/// Devices announced before anyone watches are delivered on `watch`.
#[derive(Default)]
pub struct FakeLocator {
    watchers: Mutex<HashMap<String, Sender<Arc<dyn DeviceProxy>>>>,
    early: Mutex<Vec<Arc<dyn DeviceProxy>>>,
    watched: Mutex<Vec<String>>,
}

impl FakeLocator {
    pub fn announce(&self, proxy: Arc<dyn DeviceProxy>) {
        match self.watchers.lock().get(proxy.udn()) {
            Some(tx) => {
                let _ = tx.send(proxy);
            }
            None => self.early.lock().push(proxy),
        }
    }

    pub fn watched(&self) -> Vec<String> {
        self.watched.lock().clone()
    }
}

impl DeviceLocator for FakeLocator {
    fn watch(&self, udn: &str) -> Receiver<Arc<dyn DeviceProxy>> {
        let (tx, rx) = unbounded();
        self.early.lock().retain(|proxy| {
            if proxy.udn() == udn {
                let _ = tx.send(Arc::clone(proxy));
                false
            } else {
                true
            }
        });
        self.watchers.lock().insert(udn.to_string(), tx);
        self.watched.lock().push(udn.to_string());
        rx
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LastChange Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// LastChange value with volume and mute on the Master channel.
pub const LAST_CHANGE_FULL: &str = r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/">
  <InstanceID val="0">
    <Volume channel="Master" val="42"/>
    <Volume channel="LF" val="100"/>
    <Mute channel="Master" val="0"/>
  </InstanceID>
</Event>"#;

/// LastChange value reporting mute only.
pub const LAST_CHANGE_MUTED: &str = r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/">
  <InstanceID val="0">
    <Mute channel="Master" val="1"/>
  </InstanceID>
</Event>"#;

/// Full NOTIFY body wrapping an escaped LastChange value.
pub const RENDERING_CONTROL_NOTIFY: &str = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property>
    <LastChange>&lt;Event xmlns=&quot;urn:schemas-upnp-org:metadata-1-0/RCS/&quot;&gt;
      &lt;InstanceID val=&quot;0&quot;&gt;
        &lt;Volume channel=&quot;Master&quot; val=&quot;75&quot;/&gt;
        &lt;Mute channel=&quot;Master&quot; val=&quot;1&quot;/&gt;
      &lt;/InstanceID&gt;
    &lt;/Event&gt;</LastChange>
  </e:property>
</e:propertyset>"#;

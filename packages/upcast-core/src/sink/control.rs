//! Volume/mute relay between the owner and a device's control thread.
//!
//! Requests flow owner → control thread as [`ControlMsg`] on the control
//! queue and are answered synchronously. Notifications flow the other way as
//! [`NotifyMsg`] and are applied by the owner when it drains its queue.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Select, TryRecvError};
use parking_lot::Mutex;
use thiserror::Error;

use super::last_change::{parse_bool, parse_last_change};
use super::{ActionError, DeviceProxy, RenderingControl};
use crate::config::RENDERING_CONTROL_URN;
use crate::error::ErrorCode;
use crate::events::{EventEmitter, SinkEvent};
use crate::host::{ModuleError, ModuleHost, ModuleIndex};
use crate::mq::{Handler, LoopHandle, Opcode, QueueError, QueueSender, Source};
use crate::utils::now_millis;
use crate::volume::VolumeValue;

/// Errors from a relayed volume/mute operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("no RenderingControl service bound")]
    Unbound,

    #[error("action response lacks a valid {field}: {value:?}")]
    BadResponse {
        field: &'static str,
        value: Option<String>,
    },

    #[error("unexpected reply {0}")]
    UnexpectedReply(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests (owner → control thread)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ControlMsg {
    SetVolume(VolumeValue),
    GetVolume,
    SetMute(bool),
    GetMute,
}

impl Opcode for ControlMsg {
    fn opcode(&self) -> u32 {
        match self {
            Self::SetVolume(_) => 0,
            Self::GetVolume => 1,
            Self::SetMute(_) => 2,
            Self::GetMute => 3,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::SetVolume(_) => "set-volume",
            Self::GetVolume => "get-volume",
            Self::SetMute(_) => "set-mute",
            Self::GetMute => "get-mute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    Done,
    Volume(VolumeValue),
    Muted(bool),
}

fn instance_args() -> Vec<(&'static str, String)> {
    vec![
        ("InstanceID", "0".to_string()),
        ("Channel", "Master".to_string()),
    ]
}

fn query_volume(service: &dyn RenderingControl) -> Result<VolumeValue, ControlError> {
    let out = service.send_action("GetVolume", &instance_args(), &["CurrentVolume"])?;
    let raw = out.get("CurrentVolume");
    raw.and_then(|v| v.trim().parse::<u32>().ok())
        .map(VolumeValue::from_percent)
        .ok_or_else(|| ControlError::BadResponse {
            field: "CurrentVolume",
            value: raw.cloned(),
        })
}

fn query_muted(service: &dyn RenderingControl, action: &str) -> Result<bool, ControlError> {
    let out = service.send_action(action, &instance_args(), &["CurrentMute"])?;
    let raw = out.get("CurrentMute");
    raw.and_then(|v| parse_bool(v))
        .ok_or_else(|| ControlError::BadResponse {
            field: "CurrentMute",
            value: raw.cloned(),
        })
}

/// Control-thread side of a sink. Owns the bound RenderingControl service.
pub struct ControlHandler {
    udn: String,
    service: Mutex<Option<Arc<dyn RenderingControl>>>,
    notify: QueueSender<NotifyHandler>,
    notify_handler: Arc<NotifyHandler>,
}

impl ControlHandler {
    pub fn new(
        udn: impl Into<String>,
        notify: QueueSender<NotifyHandler>,
        notify_handler: Arc<NotifyHandler>,
    ) -> Self {
        Self {
            udn: udn.into(),
            service: Mutex::new(None),
            notify,
            notify_handler,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.service.lock().is_some()
    }

    /// Binds the device's RenderingControl service and reports the initial
    /// volume and mute state to the owner.
    ///
    /// Returns the LastChange subscription on success. A device without the
    /// service, or one that fails the initial queries, is reported to the
    /// owner as an initialisation failure.
    pub fn device_available(&self, proxy: Arc<dyn DeviceProxy>) -> Option<Receiver<String>> {
        if self.is_bound() {
            log::debug!("[Sink] {}: device announced again, keeping binding", self.udn);
            return None;
        }

        let Some(service) = proxy.rendering_control() else {
            log::error!(
                "[Sink] Device with udn {} does not have a rendering control service",
                self.udn
            );
            self.post(NotifyMsg::InitFailed(ModuleError::ServiceMissing {
                udn: self.udn.clone(),
                service: RENDERING_CONTROL_URN.to_string(),
            }));
            return None;
        };

        let initial = query_volume(service.as_ref())
            .and_then(|volume| Ok((volume, query_muted(service.as_ref(), "GetMute")?)));
        let (volume, muted) = match initial {
            Ok(state) => state,
            Err(e) => {
                log::error!("[Sink] {}: initial volume query failed: {e}", self.udn);
                self.post(NotifyMsg::InitFailed(ModuleError::InitFailed {
                    udn: self.udn.clone(),
                    reason: e.to_string(),
                }));
                return None;
            }
        };

        let subscription = service.subscribe_last_change();
        *self.service.lock() = Some(service);

        log::info!(
            "[Sink] {} bound ({}, volume {}%, muted {})",
            self.udn,
            proxy.friendly_name(),
            volume.to_percent(),
            muted
        );
        self.post(NotifyMsg::ContextAvailable {
            name: proxy.friendly_name().to_string(),
            volume,
            muted,
        });
        Some(subscription)
    }

    /// Relays a LastChange notification to the owner.
    ///
    /// Unparseable events are logged and dropped.
    pub fn last_change(&self, body: &str) {
        let data = match parse_last_change(body) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("[Sink] {}: {e}", self.udn);
                return;
            }
        };

        if let Some(percent) = data.volume {
            self.post(NotifyMsg::VolumeChanged(VolumeValue::from_percent(percent)));
        }
        if let Some(muted) = data.muted {
            self.post(NotifyMsg::MuteChanged(muted));
        }
    }

    fn service(&self) -> Result<Arc<dyn RenderingControl>, ControlError> {
        self.service.lock().clone().ok_or(ControlError::Unbound)
    }

    fn post(&self, msg: NotifyMsg) {
        if let Err(e) = self.notify.post(&self.notify_handler, msg, 0, None) {
            log::warn!("[Sink] {}: notification lost: {e}", self.udn);
        }
    }
}

impl Handler for ControlHandler {
    type Payload = ControlMsg;
    type Reply = Result<ControlReply, ControlError>;

    fn process(&self, payload: ControlMsg, _offset: i64, _data: Option<Bytes>) -> Self::Reply {
        let service = self.service()?;
        match payload {
            ControlMsg::SetVolume(volume) => {
                let mut inputs = instance_args();
                inputs.push(("DesiredVolume", volume.to_percent().to_string()));
                service.send_action("SetVolume", &inputs, &[])?;
                Ok(ControlReply::Done)
            }
            ControlMsg::GetVolume => query_volume(service.as_ref()).map(ControlReply::Volume),
            ControlMsg::SetMute(muted) => {
                let mut inputs = instance_args();
                inputs.push(("DesiredMute", if muted { "1" } else { "0" }.to_string()));
                service.send_action("SetMute", &inputs, &[])?;
                Ok(ControlReply::Done)
            }
            // Known divergence: the relay invokes SetMute, not GetMute.
            ControlMsg::GetMute => query_muted(service.as_ref(), "SetMute").map(ControlReply::Muted),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device Source
// ─────────────────────────────────────────────────────────────────────────────

enum ControlEvent {
    Available(Arc<dyn DeviceProxy>),
    LastChange(String),
}

/// Loop source feeding device availability and LastChange notifications
/// into a [`ControlHandler`] on the control thread.
pub(crate) struct DeviceSource {
    handler: Arc<ControlHandler>,
    devices: Option<Receiver<Arc<dyn DeviceProxy>>>,
    last_change: Option<Receiver<String>>,
    pending: VecDeque<ControlEvent>,
}

impl DeviceSource {
    pub(crate) fn new(
        handler: Arc<ControlHandler>,
        devices: Receiver<Arc<dyn DeviceProxy>>,
    ) -> Self {
        Self {
            handler,
            devices: Some(devices),
            last_change: None,
            pending: VecDeque::new(),
        }
    }

    fn fill(&mut self) {
        if let Some(proxy) = poll_slot(&mut self.devices, "device watch") {
            self.pending.push_back(ControlEvent::Available(proxy));
        }
        if let Some(body) = poll_slot(&mut self.last_change, "LastChange subscription") {
            self.pending.push_back(ControlEvent::LastChange(body));
        }
    }
}

fn poll_slot<T>(slot: &mut Option<Receiver<T>>, what: &str) -> Option<T> {
    let rx = slot.as_ref()?;
    match rx.try_recv() {
        Ok(value) => Some(value),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => {
            log::debug!("[Sink] {what} closed");
            *slot = None;
            None
        }
    }
}

impl Source for DeviceSource {
    fn name(&self) -> &str {
        "device"
    }

    fn prepare(&mut self, _handle: &LoopHandle) -> bool {
        self.fill();
        !self.pending.is_empty()
    }

    fn check(&mut self) -> bool {
        self.fill();
        !self.pending.is_empty()
    }

    fn dispatch(&mut self, _handle: &LoopHandle) {
        match self.pending.pop_front() {
            Some(ControlEvent::Available(proxy)) => {
                if let Some(subscription) = self.handler.device_available(proxy) {
                    self.last_change = Some(subscription);
                }
            }
            Some(ControlEvent::LastChange(body)) => self.handler.last_change(&body),
            None => {}
        }
    }

    fn register<'a>(&'a self, select: &mut Select<'a>) -> Option<usize> {
        let devices = self.devices.as_ref().map(|rx| select.recv(rx));
        let last_change = self.last_change.as_ref().map(|rx| select.recv(rx));
        devices.or(last_change)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifications (worker threads → owner)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum NotifyMsg {
    /// The device answered its initial queries.
    ContextAvailable {
        name: String,
        volume: VolumeValue,
        muted: bool,
    },
    /// Out-of-band volume change reported by the device.
    VolumeChanged(VolumeValue),
    /// Out-of-band mute change reported by the device.
    MuteChanged(bool),
    /// The device could not be bound.
    InitFailed(ModuleError),
    /// The audio thread failed and wants the module unloaded.
    UnloadRequested,
}

impl Opcode for NotifyMsg {
    fn opcode(&self) -> u32 {
        match self {
            Self::ContextAvailable { .. } => 0,
            Self::VolumeChanged(_) => 1,
            Self::MuteChanged(_) => 2,
            Self::InitFailed(_) => 3,
            Self::UnloadRequested => 4,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ContextAvailable { .. } => "context-available",
            Self::VolumeChanged(_) => "volume-changed",
            Self::MuteChanged(_) => "mute-changed",
            Self::InitFailed(_) => "init-failed",
            Self::UnloadRequested => "unload-requested",
        }
    }
}

/// Lifecycle of a sink endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting for the device.
    Init,
    Linked,
    /// The device could not be bound.
    Failed,
    Unlinked,
}

#[derive(Debug)]
struct EndpointState {
    link: LinkState,
    name: Option<String>,
    volume: VolumeValue,
    muted: bool,
}

/// Owner-side handler for [`NotifyMsg`].
///
/// Changes reported by the device are applied to the local state only; this
/// handler has no path back to the control queue.
pub struct NotifyHandler {
    udn: String,
    index: ModuleIndex,
    state: Arc<Mutex<EndpointState>>,
    host: Arc<dyn ModuleHost>,
    emitter: Arc<dyn EventEmitter>,
}

impl NotifyHandler {
    pub fn new(
        udn: impl Into<String>,
        index: ModuleIndex,
        host: Arc<dyn ModuleHost>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            udn: udn.into(),
            index,
            state: Arc::new(Mutex::new(EndpointState {
                link: LinkState::Init,
                name: None,
                volume: VolumeValue::default(),
                muted: false,
            })),
            host,
            emitter,
        }
    }
}

impl Handler for NotifyHandler {
    type Payload = NotifyMsg;
    type Reply = ();

    fn process(&self, payload: NotifyMsg, _offset: i64, _data: Option<Bytes>) {
        let mut state = self.state.lock();
        match payload {
            NotifyMsg::ContextAvailable { name, volume, muted } => {
                if state.link != LinkState::Init {
                    log::debug!("[Sink] {}: late context ignored ({:?})", self.udn, state.link);
                    return;
                }
                state.link = LinkState::Linked;
                state.name = Some(name.clone());
                state.volume = volume;
                state.muted = muted;
                drop(state);

                self.emitter.emit_sink(SinkEvent::Linked {
                    udn: self.udn.clone(),
                    name,
                    volume: volume.to_percent(),
                    muted,
                    timestamp: now_millis(),
                });
            }
            NotifyMsg::VolumeChanged(volume) => {
                if state.link != LinkState::Linked {
                    return;
                }
                state.volume = volume;
                drop(state);

                self.emitter.emit_sink(SinkEvent::VolumeChanged {
                    udn: self.udn.clone(),
                    volume: volume.to_percent(),
                    timestamp: now_millis(),
                });
            }
            NotifyMsg::MuteChanged(muted) => {
                if state.link != LinkState::Linked {
                    return;
                }
                state.muted = muted;
                drop(state);

                self.emitter.emit_sink(SinkEvent::MuteChanged {
                    udn: self.udn.clone(),
                    muted,
                    timestamp: now_millis(),
                });
            }
            NotifyMsg::InitFailed(err) => {
                state.link = LinkState::Failed;
                drop(state);
                log::error!("[Sink] {}: initialisation failed ({}): {err}", self.udn, err.code());
                self.host.unload_request(self.index);
            }
            NotifyMsg::UnloadRequested => {
                drop(state);
                log::warn!("[Sink] {}: audio thread failed, unloading {}", self.udn, self.index);
                self.host.unload_request(self.index);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Control Endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Owner-facing volume/mute controls of one sink.
///
/// Every operation is a round trip to the control thread. While the endpoint
/// is not linked each operation is a silent no-op.
pub struct ControlEndpoint {
    udn: String,
    queue: QueueSender<ControlHandler>,
    handler: Arc<ControlHandler>,
    state: Arc<Mutex<EndpointState>>,
    emitter: Arc<dyn EventEmitter>,
}

impl ControlEndpoint {
    pub fn new(
        udn: impl Into<String>,
        queue: QueueSender<ControlHandler>,
        handler: Arc<ControlHandler>,
        notify: &NotifyHandler,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            udn: udn.into(),
            queue,
            handler,
            state: Arc::clone(&notify.state),
            emitter,
        }
    }

    pub fn udn(&self) -> &str {
        &self.udn
    }

    pub fn link_state(&self) -> LinkState {
        self.state.lock().link
    }

    pub fn is_linked(&self) -> bool {
        self.link_state() == LinkState::Linked
    }

    /// Friendly name of the bound device.
    pub fn name(&self) -> Option<String> {
        self.state.lock().name.clone()
    }

    /// Last volume known to the owner.
    pub fn volume(&self) -> VolumeValue {
        self.state.lock().volume
    }

    /// Last mute state known to the owner.
    pub fn muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn set_volume(&self, volume: VolumeValue) -> Result<(), ControlError> {
        if !self.is_linked() {
            return Ok(());
        }
        self.relay(ControlMsg::SetVolume(volume))?;
        self.state.lock().volume = volume;
        Ok(())
    }

    /// Reads the device volume. `None` while not linked.
    pub fn get_volume(&self) -> Result<Option<VolumeValue>, ControlError> {
        if !self.is_linked() {
            return Ok(None);
        }
        match self.relay(ControlMsg::GetVolume)? {
            ControlReply::Volume(volume) => {
                self.state.lock().volume = volume;
                Ok(Some(volume))
            }
            other => Err(ControlError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub fn set_mute(&self, muted: bool) -> Result<(), ControlError> {
        if !self.is_linked() {
            return Ok(());
        }
        self.relay(ControlMsg::SetMute(muted))?;
        self.state.lock().muted = muted;
        Ok(())
    }

    /// Reads the device mute state. `None` while not linked.
    pub fn get_mute(&self) -> Result<Option<bool>, ControlError> {
        if !self.is_linked() {
            return Ok(None);
        }
        match self.relay(ControlMsg::GetMute)? {
            ControlReply::Muted(muted) => {
                self.state.lock().muted = muted;
                Ok(Some(muted))
            }
            other => Err(ControlError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Takes the endpoint out of service. Returns whether it was linked.
    pub fn unlink(&self) -> bool {
        let was_linked = {
            let mut state = self.state.lock();
            let was_linked = state.link == LinkState::Linked;
            state.link = LinkState::Unlinked;
            was_linked
        };
        if was_linked {
            self.emitter.emit_sink(SinkEvent::Unlinked {
                udn: self.udn.clone(),
                timestamp: now_millis(),
            });
        }
        was_linked
    }

    fn relay(&self, msg: ControlMsg) -> Result<ControlReply, ControlError> {
        log::trace!("[Sink] {}: relay {}", self.udn, msg.name());
        self.queue.call(&self.handler, msg, 0, None)?
    }
}

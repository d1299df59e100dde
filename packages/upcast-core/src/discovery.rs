//! Discovery-side module: turns renderer announcements into sink modules.
//!
//! A control thread runs the discovery collaborator's event stream on its
//! own [`MainLoop`] and relays every announcement to the owner over the
//! `out` queue. The owner, when it drains that queue, loads one sink module
//! per renderer through the [`ModuleHost`] and keeps track of them in a
//! [`DeviceRegistry`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::config::{Config, ModuleArgs};
use crate::events::{DeviceEvent, EventEmitter};
use crate::host::{ModuleError, ModuleHost};
use crate::mq::{
    ChannelSource, Handler, MainLoop, Opcode, QueueError, QueueReceiver, QueueSender, Received,
    SchedulerAdapter, ThreadMq,
};
use crate::registry::{DeviceId, DeviceRegistry, ManagedDevice};
use crate::sink::DeviceProxy;
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Collaborator Interface
// ─────────────────────────────────────────────────────────────────────────────

/// A renderer appearing or going away.
#[derive(Clone)]
pub enum DiscoveryEvent {
    Available(Arc<dyn DeviceProxy>),
    Unavailable(Arc<dyn DeviceProxy>),
}

impl std::fmt::Debug for DiscoveryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(p) => f.debug_tuple("Available").field(&p.udn()).finish(),
            Self::Unavailable(p) => f.debug_tuple("Unavailable").field(&p.udn()).finish(),
        }
    }
}

/// Source of renderer announcements (SSDP lives behind this).
pub trait DeviceBrowser: Send + Sync {
    /// Starts browsing for devices of `device_type`.
    fn browse(&self, device_type: &str) -> Receiver<DiscoveryEvent>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Commands for the control thread. There are none; its `in` queue only
/// ever carries the shutdown sentinel.
#[derive(Debug)]
pub enum BrowseCommand {}

impl Opcode for BrowseCommand {
    fn opcode(&self) -> u32 {
        match *self {}
    }

    fn name(&self) -> &'static str {
        match *self {}
    }
}

/// Control-thread handler.
#[derive(Debug, Default)]
pub struct BrowseHandler;

impl Handler for BrowseHandler {
    type Payload = BrowseCommand;
    type Reply = ();

    fn process(&self, payload: BrowseCommand, _offset: i64, _data: Option<Bytes>) {
        match payload {}
    }
}

/// Announcements relayed to the owner.
pub enum DiscoverMsg {
    Available(Arc<dyn DeviceProxy>),
    Unavailable(Arc<dyn DeviceProxy>),
}

impl From<DiscoveryEvent> for DiscoverMsg {
    fn from(event: DiscoveryEvent) -> Self {
        match event {
            DiscoveryEvent::Available(proxy) => Self::Available(proxy),
            DiscoveryEvent::Unavailable(proxy) => Self::Unavailable(proxy),
        }
    }
}

impl Opcode for DiscoverMsg {
    fn opcode(&self) -> u32 {
        match self {
            Self::Available(_) => 0,
            Self::Unavailable(_) => 1,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Available(_) => "available",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// Owner-side handler. Holds the registry.
pub struct DiscoverHandler {
    module_name: String,
    host: Arc<dyn ModuleHost>,
    registry: Mutex<DeviceRegistry>,
    emitter: Arc<dyn EventEmitter>,
}

impl DiscoverHandler {
    pub fn new(
        module_name: impl Into<String>,
        host: Arc<dyn ModuleHost>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            registry: Mutex::new(DeviceRegistry::new(Arc::clone(&host))),
            host,
            emitter,
        }
    }

    fn available(&self, proxy: Arc<dyn DeviceProxy>) {
        let udn = proxy.udn().to_string();
        let mut registry = self.registry.lock();
        if registry.contains(&udn) {
            log::warn!("[Discover] {udn} announced twice; keeping existing module");
            return;
        }

        let args = format!("udn={udn}");
        log::debug!("[Discover] Loading {} with arguments '{}'", self.module_name, args);

        let index = match self.host.load(&self.module_name, &args) {
            Ok(index) => index,
            Err(e) => {
                log::error!(
                    "[Discover] Unable to load module {} with arguments '{}': {e}",
                    self.module_name,
                    args
                );
                self.emitter.emit_device(DeviceEvent::LoadFailed {
                    udn,
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
                return;
            }
        };

        let friendly_name = proxy.friendly_name().to_string();
        if let Err(e) = registry.add(ManagedDevice::new(proxy, index)) {
            log::error!("[Discover] {e}");
            self.host.unload_request(index);
            return;
        }
        drop(registry);

        self.emitter.emit_device(DeviceEvent::Added {
            udn,
            friendly_name,
            module_index: index.0,
            timestamp: now_millis(),
        });
    }

    fn unavailable(&self, proxy: Arc<dyn DeviceProxy>) {
        let udn = proxy.udn();
        let Some(index) = self.registry.lock().remove(udn) else {
            return;
        };
        log::debug!("[Discover] object {udn} has been removed (module index {index})");
        self.emitter.emit_device(DeviceEvent::Removed {
            udn: udn.to_string(),
            module_index: index.0,
            timestamp: now_millis(),
        });
    }
}

impl Handler for DiscoverHandler {
    type Payload = DiscoverMsg;
    type Reply = ();

    fn process(&self, payload: DiscoverMsg, _offset: i64, _data: Option<Bytes>) {
        match payload {
            DiscoverMsg::Available(proxy) => self.available(proxy),
            DiscoverMsg::Unavailable(proxy) => self.unavailable(proxy),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module
// ─────────────────────────────────────────────────────────────────────────────

/// Collaborators discovery is loaded with.
pub struct DiscoveryDeps {
    pub config: Config,
    pub browser: Arc<dyn DeviceBrowser>,
    pub host: Arc<dyn ModuleHost>,
    pub emitter: Arc<dyn EventEmitter>,
}

/// The loaded discovery module.
pub struct DiscoveryModule {
    handler: Arc<DiscoverHandler>,
    inq: QueueSender<BrowseHandler>,
    outq: QueueSender<DiscoverHandler>,
    events: QueueReceiver<DiscoverHandler>,
    thread: Option<JoinHandle<()>>,
}

impl DiscoveryModule {
    /// Starts browsing for MediaRenderers. Takes no arguments.
    pub fn load(args: &str, deps: DiscoveryDeps) -> Result<Self, ModuleError> {
        ModuleArgs::parse(args, &[]).map_err(|e| {
            log::error!("[Discover] Failed to parse module arguments: {e}");
            e
        })?;
        deps.config.validate()?;

        let handler = Arc::new(DiscoverHandler::new(
            deps.config.device_module_name.clone(),
            deps.host,
            deps.emitter,
        ));

        let mut mq: ThreadMq<BrowseHandler, DiscoverHandler> = ThreadMq::new("upnp-discover");
        let commands = mq.take_in_consumer();
        let events = mq.take_out_consumer();

        let announcements = deps.browser.browse(&deps.config.media_renderer_urn);
        let relay = mq.outq.clone();
        let relay_handler = Arc::clone(&handler);
        let thread = thread::Builder::new()
            .name("upnp-discover".to_string())
            .spawn(move || {
                let mut main_loop = MainLoop::new("upnp-discover");
                main_loop.register(commands);
                main_loop.add_source(Box::new(ChannelSource::new(
                    "announcements",
                    announcements,
                    move |event: DiscoveryEvent| {
                        log::trace!("[Discover] {event:?}");
                        if let Err(e) = relay.post(&relay_handler, event.into(), 0, None) {
                            log::warn!("[Discover] announcement lost: {e}");
                        }
                    },
                )));
                main_loop.run();
            })?;

        Ok(Self {
            handler,
            inq: mq.inq.clone(),
            outq: mq.outq.clone(),
            events,
            thread: Some(thread),
        })
    }

    /// Processes every relayed announcement. Returns how many were handled.
    pub fn dispatch_pending(&mut self) -> Result<usize, QueueError> {
        let mut count = 0;
        while let Some(received) = self.events.try_receive()? {
            self.handle(received);
            count += 1;
        }
        Ok(count)
    }

    /// Blocks until one announcement arrives and processes it.
    pub fn dispatch_blocking(&mut self) -> Result<(), QueueError> {
        let received = self.events.receive_blocking()?;
        self.handle(received);
        Ok(())
    }

    pub fn device_count(&self) -> usize {
        self.handler.registry.lock().len()
    }

    pub fn identities(&self) -> Vec<DeviceId> {
        self.handler.registry.lock().identities()
    }

    /// Stops browsing and tears down every managed device.
    ///
    /// Returns the number of devices torn down.
    pub fn unload(mut self) -> usize {
        self.shutdown()
    }

    fn handle(&mut self, received: Received<DiscoverHandler>) {
        match received {
            Received::Message(message) => {
                message.dispatch();
                self.events.complete(());
            }
            Received::Shutdown => self.events.dispose(),
        }
    }

    fn shutdown(&mut self) -> usize {
        let Some(thread) = self.thread.take() else {
            return 0;
        };

        match self.inq.send_shutdown() {
            Ok(ack) => {
                if let Err(e) = ack.wait() {
                    log::warn!("[Discover] {e}");
                }
            }
            Err(e) => log::warn!("[Discover] {e}"),
        }
        if thread.join().is_err() {
            log::error!("[Discover] control thread panicked");
        }

        self.close_events();

        let removed = self.handler.registry.lock().drain_all();
        log::info!("[Discover] unloaded, {removed} device(s) torn down");
        removed
    }

    /// Drops announcements nobody processed, then disposes the `out` queue.
    fn close_events(&mut self) {
        if self.events.is_disposed() {
            return;
        }
        let ack = match self.outq.send_shutdown() {
            Ok(ack) => ack,
            Err(e) => {
                log::warn!("[Discover] {e}");
                return;
            }
        };
        loop {
            match self.events.try_receive() {
                Ok(Some(Received::Message(message))) => {
                    log::debug!("[Discover] dropping undelivered {}", message.name());
                    self.events.complete(());
                }
                Ok(Some(Received::Shutdown)) => {
                    self.events.dispose();
                    break;
                }
                Ok(None) | Err(_) => break,
            }
        }
        let _ = ack.wait();
    }
}

impl Drop for DiscoveryModule {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::host::ModuleIndex;
    use crate::test_fixtures::{FakeDevice, RecordingEmitter, RecordingHost};
    use crossbeam_channel::{unbounded, Sender};

    struct FakeBrowser {
        tx: Sender<DiscoveryEvent>,
        rx: Receiver<DiscoveryEvent>,
        browsed: Mutex<Vec<String>>,
    }

    impl Default for FakeBrowser {
        fn default() -> Self {
            let (tx, rx) = unbounded();
            Self {
                tx,
                rx,
                browsed: Mutex::new(Vec::new()),
            }
        }
    }

    impl FakeBrowser {
        fn emit(&self, event: DiscoveryEvent) {
            self.tx.send(event).unwrap();
        }
    }

    impl DeviceBrowser for FakeBrowser {
        fn browse(&self, device_type: &str) -> Receiver<DiscoveryEvent> {
            self.browsed.lock().push(device_type.to_string());
            self.rx.clone()
        }
    }

    struct Harness {
        browser: Arc<FakeBrowser>,
        host: Arc<RecordingHost>,
        emitter: Arc<RecordingEmitter>,
    }

    fn harness() -> Harness {
        Harness {
            browser: Arc::new(FakeBrowser::default()),
            host: Arc::new(RecordingHost::default()),
            emitter: Arc::new(RecordingEmitter::default()),
        }
    }

    impl Harness {
        fn load(&self) -> DiscoveryModule {
            DiscoveryModule::load(
                "",
                DiscoveryDeps {
                    config: Config::default(),
                    browser: self.browser.clone(),
                    host: self.host.clone(),
                    emitter: self.emitter.clone(),
                },
            )
            .unwrap()
        }
    }

    #[test]
    fn available_then_unavailable_round_trip() {
        let h = harness();
        let mut discovery = h.load();
        assert_eq!(
            *h.browser.browsed.lock(),
            vec!["urn:schemas-upnp-org:device:MediaRenderer:1"]
        );

        let x = FakeDevice::new("uuid:x", "Speaker X", None);
        h.browser.emit(DiscoveryEvent::Available(x.clone()));
        discovery.dispatch_blocking().unwrap();

        assert_eq!(discovery.identities(), vec!["uuid:x"]);
        assert_eq!(
            h.host.loads(),
            vec![("module-upnp-sink".to_string(), "udn=uuid:x".to_string())]
        );

        h.browser.emit(DiscoveryEvent::Unavailable(x));
        discovery.dispatch_blocking().unwrap();

        assert_eq!(discovery.device_count(), 0);
        assert_eq!(h.host.unloads(), vec![ModuleIndex(0)]);
        assert!(matches!(
            h.emitter.devices().as_slice(),
            [DeviceEvent::Added { .. }, DeviceEvent::Removed { module_index: 0, .. }]
        ));

        assert_eq!(discovery.unload(), 0);
        assert_eq!(h.host.unloads().len(), 1);
    }

    #[test]
    fn failed_load_is_skipped() {
        let h = harness();
        h.host.fail_loads_matching("uuid:broken");
        let mut discovery = h.load();

        h.browser.emit(DiscoveryEvent::Available(FakeDevice::new(
            "uuid:broken",
            "Broken",
            None,
        )));
        h.browser.emit(DiscoveryEvent::Available(FakeDevice::new(
            "uuid:ok", "Fine", None,
        )));
        discovery.dispatch_blocking().unwrap();
        discovery.dispatch_blocking().unwrap();

        assert_eq!(discovery.identities(), vec!["uuid:ok"]);
        assert!(matches!(
            h.emitter.devices().first(),
            Some(DeviceEvent::LoadFailed { udn, .. }) if udn == "uuid:broken"
        ));
    }

    #[test]
    fn repeated_announcement_loads_once() {
        let h = harness();
        let mut discovery = h.load();
        let x = FakeDevice::new("uuid:x", "Speaker X", None);

        h.browser.emit(DiscoveryEvent::Available(x.clone()));
        h.browser.emit(DiscoveryEvent::Available(x));
        discovery.dispatch_blocking().unwrap();
        discovery.dispatch_blocking().unwrap();

        assert_eq!(h.host.loads().len(), 1);
        assert_eq!(discovery.device_count(), 1);
    }

    #[test]
    fn unknown_device_going_away_is_ignored() {
        let h = harness();
        let mut discovery = h.load();
        h.browser.emit(DiscoveryEvent::Unavailable(FakeDevice::new(
            "uuid:ghost",
            "Ghost",
            None,
        )));
        discovery.dispatch_blocking().unwrap();
        assert!(h.host.unloads().is_empty());
        assert!(h.emitter.devices().is_empty());
    }

    #[test]
    fn unload_tears_down_remaining_devices() {
        let h = harness();
        let mut discovery = h.load();
        for udn in ["uuid:a", "uuid:b"] {
            h.browser
                .emit(DiscoveryEvent::Available(FakeDevice::new(udn, udn, None)));
            discovery.dispatch_blocking().unwrap();
        }

        assert_eq!(discovery.unload(), 2);
        let mut unloads = h.host.unloads();
        unloads.sort();
        assert_eq!(unloads, vec![ModuleIndex(0), ModuleIndex(1)]);
    }

    #[test]
    fn arguments_are_rejected() {
        let h = harness();
        let result = DiscoveryModule::load(
            "udn=uuid:x",
            DiscoveryDeps {
                config: Config::default(),
                browser: h.browser.clone(),
                host: h.host.clone(),
                emitter: h.emitter.clone(),
            },
        );
        assert!(matches!(
            result,
            Err(ModuleError::Config(ConfigError::UnknownKey(_)))
        ));
    }
}

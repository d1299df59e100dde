//! Lifecycle of one sink module instance.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::audio::{self, AudioHandler, AudioMsg, AudioReply, SinkState};
use super::control::{ControlEndpoint, ControlHandler, DeviceSource, NotifyHandler};
use super::DeviceLocator;
use crate::config::{Config, ModuleArgs};
use crate::events::EventEmitter;
use crate::host::{ModuleError, ModuleHost, ModuleIndex};
use crate::mq::{
    AsyncMsgQueue, Handler, MainLoop, QueueError, QueueReceiver, QueueSender, Received,
    SchedulerAdapter, ThreadMq,
};

/// Arguments a sink accepts.
pub const VALID_ARGS: &[&str] = &["udn"];

/// Collaborators a sink is loaded with.
pub struct SinkDeps {
    pub config: Config,
    pub locator: Arc<dyn DeviceLocator>,
    pub host: Arc<dyn ModuleHost>,
    pub emitter: Arc<dyn EventEmitter>,
}

/// A loaded sink: endpoint, control thread and audio thread.
pub struct SinkModule {
    index: ModuleIndex,
    udn: String,
    endpoint: ControlEndpoint,
    control_queue: QueueSender<ControlHandler>,
    notify_rx: QueueReceiver<NotifyHandler>,
    audio_queue: QueueSender<AudioHandler>,
    audio_handler: Arc<AudioHandler>,
    control_thread: Option<JoinHandle<()>>,
    audio_thread: Option<JoinHandle<()>>,
}

impl SinkModule {
    /// Loads a sink for the device named by the `udn` argument.
    ///
    /// The endpoint stays unlinked until the device shows up and answers its
    /// initial queries; call [`dispatch_pending`](Self::dispatch_pending) to
    /// pick up that notification.
    pub fn load(index: ModuleIndex, args: &str, deps: SinkDeps) -> Result<Self, ModuleError> {
        let args = ModuleArgs::parse(args, VALID_ARGS).map_err(|e| {
            log::error!("[Sink] Failed to parse module arguments: {e}");
            e
        })?;
        let udn = args
            .require("udn")
            .map_err(|e| {
                log::error!("[Sink] Failed to parse udn argument");
                e
            })?
            .to_string();
        deps.config.validate()?;

        let notify_handler = Arc::new(NotifyHandler::new(
            udn.as_str(),
            index,
            Arc::clone(&deps.host),
            Arc::clone(&deps.emitter),
        ));

        let mut control_mq: ThreadMq<ControlHandler, NotifyHandler> =
            ThreadMq::new(&format!("{udn}-control"));
        let control_rx = control_mq.take_in_consumer();
        let notify_rx = control_mq.take_out_consumer();
        let control_handler = Arc::new(ControlHandler::new(
            udn.as_str(),
            control_mq.outq.clone(),
            Arc::clone(&notify_handler),
        ));
        let endpoint = ControlEndpoint::new(
            udn.as_str(),
            control_mq.inq.clone(),
            Arc::clone(&control_handler),
            &notify_handler,
            Arc::clone(&deps.emitter),
        );

        let (audio_queue, audio_rx) = AsyncMsgQueue::new::<AudioHandler>(format!("{udn}-audio"));
        let audio_handler = Arc::new(AudioHandler::default());

        let devices = deps.locator.watch(&udn);
        let loop_name = format!("{udn}-manage");
        let control_thread = thread::Builder::new()
            .name("upnp-sink-manage".to_string())
            .spawn(move || {
                let mut main_loop = MainLoop::new(loop_name);
                main_loop.register(control_rx);
                main_loop.add_source(Box::new(DeviceSource::new(control_handler, devices)));
                main_loop.run();
            })?;

        let mut module = Self {
            index,
            udn,
            endpoint,
            control_queue: control_mq.inq.clone(),
            notify_rx,
            audio_queue,
            audio_handler: Arc::clone(&audio_handler),
            control_thread: Some(control_thread),
            audio_thread: None,
        };

        // From here on a failure unwinds through Drop.
        let realtime = deps
            .config
            .realtime_scheduling
            .then_some(deps.config.realtime_priority);
        let notify = control_mq.outq.clone();
        module.audio_thread = Some(
            thread::Builder::new()
                .name("upnp-sink".to_string())
                .spawn(move || audio::run(audio_rx, audio_handler, notify, notify_handler, realtime))?,
        );

        log::info!("[Sink] loaded {} for {}", module.index, module.udn);
        Ok(module)
    }

    pub fn index(&self) -> ModuleIndex {
        self.index
    }

    pub fn udn(&self) -> &str {
        &self.udn
    }

    pub fn endpoint(&self) -> &ControlEndpoint {
        &self.endpoint
    }

    /// Applies every notification queued by the worker threads.
    ///
    /// Returns how many were processed.
    pub fn dispatch_pending(&mut self) -> Result<usize, QueueError> {
        let mut count = 0;
        while let Some(received) = self.notify_rx.try_receive()? {
            self.handle(received);
            count += 1;
        }
        Ok(count)
    }

    /// Blocks until one notification arrives and applies it.
    pub fn dispatch_blocking(&mut self) -> Result<(), QueueError> {
        let received = self.notify_rx.receive_blocking()?;
        self.handle(received);
        Ok(())
    }

    /// Latency reported by the audio thread.
    pub fn latency(&self) -> Result<Duration, QueueError> {
        match self.audio_call(AudioMsg::GetLatency)? {
            AudioReply::Latency(latency) => Ok(latency),
            _ => Ok(audio::FIXED_LATENCY),
        }
    }

    /// Moves the audio side to `state`.
    pub fn set_state(&self, state: SinkState) -> Result<AudioReply, QueueError> {
        self.audio_call(AudioMsg::SetState(state))
    }

    pub fn audio_state(&self) -> SinkState {
        self.audio_handler.state()
    }

    /// Unloads the module: unlink the endpoint, then stop the control
    /// thread, then the audio thread.
    pub fn unload(mut self) {
        self.shutdown();
    }

    fn audio_call(&self, msg: AudioMsg) -> Result<AudioReply, QueueError> {
        self.audio_queue.call(&self.audio_handler, msg, 0, None)
    }

    fn handle(&mut self, received: Received<NotifyHandler>) {
        match received {
            Received::Message(message) => {
                log::trace!("[Sink] {}: {}", self.udn, message.name());
                message.dispatch();
                self.notify_rx.complete(());
            }
            Received::Shutdown => self.notify_rx.dispose(),
        }
    }

    fn shutdown(&mut self) {
        if self.control_thread.is_none() && self.audio_thread.is_none() {
            return;
        }
        log::info!("[Sink] unloading {} ({})", self.index, self.udn);

        self.endpoint.unlink();
        if self.audio_thread.is_some() {
            if let Err(e) = self.audio_call(AudioMsg::SetState(SinkState::Unlinked)) {
                log::warn!("[Sink] {}: could not unlink audio side: {e}", self.udn);
            }
        }

        if let Some(thread) = self.control_thread.take() {
            stop_thread(&self.control_queue, thread);
        }
        if let Some(thread) = self.audio_thread.take() {
            stop_thread(&self.audio_queue, thread);
        }
    }
}

impl Drop for SinkModule {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stop_thread<H: Handler>(queue: &QueueSender<H>, thread: JoinHandle<()>) {
    match queue.send_shutdown() {
        Ok(ack) => {
            if let Err(e) = ack.wait() {
                log::warn!("[Sink] {e}");
            }
        }
        Err(e) => log::warn!("[Sink] {e}"),
    }
    if thread.join().is_err() {
        log::error!("[Sink] worker for '{}' panicked", queue.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::events::SinkEvent;
    use crate::sink::LinkState;
    use crate::test_fixtures::{
        FakeDevice, FakeLocator, FakeRenderingControl, RecordingEmitter, RecordingHost,
        LAST_CHANGE_FULL,
    };
    use crate::volume::VolumeValue;

    struct Harness {
        locator: Arc<FakeLocator>,
        host: Arc<RecordingHost>,
        emitter: Arc<RecordingEmitter>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                locator: Arc::new(FakeLocator::default()),
                host: Arc::new(RecordingHost::default()),
                emitter: Arc::new(RecordingEmitter::default()),
            }
        }

        fn load(&self, args: &str) -> Result<SinkModule, ModuleError> {
            SinkModule::load(
                ModuleIndex(7),
                args,
                SinkDeps {
                    config: Config {
                        realtime_scheduling: false,
                        ..Default::default()
                    },
                    locator: self.locator.clone(),
                    host: self.host.clone(),
                    emitter: self.emitter.clone(),
                },
            )
        }
    }

    #[test]
    fn udn_is_required() {
        let harness = Harness::new();
        assert!(matches!(
            harness.load(""),
            Err(ModuleError::Config(ConfigError::MissingKey(key))) if key == "udn"
        ));
        assert!(matches!(
            harness.load("udn=uuid:x sink_name=foo"),
            Err(ModuleError::Config(ConfigError::UnknownKey(_)))
        ));
        assert!(harness.locator.watched().is_empty());
    }

    #[test]
    fn full_lifecycle() {
        let harness = Harness::new();
        let mut sink = harness.load("udn=uuid:living").unwrap();
        assert_eq!(harness.locator.watched(), vec!["uuid:living"]);
        assert_eq!(sink.endpoint().link_state(), LinkState::Init);

        let rc = FakeRenderingControl::new(25, false);
        harness
            .locator
            .announce(FakeDevice::new("uuid:living", "Living Room", Some(rc.clone())));
        sink.dispatch_blocking().unwrap();
        assert!(sink.endpoint().is_linked());
        assert_eq!(sink.endpoint().volume(), VolumeValue::from_percent(25));

        sink.endpoint().set_mute(true).unwrap();
        assert_eq!(sink.endpoint().get_mute().unwrap(), Some(true));

        rc.notify_last_change(LAST_CHANGE_FULL);
        sink.dispatch_blocking().unwrap();
        sink.dispatch_blocking().unwrap();
        assert_eq!(sink.endpoint().volume(), VolumeValue::from_percent(42));
        assert!(!sink.endpoint().muted());

        assert_eq!(sink.latency().unwrap(), Duration::from_micros(1000));
        assert_eq!(sink.set_state(SinkState::Running).unwrap(), AudioReply::Done);

        let control_queue = sink.control_queue.clone();
        let audio_queue = sink.audio_queue.clone();
        let audio_handler = Arc::clone(&sink.audio_handler);
        sink.unload();

        assert!(control_queue.is_disposed());
        assert!(audio_queue.is_disposed());
        assert_eq!(audio_handler.state(), SinkState::Unlinked);
        assert!(matches!(
            harness.emitter.sinks().last(),
            Some(SinkEvent::Unlinked { .. })
        ));
        assert!(harness.host.unloads().is_empty());
    }

    #[test]
    fn missing_service_requests_unload() {
        let harness = Harness::new();
        let mut sink = harness.load("udn=uuid:bridge").unwrap();

        harness
            .locator
            .announce(FakeDevice::new("uuid:bridge", "Bridge", None));
        sink.dispatch_blocking().unwrap();

        assert_eq!(sink.endpoint().link_state(), LinkState::Failed);
        assert_eq!(harness.host.unloads(), vec![ModuleIndex(7)]);
        assert_eq!(sink.endpoint().set_volume(VolumeValue::MAX), Ok(()));
        sink.unload();
        assert!(harness.emitter.sinks().is_empty());
    }

    #[test]
    fn dropping_the_module_stops_its_threads() {
        let harness = Harness::new();
        let sink = harness.load("udn=uuid:drop").unwrap();
        let control_queue = sink.control_queue.clone();
        drop(sink);
        assert!(control_queue.is_disposed());
    }
}

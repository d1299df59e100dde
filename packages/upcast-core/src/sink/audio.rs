//! Realtime audio thread of a sink.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::control::{NotifyHandler, NotifyMsg};
use crate::mq::{Handler, Opcode, QueueReceiver, QueueSender, Received};
use crate::utils::make_realtime;

/// Latency reported to the owner. The sink renders nothing locally.
pub const FIXED_LATENCY: Duration = Duration::from_micros(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Init,
    Idle,
    Running,
    Suspended,
    Unlinked,
}

#[derive(Debug)]
pub enum AudioMsg {
    GetLatency,
    SetState(SinkState),
}

impl Opcode for AudioMsg {
    fn opcode(&self) -> u32 {
        match self {
            Self::GetLatency => 0,
            Self::SetState(_) => 1,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::GetLatency => "get-latency",
            Self::SetState(_) => "set-state",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioReply {
    Latency(Duration),
    Done,
    /// The request was invalid; the thread is now failing.
    Rejected,
}

/// Handler for the sink's own queue, run on the audio thread.
#[derive(Debug)]
pub struct AudioHandler {
    state: Mutex<SinkState>,
    fault: Mutex<Option<String>>,
}

impl Default for AudioHandler {
    fn default() -> Self {
        Self {
            state: Mutex::new(SinkState::Init),
            fault: Mutex::new(None),
        }
    }
}

impl AudioHandler {
    pub fn state(&self) -> SinkState {
        *self.state.lock()
    }

    fn take_fault(&self) -> Option<String> {
        self.fault.lock().take()
    }
}

impl Handler for AudioHandler {
    type Payload = AudioMsg;
    type Reply = AudioReply;

    fn process(&self, payload: AudioMsg, _offset: i64, _data: Option<Bytes>) -> AudioReply {
        match payload {
            AudioMsg::GetLatency => AudioReply::Latency(FIXED_LATENCY),
            AudioMsg::SetState(next) => {
                let mut state = self.state.lock();
                if *state == SinkState::Unlinked && next != SinkState::Unlinked {
                    *self.fault.lock() = Some(format!("state change to {next:?} after unlink"));
                    return AudioReply::Rejected;
                }
                log::trace!("[Sink] audio state {:?} -> {:?}", *state, next);
                *state = next;
                AudioReply::Done
            }
        }
    }
}

/// Body of the audio thread.
///
/// Serves the sink queue until the sentinel arrives. If processing fails,
/// asks the owner to unload the module and keeps serving until the owner
/// sends the sentinel.
pub(crate) fn run(
    mut queue: QueueReceiver<AudioHandler>,
    handler: Arc<AudioHandler>,
    notify: QueueSender<NotifyHandler>,
    notify_handler: Arc<NotifyHandler>,
    realtime_priority: Option<i32>,
) {
    log::debug!("[Sink] {}: thread starting up", queue.name());

    if let Some(priority) = realtime_priority {
        make_realtime(priority);
    }

    let fault = loop {
        match queue.receive_blocking() {
            Ok(Received::Message(message)) => {
                let reply = message.dispatch();
                queue.complete(reply);
                if let Some(fault) = handler.take_fault() {
                    break Some(fault);
                }
            }
            Ok(Received::Shutdown) => break None,
            Err(e) => {
                log::error!("[Sink] {e}; audio thread exiting");
                return;
            }
        }
    };

    if let Some(fault) = fault {
        log::error!("[Sink] {}: {fault}", queue.name());
        if let Err(e) = notify.post(&notify_handler, NotifyMsg::UnloadRequested, 0, None) {
            log::warn!("[Sink] unload request lost: {e}");
        }
        if let Err(e) = queue.wait_for_shutdown() {
            log::error!("[Sink] {e}; audio thread exiting");
            return;
        }
    }

    queue.dispose();
    log::debug!("[Sink] {}: thread shutting down", queue.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ModuleIndex;
    use crate::mq::AsyncMsgQueue;
    use crate::test_fixtures::{RecordingEmitter, RecordingHost};
    use std::thread;

    #[test]
    fn reports_fixed_latency_and_tracks_state() {
        let handler = AudioHandler::default();
        assert_eq!(
            handler.process(AudioMsg::GetLatency, 0, None),
            AudioReply::Latency(Duration::from_micros(1000))
        );
        assert_eq!(
            handler.process(AudioMsg::SetState(SinkState::Running), 0, None),
            AudioReply::Done
        );
        assert_eq!(handler.state(), SinkState::Running);
        assert!(handler.take_fault().is_none());
    }

    #[test]
    fn failing_thread_requests_unload_and_waits_for_sentinel() {
        let host = Arc::new(RecordingHost::default());
        let notify_handler = Arc::new(NotifyHandler::new(
            "uuid:audio",
            ModuleIndex(3),
            host.clone(),
            Arc::new(RecordingEmitter::default()),
        ));
        let (notify_tx, mut notify_rx) = AsyncMsgQueue::new::<NotifyHandler>("notify");
        let (audio_tx, audio_rx) = AsyncMsgQueue::new::<AudioHandler>("audio");
        let handler = Arc::new(AudioHandler::default());

        let worker = {
            let handler = Arc::clone(&handler);
            thread::spawn(move || run(audio_rx, handler, notify_tx, notify_handler, None))
        };

        let call = |msg| audio_tx.call(&handler, msg, 0, None).unwrap();
        assert_eq!(call(AudioMsg::SetState(SinkState::Unlinked)), AudioReply::Done);
        assert_eq!(
            call(AudioMsg::SetState(SinkState::Running)),
            AudioReply::Rejected
        );

        match notify_rx.receive_blocking().unwrap() {
            Received::Message(message) => {
                assert_eq!(message.name(), "unload-requested");
                message.dispatch();
                notify_rx.complete(());
            }
            Received::Shutdown => panic!("unexpected sentinel"),
        }
        assert_eq!(host.unloads(), vec![ModuleIndex(3)]);

        // Still serving while it waits for the sentinel.
        assert_eq!(
            call(AudioMsg::GetLatency),
            AudioReply::Latency(FIXED_LATENCY)
        );

        audio_tx.send_shutdown().unwrap().wait().unwrap();
        worker.join().unwrap();
        assert!(audio_tx.is_disposed());
    }
}

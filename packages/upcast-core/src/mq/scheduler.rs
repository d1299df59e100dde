//! Cooperative single-threaded scheduler that drives queue consumers.
//!
//! A [`MainLoop`] iterates its [`Source`]s in three phases, the same way a
//! poll-based event loop does:
//!
//! 1. **prepare**: each source reports whether it already has work. A queue
//!    source takes the next entry here and stashes it.
//! 2. **poll**: if nobody had work, the loop parks in a crossbeam [`Select`]
//!    until some source's channel becomes readable or [`LoopHandle::stop`] wakes
//!    it. Nothing is consumed while polling.
//! 3. **check/dispatch**: every source that is (still) ready dispatches exactly
//!    one unit of work.
//!
//! Embedding in a foreign event loop goes through [`SchedulerAdapter`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Select, Sender, TryRecvError};

use super::message::Handler;
use super::queue::{QueueReceiver, Received};

/// Identifies a source registered with a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHandle(usize);

/// Cross-thread control handle for a running [`MainLoop`].
#[derive(Debug, Clone)]
pub struct LoopHandle {
    quit: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl LoopHandle {
    /// Asks the loop to return from `run` after its current iteration.
    pub fn stop(&self) {
        self.quit.store(true, Ordering::Release);
        let _ = self.wake.send(());
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }
}

/// An event source driven by [`MainLoop`].
pub trait Source: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Returns `true` if work is available without waiting.
    fn prepare(&mut self, handle: &LoopHandle) -> bool;

    /// Re-validates readiness after the poll phase.
    fn check(&mut self) -> bool;

    /// Runs one unit of work. Only called after `check` returned `true`.
    fn dispatch(&mut self, handle: &LoopHandle);

    /// Adds this source's readiness signal to the poll set.
    ///
    /// Sources that can no longer become ready return `None`.
    fn register<'a>(&'a self, select: &mut Select<'a>) -> Option<usize>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue Source
// ─────────────────────────────────────────────────────────────────────────────

/// Adapts the consuming end of a queue to the [`Source`] protocol.
pub struct QueueSource<H: Handler> {
    queue: QueueReceiver<H>,
    stash: Option<super::Message<H>>,
    finished: bool,
}

impl<H: Handler> QueueSource<H> {
    pub fn new(queue: QueueReceiver<H>) -> Self {
        Self {
            queue,
            stash: None,
            finished: false,
        }
    }

    /// Whether the sentinel was consumed and the queue disposed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn fill(&mut self, handle: &LoopHandle) {
        if self.stash.is_some() || self.finished {
            return;
        }

        match self.queue.try_receive() {
            Ok(Some(Received::Message(message))) => self.stash = Some(message),
            Ok(Some(Received::Shutdown)) => {
                log::debug!("[Mq] {}: sentinel reached, leaving loop", self.queue.name());
                self.queue.dispose();
                self.finished = true;
                handle.stop();
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("[Mq] {e}; stopping loop");
                self.finished = true;
                handle.stop();
            }
        }
    }
}

impl<H: Handler> Source for QueueSource<H> {
    fn name(&self) -> &str {
        self.queue.name()
    }

    fn prepare(&mut self, handle: &LoopHandle) -> bool {
        self.fill(handle);
        self.stash.is_some()
    }

    fn check(&mut self) -> bool {
        self.stash.is_some() || (!self.finished && self.queue.has_pending())
    }

    fn dispatch(&mut self, handle: &LoopHandle) {
        // A message that arrived during the poll phase is taken here.
        self.fill(handle);
        let Some(message) = self.stash.take() else {
            return;
        };
        log::trace!("[Mq] {}: dispatch {}", self.queue.name(), message.name());
        let reply = message.dispatch();
        self.queue.complete(reply);
    }

    fn register<'a>(&'a self, select: &mut Select<'a>) -> Option<usize> {
        if self.finished {
            return None;
        }
        Some(self.queue.register(select))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel Source
// ─────────────────────────────────────────────────────────────────────────────

/// Feeds values from a plain channel into a callback on the loop's thread.
///
/// Used for notifications from external collaborators (discovery events,
/// LastChange subscriptions) that must be handled on the control context.
pub struct ChannelSource<T, F> {
    name: String,
    rx: Receiver<T>,
    pending: Option<T>,
    callback: F,
    closed: bool,
}

impl<T, F> ChannelSource<T, F>
where
    T: Send,
    F: FnMut(T) + Send,
{
    pub fn new(name: impl Into<String>, rx: Receiver<T>, callback: F) -> Self {
        Self {
            name: name.into(),
            rx,
            pending: None,
            callback,
            closed: false,
        }
    }

    fn fill(&mut self) {
        if self.pending.is_some() || self.closed {
            return;
        }
        match self.rx.try_recv() {
            Ok(value) => self.pending = Some(value),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                log::debug!("[Mq] {}: channel closed", self.name);
                self.closed = true;
            }
        }
    }
}

impl<T, F> Source for ChannelSource<T, F>
where
    T: Send,
    F: FnMut(T) + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _handle: &LoopHandle) -> bool {
        self.fill();
        self.pending.is_some()
    }

    fn check(&mut self) -> bool {
        self.fill();
        self.pending.is_some()
    }

    fn dispatch(&mut self, _handle: &LoopHandle) {
        if let Some(value) = self.pending.take() {
            (self.callback)(value);
        }
    }

    fn register<'a>(&'a self, select: &mut Select<'a>) -> Option<usize> {
        if self.closed {
            return None;
        }
        Some(select.recv(&self.rx))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler Interface
// ─────────────────────────────────────────────────────────────────────────────

/// Interface for plugging queue consumers into an event loop.
///
/// [`MainLoop`] is the in-crate implementation. A host that already runs its
/// own loop implements this trait over it instead.
pub trait SchedulerAdapter {
    /// Registers the consuming end of a queue. The queue is drained by the
    /// scheduler's thread from now on.
    fn register<H: Handler>(&mut self, queue: QueueReceiver<H>) -> SourceHandle;

    /// Runs until [`stop`](Self::stop) is requested or a registered queue
    /// delivers its shutdown sentinel.
    fn run(&mut self);

    /// Requests `run` to return.
    fn stop(&self);
}

/// The in-crate cooperative scheduler.
pub struct MainLoop {
    name: String,
    sources: Vec<(SourceHandle, Box<dyn Source>)>,
    next_id: usize,
    quit: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl MainLoop {
    pub fn new(name: impl Into<String>) -> Self {
        let (wake_tx, wake_rx) = unbounded();
        Self {
            name: name.into(),
            sources: Vec::new(),
            next_id: 0,
            quit: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    /// Returns a handle other threads can use to stop the loop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            quit: Arc::clone(&self.quit),
            wake: self.wake_tx.clone(),
        }
    }

    /// Adds an arbitrary source.
    pub fn add_source(&mut self, source: Box<dyn Source>) -> SourceHandle {
        let handle = SourceHandle(self.next_id);
        self.next_id += 1;
        log::debug!("[Mq] {}: source '{}' added", self.name, source.name());
        self.sources.push((handle, source));
        handle
    }

    /// Removes a source. Returns `false` if it was not registered.
    pub fn remove_source(&mut self, handle: SourceHandle) -> bool {
        let before = self.sources.len();
        self.sources.retain(|(h, _)| *h != handle);
        self.sources.len() != before
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Runs one prepare/poll/dispatch pass.
    ///
    /// With `may_block` the pass parks until some source is ready; without it
    /// the poll phase is skipped. Returns `false` once a stop was requested.
    pub fn iterate(&mut self, may_block: bool) -> bool {
        let handle = self.handle();
        if handle.is_stopping() {
            return false;
        }

        let mut any_ready = false;
        for (_, source) in &mut self.sources {
            any_ready |= source.prepare(&handle);
        }
        if handle.is_stopping() {
            return false;
        }

        if !any_ready && may_block {
            self.poll();
        }

        for (_, source) in &mut self.sources {
            if handle.is_stopping() {
                break;
            }
            if source.check() {
                source.dispatch(&handle);
            }
        }

        !handle.is_stopping()
    }

    fn poll(&self) {
        let mut select = Select::new();
        select.recv(&self.wake_rx);
        for (_, source) in &self.sources {
            source.register(&mut select);
        }
        let _ = select.ready();
        drop(select);
        while self.wake_rx.try_recv().is_ok() {}
    }
}

impl SchedulerAdapter for MainLoop {
    fn register<H: Handler>(&mut self, queue: QueueReceiver<H>) -> SourceHandle {
        self.add_source(Box::new(QueueSource::new(queue)))
    }

    fn run(&mut self) {
        log::debug!("[Mq] {}: loop running", self.name);
        while self.iterate(true) {}
        log::debug!("[Mq] {}: loop stopped", self.name);
    }

    fn stop(&self) {
        self.handle().stop();
    }
}

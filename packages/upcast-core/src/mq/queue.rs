//! Asynchronous cross-thread message queue.
//!
//! An [`AsyncMsgQueue`] is one strictly ordered FIFO with many producers
//! ([`QueueSender`], cheap to clone) and exactly one consumer
//! ([`QueueReceiver`]). [`ThreadMq`] pairs two of them so an owner and a
//! worker context can talk in both directions.
//!
//! Sending never blocks. A sender that needs an answer holds on to the
//! returned [`Pending`] and waits on it; the consumer answers with
//! [`QueueReceiver::complete`]. Shutdown is two-phase: the owner enqueues the
//! sentinel, the consumer reads it, stops, and calls
//! [`QueueReceiver::dispose`], which acknowledges the sentinel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{bounded, unbounded, Receiver, Select, Sender, TryRecvError};
use thiserror::Error;

use super::message::{Handler, Message, SHUTDOWN_OPCODE};

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors a queue reports to producers and consumers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The consumer already disposed the queue.
    #[error("queue '{0}' has been disposed")]
    Disposed(String),

    /// Every producer went away without sending the shutdown sentinel.
    #[error("queue '{0}' lost all producers")]
    Disconnected(String),

    /// The consumer dropped a message without completing it.
    #[error("reply on queue '{0}' was abandoned")]
    Abandoned(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue Entries
// ─────────────────────────────────────────────────────────────────────────────

enum Entry<H: Handler> {
    Message {
        message: Message<H>,
        reply: Option<Sender<H::Reply>>,
    },
    Shutdown {
        ack: Sender<()>,
    },
}

/// What a consumer pulled off the queue.
pub enum Received<H: Handler> {
    /// An application message. Must be answered with `complete`.
    Message(Message<H>),
    /// The shutdown sentinel. Must be answered with `dispose`.
    Shutdown,
}

impl<H: Handler> fmt::Debug for Received<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl<H: Handler> Received<H> {
    /// Opcode of the entry, [`SHUTDOWN_OPCODE`] for the sentinel.
    pub fn opcode(&self) -> u32 {
        match self {
            Self::Message(message) => message.opcode(),
            Self::Shutdown => SHUTDOWN_OPCODE,
        }
    }
}

#[derive(Debug)]
struct Shared {
    name: String,
    shutdown_sent: AtomicBool,
    disposed: AtomicBool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending Replies
// ─────────────────────────────────────────────────────────────────────────────

/// A reply the consumer has not produced yet.
#[must_use = "dropping a Pending discards the reply"]
pub struct Pending<R> {
    rx: Receiver<R>,
    queue: String,
}

impl<R> Pending<R> {
    /// Blocks until the consumer completes the message.
    ///
    /// There is no timeout: a round trip waits as long as the consumer takes.
    pub fn wait(self) -> Result<R, QueueError> {
        self.rx.recv().map_err(|_| QueueError::Abandoned(self.queue))
    }
}

impl<R> fmt::Debug for Pending<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").field("queue", &self.queue).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Producer Side
// ─────────────────────────────────────────────────────────────────────────────

/// Producer handle. Clone it freely; every clone feeds the same FIFO.
pub struct QueueSender<H: Handler> {
    tx: Sender<Entry<H>>,
    shared: Arc<Shared>,
}

impl<H: Handler> Clone for QueueSender<H> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<H: Handler> QueueSender<H> {
    /// Name given to the queue at construction, used in logs and errors.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether the consumer has disposed the queue.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Enqueues a message and returns a handle to its eventual reply.
    ///
    /// Never blocks. Fails only once the queue has been disposed.
    ///
    /// # Panics
    ///
    /// Panics if the shutdown sentinel was already enqueued: the message could
    /// never be delivered.
    pub fn send(
        &self,
        handler: &Arc<H>,
        payload: H::Payload,
        offset: i64,
        data: Option<Bytes>,
    ) -> Result<Pending<H::Reply>, QueueError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.enqueue(handler, payload, offset, data, Some(reply_tx))?;
        Ok(Pending {
            rx: reply_rx,
            queue: self.shared.name.clone(),
        })
    }

    /// Sends and blocks until the consumer has processed the message.
    ///
    /// Must not be called from the context that consumes this queue.
    pub fn call(
        &self,
        handler: &Arc<H>,
        payload: H::Payload,
        offset: i64,
        data: Option<Bytes>,
    ) -> Result<H::Reply, QueueError> {
        self.send(handler, payload, offset, data)?.wait()
    }

    /// Enqueues a message whose reply nobody will wait for.
    pub fn post(
        &self,
        handler: &Arc<H>,
        payload: H::Payload,
        offset: i64,
        data: Option<Bytes>,
    ) -> Result<(), QueueError> {
        self.enqueue(handler, payload, offset, data, None)
    }

    /// Enqueues the shutdown sentinel.
    ///
    /// The returned [`Pending`] resolves once the consumer disposes the queue.
    ///
    /// # Panics
    ///
    /// Panics if a sentinel was already sent.
    pub fn send_shutdown(&self) -> Result<Pending<()>, QueueError> {
        self.check_open()?;
        let already = self.shared.shutdown_sent.swap(true, Ordering::AcqRel);
        assert!(
            !already,
            "shutdown sentinel sent twice on queue '{}'",
            self.shared.name
        );

        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(Entry::Shutdown { ack: ack_tx })
            .map_err(|_| QueueError::Disposed(self.shared.name.clone()))?;

        log::debug!("[Mq] {}: shutdown sentinel enqueued", self.shared.name);
        Ok(Pending {
            rx: ack_rx,
            queue: self.shared.name.clone(),
        })
    }

    fn check_open(&self) -> Result<(), QueueError> {
        if self.is_disposed() {
            return Err(QueueError::Disposed(self.shared.name.clone()));
        }
        Ok(())
    }

    fn enqueue(
        &self,
        handler: &Arc<H>,
        payload: H::Payload,
        offset: i64,
        data: Option<Bytes>,
        reply: Option<Sender<H::Reply>>,
    ) -> Result<(), QueueError> {
        self.check_open()?;
        assert!(
            !self.shared.shutdown_sent.load(Ordering::Acquire),
            "message sent on queue '{}' after its shutdown sentinel",
            self.shared.name
        );

        let message = Message::new(Arc::clone(handler), payload, offset, data);
        log::trace!("[Mq] {}: enqueue {:?}", self.shared.name, message);

        self.tx
            .send(Entry::Message { message, reply })
            .map_err(|_| QueueError::Disposed(self.shared.name.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Consumer Side
// ─────────────────────────────────────────────────────────────────────────────

enum InFlight<R> {
    Idle,
    Message(Option<Sender<R>>),
    Shutdown(Sender<()>),
}

/// The single consumer of an [`AsyncMsgQueue`].
pub struct QueueReceiver<H: Handler> {
    rx: Receiver<Entry<H>>,
    shared: Arc<Shared>,
    in_flight: InFlight<H::Reply>,
    shutdown_seen: bool,
}

impl<H: Handler> QueueReceiver<H> {
    /// Name given to the queue at construction.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether a message is waiting. Does not consume anything.
    pub fn has_pending(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Whether the sentinel has been read.
    pub fn shutdown_seen(&self) -> bool {
        self.shutdown_seen
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Adds this queue's readiness signal to a poll set.
    ///
    /// Returns the operation index `Select` will report when a message is
    /// available. Nothing is consumed by polling.
    pub fn register<'a>(&'a self, select: &mut Select<'a>) -> usize {
        select.recv(&self.rx)
    }

    /// Parks the calling thread until an entry is available, then takes it.
    ///
    /// # Panics
    ///
    /// Panics if the previous message was not completed, or if the sentinel
    /// has already been read.
    pub fn receive_blocking(&mut self) -> Result<Received<H>, QueueError> {
        self.assert_can_receive();
        let entry = self
            .rx
            .recv()
            .map_err(|_| QueueError::Disconnected(self.shared.name.clone()))?;
        Ok(self.accept(entry))
    }

    /// Takes an entry if one is queued, without blocking.
    ///
    /// # Panics
    ///
    /// Same contract as [`receive_blocking`](Self::receive_blocking).
    pub fn try_receive(&mut self) -> Result<Option<Received<H>>, QueueError> {
        self.assert_can_receive();
        match self.rx.try_recv() {
            Ok(entry) => Ok(Some(self.accept(entry))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(QueueError::Disconnected(self.shared.name.clone()))
            }
        }
    }

    /// Acknowledges the message most recently received, handing `reply` back
    /// to a waiting sender.
    ///
    /// # Panics
    ///
    /// Panics if no message is in flight, or if the in-flight entry is the
    /// sentinel (which is answered by [`dispose`](Self::dispose)).
    pub fn complete(&mut self, reply: H::Reply) {
        match std::mem::replace(&mut self.in_flight, InFlight::Idle) {
            InFlight::Message(Some(tx)) => {
                // The sender may have stopped waiting; that is its business.
                let _ = tx.send(reply);
            }
            InFlight::Message(None) => {}
            InFlight::Idle => panic!(
                "complete() on queue '{}' without a received message",
                self.shared.name
            ),
            InFlight::Shutdown(_) => panic!(
                "complete() on queue '{}' for the shutdown sentinel; use dispose()",
                self.shared.name
            ),
        }
    }

    /// Dispatches every message until the sentinel arrives.
    ///
    /// Used by a consumer whose own loop failed: it keeps serving its peers
    /// until the owner asks it to stop. The sentinel is left in flight for the
    /// caller to [`dispose`](Self::dispose).
    pub fn wait_for_shutdown(&mut self) -> Result<(), QueueError> {
        loop {
            match self.receive_blocking()? {
                Received::Message(message) => {
                    let reply = message.dispatch();
                    self.complete(reply);
                }
                Received::Shutdown => return Ok(()),
            }
        }
    }

    /// Disposes the queue after the sentinel has been read, acknowledging it.
    ///
    /// Producers get [`QueueError::Disposed`] from then on.
    ///
    /// # Panics
    ///
    /// Panics if called twice, or before the sentinel was read.
    pub fn dispose(&mut self) {
        let already = self.shared.disposed.swap(true, Ordering::AcqRel);
        assert!(!already, "queue '{}' disposed twice", self.shared.name);

        let ack = match std::mem::replace(&mut self.in_flight, InFlight::Idle) {
            InFlight::Shutdown(ack) => ack,
            _ => panic!(
                "queue '{}' disposed before its shutdown sentinel was read",
                self.shared.name
            ),
        };

        // Anything still queued can no longer be answered; dropping the
        // entries wakes their senders with `Abandoned`.
        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            log::warn!(
                "[Mq] {}: {} message(s) dropped at disposal",
                self.shared.name,
                dropped
            );
        }

        let _ = ack.send(());
        log::debug!("[Mq] {}: disposed", self.shared.name);
    }

    fn assert_can_receive(&self) {
        assert!(
            !self.shutdown_seen,
            "receive on queue '{}' after its shutdown sentinel",
            self.shared.name
        );
        assert!(
            matches!(self.in_flight, InFlight::Idle),
            "receive on queue '{}' before the previous message was completed",
            self.shared.name
        );
    }

    fn accept(&mut self, entry: Entry<H>) -> Received<H> {
        match entry {
            Entry::Message { message, reply } => {
                self.in_flight = InFlight::Message(reply);
                Received::Message(message)
            }
            Entry::Shutdown { ack } => {
                self.shutdown_seen = true;
                self.in_flight = InFlight::Shutdown(ack);
                Received::Shutdown
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Construction
// ─────────────────────────────────────────────────────────────────────────────

/// Namespace for creating queue endpoints.
pub struct AsyncMsgQueue;

impl AsyncMsgQueue {
    /// Creates a queue and returns its producer and consumer ends.
    pub fn new<H: Handler>(name: impl Into<String>) -> (QueueSender<H>, QueueReceiver<H>) {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            name: name.into(),
            shutdown_sent: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });
        (
            QueueSender {
                tx,
                shared: Arc::clone(&shared),
            },
            QueueReceiver {
                rx,
                shared,
                in_flight: InFlight::Idle,
                shutdown_seen: false,
            },
        )
    }
}

/// A pair of queues between an owner and one worker context.
///
/// `inq` carries owner → worker traffic, `outq` worker → owner. Each consumer
/// end can be taken exactly once.
pub struct ThreadMq<I: Handler, O: Handler> {
    pub inq: QueueSender<I>,
    pub outq: QueueSender<O>,
    in_consumer: Option<QueueReceiver<I>>,
    out_consumer: Option<QueueReceiver<O>>,
}

impl<I: Handler, O: Handler> ThreadMq<I, O> {
    /// Creates both queues, naming them `<name>-in` and `<name>-out`.
    pub fn new(name: &str) -> Self {
        let (inq, in_consumer) = AsyncMsgQueue::new(format!("{name}-in"));
        let (outq, out_consumer) = AsyncMsgQueue::new(format!("{name}-out"));
        Self {
            inq,
            outq,
            in_consumer: Some(in_consumer),
            out_consumer: Some(out_consumer),
        }
    }

    /// Hands out the worker's consumer end.
    ///
    /// # Panics
    ///
    /// Panics on a second call: a queue has exactly one consumer.
    pub fn take_in_consumer(&mut self) -> QueueReceiver<I> {
        self.in_consumer
            .take()
            .unwrap_or_else(|| panic!("second consumer requested for '{}'", self.inq.name()))
    }

    /// Hands out the owner's consumer end.
    ///
    /// # Panics
    ///
    /// Panics on a second call.
    pub fn take_out_consumer(&mut self) -> QueueReceiver<O> {
        self.out_consumer
            .take()
            .unwrap_or_else(|| panic!("second consumer requested for '{}'", self.outq.name()))
    }
}

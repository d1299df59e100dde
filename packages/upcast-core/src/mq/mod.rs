//! Cross-thread messaging.
//!
//! - [`message`]: payload tagging and the handler capability
//! - [`queue`]: the MPSC queue, reply handles and the two-phase shutdown
//! - [`scheduler`]: the cooperative loop that drains queues on their owner thread

pub mod message;
pub mod queue;
pub mod scheduler;

pub use message::{Handler, Message, Opcode, SHUTDOWN_OPCODE};
pub use queue::{
    AsyncMsgQueue, Pending, QueueError, QueueReceiver, QueueSender, Received, ThreadMq,
};
pub use scheduler::{
    ChannelSource, LoopHandle, MainLoop, QueueSource, SchedulerAdapter, Source, SourceHandle,
};

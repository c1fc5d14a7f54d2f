//! Application-facing runtime.
//!
//! # Overview
//!
//! The runtime holds what the application registers with the client:
//!
//! - [`ChannelRegistry`]: receive and send bindings, keyed by channel id
//! - [`Scheduler`]: periodic and one-shot callbacks, run once per tick
//! - [`Context`]: the handle every callback receives
//! - [`WriteQueue`]: writes coming from other tasks
//!
//! # Callback Pattern
//!
//! Callbacks are plain function pointers taking the application state and
//! a [`Context`]. They never perform I/O directly. Writes and scheduling
//! changes are queued on the context and applied by the client after the
//! callback pass, so a task scheduled from inside a callback runs on the
//! next tick at the earliest.

pub(crate) mod context;
pub(crate) mod queue;
pub(crate) mod registry;
pub(crate) mod scheduler;

pub use context::{
    Context, DEFERRED_DEPTH, Deferred, DeferredOp, Job, OUTBOX_DEPTH, Outbox, Outgoing,
    ReceiveFn, Target, TaskFn,
};
pub use queue::{QueuedWrite, WRITE_QUEUE_DEPTH, WriteHandle, WriteQueue};
pub use registry::ChannelRegistry;
pub use scheduler::{
    MAX_PENDING_CANCELS, MAX_TASK_ID_LEN, Scheduler, TaskControl, TaskId, TaskIds, TaskKind,
    task_id,
};

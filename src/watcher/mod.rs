//! Watch-mode pipeline.
//!
//! Watches a directory tree and, whenever a saved file carries a marker
//! comment, hands the file to the generation backend.
//!
//! # Architecture
//!
//! ```text
//! notify callback --try_send--> EventFilter --> Debouncer --> Dispatcher --> Generator
//!        ^                          |          (per-path     (serial)
//!        |                          |           timers)
//!   register_tree <--new dirs-------+
//! ```
//!
//! Each stage is its own task; stages talk only through channels. One
//! [`CancellationToken`](tokio_util::sync::CancellationToken) stops all of
//! them.

mod debouncer;
mod dispatcher;
mod error;
mod event;
mod filter;
mod pipeline;
mod tree;

pub use debouncer::Debouncer;
pub use dispatcher::{DispatchOutcome, DispatchRequest, Dispatcher, SkipReason};
pub use error::WatchError;
pub use event::{ChangeEvent, ChangeOp};
pub use filter::{DropReason, EventFilter, Verdict};
pub use pipeline::{
    CHANGE_QUEUE_CAPACITY, RAW_QUEUE_CAPACITY, StageHandles, Stages, WatchPipeline,
    WatchPipelineBuilder,
};
pub use tree::{DirectoryRegistrar, NotifyRegistrar, register_tree};

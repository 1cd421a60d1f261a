pub mod cli;
pub mod config;
pub mod generation;
pub mod logging;
pub mod marker;
pub mod report;
pub mod utils;
pub mod watcher;

pub use config::{Settings, Verbosity, WatchConfig};
pub use generation::{CommandGenerator, GenerationError, GenerationOutput, Generator, Usage};
pub use marker::{MarkerMatch, MarkerSet};
pub use watcher::{ChangeEvent, ChangeOp, WatchError, WatchPipeline};

pub mod config;
pub mod error;
mod buffer;
mod consumer;
mod orchestrator;
mod reporter;
mod state;
mod watchdog;

pub use buffer::BatchBuffer;
pub use config::RunConfig;
pub use consumer::{ConsumerReport, SubscriptionConsumer};
pub use error::RunError;
pub use orchestrator::{Pump, RunReport};
pub use reporter::LogReporter;
pub use state::{CancelReason, RunState, Termination};
pub use watchdog::StallWatchdog;

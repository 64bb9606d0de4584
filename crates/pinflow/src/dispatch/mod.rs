pub mod commands;
pub mod dispatcher;
pub mod keyboards;

pub use commands::Command;
pub use dispatcher::{Dispatcher, JobOutcome, JobTracker};

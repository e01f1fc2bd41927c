//! Bot execution engine
//!
//! - [`AdmissionController`] caps the number of active executions
//! - [`BotExecutor`] drives the cycles of one run
//! - [`Dispatcher`] owns records and background tasks

use std::any::Any;

pub mod admission;
pub mod dispatcher;
pub mod executor;

pub use admission::{AdmissionController, AdmissionPermit};
pub use dispatcher::{Dispatcher, StartExecution, MAX_INTERVAL_SECONDS, MAX_REPEAT_COUNT};
pub use executor::{BotExecutor, ExecutorResult, RunSpec};

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

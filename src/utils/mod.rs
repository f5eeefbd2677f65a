//! Logging and progress reporting

mod logging;
mod progress;

pub use logging::{setup_logging, LogConfig};
pub use progress::progress_bar;

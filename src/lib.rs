//! Deadlock finder library

mod capture;
mod config;
mod local_logger;
mod prelude;

pub mod cli;
pub mod finder;
pub mod target;

pub use capture::capture_dump;
pub use config::FinderConfig;
pub use finder::{DeadlockFinder, HandlerRegistry, Report};

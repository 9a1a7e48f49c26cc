//! Sandboxed build execution: scoped staging areas and scrubbed-environment
//! subprocess execution (spec §4.5, component C5).

mod executor;
mod staging;

pub use executor::CommandExecutor;
pub use staging::StagingArea;

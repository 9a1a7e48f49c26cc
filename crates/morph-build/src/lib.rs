//! Chunk, stratum and system builders, plus the build-order scheduler that
//! drives them (spec §4.7-§4.10, §5).
//!
//! `morph-graph` resolves morphologies into an [`morph_graph::ArtifactGraph`];
//! this crate knows how to actually build one artifact of each kind from its
//! `ArtifactDetail`, and how to drive a whole graph to completion
//! concurrently within dependency order.

mod chunk;
mod env;
mod extract;
mod recipes;
mod scheduler;
mod stratum;
mod system;

pub use chunk::ChunkBuilder;
pub use env::{chunk_environment, with_serial_makeflags};
pub use extract::{extract_treeish, normalize_mtimes};
pub use recipes::{build_commands, configure_commands, install_commands, test_commands};
pub use scheduler::Scheduler;
pub use stratum::StratumBuilder;
pub use system::{HostSystemTools, SystemBuilder, SystemTools};

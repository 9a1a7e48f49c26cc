//! Data model, external-interface traits, and the error taxonomy shared by
//! every crate in the morph build engine.
//!
//! This crate owns nothing operational (no hashing, no tar, no subprocess
//! execution) — it just defines the vocabulary (`Source`, `Morphology`,
//! `Settings`, `MorphError`) and the trait seams (`SourceManager`,
//! `MorphLoader`, `Treeish`) that the operational crates build on.

pub mod error;
pub mod morphology;
pub mod settings;
pub mod source;
pub mod treeish;

#[cfg(feature = "test-util")]
pub mod test_util;

pub use error::MorphError;
pub use morphology::{BuildSystem, ChunkMorphology, ChunkSplit, Morphology, StratumMorphology, StratumSource, SystemMorphology};
pub use settings::Settings;
pub use source::Source;
pub use treeish::{MorphLoader, SourceManager, Submodule, Treeish};

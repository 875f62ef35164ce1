//! Logan Models
//!
//! Resolves and drives the classification backend used for log diagnosis.
//!
//! Backends come from three places:
//! - The built-in zero-shot classifier (Candle NLI cross-encoder, `ml-models` feature)
//! - Plugin libraries named by `<library>:<ClassName>` path-specs
//! - Pre-built instances handed to the manager directly
//!
//! [`ModelManager`] picks one, initialises it once and checks every result it returns.

pub mod class;
pub mod config;
pub mod loader;
pub mod manager;
#[cfg(feature = "ml-models")]
pub mod nli;
pub mod plugin;
pub mod registry;
pub mod zero_shot;

pub use class::{ModelClass, ModelClassRef, NativeClass};
pub use config::ManagerConfig;
pub use loader::{resolve_library_path, LoadedLibrary, PathSpec, PluginLoader};
pub use manager::{registry_key, ModelManager, ModelSpec, ModelType};
#[cfg(feature = "ml-models")]
pub use nli::CandleNliLoader;
pub use plugin::{ForeignClass, ForeignModel};
pub use registry::ModelRegistry;
pub use zero_shot::{
    PipelineLoader, ZeroShotClassifier, ZeroShotModel, ZeroShotPipeline, ZeroShotSettings,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::class::{ModelClass, NativeClass};
    pub use crate::config::ManagerConfig;
    pub use crate::manager::{ModelManager, ModelSpec, ModelType};
    pub use crate::registry::ModelRegistry;
    pub use crate::zero_shot::{ZeroShotModel, ZeroShotSettings};
    pub use logan_core::prelude::*;
}

//! Logan Core
//!
//! Types shared by the model layer and by plugin libraries:
//! - Error types and result handling
//! - Classification results and the golden signal / fault category taxonomies
//! - The [`ClassificationModel`] contract every backend implements
//! - The C ABI and [`export_models!`] macro used to build plugin libraries

pub mod abi;
pub mod contract;
pub mod error;
pub mod types;

pub use contract::{
    kwargs_into, validate_results, ClassificationModel, FromKwargs, ModelKwargs, Operations,
    DEFAULT_BATCH_SIZE,
};
pub use error::{Error, Result};
pub use types::{ClassificationResult, FaultCategory, GoldenSignal, Task};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::contract::{ClassificationModel, FromKwargs, ModelKwargs, DEFAULT_BATCH_SIZE};
    pub use crate::error::{Error, Result};
    pub use crate::types::{ClassificationResult, FaultCategory, GoldenSignal, Task};
}

//! Model classes: constructors for classification backends

use logan_core::{ClassificationModel, FromKwargs, ModelKwargs, Operations, Result};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

/// A constructible backend type.
///
/// Registries hold classes, not instances: [`instantiate`](Self::instantiate) builds a fresh
/// model from constructor arguments each time it is called.
pub trait ModelClass: Send + Sync {
    /// Name the class was declared under
    fn class_name(&self) -> &str;

    /// Contract operations instances of this class provide
    fn operations(&self) -> Operations {
        Operations::ALL
    }

    /// Build a new, uninitialised instance
    fn instantiate(&self, kwargs: &ModelKwargs) -> Result<Box<dyn ClassificationModel>>;

    /// Library the class was loaded from, for classes that came from a plugin
    fn origin(&self) -> Option<&Path> {
        None
    }
}

impl std::fmt::Debug for dyn ModelClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClass")
            .field("name", &self.class_name())
            .field("operations", &self.operations())
            .field("origin", &self.origin())
            .finish()
    }
}

/// Shared handle to a model class
pub type ModelClassRef = Arc<dyn ModelClass>;

/// A model class backed by a Rust type compiled into the host
pub struct NativeClass<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> NativeClass<T>
where
    T: ClassificationModel + FromKwargs + 'static,
{
    /// Create a class named `name` for `T`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Create a shareable class handle, ready for registration
    pub fn shared(name: impl Into<String>) -> ModelClassRef {
        Arc::new(Self::new(name))
    }
}

impl<T> ModelClass for NativeClass<T>
where
    T: ClassificationModel + FromKwargs + 'static,
{
    fn class_name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, kwargs: &ModelKwargs) -> Result<Box<dyn ClassificationModel>> {
        Ok(Box::new(T::from_kwargs(kwargs)?))
    }
}

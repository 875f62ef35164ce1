//! Registry of model classes by name

use crate::class::ModelClassRef;
use crate::loader::PluginLoader;
use logan_core::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// Name to model class mapping.
///
/// Each registry is independent; the plugin loader behind it is shared process-wide unless one
/// is injected with [`with_loader`](Self::with_loader). Lookups and mutations take `&self`.
pub struct ModelRegistry {
    loader: Arc<PluginLoader>,
    entries: RwLock<Vec<(String, ModelClassRef)>>,
}

impl ModelRegistry {
    /// Create an empty registry backed by the global plugin loader
    pub fn new() -> Self {
        Self::with_loader(PluginLoader::global())
    }

    /// Create an empty registry backed by `loader`
    pub fn with_loader(loader: Arc<PluginLoader>) -> Self {
        Self {
            loader,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Loader used by [`register_from_path`](Self::register_from_path)
    pub fn loader(&self) -> &Arc<PluginLoader> {
        &self.loader
    }

    /// Load `<library>:<Class>` and register the class under `name`.
    ///
    /// Loader errors are returned unchanged and leave the registry untouched.
    pub fn register_from_path(&self, name: &str, path_spec: &str) -> Result<ModelClassRef> {
        let class = self.loader.load_class(path_spec)?;
        self.register_class(name, Arc::clone(&class))?;
        Ok(class)
    }

    /// Register an already-constructed class under `name`, replacing any previous entry
    pub fn register_class(&self, name: &str, class: ModelClassRef) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::config("model name cannot be empty"));
        }
        class
            .operations()
            .ensure_complete(&format!("model class '{}'", class.class_name()))?;

        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => {
                tracing::info!(
                    "Replacing registered model '{}' with class '{}'",
                    name,
                    class.class_name()
                );
                entry.1 = class;
            }
            None => {
                tracing::info!(
                    "Registered model '{}' (class '{}')",
                    name,
                    class.class_name()
                );
                entries.push((name.to_string(), class));
            }
        }
        Ok(())
    }

    /// Look up a registered class
    pub fn get(&self, name: &str) -> Option<ModelClassRef> {
        self.entries
            .read()
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, class)| Arc::clone(class))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.read().iter().any(|(existing, _)| existing == name)
    }

    /// Registered names, in registration order
    pub fn list_registered(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Remove `name`, returning whether it was registered
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| existing != name);
        let removed = entries.len() != before;
        if removed {
            tracing::info!("Unregistered model '{}'", name);
        }
        removed
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        tracing::debug!("Clearing {} registered models", entries.len());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.list_registered())
            .finish()
    }
}

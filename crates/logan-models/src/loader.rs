//! Dynamic plugin loading from `<library-path>:<ClassName>` path-specs
//!
//! A path-spec names a native plugin library (`.so`, `.dylib` or `.dll`) and one model class
//! exported from it. Libraries are opened at most once per loader, cached by canonical path.
//! Classes and instances hold an `Arc` to their library, so a vtable never outlives its code.

use crate::class::ModelClassRef;
use crate::plugin::ForeignClass;
use libloading::Library;
use logan_core::abi::{self, DeclarationFn, ModelVTable, PluginDeclaration};
use logan_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::env::consts::DLL_EXTENSION;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Separator between library path and class name
pub const PATH_SPEC_SEPARATOR: char = ':';

static NEXT_MODULE_ID: AtomicUsize = AtomicUsize::new(0);

/// Parsed `<library-path>:<ClassName>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    /// Library path exactly as written, trimmed
    pub library: String,
    /// Exported class name, trimmed
    pub class_name: String,
}

impl PathSpec {
    /// Parse a path-spec, splitting on the rightmost separator so that paths containing the
    /// separator themselves (`C:\models\plugin.dll:Model`) stay intact.
    pub fn parse(spec: &str) -> Result<Self> {
        let (library, class_name) = spec.rsplit_once(PATH_SPEC_SEPARATOR).ok_or_else(|| {
            Error::config(format!(
                "invalid model path format: '{}'. Expected format: '<path_to_library>:<class_name>'",
                spec
            ))
        })?;

        let library = library.trim();
        let class_name = class_name.trim();
        if library.is_empty() {
            return Err(Error::config(format!(
                "library path cannot be empty in '{}'",
                spec
            )));
        }
        if class_name.is_empty() {
            return Err(Error::config(format!("class name cannot be empty in '{}'", spec)));
        }

        Ok(Self {
            library: library.to_string(),
            class_name: class_name.to_string(),
        })
    }
}

impl std::fmt::Display for PathSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.library, PATH_SPEC_SEPARATOR, self.class_name)
    }
}

/// Expand `~`, make absolute, and check the file exists with the platform library extension
pub fn resolve_library_path(raw: &str) -> Result<PathBuf> {
    let expanded = expand_home(raw);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    if !absolute.exists() {
        return Err(Error::not_found(format!(
            "plugin library not found: {}",
            absolute.display()
        )));
    }

    let has_extension = absolute
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(DLL_EXTENSION))
        .unwrap_or(false);
    if !has_extension {
        return Err(Error::config(format!(
            "plugin must be a native library (.{}): {}",
            DLL_EXTENSION,
            absolute.display()
        )));
    }

    Ok(absolute)
}

fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(raw));
    }
    if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// One item from a plugin's export table, copied out of the library
#[derive(Clone)]
pub(crate) struct ExportEntry {
    pub(crate) name: String,
    pub(crate) kind: u32,
    pub(crate) vtable: Option<ModelVTable>,
}

impl ExportEntry {
    fn is_model_class(&self) -> bool {
        self.kind == abi::EXPORT_MODEL_CLASS && self.vtable.is_some()
    }
}

/// A plugin library opened by the loader
pub struct LoadedLibrary {
    path: PathBuf,
    module_id: String,
    exports: Vec<ExportEntry>,
    // Declared last so it is dropped after everything that may still point into it.
    _library: Option<Library>,
}

impl LoadedLibrary {
    /// Canonical path the library was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unique identity assigned when the library was loaded
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Names of all model classes the library exports
    pub fn class_names(&self) -> Vec<String> {
        self.exports
            .iter()
            .filter(|entry| entry.is_model_class())
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Open `path` and read its declaration
    fn open(path: &Path) -> Result<Self> {
        // SAFETY: opening a library runs its initialisers; plugins are trusted code by contract.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            Error::plugin_load(format!("failed to load {}: {}", path.display(), e))
        })?;

        // SAFETY: the symbol type matches the signature generated by `export_models!`.
        let declaration = unsafe {
            let symbol = library
                .get::<DeclarationFn>(abi::DECLARATION_SYMBOL)
                .map_err(|e| {
                    Error::contract(format!(
                        "{} is not a logan plugin (missing entry point): {}",
                        path.display(),
                        e
                    ))
                })?;
            symbol()
        };

        // SAFETY: the declaration was just produced by the library, which is still loaded.
        let mut loaded = unsafe { Self::from_declaration(path, &declaration)? };
        loaded._library = Some(library);
        Ok(loaded)
    }

    /// Build from an in-memory declaration.
    ///
    /// # Safety
    /// Every pointer in `declaration` must be valid for as long as the returned value lives.
    pub(crate) unsafe fn from_declaration(
        path: &Path,
        declaration: &PluginDeclaration,
    ) -> Result<Self> {
        if declaration.abi_version != abi::ABI_VERSION {
            return Err(Error::contract(format!(
                "{} was built for plugin ABI v{}, this host speaks v{}",
                path.display(),
                declaration.abi_version,
                abi::ABI_VERSION
            )));
        }

        match declaration.core_version() {
            Some(version) if version != env!("CARGO_PKG_VERSION") => {
                warn!(
                    "{} was built against logan-core {} (host: {})",
                    path.display(),
                    version,
                    env!("CARGO_PKG_VERSION")
                );
            }
            _ => {}
        }

        let exports = declaration
            .exports()
            .iter()
            .map(|descriptor| ExportEntry {
                name: descriptor.name(),
                kind: descriptor.kind,
                vtable: if descriptor.vtable.is_null() {
                    None
                } else {
                    Some(*descriptor.vtable)
                },
            })
            .collect();

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin".to_string());
        let module_id = format!(
            "plugin_{}_{}",
            stem,
            NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed)
        );

        Ok(Self {
            path: path.to_path_buf(),
            module_id,
            exports,
            _library: None,
        })
    }

    /// Look up `class_name` and check it against the full contract.
    ///
    /// Fails with `NotFound` (listing the available classes) when the name is absent, and with
    /// `ContractViolation` when the export is not a model class or leaves a slot empty.
    pub fn find_class(self: &Arc<Self>, class_name: &str) -> Result<ModelClassRef> {
        let entry = self
            .exports
            .iter()
            .find(|entry| entry.name == class_name)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "class '{}' not found in {}. Available classes: {:?}",
                    class_name,
                    self.path.display(),
                    self.class_names()
                ))
            })?;

        let vtable = match (&entry.vtable, entry.kind) {
            (Some(vtable), abi::EXPORT_MODEL_CLASS) => *vtable,
            _ => {
                return Err(Error::contract(format!(
                    "'{}' in {} is not a model class",
                    class_name,
                    self.path.display()
                )))
            }
        };

        let subject = format!("class '{}' in {}", class_name, self.path.display());
        let missing = vtable.missing_lifecycle();
        if !missing.is_empty() {
            return Err(Error::contract(format!(
                "{} is missing required entry points: {}",
                subject,
                missing.join(", ")
            )));
        }
        vtable.operations().ensure_complete(&subject)?;

        Ok(Arc::new(ForeignClass::new(
            class_name.to_string(),
            vtable,
            Arc::clone(self),
        )))
    }
}

/// Opens plugin libraries and resolves model classes from them
#[derive(Default)]
pub struct PluginLoader {
    libraries: Mutex<HashMap<PathBuf, Arc<LoadedLibrary>>>,
}

impl PluginLoader {
    /// Create a loader with its own, empty library cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide loader.
    ///
    /// Registries share it by default so that a library is opened at most once per process
    /// no matter how many registries resolve it.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<PluginLoader>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Parse, resolve and load a `<library>:<Class>` path-spec.
    ///
    /// Returns the class without instantiating it.
    pub fn load_class(&self, path_spec: &str) -> Result<ModelClassRef> {
        let spec = PathSpec::parse(path_spec)?;
        let path = resolve_library_path(&spec.library)?;
        let library = self.load_library(&path)?;
        library.find_class(&spec.class_name)
    }

    /// Open a library, or return the cached one if this path was opened before.
    ///
    /// The cache lock is held while the library is opened and its declaration read, so
    /// concurrent loads of one path open it once.
    pub fn load_library(&self, path: &Path) -> Result<Arc<LoadedLibrary>> {
        let key = std::fs::canonicalize(path)?;

        let mut libraries = self.libraries.lock();
        if let Some(library) = libraries.get(&key) {
            debug!(
                "Reusing plugin library {} ({})",
                key.display(),
                library.module_id()
            );
            return Ok(Arc::clone(library));
        }

        let library = Arc::new(LoadedLibrary::open(&key)?);
        info!(
            "Loaded plugin library {} as {} with classes {:?}",
            key.display(),
            library.module_id(),
            library.class_names()
        );
        libraries.insert(key, Arc::clone(&library));
        Ok(library)
    }

    /// Whether `path` has already been opened by this loader
    pub fn is_loaded(&self, path: &Path) -> bool {
        std::fs::canonicalize(path)
            .map(|key| self.libraries.lock().contains_key(&key))
            .unwrap_or(false)
    }

    /// Paths of all libraries opened so far
    pub fn loaded_libraries(&self) -> Vec<PathBuf> {
        self.libraries.lock().keys().cloned().collect()
    }
}

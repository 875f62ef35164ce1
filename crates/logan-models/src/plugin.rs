//! Host side of the plugin ABI: classes and instances living in a loaded library

use crate::class::ModelClass;
use crate::loader::LoadedLibrary;
use logan_core::abi::{ModelHandle, ModelVTable, STATUS_OK};
use logan_core::{
    ClassificationModel, ClassificationResult, Error, ModelKwargs, Operations, Result,
};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Arc;

/// A model class exported by a plugin library
pub struct ForeignClass {
    name: String,
    vtable: ModelVTable,
    library: Arc<LoadedLibrary>,
}

impl ForeignClass {
    pub(crate) fn new(name: String, vtable: ModelVTable, library: Arc<LoadedLibrary>) -> Self {
        Self {
            name,
            vtable,
            library,
        }
    }

    /// Module identity assigned to the library at load time
    pub fn module_id(&self) -> &str {
        self.library.module_id()
    }
}

impl ModelClass for ForeignClass {
    fn class_name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> Operations {
        self.vtable.operations()
    }

    fn instantiate(&self, kwargs: &ModelKwargs) -> Result<Box<dyn ClassificationModel>> {
        let create = self.vtable.create.ok_or_else(|| {
            Error::contract(format!("model class '{}' has no constructor", self.name))
        })?;

        let kwargs_json = to_c_string(serde_json::to_string(kwargs)?)?;
        let mut handle: ModelHandle = std::ptr::null_mut();
        let mut error: *mut c_char = std::ptr::null_mut();

        // SAFETY: the vtable comes from a library kept alive by `self.library`, and the
        // out-pointers are valid for writes for the duration of the call.
        let status = unsafe { create(kwargs_json.as_ptr(), &mut handle, &mut error) };
        if status != STATUS_OK || handle.is_null() {
            let message = self.take_string(error);
            return Err(Error::backend(format!(
                "failed to construct '{}': {}",
                self.name,
                message.unwrap_or_else(|| "constructor returned no instance".to_string())
            )));
        }

        tracing::debug!(
            class = %self.name,
            module = %self.library.module_id(),
            "Constructed plugin model"
        );

        Ok(Box::new(ForeignModel {
            name: self.name.clone(),
            handle,
            vtable: self.vtable,
            _library: Arc::clone(&self.library),
        }))
    }

    fn origin(&self) -> Option<&Path> {
        Some(self.library.path())
    }
}

impl ForeignClass {
    fn take_string(&self, ptr: *mut c_char) -> Option<String> {
        // SAFETY: `ptr` is null or a string allocated by this plugin.
        unsafe { take_plugin_string(&self.vtable, ptr) }
    }
}

/// A model instance owned by a plugin library
pub struct ForeignModel {
    name: String,
    handle: ModelHandle,
    vtable: ModelVTable,
    _library: Arc<LoadedLibrary>,
}

// SAFETY: the handle is only ever used through `&mut self` or `&self` by a single caller at a
// time (the contract is not `Sync`), and plugin instances are not tied to the creating thread.
unsafe impl Send for ForeignModel {}

impl ForeignModel {
    fn classify_via(
        &self,
        operation: &str,
        slot: Option<logan_core::abi::ClassifyFn>,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        let classify = slot.ok_or_else(|| {
            Error::contract(format!("model '{}' does not provide {}", self.name, operation))
        })?;

        let texts_json = to_c_string(serde_json::to_string(texts)?)?;
        let mut out: *mut c_char = std::ptr::null_mut();

        // SAFETY: `handle` was produced by this vtable's `create` and is still alive.
        let status = unsafe { classify(self.handle, texts_json.as_ptr(), batch_size, &mut out) };
        // SAFETY: `out` is null or a string allocated by this plugin.
        let payload = unsafe { take_plugin_string(&self.vtable, out) };

        if status != STATUS_OK {
            return Err(Error::backend(format!(
                "{} failed in '{}': {}",
                operation,
                self.name,
                payload.unwrap_or_else(|| "no error message".to_string())
            )));
        }

        let payload = payload.ok_or_else(|| {
            Error::contract(format!("'{}' returned no result for {}", self.name, operation))
        })?;
        serde_json::from_str(&payload).map_err(|e| {
            Error::contract(format!(
                "'{}' returned malformed {} results: {}",
                self.name, operation, e
            ))
        })
    }
}

impl ClassificationModel for ForeignModel {
    fn init_model(&mut self) -> Result<()> {
        let init = self.vtable.init_model.ok_or_else(|| {
            Error::contract(format!("model '{}' does not provide init_model", self.name))
        })?;

        let mut error: *mut c_char = std::ptr::null_mut();
        // SAFETY: `handle` is alive and exclusively borrowed.
        let status = unsafe { init(self.handle, &mut error) };
        // SAFETY: `error` is null or a string allocated by this plugin.
        let message = unsafe { take_plugin_string(&self.vtable, error) };

        if status != STATUS_OK {
            return Err(Error::backend(format!(
                "init_model failed in '{}': {}",
                self.name,
                message.unwrap_or_else(|| "no error message".to_string())
            )));
        }
        Ok(())
    }

    fn classify_golden_signal(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        self.classify_via(
            "classify_golden_signal",
            self.vtable.classify_golden_signal,
            texts,
            batch_size,
        )
    }

    fn classify_fault_category(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        self.classify_via(
            "classify_fault_category",
            self.vtable.classify_fault_category,
            texts,
            batch_size,
        )
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> Operations {
        self.vtable.operations()
    }
}

impl Drop for ForeignModel {
    fn drop(&mut self) {
        if let Some(destroy) = self.vtable.destroy {
            // SAFETY: the handle is dropped exactly once, while the library is still loaded.
            unsafe { destroy(self.handle) };
        }
    }
}

fn to_c_string(json: String) -> Result<CString> {
    CString::new(json).map_err(|e| Error::config(format!("argument contains NUL byte: {}", e)))
}

/// Copy a plugin-allocated string and hand it back to the plugin for release.
///
/// # Safety
/// `ptr` must be null or a NUL-terminated string allocated by the library owning `vtable`.
unsafe fn take_plugin_string(vtable: &ModelVTable, ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let value = CStr::from_ptr(ptr).to_string_lossy().into_owned();
    if let Some(free) = vtable.free_string {
        free(ptr);
    }
    Some(value)
}

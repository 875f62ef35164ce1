//! Stable C ABI between the model loader and plugin libraries.
//!
//! A plugin is a `cdylib` exporting one function, [`DECLARATION_SYMBOL`], that returns a
//! [`PluginDeclaration`]. The declaration lists the exported items; model classes carry a
//! [`ModelVTable`] of nullable `extern "C"` slots. Texts, constructor arguments and results
//! cross the boundary as UTF-8 JSON. Strings produced by the plugin are released through its
//! own `free_string` slot so each side frees with the allocator that allocated.
//!
//! Plugin authors do not touch these types directly; they use [`export_models!`](crate::export_models).

use crate::contract::{ClassificationModel, FromKwargs, ModelKwargs};
use crate::types::{ClassificationResult, Task};
use std::ffi::{c_void, CStr, CString};
use std::marker::PhantomData;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Bumped whenever the layout of any type in this module changes
pub const ABI_VERSION: u32 = 1;

/// Version of logan-core the plugin was built against (NUL-terminated)
pub const CORE_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Name of the exported declaration function (NUL-terminated)
pub const DECLARATION_SYMBOL: &[u8] = b"logan_plugin_declaration\0";

/// Export kind of an item that is not a model class
pub const EXPORT_OTHER: u32 = 0;

/// Export kind of a model class
pub const EXPORT_MODEL_CLASS: u32 = 1;

pub const STATUS_OK: i32 = 0;
pub const STATUS_ERROR: i32 = 1;

/// Opaque pointer to a plugin-owned model instance
pub type ModelHandle = *mut c_void;

/// Signature of the exported declaration function
pub type DeclarationFn = unsafe extern "C" fn() -> PluginDeclaration;

pub type CreateFn = unsafe extern "C" fn(
    kwargs_json: *const c_char,
    out_handle: *mut ModelHandle,
    out_error: *mut *mut c_char,
) -> i32;

pub type DestroyFn = unsafe extern "C" fn(handle: ModelHandle);

pub type InitFn = unsafe extern "C" fn(handle: ModelHandle, out_error: *mut *mut c_char) -> i32;

/// On success `out_json` receives the results array, on failure the error message
pub type ClassifyFn = unsafe extern "C" fn(
    handle: ModelHandle,
    texts_json: *const c_char,
    batch_size: usize,
    out_json: *mut *mut c_char,
) -> i32;

pub type FreeStringFn = unsafe extern "C" fn(s: *mut c_char);

/// Everything a plugin library exports
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PluginDeclaration {
    pub abi_version: u32,
    pub core_version: *const c_char,
    pub exports: *const ExportDescriptor,
    pub export_count: usize,
}

impl PluginDeclaration {
    /// Declaration for a static export table
    pub const fn new(exports: &'static [ExportDescriptor]) -> Self {
        Self {
            abi_version: ABI_VERSION,
            core_version: CORE_VERSION.as_ptr() as *const c_char,
            exports: exports.as_ptr(),
            export_count: exports.len(),
        }
    }

    /// View the export table.
    ///
    /// # Safety
    /// `exports` must point to `export_count` valid descriptors that outlive `'a`.
    pub unsafe fn exports<'a>(&self) -> &'a [ExportDescriptor] {
        if self.exports.is_null() || self.export_count == 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.exports, self.export_count)
    }

    /// Core version string, if present and valid UTF-8.
    ///
    /// # Safety
    /// `core_version` must be null or a valid NUL-terminated string.
    pub unsafe fn core_version(&self) -> Option<&str> {
        if self.core_version.is_null() {
            return None;
        }
        CStr::from_ptr(self.core_version).to_str().ok()
    }
}

/// One exported item
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExportDescriptor {
    pub name: *const c_char,
    pub kind: u32,
    pub vtable: *const ModelVTable,
}

impl ExportDescriptor {
    /// Export name, lossily decoded.
    ///
    /// # Safety
    /// `name` must be null or a valid NUL-terminated string.
    pub unsafe fn name(&self) -> String {
        if self.name.is_null() {
            return String::new();
        }
        CStr::from_ptr(self.name).to_string_lossy().into_owned()
    }

    /// True when this export is a model class with a vtable
    pub fn is_model_class(&self) -> bool {
        self.kind == EXPORT_MODEL_CLASS && !self.vtable.is_null()
    }
}

/// Function table of one model class
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ModelVTable {
    pub create: Option<CreateFn>,
    pub destroy: Option<DestroyFn>,
    pub init_model: Option<InitFn>,
    pub classify_golden_signal: Option<ClassifyFn>,
    pub classify_fault_category: Option<ClassifyFn>,
    pub free_string: Option<FreeStringFn>,
}

impl ModelVTable {
    /// Names of required lifecycle slots (`create`, `destroy`, `free_string`) left empty
    pub fn missing_lifecycle(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.create.is_none() {
            missing.push("create");
        }
        if self.destroy.is_none() {
            missing.push("destroy");
        }
        if self.free_string.is_none() {
            missing.push("free_string");
        }
        missing
    }

    /// Contract operations this table fills
    pub fn operations(&self) -> crate::contract::Operations {
        use crate::contract::Operations;

        let mut ops = Operations::NONE;
        if self.init_model.is_some() {
            ops = ops | Operations::INIT_MODEL;
        }
        if self.classify_golden_signal.is_some() {
            ops = ops | Operations::CLASSIFY_GOLDEN_SIGNAL;
        }
        if self.classify_fault_category.is_some() {
            ops = ops | Operations::CLASSIFY_FAULT_CATEGORY;
        }
        ops
    }
}

/// Vtable of a native model type, built at compile time
pub struct VTableFor<T>(PhantomData<T>);

impl<T> VTableFor<T>
where
    T: ClassificationModel + FromKwargs + 'static,
{
    pub const VTABLE: ModelVTable = ModelVTable {
        create: Some(create_shim::<T> as CreateFn),
        destroy: Some(destroy_shim::<T> as DestroyFn),
        init_model: Some(init_shim::<T> as InitFn),
        classify_golden_signal: Some(golden_signal_shim::<T> as ClassifyFn),
        classify_fault_category: Some(fault_category_shim::<T> as ClassifyFn),
        free_string: Some(free_string as FreeStringFn),
    };
}

/// Generate the plugin entry point for a set of model types.
///
/// Each type must implement [`ClassificationModel`](crate::ClassificationModel) and
/// [`FromKwargs`](crate::FromKwargs).
///
/// ```ignore
/// logan_core::export_models! {
///     "KeywordModel" => KeywordModel,
/// }
/// ```
#[macro_export]
macro_rules! export_models {
    ($($name:literal => $model:ty),+ $(,)?) => {
        /// Entry point read by the logan plugin loader
        #[no_mangle]
        pub extern "C" fn logan_plugin_declaration() -> $crate::abi::PluginDeclaration {
            const EXPORTS: &[$crate::abi::ExportDescriptor] = &[
                $(
                    $crate::abi::ExportDescriptor {
                        name: concat!($name, "\0").as_ptr() as *const ::std::os::raw::c_char,
                        kind: $crate::abi::EXPORT_MODEL_CLASS,
                        vtable: &$crate::abi::VTableFor::<$model>::VTABLE
                            as *const $crate::abi::ModelVTable,
                    },
                )+
            ];
            $crate::abi::PluginDeclaration::new(EXPORTS)
        }
    };
}

/// Convert a message into a C string owned by this side of the boundary
fn into_c_string(message: impl Into<String>) -> *mut c_char {
    let message = message.into().replace('\0', " ");
    CString::new(message)
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("plugin panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("plugin panicked: {}", s)
    } else {
        "plugin panicked".to_string()
    }
}

/// Run `f`, converting both errors and panics into a message
fn guarded<R>(f: impl FnOnce() -> crate::Result<R>) -> Result<R, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload)),
    }
}

unsafe fn read_json<V: serde::de::DeserializeOwned>(ptr: *const c_char) -> crate::Result<V> {
    if ptr.is_null() {
        return Err(crate::Error::contract("null JSON argument"));
    }
    let raw = CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| crate::Error::contract(format!("argument is not UTF-8: {}", e)))?;
    Ok(serde_json::from_str(raw)?)
}

unsafe extern "C" fn create_shim<T>(
    kwargs_json: *const c_char,
    out_handle: *mut ModelHandle,
    out_error: *mut *mut c_char,
) -> i32
where
    T: ClassificationModel + FromKwargs + 'static,
{
    let created = guarded(|| {
        let kwargs: ModelKwargs = read_json(kwargs_json)?;
        T::from_kwargs(&kwargs)
    });

    match created {
        Ok(model) => {
            *out_handle = Box::into_raw(Box::new(model)) as ModelHandle;
            STATUS_OK
        }
        Err(message) => {
            *out_error = into_c_string(message);
            STATUS_ERROR
        }
    }
}

unsafe extern "C" fn destroy_shim<T>(handle: ModelHandle)
where
    T: ClassificationModel + FromKwargs + 'static,
{
    if !handle.is_null() {
        drop(Box::from_raw(handle as *mut T));
    }
}

unsafe extern "C" fn init_shim<T>(handle: ModelHandle, out_error: *mut *mut c_char) -> i32
where
    T: ClassificationModel + FromKwargs + 'static,
{
    let model = &mut *(handle as *mut T);
    match guarded(|| model.init_model()) {
        Ok(()) => STATUS_OK,
        Err(message) => {
            *out_error = into_c_string(message);
            STATUS_ERROR
        }
    }
}

unsafe fn classify_shim<T>(
    task: Task,
    handle: ModelHandle,
    texts_json: *const c_char,
    batch_size: usize,
    out_json: *mut *mut c_char,
) -> i32
where
    T: ClassificationModel + FromKwargs + 'static,
{
    let model = &*(handle as *const T);
    let classified = guarded(|| {
        let texts: Vec<String> = read_json(texts_json)?;
        let results: Vec<ClassificationResult> = model.classify(task, &texts, batch_size)?;
        Ok(serde_json::to_string(&results)?)
    });

    match classified {
        Ok(json) => {
            *out_json = into_c_string(json);
            STATUS_OK
        }
        Err(message) => {
            *out_json = into_c_string(message);
            STATUS_ERROR
        }
    }
}

unsafe extern "C" fn golden_signal_shim<T>(
    handle: ModelHandle,
    texts_json: *const c_char,
    batch_size: usize,
    out_json: *mut *mut c_char,
) -> i32
where
    T: ClassificationModel + FromKwargs + 'static,
{
    classify_shim::<T>(Task::GoldenSignal, handle, texts_json, batch_size, out_json)
}

unsafe extern "C" fn fault_category_shim<T>(
    handle: ModelHandle,
    texts_json: *const c_char,
    batch_size: usize,
    out_json: *mut *mut c_char,
) -> i32
where
    T: ClassificationModel + FromKwargs + 'static,
{
    classify_shim::<T>(Task::FaultCategory, handle, texts_json, batch_size, out_json)
}

unsafe extern "C" fn free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    struct Echo {
        initialized: bool,
    }

    impl FromKwargs for Echo {
        fn from_kwargs(kwargs: &ModelKwargs) -> Result<Self> {
            if kwargs.contains_key("fail") {
                return Err(crate::Error::config("asked to fail"));
            }
            Ok(Self { initialized: false })
        }
    }

    impl ClassificationModel for Echo {
        fn init_model(&mut self) -> Result<()> {
            self.initialized = true;
            Ok(())
        }

        fn classify_golden_signal(
            &self,
            texts: &[String],
            _batch_size: usize,
        ) -> Result<Vec<ClassificationResult>> {
            if !self.initialized {
                return Err(crate::Error::backend("not initialised"));
            }
            Ok(texts
                .iter()
                .map(|_| ClassificationResult::single("information", 1.0))
                .collect())
        }

        fn classify_fault_category(
            &self,
            texts: &[String],
            _batch_size: usize,
        ) -> Result<Vec<ClassificationResult>> {
            Ok(texts.iter().map(|_| ClassificationResult::empty()).collect())
        }
    }

    unsafe fn take_string(vtable: &ModelVTable, ptr: *mut c_char) -> String {
        let s = CStr::from_ptr(ptr).to_string_lossy().into_owned();
        (vtable.free_string.unwrap())(ptr);
        s
    }

    #[test]
    fn test_vtable_is_complete() {
        let vtable = VTableFor::<Echo>::VTABLE;
        assert!(vtable.missing_lifecycle().is_empty());
        assert!(vtable.operations().is_complete());
    }

    #[test]
    fn test_shims_round_trip_through_json() {
        let vtable = VTableFor::<Echo>::VTABLE;
        let kwargs = CString::new("{}").unwrap();
        let texts = CString::new(r#"["a","b"]"#).unwrap();

        unsafe {
            let mut handle: ModelHandle = std::ptr::null_mut();
            let mut error: *mut c_char = std::ptr::null_mut();
            let status = (vtable.create.unwrap())(kwargs.as_ptr(), &mut handle, &mut error);
            assert_eq!(status, STATUS_OK);
            assert!(!handle.is_null());

            // classify before init reports the model's own error
            let mut out: *mut c_char = std::ptr::null_mut();
            let status =
                (vtable.classify_golden_signal.unwrap())(handle, texts.as_ptr(), 8, &mut out);
            assert_eq!(status, STATUS_ERROR);
            assert!(take_string(&vtable, out).contains("not initialised"));

            assert_eq!((vtable.init_model.unwrap())(handle, &mut error), STATUS_OK);

            let status =
                (vtable.classify_golden_signal.unwrap())(handle, texts.as_ptr(), 8, &mut out);
            assert_eq!(status, STATUS_OK);
            let results: Vec<ClassificationResult> =
                serde_json::from_str(&take_string(&vtable, out)).unwrap();
            assert_eq!(results.len(), 2);
            assert_eq!(results[0].labels, vec!["information"]);

            (vtable.destroy.unwrap())(handle);
        }
    }

    #[test]
    fn test_create_reports_constructor_errors() {
        let vtable = VTableFor::<Echo>::VTABLE;
        let kwargs = CString::new(r#"{"fail": true}"#).unwrap();

        unsafe {
            let mut handle: ModelHandle = std::ptr::null_mut();
            let mut error: *mut c_char = std::ptr::null_mut();
            let status = (vtable.create.unwrap())(kwargs.as_ptr(), &mut handle, &mut error);
            assert_eq!(status, STATUS_ERROR);
            assert!(handle.is_null());
            assert!(take_string(&vtable, error).contains("asked to fail"));
        }
    }

    #[test]
    fn test_declaration_lists_exports() {
        const EXPORTS: &[ExportDescriptor] = &[
            ExportDescriptor {
                name: b"Echo\0".as_ptr() as *const c_char,
                kind: EXPORT_MODEL_CLASS,
                vtable: &VTableFor::<Echo>::VTABLE as *const ModelVTable,
            },
            ExportDescriptor {
                name: b"VERSION\0".as_ptr() as *const c_char,
                kind: EXPORT_OTHER,
                vtable: std::ptr::null(),
            },
        ];

        let declaration = PluginDeclaration::new(EXPORTS);
        assert_eq!(declaration.abi_version, ABI_VERSION);

        unsafe {
            let exports = declaration.exports();
            assert_eq!(exports.len(), 2);
            assert_eq!(exports[0].name(), "Echo");
            assert!(exports[0].is_model_class());
            assert!(!exports[1].is_model_class());
            assert_eq!(declaration.core_version(), Some(env!("CARGO_PKG_VERSION")));
        }
    }
}

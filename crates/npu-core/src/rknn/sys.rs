//! Raw surface of `librknnrt.so`, resolved at runtime.
//!
//! The library is opened once with `libloading` and the handle is leaked so
//! the resolved symbols stay valid for the life of the process. Loading at
//! runtime (rather than linking) keeps the crate buildable and unit-testable
//! on hosts without the vendor runtime installed.

#![allow(non_camel_case_types)]

use std::{
    ffi::{c_char, c_int, c_void},
    sync::OnceLock,
};

use libloading::Library;
use tracing::info;

pub const RKNN_SUCC: c_int = 0;

pub const RKNN_MAX_DIMS: usize = 16;
pub const RKNN_MAX_NAME_LEN: usize = 256;

pub const RKNN_QUERY_IN_OUT_NUM: u32 = 0;
pub const RKNN_QUERY_INPUT_ATTR: u32 = 1;
pub const RKNN_QUERY_OUTPUT_ATTR: u32 = 2;

pub const RKNN_TENSOR_UINT8: u32 = 3;
pub const RKNN_TENSOR_NHWC: u32 = 1;

pub type rknn_context = u64;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct rknn_input_output_num {
    pub n_input: u32,
    pub n_output: u32,
}

#[repr(C)]
pub struct rknn_tensor_attr {
    pub index: u32,
    pub n_dims: u32,
    pub dims: [u32; RKNN_MAX_DIMS],
    pub name: [c_char; RKNN_MAX_NAME_LEN],
    pub n_elems: u32,
    pub size: u32,
    pub fmt: u32,
    pub type_: u32,
    pub qnt_type: u32,
    pub fl: i8,
    pub zp: i32,
    pub scale: f32,
    pub w_stride: u32,
    pub size_with_stride: u32,
    pub pass_through: u8,
    pub h_stride: u32,
}

impl Default for rknn_tensor_attr {
    fn default() -> Self {
        // Large C struct; zeroed is the documented initial state.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
pub struct rknn_input {
    pub index: u32,
    pub buf: *mut c_void,
    pub size: u32,
    pub pass_through: u8,
    pub type_: u32,
    pub fmt: u32,
}

#[repr(C)]
pub struct rknn_output {
    pub want_float: u8,
    pub is_prealloc: u8,
    pub index: u32,
    pub buf: *mut c_void,
    pub size: u32,
}

impl Default for rknn_output {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

type InitFn = unsafe extern "C" fn(*mut rknn_context, *mut c_void, u32, u32, *mut c_void) -> c_int;
type DestroyFn = unsafe extern "C" fn(rknn_context) -> c_int;
type QueryFn = unsafe extern "C" fn(rknn_context, u32, *mut c_void, u32) -> c_int;
type InputsSetFn = unsafe extern "C" fn(rknn_context, u32, *mut rknn_input) -> c_int;
type RunFn = unsafe extern "C" fn(rknn_context, *mut c_void) -> c_int;
type OutputsGetFn = unsafe extern "C" fn(rknn_context, u32, *mut rknn_output, *mut c_void) -> c_int;
type OutputsReleaseFn = unsafe extern "C" fn(rknn_context, u32, *mut rknn_output) -> c_int;
type SetCoreMaskFn = unsafe extern "C" fn(rknn_context, u32) -> c_int;

/// Resolved entry points of the vendor runtime.
pub struct RknnApi {
    pub init: InitFn,
    pub destroy: DestroyFn,
    pub query: QueryFn,
    pub inputs_set: InputsSetFn,
    pub run: RunFn,
    pub outputs_get: OutputsGetFn,
    pub outputs_release: OutputsReleaseFn,
    pub set_core_mask: SetCoreMaskFn,
}

const RUNTIME_LIBS: [&str; 2] = ["librknnrt.so", "librknn_api.so"];

/// Load and memoise the vendor runtime. Every context created afterwards
/// shares the same resolved symbols.
pub fn api() -> Result<&'static RknnApi, String> {
    static API: OnceLock<Result<RknnApi, String>> = OnceLock::new();
    API.get_or_init(load).as_ref().map_err(Clone::clone)
}

fn load() -> Result<RknnApi, String> {
    let mut last_err = String::new();
    for name in RUNTIME_LIBS {
        match unsafe { Library::new(name) } {
            Ok(lib) => {
                let api = unsafe { resolve(&lib) }?;
                info!("loaded NPU runtime {name}");
                // Symbols must outlive every context; the library handle is
                // intentionally leaked, as with any process-lifetime runtime.
                std::mem::forget(lib);
                return Ok(api);
            }
            Err(err) => last_err = format!("{name}: {err}"),
        }
    }
    Err(last_err)
}

unsafe fn resolve(lib: &Library) -> Result<RknnApi, String> {
    unsafe {
        macro_rules! sym {
            ($name:literal) => {
                *lib.get($name)
                    .map_err(|e| format!("missing symbol {}: {e}", String::from_utf8_lossy($name)))?
            };
        }
        Ok(RknnApi {
            init: sym!(b"rknn_init"),
            destroy: sym!(b"rknn_destroy"),
            query: sym!(b"rknn_query"),
            inputs_set: sym!(b"rknn_inputs_set"),
            run: sym!(b"rknn_run"),
            outputs_get: sym!(b"rknn_outputs_get"),
            outputs_release: sym!(b"rknn_outputs_release"),
            set_core_mask: sym!(b"rknn_set_core_mask"),
        })
    }
}

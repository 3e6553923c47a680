//! Safe wrapper around one RKNN model context.

pub mod sys;

use std::{ffi::c_void, path::Path};

use tracing::{debug, info};

use crate::{NpuCore, NpuError};

/// Shape and quantisation metadata of one model tensor.
#[derive(Clone, Debug)]
pub struct TensorInfo {
    pub dims: Vec<u32>,
    pub zp: i32,
    pub scale: f32,
}

/// One float output tensor copied out of the runtime.
pub struct OutputTensor {
    pub data: Vec<f32>,
    pub dims: Vec<u32>,
}

/// One instance of a loaded model bound to one accelerator core.
///
/// Contexts are exclusive resources: there is exactly one per (task, core)
/// pair, they are never cloned, and the handle is destroyed on drop.
pub struct RknnContext {
    api: &'static sys::RknnApi,
    handle: sys::rknn_context,
    input: TensorInfo,
    outputs: Vec<TensorInfo>,
}

// The raw handle is only ever used from the owning worker thread.
unsafe impl Send for RknnContext {}

impl RknnContext {
    /// Load a model file into a fresh runtime context.
    pub fn from_file(path: &Path) -> Result<Self, NpuError> {
        let model = std::fs::read(path).map_err(|source| NpuError::ModelRead {
            path: path.display().to_string(),
            source,
        })?;
        debug!(
            "read model {} ({:.2} MiB)",
            path.display(),
            model.len() as f64 / (1024.0 * 1024.0)
        );
        Self::from_bytes(&model)
    }

    fn from_bytes(model: &[u8]) -> Result<Self, NpuError> {
        let api = sys::api().map_err(NpuError::RuntimeUnavailable)?;

        let mut handle: sys::rknn_context = 0;
        let code = unsafe {
            (api.init)(
                &mut handle,
                model.as_ptr() as *mut c_void,
                model.len() as u32,
                0,
                std::ptr::null_mut(),
            )
        };
        if code != sys::RKNN_SUCC {
            return Err(NpuError::Runtime {
                op: "rknn_init",
                code,
            });
        }

        let mut ctx = Self {
            api,
            handle,
            input: TensorInfo {
                dims: Vec::new(),
                zp: 0,
                scale: 1.0,
            },
            outputs: Vec::new(),
        };

        let io = ctx.query_io_num()?;
        if io.n_input != 1 {
            return Err(NpuError::UnsupportedModel(format!(
                "expected 1 input tensor, model has {}",
                io.n_input
            )));
        }
        ctx.input = ctx.query_attr(sys::RKNN_QUERY_INPUT_ATTR, 0)?;
        for index in 0..io.n_output {
            let attr = ctx.query_attr(sys::RKNN_QUERY_OUTPUT_ATTR, index)?;
            ctx.outputs.push(attr);
        }
        info!(
            "model context ready: input dims {:?}, {} outputs",
            ctx.input.dims,
            ctx.outputs.len()
        );
        Ok(ctx)
    }

    fn query_io_num(&self) -> Result<sys::rknn_input_output_num, NpuError> {
        let mut io = sys::rknn_input_output_num::default();
        let code = unsafe {
            (self.api.query)(
                self.handle,
                sys::RKNN_QUERY_IN_OUT_NUM,
                &mut io as *mut _ as *mut c_void,
                std::mem::size_of::<sys::rknn_input_output_num>() as u32,
            )
        };
        if code != sys::RKNN_SUCC {
            return Err(NpuError::Runtime {
                op: "rknn_query(io_num)",
                code,
            });
        }
        Ok(io)
    }

    fn query_attr(&self, cmd: u32, index: u32) -> Result<TensorInfo, NpuError> {
        let mut attr = sys::rknn_tensor_attr {
            index,
            ..Default::default()
        };
        let code = unsafe {
            (self.api.query)(
                self.handle,
                cmd,
                &mut attr as *mut _ as *mut c_void,
                std::mem::size_of::<sys::rknn_tensor_attr>() as u32,
            )
        };
        if code != sys::RKNN_SUCC {
            return Err(NpuError::Runtime {
                op: "rknn_query(tensor_attr)",
                code,
            });
        }
        Ok(TensorInfo {
            dims: attr.dims[..attr.n_dims as usize].to_vec(),
            zp: attr.zp,
            scale: attr.scale,
        })
    }

    /// Pin this context to one accelerator core.
    pub fn bind_core(&mut self, core: NpuCore) -> Result<(), NpuError> {
        let code = unsafe { (self.api.set_core_mask)(self.handle, core.mask()) };
        if code != sys::RKNN_SUCC {
            return Err(NpuError::Runtime {
                op: "rknn_set_core_mask",
                code,
            });
        }
        debug!("context bound to NPU core mask {:#x}", core.mask());
        Ok(())
    }

    /// Model input geometry as (width, height), assuming the usual NHWC
    /// `[1, h, w, c]` layout.
    pub fn input_size(&self) -> Result<(usize, usize), NpuError> {
        match self.input.dims.as_slice() {
            [1, h, w, _c] => Ok((*w as usize, *h as usize)),
            dims => Err(NpuError::UnsupportedModel(format!(
                "unexpected input layout {dims:?}"
            ))),
        }
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Feed one packed RGB888 buffer of the model's input geometry through
    /// the network and copy every output back as floats.
    pub fn run_rgb888(&mut self, pixels: &[u8]) -> Result<Vec<OutputTensor>, NpuError> {
        let mut input = sys::rknn_input {
            index: 0,
            buf: pixels.as_ptr() as *mut c_void,
            size: pixels.len() as u32,
            pass_through: 0,
            type_: sys::RKNN_TENSOR_UINT8,
            fmt: sys::RKNN_TENSOR_NHWC,
        };
        let code = unsafe { (self.api.inputs_set)(self.handle, 1, &mut input) };
        if code != sys::RKNN_SUCC {
            return Err(NpuError::Infer(code));
        }

        let code = unsafe { (self.api.run)(self.handle, std::ptr::null_mut()) };
        if code != sys::RKNN_SUCC {
            return Err(NpuError::Infer(code));
        }

        let n = self.outputs.len() as u32;
        let mut raw: Vec<sys::rknn_output> = (0..n)
            .map(|index| sys::rknn_output {
                want_float: 1,
                index,
                ..Default::default()
            })
            .collect();
        let code =
            unsafe { (self.api.outputs_get)(self.handle, n, raw.as_mut_ptr(), std::ptr::null_mut()) };
        if code != sys::RKNN_SUCC {
            return Err(NpuError::Infer(code));
        }

        let mut tensors = Vec::with_capacity(raw.len());
        for (out, info) in raw.iter().zip(&self.outputs) {
            let floats = out.size as usize / std::mem::size_of::<f32>();
            let mut data = vec![0f32; floats];
            unsafe {
                std::ptr::copy_nonoverlapping(out.buf as *const f32, data.as_mut_ptr(), floats);
            }
            tensors.push(OutputTensor {
                data,
                dims: info.dims.clone(),
            });
        }
        unsafe { (self.api.outputs_release)(self.handle, n, raw.as_mut_ptr()) };
        Ok(tensors)
    }
}

impl Drop for RknnContext {
    fn drop(&mut self) {
        unsafe {
            (self.api.destroy)(self.handle);
        }
    }
}

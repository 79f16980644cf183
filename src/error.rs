//! Errors raised while driving the OpenCL runtime.
//!
//! Every raw call returns a status code; [`check`] turns a non-success
//! code into a [`ClError`] tagged with the name of the failing call.

use std::path::PathBuf;

use cl_sys::cl_int;

#[derive(Debug, thiserror::Error)]
pub enum ClError {
    /// A raw OpenCL call returned a non-success status.
    #[error("OpenCL error at {call}: {code} ({name})")]
    Call {
        call: &'static str,
        code: cl_int,
        name: &'static str,
    },

    /// `clBuildProgram` failed. The device build log is kept for display.
    #[error("OpenCL error at clBuildProgram: {code} ({name})")]
    Build {
        code: cl_int,
        name: &'static str,
        log: String,
    },

    #[error("Failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `clSetKernelArg` failed for the argument at `index`.
    #[error("OpenCL error at clSetKernelArg {index}: {code} ({name})")]
    Arg {
        index: u32,
        code: cl_int,
        name: &'static str,
    },

    /// The requested platform does not exist; reported as `CL_INVALID_PLATFORM`.
    #[error(
        "OpenCL error at clGetPlatformIDs: {} (CL_INVALID_PLATFORM): platform index {index} out of range ({count} available)",
        cl_sys::CL_INVALID_PLATFORM
    )]
    PlatformIndex { index: usize, count: usize },

    #[error("kernel not registered: {0}")]
    UnknownKernel(String),

    #[error("buffer not registered with this environment")]
    UnknownBuffer,

    #[error("buffer of {size} bytes is not a whole number of {elem}-byte elements")]
    TypeMismatch { size: usize, elem: usize },

    #[error("name contains an interior NUL byte: {0:?}")]
    InvalidName(String),
}

impl ClError {
    pub fn call(call: &'static str, code: cl_int) -> ClError {
        ClError::Call {
            call,
            code,
            name: status_name(code),
        }
    }

    pub fn arg(index: u32, code: cl_int) -> ClError {
        ClError::Arg {
            index,
            code,
            name: status_name(code),
        }
    }

    /// The device build log, when the error comes from a failed build.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            ClError::Build { log, .. } => Some(log),
            _ => None,
        }
    }
}

/// Maps an OpenCL status to `Ok(())` or to a [`ClError::Call`] naming `call`.
pub fn check(call: &'static str, status: cl_int) -> Result<(), ClError> {
    if status == cl_sys::CL_SUCCESS {
        Ok(())
    } else {
        Err(ClError::call(call, status))
    }
}

pub fn status_name(code: cl_int) -> &'static str {
    match code {
        cl_sys::CL_SUCCESS => "CL_SUCCESS",
        cl_sys::CL_DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
        cl_sys::CL_DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
        cl_sys::CL_COMPILER_NOT_AVAILABLE => "CL_COMPILER_NOT_AVAILABLE",
        cl_sys::CL_MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        cl_sys::CL_OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
        cl_sys::CL_OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
        cl_sys::CL_PROFILING_INFO_NOT_AVAILABLE => "CL_PROFILING_INFO_NOT_AVAILABLE",
        cl_sys::CL_MEM_COPY_OVERLAP => "CL_MEM_COPY_OVERLAP",
        cl_sys::CL_BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
        cl_sys::CL_MAP_FAILURE => "CL_MAP_FAILURE",
        cl_sys::CL_MISALIGNED_SUB_BUFFER_OFFSET => "CL_MISALIGNED_SUB_BUFFER_OFFSET",
        cl_sys::CL_COMPILE_PROGRAM_FAILURE => "CL_COMPILE_PROGRAM_FAILURE",
        cl_sys::CL_LINKER_NOT_AVAILABLE => "CL_LINKER_NOT_AVAILABLE",
        cl_sys::CL_LINK_PROGRAM_FAILURE => "CL_LINK_PROGRAM_FAILURE",
        cl_sys::CL_KERNEL_ARG_INFO_NOT_AVAILABLE => "CL_KERNEL_ARG_INFO_NOT_AVAILABLE",
        cl_sys::CL_INVALID_VALUE => "CL_INVALID_VALUE",
        cl_sys::CL_INVALID_DEVICE_TYPE => "CL_INVALID_DEVICE_TYPE",
        cl_sys::CL_INVALID_PLATFORM => "CL_INVALID_PLATFORM",
        cl_sys::CL_INVALID_DEVICE => "CL_INVALID_DEVICE",
        cl_sys::CL_INVALID_CONTEXT => "CL_INVALID_CONTEXT",
        cl_sys::CL_INVALID_QUEUE_PROPERTIES => "CL_INVALID_QUEUE_PROPERTIES",
        cl_sys::CL_INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
        cl_sys::CL_INVALID_HOST_PTR => "CL_INVALID_HOST_PTR",
        cl_sys::CL_INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
        cl_sys::CL_INVALID_BINARY => "CL_INVALID_BINARY",
        cl_sys::CL_INVALID_BUILD_OPTIONS => "CL_INVALID_BUILD_OPTIONS",
        cl_sys::CL_INVALID_PROGRAM => "CL_INVALID_PROGRAM",
        cl_sys::CL_INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
        cl_sys::CL_INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
        cl_sys::CL_INVALID_KERNEL_DEFINITION => "CL_INVALID_KERNEL_DEFINITION",
        cl_sys::CL_INVALID_KERNEL => "CL_INVALID_KERNEL",
        cl_sys::CL_INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
        cl_sys::CL_INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
        cl_sys::CL_INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
        cl_sys::CL_INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
        cl_sys::CL_INVALID_WORK_DIMENSION => "CL_INVALID_WORK_DIMENSION",
        cl_sys::CL_INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
        cl_sys::CL_INVALID_WORK_ITEM_SIZE => "CL_INVALID_WORK_ITEM_SIZE",
        cl_sys::CL_INVALID_GLOBAL_OFFSET => "CL_INVALID_GLOBAL_OFFSET",
        cl_sys::CL_INVALID_EVENT_WAIT_LIST => "CL_INVALID_EVENT_WAIT_LIST",
        cl_sys::CL_INVALID_EVENT => "CL_INVALID_EVENT",
        cl_sys::CL_INVALID_OPERATION => "CL_INVALID_OPERATION",
        cl_sys::CL_INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
        cl_sys::CL_INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
        cl_sys::CL_INVALID_PROPERTY => "CL_INVALID_PROPERTY",
        cl_sys::CL_INVALID_COMPILER_OPTIONS => "CL_INVALID_COMPILER_OPTIONS",
        cl_sys::CL_INVALID_LINKER_OPTIONS => "CL_INVALID_LINKER_OPTIONS",
        cl_sys::CL_INVALID_DEVICE_QUEUE => "CL_INVALID_DEVICE_QUEUE",
        cl_sys::CL_PLATFORM_NOT_FOUND_KHR => "CL_PLATFORM_NOT_FOUND_KHR",
        _ => "UNKNOWN_ERROR",
    }
}

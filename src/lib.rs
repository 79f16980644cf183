//! Runs precompiled SPIR-V kernels on an OpenCL device and checks the
//! results against the host-side argument layout they were compiled for.
//!
//! All the OpenCL things (platform, device, context, queue, program,
//! kernels and buffers) are packed into a single [`Accel`] struct, which
//! releases them when dropped.
//!
//! # Examples
//! ```no_run
//! use spvprobe::{kernel_set_args_and_run, Accel, DevicePreference};
//!
//! let source = "__kernel void simple_add(__global int *v, int x){
//!     int i = get_global_id(0);
//!     v[i] += x;
//! }";
//! let mut cldev = Accel::from_source(source, 0, DevicePreference::Auto)?;
//!
//! // the used kernel has to be registered
//! let kname = "simple_add";
//! cldev.register_kernel(kname)?;
//!
//! // buffers shared with the device have to be registered too
//! let v = cldev.register_buffer(&[12i32; 64])?;
//! let x: i32 = 1000;
//!
//! kernel_set_args_and_run!(cldev, kname, 64, Some(16), v, x)?;
//! let v: Vec<i32> = cldev.read_buffer(v)?;
//! assert_eq!(v, vec![1012; 64]);
//! # Ok::<(), spvprobe::ClError>(())
//! ```

pub mod abi;
mod error;
pub mod launch;
pub mod spirv;

use std::collections::HashMap;
use std::ffi::CString;
use std::ptr;

use cl_sys::{
    c_void, cl_command_queue, cl_context, cl_device_id, cl_int, cl_kernel, cl_mem, cl_platform_id,
    cl_program, cl_uint,
};
use log::{debug, info, warn};

pub use abi::{Broadcasted, ClDeviceArray, IndexRange, OneTo, EACH_INDEX_KERNEL};
pub use error::{check, status_name, ClError};
pub use launch::{DevicePreference, LaunchConfig};

/// The OpenCL environment a kernel runs in.
///
/// Handles are created in order and released in reverse order on drop;
/// a partially built environment releases whatever it already holds.
#[derive(Debug)]
pub struct Accel {
    platform_name: String,
    device_name: String,
    context: cl_context,
    device: cl_device_id,
    program: cl_program,
    queue: cl_command_queue,
    kernels: HashMap<String, cl_kernel>,
    buffers: HashMap<cl_mem, usize>,
}

impl Accel {
    /// Builds an environment around a SPIR-V module.
    pub fn from_il(il: &[u8], numplat: usize, pref: DevicePreference) -> Result<Accel, ClError> {
        let mut accel = Accel::open(numplat, pref)?;
        let mut err: cl_int = 0;
        accel.program = unsafe {
            cl_sys::clCreateProgramWithIL(
                accel.context,
                il.as_ptr() as *const c_void,
                il.len(),
                &mut err,
            )
        };
        check("clCreateProgramWithIL", err)?;
        accel.build("")?;
        Ok(accel)
    }

    /// Builds an environment from OpenCL C source.
    pub fn from_source(source: &str, numplat: usize, pref: DevicePreference) -> Result<Accel, ClError> {
        let mut accel = Accel::open(numplat, pref)?;
        let source = CString::new(source).map_err(|_| ClError::InvalidName("<source>".into()))?;
        let mut err: cl_int = 0;
        accel.program = unsafe {
            cl_sys::clCreateProgramWithSource(
                accel.context,
                1,
                &source.as_ptr(),
                ptr::null(),
                &mut err,
            )
        };
        check("clCreateProgramWithSource", err)?;
        accel.build("-w")?;
        Ok(accel)
    }

    /// Platform, device, context and queue; no program yet.
    fn open(numplat: usize, pref: DevicePreference) -> Result<Accel, ClError> {
        let mut nb_platforms: cl_uint = 0;
        let err = unsafe { cl_sys::clGetPlatformIDs(0, ptr::null_mut(), &mut nb_platforms) };
        check_platform_count(err, nb_platforms)?;
        info!("Found {} platform(s)", nb_platforms);

        let mut platforms: Vec<cl_platform_id> = vec![ptr::null_mut(); nb_platforms as usize];
        let err = unsafe {
            cl_sys::clGetPlatformIDs(nb_platforms, platforms.as_mut_ptr(), ptr::null_mut())
        };
        check("clGetPlatformIDs", err)?;
        let platform = *platforms.get(numplat).ok_or(ClError::PlatformIndex {
            index: numplat,
            count: platforms.len(),
        })?;

        let platform_name = query_string("clGetPlatformInfo", |size, value, size_ret| unsafe {
            cl_sys::clGetPlatformInfo(platform, cl_sys::CL_PLATFORM_VENDOR, size, value, size_ret)
        })?;
        info!("Platform: {}", platform_name);

        let device = select_device(platform, pref)?;
        let device_name = query_string("clGetDeviceInfo", |size, value, size_ret| unsafe {
            cl_sys::clGetDeviceInfo(device, cl_sys::CL_DEVICE_NAME, size, value, size_ret)
        })?;
        info!("Device: {}", device_name);

        let mut accel = Accel {
            platform_name,
            device_name,
            context: ptr::null_mut(),
            device,
            program: ptr::null_mut(),
            queue: ptr::null_mut(),
            kernels: HashMap::new(),
            buffers: HashMap::new(),
        };

        let mut err: cl_int = 0;
        accel.context = unsafe {
            cl_sys::clCreateContext(ptr::null(), 1, &device, None, ptr::null_mut(), &mut err)
        };
        check("clCreateContext", err)?;

        #[allow(deprecated)]
        let queue = unsafe { cl_sys::clCreateCommandQueue(accel.context, device, 0, &mut err) };
        accel.queue = queue;
        check("clCreateCommandQueue", err)?;

        Ok(accel)
    }

    fn build(&mut self, options: &str) -> Result<(), ClError> {
        let opt = CString::new(options).map_err(|_| ClError::InvalidName(options.to_string()))?;
        let errb = unsafe {
            cl_sys::clBuildProgram(self.program, 1, &self.device, opt.as_ptr(), None, ptr::null_mut())
        };

        let log = match self.build_log() {
            Ok(log) => log,
            Err(e) => {
                warn!("could not fetch build log: {}", e);
                String::new()
            }
        };
        debug!("Size of build log: {}", log.len());
        if errb != cl_sys::CL_SUCCESS {
            return Err(ClError::Build {
                code: errb,
                name: status_name(errb),
                log,
            });
        }
        if !log.trim().is_empty() {
            debug!("Build messages:\n{}", log);
        }
        Ok(())
    }

    /// The device build log of the current program.
    pub fn build_log(&self) -> Result<String, ClError> {
        let (program, device) = (self.program, self.device);
        query_string("clGetProgramBuildInfo", |size, value, size_ret| unsafe {
            cl_sys::clGetProgramBuildInfo(program, device, cl_sys::CL_PROGRAM_BUILD_LOG, size, value, size_ret)
        })
    }

    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Registers a kernel, before it can be called.
    pub fn register_kernel(&mut self, name: &str) -> Result<(), ClError> {
        if self.kernels.contains_key(name) {
            debug!("Kernel {} already registered", name);
            return Ok(());
        }
        let cname = CString::new(name).map_err(|_| ClError::InvalidName(name.to_string()))?;
        let mut err: cl_int = 0;
        let kernel = unsafe { cl_sys::clCreateKernel(self.program, cname.as_ptr(), &mut err) };
        check("clCreateKernel", err)?;
        self.kernels.insert(name.to_string(), kernel);
        Ok(())
    }

    /// Creates a read/write device buffer initialised with a copy of `data`.
    /// The returned handle stays valid until the environment is dropped.
    pub fn register_buffer<T: Copy>(&mut self, data: &[T]) -> Result<cl_mem, ClError> {
        let size = std::mem::size_of_val(data);
        let mut err: cl_int = 0;
        let buffer = unsafe {
            cl_sys::clCreateBuffer(
                self.context,
                cl_sys::CL_MEM_READ_WRITE | cl_sys::CL_MEM_COPY_HOST_PTR,
                size,
                data.as_ptr() as *mut c_void,
                &mut err,
            )
        };
        check("clCreateBuffer", err)?;
        self.buffers.insert(buffer, size);
        Ok(buffer)
    }

    /// Creates an uninitialised read/write buffer holding `count` values of `T`.
    pub fn register_scratch<T>(&mut self, count: usize) -> Result<cl_mem, ClError> {
        let size = count * std::mem::size_of::<T>();
        let mut err: cl_int = 0;
        let buffer = unsafe {
            cl_sys::clCreateBuffer(
                self.context,
                cl_sys::CL_MEM_READ_WRITE,
                size,
                ptr::null_mut(),
                &mut err,
            )
        };
        check("clCreateBuffer", err)?;
        self.buffers.insert(buffer, size);
        Ok(buffer)
    }

    pub fn owns_buffer(&self, buffer: cl_mem) -> bool {
        self.buffers.contains_key(&buffer)
    }

    /// Blocking write of `data` at the start of `buffer`.
    pub fn write_buffer<T: Copy>(&self, buffer: cl_mem, data: &[T]) -> Result<(), ClError> {
        if !self.owns_buffer(buffer) {
            return Err(ClError::UnknownBuffer);
        }
        let err = unsafe {
            cl_sys::clEnqueueWriteBuffer(
                self.queue,
                buffer,
                cl_sys::CL_TRUE,
                0,
                std::mem::size_of_val(data),
                data.as_ptr() as *const c_void,
                0,
                ptr::null(),
                ptr::null_mut(),
            )
        };
        check("clEnqueueWriteBuffer", err)
    }

    /// Blocking read of the whole of `buffer` as values of `T`.
    pub fn read_buffer<T: Copy + Default>(&self, buffer: cl_mem) -> Result<Vec<T>, ClError> {
        let size = *self.buffers.get(&buffer).ok_or(ClError::UnknownBuffer)?;
        let elem = std::mem::size_of::<T>();
        if elem == 0 || size % elem != 0 {
            return Err(ClError::TypeMismatch { size, elem });
        }
        let mut v = vec![T::default(); size / elem];
        let err = unsafe {
            cl_sys::clEnqueueReadBuffer(
                self.queue,
                buffer,
                cl_sys::CL_TRUE,
                0,
                size,
                v.as_mut_ptr() as *mut c_void,
                0,
                ptr::null(),
                ptr::null_mut(),
            )
        };
        check("clEnqueueReadBuffer", err)?;
        Ok(v)
    }

    /// Defines kernel args value/location before kernel call.
    /// The args must implement the [`TrueArg`] trait, which hands OpenCL a
    /// pointer to a value with the layout the kernel expects.
    pub fn set_kernel_arg<T: TrueArg>(&self, kname: &str, index: u32, arg: &T) -> Result<(), ClError> {
        let kernel = self
            .kernels
            .get(kname)
            .ok_or_else(|| ClError::UnknownKernel(kname.to_string()))?;
        let targ = arg.true_arg(self)?;
        let err = unsafe { cl_sys::clSetKernelArg(*kernel, index, std::mem::size_of::<T>(), targ) };
        if err != cl_sys::CL_SUCCESS {
            return Err(ClError::arg(index, err));
        }
        Ok(())
    }

    /// Runs a one-dimensional range of `globsize` work items and waits for
    /// the queue to drain. Without `locsize` the driver picks the
    /// work-group size.
    ///
    /// # Safety
    /// The kernel reads whatever the arguments point at. A kernel compiled
    /// for a different argument layout can read or write out of bounds.
    /// Prefer [`kernel_set_args_and_run!`], which rebinds every argument.
    pub unsafe fn run_kernel(&mut self, kname: &str, globsize: usize, locsize: Option<usize>) -> Result<(), ClError> {
        let kernel = *self
            .kernels
            .get(kname)
            .ok_or_else(|| ClError::UnknownKernel(kname.to_string()))?;

        let local = locsize.as_ref().map_or(ptr::null(), |l| l as *const usize);
        #[allow(unused_unsafe)]
        let err = unsafe {
            cl_sys::clEnqueueNDRangeKernel(
                self.queue,
                kernel,
                1,
                ptr::null(),
                &globsize,
                local,
                0,
                ptr::null(),
                ptr::null_mut(),
            )
        };
        check("clEnqueueNDRangeKernel", err)?;

        #[allow(unused_unsafe)]
        let err = unsafe { cl_sys::clFinish(self.queue) };
        check("clFinish", err)
    }
}

/// OpenCL objects are reference counted in C; every handle this
/// environment created is released exactly once here.
impl Drop for Accel {
    fn drop(&mut self) {
        for (buffer, size) in self.buffers.drain() {
            debug!("Free buffer {:?} ({} bytes)", buffer, size);
            release("clReleaseMemObject", unsafe { cl_sys::clReleaseMemObject(buffer) });
        }
        for (name, kernel) in self.kernels.drain() {
            debug!("Free kernel {}", name);
            release("clReleaseKernel", unsafe { cl_sys::clReleaseKernel(kernel) });
        }
        if !self.program.is_null() {
            release("clReleaseProgram", unsafe { cl_sys::clReleaseProgram(self.program) });
        }
        if !self.queue.is_null() {
            release("clReleaseCommandQueue", unsafe { cl_sys::clReleaseCommandQueue(self.queue) });
        }
        if !self.context.is_null() {
            release("clReleaseContext", unsafe { cl_sys::clReleaseContext(self.context) });
        }
        debug!("Free OpenCL env.");
    }
}

fn release(call: &'static str, status: cl_int) {
    if let Err(e) = check(call, status) {
        warn!("{}", e);
    }
}

/// An ICD loader with no installed platform may report success with a
/// count of zero instead of `CL_PLATFORM_NOT_FOUND_KHR`; both end up as the
/// latter.
fn check_platform_count(status: cl_int, count: cl_uint) -> Result<(), ClError> {
    check("clGetPlatformIDs", status)?;
    if count == 0 {
        return Err(ClError::call("clGetPlatformIDs", cl_sys::CL_PLATFORM_NOT_FOUND_KHR));
    }
    Ok(())
}

fn select_device(platform: cl_platform_id, pref: DevicePreference) -> Result<cl_device_id, ClError> {
    let mut device: cl_device_id = ptr::null_mut();
    let mut err = cl_sys::CL_DEVICE_NOT_FOUND;
    for &(device_type, label) in pref.candidates() {
        err = unsafe {
            cl_sys::clGetDeviceIDs(platform, device_type, 1, &mut device, ptr::null_mut())
        };
        if err == cl_sys::CL_SUCCESS {
            debug!("Selected {} device", label);
            return Ok(device);
        }
        debug!("No {} device: {}", label, status_name(err));
    }
    Err(ClError::call("clGetDeviceIDs", err))
}

/// Runs a two-step OpenCL info query (size, then value) and decodes the
/// NUL-terminated result.
fn query_string<F>(call: &'static str, query: F) -> Result<String, ClError>
where
    F: Fn(usize, *mut c_void, *mut usize) -> cl_int,
{
    let mut size: usize = 0;
    check(call, query(0, ptr::null_mut(), &mut size))?;
    let mut buf = vec![0u8; size];
    if size > 0 {
        check(call, query(size, buf.as_mut_ptr() as *mut c_void, ptr::null_mut()))?;
    }
    while buf.last() == Some(&0) {
        buf.pop();
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Pointer conversion from a Rust value to a kernel argument.
/// For most cases, the default conversion is OK: simply
/// converts the ref to a C void pointer.
pub trait TrueArg: Sized {
    fn true_arg(&self, _dev: &Accel) -> Result<*const c_void, ClError> {
        Ok(self as *const Self as *const c_void)
    }
}

/// Nothing to do for basic types.
impl TrueArg for i32 {}
impl TrueArg for u32 {}
impl TrueArg for i64 {}
impl TrueArg for u64 {}
impl TrueArg for f32 {}
impl TrueArg for f64 {}

/// A memory object passed by handle must belong to this environment.
impl TrueArg for cl_mem {
    fn true_arg(&self, dev: &Accel) -> Result<*const c_void, ClError> {
        if !dev.owns_buffer(*self) {
            return Err(ClError::UnknownBuffer);
        }
        Ok(self as *const cl_mem as *const c_void)
    }
}

/// Binds every argument in order, then runs the kernel and waits for it.
/// Evaluates to `Result<(), ClError>`; the first failing bind stops the
/// launch.
/// # Safety
/// Calling an OpenCL kernel is not safe: a kernel built for a different
/// argument layout can read or write anywhere in device memory.
#[macro_export]
macro_rules! kernel_set_args_and_run {
    ($dev: expr, $kname: expr, $globsize: expr, $locsize: expr, $($arg: expr),*) => {{
        #[allow(unused_assignments, unused_mut)]
        let result = (|| -> ::std::result::Result<(), $crate::ClError> {
            let mut count: u32 = 0;
            $(
                $dev.set_kernel_arg(&$kname, count, &$arg)?;
                count += 1;
            )*
            unsafe { $dev.run_kernel(&$kname, $globsize, $locsize) }
        })();
        result
    }}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_platforms_report_call_and_code() {
        for (status, count) in [(cl_sys::CL_PLATFORM_NOT_FOUND_KHR, 0), (cl_sys::CL_SUCCESS, 0)] {
            let err = check_platform_count(status, count).unwrap_err();
            assert_eq!(
                err.to_string(),
                "OpenCL error at clGetPlatformIDs: -1001 (CL_PLATFORM_NOT_FOUND_KHR)"
            );
        }
        assert!(check_platform_count(cl_sys::CL_SUCCESS, 2).is_ok());
    }

    #[test]
    fn query_string_strips_the_terminator() {
        let text = b"Portable Computing Language\0";
        let s = query_string("clGetPlatformInfo", |size, value, size_ret| {
            if !size_ret.is_null() {
                unsafe { *size_ret = text.len() };
            }
            if !value.is_null() {
                assert_eq!(size, text.len());
                unsafe { ptr::copy_nonoverlapping(text.as_ptr(), value as *mut u8, size) };
            }
            cl_sys::CL_SUCCESS
        })
        .unwrap();
        assert_eq!(s, "Portable Computing Language");
    }

    #[test]
    fn query_string_reports_failures() {
        let err = query_string("clGetDeviceInfo", |_, _, _| cl_sys::CL_INVALID_DEVICE).unwrap_err();
        assert_eq!(err.to_string(), "OpenCL error at clGetDeviceInfo: -33 (CL_INVALID_DEVICE)");
    }

    #[test]
    #[ignore = "requires an OpenCL device"]
    fn test_init() {
        let source = "__kernel void simple_kernel(){
            int i = get_global_id(0);
        }";
        let dev = Accel::from_source(source, 0, DevicePreference::Auto).unwrap();
        assert!(!dev.device_name().is_empty());
        assert!(!dev.platform_name().is_empty());
    }

    #[test]
    #[ignore = "requires an OpenCL device"]
    fn test_buffer() {
        let source = "__kernel void simple_kernel(void){
            int i = get_global_id(0);
        }";
        let mut dev = Accel::from_source(source, 0, DevicePreference::Auto).unwrap();
        let v0: Vec<i32> = vec![3; 16];
        let v = dev.register_buffer(&v0).unwrap();
        assert_eq!(dev.read_buffer::<i32>(v).unwrap(), v0);
        assert!(matches!(
            dev.read_buffer::<[u8; 3]>(v),
            Err(ClError::TypeMismatch { size: 64, elem: 3 })
        ));
    }

    #[test]
    #[ignore = "requires an OpenCL device"]
    fn test_kernel() {
        let source = "__kernel void simple_add(__global int *v, int x){
            int i = get_global_id(0);
            v[i] += x;
        }";
        let kernel_name = "simple_add".to_string();
        let mut dev = Accel::from_source(source, 0, DevicePreference::Auto).unwrap();
        dev.register_kernel(&kernel_name).unwrap();
        let v = dev.register_buffer(&[3i32; 16]).unwrap();
        let x = 3;
        kernel_set_args_and_run!(dev, kernel_name, 16, Some(4), v, x).unwrap();
        assert_eq!(dev.read_buffer::<i32>(v).unwrap(), vec![6; 16]);
    }

    #[test]
    #[ignore = "requires an OpenCL device"]
    fn test_unknown_kernel() {
        let source = "__kernel void simple_kernel(){}";
        let mut dev = Accel::from_source(source, 0, DevicePreference::Auto).unwrap();
        let err = dev.register_kernel("missing").unwrap_err();
        assert!(matches!(
            err,
            ClError::Call { call: "clCreateKernel", code: cl_sys::CL_INVALID_KERNEL_NAME, .. }
        ));
        assert!(matches!(
            dev.set_kernel_arg("missing", 0, &1i32),
            Err(ClError::UnknownKernel(_))
        ));
    }

    #[test]
    #[ignore = "requires an OpenCL device"]
    fn test_build_failure_keeps_log() {
        let err = Accel::from_source("__kernel void broken(", 0, DevicePreference::Auto).unwrap_err();
        match err {
            ClError::Build { code, log, .. } => {
                assert_eq!(code, cl_sys::CL_BUILD_PROGRAM_FAILURE);
                assert!(!log.trim().is_empty());
            }
            other => panic!("expected a build failure, got {other}"),
        }
    }
}

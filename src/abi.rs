//! Host-side mirrors of the argument structs the array compiler emits.
//!
//! Each type is `#[repr(C)]` and must match the IR layout byte for byte:
//! the kernel reads these values straight out of its argument space, so a
//! misplaced field gives garbage results rather than an error.

use cl_sys::{c_void, cl_mem};

use crate::{Accel, ClError, TrueArg};

/// Entry point of the element-wise broadcast kernel over `OneTo{Int64}` and
/// a one-dimensional `Float32` device array indexed by `EachIndex`.
pub const EACH_INDEX_KERNEL: &str = "_Z6kernel5OneToI5Int64E11BroadcastedI12CLArrayStyleILi1E19UnifiedDeviceMemoryEv5tuple5TupleI13CLDeviceArrayI7Float32Li1ELi1EE9EachIndexIS0_Li1ES1_EEE";

/// The scalar range `1..=stop`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneTo {
    pub stop: i64,
}

impl OneTo {
    pub fn new(stop: i64) -> OneTo {
        OneTo { stop }
    }
}

/// Device array descriptor: `{ i8 addrspace(1)*, i64, [1 x i64], i64 }`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClDeviceArray {
    pub ptr: *mut c_void,
    pub maxsize: i64,
    pub dims: [i64; 1],
    pub len: i64,
}

impl ClDeviceArray {
    pub fn new(ptr: *mut c_void, len: i64) -> ClDeviceArray {
        ClDeviceArray {
            ptr,
            maxsize: len,
            dims: [len],
            len,
        }
    }
}

/// One-dimensional index range, both ends inclusive and 1-based.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub start: [i64; 1],
    pub stop: [i64; 1],
}

impl IndexRange {
    pub fn one_to(stop: i64) -> IndexRange {
        IndexRange {
            start: [1],
            stop: [stop],
        }
    }
}

/// A broadcast over one device array: the array itself plus the axes and
/// the `EachIndex` range it is evaluated over.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Broadcasted {
    pub array: ClDeviceArray,
    pub ranges: [IndexRange; 2],
}

impl Broadcasted {
    /// Describes `buffer` as an `n`-element array visited at every index.
    ///
    /// The memory object handle goes in the pointer slot as-is; the runtime
    /// never rewrites it, so a kernel that dereferences it must have been
    /// compiled for this handle-passing convention.
    pub fn each_index(buffer: cl_mem, n: i64) -> Broadcasted {
        Broadcasted {
            array: ClDeviceArray::new(buffer as *mut c_void, n),
            ranges: [IndexRange::one_to(n), IndexRange::one_to(n)],
        }
    }
}

impl TrueArg for OneTo {}

/// Passed by value, but the embedded handle must still name a buffer of
/// the environment the kernel runs in.
impl TrueArg for ClDeviceArray {
    fn true_arg(&self, dev: &Accel) -> Result<*const c_void, ClError> {
        if !dev.owns_buffer(self.ptr as cl_mem) {
            return Err(ClError::UnknownBuffer);
        }
        Ok(self as *const ClDeviceArray as *const c_void)
    }
}

impl TrueArg for Broadcasted {
    fn true_arg(&self, dev: &Accel) -> Result<*const c_void, ClError> {
        self.array.true_arg(dev)?;
        Ok(self as *const Broadcasted as *const c_void)
    }
}

//! The end-to-end probe: load a module, bind the broadcast arguments, run
//! the kernel once and read the data back.

use std::fmt::Write as _;
use std::path::PathBuf;

use cl_sys::cl_device_type;
use log::{debug, info};

use crate::{kernel_set_args_and_run, spirv, Accel, Broadcasted, ClError, OneTo, EACH_INDEX_KERNEL};

/// Which kind of device to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DevicePreference {
    /// A GPU if the platform has one, otherwise a CPU.
    #[default]
    Auto,
    Gpu,
    Cpu,
}

impl DevicePreference {
    /// Device types to try, in order.
    pub fn candidates(self) -> &'static [(cl_device_type, &'static str)] {
        match self {
            DevicePreference::Auto => &[
                (cl_sys::CL_DEVICE_TYPE_GPU, "GPU"),
                (cl_sys::CL_DEVICE_TYPE_CPU, "CPU"),
            ],
            DevicePreference::Gpu => &[(cl_sys::CL_DEVICE_TYPE_GPU, "GPU")],
            DevicePreference::Cpu => &[(cl_sys::CL_DEVICE_TYPE_CPU, "CPU")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub spirv: PathBuf,
    pub platform: usize,
    pub device: DevicePreference,
    pub kernel: String,
    /// Number of input elements; the data buffer holds `1.0..=len`.
    pub len: usize,
    pub global_size: usize,
}

impl LaunchConfig {
    pub fn new(spirv: impl Into<PathBuf>) -> LaunchConfig {
        LaunchConfig {
            spirv: spirv.into(),
            platform: 0,
            device: DevicePreference::Auto,
            kernel: EACH_INDEX_KERNEL.to_string(),
            len: 2,
            global_size: 1,
        }
    }
}

/// `[1.0, 2.0, ..., n]`
pub fn input_values(n: usize) -> Vec<f32> {
    (1..=n).map(|i| i as f32).collect()
}

/// The probe's report, one line per element after a header.
///
/// Values print like C's `%f`, so NaNs left by a mismatched layout show as
/// `nan`/`-nan` rather than `NaN`.
pub fn format_results(data: &[f32]) -> String {
    let mut out = String::from("Results:\n");
    for (i, x) in data.iter().enumerate() {
        let _ = match (x.is_nan(), x.is_sign_negative()) {
            (true, true) => writeln!(out, "data[{}] = -nan", i),
            (true, false) => writeln!(out, "data[{}] = nan", i),
            _ => writeln!(out, "data[{}] = {:.6}", i, x),
        };
    }
    out
}

/// What the binary writes to stderr for `err`: the device build log, when
/// there is one, ahead of the error line.
pub fn format_error(err: &ClError) -> String {
    let mut out = String::new();
    if let Some(log) = err.build_log() {
        let _ = writeln!(out, "Build log:\n{}", log);
    }
    let _ = writeln!(out, "{}", err);
    out
}

/// Runs the broadcast kernel named by `config` once and returns the data
/// buffer as the kernel left it.
pub fn run(config: &LaunchConfig) -> Result<Vec<f32>, ClError> {
    let il = spirv::load(&config.spirv)?;
    let mut accel = Accel::from_il(&il, config.platform, config.device)?;
    info!("Running on {} ({})", accel.device_name(), accel.platform_name());
    accel.register_kernel(&config.kernel)?;

    let data = input_values(config.len);
    let n = data.len() as i64;
    let buf = accel.register_buffer(&data)?;

    let range = OneTo::new(n);
    let broadcast = Broadcasted::each_index(buf, n);
    debug!("{:?}", broadcast);

    // Device-side copy of the descriptor, kept alongside the by-value argument.
    let mirror = accel.register_scratch::<Broadcasted>(1)?;
    accel.write_buffer(mirror, std::slice::from_ref(&broadcast))?;

    info!(
        "Launching {} over {} element(s), global size {}",
        config.kernel, n, config.global_size
    );
    kernel_set_args_and_run!(accel, config.kernel, config.global_size, None, range, broadcast)?;

    accel.read_buffer(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LaunchConfig::new("kernel.spv");
        assert_eq!(config.spirv, PathBuf::from("kernel.spv"));
        assert_eq!(config.platform, 0);
        assert_eq!(config.device, DevicePreference::Auto);
        assert_eq!(config.kernel, EACH_INDEX_KERNEL);
        assert_eq!(config.len, 2);
        assert_eq!(config.global_size, 1);
    }

    #[test]
    fn inputs_count_from_one() {
        assert_eq!(input_values(2), vec![1.0, 2.0]);
        assert_eq!(input_values(5), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(input_values(0).is_empty());
    }

    #[test]
    fn results_use_six_decimals() {
        assert_eq!(
            format_results(&[2.0, 4.0]),
            "Results:\ndata[0] = 2.000000\ndata[1] = 4.000000\n"
        );
        assert_eq!(format_results(&[]), "Results:\n");
    }

    #[test]
    fn results_spell_nan_and_infinity_like_printf() {
        assert_eq!(
            format_results(&[f32::NAN, -f32::NAN, f32::INFINITY, f32::NEG_INFINITY]),
            "Results:\ndata[0] = nan\ndata[1] = -nan\ndata[2] = inf\ndata[3] = -inf\n"
        );
    }

    #[test]
    fn build_log_precedes_the_error_line() {
        let err = ClError::Build {
            code: cl_sys::CL_BUILD_PROGRAM_FAILURE,
            name: crate::status_name(cl_sys::CL_BUILD_PROGRAM_FAILURE),
            log: "error: undefined symbol _Z6kernel".to_string(),
        };
        let text = format_error(&err);
        assert_eq!(
            text,
            "Build log:\nerror: undefined symbol _Z6kernel\n\
             OpenCL error at clBuildProgram: -11 (CL_BUILD_PROGRAM_FAILURE)\n"
        );
        let log_at = text.find("undefined symbol").unwrap();
        let err_at = text.find("OpenCL error at clBuildProgram:").unwrap();
        assert!(log_at < err_at);
    }

    #[test]
    fn other_errors_have_no_build_log() {
        let err = crate::check("clFinish", cl_sys::CL_OUT_OF_RESOURCES).unwrap_err();
        assert_eq!(format_error(&err), "OpenCL error at clFinish: -5 (CL_OUT_OF_RESOURCES)\n");
    }

    #[test]
    fn auto_prefers_gpu_then_cpu() {
        let kinds: Vec<_> = DevicePreference::Auto.candidates().iter().map(|c| c.1).collect();
        assert_eq!(kinds, ["GPU", "CPU"]);
        assert_eq!(DevicePreference::Cpu.candidates().len(), 1);
        assert_eq!(DevicePreference::Gpu.candidates()[0].0, cl_sys::CL_DEVICE_TYPE_GPU);
    }

    #[test]
    fn missing_module_fails_before_touching_opencl() {
        let config = LaunchConfig::new("/no/such/dir/kernel.spv");
        let err = run(&config).unwrap_err();
        assert!(matches!(err, ClError::Open { .. }));
        assert!(err.to_string().starts_with("Failed to open /no/such/dir/kernel.spv"));
    }

    #[test]
    #[ignore = "requires an OpenCL device"]
    fn garbage_module_is_rejected_by_the_driver() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]).unwrap();
        let err = run(&LaunchConfig::new(file.path())).unwrap_err();
        assert!(matches!(err, ClError::Call { .. } | ClError::Build { .. }));
    }
}

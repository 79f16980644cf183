use std::io::Write;
use std::process::{Command, Output};

fn spvprobe(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_spvprobe"))
        .args(args)
        .output()
        .expect("failed to run spvprobe")
}

#[test]
fn missing_argument_prints_usage() {
    let out = spvprobe(&[]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Usage:"), "stderr: {stderr}");
    assert!(stderr.contains("<SPIRV_FILE>"), "stderr: {stderr}");
    assert!(out.stdout.is_empty());
}

#[test]
fn unreadable_file_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.spv");
    let out = spvprobe(&[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Failed to open"), "stderr: {stderr}");
    assert!(stderr.contains("absent.spv"), "stderr: {stderr}");
}

#[test]
fn zero_length_is_a_usage_error() {
    let out = spvprobe(&["--len", "0", "kernel.spv"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn help_is_not_an_error() {
    let out = spvprobe(&["--help"]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("--platform"));
    assert!(stdout.contains("--device"));
}

#[test]
#[ignore = "requires an OpenCL device"]
fn malformed_module_fails_with_an_opencl_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"not a spir-v module").unwrap();
    let out = spvprobe(&[file.path().to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("OpenCL error at"), "stderr: {stderr}");
    // A driver that accepts the bytes fails at the build step, which must
    // show its log first.
    if stderr.contains("clBuildProgram") {
        let log_at = stderr.find("Build log:").expect("build log missing");
        assert!(log_at < stderr.find("OpenCL error at clBuildProgram").unwrap());
    }
}

/// Set `SPVPROBE_KERNEL` to a SPIR-V module of the doubling broadcast kernel.
#[test]
#[ignore = "requires an OpenCL device and a compiled kernel"]
fn doubling_kernel_prints_two_results() {
    let path = std::env::var("SPVPROBE_KERNEL")
        .expect("set SPVPROBE_KERNEL to the SPIR-V module of the doubling broadcast kernel");
    let out = spvprobe(&[&path]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, ["Results:", "data[0] = 2.000000", "data[1] = 4.000000"]);
}

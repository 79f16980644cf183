use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use spvprobe::launch::{self, format_error, format_results};
use spvprobe::{DevicePreference, LaunchConfig, EACH_INDEX_KERNEL};

#[derive(Parser, Debug)]
#[command(
    name = "spvprobe",
    version,
    about = "Run a precompiled SPIR-V broadcast kernel on an OpenCL device and print the result"
)]
struct Cli {
    /// SPIR-V binary to load
    spirv_file: PathBuf,
    /// Index of the OpenCL platform to use
    #[arg(short, long, default_value_t = 0)]
    platform: usize,
    /// Kind of device to run on
    #[arg(short, long, value_enum, default_value_t = DevicePreference::Auto)]
    device: DevicePreference,
    /// Kernel entry point
    #[arg(short, long, default_value = EACH_INDEX_KERNEL, hide_default_value = true)]
    kernel: String,
    /// Number of input elements (1.0, 2.0, ...)
    #[arg(short = 'n', long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    len: u32,
    /// Global work size of the launch
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    global_size: u32,
}

impl Cli {
    fn into_config(self) -> LaunchConfig {
        LaunchConfig {
            spirv: self.spirv_file,
            platform: self.platform,
            device: self.device,
            kernel: self.kernel,
            len: self.len as usize,
            global_size: self.global_size as usize,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures
            return if e.use_stderr() { ExitCode::from(1) } else { ExitCode::SUCCESS };
        }
    };

    match launch::run(&cli.into_config()) {
        Ok(results) => {
            print!("{}", format_results(&results));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprint!("{}", format_error(&err));
            ExitCode::from(1)
        }
    }
}

//! Reading SPIR-V modules from disk.

use std::path::Path;

use log::{info, warn};

use crate::ClError;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// The five-word SPIR-V module header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpirvHeader {
    pub big_endian: bool,
    pub major: u8,
    pub minor: u8,
    pub generator: u32,
    pub bound: u32,
}

impl SpirvHeader {
    /// Decodes the header, or `None` when `bytes` do not start with one.
    pub fn parse(bytes: &[u8]) -> Option<SpirvHeader> {
        if bytes.len() < 20 {
            return None;
        }
        let word = |i: usize, be: bool| {
            let w = [bytes[4 * i], bytes[4 * i + 1], bytes[4 * i + 2], bytes[4 * i + 3]];
            if be {
                u32::from_be_bytes(w)
            } else {
                u32::from_le_bytes(w)
            }
        };
        let big_endian = match (word(0, false), word(0, true)) {
            (SPIRV_MAGIC, _) => false,
            (_, SPIRV_MAGIC) => true,
            _ => return None,
        };
        let version = word(1, big_endian);
        Some(SpirvHeader {
            big_endian,
            major: ((version >> 16) & 0xff) as u8,
            minor: ((version >> 8) & 0xff) as u8,
            generator: word(2, big_endian),
            bound: word(3, big_endian),
        })
    }

    /// Versions 1.0 through 1.6 exist.
    pub fn is_known_version(&self) -> bool {
        self.major == 1 && self.minor <= 6
    }
}

/// Reads a SPIR-V module.
///
/// The header is only inspected for logging: whether the module is
/// acceptable is left to the OpenCL driver, which reports it through the
/// build log.
pub fn load(path: &Path) -> Result<Vec<u8>, ClError> {
    let il = std::fs::read(path).map_err(|source| ClError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    match SpirvHeader::parse(&il) {
        Some(h) if h.is_known_version() => info!(
            "SPIR-V {}.{} module: {} bytes, id bound {}, generator {:#010x}",
            h.major,
            h.minor,
            il.len(),
            h.bound,
            h.generator
        ),
        Some(h) => warn!(
            "{}: unrecognised SPIR-V version {}.{}",
            path.display(),
            h.major,
            h.minor
        ),
        None => warn!(
            "{}: no SPIR-V header ({} bytes); handing it to the driver anyway",
            path.display(),
            il.len()
        ),
    }
    if il.len() % 4 != 0 {
        warn!("{}: length {} is not a multiple of 4", path.display(), il.len());
    }
    Ok(il)
}

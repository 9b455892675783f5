//! Loads the console's boot images (cartridge ROM, ARM9/ARM7 BIOS, firmware)
//! from disk, with defaults optionally overridden by a TOML config file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// On-disk configuration, merged with CLI flags (CLI wins on conflict).
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub bios_a: Option<PathBuf>,
    pub bios_c: Option<PathBuf>,
    pub firmware: Option<PathBuf>,
    pub scale: Option<u32>,
}

/// Read and parse a TOML config file. Missing file is not an error; the
/// caller falls back to CLI-only configuration.
pub fn load_config(path: &Path) -> Result<FileConfig, std::io::Error> {
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// Read a boot image (ROM, BIOS, or firmware) from disk.
pub fn read_image(path: &Path) -> Result<Vec<u8>, std::io::Error> {
    std::fs::read(path)
}

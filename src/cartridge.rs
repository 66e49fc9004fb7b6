//! Cartridge ROM file handling (§6).
//!
//! Unlike the NES's iNES-plus-mapper format, the cartridge contract
//! here is a flat byte sequence with no header: `BankedStore::mount`
//! already enforces the size/bank-count rules, so this module is just
//! the disk-facing half of that contract.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

/// Read a cartridge ROM file off disk. Size/bank-count validation
/// happens in `BankedStore::mount`, which the caller invokes with the
/// returned bytes.
pub fn read_rom(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("reading ROM file {}", path.display()))?;
    info!("read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_rom_surfaces_missing_file_as_context_error() {
        let err = read_rom(Path::new("/nonexistent/path/rom.bin")).unwrap_err();
        assert!(err.to_string().contains("reading ROM file"));
    }

    #[test]
    fn read_rom_reads_exact_bytes() {
        let path = std::env::temp_dir().join(format!("retrocore-test-{}.rom", std::process::id()));
        fs::write(&path, vec![0xAAu8; 32768]).unwrap();

        let bytes = read_rom(&path).unwrap();
        assert_eq!(bytes.len(), 32768);
        assert!(bytes.iter().all(|&b| b == 0xAA));

        let _ = fs::remove_file(&path);
    }
}

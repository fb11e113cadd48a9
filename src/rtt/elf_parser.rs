//! Locating the RTT control block from the firmware's symbol table

use std::path::Path;

use tracing::{debug, info, warn};

use crate::adapter::RttScan;
use crate::error::{Result, ViewerError};

/// Control block symbol emitted by the SEGGER RTT sources and rtt-target
const RTT_SYMBOL_NAME: &str = "_SEGGER_RTT";

/// Address of `_SEGGER_RTT` in the ELF file at `elf_path`
pub fn get_rtt_symbol_from_elf(elf_path: &Path) -> Result<u64> {
    debug!("Parsing ELF file for RTT symbol: {}", elf_path.display());

    let elf_data = std::fs::read(elf_path).map_err(|e| {
        ViewerError::RttError(format!("Failed to read ELF file {}: {}", elf_path.display(), e))
    })?;

    let elf = goblin::elf::Elf::parse(&elf_data).map_err(|e| {
        ViewerError::RttError(format!("Failed to parse ELF file {}: {}", elf_path.display(), e))
    })?;

    let address = elf
        .syms
        .iter()
        .find(|sym| elf.strtab.get_at(sym.st_name) == Some(RTT_SYMBOL_NAME))
        .map(|sym| sym.st_value)
        .ok_or_else(|| {
            ViewerError::RttError(format!(
                "{} not found in {} ({} symbols); RTT disabled or symbols stripped",
                RTT_SYMBOL_NAME,
                elf_path.display(),
                elf.syms.len()
            ))
        })?;

    if !is_valid_rtt_address(address) {
        return Err(ViewerError::RttError(format!(
            "{} at 0x{:08X} is outside RAM (0x20000000-0x2FFFFFFF)",
            RTT_SYMBOL_NAME, address
        )));
    }

    info!("Found {} at 0x{:08X}", RTT_SYMBOL_NAME, address);
    Ok(address)
}

/// Cortex-M SRAM lives in the 0x2000_0000 region
fn is_valid_rtt_address(address: u64) -> bool {
    (0x2000_0000..=0x2FFF_FFFF).contains(&address)
}

/// Pick the control block search strategy.
///
/// A configured address wins, then the ELF symbol; if neither is usable the
/// whole RAM is scanned.
pub fn resolve_scan(control_block_address: Option<u64>, elf_path: Option<&Path>) -> RttScan {
    if let Some(address) = control_block_address {
        debug!("RTT scan: configured address 0x{:08X}", address);
        return RttScan::Exact(address);
    }

    if let Some(path) = elf_path {
        match get_rtt_symbol_from_elf(path) {
            Ok(address) => return RttScan::Exact(address),
            Err(e) => warn!("{}; falling back to RAM scan", e),
        }
    }

    RttScan::Ram
}

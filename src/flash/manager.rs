//! Chip erase and firmware programming through the debug adapter

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::adapter::{AdapterSession, ConnectRequest, DebugAdapter, RttScan, SessionOptions};
use crate::error::FlashError;

/// Default load address for raw binaries (start of STM32-style internal flash)
pub const DEFAULT_BASE_ADDRESS: u64 = 0x0800_0000;

/// Progress sink for flash operations, receives a fraction in `[0, 1]`
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Firmware image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Elf,
    Hex,
    /// Raw image placed at a base address
    Bin,
}

impl FileFormat {
    /// Detect the format from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "elf" | "axf" => Some(FileFormat::Elf),
            "hex" | "ihex" => Some(FileFormat::Hex),
            "bin" => Some(FileFormat::Bin),
            _ => None,
        }
    }
}

/// Erase operation result
#[derive(Debug)]
pub struct EraseResult {
    pub erase_time_ms: u64,
}

/// Programming operation result
#[derive(Debug)]
pub struct ProgramResult {
    pub bytes_programmed: u64,
    pub programming_time_ms: u64,
    pub format: FileFormat,
}

/// Runs one flash operation per adapter session.
///
/// Each call opens its own session and closes it before returning, so flash
/// work never shares a probe with a live RTT session.
pub struct FlashManager {
    adapter: Arc<dyn DebugAdapter>,
    speed_khz: u32,
    progress: Option<ProgressCallback>,
}

impl FlashManager {
    pub fn new(adapter: Arc<dyn DebugAdapter>, speed_khz: u32) -> Self {
        Self {
            adapter,
            speed_khz,
            progress: None,
        }
    }

    /// Report progress fractions to `callback`
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    fn report(&self, fraction: f32) {
        if let Some(progress) = &self.progress {
            progress(fraction.clamp(0.0, 1.0));
        }
    }

    /// Callback handed to the adapter; clamps and forwards to the operator's sink
    fn sink(&self) -> ProgressCallback {
        let progress = self.progress.clone();
        Arc::new(move |fraction| {
            if let Some(progress) = &progress {
                progress(fraction.clamp(0.0, 1.0));
            }
        })
    }

    fn open(&self, request: &ConnectRequest) -> Result<Box<dyn AdapterSession>, FlashError> {
        let options = SessionOptions {
            request: request.clone(),
            speed_khz: self.speed_khz,
            scan: RttScan::Ram,
        };
        Ok(self.adapter.open_session(&options)?)
    }

    /// Erase the whole flash of the target
    pub fn erase_chip(&self, request: &ConnectRequest) -> Result<EraseResult, FlashError> {
        let start_time = Instant::now();
        self.report(0.0);

        let mut session = self.open(request)?;
        debug!("Starting full chip erase");
        let result = session.erase_chip(self.sink());
        session.close();
        result?;

        self.report(1.0);
        let elapsed = start_time.elapsed().as_millis() as u64;
        info!("Chip erase completed in {}ms", elapsed);

        Ok(EraseResult { erase_time_ms: elapsed })
    }

    /// Program `file_path` into flash; raw binaries go to `base_address`
    pub fn program_file(
        &self,
        request: &ConnectRequest,
        file_path: &Path,
        base_address: Option<u64>,
    ) -> Result<ProgramResult, FlashError> {
        if file_path.as_os_str().is_empty() {
            return Err(FlashError::NoFirmware);
        }
        if !file_path.exists() {
            return Err(FlashError::FileNotFound(file_path.display().to_string()));
        }
        let format = FileFormat::from_path(file_path)
            .ok_or_else(|| FlashError::UnknownFormat(file_path.display().to_string()))?;
        let base_address = base_address.unwrap_or(DEFAULT_BASE_ADDRESS);

        let start_time = Instant::now();
        self.report(0.0);

        match format {
            FileFormat::Bin => info!("Loading {} at {:#010x}", file_path.display(), base_address),
            _ => info!("Loading {}", file_path.display()),
        }

        let mut session = self.open(request)?;
        let result = session.program_file(file_path, format, base_address, self.sink());
        session.close();
        result?;

        self.report(1.0);
        let elapsed = start_time.elapsed().as_millis() as u64;
        info!("File programming completed in {}ms", elapsed);

        let bytes_programmed = std::fs::metadata(file_path).map(|m| m.len()).unwrap_or(0);

        Ok(ProgramResult {
            bytes_programmed,
            programming_time_ms: elapsed,
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_path(Path::new("fw.elf")), Some(FileFormat::Elf));
        assert_eq!(FileFormat::from_path(Path::new("Target.BIN")), Some(FileFormat::Bin));
        assert_eq!(FileFormat::from_path(Path::new("out/app.hex")), Some(FileFormat::Hex));
        assert_eq!(FileFormat::from_path(Path::new("README")), None);
        assert_eq!(FileFormat::from_path(&PathBuf::from("image.uf2")), None);
    }

    #[test]
    fn test_default_base_address() {
        assert_eq!(DEFAULT_BASE_ADDRESS, 0x8000000);
    }
}

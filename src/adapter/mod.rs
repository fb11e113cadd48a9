//! Debug adapter interface
//!
//! Everything that touches hardware goes through these two traits: probe
//! discovery, target attach, RTT channel discovery, channel I/O and the flash
//! algorithms. [`probe::ProbeRsAdapter`] implements them on top of probe-rs;
//! tests implement them with in-memory stubs.

pub mod probe;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{ConnectError, FlashError, StreamError};
use crate::flash::{FileFormat, ProgressCallback};

pub use probe::ProbeRsAdapter;

/// A debug probe as presented in the device list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeDescriptor {
    pub description: String,
    pub unique_id: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// One chip known to the debug library, as shown in the target browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDescriptor {
    /// Name accepted as a target override
    pub name: String,
    pub vendor: String,
    pub part_number: Option<String>,
    pub family: String,
    /// Where the description came from (built in, or an external pack)
    pub source: String,
}

/// Target and pack selection for a new adapter session.
///
/// Empty strings coming from input widgets mean "auto-detect" and are stored
/// as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub target_override: Option<String>,
    pub pack_path: Option<PathBuf>,
}

impl ConnectRequest {
    pub fn new(target_override: &str, pack_path: &str) -> Self {
        Self::from_parts(
            Some(target_override.to_string()),
            Some(PathBuf::from(pack_path.trim())),
        )
    }

    /// Same normalization as [`new`](Self::new), keeping the pack path as given
    pub fn from_parts(target_override: Option<String>, pack_path: Option<PathBuf>) -> Self {
        Self {
            target_override: target_override
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            pack_path: pack_path.filter(|path| !path.as_os_str().is_empty()),
        }
    }

    /// Auto-detect target, no pack
    pub fn auto() -> Self {
        Self::default()
    }
}

/// Options passed through to the adapter when opening a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub request: ConnectRequest,
    /// Probe clock in kHz
    pub speed_khz: u32,
    /// Where to look for the RTT control block
    pub scan: RttScan,
}

/// RTT control block search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RttScan {
    /// Scan all RAM regions of the target
    #[default]
    Ram,
    /// Control block is at this exact address
    Exact(u64),
}

/// Name and size of one discovered RTT channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub index: usize,
    pub name: Option<String>,
    pub buffer_size: usize,
}

/// Result of RTT control block discovery
#[derive(Debug, Clone, Default)]
pub struct RttChannels {
    pub up: Vec<ChannelInfo>,
    pub down: Vec<ChannelInfo>,
}

/// Entry point of a debug library
pub trait DebugAdapter: Send + Sync {
    /// Enumerate attached probes. Never cached; every call re-queries.
    fn discover_probes(&self) -> Vec<ProbeDescriptor>;

    /// Known targets, after registering the pack at `pack_path` if given
    fn list_targets(&self, pack_path: Option<&Path>) -> Result<Vec<TargetDescriptor>, ConnectError>;

    /// Open a probe, attach to the target and hand back the live session
    fn open_session(&self, options: &SessionOptions) -> Result<Box<dyn AdapterSession>, ConnectError>;
}

/// One attached target.
///
/// Channel handles are the indices returned by [`discover_rtt_channels`]
/// and are only valid until [`close`] is called.
///
/// [`discover_rtt_channels`]: AdapterSession::discover_rtt_channels
/// [`close`]: AdapterSession::close
pub trait AdapterSession: Send {
    fn discover_rtt_channels(&mut self) -> Result<RttChannels, ConnectError>;

    fn resume_target(&mut self) -> Result<(), ConnectError>;

    /// Non-blocking read; `Ok(0)` means nothing was pending
    fn read_up_channel(&mut self, channel: usize, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Non-blocking write; returns the number of bytes the channel accepted
    fn write_down_channel(&mut self, channel: usize, data: &[u8]) -> Result<usize, StreamError>;

    /// Erase the whole flash, reporting fractions in `[0, 1]` to `progress`
    fn erase_chip(&mut self, progress: ProgressCallback) -> Result<(), FlashError>;

    /// Program and verify a firmware image; `base_address` applies to raw binaries
    fn program_file(
        &mut self,
        path: &Path,
        format: FileFormat,
        base_address: u64,
        progress: ProgressCallback,
    ) -> Result<(), FlashError>;

    fn close(&mut self);
}

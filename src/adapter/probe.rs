//! probe-rs implementation of the debug adapter traits

use std::cell::RefCell;
use std::fs::File;
use std::path::Path;

use probe_rs::config::{TargetDescriptionSource, TargetSelector};
use probe_rs::flashing::{self, FlashProgress, ProgressEvent};
use probe_rs::probe::list::Lister;
use probe_rs::rtt::{Rtt, ScanRegion};
use probe_rs::{Permissions, Session};
use tracing::{debug, error, info, warn};

use super::{
    AdapterSession, ChannelInfo, DebugAdapter, ProbeDescriptor, RttChannels, RttScan,
    SessionOptions, TargetDescriptor,
};
use crate::error::{ConnectError, FlashError, StreamError};
use crate::flash::{FileFormat, ProgressCallback};

/// Adapter over the probe-rs probe lister and session API
#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeRsAdapter;

impl ProbeRsAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Register the target description found at `pack_path`.
    ///
    /// probe-rs consumes target YAML files (CMSIS packs are converted with
    /// `target-gen pack`), so anything it refuses is reported as a rejected
    /// pack rather than a generic adapter failure.
    fn register_pack(pack_path: &Path) -> Result<(), ConnectError> {
        let file = File::open(pack_path).map_err(|e| {
            ConnectError::PackRejected(format!("cannot open {}: {}", pack_path.display(), e))
        })?;

        match probe_rs::config::add_target_from_yaml(file) {
            Ok(_) => {
                info!("Loaded target description from {}", pack_path.display());
                Ok(())
            }
            Err(e) => {
                error!("Failed to load target description {}: {}", pack_path.display(), e);
                Err(ConnectError::PackRejected(format!("{}: {}", pack_path.display(), e)))
            }
        }
    }
}

impl DebugAdapter for ProbeRsAdapter {
    fn discover_probes(&self) -> Vec<ProbeDescriptor> {
        let probes = Lister::new().list_all();
        debug!("Found {} debug probes", probes.len());

        probes
            .into_iter()
            .map(|probe| ProbeDescriptor {
                unique_id: probe
                    .serial_number
                    .clone()
                    .unwrap_or_else(|| format!("{:04X}:{:04X}", probe.vendor_id, probe.product_id)),
                description: probe.identifier,
                vendor_id: probe.vendor_id,
                product_id: probe.product_id,
            })
            .collect()
    }

    fn list_targets(&self, pack_path: Option<&Path>) -> Result<Vec<TargetDescriptor>, ConnectError> {
        if let Some(pack_path) = pack_path {
            Self::register_pack(pack_path)?;
        }

        let families = probe_rs::config::families();
        debug!("Registry holds {} chip families", families.len());

        let targets = families
            .iter()
            .flat_map(|family| {
                let vendor = family
                    .manufacturer
                    .and_then(|code| code.get())
                    .unwrap_or("")
                    .to_string();
                let source = match family.source {
                    TargetDescriptionSource::BuiltIn => "builtin",
                    TargetDescriptionSource::External => "pack",
                    TargetDescriptionSource::Generic => "generic",
                };

                family.variants.iter().map(move |chip| TargetDescriptor {
                    name: chip.name.clone(),
                    vendor: vendor.clone(),
                    part_number: chip.part.map(|part| format!("{:#06x}", part)),
                    family: family.name.clone(),
                    source: source.to_string(),
                })
            })
            .collect();

        Ok(targets)
    }

    fn open_session(&self, options: &SessionOptions) -> Result<Box<dyn AdapterSession>, ConnectError> {
        let probes = Lister::new().list_all();
        let probe_info = probes.first().ok_or(ConnectError::NoAdapterFound)?;

        if probes.len() > 1 {
            warn!("{} probes attached, using the first one ({})", probes.len(), probe_info.identifier);
        }

        if let Some(pack_path) = &options.request.pack_path {
            Self::register_pack(pack_path)?;
        }

        info!("Opening probe: {}", probe_info.identifier);
        let mut probe = probe_info.open().map_err(|e| {
            error!("Failed to open probe '{}': {}", probe_info.identifier, e);
            ConnectError::AdapterError(format!("failed to open probe '{}': {}", probe_info.identifier, e))
        })?;

        match probe.set_speed(options.speed_khz) {
            Ok(actual) => debug!("Probe speed set to {} kHz", actual),
            Err(e) => warn!("Could not set probe speed to {} kHz: {}", options.speed_khz, e),
        }

        let selector = match &options.request.target_override {
            Some(name) => TargetSelector::Unspecified(name.clone()),
            None => TargetSelector::Auto,
        };
        info!("Attaching to target: {:?}", selector);

        let session = probe.attach(selector, Permissions::default()).map_err(|e| {
            error!("Failed to attach to target: {}", e);
            match e {
                probe_rs::Error::ChipNotFound(_) => ConnectError::TargetNotFound(e.to_string()),
                other => ConnectError::from(other),
            }
        })?;

        Ok(Box::new(ProbeRsSession {
            session: Some(session),
            rtt: None,
            scan: options.scan,
        }))
    }
}

/// A probe-rs session plus the RTT control block attached to it
struct ProbeRsSession {
    /// Dropped on close, which releases the probe
    session: Option<Session>,
    rtt: Option<Rtt>,
    scan: RttScan,
}

impl ProbeRsSession {
    fn session(&mut self) -> Result<&mut Session, String> {
        self.session.as_mut().ok_or_else(|| "session closed".to_string())
    }

    fn attached(&mut self) -> Result<(&mut Session, &mut Rtt), String> {
        match (self.session.as_mut(), self.rtt.as_mut()) {
            (Some(session), Some(rtt)) => Ok((session, rtt)),
            (None, _) => Err("session closed".to_string()),
            (Some(_), None) => Err("RTT not attached".to_string()),
        }
    }
}

impl AdapterSession for ProbeRsSession {
    fn discover_rtt_channels(&mut self) -> Result<RttChannels, ConnectError> {
        let scan_region = match self.scan {
            RttScan::Ram => ScanRegion::Ram,
            RttScan::Exact(address) => ScanRegion::Exact(address),
        };

        let session = self.session().map_err(ConnectError::AdapterError)?;
        let mut core = session.core(0)?;

        debug!("Attempting RTT attach with scan region: {:?}", scan_region);
        let mut rtt = Rtt::attach_region(&mut core, &scan_region).map_err(|e| {
            error!("RTT attachment failed: {}", e);
            ConnectError::AdapterError(format!("RTT attachment failed: {}", e))
        })?;
        drop(core);

        let up = rtt
            .up_channels()
            .iter()
            .enumerate()
            .map(|(index, channel)| ChannelInfo {
                index,
                name: channel.name().map(str::to_string),
                buffer_size: channel.buffer_size(),
            })
            .collect::<Vec<_>>();
        let down = rtt
            .down_channels()
            .iter()
            .enumerate()
            .map(|(index, channel)| ChannelInfo {
                index,
                name: channel.name().map(str::to_string),
                buffer_size: channel.buffer_size(),
            })
            .collect::<Vec<_>>();

        info!("{} up channels and {} down channels found", up.len(), down.len());
        self.rtt = Some(rtt);

        Ok(RttChannels { up, down })
    }

    fn resume_target(&mut self) -> Result<(), ConnectError> {
        let session = self.session().map_err(ConnectError::AdapterError)?;
        let mut core = session.core(0)?;
        core.run()?;
        debug!("Target resumed");
        Ok(())
    }

    fn read_up_channel(&mut self, channel: usize, buf: &mut [u8]) -> Result<usize, StreamError> {
        let failed = |reason: String| StreamError::ReadFailed { channel, reason };

        let (session, rtt) = self.attached().map_err(failed)?;
        let mut core = session.core(0).map_err(|e| failed(e.to_string()))?;
        let up_channel = rtt
            .up_channels()
            .get_mut(channel)
            .ok_or_else(|| failed("no such channel".to_string()))?;

        up_channel.read(&mut core, buf).map_err(|e| failed(e.to_string()))
    }

    fn write_down_channel(&mut self, channel: usize, data: &[u8]) -> Result<usize, StreamError> {
        let failed = |reason: String| StreamError::WriteFailed { channel, reason };

        let (session, rtt) = self.attached().map_err(failed)?;
        let mut core = session.core(0).map_err(|e| failed(e.to_string()))?;
        let down_channel = rtt
            .down_channels()
            .get_mut(channel)
            .ok_or_else(|| failed("no such channel".to_string()))?;

        down_channel.write(&mut core, data).map_err(|e| failed(e.to_string()))
    }

    fn erase_chip(&mut self, progress: ProgressCallback) -> Result<(), FlashError> {
        let session = self.session().map_err(FlashError::EraseFailed)?;

        debug!("Starting full flash erase");
        flashing::erase_all(session, flash_progress(progress))
            .map_err(|e| FlashError::EraseFailed(e.to_string()))?;

        info!("Full flash erase completed");
        Ok(())
    }

    fn program_file(
        &mut self,
        path: &Path,
        format: FileFormat,
        base_address: u64,
        progress: ProgressCallback,
    ) -> Result<(), FlashError> {
        let format = match format {
            FileFormat::Elf => flashing::Format::Elf,
            FileFormat::Hex => flashing::Format::Hex,
            FileFormat::Bin => flashing::Format::Bin(flashing::BinOptions {
                base_address: Some(base_address),
                skip: 0,
            }),
        };

        let session = self.session().map_err(FlashError::ProgramFailed)?;

        let mut options = flashing::DownloadOptions::default();
        options.verify = true;
        options.progress = Some(flash_progress(progress));

        debug!("Programming file: {}", path.display());
        flashing::download_file_with_options(session, path, format, options)
            .map_err(|e| FlashError::ProgramFailed(e.to_string()))?;

        info!("Programmed {}", path.display());
        Ok(())
    }

    fn close(&mut self) {
        self.rtt = None;
        if self.session.take().is_some() {
            debug!("probe-rs session closed");
        }
    }
}

/// Running byte counts of one flash operation, from probe-rs progress events
#[derive(Debug, Default)]
struct FlashTally {
    erase_total: u64,
    erased: u64,
    program_total: u64,
    programmed: u64,
}

impl FlashTally {
    /// Overall fraction after `event`, or `None` if the event does not move it
    fn update(&mut self, event: &ProgressEvent) -> Option<f32> {
        match event {
            ProgressEvent::Initialized { phases, .. } => {
                self.erase_total = phases
                    .iter()
                    .flat_map(|phase| phase.sectors())
                    .map(|sector| sector.size())
                    .sum();
                self.program_total = phases
                    .iter()
                    .flat_map(|phase| phase.pages())
                    .map(|page| u64::from(page.size()))
                    .sum();
                return None;
            }
            ProgressEvent::StartedProgramming { length } if self.program_total == 0 => {
                self.program_total = *length;
                return None;
            }
            ProgressEvent::SectorErased { size, .. } => {
                self.erased = (self.erased + size).min(self.erase_total);
            }
            ProgressEvent::FinishedErasing => self.erased = self.erase_total,
            ProgressEvent::PageProgrammed { size, .. } => {
                self.programmed = (self.programmed + u64::from(*size)).min(self.program_total);
            }
            ProgressEvent::FinishedProgramming => self.programmed = self.program_total,
            _ => return None,
        }
        self.fraction()
    }

    fn fraction(&self) -> Option<f32> {
        let total = self.erase_total + self.program_total;
        if total == 0 {
            return None;
        }
        let done = (self.erased + self.programmed) as f64 / total as f64;
        Some(done.clamp(0.0, 1.0) as f32)
    }
}

fn forward_progress(tally: &mut FlashTally, callback: &ProgressCallback, event: &ProgressEvent) {
    if let ProgressEvent::DiagnosticMessage { message } = event {
        debug!("Flash algorithm: {}", message);
    }
    if let Some(fraction) = tally.update(event) {
        callback(fraction);
    }
}

/// probe-rs progress handler feeding `callback` with completion fractions
fn flash_progress(callback: ProgressCallback) -> FlashProgress {
    let tally = RefCell::new(FlashTally::default());
    FlashProgress::new(move |event| forward_progress(&mut tally.borrow_mut(), &callback, &event))
}

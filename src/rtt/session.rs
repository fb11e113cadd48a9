//! RTT session lifecycle: connect, stream on a worker thread, disconnect

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::input::InputQueue;
use super::log::{LogBuffer, LogCursor};
use super::pump::{Pump, PumpExit};
use crate::adapter::{AdapterSession, ConnectRequest, DebugAdapter, RttChannels, RttScan, SessionOptions};
use crate::error::ConnectError;

/// Lifecycle of an [`RttSession`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    /// Worker asked to stop (disconnect in progress, or ESC typed)
    Stopping,
    Closed,
    Failed(String),
}

impl SessionState {
    /// Connecting or streaming: a connect request would be a no-op
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Stopping => write!(f, "stopping"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Tunables for one RTT session
#[derive(Debug, Clone)]
pub struct RttSettings {
    /// Probe clock in kHz
    pub speed_khz: u32,
    pub poll_interval: Duration,
    /// Size of the up-channel read buffer
    pub read_buffer_size: usize,
    pub up_channel: usize,
    pub down_channel: usize,
    pub scan: RttScan,
}

impl Default for RttSettings {
    fn default() -> Self {
        Self {
            speed_khz: 4000,
            poll_interval: Duration::from_millis(1),
            read_buffer_size: 1024,
            up_channel: 0,
            down_channel: 0,
            scan: RttScan::Ram,
        }
    }
}

/// State shared with the worker thread
#[derive(Debug, Default)]
struct Shared {
    state: Mutex<SessionState>,
    log: LogBuffer,
    input: InputQueue,
    stop: AtomicBool,
    active_workers: AtomicUsize,
    peak_workers: AtomicUsize,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state();
        if *state != next {
            debug!("RTT session: {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Worker-side transition; never overrides a state the control side already moved
    fn leave_streaming(&self, next: SessionState) {
        let mut state = self.state();
        if *state == SessionState::Streaming {
            debug!("RTT session: {} -> {}", *state, next);
            *state = next;
        }
    }
}

/// Adapter session owned by the worker; closed exactly once when dropped
struct SessionGuard(Box<dyn AdapterSession>);

impl SessionGuard {
    fn session(&mut self) -> &mut dyn AdapterSession {
        self.0.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.close();
        debug!("Adapter session closed");
    }
}

/// Decrements the live-worker count when the worker ends, even by panic
struct WorkerSlot(Arc<Shared>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.active_workers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An RTT terminal session.
///
/// Owned by the control surface. `connect` opens the target and starts one
/// worker thread that pumps the up-channel into the log and typed input into
/// the down-channel; `disconnect` stops and joins that worker and only then
/// closes the adapter session. All methods take `&self` so the handle can be
/// shared with a rendering thread.
pub struct RttSession {
    adapter: Arc<dyn DebugAdapter>,
    settings: RttSettings,
    shared: Arc<Shared>,
    /// Doubles as the lock serializing connect and disconnect
    worker: Mutex<Option<JoinHandle<SessionGuard>>>,
}

impl RttSession {
    pub fn new(adapter: Arc<dyn DebugAdapter>, settings: RttSettings) -> Self {
        Self {
            adapter,
            settings,
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
        }
    }

    /// Open the target and start streaming.
    ///
    /// A no-op while already connecting or streaming. On failure the
    /// adapter session, if it was opened, is closed before returning and the
    /// state is `Failed`.
    pub fn connect(&self, request: &ConnectRequest) -> Result<(), ConnectError> {
        let mut worker = self.lock_worker();

        if self.state().is_active() {
            debug!("RTT session already {}, ignoring connect", self.state());
            return Ok(());
        }

        // A worker that ended by itself (ESC, stream error) still holds its session
        self.release(&mut worker);

        self.shared.stop.store(false, Ordering::Release);
        self.shared.input.clear();
        self.shared.set_state(SessionState::Connecting);

        info!(
            "Connecting RTT (target: {}, pack: {})",
            request.target_override.as_deref().unwrap_or("auto"),
            request
                .pack_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string())
        );

        let guard = match self.open(request) {
            Ok(guard) => guard,
            Err(e) => {
                error!("RTT connect failed: {}", e);
                self.shared.set_state(SessionState::Failed(e.to_string()));
                return Err(e);
            }
        };

        // Streaming must be visible before the worker can report an exit
        self.shared.set_state(SessionState::Streaming);
        let live = self.shared.active_workers.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.peak_workers.fetch_max(live, Ordering::AcqRel);

        let slot = WorkerSlot(Arc::clone(&self.shared));
        let shared = Arc::clone(&self.shared);
        let mut pump = Pump::new(
            self.settings.up_channel,
            self.settings.down_channel,
            self.settings.read_buffer_size,
        );
        let poll_interval = self.settings.poll_interval;

        let spawned = thread::Builder::new()
            .name("rtt-pump".to_string())
            .spawn(move || {
                let _slot = slot;
                let mut guard = guard;

                debug!("RTT worker started");
                let exit = pump.run(guard.session(), &shared.log, &shared.input, &shared.stop, poll_interval);

                match exit {
                    PumpExit::Stopped => debug!("RTT worker stopped on request"),
                    PumpExit::Cancelled => {
                        info!("RTT closed by operator");
                        shared.leave_streaming(SessionState::Stopping);
                    }
                    PumpExit::Failed(e) => {
                        if shared.stop.load(Ordering::Acquire) {
                            debug!("Stream error during disconnect ignored: {}", e);
                        } else {
                            error!("RTT stream failed: {}", e);
                            shared.leave_streaming(SessionState::Failed(e.to_string()));
                        }
                    }
                }

                guard
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                // The closure, and with it the adapter session, was dropped
                let e = ConnectError::AdapterError(format!("failed to start RTT worker: {}", e));
                self.shared.set_state(SessionState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop streaming and release the target. Safe to call any number of times.
    pub fn disconnect(&self) {
        let mut worker = self.lock_worker();

        if worker.is_none() {
            return;
        }

        if self.state() == SessionState::Streaming {
            self.shared.set_state(SessionState::Stopping);
        }

        self.release(&mut worker);

        if !matches!(self.state(), SessionState::Failed(_)) {
            self.shared.set_state(SessionState::Closed);
        }
        info!("RTT disconnected");
    }

    /// Open the adapter session, find the channels and resume the target
    fn open(&self, request: &ConnectRequest) -> Result<SessionGuard, ConnectError> {
        let options = SessionOptions {
            request: request.clone(),
            speed_khz: self.settings.speed_khz,
            scan: self.settings.scan,
        };

        let session = self.adapter.open_session(&options)?;
        // Dropping the guard on any error below closes the session
        let mut guard = SessionGuard(session);

        let channels = guard.session().discover_rtt_channels()?;
        self.check_channels(&channels)?;
        guard.session().resume_target()?;

        Ok(guard)
    }

    fn check_channels(&self, channels: &RttChannels) -> Result<(), ConnectError> {
        info!(
            "{} up channels and {} down channels found",
            channels.up.len(),
            channels.down.len()
        );

        let up = channels
            .up
            .get(self.settings.up_channel)
            .ok_or(ConnectError::NoUpChannel)?;
        info!(
            "Reading from up channel {} (\"{}\")",
            up.index,
            up.name.as_deref().unwrap_or("")
        );

        let down = channels
            .down
            .get(self.settings.down_channel)
            .ok_or(ConnectError::NoDownChannel)?;
        info!(
            "Writing to down channel {} (\"{}\")",
            down.index,
            down.name.as_deref().unwrap_or("")
        );

        Ok(())
    }

    /// Stop and join the worker, then close its adapter session
    fn release(&self, worker: &mut Option<JoinHandle<SessionGuard>>) {
        let Some(handle) = worker.take() else {
            return;
        };

        self.shared.stop.store(true, Ordering::Release);
        match handle.join() {
            Ok(guard) => drop(guard),
            Err(_) => {
                // The guard was dropped, and the session closed, while unwinding
                warn!("RTT worker panicked");
                self.shared.set_state(SessionState::Failed("RTT worker panicked".to_string()));
            }
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<SessionGuard>>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.shared.state().clone()
    }

    pub fn log_snapshot(&self) -> String {
        self.shared.log.snapshot()
    }

    /// New log text since `cursor`
    pub fn read_log(&self, cursor: &mut LogCursor) -> String {
        self.shared.log.read_from(cursor)
    }

    /// Truncate the log; allowed in any state
    pub fn clear_log(&self) {
        self.shared.log.clear();
    }

    /// Queue bytes for the down-channel; ESC (0x1B) ends the session
    pub fn send_input(&self, data: &[u8]) {
        self.shared.input.push(data);
    }

    pub fn send_key(&self, key: char) {
        self.shared.input.push_char(key);
    }

    /// Number of live worker threads (0 or 1)
    pub fn active_workers(&self) -> usize {
        self.shared.active_workers.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously live workers ever observed
    pub fn peak_workers(&self) -> usize {
        self.shared.peak_workers.load(Ordering::Acquire)
    }
}

impl fmt::Debug for RttSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RttSession")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .field("active_workers", &self.active_workers())
            .finish()
    }
}

impl Drop for RttSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

//! The RTT pump: up-channel to log, input queue to down-channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::decoder::Utf8Decoder;
use super::input::{Drained, InputQueue};
use super::log::LogBuffer;
use crate::adapter::AdapterSession;
use crate::error::StreamError;

/// What one pump iteration asks the loop to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    /// Operator pressed ESC
    Cancel,
}

/// Why the pump loop returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PumpExit {
    /// Stop flag observed
    Stopped,
    /// ESC observed in the input queue
    Cancelled,
    Failed(StreamError),
}

/// Per-session pump state owned by the worker thread
#[derive(Debug)]
pub(crate) struct Pump {
    up_channel: usize,
    down_channel: usize,
    decoder: Utf8Decoder,
    /// Bytes typed but not yet accepted by the down-channel
    pending: Vec<u8>,
    read_buf: Vec<u8>,
}

impl Pump {
    pub(crate) fn new(up_channel: usize, down_channel: usize, read_size: usize) -> Self {
        Self {
            up_channel,
            down_channel,
            decoder: Utf8Decoder::new(),
            pending: Vec::new(),
            read_buf: vec![0u8; read_size.max(1)],
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// One iteration: read, decode and log, drain input, offer pending bytes once.
    pub(crate) fn step(
        &mut self,
        session: &mut dyn AdapterSession,
        log: &LogBuffer,
        input: &InputQueue,
    ) -> Result<Step, StreamError> {
        let count = session.read_up_channel(self.up_channel, &mut self.read_buf)?;
        if count > 0 {
            trace!("Read {} bytes from up channel {}", count, self.up_channel);
            let text = self.decoder.decode(&self.read_buf[..count.min(self.read_buf.len())]);
            log.append(&text);
        }

        if input.drain_into(&mut self.pending) == Drained::Cancel {
            debug!("ESC received, stopping RTT pump");
            return Ok(Step::Cancel);
        }

        if !self.pending.is_empty() {
            let written = session.write_down_channel(self.down_channel, &self.pending)?;
            let written = written.min(self.pending.len());
            if written < self.pending.len() {
                trace!(
                    "Down channel {} accepted {} of {} bytes",
                    self.down_channel,
                    written,
                    self.pending.len()
                );
            }
            self.pending.drain(..written);
        }

        Ok(Step::Continue)
    }

    /// Run until the stop flag is set, ESC is typed or a channel fails.
    ///
    /// The flag is checked before every iteration, so a stop request is
    /// honoured within one poll interval plus one channel round-trip.
    pub(crate) fn run(
        &mut self,
        session: &mut dyn AdapterSession,
        log: &LogBuffer,
        input: &InputQueue,
        stop: &AtomicBool,
        poll_interval: Duration,
    ) -> PumpExit {
        loop {
            if stop.load(Ordering::Acquire) {
                if !self.pending.is_empty() {
                    debug!("Discarding {} unsent bytes", self.pending.len());
                }
                return PumpExit::Stopped;
            }

            match self.step(session, log, input) {
                Ok(Step::Continue) => {}
                Ok(Step::Cancel) => return PumpExit::Cancelled,
                Err(e) => {
                    warn!("RTT stream error: {}", e);
                    return PumpExit::Failed(e);
                }
            }

            thread::sleep(poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RttChannels;
    use crate::error::{ConnectError, FlashError};
    use crate::flash::{FileFormat, ProgressCallback};
    use std::collections::VecDeque;
    use std::path::Path;

    /// Up-channel replays scripted chunks; down-channel takes at most `cap` bytes per call
    struct ScriptedSession {
        reads: VecDeque<Result<Vec<u8>, StreamError>>,
        cap: usize,
        written: Vec<u8>,
        write_calls: usize,
    }

    impl ScriptedSession {
        fn new(cap: usize) -> Self {
            Self { reads: VecDeque::new(), cap, written: Vec::new(), write_calls: 0 }
        }
    }

    impl AdapterSession for ScriptedSession {
        fn discover_rtt_channels(&mut self) -> Result<RttChannels, ConnectError> {
            Ok(RttChannels::default())
        }

        fn resume_target(&mut self) -> Result<(), ConnectError> {
            Ok(())
        }

        fn read_up_channel(&mut self, _channel: usize, buf: &mut [u8]) -> Result<usize, StreamError> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }

        fn write_down_channel(&mut self, _channel: usize, data: &[u8]) -> Result<usize, StreamError> {
            self.write_calls += 1;
            let n = data.len().min(self.cap);
            self.written.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn erase_chip(&mut self, _progress: ProgressCallback) -> Result<(), FlashError> {
            Ok(())
        }

        fn program_file(
            &mut self,
            _path: &Path,
            _format: FileFormat,
            _base_address: u64,
            _progress: ProgressCallback,
        ) -> Result<(), FlashError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_partial_writes_keep_suffix_in_order() {
        let mut session = ScriptedSession::new(3);
        let log = LogBuffer::new();
        let input = InputQueue::new();
        let mut pump = Pump::new(0, 0, 64);

        input.push(b"reset 42\n");
        for _ in 0..10 {
            assert_eq!(pump.step(&mut session, &log, &input).unwrap(), Step::Continue);
        }

        assert_eq!(session.written, b"reset 42\n");
        assert!(pump.pending().is_empty());
        // 9 bytes at 3 per call, then nothing left to offer
        assert_eq!(session.write_calls, 3);
    }

    #[test]
    fn test_zero_byte_write_keeps_everything() {
        let mut session = ScriptedSession::new(0);
        let log = LogBuffer::new();
        let input = InputQueue::new();
        let mut pump = Pump::new(0, 0, 64);

        input.push(b"ab");
        pump.step(&mut session, &log, &input).unwrap();
        input.push(b"c");
        pump.step(&mut session, &log, &input).unwrap();

        assert_eq!(pump.pending(), b"abc");

        session.cap = usize::MAX;
        pump.step(&mut session, &log, &input).unwrap();
        assert_eq!(session.written, b"abc");
    }

    #[test]
    fn test_split_character_across_reads() {
        let mut session = ScriptedSession::new(16);
        session.reads.push_back(Ok(vec![b'T', 0xE2, 0x84]));
        session.reads.push_back(Ok(vec![0x83, b'\n']));
        let log = LogBuffer::new();
        let input = InputQueue::new();
        let mut pump = Pump::new(0, 0, 64);

        pump.step(&mut session, &log, &input).unwrap();
        assert_eq!(log.snapshot(), "T");
        pump.step(&mut session, &log, &input).unwrap();
        assert_eq!(log.snapshot(), "T℃\n");
    }

    #[test]
    fn test_read_failure_is_reported() {
        let mut session = ScriptedSession::new(16);
        let failure = StreamError::ReadFailed { channel: 0, reason: "probe unplugged".to_string() };
        session.reads.push_back(Err(failure.clone()));
        let log = LogBuffer::new();
        let input = InputQueue::new();
        let stop = AtomicBool::new(false);
        let mut pump = Pump::new(0, 0, 64);

        let exit = pump.run(&mut session, &log, &input, &stop, Duration::from_millis(1));
        assert_eq!(exit, PumpExit::Failed(failure));
    }

    #[test]
    fn test_escape_ends_loop() {
        let mut session = ScriptedSession::new(16);
        let log = LogBuffer::new();
        let input = InputQueue::new();
        let stop = AtomicBool::new(false);
        let mut pump = Pump::new(0, 0, 64);

        input.push(b"q\x1b");
        let exit = pump.run(&mut session, &log, &input, &stop, Duration::from_millis(1));
        assert_eq!(exit, PumpExit::Cancelled);
        assert!(session.written.is_empty());
    }

    #[test]
    fn test_stop_flag_checked_first() {
        let mut session = ScriptedSession::new(16);
        session.reads.push_back(Ok(b"never read".to_vec()));
        let log = LogBuffer::new();
        let input = InputQueue::new();
        let stop = AtomicBool::new(true);
        let mut pump = Pump::new(0, 0, 64);

        let exit = pump.run(&mut session, &log, &input, &stop, Duration::from_millis(1));
        assert_eq!(exit, PumpExit::Stopped);
        assert!(log.is_empty());
    }
}

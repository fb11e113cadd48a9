//! RTT Viewer
//!
//! Host-side RTT terminal and flash tool for microcontrollers behind a debug
//! probe. Probe access, target attach, flash algorithms and the RTT control
//! block protocol come from probe-rs; this crate owns the terminal session
//! (worker lifecycle, byte pump, incremental UTF-8 decoding) and the control
//! surface around it.

pub mod adapter;
pub mod config;
pub mod error;
pub mod flash;
pub mod rtt;
pub mod store;
pub mod targets;

pub use adapter::{ConnectRequest, DebugAdapter, ProbeRsAdapter, TargetDescriptor};
pub use config::Config;
pub use error::{ConnectError, Result, StreamError, ViewerError};
pub use rtt::{RttSession, RttSettings, SessionState};

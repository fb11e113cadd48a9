//! Error types for the RTT viewer

use thiserror::Error;

/// Main error type for the RTT viewer
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("RTT error: {0}")]
    RttError(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ViewerError>;

/// Failures while opening a debug session and locating its RTT channels.
///
/// The messages are shown to the operator as-is, so each one names the
/// likely cause: nothing plugged in, no RTT on the target, or a wrong
/// target/pack pairing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("No debug probe found: make sure the probe is plugged in and its driver is installed")]
    NoAdapterFound,

    #[error("No RTT up channel found: is RTT initialized by the firmware?")]
    NoUpChannel,

    #[error("No RTT down channel found: the firmware exposes no host-to-target channel")]
    NoDownChannel,

    #[error("Target not recognized ({0}): check the target name against the selected pack")]
    TargetNotFound(String),

    #[error("Device pack rejected: {0}")]
    PackRejected(String),

    #[error("Debug adapter error: {0}")]
    AdapterError(String),
}

impl From<probe_rs::Error> for ConnectError {
    fn from(error: probe_rs::Error) -> Self {
        ConnectError::AdapterError(error.to_string())
    }
}

/// Channel failures observed by the RTT worker mid-session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Read from up channel {channel} failed: {reason}")]
    ReadFailed { channel: usize, reason: String },

    #[error("Write to down channel {channel} failed: {reason}")]
    WriteFailed { channel: usize, reason: String },
}

/// Persisted configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid TOML syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Write(#[from] toml::ser::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Flash operation errors
#[derive(Error, Debug)]
pub enum FlashError {
    #[error("No firmware file selected")]
    NoFirmware,

    #[error("Firmware file not found: {0}")]
    FileNotFound(String),

    #[error("Cannot detect firmware format of {0} (expected .elf, .hex or .bin)")]
    UnknownFormat(String),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Flash erase failed: {0}")]
    EraseFailed(String),

    #[error("Flash program failed: {0}")]
    ProgramFailed(String),
}

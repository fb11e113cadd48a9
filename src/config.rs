//! Configuration management for the RTT viewer

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, ViewerError};
use crate::flash::DEFAULT_BASE_ADDRESS;
use crate::rtt::{resolve_scan, RttSettings};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "rtt-viewer")]
#[command(about = "RTT terminal and flash tool for debug probes")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// File remembering the last pack, target and firmware
    #[arg(long, env = "RTT_VIEWER_STATE")]
    pub state_file: Option<PathBuf>,

    /// Probe speed in kHz
    #[arg(long)]
    pub speed: Option<u32>,

    /// Generate default configuration file
    #[arg(long)]
    pub generate_config: bool,

    /// Show current configuration and exit
    #[arg(long)]
    pub show_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List attached debug probes
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Browse known targets, including those of a pack, and pick one
    Targets {
        /// Target description (probe-rs YAML generated from a device pack)
        #[arg(short, long)]
        pack: Option<PathBuf>,

        /// Only show targets whose name, family or vendor contains this
        #[arg(short, long)]
        filter: Option<String>,

        /// Remember this target for later sessions
        #[arg(short, long)]
        select: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Open an RTT terminal on the target (ESC or Ctrl-C to quit)
    Rtt {
        #[command(flatten)]
        target: TargetArgs,

        /// Firmware ELF used to locate the RTT control block
        #[arg(long)]
        elf: Option<PathBuf>,

        /// Exact RTT control block address
        #[arg(long, value_parser = parse_address)]
        control_block: Option<u64>,

        /// Up channel to display
        #[arg(long)]
        up: Option<usize>,

        /// Down channel for keyboard input
        #[arg(long)]
        down: Option<usize>,

        /// Poll interval in milliseconds
        #[arg(long)]
        poll_interval: Option<u64>,
    },

    /// Erase the whole chip
    Erase {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Program a firmware file (elf, hex or bin)
    Load {
        #[command(flatten)]
        target: TargetArgs,

        /// Firmware file; defaults to the last one used
        file: Option<PathBuf>,

        /// Load address for raw binaries
        #[arg(short = 'a', long, value_parser = parse_address)]
        base_address: Option<u64>,
    },
}

/// Target selection shared by the subcommands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Target chip name; auto-detected when omitted
    #[arg(short, long)]
    pub target: Option<String>,

    /// Target description (probe-rs YAML generated from a device pack)
    #[arg(short, long)]
    pub pack: Option<PathBuf>,
}

/// Parse a hex (`0x`-prefixed) or decimal address
pub fn parse_address(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub debugger: DebuggerConfig,
    pub rtt: RttConfig,
    pub flash: FlashConfig,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
            let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Merge command line arguments into configuration
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(speed) = args.speed {
            self.debugger.default_speed_khz = speed;
        }
        if let Some(path) = &args.state_file {
            self.store.path = path.clone();
        }
        if let Some(Command::Rtt { control_block, up, down, poll_interval, .. }) = &args.command {
            if control_block.is_some() {
                self.rtt.control_block_address = *control_block;
            }
            if let Some(up) = up {
                self.rtt.up_channel = *up;
            }
            if let Some(down) = down {
                self.rtt.down_channel = *down;
            }
            if let Some(poll_interval) = poll_interval {
                self.rtt.poll_interval_ms = *poll_interval;
            }
        }
        self.logging.level = args.log_level.clone();
        if args.log_file.is_some() {
            self.logging.file = args.log_file.clone();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.debugger.default_speed_khz == 0 {
            return Err(ViewerError::InvalidConfig("default_speed_khz must be > 0".to_string()));
        }
        if self.rtt.buffer_size == 0 {
            return Err(ViewerError::InvalidConfig("rtt.buffer_size must be > 0".to_string()));
        }
        if !(1..=1000).contains(&self.rtt.poll_interval_ms) {
            return Err(ViewerError::InvalidConfig(
                "rtt.poll_interval_ms must be between 1 and 1000".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate TOML configuration string
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self).map_err(ConfigError::Write)?)
    }

    /// Session settings, locating the control block through `elf` if given
    pub fn rtt_settings(&self, elf: Option<&Path>) -> RttSettings {
        RttSettings {
            speed_khz: self.debugger.default_speed_khz,
            poll_interval: Duration::from_millis(self.rtt.poll_interval_ms),
            read_buffer_size: self.rtt.buffer_size,
            up_channel: self.rtt.up_channel,
            down_channel: self.rtt.down_channel,
            scan: resolve_scan(self.rtt.control_block_address, elf),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DebuggerConfig {
    pub default_speed_khz: u32,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self { default_speed_khz: 4000 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RttConfig {
    pub buffer_size: usize,
    pub poll_interval_ms: u64,
    pub up_channel: usize,
    pub down_channel: usize,
    pub control_block_address: Option<u64>,
}

impl Default for RttConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            poll_interval_ms: 1,
            up_channel: 0,
            down_channel: 0,
            control_block_address: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FlashConfig {
    pub base_address: u64,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self { base_address: DEFAULT_BASE_ADDRESS }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// Where the last-used selections are remembered
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("rtt-viewer-state.toml") }
    }
}

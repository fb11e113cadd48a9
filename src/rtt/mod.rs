//! RTT (Real-Time Transfer) terminal
//!
//! [`RttSession`] owns one background worker that pumps the target's up
//! channel into a text log and operator input into the target's down channel.

pub mod decoder;
pub mod elf_parser;
pub mod input;
pub mod log;
mod pump;
pub mod session;

pub use decoder::Utf8Decoder;
pub use elf_parser::{get_rtt_symbol_from_elf, resolve_scan};
pub use input::{InputQueue, CANCEL_KEY};
pub use log::{LogBuffer, LogCursor};
pub use session::{RttSession, RttSettings, SessionState};

//! Flash erase and programming

pub mod manager;

pub use manager::{
    EraseResult,
    FileFormat,
    FlashManager,
    ProgramResult,
    ProgressCallback,
    DEFAULT_BASE_ADDRESS,
};

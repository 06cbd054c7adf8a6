//! PSC-32: a fantasy 32-bit programmable signal controller.
//!
//! Two tightly coupled halves: a single-pass assembler that turns source
//! text into typed opcodes, and a register-machine processor that executes
//! them one external clock tick at a time. Memory and signal channels live
//! outside the chip; the processor reaches them through the [`Host`]
//! observer and suspends whenever the outside world has not answered yet.

pub mod asm;
mod exec;
pub mod opcodes;
pub mod processor;
pub mod snapshot;
pub mod state;
pub mod value;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use asm::{compile, AsmError, AsmErrorKind};
pub use opcodes::{Arg, Literal, MemAddr, Op, Opcode, OpcodeEntry, Program, OPCODES};
pub use processor::{Host, Load, NullHost, Processor, State};
pub use snapshot::ProcessorSnapshot;
pub use state::{Flags, InputLatch, OutputLatch, Reg, Registers, CHANNELS};
pub use value::{Kind, Kinds, Value};

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("channel index {0} is out of range")]
    ChannelOutOfRange(u32),
    #[error("serialize error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Writes to this address are debug output: hosts should display them and
/// persist nothing.
pub const DEBUG_ADDR: u32 = 0xFFFF_FFFF;

/// Sub-steps executed per external clock tick.
pub const MULTIPLIER_MIN: u8 = 1;
pub const MULTIPLIER_MAX: u8 = 16;
pub const MULTIPLIER_DEFAULT: u8 = 8;

/// Debug behavior of the cycle engine.
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebugMode {
    /// Run free.
    #[default]
    None,
    /// Execute at most one instruction per tick, then stop.
    StepByStep,
    /// Trace every executed instruction to [`DEBUG_ADDR`].
    Verbose,
}

/// Processor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Sub-steps per tick, clamped to `[MULTIPLIER_MIN, MULTIPLIER_MAX]`.
    pub multiplier: u8,
    pub debug: DebugMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            multiplier: MULTIPLIER_DEFAULT,
            debug: DebugMode::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.multiplier, 8);
        assert_eq!(config.debug, DebugMode::None);
    }

    #[test]
    fn debug_mode_serializes_kebab_case() {
        let json = serde_json::to_string(&DebugMode::StepByStep).unwrap();
        assert_eq!(json, "\"step-by-step\"");
        let back: DebugMode = serde_json::from_str("\"verbose\"").unwrap();
        assert_eq!(back, DebugMode::Verbose);
    }
}

use thiserror::Error;

use crate::cpu::StatusCode;

/// An instruction-level error. Any fault ends the run at the faulting instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("unknown opcode {word:#06x} at {pc:#05x}")]
    InvalidOpcode { pc: u16, word: u16 },
    #[error("instruction at {pc:#05x} runs past the end of the byte-code")]
    Truncated { pc: u16 },
    #[error("invalid destination: {0}")]
    InvalidDestination(#[from] DestinationError),
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] ParameterError),
}

impl Fault {
    pub fn status(&self) -> StatusCode {
        match self {
            Fault::InvalidOpcode { .. } | Fault::Truncated { .. } => StatusCode::InvalidOpcode,
            Fault::InvalidDestination(_) => StatusCode::InvalidDestination,
            Fault::InvalidParameter(_) => StatusCode::InvalidParameter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DestinationError {
    #[error("field {field:#06x} sets bits outside the destination mask")]
    IllegalBits { field: u16 },
    #[error("null offset relative jump")]
    NullOffset,
    #[error("backward offset {offset:#x} from {pc:#05x} goes below address 0")]
    BeforeStart { pc: u16, offset: u16 },
    #[error("target {target:#05x} is past the end of code {end:#05x}")]
    PastEnd { target: u16, end: u16 },
    #[error("jump on same pc {pc:#05x} without advance")]
    SamePc { pc: u16 },
    #[error("{target:#04x} is not a hard shell")]
    InvalidShell { target: u16 },
    #[error("gosub while return pc {pending:#05x} is pending")]
    NestedGosub { pending: u16 },
    #[error("no return pc")]
    NoReturnPc,
    #[error("pc {pc:#05x} lies outside the loaded byte-code")]
    OutsideCode { pc: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("{what} range ends at {end} but spans {len}")]
    ReversedRange { what: &'static str, end: u8, len: u8 },
    #[error("flag index {index} beyond {limit} flag bits")]
    FafIndex { index: u8, limit: u8 },
    #[error("frame window {start}..{end} beyond the frame buffer")]
    FrameWindow { start: usize, end: usize },
}

/// Setup and entry-point errors. These never touch the machine state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("simulator not initialized")]
    NotInitialized,
    #[error("start pc {pc:#x} outside {min:#x}..{max:#x}")]
    StartPc { pc: u16, min: u16, max: u16 },
    #[error("byte-code ends at {end:#x}, past max pc {max:#x}")]
    EndPc { end: usize, max: u16 },
    #[error("empty byte-code")]
    EmptyProgram,
    #[error("parameter range {offset}+{size} exceeds {limit} bytes")]
    ParameterRange {
        offset: usize,
        size: usize,
        limit: usize,
    },
    #[error("parameter source holds {available} bytes, {size} requested")]
    ParameterSource { available: usize, size: usize },
    #[error("parse array of {len} bytes exceeds {max}")]
    ParseArrayLength { len: usize, max: usize },
    #[error("frame length {len} outside 1..={max}")]
    FrameLength { len: usize, max: usize },
    #[error("cycle limit {limit} exceeds {max}")]
    CycleLimit { limit: u16, max: u16 },
    #[error("no frame set for simulation")]
    NoFrame,
    #[error("frame attribute flag {index} beyond {limit} flags")]
    FafFlag { index: u8, limit: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("invalid hex digit {0:?}")]
    Digit(char),
    #[error("odd number of hex digits")]
    OddLength,
}

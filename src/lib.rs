//! Decoder and simulator for soft-parser byte-code, the small instruction set
//! run by the packet-parsing coprocessor of DPAA1 and DPAA2 network hardware.

pub mod config;
pub mod cpu;
pub mod decoder;
pub mod error;
pub mod loader;
pub mod memory;
pub mod shell;
pub mod variant;

pub use cpu::{RunReport, Simulator, StatusCode, Termination};
pub use decoder::{Decoder, Instruction, InstructionKind, Opcode};
pub use error::{DestinationError, Fault, ParameterError, SimError};
pub use variant::Variant;

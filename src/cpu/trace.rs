use std::fmt;

use crate::decoder::{Columns, Instruction, Wr};
use crate::error::Fault;
use crate::shell::{ProtocolJump, Shell};
use crate::variant::Variant;

/// A single state change made while executing an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Wr { wr: Wr, value: u64 },
    Wo(u16),
    HeaderBase { hb: u16 },
    /// `hb += wo`, then window offset and both working registers cleared.
    Advance { hb: u16 },
    ParseArray { start: usize, bytes: Vec<u8> },
    Faf { position: usize, byte: u8, mask: u8 },
    Lcv(u32),
    Branch { taken: bool },
    CaseMatch { lane: usize },
    Jump { target: u16 },
    ReturnPc(u16),
    Return { target: u16 },
    Shell(Shell),
    Protocol(ProtocolJump),
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Wr { wr, value } => write!(
                f,
                "WR{wr} = 0x{:08x}-{:08x}",
                value >> 32,
                value & 0xFFFF_FFFF
            ),
            Effect::Wo(wo) => write!(f, "WO = 0x{wo:x}"),
            Effect::HeaderBase { hb } => write!(f, "HB = 0x{hb:x}, WO = 0x0"),
            Effect::Advance { hb } => write!(f, "HB = 0x{hb:x}, WO = 0x0, WR0 = WR1 = 0"),
            Effect::ParseArray { start, bytes } => {
                write!(f, "RA[{start}..{}] =", start + bytes.len())?;
                for byte in bytes {
                    write!(f, " {byte:02x}")?;
                }
                Ok(())
            }
            Effect::Faf {
                position,
                byte,
                mask,
            } => write!(f, "RA[{position}] = {byte:02x} mask = {mask:02x}"),
            Effect::Lcv(lcv) => write!(f, "LCV = 0x{lcv:08x}"),
            Effect::Branch { taken } => {
                f.write_str(if *taken { "condition true" } else { "condition false" })
            }
            Effect::CaseMatch { lane } => write!(f, "WR0[w0] == WR1[w{lane}]"),
            Effect::Jump { target } => write!(f, "PC = 0x{target:03x}"),
            Effect::ReturnPc(pc) => write!(f, "Return PC = 0x{pc:03x}"),
            Effect::Return { target } => write!(f, "Return to PC = 0x{target:03x}"),
            Effect::Shell(shell) => write!(f, "Hard HXS called: {}", shell.name()),
            Effect::Protocol(jump) => write!(
                f,
                "L{} next header 0x{:04x} ({}) -> {}",
                jump.class.layer(),
                jump.next_header,
                jump.protocol,
                jump.shell_name()
            ),
        }
    }
}

/// One fetched instruction with everything it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub address: u16,
    /// Instruction number and cycle limit, in simulation mode.
    pub counter: Option<(u16, u16)>,
    pub words: Vec<u16>,
    /// `None` when the fetch or decode failed.
    pub instruction: Option<Instruction>,
    pub effects: Vec<Effect>,
    pub fault: Option<Fault>,
}

impl Step {
    pub fn display(&self, variant: Variant) -> StepText<'_> {
        StepText {
            step: self,
            variant,
        }
    }
}

pub struct StepText<'a> {
    step: &'a Step,
    variant: Variant,
}

impl fmt::Display for StepText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = self.step;
        let columns = Columns {
            address: step.address,
            counter: step.counter,
            words: &step.words,
        };
        write!(f, "{columns}")?;
        match &step.instruction {
            Some(instruction) => write!(f, "{}", instruction.kind.mnemonic(self.variant))?,
            None if matches!(step.fault, Some(Fault::InvalidOpcode { .. })) => {
                f.write_str("Unknown OpCode;")?
            }
            None => f.write_str("??")?,
        }
        for effect in &step.effects {
            write!(f, "\n\t\t {effect}")?;
        }
        if let Some(fault) = &step.fault {
            write!(f, "\n\t\t ERROR : {fault}")?;
        }
        Ok(())
    }
}

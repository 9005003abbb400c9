use super::{
    AddSub, BitwiseOp, Case, Condition, Destination, Immediate, Instruction,
    InstructionKind, ShiftDirection, Wr,
};
use crate::shell::{ProtocolClass, describe_target};
use crate::variant::Variant;
use std::fmt;

const WORD_COLUMNS: usize = 5;
const LANE_INDENT: &str = "                              ";

impl fmt::Display for Wr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Condition::Equal => "EQ",
            Condition::NotEqual => "NE",
            Condition::Greater => "GT",
            Condition::Less => "LT",
            Condition::GreaterOrEqual => "GE",
            Condition::LessOrEqual => "LE",
            Condition::Never(_) => "XX",
        };
        f.write_str(s)
    }
}

impl fmt::Display for BitwiseOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BitwiseOp::Or => "OR",
            BitwiseOp::And => "AND",
            BitwiseOp::Xor => "XOR",
            BitwiseOp::Clear => "XX",
        };
        f.write_str(s)
    }
}

/// Lanes are named iv3 (least significant) down to iv0.
impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.words().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "iv{}:0x{:04x}", 3 - i, word)?;
        }
        f.write_str(";")
    }
}

/// Destination operand text, e.g. `d:G|L|S|0x4;` or `d:A|0x7ff (End Parsing); hb += wo;`.
pub struct DestinationText {
    dest: Destination,
    variant: Variant,
}

impl Destination {
    pub fn display(&self, variant: Variant) -> DestinationText {
        DestinationText {
            dest: *self,
            variant,
        }
    }
}

impl fmt::Display for DestinationText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dest = &self.dest;
        f.write_str("d:")?;
        if dest.gosub {
            f.write_str("G|")?;
        }
        if dest.relative {
            f.write_str("L|")?;
        }
        if dest.advance {
            f.write_str("A|")?;
        }
        if dest.relative {
            if dest.negative() {
                f.write_str("S|")?;
            }
            write!(f, "0x{:x}", dest.offset(self.variant))?;
        } else {
            let address = dest.address(self.variant);
            write!(f, "0x{address:x}")?;
            if let Some(name) = describe_target(self.variant, address) {
                write!(f, " ({name})")?;
            }
        }
        if dest.advance {
            f.write_str("; hb += wo")?;
        }
        f.write_str(";")
    }
}

/// Canonical mnemonic and operands of a decoded instruction.
pub struct Mnemonic<'a> {
    kind: &'a InstructionKind,
    variant: Variant,
}

impl InstructionKind {
    pub fn mnemonic(&self, variant: Variant) -> Mnemonic<'_> {
        Mnemonic {
            kind: self,
            variant,
        }
    }
}

fn load_prefix(shift: bool) -> &'static str {
    if shift { "LDS" } else { "LD" }
}

fn first(end: u8, count: u8) -> u8 {
    end + 1 - count
}

impl fmt::Display for Mnemonic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = self.variant;
        match *self.kind {
            InstructionKind::Nop => f.write_str("NOP;"),
            InstructionKind::AdvanceHbByWo => f.write_str("ADVANCE_HB_BY_WO;"),
            InstructionKind::ZeroWr { wr } => write!(f, "ZERO_WR{wr};"),
            InstructionKind::OnesCmpWr1ToWr0 => f.write_str("ONES_CMP_WR1_TO_WR0;"),
            InstructionKind::ReturnSub => f.write_str("RETURN_SUB;"),
            InstructionKind::ConfirmLayerMask => f.write_str("DPAA1_CONFIRM_LAYER_MASK;"),
            InstructionKind::OrIvLcv { imm } => write!(f, "DPAA1_OR_IV_LCV {imm}"),
            InstructionKind::LoadLcvToWr { wr } => write!(f, "DPAA1_LD_LCV_TO_WR{wr};"),
            InstructionKind::StoreWrToLcv { wr } => write!(f, "DPAA1_ST_WR{wr}_TO_LCV;"),
            InstructionKind::CompareWr0ToIv {
                condition,
                imm,
                dest,
            } => write!(
                f,
                "DPAA1_CMP_WR0_{condition}_IMM{} d:0x{:x}, {imm}",
                imm.bits(),
                dest.address(variant)
            ),
            InstructionKind::Case(case) => write_case(f, &case, variant),
            InstructionKind::JumpProtocol { field } => write!(
                f,
                "JUMP_TO_L{}_NEXT_HEADER;",
                ProtocolClass::from_field(field).layer()
            ),
            InstructionKind::AddSubWrWr { op, src, dst } => match op {
                AddSub::Add => write!(f, "ADD32_WR{src}_TO_WR{dst};"),
                AddSub::Sub => write!(f, "SUB32_WR{src}_FROM_WR{dst};"),
            },
            InstructionKind::AddSubWrIv { op, src, dst, imm } => {
                let name = match op {
                    AddSub::Add => "ADD32",
                    AddSub::Sub => "SUB32",
                };
                write!(f, "{name}_WR{src}_IMM{}_TO_WR{dst} {imm}", imm.bits())
            }
            InstructionKind::BitwiseWrWr { op, dst } => write!(f, "{op}_WR0_WR1_TO_WR{dst};"),
            InstructionKind::CompareWr0Wr1 { condition, dest } => {
                write!(f, "CMP_WR0_{condition}_WR1 {}", dest.display(variant))
            }
            InstructionKind::ModifyWoByWr { add, wr } => {
                if add {
                    write!(f, "ADD_WR{wr}_TO_WO;")
                } else {
                    write!(f, "LD_WR{wr}_TO_WO;")
                }
            }
            InstructionKind::BitwiseWrIv { op, src, dst, imm } => {
                write!(f, "{op}_WR{src}_IMM{}_TO_WR{dst} {imm}", imm.bits())
            }
            InstructionKind::Shift {
                direction,
                wr,
                amount,
            } => {
                let name = match direction {
                    ShiftDirection::Left => "SHL",
                    ShiftDirection::Right => "SHR",
                };
                write!(f, "{name}_WR{wr}_BY_SV sv:{amount};")
            }
            InstructionKind::LoadBitsIvToWr {
                shift,
                wr,
                bits,
                imm,
            } => write!(
                f,
                "{}_IMM_BITS_TO_WR{wr} bits:{bits} {imm}",
                load_prefix(shift)
            ),
            InstructionKind::LoadSvToWo { value } => write!(f, "LD_SV_TO_WO sv:{value};"),
            InstructionKind::AddSvToWo { value } => write!(f, "ADD_SV_TO_WO sv:{value};"),
            InstructionKind::SetClrFaf { set, index } => {
                let name = if set { "SET" } else { "CLEAR" };
                write!(f, "{name}_FAF_BIT bit:{index};")
            }
            InstructionKind::JumpFaf { index, dest } => {
                let name = if dest.gosub { "GOSUB_FAF" } else { "JUMP_FAF" };
                write!(f, "{name} bit:{index}, {}", dest.display(variant))
            }
            InstructionKind::Jump { dest } => {
                let name = match variant {
                    Variant::Dpaa1 => "DPAA1_JUMP",
                    Variant::Dpaa2 if dest.gosub => "GOSUB",
                    Variant::Dpaa2 => "JUMP",
                };
                write!(f, "{name} {}", dest.display(variant))
            }
            InstructionKind::StoreIvToRa { end, count, imm } => write!(
                f,
                "ST_IMM_BYTES_TO_RA to_byte:{}, bytes:{count} {imm}",
                first(end, count)
            ),
            InstructionKind::LoadBytesPaToWr {
                shift,
                wr,
                end,
                count,
            } => write!(
                f,
                "{}_PA_TO_WR{wr} from_byte:{}, bytes:{count};",
                load_prefix(shift),
                first(end, count)
            ),
            InstructionKind::StoreWrToRa { wr, end, count } => write!(
                f,
                "ST_WR{wr}_TO_RA to_byte:{}, bytes:{count};",
                first(end, count)
            ),
            InstructionKind::LoadBytesRaToWr {
                shift,
                wr,
                end,
                count,
            } => write!(
                f,
                "{}_RA_TO_WR{wr} from_byte:{}, bytes:{count};",
                load_prefix(shift),
                first(end, count)
            ),
            InstructionKind::LoadBitsFwToWr {
                shift,
                wr,
                end,
                count,
            } => write!(
                f,
                "{}_FW_TO_WR{wr} from_bit:{}, bits:{count};",
                load_prefix(shift),
                first(end, count)
            ),
        }
    }
}

fn write_case(f: &mut fmt::Formatter<'_>, case: &Case, variant: Variant) -> fmt::Result {
    f.write_str(case.kind.mnemonic())?;
    for (lane, dest) in case.lane_destinations().iter().enumerate() {
        write!(
            f,
            "\n{LANE_INDENT}WR0[w0] == WR1[w{lane}] : {}",
            dest.display(variant)
        )?;
    }
    match case.default_destination() {
        Some(dest) => write!(f, "\n{LANE_INDENT}DEFAULT JUMP (DJ)  : {}", dest.display(variant)),
        None => write!(f, "\n{LANE_INDENT}DEFAULT            : CONTINUE (DC);"),
    }
}

/// Address, instruction-counter and raw-word columns of a listing line.
pub struct Columns<'a> {
    pub address: u16,
    pub counter: Option<(u16, u16)>,
    pub words: &'a [u16],
}

impl fmt::Display for Columns<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03x}", self.address)?;
        if let Some((count, limit)) = self.counter {
            write!(f, "[{count}:{limit}]")?;
        }
        f.write_str(": ")?;
        for column in 0..WORD_COLUMNS {
            match self.words.get(column) {
                Some(word) => write!(f, "{word:04x} ")?,
                None => f.write_str("____ ")?,
            }
        }
        Ok(())
    }
}

/// One listing line for a decoded instruction.
pub struct Listing<'a> {
    pub instruction: &'a Instruction,
    pub variant: Variant,
    pub counter: Option<(u16, u16)>,
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = Columns {
            address: self.instruction.address,
            counter: self.counter,
            words: &self.instruction.words,
        };
        write!(
            f,
            "{columns}{}",
            self.instruction.kind.mnemonic(self.variant)
        )
    }
}

impl Instruction {
    pub fn listing(&self, variant: Variant) -> Listing<'_> {
        Listing {
            instruction: self,
            variant,
            counter: None,
        }
    }
}

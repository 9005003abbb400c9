use crate::error::{DestinationError, Fault, ParameterError};
use crate::memory::Program;
use crate::variant::{DEST_GOSUB_BIT, DEST_RELATIVE_BIT, DEST_SIGN_BIT, Variant};

mod display;

pub use display::{Columns, DestinationText, Listing, Mnemonic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    ConfirmLayerMask,
    OrIvLcv,
    LoadLcvToWr,
    StoreWrToLcv,
    CompareWr0ToIv,
    ReturnSub,
    SetClrFaf,
    JumpFaf,
    JumpGosub,
    Nop,
    AdvanceHbByWo,
    ZeroWr,
    OnesCmpWr1ToWr0,
    Case1Dj,
    Case2Dc,
    Case2Dj,
    Case3Dc,
    Case3Dj,
    Case4Dc,
    JumpProtocol,
    AddSubWrWr,
    AddSubWrIv,
    BitwiseWrWr,
    CompareWr0Wr1,
    ModifyWoByWr,
    BitwiseWrIv,
    ShiftLeftWr,
    ShiftRightWr,
    LoadBitsIvToWr,
    LoadSvToWo,
    AddSvToWo,
    StoreIvToRa,
    LoadBytesPaToWr,
    StoreWrToRa,
    LoadBytesRaToWr,
    LoadBitsFwToWr,
}

impl Opcode {
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::ConfirmLayerMask => "CONFIRM_LAYER_MASK",
            Opcode::OrIvLcv => "OR_IV_LCV",
            Opcode::LoadLcvToWr => "LOAD_LCV_TO_WR",
            Opcode::StoreWrToLcv => "STORE_WR_TO_LCV",
            Opcode::CompareWr0ToIv => "COMPARE_WR0_TO_IV",
            Opcode::ReturnSub => "RETURN_SUB",
            Opcode::SetClrFaf => "SET_CLR_FAF",
            Opcode::JumpFaf => "JUMP_FAF",
            Opcode::JumpGosub => "JUMP_GOSUB",
            Opcode::Nop => "NOP",
            Opcode::AdvanceHbByWo => "ADVANCE_HB_BY_WO",
            Opcode::ZeroWr => "ZERO_WR",
            Opcode::OnesCmpWr1ToWr0 => "ONES_CMP_WR1_TO_WR0",
            Opcode::Case1Dj => "CASE1_DJ_WR_TO_WR",
            Opcode::Case2Dc => "CASE2_DC_WR_TO_WR",
            Opcode::Case2Dj => "CASE2_DJ_WR_TO_WR",
            Opcode::Case3Dc => "CASE3_DC_WR_TO_WR",
            Opcode::Case3Dj => "CASE3_DJ_WR_TO_WR",
            Opcode::Case4Dc => "CASE4_DC_WR_TO_WR",
            Opcode::JumpProtocol => "JUMP_PROTOCOL",
            Opcode::AddSubWrWr => "ADD_SUB_WR_WR_TO_WR",
            Opcode::AddSubWrIv => "ADD_SUB_WR_IV_TO_WR",
            Opcode::BitwiseWrWr => "BITWISE_WR_WR_TO_WR",
            Opcode::CompareWr0Wr1 => "COMPARE_WORKING_REGS",
            Opcode::ModifyWoByWr => "MODIFY_WO_BY_WR",
            Opcode::BitwiseWrIv => "BITWISE_WR_IV_TO_WR",
            Opcode::ShiftLeftWr => "SHIFT_LEFT_WR_BY_SV",
            Opcode::ShiftRightWr => "SHIFT_RIGHT_WR_BY_SV",
            Opcode::LoadBitsIvToWr => "LOAD_BITS_IV_TO_WR",
            Opcode::LoadSvToWo => "LOAD_SV_TO_WO",
            Opcode::AddSvToWo => "ADD_SV_TO_WO",
            Opcode::StoreIvToRa => "STORE_IV_TO_RA",
            Opcode::LoadBytesPaToWr => "LOAD_BYTES_PA_TO_WR",
            Opcode::StoreWrToRa => "STORE_WR_TO_RA",
            Opcode::LoadBytesRaToWr => "LOAD_BYTES_RA_TO_WR",
            Opcode::LoadBitsFwToWr => "LOAD_BITS_FW_TO_WR",
        }
    }

    /// Total words taken by an instruction whose first word is `word`.
    pub fn word_count(self, variant: Variant, word: u16) -> usize {
        match self {
            Opcode::OrIvLcv => 3,
            Opcode::CompareWr0ToIv => bit_range(word, 10, 12) as usize + 2,
            Opcode::Case1Dj | Opcode::Case2Dc => 3,
            Opcode::Case2Dj | Opcode::Case3Dc => 4,
            Opcode::Case3Dj | Opcode::Case4Dc => 5,
            Opcode::AddSubWrIv => bit_range(word, 3, 4) as usize + 2,
            Opcode::BitwiseWrIv => bit_range(word, 3, 5) as usize + 2,
            Opcode::LoadBitsIvToWr => bit_range(word, 1, 7) as usize / 16 + 2,
            Opcode::StoreIvToRa => bit_range(word, 7, 10) as usize / 2 + 2,
            Opcode::CompareWr0Wr1 | Opcode::JumpFaf => 2,
            Opcode::JumpGosub => match variant {
                Variant::Dpaa1 => 1,
                Variant::Dpaa2 => 2,
            },
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeDescriptor {
    pub opcode: Opcode,
    pub pattern: u16,
    pub mask: u16,
}

impl OpcodeDescriptor {
    pub const fn matches(&self, word: u16) -> bool {
        word & self.mask == self.pattern
    }
}

const fn entry(opcode: Opcode, pattern: u16, mask: u16) -> OpcodeDescriptor {
    OpcodeDescriptor {
        opcode,
        pattern,
        mask,
    }
}

// Shared by both revisions, in priority order.
macro_rules! common_catalog {
    ($($revision_specific:expr),* $(,)?) => {
        &[
            $($revision_specific,)*
            entry(Opcode::Nop, 0x0000, 0xFFFF),
            entry(Opcode::AdvanceHbByWo, 0x0002, 0xFFFF),
            entry(Opcode::ZeroWr, 0x0004, 0xFFFE),
            entry(Opcode::OnesCmpWr1ToWr0, 0x0006, 0xFFFF),
            entry(Opcode::Case1Dj, 0x0008, 0xFFFC),
            entry(Opcode::Case2Dc, 0x000C, 0xFFFC),
            entry(Opcode::Case2Dj, 0x0010, 0xFFF8),
            entry(Opcode::Case3Dc, 0x0018, 0xFFF8),
            entry(Opcode::Case3Dj, 0x0020, 0xFFF0),
            entry(Opcode::Case4Dc, 0x0030, 0xFFF0),
            entry(Opcode::JumpProtocol, 0x0044, 0xFFFC),
            entry(Opcode::AddSubWrWr, 0x0048, 0xFFF8),
            entry(Opcode::AddSubWrIv, 0x0050, 0xFFF0),
            entry(Opcode::BitwiseWrWr, 0x0070, 0xFFF8),
            entry(Opcode::CompareWr0Wr1, 0x0078, 0xFFF8),
            entry(Opcode::ModifyWoByWr, 0x0080, 0xFFFC),
            entry(Opcode::BitwiseWrIv, 0x00C0, 0xFFC0),
            entry(Opcode::ShiftLeftWr, 0x0100, 0xFF80),
            entry(Opcode::ShiftRightWr, 0x0180, 0xFF80),
            entry(Opcode::LoadBitsIvToWr, 0x0200, 0xFF00),
            entry(Opcode::LoadSvToWo, 0x0600, 0xFF00),
            entry(Opcode::AddSvToWo, 0x0700, 0xFF00),
            entry(Opcode::StoreIvToRa, 0x0800, 0xFC00),
            entry(Opcode::LoadBytesPaToWr, 0x1000, 0xF800),
            entry(Opcode::StoreWrToRa, 0x2800, 0xF800),
            entry(Opcode::LoadBytesRaToWr, 0x3000, 0xF000),
            entry(Opcode::LoadBitsFwToWr, 0x8000, 0x8000),
        ]
    };
}

pub static DPAA1_CATALOG: &[OpcodeDescriptor] = common_catalog![
    entry(Opcode::ConfirmLayerMask, 0x0001, 0xFFFF),
    entry(Opcode::OrIvLcv, 0x0003, 0xFFFF),
    entry(Opcode::LoadLcvToWr, 0x0040, 0xFFFE),
    entry(Opcode::StoreWrToLcv, 0x0042, 0xFFFE),
    entry(Opcode::JumpGosub, 0x1800, 0xF800),
    entry(Opcode::CompareWr0ToIv, 0x4000, 0xC000),
];

pub static DPAA2_CATALOG: &[OpcodeDescriptor] = common_catalog![
    entry(Opcode::ReturnSub, 0x0007, 0xFFFF),
    entry(Opcode::SetClrFaf, 0x0300, 0xFF00),
    entry(Opcode::JumpFaf, 0x0C00, 0xFF00),
    entry(Opcode::JumpGosub, 0x1800, 0xFFFC),
];

pub fn catalog(variant: Variant) -> &'static [OpcodeDescriptor] {
    match variant {
        Variant::Dpaa1 => DPAA1_CATALOG,
        Variant::Dpaa2 => DPAA2_CATALOG,
    }
}

/// First catalog entry matching `word`, scanning in priority order.
pub fn find_opcode(variant: Variant, word: u16) -> Option<Opcode> {
    first_match(catalog(variant), word)
}

fn first_match(entries: &[OpcodeDescriptor], word: u16) -> Option<Opcode> {
    entries
        .iter()
        .find(|descriptor| descriptor.matches(word))
        .map(|descriptor| descriptor.opcode)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wr {
    Wr0,
    Wr1,
}

impl Wr {
    fn from_bit(set: bool) -> Self {
        if set { Wr::Wr1 } else { Wr::Wr0 }
    }

    pub const fn index(self) -> usize {
        match self {
            Wr::Wr0 => 0,
            Wr::Wr1 => 1,
        }
    }

    const fn bits(self) -> u16 {
        self.index() as u16
    }
}

/// A raw destination field plus the flags that steer its resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub field: u16,
    pub advance: bool,
    pub gosub: bool,
    pub relative: bool,
}

impl Destination {
    /// Destination held in a dedicated destination word.
    pub fn from_word(variant: Variant, word: u16, advance: bool) -> Self {
        let (gosub, relative) = if variant.has_destination_flags() {
            dest_flags(word)
        } else {
            (false, false)
        };
        Self {
            field: word,
            advance,
            gosub,
            relative,
        }
    }

    /// Absolute destination embedded in the opcode word itself.
    pub fn absolute(field: u16, advance: bool) -> Self {
        Self {
            field,
            advance,
            gosub: false,
            relative: false,
        }
    }

    pub fn check(&self, variant: Variant) -> Result<(), DestinationError> {
        if self.field & !variant.legal_destination_bits() != 0 {
            return Err(DestinationError::IllegalBits { field: self.field });
        }
        Ok(())
    }

    pub fn address(&self, variant: Variant) -> u16 {
        self.field & variant.address_mask()
    }

    pub fn negative(&self) -> bool {
        self.relative && self.field & DEST_SIGN_BIT != 0
    }

    /// Magnitude of a relative jump.
    pub fn offset(&self, variant: Variant) -> u16 {
        self.address(variant) & !DEST_SIGN_BIT
    }
}

/// G and L bits of a destination word.
pub fn dest_flags(word: u16) -> (bool, bool) {
    (word & DEST_GOSUB_BIT != 0, word & DEST_RELATIVE_BIT != 0)
}

/// 16 to 64 bit immediate; the first word holds the least significant bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Immediate {
    words: [u16; 4],
    len: u8,
}

impl Immediate {
    pub fn from_words(words: &[u16]) -> Self {
        let len = words.len().min(4);
        let mut stored = [0u16; 4];
        stored[..len].copy_from_slice(&words[..len]);
        Self {
            words: stored,
            len: len as u8,
        }
    }

    pub fn words(&self) -> &[u16] {
        &self.words[..self.len as usize]
    }

    pub fn value(&self) -> u64 {
        self.words()
            .iter()
            .enumerate()
            .fold(0, |acc, (lane, word)| acc | (*word as u64) << (16 * lane))
    }

    pub fn bits(&self) -> u32 {
        16 * self.len as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddSub {
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOp {
    Or,
    And,
    Xor,
    /// Undefined encoding; clears the destination.
    Clear,
}

impl BitwiseOp {
    fn from_bits(bits: u16) -> Self {
        match bits & 0x3 {
            0 => BitwiseOp::Or,
            1 => BitwiseOp::And,
            2 => BitwiseOp::Xor,
            _ => BitwiseOp::Clear,
        }
    }

    const fn bits(self) -> u16 {
        match self {
            BitwiseOp::Or => 0,
            BitwiseOp::And => 1,
            BitwiseOp::Xor => 2,
            BitwiseOp::Clear => 3,
        }
    }

    pub fn apply(self, lhs: u64, rhs: u64) -> u64 {
        match self {
            BitwiseOp::Or => lhs | rhs,
            BitwiseOp::And => lhs & rhs,
            BitwiseOp::Xor => lhs ^ rhs,
            BitwiseOp::Clear => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    /// Encodings 6 and 7 never branch.
    Never(u8),
}

impl Condition {
    fn from_bits(bits: u16) -> Self {
        match bits & 0x7 {
            0 => Condition::Equal,
            1 => Condition::NotEqual,
            2 => Condition::Greater,
            3 => Condition::Less,
            4 => Condition::GreaterOrEqual,
            5 => Condition::LessOrEqual,
            other => Condition::Never(other as u8),
        }
    }

    const fn bits(self) -> u16 {
        match self {
            Condition::Equal => 0,
            Condition::NotEqual => 1,
            Condition::Greater => 2,
            Condition::Less => 3,
            Condition::GreaterOrEqual => 4,
            Condition::LessOrEqual => 5,
            Condition::Never(bits) => bits as u16,
        }
    }

    pub fn holds(self, lhs: u64, rhs: u64) -> bool {
        match self {
            Condition::Equal => lhs == rhs,
            Condition::NotEqual => lhs != rhs,
            Condition::Greater => lhs > rhs,
            Condition::Less => lhs < rhs,
            Condition::GreaterOrEqual => lhs >= rhs,
            Condition::LessOrEqual => lhs <= rhs,
            Condition::Never(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDirection {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseKind {
    Case1Dj,
    Case2Dc,
    Case2Dj,
    Case3Dc,
    Case3Dj,
    Case4Dc,
}

impl CaseKind {
    /// Number of WR1 lanes compared against WR0.
    pub const fn lanes(self) -> usize {
        match self {
            CaseKind::Case1Dj => 1,
            CaseKind::Case2Dc | CaseKind::Case2Dj => 2,
            CaseKind::Case3Dc | CaseKind::Case3Dj => 3,
            CaseKind::Case4Dc => 4,
        }
    }

    /// Whether a miss on every lane jumps to a final default destination
    /// instead of continuing.
    pub const fn default_jump(self) -> bool {
        matches!(
            self,
            CaseKind::Case1Dj | CaseKind::Case2Dj | CaseKind::Case3Dj
        )
    }

    pub const fn destinations(self) -> usize {
        self.lanes() + self.default_jump() as usize
    }

    const fn pattern(self) -> u16 {
        match self {
            CaseKind::Case1Dj => 0x0008,
            CaseKind::Case2Dc => 0x000C,
            CaseKind::Case2Dj => 0x0010,
            CaseKind::Case3Dc => 0x0018,
            CaseKind::Case3Dj => 0x0020,
            CaseKind::Case4Dc => 0x0030,
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            CaseKind::Case1Dj => "CASE1_DJ_WR_to_WR",
            CaseKind::Case2Dc => "CASE2_DC_WR_to_WR",
            CaseKind::Case2Dj => "CASE2_DJ_WR_to_WR",
            CaseKind::Case3Dc => "CASE3_DC_WR_to_WR",
            CaseKind::Case3Dj => "CASE3_DJ_WR_to_WR",
            CaseKind::Case4Dc => "CASE4_DC_WR_to_WR",
        }
    }
}

/// Multi-way branch. Destination `i` is taken when lane `i` matches; a
/// default-jump case keeps its default destination last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Case {
    pub kind: CaseKind,
    dests: [Destination; 4],
}

impl Case {
    pub fn destinations(&self) -> &[Destination] {
        &self.dests[..self.kind.destinations()]
    }

    pub fn lane_destinations(&self) -> &[Destination] {
        &self.dests[..self.kind.lanes()]
    }

    pub fn default_destination(&self) -> Option<&Destination> {
        self.kind
            .default_jump()
            .then(|| &self.dests[self.kind.lanes()])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    Nop,
    AdvanceHbByWo,
    ZeroWr {
        wr: Wr,
    },
    OnesCmpWr1ToWr0,
    ReturnSub,
    ConfirmLayerMask,
    OrIvLcv {
        imm: Immediate,
    },
    LoadLcvToWr {
        wr: Wr,
    },
    StoreWrToLcv {
        wr: Wr,
    },
    CompareWr0ToIv {
        condition: Condition,
        imm: Immediate,
        dest: Destination,
    },
    Case(Case),
    JumpProtocol {
        field: u8,
    },
    AddSubWrWr {
        op: AddSub,
        src: Wr,
        dst: Wr,
    },
    AddSubWrIv {
        op: AddSub,
        src: Wr,
        dst: Wr,
        imm: Immediate,
    },
    BitwiseWrWr {
        op: BitwiseOp,
        dst: Wr,
    },
    CompareWr0Wr1 {
        condition: Condition,
        dest: Destination,
    },
    ModifyWoByWr {
        add: bool,
        wr: Wr,
    },
    BitwiseWrIv {
        op: BitwiseOp,
        src: Wr,
        dst: Wr,
        imm: Immediate,
    },
    Shift {
        direction: ShiftDirection,
        wr: Wr,
        amount: u8,
    },
    LoadBitsIvToWr {
        shift: bool,
        wr: Wr,
        bits: u8,
        imm: Immediate,
    },
    LoadSvToWo {
        value: u8,
    },
    AddSvToWo {
        value: u8,
    },
    SetClrFaf {
        set: bool,
        index: u8,
    },
    JumpFaf {
        index: u8,
        dest: Destination,
    },
    Jump {
        dest: Destination,
    },
    /// Writes bytes `end - count + 1 ..= end` of the parse array.
    StoreIvToRa {
        end: u8,
        count: u8,
        imm: Immediate,
    },
    LoadBytesPaToWr {
        shift: bool,
        wr: Wr,
        end: u8,
        count: u8,
    },
    StoreWrToRa {
        wr: Wr,
        end: u8,
        count: u8,
    },
    LoadBytesRaToWr {
        shift: bool,
        wr: Wr,
        end: u8,
        count: u8,
    },
    /// `end` and `count` are in bits here.
    LoadBitsFwToWr {
        shift: bool,
        wr: Wr,
        end: u8,
        count: u8,
    },
}

impl InstructionKind {
    /// Re-encodes the decoded fields. Bits the decoder ignores come back as zero.
    pub fn encode(&self, variant: Variant) -> Vec<u16> {
        let mut words = Vec::with_capacity(5);
        match *self {
            InstructionKind::Nop => words.push(0x0000),
            InstructionKind::AdvanceHbByWo => words.push(0x0002),
            InstructionKind::ZeroWr { wr } => words.push(0x0004 | wr.bits()),
            InstructionKind::OnesCmpWr1ToWr0 => words.push(0x0006),
            InstructionKind::ReturnSub => words.push(0x0007),
            InstructionKind::ConfirmLayerMask => words.push(0x0001),
            InstructionKind::OrIvLcv { imm } => {
                words.push(0x0003);
                words.extend_from_slice(imm.words());
            }
            InstructionKind::LoadLcvToWr { wr } => words.push(0x0040 | wr.bits()),
            InstructionKind::StoreWrToLcv { wr } => words.push(0x0042 | wr.bits()),
            InstructionKind::CompareWr0ToIv {
                condition,
                imm,
                dest,
            } => {
                words.push(
                    0x4000
                        | condition.bits() << 12
                        | (imm.words().len() as u16 - 1) << 10
                        | (dest.field & 0x03FF),
                );
                words.extend_from_slice(imm.words());
            }
            InstructionKind::Case(case) => {
                let advance = case
                    .destinations()
                    .iter()
                    .enumerate()
                    .fold(0, |acc, (i, dest)| acc | (dest.advance as u16) << i);
                words.push(case.kind.pattern() | advance);
                words.extend(case.destinations().iter().map(|dest| dest.field));
            }
            InstructionKind::JumpProtocol { field } => words.push(0x0044 | field as u16),
            InstructionKind::AddSubWrWr { op, src, dst } => {
                words.push(0x0048 | dst.bits() << 2 | ((op == AddSub::Sub) as u16) << 1 | src.bits())
            }
            InstructionKind::AddSubWrIv { op, src, dst, imm } => {
                words.push(
                    0x0050
                        | (imm.words().len() as u16 - 1) << 3
                        | dst.bits() << 2
                        | ((op == AddSub::Sub) as u16) << 1
                        | src.bits(),
                );
                words.extend_from_slice(imm.words());
            }
            InstructionKind::BitwiseWrWr { op, dst } => {
                words.push(0x0070 | op.bits() << 1 | dst.bits())
            }
            InstructionKind::CompareWr0Wr1 { condition, dest } => {
                words.push(0x0078 | condition.bits());
                words.push(dest.field);
            }
            InstructionKind::ModifyWoByWr { add, wr } => {
                words.push(0x0080 | (add as u16) << 1 | wr.bits())
            }
            InstructionKind::BitwiseWrIv { op, src, dst, imm } => {
                words.push(
                    0x00C0
                        | dst.bits() << 5
                        | (imm.words().len() as u16 - 1) << 3
                        | op.bits() << 1
                        | src.bits(),
                );
                words.extend_from_slice(imm.words());
            }
            InstructionKind::Shift {
                direction,
                wr,
                amount,
            } => {
                let base = match direction {
                    ShiftDirection::Left => 0x0100,
                    ShiftDirection::Right => 0x0180,
                };
                words.push(base | (amount as u16 - 1) << 1 | wr.bits());
            }
            InstructionKind::LoadBitsIvToWr {
                shift,
                wr,
                bits,
                imm,
            } => {
                words.push(0x0200 | (shift as u16) << 7 | (bits as u16 - 1) << 1 | wr.bits());
                words.extend_from_slice(imm.words());
            }
            InstructionKind::LoadSvToWo { value } => words.push(0x0600 | value as u16),
            InstructionKind::AddSvToWo { value } => words.push(0x0700 | value as u16),
            InstructionKind::SetClrFaf { set, index } => {
                words.push(0x0300 | (set as u16) << 7 | index as u16)
            }
            InstructionKind::JumpFaf { index, dest } => {
                words.push(0x0C00 | (dest.advance as u16) << 7 | index as u16);
                words.push(dest.field);
            }
            InstructionKind::Jump { dest } => match variant {
                Variant::Dpaa1 => {
                    words.push(0x1800 | (dest.advance as u16) << 10 | (dest.field & 0x03FF))
                }
                Variant::Dpaa2 => {
                    words.push(0x1800 | dest.advance as u16);
                    words.push(dest.field);
                }
            },
            InstructionKind::StoreIvToRa { end, count, imm } => {
                words.push(0x0800 | (count as u16 - 1) << 7 | end as u16);
                words.extend_from_slice(imm.words());
            }
            InstructionKind::LoadBytesPaToWr {
                shift,
                wr,
                end,
                count,
            } => words.push(
                0x1000 | (shift as u16) << 10 | (end as u16) << 4 | (count as u16 - 1) << 1 | wr.bits(),
            ),
            InstructionKind::StoreWrToRa { wr, end, count } => {
                words.push(0x2800 | (count as u16 - 1) << 8 | (end as u16) << 1 | wr.bits())
            }
            InstructionKind::LoadBytesRaToWr {
                shift,
                wr,
                end,
                count,
            } => words.push(
                0x3000 | (shift as u16) << 11 | (end as u16) << 4 | (count as u16 - 1) << 1 | wr.bits(),
            ),
            InstructionKind::LoadBitsFwToWr {
                shift,
                wr,
                end,
                count,
            } => words.push(
                0x8000 | (shift as u16) << 14 | (end as u16) << 7 | (count as u16 - 1) << 1 | wr.bits(),
            ),
        }
        words
    }

    /// Destinations carried by the instruction, in word order.
    pub fn destinations(&self) -> Vec<Destination> {
        match self {
            InstructionKind::CompareWr0ToIv { dest, .. }
            | InstructionKind::CompareWr0Wr1 { dest, .. }
            | InstructionKind::JumpFaf { dest, .. }
            | InstructionKind::Jump { dest } => vec![*dest],
            InstructionKind::Case(case) => case.destinations().to_vec(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub address: u16,
    pub opcode: Opcode,
    pub words: Vec<u16>,
    pub kind: InstructionKind,
}

impl Instruction {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn end(&self) -> u16 {
        self.address + self.words.len() as u16
    }
}

pub struct Decoder<'a> {
    program: &'a Program,
    variant: Variant,
}

impl<'a> Decoder<'a> {
    pub fn new(program: &'a Program, variant: Variant) -> Self {
        Self { program, variant }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    /// Decodes every instruction from the program base, stopping at the first fault.
    pub fn decode_instructions(&self) -> Result<Vec<Instruction>, Fault> {
        let mut instructions = Vec::new();
        let mut pc = self.program.base();
        while (pc as usize) < self.program.end() {
            let instruction = self.decode_instruction(pc)?;
            pc = instruction.end();
            instructions.push(instruction);
        }
        Ok(instructions)
    }

    pub fn decode_instruction(&self, pc: u16) -> Result<Instruction, Fault> {
        let opcode_word = self.fetch(pc, 1)?[0];
        let opcode =
            find_opcode(self.variant, opcode_word).ok_or(Fault::InvalidOpcode {
                pc,
                word: opcode_word,
            })?;
        let words = self.fetch(pc, opcode.word_count(self.variant, opcode_word))?;
        let kind = self.decode_kind(opcode, words)?;
        Ok(Instruction {
            address: pc,
            opcode,
            words: words.to_vec(),
            kind,
        })
    }

    fn fetch(&self, pc: u16, count: usize) -> Result<&'a [u16], Fault> {
        if !self.program.contains(pc) {
            return Err(DestinationError::OutsideCode { pc }.into());
        }
        self.program
            .read_words(pc, count)
            .ok_or(Fault::Truncated { pc })
    }

    fn decode_kind(&self, opcode: Opcode, words: &[u16]) -> Result<InstructionKind, Fault> {
        let variant = self.variant;
        let op = words[0];
        let w = Wr::from_bit(bit(op, 0));
        let kind = match opcode {
            Opcode::Nop => InstructionKind::Nop,
            Opcode::AdvanceHbByWo => InstructionKind::AdvanceHbByWo,
            Opcode::ZeroWr => InstructionKind::ZeroWr { wr: w },
            Opcode::OnesCmpWr1ToWr0 => InstructionKind::OnesCmpWr1ToWr0,
            Opcode::ReturnSub => InstructionKind::ReturnSub,
            Opcode::ConfirmLayerMask => InstructionKind::ConfirmLayerMask,
            Opcode::OrIvLcv => InstructionKind::OrIvLcv {
                imm: Immediate::from_words(&words[1..]),
            },
            Opcode::LoadLcvToWr => InstructionKind::LoadLcvToWr { wr: w },
            Opcode::StoreWrToLcv => InstructionKind::StoreWrToLcv { wr: w },
            Opcode::CompareWr0ToIv => InstructionKind::CompareWr0ToIv {
                condition: Condition::from_bits(bit_range(op, 12, 14)),
                imm: Immediate::from_words(&words[1..]),
                dest: Destination::absolute(bit_range(op, 0, 10), false),
            },
            Opcode::Case1Dj => self.decode_case(CaseKind::Case1Dj, words)?,
            Opcode::Case2Dc => self.decode_case(CaseKind::Case2Dc, words)?,
            Opcode::Case2Dj => self.decode_case(CaseKind::Case2Dj, words)?,
            Opcode::Case3Dc => self.decode_case(CaseKind::Case3Dc, words)?,
            Opcode::Case3Dj => self.decode_case(CaseKind::Case3Dj, words)?,
            Opcode::Case4Dc => self.decode_case(CaseKind::Case4Dc, words)?,
            Opcode::JumpProtocol => InstructionKind::JumpProtocol {
                field: bit_range(op, 0, 2) as u8,
            },
            Opcode::AddSubWrWr => InstructionKind::AddSubWrWr {
                op: add_sub(bit(op, 1)),
                src: w,
                dst: Wr::from_bit(bit(op, 2)),
            },
            Opcode::AddSubWrIv => InstructionKind::AddSubWrIv {
                op: add_sub(bit(op, 1)),
                src: w,
                dst: Wr::from_bit(bit(op, 2)),
                imm: Immediate::from_words(&words[1..]),
            },
            Opcode::BitwiseWrWr => InstructionKind::BitwiseWrWr {
                op: BitwiseOp::from_bits(bit_range(op, 1, 3)),
                dst: w,
            },
            Opcode::CompareWr0Wr1 => {
                let dest = Destination::from_word(variant, words[1], false);
                dest.check(variant)?;
                InstructionKind::CompareWr0Wr1 {
                    condition: Condition::from_bits(bit_range(op, 0, 3)),
                    dest,
                }
            }
            Opcode::ModifyWoByWr => InstructionKind::ModifyWoByWr {
                add: bit(op, 1),
                wr: w,
            },
            Opcode::BitwiseWrIv => InstructionKind::BitwiseWrIv {
                op: BitwiseOp::from_bits(bit_range(op, 1, 3)),
                src: w,
                dst: Wr::from_bit(bit(op, 5)),
                imm: Immediate::from_words(&words[1..]),
            },
            Opcode::ShiftLeftWr | Opcode::ShiftRightWr => InstructionKind::Shift {
                direction: if opcode == Opcode::ShiftLeftWr {
                    ShiftDirection::Left
                } else {
                    ShiftDirection::Right
                },
                wr: w,
                amount: bit_range(op, 1, 7) as u8 + 1,
            },
            Opcode::LoadBitsIvToWr => InstructionKind::LoadBitsIvToWr {
                shift: bit(op, 7),
                wr: w,
                bits: bit_range(op, 1, 7) as u8 + 1,
                imm: Immediate::from_words(&words[1..]),
            },
            Opcode::LoadSvToWo => InstructionKind::LoadSvToWo {
                value: bit_range(op, 0, 8) as u8,
            },
            Opcode::AddSvToWo => InstructionKind::AddSvToWo {
                value: bit_range(op, 0, 8) as u8,
            },
            Opcode::SetClrFaf => {
                let index = self.faf_index(op)?;
                InstructionKind::SetClrFaf {
                    set: bit(op, 7),
                    index,
                }
            }
            Opcode::JumpFaf => {
                let index = self.faf_index(op)?;
                let dest = Destination::from_word(variant, words[1], bit(op, 7));
                dest.check(variant)?;
                InstructionKind::JumpFaf { index, dest }
            }
            Opcode::JumpGosub => {
                let dest = match variant {
                    Variant::Dpaa1 => Destination::absolute(bit_range(op, 0, 10), bit(op, 10)),
                    Variant::Dpaa2 => Destination::from_word(variant, words[1], bit(op, 0)),
                };
                dest.check(variant)?;
                InstructionKind::Jump { dest }
            }
            Opcode::StoreIvToRa => {
                let (end, count) = byte_range("parse array", bit_range(op, 0, 7), bit_range(op, 7, 10))?;
                InstructionKind::StoreIvToRa {
                    end,
                    count,
                    imm: Immediate::from_words(&words[1..]),
                }
            }
            Opcode::LoadBytesPaToWr => {
                let (end, count) = byte_range("parameter array", bit_range(op, 4, 10), bit_range(op, 1, 4))?;
                InstructionKind::LoadBytesPaToWr {
                    shift: bit(op, 10),
                    wr: w,
                    end,
                    count,
                }
            }
            Opcode::StoreWrToRa => {
                let (end, count) = byte_range("parse array", bit_range(op, 1, 7), bit_range(op, 8, 11))?;
                InstructionKind::StoreWrToRa { wr: w, end, count }
            }
            Opcode::LoadBytesRaToWr => {
                let (end, count) = byte_range("parse array", bit_range(op, 4, 10), bit_range(op, 1, 4))?;
                InstructionKind::LoadBytesRaToWr {
                    shift: bit(op, 11),
                    wr: w,
                    end,
                    count,
                }
            }
            Opcode::LoadBitsFwToWr => {
                let (end, count) = byte_range("frame bit", bit_range(op, 7, 14), bit_range(op, 1, 7))?;
                InstructionKind::LoadBitsFwToWr {
                    shift: bit(op, 14),
                    wr: w,
                    end,
                    count,
                }
            }
        };
        Ok(kind)
    }

    fn decode_case(&self, kind: CaseKind, words: &[u16]) -> Result<InstructionKind, Fault> {
        let op = words[0];
        let mut dests = [Destination::absolute(0, false); 4];
        for (i, word) in words[1..].iter().enumerate().take(kind.destinations()) {
            let dest = Destination::from_word(self.variant, *word, bit(op, i as u8));
            dest.check(self.variant)?;
            dests[i] = dest;
        }
        Ok(InstructionKind::Case(Case { kind, dests }))
    }

    fn faf_index(&self, op: u16) -> Result<u8, Fault> {
        let index = bit_range(op, 0, 7) as u8;
        let limit = self.variant.faf_bits();
        if index >= limit {
            return Err(ParameterError::FafIndex { index, limit }.into());
        }
        Ok(index)
    }
}

fn add_sub(sub: bool) -> AddSub {
    if sub { AddSub::Sub } else { AddSub::Add }
}

/// `(end, count)` of a range whose encoded length field is `count - 1`.
fn byte_range(what: &'static str, end: u16, len_field: u16) -> Result<(u8, u8), Fault> {
    if end < len_field {
        return Err(ParameterError::ReversedRange {
            what,
            end: end as u8,
            len: len_field as u8 + 1,
        }
        .into());
    }
    Ok((end as u8, len_field as u8 + 1))
}

/// Bits `start..end` of `word`, right-justified.
fn bit_range(word: u16, start: u8, end: u8) -> u16 {
    debug_assert!(end > start && end <= 16);
    let width = end - start;

    let mask = if width == 16 {
        0xFFFF
    } else {
        (1 << width) - 1
    };

    (word >> start) & mask
}

fn bit(word: u16, n: u8) -> bool {
    word >> n & 1 != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(variant: Variant, words: &[u16]) -> Result<Instruction, Fault> {
        let program = Program::from_words(0x20, words.to_vec());
        Decoder::new(&program, variant).decode_instruction(0x20)
    }

    #[test]
    fn every_pattern_decodes_to_its_own_entry() {
        for variant in [Variant::Dpaa1, Variant::Dpaa2] {
            for descriptor in catalog(variant) {
                assert_eq!(descriptor.pattern & descriptor.mask, descriptor.pattern);
                assert_eq!(
                    find_opcode(variant, descriptor.pattern),
                    Some(descriptor.opcode),
                    "{variant:?} {:#06x}",
                    descriptor.pattern
                );
            }
        }
    }

    #[test]
    fn earlier_entries_win_overlaps() {
        let entries = [
            entry(Opcode::ZeroWr, 0x0004, 0xFFFE),
            entry(Opcode::Nop, 0x0000, 0xFFF0),
        ];
        assert_eq!(first_match(&entries, 0x0005), Some(Opcode::ZeroWr));
        assert_eq!(first_match(&entries, 0x0003), Some(Opcode::Nop));
        let reversed = [entries[1], entries[0]];
        assert_eq!(first_match(&reversed, 0x0005), Some(Opcode::Nop));
    }

    #[test]
    fn revision_specific_patterns() {
        assert_eq!(find_opcode(Variant::Dpaa2, 0x0007), Some(Opcode::ReturnSub));
        assert_eq!(find_opcode(Variant::Dpaa1, 0x0007), None);
        // 0x4000 belongs to COMPARE_WR0_TO_IV on Dpaa1 only.
        assert_eq!(find_opcode(Variant::Dpaa1, 0x4123), Some(Opcode::CompareWr0ToIv));
        assert_eq!(find_opcode(Variant::Dpaa2, 0x4123), None);
        // The Dpaa1 jump spans the whole 0x1800 block.
        assert_eq!(find_opcode(Variant::Dpaa1, 0x1C55), Some(Opcode::JumpGosub));
        assert_eq!(find_opcode(Variant::Dpaa2, 0x1C55), None);
        assert_eq!(find_opcode(Variant::Dpaa2, 0x0001), None);
        assert_eq!(find_opcode(Variant::Dpaa1, 0x0300), None);
        assert_eq!(find_opcode(Variant::Dpaa2, 0x0300), Some(Opcode::SetClrFaf));
    }

    #[test]
    fn immediate_words_are_least_significant_first() {
        let imm = Immediate::from_words(&[0x1111, 0x2222, 0x3333]);
        assert_eq!(imm.value(), 0x0000_3333_2222_1111);
        assert_eq!(imm.bits(), 48);
    }

    #[test]
    fn decodes_load_bytes_pa() {
        // LDS_PA_TO_WR1 from_byte:4, bytes:4
        let instruction = decode(Variant::Dpaa2, &[0x1000 | 1 << 10 | 7 << 4 | 3 << 1 | 1]).unwrap();
        assert_eq!(
            instruction.kind,
            InstructionKind::LoadBytesPaToWr {
                shift: true,
                wr: Wr::Wr1,
                end: 7,
                count: 4,
            }
        );
    }

    #[test]
    fn reversed_ranges_are_invalid_parameters() {
        let err = decode(Variant::Dpaa2, &[0x1000 | 1 << 4 | 3 << 1]).unwrap_err();
        assert!(matches!(err, Fault::InvalidParameter(ParameterError::ReversedRange { .. })));
        // LOAD_BITS_FW m=2 n=5
        let err = decode(Variant::Dpaa2, &[0x8000 | 2 << 7 | 5 << 1]).unwrap_err();
        assert_eq!(err.status(), crate::cpu::StatusCode::InvalidParameter);
    }

    #[test]
    fn faf_index_limit() {
        assert!(decode(Variant::Dpaa2, &[0x0300 | 111]).is_ok());
        let err = decode(Variant::Dpaa2, &[0x0300 | 112]).unwrap_err();
        assert_eq!(
            err,
            Fault::InvalidParameter(ParameterError::FafIndex {
                index: 112,
                limit: 112
            })
        );
    }

    #[test]
    fn destination_word_flags() {
        let instruction = decode(Variant::Dpaa2, &[0x1801, 0xC405]).unwrap();
        let InstructionKind::Jump { dest } = instruction.kind else {
            panic!("expected jump, got {:?}", instruction.kind);
        };
        assert!(dest.gosub && dest.relative && dest.advance && dest.negative());
        assert_eq!(dest.offset(Variant::Dpaa2), 5);
    }

    #[test]
    fn destination_with_stray_bits_is_rejected() {
        let err = decode(Variant::Dpaa2, &[0x1800, 0x2040]).unwrap_err();
        assert_eq!(
            err,
            Fault::InvalidDestination(DestinationError::IllegalBits { field: 0x2040 })
        );
        let err = decode(Variant::Dpaa1, &[0x0008, 0x0400, 0x0021]).unwrap_err();
        assert_eq!(err.status(), crate::cpu::StatusCode::InvalidDestination);
    }

    #[test]
    fn dpaa1_jump_is_one_word() {
        let instruction = decode(Variant::Dpaa1, &[0x1800 | 1 << 10 | 0x3FF]).unwrap();
        assert_eq!(instruction.len(), 1);
        assert_eq!(
            instruction.kind,
            InstructionKind::Jump {
                dest: Destination::absolute(0x3FF, true)
            }
        );
    }

    #[test]
    fn immediate_sizes_follow_opcode_fields() {
        assert_eq!(decode(Variant::Dpaa2, &[0x0058, 1, 2]).unwrap().len(), 3);
        assert_eq!(decode(Variant::Dpaa2, &[0x00D8, 1, 2, 3, 4]).unwrap().len(), 5);
        assert_eq!(decode(Variant::Dpaa2, &[0x0200 | 47 << 1, 1, 2, 3]).unwrap().len(), 4);
        assert_eq!(decode(Variant::Dpaa2, &[0x0800 | 7 << 7 | 7, 1, 2, 3, 4]).unwrap().len(), 5);
    }

    #[test]
    fn truncated_instruction() {
        assert_eq!(
            decode(Variant::Dpaa2, &[0x0078]).unwrap_err(),
            Fault::Truncated { pc: 0x20 }
        );
    }

    #[test]
    fn case_re_encodes() {
        let words = [0x0020 | 0b1010, 0x0040, 0x0041, 0x8042, 0x7FF];
        let instruction = decode(Variant::Dpaa2, &words).unwrap();
        assert_eq!(instruction.kind.encode(Variant::Dpaa2), words);
        let InstructionKind::Case(case) = instruction.kind else {
            panic!("expected case");
        };
        assert_eq!(case.lane_destinations().len(), 3);
        assert_eq!(case.default_destination().map(|d| d.field), Some(0x7FF));
    }

    #[test]
    fn linear_sweep() {
        let program = Program::from_words(0x20, vec![0x0000, 0x0078, 0x0030, 0x0002]);
        let decoded = Decoder::new(&program, Variant::Dpaa2).decode_instructions().unwrap();
        let addresses: Vec<u16> = decoded.iter().map(|i| i.address).collect();
        assert_eq!(addresses, [0x20, 0x21, 0x23]);
    }
}

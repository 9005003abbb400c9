use super::{Effect, Simulator, Termination};
use crate::decoder::{
    AddSub, BitwiseOp, Case, Condition, Destination, Immediate, Instruction, InstructionKind,
    ShiftDirection, Wr,
};
use crate::error::Fault;
use crate::memory::ParseArray;
use crate::shell::{ProtocolClass, lookup_next_header};

/// `current` shifted up by `width` bits with `value` in the vacated bits,
/// or just `value` when not shifting.
fn shift_in(current: u64, value: u64, width: u32, shift: bool) -> u64 {
    let value = value & low_mask(width);
    if shift {
        current.checked_shl(width).unwrap_or(0) | value
    } else {
        value
    }
}

fn low_mask(width: u32) -> u64 {
    u64::MAX.checked_shr(64 - width).unwrap_or(0)
}

fn be_value(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |acc, byte| acc << 8 | *byte as u64)
}

/// Sums WR0's low lane and all four WR1 lanes with end-around carry.
fn ones_complement_sum(wr0: u64, wr1: u64) -> u16 {
    let mut sum = (0..4).fold(wr0 & 0xFFFF, |acc, lane| acc + (wr1 >> (16 * lane) & 0xFFFF));
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// 32-bit add or subtract into the low half of `dst`; the high half is kept.
fn add_sub32(op: AddSub, dst: u64, lhs: u64, rhs: u64) -> u64 {
    let (lhs, rhs) = (lhs as u32, rhs as u32);
    let result = match op {
        AddSub::Add => lhs.wrapping_add(rhs),
        AddSub::Sub => lhs.wrapping_sub(rhs),
    };
    dst & 0xFFFF_FFFF_0000_0000 | result as u64
}

impl Simulator {
    pub(super) fn execute(&mut self, instruction: &Instruction) -> Result<(), Fault> {
        let next = instruction.end();
        let len = instruction.len();
        match instruction.kind {
            InstructionKind::Nop | InstructionKind::ConfirmLayerMask => self.pc = next,
            InstructionKind::AdvanceHbByWo => self.exec_advance_hb(next),
            InstructionKind::ZeroWr { wr } => {
                self.set_wr(wr, 0);
                self.pc = next;
            }
            InstructionKind::OnesCmpWr1ToWr0 => {
                let sum = ones_complement_sum(self.wr[0], self.wr[1]);
                self.set_wr(Wr::Wr0, self.wr[0] & !0xFFFF | sum as u64);
                self.pc = next;
            }
            InstructionKind::ReturnSub => self.return_from_subroutine()?,
            InstructionKind::OrIvLcv { imm } => {
                self.lcv |= imm.value() as u32;
                self.record(Effect::Lcv(self.lcv));
                self.pc = next;
            }
            InstructionKind::LoadLcvToWr { wr } => {
                self.set_wr(wr, self.lcv as u64);
                self.pc = next;
            }
            InstructionKind::StoreWrToLcv { wr } => {
                self.lcv = self.wr[wr.index()] as u32;
                self.record(Effect::Lcv(self.lcv));
                self.pc = next;
            }
            InstructionKind::CompareWr0ToIv {
                condition,
                imm,
                dest,
            } => self.exec_branch_if(condition, imm.value(), &dest, len, next)?,
            InstructionKind::CompareWr0Wr1 { condition, dest } => {
                self.exec_branch_if(condition, self.wr[1], &dest, len, next)?
            }
            InstructionKind::Case(case) => self.exec_case(&case, len, next)?,
            InstructionKind::JumpProtocol { field } => self.exec_jump_protocol(field),
            InstructionKind::AddSubWrWr { op, src, dst } => {
                let dst_value = self.wr[dst.index()];
                self.set_wr(dst, add_sub32(op, dst_value, dst_value, self.wr[src.index()]));
                self.pc = next;
            }
            InstructionKind::AddSubWrIv { op, src, dst, imm } => {
                let value = add_sub32(op, self.wr[dst.index()], self.wr[src.index()], imm.value());
                self.set_wr(dst, value);
                self.pc = next;
            }
            InstructionKind::BitwiseWrWr { op, dst } => {
                self.set_wr(dst, op.apply(self.wr[0], self.wr[1]));
                self.pc = next;
            }
            InstructionKind::BitwiseWrIv { op, src, dst, imm } => {
                self.exec_bitwise_iv(op, src, dst, &imm);
                self.pc = next;
            }
            InstructionKind::ModifyWoByWr { add, wr } => {
                let low = self.wr[wr.index()] & 0xFF;
                self.wo = if add {
                    self.wo.wrapping_add(low as u16)
                } else {
                    low as u16
                };
                self.record(Effect::Wo(self.wo));
                self.pc = next;
            }
            InstructionKind::Shift {
                direction,
                wr,
                amount,
            } => {
                let current = self.wr[wr.index()];
                let amount = amount as u32;
                let value = match direction {
                    ShiftDirection::Left => current.checked_shl(amount),
                    ShiftDirection::Right => current.checked_shr(amount),
                };
                self.set_wr(wr, value.unwrap_or(0));
                self.pc = next;
            }
            InstructionKind::LoadBitsIvToWr {
                shift,
                wr,
                bits,
                imm,
            } => {
                let value = shift_in(self.wr[wr.index()], imm.value(), bits as u32, shift);
                self.set_wr(wr, value);
                self.pc = next;
            }
            InstructionKind::LoadSvToWo { value } => {
                self.wo = value as u16;
                self.record(Effect::Wo(self.wo));
                self.pc = next;
            }
            InstructionKind::AddSvToWo { value } => {
                self.wo = self.wo.wrapping_add(value as u16);
                self.record(Effect::Wo(self.wo));
                self.pc = next;
            }
            InstructionKind::SetClrFaf { set, index } => {
                self.parse_array.set_faf(index, set);
                self.record_faf(index);
                self.pc = next;
            }
            InstructionKind::JumpFaf { index, dest } => {
                self.record_faf(index);
                let taken = self.parse_array.faf(index);
                self.record(Effect::Branch { taken });
                if taken {
                    self.resolve_destination(&dest, len)?;
                } else {
                    self.pc = next;
                }
            }
            InstructionKind::Jump { dest } => self.resolve_destination(&dest, len)?,
            InstructionKind::StoreIvToRa { end, count, imm } => {
                self.store_to_parse_array(end, count, imm.value());
                self.pc = next;
            }
            InstructionKind::LoadBytesPaToWr {
                shift,
                wr,
                end,
                count,
            } => {
                let start = (end - count + 1) as usize;
                let value = be_value(&self.parameters[start..=end as usize]);
                self.load_bytes(wr, value, count, shift);
                self.pc = next;
            }
            InstructionKind::StoreWrToRa { wr, end, count } => {
                self.store_to_parse_array(end, count, self.wr[wr.index()]);
                self.pc = next;
            }
            InstructionKind::LoadBytesRaToWr {
                shift,
                wr,
                end,
                count,
            } => {
                let start = (end - count + 1) as usize;
                let value = be_value(self.parse_array.read(start, count as usize));
                self.load_bytes(wr, value, count, shift);
                self.pc = next;
            }
            InstructionKind::LoadBitsFwToWr {
                shift,
                wr,
                end,
                count,
            } => {
                let value = self.frame_bits(end, count)?;
                let value = shift_in(self.wr[wr.index()], value, count as u32, shift);
                self.set_wr(wr, value);
                self.pc = next;
            }
        }
        Ok(())
    }

    fn set_wr(&mut self, wr: Wr, value: u64) {
        self.wr[wr.index()] = value;
        self.record(Effect::Wr { wr, value });
    }

    fn exec_advance_hb(&mut self, next: u16) {
        self.hb = self.hb.wrapping_add(self.wo);
        self.wo = 0;
        self.record(Effect::HeaderBase { hb: self.hb });
        self.pc = next;
    }

    /// Compares WR0 against `rhs` and jumps when the condition holds.
    fn exec_branch_if(
        &mut self,
        condition: Condition,
        rhs: u64,
        dest: &Destination,
        len: usize,
        next: u16,
    ) -> Result<(), Fault> {
        let taken = condition.holds(self.wr[0], rhs);
        self.record(Effect::Branch { taken });
        if taken {
            self.resolve_destination(dest, len)
        } else {
            self.pc = next;
            Ok(())
        }
    }

    fn exec_case(&mut self, case: &Case, len: usize, next: u16) -> Result<(), Fault> {
        let key = self.wr[0] & 0xFFFF;
        let matched = case
            .lane_destinations()
            .iter()
            .enumerate()
            .find(|(lane, _)| self.wr[1] >> (16 * lane) & 0xFFFF == key);
        let dest = match matched {
            Some((lane, dest)) => {
                self.record(Effect::CaseMatch { lane });
                Some(*dest)
            }
            None => case.default_destination().copied(),
        };
        match dest {
            Some(dest) => self.resolve_destination(&dest, len),
            None => {
                self.pc = next;
                Ok(())
            }
        }
    }

    /// Always advances the window, then hands off to the shell chosen by the
    /// next-header field. `pc` stays on the jump instruction.
    fn exec_jump_protocol(&mut self, field: u8) {
        self.advance_window();
        let class = ProtocolClass::from_field(field);
        let jump = lookup_next_header(self.variant, class, self.parse_array.next_header());
        self.record(Effect::Protocol(jump));
        self.finish(Termination::Protocol(jump));
    }

    fn exec_bitwise_iv(&mut self, op: BitwiseOp, src: Wr, dst: Wr, imm: &Immediate) {
        self.set_wr(dst, op.apply(self.wr[src.index()], imm.value()));
    }

    fn load_bytes(&mut self, wr: Wr, value: u64, count: u8, shift: bool) {
        let value = shift_in(self.wr[wr.index()], value, 8 * count as u32, shift);
        self.set_wr(wr, value);
    }

    /// Writes the low `count` bytes of `value`, most significant first,
    /// ending at parse-array byte `end`.
    fn store_to_parse_array(&mut self, end: u8, count: u8, value: u64) {
        let bytes = value.to_be_bytes();
        let data = &bytes[8 - count as usize..];
        let start = (end - count + 1) as usize;
        self.parse_array.write(start, data);
        self.record(Effect::ParseArray {
            start,
            bytes: data.to_vec(),
        });
    }

    /// Bits `end - count + 1 ..= end` of the frame window at `hb + wo`, where
    /// bit 0 is the most significant bit of the first window byte.
    fn frame_bits(&self, end: u8, count: u8) -> Result<u64, Fault> {
        let first = (end - count + 1) as usize;
        let end = end as usize;
        let window = self.hb as usize + self.wo as usize;
        let bytes = self
            .frame
            .window(window + first / 8, end / 8 - first / 8 + 1)?;
        let raw = bytes.iter().fold(0u128, |acc, byte| acc << 8 | *byte as u128);
        Ok((raw >> (7 - end % 8)) as u64 & low_mask(count as u32))
    }

    fn record_faf(&mut self, index: u8) {
        let (position, mask) = ParseArray::faf_position(index);
        let byte = self.parse_array.as_bytes()[position];
        self.record(Effect::Faf {
            position,
            byte,
            mask,
        });
    }
}

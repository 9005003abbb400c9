use tracing::debug;

use super::{Effect, Simulator, Termination};
use crate::decoder::Destination;
use crate::error::{DestinationError, Fault};
use crate::shell::Shell;
use crate::variant::MIN_PC;

impl Simulator {
    /// Moves `pc` to `dest` for an instruction of `len` words at the current
    /// `pc`. Every rule is checked before any state changes.
    pub(super) fn resolve_destination(&mut self, dest: &Destination, len: usize) -> Result<(), Fault> {
        let variant = self.variant;
        dest.check(variant)?;

        let pc = self.pc;
        let target = if dest.relative {
            let offset = dest.offset(variant);
            if offset == 0 {
                return Err(DestinationError::NullOffset.into());
            }
            if dest.negative() {
                pc.checked_sub(offset)
                    .ok_or(DestinationError::BeforeStart { pc, offset })?
            } else {
                let target = pc + offset;
                if !variant.is_sentinel(target) && target > self.pc_end {
                    return Err(DestinationError::PastEnd {
                        target,
                        end: self.pc_end,
                    }
                    .into());
                }
                target
            }
        } else {
            let target = dest.address(variant);
            if !variant.is_sentinel(target) {
                if target > self.pc_end {
                    return Err(DestinationError::PastEnd {
                        target,
                        end: self.pc_end,
                    }
                    .into());
                }
                if target == pc && !dest.advance {
                    return Err(DestinationError::SamePc { pc }.into());
                }
            }
            target
        };

        let shell = if target < MIN_PC {
            Some(
                Shell::from_address(variant, target)
                    .ok_or(DestinationError::InvalidShell { target })?,
            )
        } else {
            None
        };
        let sentinel = variant.is_sentinel(target);
        if shell.is_none() && !sentinel && dest.gosub && self.return_pc != 0 {
            return Err(DestinationError::NestedGosub {
                pending: self.return_pc,
            }
            .into());
        }

        debug!(from = pc, to = target, advance = dest.advance, gosub = dest.gosub, "jump");
        self.pc = target;
        self.record(Effect::Jump { target });
        if dest.advance {
            self.advance_window();
        }

        if let Some(shell) = shell {
            self.return_pc = 0;
            self.record(Effect::Shell(shell));
            self.finish(Termination::Shell(shell));
        } else if target == variant.return_to_hard_shell() {
            self.finish(Termination::ReturnToHardShell);
        } else if target == variant.end_parsing() {
            self.finish(Termination::EndParsing);
        } else if dest.gosub {
            self.return_pc = pc + len as u16;
            self.record(Effect::ReturnPc(self.return_pc));
        }
        Ok(())
    }

    /// `hb += wo`, then clears the window offset and both working registers.
    pub(super) fn advance_window(&mut self) {
        self.hb = self.hb.wrapping_add(self.wo);
        self.wo = 0;
        self.wr = [0; 2];
        self.record(Effect::Advance { hb: self.hb });
    }

    pub(super) fn return_from_subroutine(&mut self) -> Result<(), Fault> {
        if self.return_pc == 0 {
            return Err(DestinationError::NoReturnPc.into());
        }
        let target = self.return_pc;
        self.pc = target;
        self.return_pc = 0;
        self.record(Effect::Return { target });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::StatusCode;
    use crate::decoder::Wr;
    use crate::variant::{DEST_GOSUB_BIT, DEST_RELATIVE_BIT, DEST_SIGN_BIT, Variant};

    fn simulator(variant: Variant, pc: u16, end: u16) -> Simulator {
        let mut sim = Simulator::new(variant);
        sim.init();
        sim.pc_start = MIN_PC;
        sim.pc = pc;
        sim.pc_end = end;
        sim
    }

    fn relative(field: u16) -> Destination {
        Destination::from_word(Variant::Dpaa2, DEST_RELATIVE_BIT | field, false)
    }

    #[test]
    fn zero_relative_offset_always_fails() {
        for pc in [0x20, 0x100, 0x7FC] {
            let mut sim = simulator(Variant::Dpaa2, pc, 0x7FC);
            for field in [0, DEST_SIGN_BIT] {
                assert_eq!(
                    sim.resolve_destination(&relative(field), 2),
                    Err(DestinationError::NullOffset.into())
                );
            }
            assert_eq!(sim.pc(), pc);
        }
    }

    #[test]
    fn relative_offsets() {
        let mut sim = simulator(Variant::Dpaa2, 0x30, 0x40);
        sim.resolve_destination(&relative(DEST_SIGN_BIT | 0x08), 2).unwrap();
        assert_eq!(sim.pc(), 0x28);

        let mut sim = simulator(Variant::Dpaa2, 0x30, 0x40);
        sim.resolve_destination(&relative(0x10), 2).unwrap();
        assert_eq!(sim.pc(), 0x40);
        assert!(sim.resolve_destination(&relative(0x01), 2).is_err());
        assert_eq!(sim.pc(), 0x40);
    }

    #[test]
    fn backward_offset_below_zero_fails() {
        let mut sim = simulator(Variant::Dpaa2, 0x30, 0x40);
        assert_eq!(
            sim.resolve_destination(&relative(DEST_SIGN_BIT | 0x31), 2),
            Err(DestinationError::BeforeStart {
                pc: 0x30,
                offset: 0x31
            }
            .into())
        );
    }

    #[test]
    fn relative_jump_onto_sentinel_skips_bound_check() {
        let mut sim = simulator(Variant::Dpaa2, 0x7F0, 0x7F4);
        sim.resolve_destination(&relative(0x0F), 2).unwrap();
        assert_eq!(sim.pc(), 0x7FF);
        assert_eq!(sim.status(), StatusCode::HardShellCalled);
        assert_eq!(sim.stop, Some(Termination::EndParsing));
    }

    #[test]
    fn absolute_target_past_end_fails() {
        let mut sim = simulator(Variant::Dpaa2, 0x20, 0x30);
        let err = sim
            .resolve_destination(&Destination::from_word(Variant::Dpaa2, 0x31, false), 2)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidDestination);
        sim.resolve_destination(&Destination::from_word(Variant::Dpaa2, 0x30, false), 2)
            .unwrap();
        assert_eq!(sim.pc(), 0x30);
    }

    #[test]
    fn same_pc_needs_advance() {
        let mut sim = simulator(Variant::Dpaa2, 0x24, 0x30);
        sim.wr = [0x11, 0x22];
        sim.wo = 6;
        sim.hb = 2;
        assert_eq!(
            sim.resolve_destination(&Destination::absolute(0x24, false), 2),
            Err(DestinationError::SamePc { pc: 0x24 }.into())
        );
        assert_eq!(sim.wr(Wr::Wr0), 0x11);

        sim.resolve_destination(&Destination::absolute(0x24, true), 2).unwrap();
        assert_eq!(sim.pc(), 0x24);
        assert_eq!(sim.wr(Wr::Wr0), 0);
        assert_eq!(sim.wr(Wr::Wr1), 0);
        assert_eq!(sim.window_offset(), 0);
        assert_eq!(sim.header_base(), 8);
    }

    #[test]
    fn gosub_depth_is_one() {
        let mut sim = simulator(Variant::Dpaa2, 0x20, 0x40);
        let gosub = Destination::from_word(Variant::Dpaa2, DEST_GOSUB_BIT | 0x30, false);
        sim.resolve_destination(&gosub, 2).unwrap();
        assert_eq!(sim.return_pc(), 0x22);
        assert_eq!(sim.pc(), 0x30);

        let nested = Destination::from_word(Variant::Dpaa2, DEST_GOSUB_BIT | 0x38, false);
        assert_eq!(
            sim.resolve_destination(&nested, 2),
            Err(DestinationError::NestedGosub { pending: 0x22 }.into())
        );
        assert_eq!(sim.pc(), 0x30);

        sim.return_from_subroutine().unwrap();
        assert_eq!(sim.pc(), 0x22);
        assert_eq!(
            sim.return_from_subroutine(),
            Err(DestinationError::NoReturnPc.into())
        );
    }

    #[test]
    fn shell_call_clears_return_pc() {
        let mut sim = simulator(Variant::Dpaa2, 0x20, 0x40);
        sim.return_pc = 0x33;
        sim.resolve_destination(&Destination::absolute(0x0D, false), 2).unwrap();
        assert_eq!(sim.return_pc(), 0);
        assert_eq!(sim.stop, Some(Termination::Shell(Shell::Udp)));
        assert_eq!(sim.status(), StatusCode::HardShellCalled);
    }

    #[test]
    fn unknown_shell_leaves_state_untouched() {
        let mut sim = simulator(Variant::Dpaa2, 0x20, 0x40);
        sim.wo = 4;
        let err = sim
            .resolve_destination(&Destination::absolute(0x15, true), 2)
            .unwrap_err();
        assert_eq!(err, DestinationError::InvalidShell { target: 0x15 }.into());
        assert_eq!((sim.pc(), sim.window_offset()), (0x20, 4));
    }

    #[test]
    fn dpaa1_sentinels() {
        let mut sim = simulator(Variant::Dpaa1, 0x20, 0x40);
        sim.resolve_destination(&Destination::absolute(0x3FE, false), 1).unwrap();
        assert_eq!(sim.stop, Some(Termination::ReturnToHardShell));
    }
}

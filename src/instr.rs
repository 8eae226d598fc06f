//! Component F (instructions): addressing-mode selection and encoding.
//!
//! New code grounded directly in spec §4.C/§4.F's addressing-mode
//! disambiguation rules (immediate `#`, indexed `,x`/`,y`, indirect
//! grouping, zero-page-vs-absolute auto-sizing, forced `z:`/`a:` width
//! prefixes). `other_examples/131be27f_popeyeotaku-pop65__src-opcode.rs.rs`
//! grounds the `Mode`/`Op` vocabulary this builds on (see `cpu.rs`); the
//! mode-selection algorithm itself has no teacher analog, since the
//! teacher never encodes machine instructions.

use crate::cpu::{Cpu, Mode};
use crate::error::{AssembleError, Loc};
use crate::expr::{Expr, Size};
use crate::token::Pos;

/// Which index register, if any, qualifies a `,x`/`,y` suffixed operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Index {
    X,
    Y,
}

/// An explicit `z:`/`a:` width prefix forcing zero-page or absolute sizing
/// instead of the auto-sizing rule (§4.F).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Force {
    ZeroPage,
    Absolute,
}

impl Force {
    fn label(self) -> &'static str {
        match self {
            Force::ZeroPage => "zeropage",
            Force::Absolute => "absolute",
        }
    }
}

/// The shape of an instruction's argument, already disambiguated from raw
/// tokens by the assembler's argument parser (§4.F) but not yet matched
/// against a specific mnemonic's supported addressing modes.
#[derive(Clone, Debug)]
pub enum Arg {
    Implied,
    Accumulator,
    Immediate(Expr),
    Indirect(Expr),
    IndirectX(Expr),
    IndirectY(Expr),
    Indexed(Expr, Index, Option<Force>),
    Plain(Expr, Option<Force>),
}

fn fits_zero_page(expr: &Expr) -> bool {
    matches!(expr.size, Some(Size::Byte))
}

/// Picks the concrete addressing [`Mode`] for `mnemonic` given its parsed
/// `arg`, and returns that mode together with the operand expression to
/// encode (`None` for modes with no operand byte). Errors if the mnemonic
/// is unknown, doesn't support the implied shape of `arg`, or a `z:`/`a:`
/// prefix forces a width the mnemonic has no opcode for (§4.C/§4.F, §7).
pub fn select_mode<'a>(
    mnemonic: &str,
    arg: &'a Arg,
    cpu: &Cpu,
    pos: Option<Pos>,
) -> Result<(Mode, Option<&'a Expr>), AssembleError> {
    let op = cpu.lookup(mnemonic).ok_or_else(|| AssembleError::UnknownMnemonic {
        mnemonic: mnemonic.to_string(),
        loc: Loc(pos),
    })?;

    let bad_mode = |mode: &'static str| AssembleError::BadAddressMode {
        mnemonic: mnemonic.to_string(),
        mode,
        loc: Loc(pos),
    };

    match arg {
        Arg::Implied => op.opcode_for(Mode::Imp).map(|_| (Mode::Imp, None)).ok_or_else(|| bad_mode("implied")),
        Arg::Accumulator => op.opcode_for(Mode::Acc).map(|_| (Mode::Acc, None)).ok_or_else(|| bad_mode("accumulator")),
        Arg::Immediate(e) => op.opcode_for(Mode::Imm).map(|_| (Mode::Imm, Some(e))).ok_or_else(|| bad_mode("immediate")),
        Arg::IndirectX(e) => op.opcode_for(Mode::Inx).map(|_| (Mode::Inx, Some(e))).ok_or_else(|| bad_mode("indexed indirect")),
        Arg::IndirectY(e) => op.opcode_for(Mode::Iny).map(|_| (Mode::Iny, Some(e))).ok_or_else(|| bad_mode("indirect indexed")),
        Arg::Indirect(e) => op.opcode_for(Mode::Ind).map(|_| (Mode::Ind, Some(e))).ok_or_else(|| bad_mode("indirect")),

        Arg::Indexed(e, index, force) => {
            let (zp, abs) = match index {
                Index::X => (Mode::Zpx, Mode::Abx),
                Index::Y => (Mode::Zpy, Mode::Aby),
            };
            match force {
                Some(Force::ZeroPage) => op
                    .opcode_for(zp)
                    .map(|_| (zp, Some(e)))
                    .ok_or_else(|| AssembleError::CannotForceAddressing { kind: Force::ZeroPage.label(), mode: mnemonic_label(mnemonic), loc: Loc(pos) }),
                Some(Force::Absolute) => op
                    .opcode_for(abs)
                    .map(|_| (abs, Some(e)))
                    .ok_or_else(|| AssembleError::CannotForceAddressing { kind: Force::Absolute.label(), mode: mnemonic_label(mnemonic), loc: Loc(pos) }),
                None => {
                    if fits_zero_page(e) && op.opcode_for(zp).is_some() {
                        Ok((zp, Some(e)))
                    } else if let Some(_) = op.opcode_for(abs) {
                        Ok((abs, Some(e)))
                    } else if let Some(_) = op.opcode_for(zp) {
                        Ok((zp, Some(e)))
                    } else {
                        Err(bad_mode("indexed"))
                    }
                }
            }
        }

        Arg::Plain(e, force) => {
            if op.opcode_for(Mode::Rel).is_some() {
                return Ok((Mode::Rel, Some(e)));
            }
            match force {
                Some(Force::ZeroPage) => op
                    .opcode_for(Mode::Zpg)
                    .map(|_| (Mode::Zpg, Some(e)))
                    .ok_or_else(|| AssembleError::CannotForceAddressing { kind: Force::ZeroPage.label(), mode: mnemonic_label(mnemonic), loc: Loc(pos) }),
                Some(Force::Absolute) => op
                    .opcode_for(Mode::Abs)
                    .map(|_| (Mode::Abs, Some(e)))
                    .ok_or_else(|| AssembleError::CannotForceAddressing { kind: Force::Absolute.label(), mode: mnemonic_label(mnemonic), loc: Loc(pos) }),
                None => {
                    if fits_zero_page(e) && op.opcode_for(Mode::Zpg).is_some() {
                        Ok((Mode::Zpg, Some(e)))
                    } else if op.opcode_for(Mode::Abs).is_some() {
                        Ok((Mode::Abs, Some(e)))
                    } else if op.opcode_for(Mode::Zpg).is_some() {
                        Ok((Mode::Zpg, Some(e)))
                    } else {
                        Err(bad_mode("absolute"))
                    }
                }
            }
        }
    }
}

fn mnemonic_label(_mnemonic: &str) -> &'static str {
    "this mnemonic"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Cpu;

    #[test]
    fn implied_mnemonic_with_no_operand() {
        let cpu = Cpu::mos6502();
        let (mode, expr) = select_mode("nop", &Arg::Implied, &cpu, None).unwrap();
        assert_eq!(mode, Mode::Imp);
        assert!(expr.is_none());
    }

    #[test]
    fn plain_small_value_prefers_zero_page() {
        let cpu = Cpu::mos6502();
        let arg = Arg::Plain(Expr::num(0x10, None), None);
        let (mode, _) = select_mode("lda", &arg, &cpu, None).unwrap();
        assert_eq!(mode, Mode::Zpg);
    }

    #[test]
    fn plain_large_value_uses_absolute() {
        let cpu = Cpu::mos6502();
        let arg = Arg::Plain(Expr::num(0x1000, None), None);
        let (mode, _) = select_mode("lda", &arg, &cpu, None).unwrap();
        assert_eq!(mode, Mode::Abs);
    }

    #[test]
    fn forced_absolute_on_small_value() {
        let cpu = Cpu::mos6502();
        let arg = Arg::Plain(Expr::num(0x10, None), Some(Force::Absolute));
        let (mode, _) = select_mode("lda", &arg, &cpu, None).unwrap();
        assert_eq!(mode, Mode::Abs);
    }

    #[test]
    fn forcing_zero_page_on_unsupported_mnemonic_errors() {
        let cpu = Cpu::mos6502();
        let arg = Arg::Plain(Expr::num(0x10, None), Some(Force::ZeroPage));
        let err = select_mode("jmp", &arg, &cpu, None).unwrap_err();
        assert!(matches!(err, AssembleError::CannotForceAddressing { .. }));
    }

    #[test]
    fn branch_mnemonic_always_picks_relative() {
        let cpu = Cpu::mos6502();
        let arg = Arg::Plain(Expr::num(0x1000, None), None);
        let (mode, _) = select_mode("beq", &arg, &cpu, None).unwrap();
        assert_eq!(mode, Mode::Rel);
    }

    #[test]
    fn unknown_mnemonic_errors() {
        let cpu = Cpu::mos6502();
        let err = select_mode("xyz", &Arg::Implied, &cpu, None).unwrap_err();
        assert!(matches!(err, AssembleError::UnknownMnemonic { .. }));
    }

    #[test]
    fn indexed_small_value_prefers_zero_page_x() {
        let cpu = Cpu::mos6502();
        let arg = Arg::Indexed(Expr::num(0x10, None), Index::X, None);
        let (mode, _) = select_mode("lda", &arg, &cpu, None).unwrap();
        assert_eq!(mode, Mode::Zpx);
    }
}
